//! STOMP over live WebSocket connections, raw and SockJS-framed.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use stacam::{Config, DetectionService, DetectionStatus};
use stacam_server::stomp::sockjs;
use stacam_server::stomp::{parse_frames, Command, Frame};
use stacam_server::AppState;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

struct Broker {
    _temp: TempDir,
    service: Arc<DetectionService>,
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl Broker {
    async fn start() -> Self {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("detector.sh");
        std::fs::write(&script, "echo '{\"detections\":[{\"className\":\"cat\"}]}'\n").unwrap();

        let mut config = Config::default();
        config.upload.dir = temp.path().join("uploads").display().to_string();
        config.database.path = temp.path().join("stacam.db").display().to_string();
        config.python.script.path = script.display().to_string();
        config.python.interpreters = vec!["bash".to_string()];
        config.websocket.image.enabled = false;
        config.worker.count = 1;

        let service = Arc::new(DetectionService::from_config(&config).unwrap());
        let state = AppState::new(Arc::clone(&service), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(stacam_server::serve(state, listener, async move {
            let _ = stopped.await;
        }));

        Self {
            _temp: temp,
            service,
            addr,
            stop: Some(stop),
        }
    }

    async fn client(&self, path: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        client
    }

    /// Uploads a small PNG from camera one and returns the record id.
    async fn upload(&self) -> i64 {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || {
            service
                .accept_upload(Some("camera_one"), Some("porch.png"), &png_bytes())
                .unwrap()
                .id
                .unwrap()
        })
        .await
        .unwrap()
    }

    async fn wait_completed(&self, id: i64) {
        let deadline = Instant::now() + READ_TIMEOUT;
        loop {
            let record = self.service.find(id).unwrap().unwrap();
            if record.status == DetectionStatus::Completed {
                return;
            }
            assert!(Instant::now() < deadline, "record {id} stuck at {}", record.status);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.service.shutdown();
    }
}

fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(4, 4)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Next text message, skipping control messages and SockJS heart-beats.
async fn next_text(client: &mut Client) -> String {
    loop {
        let message = tokio::time::timeout(READ_TIMEOUT, client.next())
            .await
            .expect("no message before timeout")
            .expect("connection closed")
            .unwrap();
        match message {
            Message::Text(text) if text != sockjs::HEARTBEAT_FRAME => return text,
            _ => continue,
        }
    }
}

async fn send_raw(client: &mut Client, wire: &str) {
    client.send(Message::Text(wire.to_string())).await.unwrap();
}

async fn next_raw(client: &mut Client) -> Vec<Frame> {
    parse_frames(&next_text(client).await).unwrap()
}

async fn send_sockjs(client: &mut Client, wires: &[&str]) {
    let text = serde_json::to_string(wires).unwrap();
    client.send(Message::Text(text)).await.unwrap();
}

async fn next_sockjs(client: &mut Client) -> Vec<Frame> {
    let text = next_text(client).await;
    let array = text
        .strip_prefix('a')
        .unwrap_or_else(|| panic!("expected a[...] frame, got {text:?}"));
    sockjs::decode_messages(array)
        .unwrap()
        .iter()
        .flat_map(|payload| parse_frames(payload).unwrap())
        .collect()
}

async fn handshake(client: &mut Client) {
    send_raw(client, "CONNECT\naccept-version:1.1,1.2\nhost:localhost\n\n\0").await;
    let frames = next_raw(client).await;
    assert_eq!(frames[0].command, Command::Connected);
    assert_eq!(frames[0].header("version"), Some("1.2"));
}

async fn subscribe(client: &mut Client, id: &str, destination: &str) {
    send_raw(
        client,
        &format!("SUBSCRIBE\nid:{id}\ndestination:{destination}\nreceipt:r-{id}\n\n\0"),
    )
    .await;
    let frames = next_raw(client).await;
    assert_eq!(frames[0].command, Command::Receipt);
    assert_eq!(frames[0].header("receipt-id"), Some(format!("r-{id}").as_str()));
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_events_reach_subscribers() {
    let broker = Broker::start().await;
    let mut client = broker.client("/ws").await;
    handshake(&mut client).await;
    subscribe(&mut client, "sub-0", "/topic/detections").await;

    let id = broker.upload().await;

    let mut statuses = Vec::new();
    while statuses.last().map(String::as_str) != Some("COMPLETED") {
        for frame in next_raw(&mut client).await {
            assert_eq!(frame.command, Command::Message);
            assert_eq!(frame.header("destination"), Some("/topic/detections"));
            assert_eq!(frame.header("subscription"), Some("sub-0"));
            assert_eq!(frame.header("content-type"), Some("application/json"));
            let event: Value = serde_json::from_str(&frame.body).unwrap();
            assert_eq!(event["type"], "SINGLE_UPDATE");
            assert_eq!(event["id"], id);
            statuses.push(event["status"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(statuses, vec!["PROCESSING", "COMPLETED"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_is_answered_on_ping_topic() {
    let broker = Broker::start().await;
    let mut client = broker.client("/ws").await;
    handshake(&mut client).await;
    subscribe(&mut client, "sub-1", "/topic/ping").await;

    send_raw(&mut client, "SEND\ndestination:/app/ping\n\n\0").await;

    let frames = next_raw(&mut client).await;
    assert_eq!(frames[0].command, Command::Message);
    assert_eq!(frames[0].header("destination"), Some("/topic/ping"));
    assert!(frames[0].body.starts_with("pong - "), "{}", frames[0].body);
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_request_sends_snapshot() {
    let broker = Broker::start().await;
    let id = broker.upload().await;
    broker.wait_completed(id).await;

    let mut client = broker.client("/ws").await;
    handshake(&mut client).await;
    subscribe(&mut client, "sub-2", "/topic/detections/initial").await;

    send_raw(&mut client, "SEND\ndestination:/app/subscribe\n\n\0").await;

    let frames = next_raw(&mut client).await;
    assert_eq!(frames[0].header("destination"), Some("/topic/detections/initial"));
    let snapshot: Value = serde_json::from_str(&frames[0].body).unwrap();
    let records = snapshot.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], id);
    assert_eq!(records[0]["status"], "COMPLETED");
}

#[tokio::test(flavor = "multi_thread")]
async fn sockjs_session_uses_array_framing() {
    let broker = Broker::start().await;
    let mut client = broker.client("/ws/000/x1y2z3/websocket").await;
    assert_eq!(next_text(&mut client).await, sockjs::OPEN_FRAME);

    send_sockjs(&mut client, &["CONNECT\naccept-version:1.2\n\n\0"]).await;
    let frames = next_sockjs(&mut client).await;
    assert_eq!(frames[0].command, Command::Connected);

    send_sockjs(
        &mut client,
        &[
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/ping\n\n\0",
            "SEND\ndestination:/app/ping\n\n\0",
        ],
    )
    .await;
    let frames = next_sockjs(&mut client).await;
    assert_eq!(frames[0].command, Command::Message);
    assert!(frames[0].body.starts_with("pong - "));

    send_sockjs(&mut client, &["DISCONNECT\nreceipt:bye\n\n\0"]).await;
    let frames = next_sockjs(&mut client).await;
    assert_eq!(frames[0].command, Command::Receipt);
    assert_eq!(frames[0].header("receipt-id"), Some("bye"));
    assert_eq!(next_text(&mut client).await, "c[3000,\"Go away!\"]");
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_frame_gets_error_and_close() {
    let broker = Broker::start().await;
    let mut client = broker.client("/ws").await;

    send_raw(&mut client, "SUBSCRIBE\nid:0\ndestination:/topic/ping\n\n\0").await;
    let frames = next_raw(&mut client).await;
    assert_eq!(frames[0].command, Command::Error);
    assert_eq!(frames[0].header("message"), Some("Not connected"));
}
