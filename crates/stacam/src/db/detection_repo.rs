//! Detection result repository: the `detection_results` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};
use crate::record::{CameraId, DetectionRecord, DetectionStatus, FileType};

/// Ordered record store used by the pipeline and the HTTP layer.
pub trait ResultRepository: Send + Sync {
    /// Inserts the record when it has no id yet (assigning one), otherwise
    /// overwrites the stored row with the same id.
    fn save(&self, record: &mut DetectionRecord) -> Result<(), DatabaseError>;

    /// The ten most recently processed records, newest first.
    fn find_top10_by_processed_at_desc(&self) -> Result<Vec<DetectionRecord>, DatabaseError>;

    /// Records processed at or after `since`, newest first.
    fn find_since(&self, since: DateTime<Utc>) -> Result<Vec<DetectionRecord>, DatabaseError>;

    fn find_by_id(&self, id: i64) -> Result<Option<DetectionRecord>, DatabaseError>;

    fn find_by_status(
        &self,
        status: DetectionStatus,
    ) -> Result<Vec<DetectionRecord>, DatabaseError>;

    fn find_by_file_type(
        &self,
        file_type: FileType,
    ) -> Result<Vec<DetectionRecord>, DatabaseError>;

    /// Records uploaded by one camera, newest first.
    fn find_by_camera(&self, camera_id: CameraId) -> Result<Vec<DetectionRecord>, DatabaseError>;

    fn count(&self) -> Result<u64, DatabaseError>;
}

/// A raw row from `detection_results`.
#[derive(Debug, Clone)]
struct DetectionRow {
    id: i64,
    file_name: String,
    file_type: String,
    file_path: String,
    detections: Option<String>,
    processed_at: String,
    status: String,
    error_message: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    camera_id: String,
}

impl DetectionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_name: row.get("file_name")?,
            file_type: row.get("file_type")?,
            file_path: row.get("file_path")?,
            detections: row.get("detections")?,
            processed_at: row.get("processed_at")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            width: row.get("width")?,
            height: row.get("height")?,
            camera_id: row.get("camera_id")?,
        })
    }

    fn into_record(self) -> Result<DetectionRecord, DatabaseError> {
        let file_type = self
            .file_type
            .parse::<FileType>()
            .map_err(|_| DatabaseError::Decode {
                column: "file_type",
                value: self.file_type.clone(),
            })?;
        let status = self
            .status
            .parse::<DetectionStatus>()
            .map_err(|_| DatabaseError::Decode {
                column: "status",
                value: self.status.clone(),
            })?;
        let camera_id = self
            .camera_id
            .parse::<CameraId>()
            .map_err(|_| DatabaseError::Decode {
                column: "camera_id",
                value: self.camera_id.clone(),
            })?;
        let processed_at = DateTime::parse_from_rfc3339(&self.processed_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| DatabaseError::Decode {
                column: "processed_at",
                value: self.processed_at.clone(),
            })?;

        Ok(DetectionRecord {
            id: Some(self.id),
            file_name: self.file_name,
            file_type,
            file_path: self.file_path,
            detections: self.detections,
            processed_at,
            status,
            error_message: self.error_message,
            width: self.width,
            height: self.height,
            camera_id,
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// order equals time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<DetectionRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<DetectionRow> = stmt
        .query_map(params, DetectionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(DetectionRow::into_record).collect()
}

/// SQLite-backed [`ResultRepository`].
#[derive(Clone)]
pub struct SqliteResultRepository {
    db: Database,
}

impl SqliteResultRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ResultRepository for SqliteResultRepository {
    fn save(&self, record: &mut DetectionRecord) -> Result<(), DatabaseError> {
        let processed_at = format_timestamp(&record.processed_at);
        let assigned = self.db.with_conn(|conn| match record.id {
            None => {
                conn.execute(
                    "INSERT INTO detection_results (file_name, file_type, file_path, detections,
                     processed_at, status, error_message, width, height, camera_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.file_name,
                        record.file_type.as_str(),
                        record.file_path,
                        record.detections,
                        processed_at,
                        record.status.as_str(),
                        record.error_message,
                        record.width,
                        record.height,
                        record.camera_id.as_str(),
                    ],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            }
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE detection_results SET file_name=?2, file_type=?3, file_path=?4,
                     detections=?5, processed_at=?6, status=?7, error_message=?8, width=?9,
                     height=?10, camera_id=?11
                     WHERE id=?1",
                    params![
                        id,
                        record.file_name,
                        record.file_type.as_str(),
                        record.file_path,
                        record.detections,
                        processed_at,
                        record.status.as_str(),
                        record.error_message,
                        record.width,
                        record.height,
                        record.camera_id.as_str(),
                    ],
                )?;
                if changed == 0 {
                    log::warn!("Save of record {} matched no row", id);
                }
                Ok(None)
            }
        })?;

        if let Some(id) = assigned {
            record.id = Some(id);
        }
        Ok(())
    }

    fn find_top10_by_processed_at_desc(&self) -> Result<Vec<DetectionRecord>, DatabaseError> {
        self.db.with_conn(|conn| {
            query_records(
                conn,
                "SELECT * FROM detection_results ORDER BY processed_at DESC, id DESC LIMIT 10",
                &[],
            )
        })
    }

    fn find_since(&self, since: DateTime<Utc>) -> Result<Vec<DetectionRecord>, DatabaseError> {
        let since = format_timestamp(&since);
        self.db.with_conn(|conn| {
            query_records(
                conn,
                "SELECT * FROM detection_results WHERE processed_at >= ?1
                 ORDER BY processed_at DESC, id DESC",
                &[&since],
            )
        })
    }

    fn find_by_id(&self, id: i64) -> Result<Option<DetectionRecord>, DatabaseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM detection_results WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id], DetectionRow::from_row)?;
            match rows.next() {
                Some(Ok(row)) => row.into_record().map(Some),
                Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
                None => Ok(None),
            }
        })
    }

    fn find_by_status(
        &self,
        status: DetectionStatus,
    ) -> Result<Vec<DetectionRecord>, DatabaseError> {
        self.db.with_conn(|conn| {
            query_records(
                conn,
                "SELECT * FROM detection_results WHERE status = ?1
                 ORDER BY processed_at DESC, id DESC",
                &[&status.as_str()],
            )
        })
    }

    fn find_by_file_type(
        &self,
        file_type: FileType,
    ) -> Result<Vec<DetectionRecord>, DatabaseError> {
        self.db.with_conn(|conn| {
            query_records(
                conn,
                "SELECT * FROM detection_results WHERE file_type = ?1
                 ORDER BY processed_at DESC, id DESC",
                &[&file_type.as_str()],
            )
        })
    }

    fn find_by_camera(&self, camera_id: CameraId) -> Result<Vec<DetectionRecord>, DatabaseError> {
        self.db.with_conn(|conn| {
            query_records(
                conn,
                "SELECT * FROM detection_results WHERE camera_id = ?1
                 ORDER BY processed_at DESC, id DESC",
                &[&camera_id.as_str()],
            )
        })
    }

    fn count(&self) -> Result<u64, DatabaseError> {
        self.db.with_conn(|conn| {
            let count: u64 =
                conn.query_row("SELECT COUNT(*) FROM detection_results", [], |r| r.get(0))?;
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::path::Path;

    fn repo() -> SqliteResultRepository {
        SqliteResultRepository::new(Database::open_in_memory().unwrap())
    }

    fn record_at(name: &str, processed_at: DateTime<Utc>) -> DetectionRecord {
        let mut record = DetectionRecord::new_pending(
            name.to_string(),
            &Path::new("/tmp/uploads").join(name),
            CameraId::CameraOne,
        );
        record.processed_at = processed_at;
        record
    }

    #[test]
    fn test_save_assigns_increasing_ids() {
        let repo = repo();
        let mut a = record_at("1_a.jpg", Utc::now());
        let mut b = record_at("2_b.jpg", Utc::now());
        repo.save(&mut a).unwrap();
        repo.save(&mut b).unwrap();

        let (a_id, b_id) = (a.id.unwrap(), b.id.unwrap());
        assert!(b_id > a_id);
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn test_save_updates_existing_row() {
        let repo = repo();
        let mut record = record_at("1_dog.jpg", Utc::now()).with_dimensions(Some((640, 480)));
        repo.save(&mut record).unwrap();
        let id = record.id.unwrap();

        record.begin_processing().unwrap();
        record.complete(r#"{"detections":[]}"#.to_string()).unwrap();
        repo.save(&mut record).unwrap();

        assert_eq!(record.id, Some(id));
        assert_eq!(repo.count().unwrap(), 1);

        let stored = repo.find_by_id(id).unwrap().unwrap();
        assert_eq!(stored.status, DetectionStatus::Completed);
        assert_eq!(stored.detections.as_deref(), Some(r#"{"detections":[]}"#));
        assert_eq!(stored.width, Some(640));
        assert_eq!(stored.height, Some(480));
        assert_eq!(stored.file_type, FileType::Image);
        assert_eq!(stored.camera_id, CameraId::CameraOne);
    }

    #[test]
    fn test_round_trip_preserves_timestamp_millis() {
        let repo = repo();
        let mut record = record_at("1_a.png", Utc::now());
        repo.save(&mut record).unwrap();

        let stored = repo.find_by_id(record.id.unwrap()).unwrap().unwrap();
        assert_eq!(
            stored.processed_at.timestamp_millis(),
            record.processed_at.timestamp_millis()
        );
    }

    #[test]
    fn test_find_by_id_missing() {
        let repo = repo();
        assert!(repo.find_by_id(42).unwrap().is_none());
    }

    #[test]
    fn test_top10_newest_first() {
        let repo = repo();
        let base = Utc::now() - Duration::hours(1);
        for i in 0..12 {
            let mut record = record_at(&format!("{}_f.jpg", i), base + Duration::minutes(i));
            repo.save(&mut record).unwrap();
        }

        let top = repo.find_top10_by_processed_at_desc().unwrap();
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].file_name, "11_f.jpg");
        assert_eq!(top[9].file_name, "2_f.jpg");
        assert!(top
            .windows(2)
            .all(|w| w[0].processed_at >= w[1].processed_at));
    }

    #[test]
    fn test_find_since() {
        let repo = repo();
        let now = Utc::now();
        let mut old = record_at("1_old.jpg", now - Duration::minutes(30));
        let mut recent = record_at("2_recent.jpg", now - Duration::minutes(2));
        repo.save(&mut old).unwrap();
        repo.save(&mut recent).unwrap();

        let found = repo.find_since(now - Duration::minutes(5)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name, "2_recent.jpg");

        let all = repo.find_since(now - Duration::hours(1)).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_find_by_status_and_file_type() {
        let repo = repo();
        let mut image = record_at("1_a.jpg", Utc::now());
        let mut video = record_at("2_b.mp4", Utc::now());
        repo.save(&mut image).unwrap();
        video.fail("boom").unwrap();
        repo.save(&mut video).unwrap();

        let failed = repo.find_by_status(DetectionStatus::Failed).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_message.as_deref(), Some("boom"));

        let videos = repo.find_by_file_type(FileType::Video).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].file_name, "2_b.mp4");

        assert!(repo
            .find_by_status(DetectionStatus::Processing)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_find_by_camera_newest_first() {
        let repo = repo();
        let now = Utc::now();
        let mut first = record_at("1_a.jpg", now - Duration::minutes(3));
        let mut other = record_at("2_b.jpg", now - Duration::minutes(2));
        other.camera_id = CameraId::CameraTwo;
        let mut second = record_at("3_c.jpg", now - Duration::minutes(1));
        for record in [&mut first, &mut other, &mut second] {
            repo.save(record).unwrap();
        }

        let names: Vec<_> = repo
            .find_by_camera(CameraId::CameraOne)
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, vec!["3_c.jpg", "1_a.jpg"]);
        assert_eq!(repo.find_by_camera(CameraId::CameraTwo).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO detection_results (file_name, file_type, file_path, processed_at, status, camera_id)
                 VALUES ('1_a.jpg', 'IMAGE', '/tmp/1_a.jpg', '2026-01-01T00:00:00.000Z', 'DONE', 'camera_one')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let repo = SqliteResultRepository::new(db);
        let err = repo.find_by_id(1).unwrap_err();
        assert!(matches!(err, DatabaseError::Decode { column: "status", .. }));
    }
}
