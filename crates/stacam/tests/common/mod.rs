//! Shared test utilities for stacam integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated service instances with temp directories
//! - Media fixtures (JPEG bytes, ffmpeg-generated clips)

pub mod harness;
pub mod media;

pub use harness::{collect_until_terminal, Collected, TestHarness};
pub use media::*;
