//! Tracing initialization
//!
//! The filter comes from `RUST_LOG` when set; output is human-readable by default and
//! one JSON object per line with `LOG_FORMAT=json`.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry};
