//! Control client for BLE power appliances.
//!
//! Locates a device by its advertised name, reads its telemetry, trades it
//! with the command exchange service for a hex command, and writes that
//! command back over the same GATT connection.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::error::SessionError;
pub use domain::models::{AppEvent, EventSink, OperatingMode, SessionState};
pub use infrastructure::bluetooth::{CommandOrchestrator, RunRequest, RunSummary};
