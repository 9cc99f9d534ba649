//! Bluetooth Module
//!
//! Provides BLE communication with the power appliance.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  CommandOrchestrator                     │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - BLE     │  │ - GATT     │  │ - UUIDs  │
//! │ discovery │  │   session  │  │ - Codec  │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       └──────┬───────┘
//!              ▼
//!       ┌─────────────┐
//!       │  Transport  │  BleCentral / GattLink, backed by btleplug
//!       └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and the telemetry/notification codec
//! - [`transport`] - Radio abstraction the rest of the module is written against
//! - [`btleplug_backend`] - Transport implementation on the host Bluetooth stack
//! - [`scanner`] - BLE device discovery by name
//! - [`connection`] - Single GATT session: read, write, notifications, teardown
//! - [`service`] - Run coordinator

pub mod btleplug_backend;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

// Re-export main service for convenience
pub use service::{CommandOrchestrator, RunRequest, RunSummary};
