//! BLE Scanner Module
//!
//! Finds the appliance by its advertised name. One scan per call; retry
//! policy belongs to the caller.

use crate::domain::error::{SessionError, TransportError};
use crate::domain::models::{AppEvent, DeviceHandle, EventSink};
use crate::infrastructure::bluetooth::transport::BleCentral;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// BLE Scanner for locating a named device
pub struct BleScanner<C: BleCentral> {
    central: Arc<C>,
    events: EventSink,
}

impl<C: BleCentral> BleScanner<C> {
    /// Create a new scanner
    pub fn new(central: Arc<C>, events: EventSink) -> Self {
        Self { central, events }
    }

    /// Scan for `scan_window` and return the first device whose advertised
    /// name equals `target_name` exactly.
    pub async fn discover(
        &self,
        target_name: &str,
        scan_window: Duration,
    ) -> Result<DeviceHandle, SessionError> {
        info!(
            "Starting BLE scan for '{}' ({:?} window)",
            target_name, scan_window
        );
        self.events.info("Searching for Bluetooth device...");

        let adverts = self
            .central
            .scan(scan_window)
            .await
            .map_err(|e| match e {
                TransportError::AdapterUnavailable(reason) => {
                    SessionError::AdapterUnavailable(reason)
                }
                other => SessionError::AdapterUnavailable(other.to_string()),
            })?;
        debug!("Scan observed {} advertisements", adverts.len());

        let found = adverts
            .into_iter()
            .find(|adv| adv.local_name.as_deref() == Some(target_name))
            .map(|adv| (DeviceHandle::new(adv.id, target_name), adv.rssi));

        match found {
            Some((device, rssi)) => {
                info!(
                    "Found device '{}' at {} (rssi {:?})",
                    device.name, device.id, rssi
                );
                self.events.info(format!("Found device: {}", device.name));
                self.events.send(AppEvent::DeviceFound(device.clone()));
                Ok(device)
            }
            None => {
                debug!("No advertisement named '{}'", target_name);
                Err(SessionError::NotFound {
                    name: target_name.to_string(),
                })
            }
        }
    }
}
