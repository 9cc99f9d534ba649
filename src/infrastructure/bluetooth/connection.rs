//! BLE Connection Module
//!
//! Owns one connection to the appliance: connect with timeout, GATT lookup,
//! capability-checked read, write, notification subscription and teardown.

use crate::domain::error::SessionError;
use crate::domain::models::{DeviceHandle, EventSink, NotificationRecord};
use crate::domain::settings::ConnectionConfig;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    BleCentral, CharacteristicInfo, ConnectOptions, GattLink, PayloadStream,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Decoded notifications for the lifetime of a session.
pub struct Subscription {
    records: mpsc::UnboundedReceiver<NotificationRecord>,
}

impl Subscription {
    /// Next decoded record, or `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<NotificationRecord> {
        self.records.recv().await
    }
}

/// A single GATT connection.
pub struct GattSession<L: GattLink> {
    device: DeviceHandle,
    link: Option<L>,
    events: EventSink,
    notify_task: Option<JoinHandle<()>>,
}

impl<L: GattLink + 'static> GattSession<L> {
    /// Connect to `device`, bounded by `config.connect_timeout`.
    pub async fn open<C>(
        central: &C,
        device: &DeviceHandle,
        config: &ConnectionConfig,
        events: EventSink,
    ) -> Result<Self, SessionError>
    where
        C: BleCentral<Link = L>,
    {
        info!("Connecting to Bluetooth device: {}", device.id);
        events.info("Connecting to device...");

        let options = ConnectOptions {
            refresh_services: config.refresh_services,
        };
        let link = match tokio::time::timeout(
            config.connect_timeout,
            central.connect(device, options),
        )
        .await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(SessionError::Connect(e.to_string())),
            Err(_) => {
                return Err(SessionError::Connect(format!(
                    "timed out after {:?}",
                    config.connect_timeout
                )))
            }
        };

        info!("Device connected: {}", device.name);
        Ok(Self {
            device: device.clone(),
            link: Some(link),
            events,
            notify_task: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn link(&self) -> Result<&L, SessionError> {
        self.link.as_ref().ok_or(SessionError::Closed)
    }

    /// Find `characteristic` inside `service` on the connected device.
    pub async fn resolve_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicInfo, SessionError> {
        let services = self
            .link()?
            .services()
            .await
            .map_err(|e| SessionError::Connect(format!("service discovery failed: {e}")))?;

        let target = services
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or(SessionError::ServiceNotFound(service))?;
        debug!(
            "Found service {} with {} characteristics",
            service,
            target.characteristics.len()
        );

        target
            .characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(SessionError::CharacteristicNotFound(characteristic))
    }

    /// Read the characteristic value. Refuses up front if the characteristic
    /// does not advertise read support.
    pub async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>, SessionError> {
        let link = self.link()?;
        if !characteristic.can_read() {
            return Err(SessionError::NotReadable(characteristic.uuid));
        }
        let value = link
            .read(characteristic)
            .await
            .map_err(|e| SessionError::Read(e.to_string()))?;
        debug!("Read {} bytes from {}", value.len(), characteristic.uuid);
        Ok(value)
    }

    /// Write a command. The confirmation only arrives as a notification, so
    /// the subscription has to be in place first.
    pub async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        let link = self.link()?;
        if self.notify_task.is_none() {
            return Err(SessionError::SubscriptionInactive);
        }
        link.write(characteristic, payload)
            .await
            .map_err(|e| SessionError::Write(e.to_string()))?;
        info!("Wrote {} bytes to {}", payload.len(), characteristic.uuid);
        Ok(())
    }

    /// Enable notifications and start decoding them in the background.
    ///
    /// Malformed payloads are logged and dropped; they never end the session.
    pub async fn subscribe_notify(
        &mut self,
        characteristic: &CharacteristicInfo,
    ) -> Result<Subscription, SessionError> {
        let stream = self
            .link()?
            .subscribe(characteristic)
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.notify_task.take() {
            previous.abort();
        }
        self.notify_task = Some(tokio::spawn(pump_notifications(
            stream,
            tx,
            self.events.clone(),
        )));
        info!("Notifications enabled on {}", characteristic.uuid);

        Ok(Subscription { records: rx })
    }

    /// Release the connection. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        let Some(link) = self.link.take() else {
            trace!("Session already closed");
            return;
        };
        if let Err(e) = link.disconnect().await {
            warn!("Disconnect from {} failed: {}", self.device.id, e);
        }
        info!("Disconnected from device");
        self.events.info("Disconnected from device");
    }
}

impl<L: GattLink> Drop for GattSession<L> {
    fn drop(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if self.link.is_some() {
            warn!("Session for {} dropped without close()", self.device.id);
        }
    }
}

async fn pump_notifications(
    mut stream: PayloadStream,
    records: mpsc::UnboundedSender<NotificationRecord>,
    events: EventSink,
) {
    while let Some(payload) = stream.next().await {
        let text = match protocol::payload_text(&payload) {
            Ok(text) => text,
            Err(e) => {
                events.warn(format!("Failed to parse device notification: {e}"));
                continue;
            }
        };
        match protocol::decode_notification(text) {
            Some(record) => {
                if records.send(record).is_err() {
                    break;
                }
            }
            None => trace!("Ignoring short notification ({} bytes)", payload.len()),
        }
    }
    debug!("Notification stream ended");
}
