//! BLE transport seam.
//!
//! The scanner and session only talk to these traits, so the protocol logic
//! runs the same against `btleplug` and against the in-memory fake used in
//! tests.

use crate::domain::error::TransportError;
use crate::domain::models::DeviceHandle;
use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use futures::stream::Stream;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// Inbound notification values, in arrival order.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Options applied when opening a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Re-run service discovery even if the platform has a cached table.
    pub refresh_services: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            refresh_services: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharPropFlags,
}

impl CharacteristicInfo {
    pub fn can_read(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }

    pub fn can_write_with_response(&self) -> bool {
        self.properties.contains(CharPropFlags::WRITE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// The local radio: scanning and link establishment.
#[async_trait]
pub trait BleCentral: Send + Sync {
    type Link: GattLink + 'static;

    /// Scan for `window` and report every advertisement seen.
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Connect to a previously scanned device.
    async fn connect(
        &self,
        device: &DeviceHandle,
        options: ConnectOptions,
    ) -> Result<Self::Link, TransportError>;
}

/// One connected peripheral. The transport serializes GATT operations.
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<PayloadStream, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
