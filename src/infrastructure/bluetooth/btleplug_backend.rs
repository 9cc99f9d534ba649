//! `btleplug` implementation of the transport seam.

use crate::domain::error::TransportError;
use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleCentral, CharacteristicInfo, ConnectOptions, GattLink, PayloadStream,
    ServiceInfo,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// The first Bluetooth adapter on the host.
///
/// The adapter is opened on first use so that a missing or disabled radio
/// surfaces from the scan rather than at construction.
pub struct BtleplugCentral {
    adapter: OnceCell<Adapter>,
    known: Mutex<HashMap<String, Peripheral>>,
}

impl BtleplugCentral {
    pub fn new() -> Self {
        Self {
            adapter: OnceCell::new(),
            known: Mutex::new(HashMap::new()),
        }
    }

    async fn adapter(&self) -> Result<&Adapter, TransportError> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new()
                    .await
                    .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
                let adapters = manager
                    .adapters()
                    .await
                    .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
                let adapter = adapters.into_iter().next().ok_or_else(|| {
                    TransportError::AdapterUnavailable("no Bluetooth adapter found".to_string())
                })?;
                if let Ok(info) = adapter.adapter_info().await {
                    info!("Using Bluetooth adapter: {}", info);
                }
                Ok(adapter)
            })
            .await
    }

    fn remember(&self, id: String, peripheral: Peripheral) -> Result<(), TransportError> {
        let mut known = self
            .known
            .lock()
            .map_err(|_| TransportError::Other("peripheral cache lock poisoned".to_string()))?;
        known.insert(id, peripheral);
        Ok(())
    }

    async fn collect_advertisements(
        &self,
        adapter: &Adapter,
    ) -> Result<Vec<Advertisement>, TransportError> {
        let peripherals = adapter.peripherals().await?;
        let mut seen = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let id = peripheral.id().to_string();
            seen.push(Advertisement {
                id: id.clone(),
                local_name: props.local_name,
                rssi: props.rssi,
            });
            self.remember(id, peripheral)?;
        }
        Ok(seen)
    }

    fn lookup(&self, id: &str) -> Result<Option<Peripheral>, TransportError> {
        let known = self
            .known
            .lock()
            .map_err(|_| TransportError::Other("peripheral cache lock poisoned".to_string()))?;
        Ok(known.get(id).cloned())
    }
}

impl Default for BtleplugCentral {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    type Link = BtleplugLink;

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let adapter = self.adapter().await?;
        let seen = bracket_scan(
            async {
                adapter
                    .start_scan(ScanFilter::default())
                    .await
                    .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))
            },
            async {
                tokio::time::sleep(window).await;
                self.collect_advertisements(adapter).await
            },
            async { adapter.stop_scan().await.map_err(TransportError::from) },
        )
        .await?;
        debug!("Scan finished with {} peripherals", seen.len());
        Ok(seen)
    }

    async fn connect(
        &self,
        device: &DeviceHandle,
        options: ConnectOptions,
    ) -> Result<BtleplugLink, TransportError> {
        let peripheral = match self.lookup(&device.id)? {
            Some(p) => p,
            None => {
                let adapter = self.adapter().await?;
                adapter
                    .peripherals()
                    .await?
                    .into_iter()
                    .find(|p| p.id().to_string() == device.id)
                    .ok_or_else(|| TransportError::UnknownPeripheral(device.id.clone()))?
            }
        };

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        if options.refresh_services || peripheral.services().is_empty() {
            debug!("Running fresh service discovery on {}", device.id);
            peripheral.discover_services().await?;
        }

        Ok(BtleplugLink { peripheral })
    }
}

/// Run `collect` inside a scan. Once `start` succeeds, `stop` runs whatever
/// `collect` returns.
async fn bracket_scan<T>(
    start: impl Future<Output = Result<(), TransportError>>,
    collect: impl Future<Output = Result<T, TransportError>>,
    stop: impl Future<Output = Result<(), TransportError>>,
) -> Result<T, TransportError> {
    start.await?;
    let collected = collect.await;
    if let Err(e) = stop.await {
        debug!("Failed to stop scan cleanly: {}", e);
    }
    collected
}

/// A connected `btleplug` peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
}

impl BtleplugLink {
    fn characteristic(&self, info: &CharacteristicInfo) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == info.uuid && c.service_uuid == info.service_uuid)
            .ok_or(TransportError::MissingCharacteristic(info.uuid))
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicInfo {
                        uuid: c.uuid,
                        service_uuid: c.service_uuid,
                        properties: c.properties,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>, TransportError> {
        let c = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&c).await?)
    }

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        let write_type = if characteristic.can_write_with_response() {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        Ok(self.peripheral.write(&c, payload, write_type).await?)
    }

    async fn subscribe(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<PayloadStream, TransportError> {
        let c = self.characteristic(characteristic)?;
        // Take the stream before enabling notify so nothing is lost in between.
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&c).await?;

        let uuid = c.uuid;
        let values = notifications
            .filter_map(move |n| async move { (n.uuid == uuid).then_some(n.value) });
        Ok(Box::pin(values))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
