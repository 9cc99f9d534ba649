//! In-memory transport for exercising the locator, session and orchestrator.

use crate::domain::error::TransportError;
use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::protocol::{CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleCentral, CharacteristicInfo, ConnectOptions, GattLink, PayloadStream,
    ServiceInfo,
};
use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use futures::channel::mpsc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn control_service(properties: CharPropFlags) -> ServiceInfo {
    ServiceInfo {
        uuid: SERVICE_UUID,
        characteristics: vec![CharacteristicInfo {
            uuid: CHARACTERISTIC_UUID,
            service_uuid: SERVICE_UUID,
            properties,
        }],
    }
}

/// Recorded peripheral side of the fake.
pub(crate) struct FakePeripheral {
    pub services: Mutex<Vec<ServiceInfo>>,
    pub read_value: Mutex<Result<Vec<u8>, String>>,
    pub write_error: Mutex<Option<String>>,
    pub notify_on_write: Mutex<Vec<Vec<u8>>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub reads: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub refresh_hints: Mutex<Vec<bool>>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl FakePeripheral {
    fn new() -> Self {
        Self {
            services: Mutex::new(vec![control_service(
                CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::NOTIFY,
            )]),
            read_value: Mutex::new(Ok(Vec::new())),
            write_error: Mutex::new(None),
            notify_on_write: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            refresh_hints: Mutex::new(Vec::new()),
            notify_tx: Mutex::new(None),
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Push a notification as if the device sent it.
    pub fn notify(&self, payload: &[u8]) {
        if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(payload.to_vec());
        }
    }
}

pub(crate) struct FakeCentral {
    adverts: Vec<Advertisement>,
    scan_error: Option<String>,
    connect_delay: Option<Duration>,
    connect_error: Option<String>,
    pub peripheral: Arc<FakePeripheral>,
}

impl FakeCentral {
    pub fn new() -> Self {
        Self {
            adverts: Vec::new(),
            scan_error: None,
            connect_delay: None,
            connect_error: None,
            peripheral: Arc::new(FakePeripheral::new()),
        }
    }

    pub fn with_advertisement(mut self, id: &str, name: Option<&str>) -> Self {
        self.adverts.push(Advertisement {
            id: id.to_string(),
            local_name: name.map(str::to_string),
            rssi: Some(-60),
        });
        self
    }

    pub fn with_adapter_unavailable(mut self) -> Self {
        self.scan_error = Some("radio is off".to_string());
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_connect_error(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    pub fn with_read_value(self, value: &[u8]) -> Self {
        *self.peripheral.read_value.lock().unwrap() = Ok(value.to_vec());
        self
    }

    pub fn with_read_error(self, message: &str) -> Self {
        *self.peripheral.read_value.lock().unwrap() = Err(message.to_string());
        self
    }

    pub fn with_write_error(self, message: &str) -> Self {
        *self.peripheral.write_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_services(self, services: Vec<ServiceInfo>) -> Self {
        *self.peripheral.services.lock().unwrap() = services;
        self
    }

    pub fn with_notification_on_write(self, payload: &str) -> Self {
        self.peripheral
            .notify_on_write
            .lock()
            .unwrap()
            .push(payload.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl BleCentral for FakeCentral {
    type Link = FakeLink;

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        if let Some(message) = &self.scan_error {
            return Err(TransportError::AdapterUnavailable(message.clone()));
        }
        tokio::time::sleep(window).await;
        Ok(self.adverts.clone())
    }

    async fn connect(
        &self,
        device: &DeviceHandle,
        options: ConnectOptions,
    ) -> Result<FakeLink, TransportError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.connect_error {
            return Err(TransportError::Other(message.clone()));
        }
        if !self.adverts.iter().any(|a| a.id == device.id) {
            return Err(TransportError::UnknownPeripheral(device.id.clone()));
        }
        self.peripheral.connects.fetch_add(1, Ordering::SeqCst);
        self.peripheral
            .refresh_hints
            .lock()
            .unwrap()
            .push(options.refresh_services);
        Ok(FakeLink {
            peripheral: self.peripheral.clone(),
        })
    }
}

pub(crate) struct FakeLink {
    peripheral: Arc<FakePeripheral>,
}

#[async_trait]
impl GattLink for FakeLink {
    async fn services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        Ok(self.peripheral.services.lock().unwrap().clone())
    }

    async fn read(&self, _characteristic: &CharacteristicInfo) -> Result<Vec<u8>, TransportError> {
        self.peripheral.reads.fetch_add(1, Ordering::SeqCst);
        self.peripheral
            .read_value
            .lock()
            .unwrap()
            .clone()
            .map_err(TransportError::Other)
    }

    async fn write(
        &self,
        _characteristic: &CharacteristicInfo,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if let Some(message) = self.peripheral.write_error.lock().unwrap().clone() {
            return Err(TransportError::Other(message));
        }
        self.peripheral.writes.lock().unwrap().push(payload.to_vec());
        let pending = self.peripheral.notify_on_write.lock().unwrap().clone();
        for payload in pending {
            self.peripheral.notify(&payload);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _characteristic: &CharacteristicInfo,
    ) -> Result<PayloadStream, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        *self.peripheral.notify_tx.lock().unwrap() = Some(tx);
        Ok(Box::pin(rx))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnects.fetch_add(1, Ordering::SeqCst);
        self.peripheral.notify_tx.lock().unwrap().take();
        Ok(())
    }
}
