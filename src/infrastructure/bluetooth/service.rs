//! Bluetooth Service Module
//!
//! Main service that drives one control run: locate the device, connect,
//! read telemetry (restore mode), trade it for a command, write the command
//! and hold the link open while the device confirms.

use crate::domain::error::SessionError;
use crate::domain::models::{
    AppEvent, DeviceHandle, EventSink, MessageSeverity, NotificationRecord, OperatingMode,
    SessionState, TelemetryRecord,
};
use crate::domain::settings::ConnectionConfig;
use crate::infrastructure::bluetooth::{
    connection::{GattSession, Subscription},
    protocol::{self, CHARACTERISTIC_UUID, SERVICE_UUID},
    scanner::BleScanner,
    transport::{BleCentral, CharacteristicInfo},
};
use crate::infrastructure::exchange::CommandExchange;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub device_name: String,
    pub mode: OperatingMode,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub device: DeviceHandle,
    pub mode: OperatingMode,
    pub bytes_written: usize,
    pub notifications: Vec<NotificationRecord>,
}

/// Sequences locator, session and exchange for one run at a time.
///
/// Every failure ends the run; nothing is retried.
pub struct CommandOrchestrator<C: BleCentral, E: CommandExchange> {
    central: Arc<C>,
    exchange: Arc<E>,
    scanner: BleScanner<C>,
    config: ConnectionConfig,
    events: EventSink,
    state: SessionState,
    uploads: JoinSet<()>,
    upload_grace: Duration,
}

const DEFAULT_UPLOAD_GRACE: Duration = Duration::from_secs(30);

impl<C, E> CommandOrchestrator<C, E>
where
    C: BleCentral + 'static,
    E: CommandExchange + 'static,
{
    pub fn new(central: Arc<C>, exchange: Arc<E>, config: ConnectionConfig, events: EventSink) -> Self {
        Self {
            scanner: BleScanner::new(central.clone(), events.clone()),
            central,
            exchange,
            config,
            events,
            state: SessionState::Idle,
            uploads: JoinSet::new(),
            upload_grace: DEFAULT_UPLOAD_GRACE,
        }
    }

    /// How long a finished run waits for device-info uploads still in flight.
    pub fn with_upload_grace(mut self, grace: Duration) -> Self {
        self.upload_grace = grace;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Run state {} -> {}", self.state, next);
        self.state = next;
        self.events.state(next);
    }

    /// Execute one run. Cancelling `cancel` stops the run at the next
    /// suspension point and closes the link.
    pub async fn run(
        &mut self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SessionError> {
        self.state = SessionState::Idle;
        info!(
            "Starting {} run for device '{}'",
            request.mode, request.device_name
        );

        let result = self.execute(request, cancel).await;
        match &result {
            Ok(summary) => {
                self.transition(SessionState::Closed);
                self.events.progress(100);
                self.events
                    .log("Power started successfully!", MessageSeverity::Success);
                info!(
                    "Run finished: {} bytes written, {} notifications",
                    summary.bytes_written,
                    summary.notifications.len()
                );
                self.events.send(AppEvent::Finished { success: true });
            }
            Err(e) => {
                self.transition(SessionState::Errored);
                self.events.log(
                    format!("{} ({})", e.user_message(), e),
                    MessageSeverity::Error,
                );
                self.events.send(AppEvent::Finished { success: false });
            }
        }
        result
    }

    async fn execute(
        &mut self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SessionError> {
        let name = request.device_name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidDeviceName);
        }

        self.transition(SessionState::Scanning);
        self.events.progress(20);
        let device =
            until_cancelled(cancel, self.scanner.discover(name, self.config.scan_window)).await?;
        self.events.progress(40);

        let mut session = until_cancelled(
            cancel,
            GattSession::open(&*self.central, &device, &self.config, self.events.clone()),
        )
        .await?;
        self.transition(SessionState::Connected);

        let outcome = self
            .drive(&mut session, &device, request.mode, cancel)
            .await;
        session.close().await;

        if matches!(outcome, Err(SessionError::Cancelled)) {
            self.uploads.shutdown().await;
        }
        self.flush_uploads().await;
        outcome
    }

    /// Wait for pending device-info uploads, bounded by the upload grace.
    async fn flush_uploads(&mut self) {
        if self.uploads.is_empty() {
            return;
        }
        let grace = self.upload_grace;
        let uploads = &mut self.uploads;
        let drained = tokio::time::timeout(grace, async {
            while uploads.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} device info uploads still pending after {:?}, abandoning",
                self.uploads.len(),
                grace
            );
            self.uploads.shutdown().await;
        }
    }

    async fn drive(
        &mut self,
        session: &mut GattSession<C::Link>,
        device: &DeviceHandle,
        mode: OperatingMode,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SessionError> {
        let characteristic = until_cancelled(
            cancel,
            session.resolve_characteristic(SERVICE_UUID, CHARACTERISTIC_UUID),
        )
        .await?;

        let command = match mode {
            OperatingMode::Restore => {
                self.transition(SessionState::Reading);
                self.events.info("Reading device information...");
                let telemetry =
                    until_cancelled(cancel, read_telemetry(session, &characteristic)).await?;

                self.events.progress(60);
                self.transition(SessionState::Exchanging);
                self.events.info("Requesting restore command...");
                until_cancelled(
                    cancel,
                    self.exchange.command_for_telemetry(&device.name, &telemetry),
                )
                .await?
            }
            OperatingMode::Initialize => {
                self.events.progress(60);
                self.transition(SessionState::Exchanging);
                self.events.info("Requesting initialization command...");
                until_cancelled(cancel, self.exchange.initialization_command(&device.name))
                    .await?
            }
        };
        let payload = protocol::encode_command_bytes(command.as_str())?;

        self.events.progress(80);
        self.transition(SessionState::Writing);
        self.events.info("Starting power...");
        let mut subscription = until_cancelled(cancel, session.subscribe_notify(&characteristic)).await?;
        until_cancelled(cancel, session.write(&characteristic, &payload)).await?;

        self.transition(SessionState::NotifyWindow);
        let notifications = self.settle(device, &mut subscription, cancel).await?;

        Ok(RunSummary {
            device: device.clone(),
            mode,
            bytes_written: payload.len(),
            notifications,
        })
    }

    /// Hold the link for the settle window, handling notifications as they
    /// arrive. There is no explicit acknowledgement in this protocol.
    async fn settle(
        &mut self,
        device: &DeviceHandle,
        subscription: &mut Subscription,
        cancel: &CancellationToken,
    ) -> Result<Vec<NotificationRecord>, SessionError> {
        let deadline = tokio::time::sleep(self.config.settle_window);
        tokio::pin!(deadline);

        let mut seen = Vec::new();
        let mut stream_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = &mut deadline => break,
                record = subscription.recv(), if stream_open => match record {
                    Some(record) => {
                        self.handle_notification(device, &record);
                        seen.push(record);
                    }
                    None => stream_open = false,
                },
            }
        }
        Ok(seen)
    }

    fn handle_notification(&mut self, device: &DeviceHandle, record: &NotificationRecord) {
        let version = record.firmware_version().to_string();
        self.events.send(AppEvent::Notification(record.clone()));
        self.events.info(format!("Device version: {version}"));

        let exchange = Arc::clone(&self.exchange);
        let name = device.name.clone();
        self.uploads.spawn(async move {
            match exchange.upload_device_info(&name, &version).await {
                Ok(()) => debug!("Uploaded device info for {}", name),
                Err(e) => warn!("Device info upload failed: {}", e),
            }
        });
    }
}

async fn read_telemetry<L>(
    session: &GattSession<L>,
    characteristic: &CharacteristicInfo,
) -> Result<TelemetryRecord, SessionError>
where
    L: crate::infrastructure::bluetooth::transport::GattLink + 'static,
{
    let value = session.read(characteristic).await?;
    let text = protocol::payload_text(&value)?;
    let record = protocol::decode_telemetry(text)?;
    debug!("Telemetry decoded: {} fields", record.fields().len());
    Ok(record)
}

/// Race `fut` against the cancellation token.
async fn until_cancelled<T, Err, F>(cancel: &CancellationToken, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, Err>>,
    Err: Into<SessionError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        out = fut => out.map_err(Into::into),
    }
}
