use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Number of `key:value` fields in a telemetry read.
pub const TELEMETRY_FIELD_COUNT: usize = 13;

/// Number of positional slots in a decoded notification.
pub const NOTIFICATION_SLOTS: usize = 50;

/// Fill value for notification slots the payload did not reach.
pub const NOTIFICATION_DEFAULT_SLOT: &str = "0000000000";

const SLOT_DEVICE_NAME: usize = 0;
const SLOT_FIRMWARE_TITLE: usize = 17;
const SLOT_FIRMWARE_VERSION: usize = 18;

/// A peripheral found by a discovery scan.
///
/// `id` is the transport-level identifier (address on most platforms), `name`
/// the advertised name that matched. Discarded when the run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub name: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Device status read from the control characteristic.
///
/// Always exactly [`TELEMETRY_FIELD_COUNT`] values; only built by
/// [`decode_telemetry`](crate::infrastructure::bluetooth::protocol::decode_telemetry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    raw: String,
    fields: Vec<String>,
}

impl TelemetryRecord {
    pub(crate) fn new(raw: String, fields: Vec<String>) -> Self {
        debug_assert_eq!(fields.len(), TELEMETRY_FIELD_COUNT);
        Self { raw, fields }
    }

    /// The text exactly as read from the device.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Values in wire order, keys discarded.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Positional view of one notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    slots: Vec<String>,
}

impl NotificationRecord {
    pub(crate) fn empty() -> Self {
        Self {
            slots: vec![NOTIFICATION_DEFAULT_SLOT.to_string(); NOTIFICATION_SLOTS],
        }
    }

    pub(crate) fn set(&mut self, index: usize, value: &str) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = value.to_string();
        }
    }

    pub fn slot(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(String::as_str)
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn device_name(&self) -> &str {
        &self.slots[SLOT_DEVICE_NAME]
    }

    pub fn firmware_title(&self) -> &str {
        &self.slots[SLOT_FIRMWARE_TITLE]
    }

    pub fn firmware_version(&self) -> &str {
        &self.slots[SLOT_FIRMWARE_VERSION]
    }
}

/// Hex command text handed out by the exchange service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBlob(String);

impl CommandBlob {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which workflow a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// Read telemetry, trade it for a restore command, write it back.
    #[default]
    Restore,
    /// First-time setup; no telemetry read.
    Initialize,
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "1" | "restore" => Ok(Self::Restore),
            "2" | "init" | "initialize" => Ok(Self::Initialize),
            other => Err(format!(
                "unknown mode '{other}' (expected restore/1 or initialize/2)"
            )),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restore => f.write_str("restore"),
            Self::Initialize => f.write_str("initialize"),
        }
    }
}

/// Run state. `Closed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connected,
    Reading,
    Exchanging,
    Writing,
    NotifyWindow,
    Closed,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connected => "connected",
            Self::Reading => "reading",
            Self::Exchanging => "exchanging",
            Self::Writing => "writing",
            Self::NotifyWindow => "notify-window",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Everything the presentation layer gets to see.
#[derive(Debug, Clone)]
pub enum AppEvent {
    LogMessage(StatusMessage),
    Progress(u8),
    StateChanged(SessionState),
    DeviceFound(DeviceHandle),
    Notification(NotificationRecord),
    Finished { success: bool },
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Sending half of the observer stream.
///
/// A dropped receiver is not an error: the run carries on without an
/// audience.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<AppEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { sender }
    }

    /// Sink plus the receiver the presentation layer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: AppEvent) {
        let _ = self.sender.send(event);
    }

    pub fn log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let message = message.into();
        match severity {
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", message),
            MessageSeverity::Warning => warn!("{}", message),
            MessageSeverity::Error => error!("{}", message),
        }
        self.send(AppEvent::LogMessage(StatusMessage { message, severity }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(message, MessageSeverity::Info);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(message, MessageSeverity::Warning);
    }

    pub fn progress(&self, percent: u8) {
        self.send(AppEvent::Progress(percent.min(100)));
    }

    pub fn state(&self, state: SessionState) {
        self.send(AppEvent::StateChanged(state));
    }
}
