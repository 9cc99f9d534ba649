//! Error taxonomy for a control run.
//!
//! Transport and HTTP faults are normalized into [`SessionError`] at each
//! operation boundary; the observer only ever sees these variants.

use thiserror::Error;
use uuid::Uuid;

/// Telemetry or notification text that does not follow the `key:value` layout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {index} is not a key:value pair: {segment:?}")]
    FieldFormat { index: usize, segment: String },

    #[error("payload is not ASCII text")]
    NotAscii,
}

/// Command text that is not an even-length hex string.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid command hex: {0}")]
pub struct HexError(#[from] pub hex::FromHexError);

/// Raw fault from the BLE stack, before normalization.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no usable Bluetooth adapter: {0}")]
    AdapterUnavailable(String),

    #[error("peripheral {0} is no longer known to the adapter")]
    UnknownPeripheral(String),

    #[error("characteristic {0} disappeared from the peripheral")]
    MissingCharacteristic(Uuid),

    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure reported by the remote exchange service.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("caller is not authorized")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("service returned an empty command")]
    EmptyCommand,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Terminal outcome of a failed run.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device name must not be empty")]
    InvalidDeviceName,

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("device '{name}' not found")]
    NotFound { name: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("characteristic {0} does not support read")]
    NotReadable(Uuid),

    #[error("telemetry read failed: {0}")]
    Read(String),

    #[error("telemetry decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Hex(#[from] HexError),

    #[error("exchange rejected the request: not authorized")]
    ExchangeUnauthorized,

    #[error("exchange rejected the request: rate limited")]
    ExchangeRateLimited,

    #[error("exchange failed: {0}")]
    ExchangeFailure(String),

    #[error("notification subscribe failed: {0}")]
    Subscribe(String),

    #[error("notification subscription must be active before writing")]
    SubscriptionInactive,

    #[error("write failed: {0}")]
    Write(String),

    #[error("session is closed")]
    Closed,

    #[error("run cancelled")]
    Cancelled,
}

impl SessionError {
    /// Remedial text for the person operating the tool.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidDeviceName => "Device name cannot be empty.",
            Self::AdapterUnavailable(_) => "Bluetooth is unavailable, please enable Bluetooth and retry.",
            Self::NotFound { .. } => "Device not found, make sure it is powered and in range.",
            Self::Connect(_) | Self::Closed => "Could not connect to the device, please retry.",
            Self::ServiceNotFound(_) | Self::CharacteristicNotFound(_) => {
                "The device does not expose the control service."
            }
            Self::NotReadable(_) | Self::Read(_) | Self::Decode(_) => {
                "Failed to read device information, please retry."
            }
            Self::Hex(_) => "The service returned an invalid command.",
            Self::ExchangeUnauthorized => {
                "You are not a subscribed user, please contact the administrator."
            }
            Self::ExchangeRateLimited => {
                "Too many requests, please contact the administrator."
            }
            Self::ExchangeFailure(_) => "Failed to fetch command data.",
            Self::Subscribe(_) | Self::SubscriptionInactive | Self::Write(_) => {
                "Error while writing to the device, please retry."
            }
            Self::Cancelled => "Operation stopped.",
        }
    }
}

impl From<ExchangeError> for SessionError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Unauthorized => Self::ExchangeUnauthorized,
            ExchangeError::RateLimited => Self::ExchangeRateLimited,
            other => Self::ExchangeFailure(other.to_string()),
        }
    }
}

/// Startup configuration problems; fatal for the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no exchange service base URL configured (set API_BASE_URL or HOST_IP/HOST_PORT at build time, or api_base_url in settings)")]
    MissingBaseUrl,

    #[error("invalid exchange service base URL '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
}
