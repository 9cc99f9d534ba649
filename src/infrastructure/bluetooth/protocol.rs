//! Power Controller Protocol
//!
//! This module contains the protocol definitions for talking to the power
//! control appliance: the fixed GATT identifiers and the text codec used on
//! the control characteristic.
//!
//! # Wire format
//!
//! Reads and notifications carry ASCII text of comma separated `key:value`
//! segments. Only the position of a value matters; keys are discarded.
//!
//! ```text
//! NAME:PWR-7734,DATE:20240101,TIME:120000,EQ:12.5,...
//! ```
//!
//! Writes carry raw bytes decoded from the hex command the exchange service
//! hands out.

use crate::domain::error::{DecodeError, HexError};
use crate::domain::models::{
    NotificationRecord, TelemetryRecord, NOTIFICATION_SLOTS, TELEMETRY_FIELD_COUNT,
};
use tracing::{trace, warn};
use uuid::Uuid;

/// Control service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Control characteristic UUID - read telemetry, write commands, notify status
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Notifications at or below this many characters are partial and ignored.
pub const NOTIFICATION_MIN_LEN: usize = 40;

/// Interpret a characteristic value as protocol text.
pub fn payload_text(bytes: &[u8]) -> Result<&str, DecodeError> {
    if !bytes.is_ascii() {
        return Err(DecodeError::NotAscii);
    }
    std::str::from_utf8(bytes).map_err(|_| DecodeError::NotAscii)
}

/// Decode the 13-field telemetry read.
///
/// The whole record is rejected if the segment count is off or any segment
/// is not exactly one `key:value` pair.
pub fn decode_telemetry(raw: &str) -> Result<TelemetryRecord, DecodeError> {
    let segments: Vec<&str> = raw.split(',').collect();
    if segments.len() != TELEMETRY_FIELD_COUNT {
        return Err(DecodeError::FieldCount {
            expected: TELEMETRY_FIELD_COUNT,
            found: segments.len(),
        });
    }

    let mut fields = Vec::with_capacity(TELEMETRY_FIELD_COUNT);
    for (index, segment) in segments.iter().enumerate() {
        let parts: Vec<&str> = segment.split(':').collect();
        match parts.as_slice() {
            [_key, value] => fields.push((*value).to_string()),
            _ => {
                return Err(DecodeError::FieldFormat {
                    index,
                    segment: (*segment).to_string(),
                })
            }
        }
    }

    Ok(TelemetryRecord::new(raw.to_string(), fields))
}

/// Decode a notification payload.
///
/// Returns `None` for payloads of [`NOTIFICATION_MIN_LEN`] characters or
/// fewer. Segments without a colon keep the default fill. Segments past the
/// last slot are dropped.
pub fn decode_notification(raw: &str) -> Option<NotificationRecord> {
    if raw.len() <= NOTIFICATION_MIN_LEN {
        trace!(len = raw.len(), "Skipping short notification");
        return None;
    }

    let mut record = NotificationRecord::empty();
    let mut segments = 0usize;
    for (index, segment) in raw.split(',').enumerate() {
        segments += 1;
        if index >= NOTIFICATION_SLOTS {
            continue;
        }
        if let Some(value) = segment.split(':').nth(1) {
            record.set(index, value);
        }
    }

    if segments > NOTIFICATION_SLOTS {
        warn!(
            segments,
            slots = NOTIFICATION_SLOTS,
            "Notification has more segments than slots, extra segments dropped"
        );
    }

    Some(record)
}

/// Decode the hex command text into the bytes written to the device.
pub fn encode_command_bytes(hex: &str) -> Result<Vec<u8>, HexError> {
    Ok(hex::decode(hex.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NOTIFICATION_DEFAULT_SLOT;

    const TELEMETRY: &str = "N:PWR-7734,D:20240101,T:120000,EQ:12.5,P:0,V:220.1,I:0.00,\
PF:1.00,A1:0,A2:0,A3:0,A4:0,KS:1";

    fn notification_with_version(version: &str) -> String {
        (0..20)
            .map(|i| {
                if i == 18 {
                    format!("V2:{version}")
                } else {
                    format!("K{i}:{i}")
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CHARACTERISTIC_UUID.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_decode_telemetry_keeps_values_in_order() {
        let record = decode_telemetry(TELEMETRY).unwrap();
        assert_eq!(record.fields().len(), 13);
        assert_eq!(record.fields()[0], "PWR-7734");
        assert_eq!(record.fields()[5], "220.1");
        assert_eq!(record.fields()[12], "1");
        assert_eq!(record.raw(), TELEMETRY);
    }

    #[test]
    fn test_decode_telemetry_rejects_wrong_field_count() {
        let err = decode_telemetry("a:1,b:2").unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldCount {
                expected: 13,
                found: 2
            }
        );

        let fourteen = format!("{TELEMETRY},X:9");
        assert!(matches!(
            decode_telemetry(&fourteen),
            Err(DecodeError::FieldCount { found: 14, .. })
        ));
    }

    #[test]
    fn test_decode_telemetry_rejects_segment_without_colon() {
        let raw = TELEMETRY.replace("P:0", "P0");
        assert_eq!(
            decode_telemetry(&raw).unwrap_err(),
            DecodeError::FieldFormat {
                index: 4,
                segment: "P0".to_string()
            }
        );
    }

    #[test]
    fn test_decode_telemetry_rejects_extra_colon() {
        let raw = TELEMETRY.replace("T:120000", "T:12:00:00");
        assert!(matches!(
            decode_telemetry(&raw),
            Err(DecodeError::FieldFormat { index: 2, .. })
        ));
    }

    #[test]
    fn test_short_notification_is_skipped() {
        assert!(decode_notification("a:1,b:2").is_none());
        assert!(decode_notification(&"x".repeat(40)).is_none());
    }

    #[test]
    fn test_notification_populates_present_slots_only() {
        let raw = notification_with_version("1.4.0");
        let record = decode_notification(&raw).unwrap();
        assert_eq!(record.firmware_version(), "1.4.0");
        assert_eq!(record.slot(18), Some("1.4.0"));
        assert_eq!(record.slot(0), Some("0"));
        assert_eq!(record.slot(19), Some("19"));
        assert_eq!(record.slot(20), Some(NOTIFICATION_DEFAULT_SLOT));
        assert_eq!(record.slot(49), Some(NOTIFICATION_DEFAULT_SLOT));
    }

    #[test]
    fn test_notification_segment_without_colon_keeps_default() {
        let raw = format!("NOCOLON,{}", "K:v,".repeat(12));
        let record = decode_notification(&raw).unwrap();
        assert_eq!(record.slot(0), Some(NOTIFICATION_DEFAULT_SLOT));
        assert_eq!(record.slot(1), Some("v"));
    }

    #[test]
    fn test_notification_overflow_is_truncated() {
        let raw = (0..60)
            .map(|i| format!("K:{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let record = decode_notification(&raw).unwrap();
        assert_eq!(record.slots().len(), 50);
        assert_eq!(record.slot(49), Some("49"));
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(encode_command_bytes("0A1B").unwrap(), vec![0x0A, 0x1B]);
        assert_eq!(encode_command_bytes("1a2b3c\n").unwrap(), vec![0x1A, 0x2B, 0x3C]);
        assert!(encode_command_bytes("0A1").is_err());
        assert!(encode_command_bytes("ZZ").is_err());
    }

    #[test]
    fn test_payload_text_rejects_non_ascii() {
        assert_eq!(payload_text(b"K:v").unwrap(), "K:v");
        assert_eq!(payload_text(&[0xE4, 0xB8, 0xAD]), Err(DecodeError::NotAscii));
    }
}
