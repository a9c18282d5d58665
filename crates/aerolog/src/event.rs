//! Telemetry event types for aerolog.
//!
//! This module defines the decoded `Event` record, the `EventBits` bit-set
//! carrying the logger's state flags, and the decoder that validates raw
//! wire records into events.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw record failed validation while being decoded into an [`Event`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The record is not a JSON object.
    #[error("record is not an object")]
    NotAnObject,

    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but carries an unusable value.
    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Named state flags packed into one logger event word.
///
/// The device logger reports state transitions as single bits in a 32-bit
/// word; one event may carry several bits at once (an engine start detected
/// on the same page as the takeoff, for example). Bit 31 is a control flag
/// for the logger's flush-and-link operation and is not a flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventBits(u32);

impl EventBits {
    /// Any engine start condition detected.
    pub const ENGINE_START: Self = Self(1);
    /// Takeoff condition detected.
    pub const TAKEOFF: Self = Self(1 << 1);
    /// Aircraft has landed.
    pub const LANDING: Self = Self(1 << 2);
    /// Last engine stop condition detected.
    pub const ENGINE_STOP: Self = Self(1 << 3);
    /// Aircraft is flying.
    pub const FLYING: Self = Self(1 << 4);
    /// Engine 1 running.
    pub const ENGINE_RUN_1: Self = Self(1 << 5);
    /// Engine 2 running.
    pub const ENGINE_RUN_2: Self = Self(1 << 6);
    /// Alarm condition.
    pub const ALARM: Self = Self(1 << 7);
    /// Flush-and-link control operation (not a flight state).
    pub const FLUSH_AND_LINK: Self = Self(1 << 31);

    /// Named bits, in bit-position order.
    const NAMED: [(Self, &'static str); 9] = [
        (Self::ENGINE_START, "engine-start"),
        (Self::TAKEOFF, "takeoff"),
        (Self::LANDING, "landing"),
        (Self::ENGINE_STOP, "engine-stop"),
        (Self::FLYING, "flying"),
        (Self::ENGINE_RUN_1, "engine-run-1"),
        (Self::ENGINE_RUN_2, "engine-run-2"),
        (Self::ALARM, "alarm"),
        (Self::FLUSH_AND_LINK, "flush-and-link"),
    ];

    /// Build a bit-set from a raw integer. Unknown bits are preserved.
    #[must_use]
    pub const fn from_bits(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check whether all bits in `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Return a copy with the bits in `other` also set.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check whether no bits are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of all set, known bits in bit order.
    #[must_use]
    pub fn active_names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::fmt::Display for EventBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.active_names();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// One immutable telemetry record from a device logger.
///
/// Events are identified per device by a monotonically increasing page
/// address and are never updated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier (assigned by the storage layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// The device this event belongs to.
    pub device_id: i64,

    /// Page address in the device logger; unique and increasing per device.
    pub page_address: i64,

    /// When the event occurred, if the logger recorded a clock time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,

    /// Elapsed logger time on this page, in milliseconds.
    pub total_time_ms: i64,

    /// State flags reported on this page.
    pub bits: EventBits,

    /// Optional free-text message attached by the logger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    /// Format `total_time_ms` as an `H:MM:SS` string.
    #[must_use]
    pub fn format_log_time(&self) -> String {
        let total_seconds = self.total_time_ms / 1000;
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;
        format!("{hours}:{minutes:02}:{seconds:02}")
    }
}

/// A timestamp as it appears on the wire: epoch milliseconds or text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
}

/// The loosely-typed shape of one raw event record from the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawEvent {
    page_address: Option<i64>,
    total_time: Option<i64>,
    bitfield: Option<i64>,
    date_time: Option<WireTimestamp>,
    timestamp: Option<WireTimestamp>,
    message: Option<String>,
}

/// Datetime layouts accepted for textual wire timestamps.
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"];

/// Decode one raw wire record into a validated [`Event`].
///
/// `page_address` and `total_time` are required; `bitfield`, a timestamp
/// (under either the `date_time` or `timestamp` key) and `message` are
/// optional.
///
/// # Errors
///
/// Returns a [`DecodeError`] naming the missing or invalid field. Callers
/// are expected to skip the record and continue the batch.
pub fn decode_record(device_id: i64, raw: &serde_json::Value) -> Result<Event, DecodeError> {
    if !raw.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let record: RawEvent =
        serde_json::from_value(raw.clone()).map_err(|e| DecodeError::InvalidField {
            field: "record",
            reason: e.to_string(),
        })?;

    let page_address = record
        .page_address
        .ok_or(DecodeError::MissingField("page_address"))?;
    if page_address < 0 {
        return Err(DecodeError::InvalidField {
            field: "page_address",
            reason: format!("must be non-negative, got {page_address}"),
        });
    }

    let total_time_ms = record
        .total_time
        .ok_or(DecodeError::MissingField("total_time"))?;
    if total_time_ms < 0 {
        return Err(DecodeError::InvalidField {
            field: "total_time",
            reason: format!("must be non-negative, got {total_time_ms}"),
        });
    }

    let bits = match record.bitfield {
        Some(raw_bits) => {
            let word = u32::try_from(raw_bits).map_err(|_| DecodeError::InvalidField {
                field: "bitfield",
                reason: format!("does not fit a 32-bit word: {raw_bits}"),
            })?;
            EventBits::from_bits(word)
        }
        None => EventBits::default(),
    };

    let timestamp = match record.date_time.or(record.timestamp) {
        Some(wire) => Some(parse_timestamp(&wire)?),
        None => None,
    };

    Ok(Event {
        id: None,
        device_id,
        page_address,
        timestamp,
        total_time_ms,
        bits,
        message: record.message,
    })
}

fn parse_timestamp(wire: &WireTimestamp) -> Result<NaiveDateTime, DecodeError> {
    match wire {
        WireTimestamp::Millis(ms) => chrono::DateTime::from_timestamp_millis(*ms)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| DecodeError::InvalidField {
                field: "date_time",
                reason: format!("epoch milliseconds out of range: {ms}"),
            }),
        WireTimestamp::Text(text) => {
            let trimmed = text.trim().trim_end_matches('Z');
            for format in TIMESTAMP_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                    return Ok(dt);
                }
                // Date-only layouts need the explicit midnight combine
                if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
                    return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default());
                }
            }
            Err(DecodeError::InvalidField {
                field: "date_time",
                reason: format!("unrecognized datetime: {text}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bits_contains() {
        let bits = EventBits::ENGINE_START.with(EventBits::TAKEOFF);
        assert!(bits.contains(EventBits::ENGINE_START));
        assert!(bits.contains(EventBits::TAKEOFF));
        assert!(!bits.contains(EventBits::LANDING));
    }

    #[test]
    fn test_bits_roundtrip_raw() {
        let bits = EventBits::from_bits(0b1001_0110);
        assert_eq!(bits.bits(), 0b1001_0110);
        assert!(bits.contains(EventBits::TAKEOFF));
        assert!(bits.contains(EventBits::LANDING));
        assert!(bits.contains(EventBits::FLYING));
        assert!(bits.contains(EventBits::ALARM));
    }

    #[test]
    fn test_bits_unknown_preserved() {
        // Bit 12 has no name but must survive a decode/store round trip
        let bits = EventBits::from_bits(1 << 12);
        assert_eq!(bits.bits(), 1 << 12);
        assert!(bits.active_names().is_empty());
    }

    #[test]
    fn test_bits_control_flag_is_not_flight_state() {
        let bits = EventBits::FLUSH_AND_LINK;
        assert!(!bits.contains(EventBits::TAKEOFF));
        assert!(!bits.contains(EventBits::LANDING));
        assert_eq!(bits.active_names(), vec!["flush-and-link"]);
    }

    #[test]
    fn test_bits_display() {
        let bits = EventBits::ENGINE_START.with(EventBits::TAKEOFF);
        assert_eq!(bits.to_string(), "engine-start|takeoff");
        assert_eq!(EventBits::default().to_string(), "none");
    }

    #[test]
    fn test_decode_minimal_record() {
        let raw = json!({"page_address": 1000, "total_time": 30000});
        let event = decode_record(1, &raw).unwrap();

        assert_eq!(event.device_id, 1);
        assert_eq!(event.page_address, 1000);
        assert_eq!(event.total_time_ms, 30000);
        assert!(event.bits.is_empty());
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_decode_full_record() {
        let raw = json!({
            "page_address": 1000,
            "total_time": 30000,
            "bitfield": 0b11,
            "date_time": "2025-07-31 12:00:00",
            "message": "engine start"
        });
        let event = decode_record(7, &raw).unwrap();

        assert!(event.bits.contains(EventBits::ENGINE_START));
        assert!(event.bits.contains(EventBits::TAKEOFF));
        assert_eq!(event.message.as_deref(), Some("engine start"));
        let ts = event.timestamp.unwrap();
        assert_eq!(ts.to_string(), "2025-07-31 12:00:00");
    }

    #[test]
    fn test_decode_missing_page_address() {
        let raw = json!({"total_time": 30000});
        let err = decode_record(1, &raw).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("page_address")));
    }

    #[test]
    fn test_decode_missing_total_time() {
        let raw = json!({"page_address": 1000});
        let err = decode_record(1, &raw).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("total_time")));
    }

    #[test]
    fn test_decode_negative_total_time() {
        let raw = json!({"page_address": 1000, "total_time": -5});
        let err = decode_record(1, &raw).unwrap_err();
        assert!(err.to_string().contains("total_time"));
    }

    #[test]
    fn test_decode_not_an_object() {
        let raw = json!([1, 2, 3]);
        assert!(matches!(
            decode_record(1, &raw),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_decode_epoch_millis_timestamp() {
        let raw = json!({
            "page_address": 1,
            "total_time": 0,
            "timestamp": 1_753_963_200_000_i64
        });
        let event = decode_record(1, &raw).unwrap();
        let ts = event.timestamp.unwrap();
        assert_eq!(ts.format("%Y-%m-%d").to_string(), "2025-07-31");
    }

    #[test]
    fn test_decode_iso_t_timestamp() {
        let raw = json!({
            "page_address": 1,
            "total_time": 0,
            "date_time": "2025-07-31T12:15:15Z"
        });
        let event = decode_record(1, &raw).unwrap();
        assert_eq!(event.timestamp.unwrap().to_string(), "2025-07-31 12:15:15");
    }

    #[test]
    fn test_decode_unparseable_timestamp() {
        let raw = json!({
            "page_address": 1,
            "total_time": 0,
            "date_time": "yesterday-ish"
        });
        assert!(decode_record(1, &raw).is_err());
    }

    #[test]
    fn test_format_log_time() {
        let event = Event {
            id: None,
            device_id: 1,
            page_address: 1,
            timestamp: None,
            total_time_ms: 3_725_000,
            bits: EventBits::default(),
            message: None,
        };
        assert_eq!(event.format_log_time(), "1:02:05");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event {
            id: Some(3),
            device_id: 1,
            page_address: 1000,
            timestamp: None,
            total_time_ms: 30000,
            bits: EventBits::TAKEOFF,
            message: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
