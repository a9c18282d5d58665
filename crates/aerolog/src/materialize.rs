//! Logbook entry materialization.
//!
//! This module converts reconstructed flight segments into `LogbookEntry`
//! records, computing the flight duration with midnight-crossover
//! correction. It also carries the legacy payload path for gateways that
//! still answer with whole flight records instead of event pages.
//!
//! Entries are not bound to an individual pilot identity; mapping a pilot
//! name to a user account is resolved downstream.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconstruct::FlightSegment;

/// A flight segment or legacy record could not be materialized.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The takeoff event carries no timestamp to date the flight.
    #[error("takeoff event at page {page_address} has no timestamp")]
    MissingTimestamp {
        /// Page address of the takeoff event.
        page_address: i64,
    },

    /// A date string could not be parsed.
    #[error("unable to parse date: {0}")]
    InvalidDate(String),

    /// A clock time string could not be parsed.
    #[error("unable to parse time: {0}")]
    InvalidTime(String),

    /// The record describes a non-positive flight duration.
    #[error("invalid flight duration: {reason}")]
    InvalidDuration {
        /// Why the duration was rejected.
        reason: String,
    },
}

/// A materialized flight record.
///
/// Deduplicated on `(device_id, date, takeoff_time, landing_time)`; visible
/// to all viewers of the device rather than owned by one pilot, so flights
/// stay visible regardless of whether the pilot has a mapped account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogbookEntry {
    /// Unique identifier (assigned by the storage layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// The device this flight was recorded on.
    pub device_id: i64,

    /// Calendar date of the takeoff.
    pub date: NaiveDate,

    /// Takeoff clock time.
    pub takeoff_time: NaiveTime,

    /// Landing clock time (next day's clock for midnight crossovers).
    pub landing_time: NaiveTime,

    /// Flight duration in minutes.
    pub duration_minutes: i64,

    /// Aircraft registration, when the payload carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_registration: Option<String>,

    /// Departure airport code, when the payload carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_airport: Option<String>,

    /// Arrival airport code, when the payload carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_airport: Option<String>,

    /// Free-text remarks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// A whole flight record as sent by older gateway payloads.
///
/// Kept for backward compatibility: some devices answer the sync RPC with
/// finished flight records instead of event pages.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRecord {
    /// Flight date, in one of several accepted formats.
    pub date: String,
    /// Aircraft registration.
    pub aircraft_registration: Option<String>,
    /// Departure airport code.
    pub departure_airport: Option<String>,
    /// Arrival airport code.
    pub arrival_airport: Option<String>,
    /// Takeoff clock time string.
    pub takeoff_time: Option<String>,
    /// Landing clock time string.
    pub landing_time: Option<String>,
    /// Total flight time in decimal hours, for records without clock times.
    pub flight_time: Option<f64>,
    /// Free-text remarks.
    pub remarks: Option<String>,
}

/// Date layouts accepted for legacy records.
const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Clock layouts accepted for legacy records.
const TIME_FORMATS: [&str; 8] = [
    "%H:%M:%S",
    "%H:%M",
    "%H.%M.%S",
    "%H.%M",
    "%I:%M:%S %p",
    "%I:%M %p",
    "%I:%M:%S%p",
    "%I:%M%p",
];

/// Seconds in one day, for midnight-crossover arithmetic.
const DAY_SECONDS: i64 = 24 * 60 * 60;

/// Materialize a reconstructed segment into a logbook entry.
///
/// The entry is dated from the takeoff event's timestamp. The duration is
/// `landing - takeoff` on the clock; a negative difference means the flight
/// crossed midnight and gets 24 hours added.
///
/// # Errors
///
/// Returns an error if the takeoff event has no timestamp or the derived
/// duration is not positive.
pub fn materialize(segment: &FlightSegment) -> Result<LogbookEntry, MaterializeError> {
    let takeoff_at = segment
        .takeoff
        .timestamp
        .ok_or(MaterializeError::MissingTimestamp {
            page_address: segment.takeoff.page_address,
        })?;

    let landing_time = match segment.landing.timestamp {
        Some(at) => at.time(),
        // Legacy compatibility: older logger firmware omits the landing
        // clock; derive it from the takeoff clock plus the logger's
        // elapsed-time delta.
        None => derive_landing_time(takeoff_at, &segment.takeoff, &segment.landing)?,
    };

    let entry = build_entry(
        segment.takeoff.device_id,
        takeoff_at.date(),
        takeoff_at.time(),
        landing_time,
    )?;
    Ok(entry)
}

/// Materialize a legacy flight record.
///
/// Records carrying discrete takeoff/landing clock strings use those;
/// records carrying only a decimal-hours `flight_time` assume the
/// configured `default_takeoff` clock and land after the given duration.
///
/// # Errors
///
/// Returns an error on unparseable dates or times, or a non-positive
/// duration.
pub fn materialize_legacy(
    record: &LegacyRecord,
    device_id: i64,
    default_takeoff: NaiveTime,
) -> Result<LogbookEntry, MaterializeError> {
    let date = parse_date(&record.date)?;

    let mut entry = match (&record.takeoff_time, &record.landing_time) {
        (Some(takeoff), Some(landing)) => {
            build_entry(device_id, date, parse_clock(takeoff)?, parse_clock(landing)?)?
        }
        _ => {
            // Legacy compatibility: duration-only records predate discrete
            // takeoff/landing clocks in the payload.
            let hours = record
                .flight_time
                .ok_or_else(|| MaterializeError::InvalidDuration {
                    reason: "record has neither clock times nor flight_time".to_string(),
                })?;
            if !hours.is_finite() || hours <= 0.0 {
                return Err(MaterializeError::InvalidDuration {
                    reason: format!("flight_time must be positive, got {hours}"),
                });
            }

            #[allow(clippy::cast_possible_truncation)]
            let minutes = (hours * 60.0).round() as i64;
            let landing_secs =
                (i64::from(default_takeoff.num_seconds_from_midnight()) + minutes * 60)
                    % DAY_SECONDS;
            let landing = seconds_to_time(landing_secs)?;

            LogbookEntry {
                id: None,
                device_id,
                date,
                takeoff_time: default_takeoff,
                landing_time: landing,
                duration_minutes: minutes,
                aircraft_registration: None,
                departure_airport: None,
                arrival_airport: None,
                remarks: None,
            }
        }
    };

    entry.aircraft_registration = record.aircraft_registration.clone();
    entry.departure_airport = record.departure_airport.clone();
    entry.arrival_airport = record.arrival_airport.clone();
    entry.remarks = record.remarks.clone();
    Ok(entry)
}

/// Check whether a raw fetched record has the legacy flight-record shape.
#[must_use]
pub fn is_legacy_record(raw: &serde_json::Value) -> bool {
    raw.get("date").is_some()
}

fn build_entry(
    device_id: i64,
    date: NaiveDate,
    takeoff_time: NaiveTime,
    landing_time: NaiveTime,
) -> Result<LogbookEntry, MaterializeError> {
    let duration_minutes = clock_duration_minutes(takeoff_time, landing_time)?;
    Ok(LogbookEntry {
        id: None,
        device_id,
        date,
        takeoff_time,
        landing_time,
        duration_minutes,
        aircraft_registration: None,
        departure_airport: None,
        arrival_airport: None,
        remarks: None,
    })
}

/// Clock-time duration in minutes, wrapping flights that cross midnight.
fn clock_duration_minutes(
    takeoff: NaiveTime,
    landing: NaiveTime,
) -> Result<i64, MaterializeError> {
    let mut seconds = i64::from(landing.num_seconds_from_midnight())
        - i64::from(takeoff.num_seconds_from_midnight());
    if seconds < 0 {
        // Midnight crossover: the landing is on the following day's clock
        seconds += DAY_SECONDS;
    }
    if seconds == 0 {
        return Err(MaterializeError::InvalidDuration {
            reason: "takeoff and landing clock times are equal".to_string(),
        });
    }
    Ok(seconds / 60)
}

/// Landing clock derived from the takeoff clock and logger elapsed time.
fn derive_landing_time(
    takeoff_at: NaiveDateTime,
    takeoff: &crate::event::Event,
    landing: &crate::event::Event,
) -> Result<NaiveTime, MaterializeError> {
    let delta_ms = landing.total_time_ms - takeoff.total_time_ms;
    if delta_ms <= 0 {
        return Err(MaterializeError::InvalidDuration {
            reason: format!("logger elapsed-time delta is not positive: {delta_ms}ms"),
        });
    }

    let seconds = (i64::from(takeoff_at.time().num_seconds_from_midnight()) + delta_ms / 1000)
        % DAY_SECONDS;
    seconds_to_time(seconds)
}

fn seconds_to_time(seconds: i64) -> Result<NaiveTime, MaterializeError> {
    let secs = u32::try_from(seconds.rem_euclid(DAY_SECONDS))
        .map_err(|_| MaterializeError::InvalidTime(format!("{seconds} seconds")))?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
        .ok_or_else(|| MaterializeError::InvalidTime(format!("{seconds} seconds")))
}

/// Parse a legacy date string, trying the accepted layouts in order.
pub(crate) fn parse_date(text: &str) -> Result<NaiveDate, MaterializeError> {
    let trimmed = text.trim().trim_end_matches('Z');
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt.date());
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date);
        }
    }
    Err(MaterializeError::InvalidDate(text.to_string()))
}

/// Parse a legacy clock string, trying the accepted layouts in order.
pub(crate) fn parse_clock(text: &str) -> Result<NaiveTime, MaterializeError> {
    let trimmed = text.trim();
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, format) {
            return Ok(time);
        }
    }
    Err(MaterializeError::InvalidTime(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventBits};

    fn event_at(page: i64, timestamp: Option<&str>, total_time_ms: i64) -> Event {
        Event {
            id: None,
            device_id: 1,
            page_address: page,
            timestamp: timestamp
                .map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()),
            total_time_ms,
            bits: EventBits::default(),
            message: None,
        }
    }

    fn segment(takeoff: Event, landing: Event) -> FlightSegment {
        FlightSegment { takeoff, landing }
    }

    #[test]
    fn test_materialize_simple_flight() {
        let seg = segment(
            event_at(1000, Some("2025-07-31 12:00:00"), 0),
            event_at(1002, Some("2025-07-31 13:30:00"), 0),
        );

        let entry = materialize(&seg).unwrap();
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 7, 31).unwrap());
        assert_eq!(entry.takeoff_time, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(entry.landing_time, NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        assert_eq!(entry.duration_minutes, 90);
    }

    #[test]
    fn test_materialize_midnight_crossover() {
        // Takeoff 23:50, landing 00:10 next day: 20 minutes, not negative
        let seg = segment(
            event_at(1000, Some("2025-07-31 23:50:00"), 0),
            event_at(1002, Some("2025-08-01 00:10:00"), 0),
        );

        let entry = materialize(&seg).unwrap();
        assert_eq!(entry.duration_minutes, 20);
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 7, 31).unwrap());
    }

    #[test]
    fn test_materialize_missing_takeoff_timestamp() {
        let seg = segment(
            event_at(1000, None, 0),
            event_at(1002, Some("2025-07-31 13:30:00"), 0),
        );

        let err = materialize(&seg).unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::MissingTimestamp { page_address: 1000 }
        ));
    }

    #[test]
    fn test_materialize_missing_landing_clock_uses_logger_delta() {
        // 45 minutes of logger time between the takeoff and landing pages
        let seg = segment(
            event_at(1000, Some("2025-07-31 12:00:00"), 600_000),
            event_at(1002, None, 3_300_000),
        );

        let entry = materialize(&seg).unwrap();
        assert_eq!(entry.landing_time, NaiveTime::from_hms_opt(12, 45, 0).unwrap());
        assert_eq!(entry.duration_minutes, 45);
    }

    #[test]
    fn test_materialize_zero_duration_rejected() {
        let seg = segment(
            event_at(1000, Some("2025-07-31 12:00:00"), 0),
            event_at(1002, Some("2025-07-31 12:00:00"), 0),
        );

        assert!(matches!(
            materialize(&seg),
            Err(MaterializeError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_legacy_clock_times() {
        let record = LegacyRecord {
            date: "2025-07-24".to_string(),
            aircraft_registration: Some("OH-CPT".to_string()),
            departure_airport: Some("EFHK".to_string()),
            arrival_airport: Some("EFTU".to_string()),
            takeoff_time: Some("09:15".to_string()),
            landing_time: Some("10:45:30".to_string()),
            flight_time: None,
            remarks: None,
        };

        let entry =
            materialize_legacy(&record, 1, NaiveTime::from_hms_opt(10, 0, 0).unwrap()).unwrap();
        assert_eq!(entry.takeoff_time, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(entry.landing_time, NaiveTime::from_hms_opt(10, 45, 30).unwrap());
        assert_eq!(entry.duration_minutes, 90);
        assert_eq!(entry.aircraft_registration.as_deref(), Some("OH-CPT"));
        assert_eq!(entry.departure_airport.as_deref(), Some("EFHK"));
    }

    #[test]
    fn test_legacy_duration_only() {
        // flight_time = 1.5 hours and no clock times: 90 minutes starting
        // at the configured default takeoff time
        let record = LegacyRecord {
            date: "24.07.2025".to_string(),
            aircraft_registration: None,
            departure_airport: None,
            arrival_airport: None,
            takeoff_time: None,
            landing_time: None,
            flight_time: Some(1.5),
            remarks: None,
        };

        let default = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let entry = materialize_legacy(&record, 1, default).unwrap();
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 7, 24).unwrap());
        assert_eq!(entry.takeoff_time, default);
        assert_eq!(entry.landing_time, NaiveTime::from_hms_opt(11, 30, 0).unwrap());
        assert_eq!(entry.duration_minutes, 90);
    }

    #[test]
    fn test_legacy_duration_wraps_past_midnight() {
        let record = LegacyRecord {
            date: "2025-07-24".to_string(),
            aircraft_registration: None,
            departure_airport: None,
            arrival_airport: None,
            takeoff_time: None,
            landing_time: None,
            flight_time: Some(2.0),
            remarks: None,
        };

        let entry =
            materialize_legacy(&record, 1, NaiveTime::from_hms_opt(23, 0, 0).unwrap()).unwrap();
        assert_eq!(entry.landing_time, NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(entry.duration_minutes, 120);
    }

    #[test]
    fn test_legacy_non_positive_flight_time_rejected() {
        let record = LegacyRecord {
            date: "2025-07-24".to_string(),
            aircraft_registration: None,
            departure_airport: None,
            arrival_airport: None,
            takeoff_time: None,
            landing_time: None,
            flight_time: Some(0.0),
            remarks: None,
        };

        assert!(matches!(
            materialize_legacy(&record, 1, NaiveTime::default()),
            Err(MaterializeError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_legacy_missing_both_times_and_duration() {
        let record = LegacyRecord {
            date: "2025-07-24".to_string(),
            aircraft_registration: None,
            departure_airport: None,
            arrival_airport: None,
            takeoff_time: None,
            landing_time: None,
            flight_time: None,
            remarks: None,
        };

        assert!(materialize_legacy(&record, 1, NaiveTime::default()).is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        for text in [
            "2025-07-24",
            "24.07.2025",
            "24/07/2025",
            "2025-07-24 10:30:00",
            "2025-07-24T10:30:00",
        ] {
            let date = parse_date(text).unwrap();
            assert_eq!(date, NaiveDate::from_ymd_opt(2025, 7, 24).unwrap(), "{text}");
        }
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("someday").is_err());
    }

    #[test]
    fn test_parse_clock_formats() {
        let expected = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        for text in ["14:30:00", "14:30", "14.30.00", "14.30", "2:30 PM", "02:30 PM"] {
            assert_eq!(parse_clock(text).unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn test_parse_clock_rejects_garbage() {
        assert!(parse_clock("noonish").is_err());
        assert!(parse_clock("25:00").is_err());
    }

    #[test]
    fn test_is_legacy_record() {
        assert!(is_legacy_record(&serde_json::json!({"date": "2025-07-24"})));
        assert!(!is_legacy_record(
            &serde_json::json!({"page_address": 1, "total_time": 0})
        ));
    }
}
