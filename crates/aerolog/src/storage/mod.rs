//! Storage layer for aerolog.
//!
//! This module provides `SQLite`-based persistence for devices, telemetry
//! events, and materialized logbook entries. Events are append-only with
//! per-device page-address uniqueness; logbook entries are deduplicated on
//! `(device_id, date, takeoff_time, landing_time)`.
//!
//! Row operations are free functions over a [`rusqlite::Connection`] so the
//! same code serves autocommit calls and the per-device sync transaction
//! (see [`Storage::with_transaction`]).

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventBits};
use crate::materialize::LogbookEntry;

/// Text layout used for event timestamps in the database.
const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";
/// Text layout used for logbook dates in the database.
const DATE_LAYOUT: &str = "%Y-%m-%d";
/// Text layout used for logbook clock times in the database.
const TIME_LAYOUT: &str = "%H:%M:%S";

/// A device known to the engine.
///
/// Devices are owned by the surrounding application; the engine reads all
/// fields and writes only the `last_page_address` watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Local device identifier.
    pub id: i64,
    /// Human-readable device name (unique).
    pub name: String,
    /// Identifier of this device on the remote gateway.
    pub external_id: String,
    /// Highest event page address already ingested, if any.
    pub last_page_address: Option<i64>,
    /// Whether this device participates in sync cycles.
    pub is_active: bool,
}

/// Per-device storage statistics for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStats {
    /// Local device identifier.
    pub device_id: i64,
    /// Device name.
    pub name: String,
    /// Number of stored events.
    pub event_count: i64,
    /// Number of materialized logbook entries.
    pub entry_count: i64,
    /// Current watermark.
    pub watermark: Option<i64>,
}

/// Storage engine for devices, events, and logbook entries.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the underlying connection for read-only composition.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a single transaction.
    ///
    /// Commits if the closure succeeds; any error rolls every change back,
    /// leaving the prior state untouched.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a database error from commit.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Insert a device or update its gateway identity, returning the row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_device(&self, name: &str, external_id: &str, active: bool) -> Result<Device> {
        upsert_device(&self.conn, name, external_id, active)
    }

    /// All devices participating in sync cycles.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn active_devices(&self) -> Result<Vec<Device>> {
        active_devices(&self.conn)
    }

    /// Look up a device by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn device_by_name(&self, name: &str) -> Result<Option<Device>> {
        device_by_name(&self.conn, name)
    }

    /// Storage statistics for every known device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn all_device_stats(&self) -> Result<Vec<DeviceStats>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM devices ORDER BY name ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        ids.into_iter()
            .map(|id| device_stats(&self.conn, id))
            .collect()
    }
}

/// Insert an event if no event with the same `(device_id, page_address)`
/// exists yet. Returns whether a row was inserted.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_event_if_new(conn: &Connection, event: &Event) -> Result<bool> {
    let timestamp = event.timestamp.map(|ts| ts.format(TIMESTAMP_LAYOUT).to_string());

    let inserted = conn.execute(
        r"
        INSERT OR IGNORE INTO events
            (device_id, page_address, timestamp, total_time_ms, bitfield, message)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            event.device_id,
            event.page_address,
            timestamp,
            event.total_time_ms,
            i64::from(event.bits.bits()),
            event.message,
        ],
    )?;

    if inserted == 0 {
        debug!(
            "Skipping duplicate event page {} for device {}",
            event.page_address, event.device_id
        );
    }
    Ok(inserted > 0)
}

/// The event with the highest page address for a device, if any.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn newest_event(conn: &Connection, device_id: i64) -> Result<Option<Event>> {
    let event = conn
        .query_row(
            r"
            SELECT id, device_id, page_address, timestamp, total_time_ms, bitfield, message
            FROM events WHERE device_id = ?1
            ORDER BY page_address DESC LIMIT 1
            ",
            [device_id],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

/// The `limit` most recent events for a device, in ascending page order.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn recent_events(conn: &Connection, device_id: i64, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, device_id, page_address, timestamp, total_time_ms, bitfield, message
        FROM events WHERE device_id = ?1
        ORDER BY page_address DESC LIMIT ?2
        ",
    )?;

    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut events = stmt
        .query_map(params![device_id, limit_i64], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    events.reverse();
    Ok(events)
}

/// Every stored event for a device, in ascending page order.
///
/// This is the full-rebuild window; the incremental path uses
/// [`recent_events`].
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn events_for_device(conn: &Connection, device_id: i64) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, device_id, page_address, timestamp, total_time_ms, bitfield, message
        FROM events WHERE device_id = ?1
        ORDER BY page_address ASC
        ",
    )?;

    let events = stmt
        .query_map([device_id], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Insert a logbook entry unless one with the same dedupe key exists.
/// Returns whether a row was inserted.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_entry_if_new(conn: &Connection, entry: &LogbookEntry) -> Result<bool> {
    let date = entry.date.format(DATE_LAYOUT).to_string();
    let takeoff = entry.takeoff_time.format(TIME_LAYOUT).to_string();
    let landing = entry.landing_time.format(TIME_LAYOUT).to_string();

    let exists: i64 = conn.query_row(
        r"
        SELECT COUNT(*) FROM logbook_entries
        WHERE device_id = ?1 AND date = ?2 AND takeoff_time = ?3 AND landing_time = ?4
        ",
        params![entry.device_id, date, takeoff, landing],
        |row| row.get(0),
    )?;
    if exists > 0 {
        debug!(
            "Logbook entry already exists for device {} on {} {}-{}",
            entry.device_id, date, takeoff, landing
        );
        return Ok(false);
    }

    conn.execute(
        r"
        INSERT INTO logbook_entries
            (device_id, date, takeoff_time, landing_time, duration_minutes,
             aircraft_registration, departure_airport, arrival_airport, remarks)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        params![
            entry.device_id,
            date,
            takeoff,
            landing,
            entry.duration_minutes,
            entry.aircraft_registration,
            entry.departure_airport,
            entry.arrival_airport,
            entry.remarks,
        ],
    )?;

    debug!("Inserted logbook entry with id {}", conn.last_insert_rowid());
    Ok(true)
}

/// All logbook entries for a device, most recent date first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn entries_for_device(conn: &Connection, device_id: i64) -> Result<Vec<LogbookEntry>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, device_id, date, takeoff_time, landing_time, duration_minutes,
               aircraft_registration, departure_airport, arrival_airport, remarks
        FROM logbook_entries WHERE device_id = ?1
        ORDER BY date DESC, takeoff_time DESC
        ",
    )?;

    let entries = stmt
        .query_map([device_id], row_to_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Set the device watermark to the given page address.
///
/// Written once per successful sync cycle, inside the cycle's transaction.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn update_watermark(conn: &Connection, device_id: i64, page_address: i64) -> Result<()> {
    conn.execute(
        "UPDATE devices SET last_page_address = ?2 WHERE id = ?1",
        params![device_id, page_address],
    )?;
    Ok(())
}

/// Insert a device or update its gateway identity, returning the row.
///
/// The watermark is left untouched on update.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn upsert_device(
    conn: &Connection,
    name: &str,
    external_id: &str,
    active: bool,
) -> Result<Device> {
    conn.execute(
        r"
        INSERT INTO devices (name, external_id, is_active)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(name) DO UPDATE SET external_id = ?2, is_active = ?3
        ",
        params![name, external_id, active],
    )?;

    device_by_name(conn, name)?
        .ok_or_else(|| Error::internal(format!("device {name} vanished after upsert")))
}

/// Look up a device by name.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn device_by_name(conn: &Connection, name: &str) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            r"
            SELECT id, name, external_id, last_page_address, is_active
            FROM devices WHERE name = ?1
            ",
            [name],
            row_to_device,
        )
        .optional()?;
    Ok(device)
}

/// All devices participating in sync cycles, ordered by name.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn active_devices(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, name, external_id, last_page_address, is_active
        FROM devices WHERE is_active = 1
        ORDER BY name ASC
        ",
    )?;

    let devices = stmt
        .query_map([], row_to_device)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(devices)
}

/// Storage statistics for one device.
///
/// # Errors
///
/// Returns an error if the device does not exist or a query fails.
pub fn device_stats(conn: &Connection, device_id: i64) -> Result<DeviceStats> {
    let (name, watermark): (String, Option<i64>) = conn.query_row(
        "SELECT name, last_page_address FROM devices WHERE id = ?1",
        [device_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let event_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE device_id = ?1",
        [device_id],
        |row| row.get(0),
    )?;

    let entry_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM logbook_entries WHERE device_id = ?1",
        [device_id],
        |row| row.get(0),
    )?;

    Ok(DeviceStats {
        device_id,
        name,
        event_count,
        entry_count,
        watermark,
    })
}

/// Convert a database row to a [`Device`].
fn row_to_device(row: &rusqlite::Row) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        external_id: row.get(2)?,
        last_page_address: row.get(3)?,
        is_active: row.get(4)?,
    })
}

/// Convert a database row to an [`Event`].
fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let id: i64 = row.get(0)?;
    let device_id: i64 = row.get(1)?;
    let page_address: i64 = row.get(2)?;
    let timestamp_str: Option<String> = row.get(3)?;
    let total_time_ms: i64 = row.get(4)?;
    let bitfield: i64 = row.get(5)?;
    let message: Option<String> = row.get(6)?;

    let timestamp = timestamp_str.and_then(|s| {
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_LAYOUT)
            .map_err(|_| warn!("Unparseable event timestamp in storage: {}", s))
            .ok()
    });

    let bits = EventBits::from_bits(u32::try_from(bitfield).unwrap_or_else(|_| {
        warn!("Event bitfield does not fit a 32-bit word: {}", bitfield);
        0
    }));

    Ok(Event {
        id: Some(id),
        device_id,
        page_address,
        timestamp,
        total_time_ms,
        bits,
        message,
    })
}

/// Convert a database row to a [`LogbookEntry`].
fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LogbookEntry> {
    let id: i64 = row.get(0)?;
    let device_id: i64 = row.get(1)?;
    let date_str: String = row.get(2)?;
    let takeoff_str: String = row.get(3)?;
    let landing_str: String = row.get(4)?;
    let duration_minutes: i64 = row.get(5)?;

    let date = NaiveDate::parse_from_str(&date_str, DATE_LAYOUT).unwrap_or_else(|_| {
        warn!("Unparseable logbook date in storage: {}", date_str);
        NaiveDate::default()
    });
    let takeoff_time = NaiveTime::parse_from_str(&takeoff_str, TIME_LAYOUT).unwrap_or_else(|_| {
        warn!("Unparseable takeoff time in storage: {}", takeoff_str);
        NaiveTime::default()
    });
    let landing_time = NaiveTime::parse_from_str(&landing_str, TIME_LAYOUT).unwrap_or_else(|_| {
        warn!("Unparseable landing time in storage: {}", landing_str);
        NaiveTime::default()
    });

    Ok(LogbookEntry {
        id: Some(id),
        device_id,
        date,
        takeoff_time,
        landing_time,
        duration_minutes,
        aircraft_registration: row.get(6)?,
        departure_airport: row.get(7)?,
        arrival_airport: row.get(8)?,
        remarks: row.get(9)?,
    })
}
