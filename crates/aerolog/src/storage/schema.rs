//! `SQLite` schema definitions for aerolog.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the devices table.
pub const CREATE_DEVICES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    external_id TEXT NOT NULL,
    last_page_address INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the events table.
///
/// Events are append-only; rows are never updated or deleted by the engine.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    page_address INTEGER NOT NULL,
    timestamp TEXT,
    total_time_ms INTEGER NOT NULL,
    bitfield INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement enforcing per-device page-address uniqueness.
pub const CREATE_EVENTS_PAGE_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_device_page
ON events(device_id, page_address)
";

/// SQL statement to create the logbook entries table.
pub const CREATE_ENTRIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS logbook_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    date TEXT NOT NULL,
    takeoff_time TEXT NOT NULL,
    landing_time TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    aircraft_registration TEXT,
    departure_airport TEXT,
    arrival_airport TEXT,
    remarks TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement enforcing the logbook dedupe key.
pub const CREATE_ENTRIES_DEDUPE_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_dedupe
ON logbook_entries(device_id, date, takeoff_time, landing_time)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_DEVICES_TABLE,
    CREATE_EVENTS_TABLE,
    CREATE_EVENTS_PAGE_INDEX,
    CREATE_ENTRIES_TABLE,
    CREATE_ENTRIES_DEDUPE_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_events_table_contains_required_columns() {
        assert!(CREATE_EVENTS_TABLE.contains("page_address INTEGER NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("total_time_ms INTEGER NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("bitfield INTEGER NOT NULL"));
    }

    #[test]
    fn test_events_page_index_is_unique() {
        assert!(CREATE_EVENTS_PAGE_INDEX.contains("UNIQUE"));
        assert!(CREATE_EVENTS_PAGE_INDEX.contains("device_id, page_address"));
    }

    #[test]
    fn test_entries_dedupe_index_covers_key() {
        assert!(CREATE_ENTRIES_DEDUPE_INDEX.contains("UNIQUE"));
        assert!(CREATE_ENTRIES_DEDUPE_INDEX.contains("device_id, date, takeoff_time, landing_time"));
    }
}
