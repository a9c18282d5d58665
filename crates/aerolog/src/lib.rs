//! `aerolog` - An event-to-logbook synchronization engine
//!
//! This library periodically pulls raw telemetry events from a remote device
//! gateway, decodes a compact bitfield encoding of aircraft state transitions,
//! and reconstructs discrete flight records (takeoff to landing segments) into
//! persistent logbook entries.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod logging;
pub mod materialize;
pub mod reconstruct;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventBits};
pub use gateway::{HttpGateway, TelemetryGateway};
pub use logging::init_logging;
pub use materialize::LogbookEntry;
pub use reconstruct::FlightSegment;
pub use storage::Storage;
pub use sync::{Orchestrator, Scheduler, SyncReport};
