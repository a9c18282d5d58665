//! Command-line interface for aerolog.
//!
//! This module provides the CLI structure and command handlers for the
//! `aerosync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, RebuildCommand, StatusCommand, SyncCommand};

/// aerosync - Synchronize device telemetry into a flight logbook
///
/// A background engine that pulls event pages from a remote device gateway,
/// reconstructs takeoff-to-landing flight segments, and materializes them
/// into logbook entries.
#[derive(Debug, Parser)]
#[command(name = "aerosync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the periodic sync scheduler in the foreground
    Run,

    /// Run one sync cycle now
    Sync(SyncCommand),

    /// Reprocess a device's entire stored event history
    Rebuild(RebuildCommand),

    /// Show per-device sync status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
