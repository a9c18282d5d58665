//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Sync only this device (default: all active devices)
    #[arg(short, long)]
    pub device: Option<String>,
}

/// Rebuild command arguments.
#[derive(Debug, Args)]
pub struct RebuildCommand {
    /// The device whose history to reprocess
    #[arg(short, long)]
    pub device: String,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_command_debug() {
        let cmd = SyncCommand {
            device: Some("Alpha".to_string()),
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Alpha"));
    }

    #[test]
    fn test_rebuild_command_debug() {
        let cmd = RebuildCommand {
            device: "Alpha".to_string(),
        };
        assert!(format!("{cmd:?}").contains("device"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        assert!(format!("{cmd:?}").contains("Show"));
    }
}
