//! `aerosync` - CLI for aerolog
//!
//! This binary provides the command-line interface for running the sync
//! engine and inspecting its state.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use aerolog::cli::{Cli, Command, ConfigCommand, RebuildCommand, StatusCommand, SyncCommand};
use aerolog::sync::{Orchestrator, Scheduler};
use aerolog::{init_logging, Config, HttpGateway, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Run => handle_run(config).await,
        Command::Sync(sync_cmd) => handle_sync(config, &sync_cmd).await,
        Command::Rebuild(rebuild_cmd) => handle_rebuild(config, &rebuild_cmd),
        Command::Status(status_cmd) => handle_status(&config, &status_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn build_orchestrator(config: Config) -> anyhow::Result<Orchestrator<HttpGateway>> {
    let gateway = HttpGateway::new(&config.gateway).context("building gateway client")?;
    Ok(Orchestrator::new(gateway, config))
}

async fn handle_run(config: Config) -> anyhow::Result<()> {
    let interval = config.sync_interval();
    let orchestrator = build_orchestrator(config)?;
    let scheduler = Scheduler::new(orchestrator, interval);

    // Ctrl-C stops between devices, never mid-transaction
    let handle = scheduler.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Shutting down after the current device completes...");
            handle.stop();
        }
    });

    scheduler.run().await;
    Ok(())
}

async fn handle_sync(config: Config, cmd: &SyncCommand) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.ensure_devices().context("seeding devices")?;

    match &cmd.device {
        Some(name) => {
            let report = orchestrator.sync_one(name).await?;
            println!(
                "Device {}: {} records fetched, {} new events, {} new entries",
                report.device_name,
                report.records_fetched,
                report.events_inserted,
                report.entries_created
            );
        }
        None => {
            let report = orchestrator.run_cycle().await;
            println!(
                "Synced {}/{} devices: {} new events, {} new entries",
                report.synced_devices,
                report.total_devices,
                report.events_inserted,
                report.entries_created
            );
            for error in &report.errors {
                eprintln!("  error: {error}");
            }
        }
    }
    Ok(())
}

fn handle_rebuild(config: Config, cmd: &RebuildCommand) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.ensure_devices().context("seeding devices")?;

    let report = orchestrator.rebuild_device(&cmd.device)?;
    println!(
        "Rebuilt device {}: {} new entries",
        report.device_name, report.entries_created
    );
    Ok(())
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.all_device_stats()?;

    if cmd.json {
        let devices: Vec<_> = stats
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "events": s.event_count,
                    "entries": s.entry_count,
                    "watermark": s.watermark,
                })
            })
            .collect();
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "devices": devices,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("aerosync status");
        println!("---------------");
        println!("Database:      {}", config.database_path().display());
        println!();
        if stats.is_empty() {
            println!("No devices known yet. Run `aerosync sync` first.");
        }
        for s in stats {
            let watermark = s
                .watermark
                .map_or_else(|| "-".to_string(), |w| w.to_string());
            println!(
                "{:<20} events: {:<8} entries: {:<8} watermark: {}",
                s.name, s.event_count, s.entry_count, watermark
            );
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Gateway]");
                println!("  Base URL:           {}", config.gateway.base_url);
                println!("  Username:           {}", config.gateway.username);
                println!("  Timeout (s):        {}", config.gateway.timeout_secs);
                println!();
                println!("[Sync]");
                println!("  Interval (s):       {}", config.sync.interval_secs);
                println!("  Min lookback:       {}", config.sync.min_lookback);
                println!("  Max concurrent:     {}", config.sync.max_concurrent);
                println!(
                    "  Default takeoff:    {}",
                    config.sync.default_takeoff_time
                );
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Devices]");
                if config.devices.is_empty() {
                    println!("  (none configured)");
                }
                for device in &config.devices {
                    println!(
                        "  {:<20} external id: {:<24} active: {}",
                        device.name, device.external_id, device.active
                    );
                }
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
