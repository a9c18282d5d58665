//! Sync orchestration.
//!
//! The orchestrator drives one device through a full sync cycle: fetch raw
//! records from the gateway, decode them, store new events, replay a bounded
//! lookback window through the segment reconstructor, and materialize
//! completed flights, all inside one transaction per device. A periodic
//! scheduler fans cycles out over every active device with bounded
//! concurrency.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::decode_record;
use crate::gateway::{GatewayError, TelemetryGateway};
use crate::materialize::{self, LegacyRecord};
use crate::reconstruct::reconstruct_segments;
use crate::storage::{self, Device, Storage};

/// Result of one device's sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceReport {
    /// Device name.
    pub device_name: String,
    /// Raw records returned by the gateway.
    pub records_fetched: usize,
    /// Events actually inserted this cycle.
    pub events_inserted: usize,
    /// Logbook entries created this cycle.
    pub entries_created: usize,
    /// Watermark after the cycle.
    pub watermark: Option<i64>,
}

/// Aggregated result of one full sync cycle across all devices.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Devices considered this cycle.
    pub total_devices: usize,
    /// Devices that completed their cycle.
    pub synced_devices: usize,
    /// Devices whose cycle failed and was rolled back.
    pub failed_devices: usize,
    /// Raw records fetched across all devices.
    pub records_fetched: usize,
    /// Events inserted across all devices.
    pub events_inserted: usize,
    /// Logbook entries created across all devices.
    pub entries_created: usize,
    /// Human-readable per-device error messages.
    pub errors: Vec<String>,
}

impl SyncReport {
    fn absorb(&mut self, device: &DeviceReport) {
        self.synced_devices += 1;
        self.records_fetched += device.records_fetched;
        self.events_inserted += device.events_inserted;
        self.entries_created += device.entries_created;
    }

    fn record_failure(&mut self, device_name: &str, error: &Error) {
        self.failed_devices += 1;
        self.errors.push(format!("device {device_name}: {error}"));
    }
}

/// Per-device sync driver.
///
/// Cheap to clone; clones share the gateway, configuration, cancellation
/// flag, and the in-progress device set.
#[derive(Debug)]
pub struct Orchestrator<G> {
    gateway: Arc<G>,
    config: Arc<Config>,
    in_progress: Arc<Mutex<HashSet<i64>>>,
    cancelled: Arc<AtomicBool>,
}

impl<G> Clone for Orchestrator<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            config: Arc::clone(&self.config),
            in_progress: Arc::clone(&self.in_progress),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<G: TelemetryGateway + 'static> Orchestrator<G> {
    /// Create a new orchestrator.
    pub fn new(gateway: G, config: Config) -> Self {
        Self {
            gateway: Arc::new(gateway),
            config: Arc::new(config),
            in_progress: Arc::new(Mutex::new(HashSet::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation; honored between devices, never mid-transaction.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Seed the device registry from configuration and list active devices.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or written.
    pub fn ensure_devices(&self) -> Result<Vec<Device>> {
        let storage = Storage::open(self.config.database_path())?;
        for device in &self.config.devices {
            storage.upsert_device(&device.name, &device.external_id, device.active)?;
        }
        storage.active_devices()
    }

    /// Run one sync cycle across every active device.
    ///
    /// Device tasks run concurrently up to the configured bound; a failure
    /// in one device never affects another.
    pub async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let devices = match self.ensure_devices() {
            Ok(devices) => devices,
            Err(e) => {
                report.errors.push(format!("device registry: {e}"));
                return report;
            }
        };
        report.total_devices = devices.len();

        let semaphore = Arc::new(Semaphore::new(self.config.sync.max_concurrent));
        let mut handles = Vec::with_capacity(devices.len());

        for device in devices {
            if self.is_cancelled() {
                info!("Sync cycle cancelled before device {}", device.name);
                break;
            }

            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };
                this.sync_device_guarded(device).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Some((_, Ok(device_report)))) => report.absorb(&device_report),
                Ok(Some((name, Err(e)))) => report.record_failure(&name, &e),
                // Overlapping run for this device was skipped
                Ok(None) => {}
                Err(e) => {
                    report.failed_devices += 1;
                    report.errors.push(format!("sync task failed: {e}"));
                }
            }
        }

        info!(
            "Sync cycle completed: {}/{} devices, {} new events, {} new entries",
            report.synced_devices,
            report.total_devices,
            report.events_inserted,
            report.entries_created
        );
        report
    }

    /// Run one sync cycle for a single named device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown name, or any error
    /// from the device's cycle.
    pub async fn sync_one(&self, name: &str) -> Result<DeviceReport> {
        let device = self.device_by_name(name)?;
        self.sync_device(&device).await
    }

    /// Reprocess a device's entire stored event history.
    ///
    /// The administrative counterpart of the incremental cycle: the same
    /// reconstructor runs over the full history instead of the bounded
    /// lookback window. No gateway calls are made; entry dedupe makes the
    /// rebuild idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown name, or a
    /// persistence error (rolled back).
    pub fn rebuild_device(&self, name: &str) -> Result<DeviceReport> {
        let device = self.device_by_name(name)?;

        let mut storage = Storage::open(self.config.database_path())?;
        let report = storage.with_transaction(|conn| {
            let history = storage::events_for_device(conn, device.id)?;
            let reconstruction = reconstruct_segments(&history);

            let mut entries_created = 0usize;
            for segment in &reconstruction.segments {
                match materialize::materialize(segment) {
                    Ok(entry) => {
                        if storage::insert_entry_if_new(conn, &entry)? {
                            entries_created += 1;
                        }
                    }
                    Err(e) => warn!(
                        "Skipping unmaterializable segment for device {}: {}",
                        device.name, e
                    ),
                }
            }

            Ok(DeviceReport {
                device_name: device.name.clone(),
                records_fetched: 0,
                events_inserted: 0,
                entries_created,
                watermark: device.last_page_address,
            })
        })?;

        info!(
            "Rebuild for device {}: {} new entries",
            report.device_name, report.entries_created
        );
        Ok(report)
    }

    /// Sync one device: fetch, decode, store, reconstruct, materialize.
    ///
    /// Steps after the fetch run inside a single transaction; any
    /// persistence failure rolls the whole cycle back, watermark included.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if authentication or the fetch fail (after
    /// one re-authentication on an expired token), or a persistence error.
    pub async fn sync_device(&self, device: &Device) -> Result<DeviceReport> {
        let token = self.gateway.authenticate().await?;

        let records = match self.gateway.fetch_events(&device.external_id, &token).await {
            Ok(records) => records,
            Err(GatewayError::AuthExpired) => {
                debug!("Token expired for device {}, re-authenticating", device.name);
                let token = self.gateway.authenticate().await?;
                self.gateway
                    .fetch_events(&device.external_id, &token)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        let records_fetched = records.len();

        // Decode outside the transaction; malformed records are skipped, not fatal
        let mut events = Vec::new();
        let mut legacy = Vec::new();
        for raw in &records {
            if materialize::is_legacy_record(raw) {
                match serde_json::from_value::<LegacyRecord>(raw.clone()) {
                    Ok(record) => legacy.push(record),
                    Err(e) => warn!(
                        "Skipping malformed legacy record for device {}: {}",
                        device.name, e
                    ),
                }
                continue;
            }
            match decode_record(device.id, raw) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping malformed event for device {}: {}", device.name, e),
            }
        }

        let min_lookback = self.config.sync.min_lookback;
        let default_takeoff = self.config.default_takeoff_time();
        let watermark = device.last_page_address;

        let mut storage = Storage::open(self.config.database_path())?;
        let report = storage.with_transaction(|conn| {
            let mut events_inserted = 0usize;
            for event in &events {
                // The fetched stream can resend pages at or below the
                // watermark; they are already stored and must not re-insert
                if watermark.is_some_and(|mark| event.page_address <= mark) {
                    debug!(
                        "Skipping already-ingested page {} for device {}",
                        event.page_address, device.name
                    );
                    continue;
                }
                if storage::insert_event_if_new(conn, event)? {
                    events_inserted += 1;
                }
            }

            // Replaying only the new events would drop a takeoff whose
            // landing arrives in a later cycle; size the window to cover
            // cross-cycle pairs
            let window_size = min_lookback.max(2 * events_inserted);
            let window = storage::recent_events(conn, device.id, window_size)?;
            let reconstruction = reconstruct_segments(&window);
            if let Some(pending) = &reconstruction.pending_takeoff {
                debug!(
                    "Takeoff at page {} for device {} still waiting for its landing",
                    pending.page_address, device.name
                );
            }

            let mut entries_created = 0usize;
            for segment in &reconstruction.segments {
                match materialize::materialize(segment) {
                    Ok(entry) => {
                        if storage::insert_entry_if_new(conn, &entry)? {
                            entries_created += 1;
                        }
                    }
                    Err(e) => warn!(
                        "Skipping unmaterializable segment for device {}: {}",
                        device.name, e
                    ),
                }
            }

            for record in &legacy {
                match materialize::materialize_legacy(record, device.id, default_takeoff) {
                    Ok(entry) => {
                        if storage::insert_entry_if_new(conn, &entry)? {
                            entries_created += 1;
                        }
                    }
                    Err(e) => warn!(
                        "Skipping malformed legacy record for device {}: {}",
                        device.name, e
                    ),
                }
            }

            let new_watermark =
                storage::newest_event(conn, device.id)?.map(|event| event.page_address);
            if let Some(page) = new_watermark {
                storage::update_watermark(conn, device.id, page)?;
            }

            Ok(DeviceReport {
                device_name: device.name.clone(),
                records_fetched,
                events_inserted,
                entries_created,
                watermark: new_watermark,
            })
        })?;

        info!(
            "Device {}: {} records fetched, {} new events, {} new entries",
            report.device_name,
            report.records_fetched,
            report.events_inserted,
            report.entries_created
        );
        Ok(report)
    }

    /// Sync a device unless a previous run for it is still in flight.
    async fn sync_device_guarded(&self, device: Device) -> Option<(String, Result<DeviceReport>)> {
        {
            let mut in_progress = self.in_progress.lock().await;
            if !in_progress.insert(device.id) {
                warn!(
                    "Device {} sync still in progress, skipping this cycle",
                    device.name
                );
                return None;
            }
        }

        let result = self.sync_device(&device).await;
        self.in_progress.lock().await.remove(&device.id);
        Some((device.name, result))
    }

    fn device_by_name(&self, name: &str) -> Result<Device> {
        let storage = Storage::open(self.config.database_path())?;
        storage
            .device_by_name(name)?
            .ok_or_else(|| Error::DeviceNotFound {
                name: name.to_string(),
            })
    }
}

/// Periodic driver running sync cycles at a fixed interval.
#[derive(Debug)]
pub struct Scheduler<G> {
    orchestrator: Orchestrator<G>,
    interval: Duration,
}

impl<G: TelemetryGateway + 'static> Scheduler<G> {
    /// Create a scheduler over the given orchestrator.
    pub fn new(orchestrator: Orchestrator<G>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// A handle that can stop the scheduler from another task.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            cancelled: Arc::clone(&self.orchestrator.cancelled),
        }
    }

    /// Run sync cycles until stopped.
    ///
    /// The first cycle starts immediately; later cycles follow at the
    /// configured interval. Stopping takes effect between cycles and, within
    /// a cycle, between devices.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Sync scheduler started, interval {:?}", self.interval);
        loop {
            interval.tick().await;
            if self.orchestrator.is_cancelled() {
                break;
            }

            let report = self.orchestrator.run_cycle().await;
            if report.errors.is_empty() {
                debug!(
                    "Scheduled cycle done: {}/{} devices",
                    report.synced_devices, report.total_devices
                );
            } else {
                warn!(
                    "Scheduled cycle completed with errors: {:?}",
                    report.errors
                );
            }

            if self.orchestrator.is_cancelled() {
                break;
            }
        }
        info!("Sync scheduler stopped");
    }
}

/// Cloneable stop handle for a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    cancelled: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop after the current device completes.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
