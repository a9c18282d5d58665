//! Flight segment reconstruction.
//!
//! This module replays an ordered window of telemetry events through a small
//! state machine and emits completed takeoff-to-landing segments. The same
//! function serves the incremental sync path (bounded lookback window) and
//! the administrative full rebuild (entire event history); only the window
//! passed in differs.

use tracing::debug;

use crate::event::{Event, EventBits};

/// A reconstructed takeoff-to-landing pairing for one device.
///
/// Segments are transient; they exist only between reconstruction and
/// materialization and are never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightSegment {
    /// The event carrying the takeoff flag.
    pub takeoff: Event,
    /// The later event carrying the landing flag.
    pub landing: Event,
}

/// Aircraft state tracked while replaying the event window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FlightState {
    /// On the ground, engine off.
    #[default]
    Ground,
    /// Engine running, not yet airborne.
    EngineRunning,
    /// Airborne; a takeoff event has been recorded.
    Airborne,
}

/// The outcome of replaying one event window.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    /// Completed segments, in takeoff order.
    pub segments: Vec<FlightSegment>,
    /// A takeoff still waiting for its landing at the end of the window.
    ///
    /// Not emitted as a segment; the landing is expected to arrive in a
    /// future cycle, and the lookback window guarantees the takeoff will be
    /// replayed together with it.
    pub pending_takeoff: Option<Event>,
}

/// Replay an ascending-ordered event window and collect completed segments.
///
/// The window must be sorted by ascending `page_address`. One event may
/// carry several flags at once; flags are applied in logger order:
/// engine-start, takeoff, landing, engine-stop. Flags that don't fit the
/// current state (a landing while on the ground, a second takeoff while
/// airborne) are duplicate or noise signals and are ignored.
#[must_use]
pub fn reconstruct_segments(window: &[Event]) -> Reconstruction {
    let mut state = FlightState::default();
    let mut takeoff: Option<Event> = None;
    let mut segments = Vec::new();

    for event in window {
        if event.bits.contains(EventBits::ENGINE_START) && state == FlightState::Ground {
            state = FlightState::EngineRunning;
        }

        if event.bits.contains(EventBits::TAKEOFF) {
            match state {
                FlightState::Ground | FlightState::EngineRunning => {
                    // A takeoff is authoritative even without a preceding
                    // engine-start page (logger may power up mid-taxi).
                    state = FlightState::Airborne;
                    takeoff = Some(event.clone());
                }
                FlightState::Airborne => {
                    debug!(
                        "Ignoring duplicate takeoff at page {} for device {}",
                        event.page_address, event.device_id
                    );
                }
            }
        }

        if event.bits.contains(EventBits::LANDING) {
            if state == FlightState::Airborne {
                state = FlightState::Ground;
                if let Some(takeoff_event) = takeoff.take() {
                    segments.push(FlightSegment {
                        takeoff: takeoff_event,
                        landing: event.clone(),
                    });
                }
            } else {
                debug!(
                    "Ignoring landing without takeoff at page {} for device {}",
                    event.page_address, event.device_id
                );
            }
        }

        if event.bits.contains(EventBits::ENGINE_STOP) && state == FlightState::EngineRunning {
            // Aborted start: engine ran but the aircraft never took off.
            state = FlightState::Ground;
        }
    }

    Reconstruction {
        segments,
        pending_takeoff: takeoff,
    }
}
