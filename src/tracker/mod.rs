//! 4.H Orbit tracker: drives a tracked target through
//! `DISABLED → WAITING → AOS → TRACKING → LOS → DISABLED`, ticking every
//! 2 s and publishing pointings while `TRACKING`.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

pub mod worker;

use crate::domain_types::Timestamp;
use crate::pass_prediction::target::{GroundStation, Target, TargetError};
use crate::pass_prediction::{find_passes, Pass, PassQuery, PassStatus, PredictError};

pub use worker::TrackerWorker;

/// How often the tracker re-evaluates its state and, if tracking, publishes
/// a pointing (spec §4.H).
pub const TICK_INTERVAL_SECS: u64 = 2;

/// A TLE is considered stale past this age; the tracker only warns, it does
/// not refuse to use it (spec §4.H "TLE hygiene").
pub const TLE_STALE_AFTER_DAYS: i64 = 14;

/// Errors from the tracker state machine.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Pass prediction failed for the current target.
    #[error(transparent)]
    Predict(#[from] PredictError),
    /// Target position resolution failed outside of pass prediction
    /// (instantaneous az/el/velocity sampling during `TRACKING`).
    #[error(transparent)]
    Target(#[from] TargetError),
}

/// An instantaneous pointing published while `TRACKING` (spec §6
/// `target.position`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pointing {
    /// Name of the tracked target.
    pub target: String,
    /// Azimuth, degrees, normalized to `(-180, 180]`.
    pub az: f64,
    /// Elevation, degrees, clamped to `>= 0`.
    pub el: f64,
    /// Angular velocity magnitude, degrees/second (finite-difference
    /// estimate between consecutive ticks).
    pub velocity: f64,
}

/// `preaos` event payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreaosEvent {
    /// Tracked object name.
    pub satellite: String,
    /// Azimuth at AOS, degrees.
    pub az_aos: f64,
    /// Azimuth at peak elevation, degrees.
    pub az_max: f64,
    /// Peak elevation, degrees.
    pub el_max: f64,
    /// Azimuth at LOS, degrees.
    pub az_los: f64,
    /// AOS time, ISO-8601 UTC.
    pub aos: Timestamp,
    /// Time of peak elevation, ISO-8601 UTC.
    pub max: Timestamp,
    /// LOS time, ISO-8601 UTC.
    pub los: Timestamp,
}

/// `aos`/`los` event payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteEvent {
    /// Tracked object name.
    pub satellite: String,
}

/// Events the tracker emits on exchange `event` as it transitions state.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// Emitted entering `AOS`, carrying the full upcoming pass shape.
    Preaos(PreaosEvent),
    /// Emitted entering `TRACKING`.
    Aos(SatelliteEvent),
    /// Emitted entering `LOS`.
    Los(SatelliteEvent),
}

/// A target the tracker has been told to follow.
pub struct TrackedTarget {
    /// Display name, used in events and pointings.
    pub name: String,
    /// Resolvable position source.
    pub target: Target,
    /// Seconds before AOS to transition into the `AOS` pre-pass state.
    pub preaos_time: f64,
    /// When the backing TLE's epoch was produced, for staleness warnings.
    pub tle_epoch: Option<Timestamp>,
}

/// Drives one target through its pass lifecycle.
pub struct OrbitTracker {
    groundstation_name: String,
    gs: GroundStation,
    state: PassStatus,
    target: Option<TrackedTarget>,
    current_pass: Option<Pass>,
    last_pointing: Option<(Timestamp, f64, f64)>,
}

impl OrbitTracker {
    /// Builds a tracker for `gs`, starting `DISABLED` with no target.
    pub fn new(groundstation_name: impl Into<String>, gs: GroundStation) -> Self {
        Self {
            groundstation_name: groundstation_name.into(),
            gs,
            state: PassStatus::Disabled,
            target: None,
            current_pass: None,
            last_pointing: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PassStatus {
        self.state
    }

    /// Name of the currently tracked target, if any (read-only status
    /// surface, spec §6 `target.position`/operator API).
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.name.as_str())
    }

    /// Sets a new target and transitions out of `DISABLED` into `WAITING`.
    pub fn set_target(&mut self, target: TrackedTarget) {
        self.target = Some(target);
        self.current_pass = None;
        self.last_pointing = None;
        self.state = PassStatus::Waiting;
    }

    /// Clears the target and returns to `DISABLED` (spec §4.H `TRACKING →
    /// LOS`, detarget).
    pub fn detarget(&mut self) {
        self.target = None;
        self.current_pass = None;
        self.last_pointing = None;
        self.state = PassStatus::Disabled;
    }

    /// Replaces orbital elements for the current target if its name
    /// matches, per a TLE-update broadcast (spec §4.H "TLE hygiene").
    pub fn update_tle(&mut self, name: &str, target: Target, tle_epoch: Timestamp) {
        if let Some(tracked) = &mut self.target {
            if tracked.name == name {
                tracked.target = target;
                tracked.tle_epoch = Some(tle_epoch);
                self.current_pass = None;
            }
        }
    }

    /// Advances the state machine by one tick at time `now`. Returns any
    /// events raised during this tick and, while `TRACKING`, the pointing
    /// to publish.
    #[instrument(skip(self), fields(state = ?self.state))]
    pub fn tick(&mut self, now: Timestamp) -> Result<(Vec<TrackerEvent>, Option<Pointing>), TrackerError> {
        let mut events = Vec::new();

        let Some(tracked) = &self.target else {
            self.state = PassStatus::Disabled;
            return Ok((events, None));
        };
        // Clone what this tick needs so the match below can call `&mut
        // self` methods without holding `self.target` borrowed.
        let name = tracked.name.clone();
        let target = tracked.target.clone();
        let preaos_time = tracked.preaos_time;
        let tle_epoch = tracked.tle_epoch;

        if let Some(epoch) = tle_epoch {
            if now - epoch > ChronoDuration::days(TLE_STALE_AFTER_DAYS) {
                warn!(target = %name, epoch = %epoch, "TLE is more than 14 days old");
            }
        }

        let (_, el) = target.topocentric(self.gs, now, None)?;

        match self.state {
            PassStatus::Disabled => {}

            PassStatus::Waiting => {
                if el > 0.0 {
                    self.state = PassStatus::Tracking;
                } else {
                    let preaos_at_and_shape = self.ensure_current_pass(now)?.map(|pass| {
                        (
                            pass.t_aos - ChronoDuration::milliseconds((preaos_time * 1000.0) as i64),
                            pass.az_aos,
                            pass.az_max,
                            pass.el_max,
                            pass.az_los,
                            pass.t_aos,
                            pass.t_max,
                            pass.t_los,
                        )
                    });
                    if let Some((preaos_at, az_aos, az_max, el_max, az_los, aos, max, los)) = preaos_at_and_shape {
                        if now >= preaos_at {
                            events.push(TrackerEvent::Preaos(PreaosEvent {
                                satellite: name.clone(),
                                az_aos,
                                az_max,
                                el_max,
                                az_los,
                                aos,
                                max,
                                los,
                            }));
                            self.state = PassStatus::Aos;
                        }
                    }
                }
            }

            PassStatus::Aos => {
                if el > 0.0 {
                    events.push(TrackerEvent::Aos(SatelliteEvent { satellite: name.clone() }));
                    self.state = PassStatus::Tracking;
                }
            }

            PassStatus::Tracking => {
                if el < 0.0 {
                    events.push(TrackerEvent::Los(SatelliteEvent { satellite: name.clone() }));
                    self.state = PassStatus::Los;
                }
            }

            PassStatus::Los => {
                self.state = PassStatus::Disabled;
                self.target = None;
                self.current_pass = None;
            }
        }

        let pointing = if self.state == PassStatus::Tracking {
            let (az, el) = target.topocentric(self.gs, now, None)?;
            Some(self.publish_pointing(&name, now, az, el))
        } else {
            None
        };

        Ok((events, pointing))
    }

    fn publish_pointing(&mut self, name: &str, now: Timestamp, az: f64, el: f64) -> Pointing {
        let az_symmetric = if az > 180.0 { az - 360.0 } else { az };
        let el_clamped = el.max(0.0);

        let velocity = match self.last_pointing {
            Some((t_prev, az_prev, el_prev)) => {
                let dt = (now - t_prev).num_milliseconds() as f64 / 1000.0;
                if dt > 0.0 {
                    let daz = angular_diff(az_symmetric, az_prev);
                    let del = el_clamped - el_prev;
                    (daz * daz + del * del).sqrt() / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        self.last_pointing = Some((now, az_symmetric, el_clamped));

        Pointing { target: name.to_string(), az: az_symmetric, el: el_clamped, velocity }
    }

    fn ensure_current_pass(&mut self, now: Timestamp) -> Result<Option<&Pass>, TrackerError> {
        let tracked = self.target.as_ref().expect("checked by caller");
        let stale = match &self.current_pass {
            Some(pass) => pass.t_los < now,
            None => true,
        };
        if stale {
            let window_end = now + ChronoDuration::hours(26);
            let query = PassQuery { min_elevation: 0.0, min_max_elevation: 0.0, ..Default::default() };
            let passes = find_passes(&tracked.name, &self.groundstation_name, &tracked.target, self.gs, now, window_end, &query)?;
            self.current_pass = passes.into_iter().next();
        }
        Ok(self.current_pass.as_ref())
    }
}

/// Shortest signed angular difference between two azimuths in `(-180,180]`.
fn angular_diff(a: f64, b: f64) -> f64 {
    let mut d = a - b;
    while d > 180.0 {
        d -= 360.0;
    }
    while d <= -180.0 {
        d += 360.0;
    }
    d
}

/// Timestamp helper for tests and callers wanting "now" without importing
/// `chrono::Utc` directly at every call site.
pub fn now() -> Timestamp {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass_prediction::Tle;
    use chrono::TimeZone;

    fn helsinki() -> GroundStation {
        GroundStation { latitude_deg: 60.18, longitude_deg: 24.83, elevation_m: 40.0 }
    }

    fn iss_tle() -> Tle {
        Tle {
            name: "ISS".to_string(),
            line1: "1 25544U 98067A   24341.14375093  .00014948  00000-0  85933-3 0  9999".to_string(),
            line2: "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.50377579 28618".to_string(),
        }
    }

    #[test]
    fn tracker_starts_disabled_with_no_target() {
        let tracker = OrbitTracker::new("helsinki", helsinki());
        assert_eq!(tracker.state(), PassStatus::Disabled);
    }

    #[test]
    fn setting_a_target_enters_waiting() {
        let mut tracker = OrbitTracker::new("helsinki", helsinki());
        tracker.set_target(TrackedTarget {
            name: "ISS".to_string(),
            target: Target::Orbit(iss_tle()),
            preaos_time: 30.0,
            tle_epoch: Some(Utc.with_ymd_and_hms(2024, 12, 6, 0, 0, 0).unwrap()),
        });
        assert_eq!(tracker.state(), PassStatus::Waiting);
    }

    #[test]
    fn detarget_returns_to_disabled() {
        let mut tracker = OrbitTracker::new("helsinki", helsinki());
        tracker.set_target(TrackedTarget {
            name: "ISS".to_string(),
            target: Target::Orbit(iss_tle()),
            preaos_time: 30.0,
            tle_epoch: None,
        });
        tracker.detarget();
        assert_eq!(tracker.state(), PassStatus::Disabled);
        assert!(tracker.target.is_none());
    }

    #[test]
    fn angular_diff_takes_the_short_way_around() {
        assert!((angular_diff(179.0, -179.0) - (-2.0)).abs() < 1e-9);
        assert!((angular_diff(-179.0, 179.0) - 2.0).abs() < 1e-9);
    }
}
