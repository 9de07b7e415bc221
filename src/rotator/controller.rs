//! 4.I Rotator controller: hardware abstraction, safe-zone enforcement,
//! Sun avoidance, and the per-rotator module's control loop and RPC surface.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::pass_prediction::target::{sun_topocentric, GroundStation};

use super::geometry::AzElRotator;

/// Errors raised by the rotator's safe-zone enforcement or hardware driver.
#[derive(Error, Debug, Clone)]
pub enum RotatorError {
    /// Requested azimuth falls outside `[az_min, az_max]` (motor frame).
    #[error("azimuth value {az} ({motor_az}) is outside allowed limits [{az_min}, {az_max}]")]
    AzimuthOutOfRange { az: f64, motor_az: f64, az_min: f64, az_max: f64 },

    /// Requested elevation falls outside the effective minimum (horizon map
    /// or `el_min`) or above `el_max` (motor frame).
    #[error("elevation value {el} ({motor_el}) is outside allowed limits [{el_min}, {el_max}]")]
    ElevationOutOfRange { el: f64, motor_el: f64, el_min: f64, el_max: f64 },

    /// The position would point within `min_sun_angle` of the Sun.
    #[error("sun angle {actual} is below the allowed limit {min_sun_angle}")]
    SunAvoidance { actual: f64, min_sun_angle: f64 },

    /// The configured horizon map failed validation at load time.
    #[error("invalid horizon map: {0}")]
    InvalidHorizonMap(String),

    /// The underlying hardware driver reported a failure.
    #[error("hardware driver error: {0}")]
    Driver(String),
}

/// An azimuth-indexed local minimum-elevation table (spec §4.I "horizon
/// map"). Must start and end at azimuth 0/360 with equal elevations and be
/// strictly monotone in azimuth (spec §4.I, grounded on `base.py`'s load
/// assertions).
#[derive(Debug, Clone)]
pub struct HorizonMap {
    points: Vec<(f64, f64)>,
}

impl HorizonMap {
    /// Validates and wraps `points` as a horizon map.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, RotatorError> {
        if points.len() < 2 {
            return Err(RotatorError::InvalidHorizonMap("need at least two points".to_string()));
        }
        for &(az, el) in &points {
            if !(0.0..=360.0).contains(&az) {
                return Err(RotatorError::InvalidHorizonMap(format!("azimuth {az} outside [0, 360]")));
            }
            if !(0.0..=90.0).contains(&el) {
                return Err(RotatorError::InvalidHorizonMap(format!("elevation {el} outside [0, 90]")));
            }
        }
        let (first_az, first_el) = points[0];
        let (last_az, last_el) = points[points.len() - 1];
        if (first_az - 0.0).abs() > 1e-6 || (last_az - 360.0).abs() > 1e-6 {
            return Err(RotatorError::InvalidHorizonMap(
                "horizon map must start at azimuth 0 and end at azimuth 360".to_string(),
            ));
        }
        if (first_el - last_el).abs() > 1e-6 {
            return Err(RotatorError::InvalidHorizonMap(
                "horizon map must start and end at the same elevation".to_string(),
            ));
        }
        if !points.windows(2).all(|w| w[1].0 > w[0].0) {
            return Err(RotatorError::InvalidHorizonMap(
                "horizon map azimuth values must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { points })
    }

    /// Minimum elevation at `az` (degrees, wrapped into `[0, 360)`), by
    /// linear interpolation between bracketing map points.
    pub fn min_elevation_at(&self, az: f64) -> f64 {
        let az = az.rem_euclid(360.0);
        for window in self.points.windows(2) {
            let (az0, el0) = window[0];
            let (az1, el1) = window[1];
            if az >= az0 && az <= az1 {
                let frac = if (az1 - az0).abs() < 1e-12 { 0.0 } else { (az - az0) / (az1 - az0) };
                return el0 + frac * (el1 - el0);
            }
        }
        self.points.last().expect("validated non-empty").1
    }
}

/// Allowed pointing range, motor frame (spec §4.I: `az_min in [-90, 450],
/// az_max <= 450, el in [0, 90]`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotatorLimits {
    /// Minimum motor azimuth, degrees.
    pub az_min: f64,
    /// Maximum motor azimuth, degrees.
    pub az_max: f64,
    /// Minimum motor elevation, degrees.
    pub el_min: f64,
    /// Maximum motor elevation, degrees.
    pub el_max: f64,
}

impl Default for RotatorLimits {
    fn default() -> Self {
        Self { az_min: -90.0, az_max: 450.0, el_min: 0.0, el_max: 90.0 }
    }
}

/// Static configuration for one rotator instance (spec §4.I).
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Hardware address/connection string, driver-specific.
    pub address: String,
    /// Allowed pointing range.
    pub limits: RotatorLimits,
    /// Real-to-motor coordinate transform.
    pub model: AzElRotator,
    /// Optional terrain obstruction table.
    pub horizon_map: Option<HorizonMap>,
    /// Minimum allowed angular separation from the Sun, degrees.
    pub min_sun_angle: Option<f64>,
}

/// The effective minimum elevation at `az`, combining the horizon map (if
/// any) with the configured `el_min` (spec §4.I "enforce horizon").
fn az_dependent_min_el(config: &RotatorConfig, az: f64) -> f64 {
    match &config.horizon_map {
        Some(map) => map.min_elevation_at(az).max(config.limits.el_min),
        None => config.limits.el_min,
    }
}

/// Sun angular separation (degrees) from pointing `(az, el)`, plus the
/// Sun's own topocentric azimuth/elevation, needed by Sun avoidance and
/// `rpc.status` (spec §4.I).
pub fn sun_angle_deg(gs: GroundStation, az: f64, el: f64, now: crate::domain_types::Timestamp) -> (f64, f64, f64) {
    let (sun_az, sun_el) = sun_topocentric(gs, now);
    let angle = angle_between_el_az_deg(az, el, sun_az, sun_el);
    (angle, sun_az, sun_el)
}

fn spherical_to_cartesian(az_deg: f64, el_deg: f64) -> [f64; 3] {
    let az = az_deg.to_radians();
    let el = el_deg.to_radians();
    [el.cos() * az.cos(), el.cos() * az.sin(), el.sin()]
}

/// Great-circle angle between two (az, el) directions, degrees.
pub fn angle_between_el_az_deg(az1: f64, el1: f64, az2: f64, el2: f64) -> f64 {
    let v1 = spherical_to_cartesian(az1, el1);
    let v2 = spherical_to_cartesian(az2, el2);
    let dot = v1[0] * v2[0] + v1[1] * v2[1] + v1[2] * v2[2];
    let norm1 = (v1[0] * v1[0] + v1[1] * v1[1] + v1[2] * v1[2]).sqrt();
    let norm2 = (v2[0] * v2[0] + v2[1] * v2[1] + v2[2] * v2[2]).sqrt();
    (dot / (norm1 * norm2)).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Validates `(az, el)` (real-sky degrees) against `config`'s limits,
/// horizon map, and Sun avoidance (spec §8 property 6).
pub fn position_valid(
    config: &RotatorConfig,
    gs: Option<GroundStation>,
    az: f64,
    el: f64,
    now: crate::domain_types::Timestamp,
) -> Result<(), RotatorError> {
    let (motor_az, motor_el) = config.model.to_motor(az, el);

    if motor_az < config.limits.az_min || motor_az > config.limits.az_max {
        return Err(RotatorError::AzimuthOutOfRange {
            az,
            motor_az,
            az_min: config.limits.az_min,
            az_max: config.limits.az_max,
        });
    }

    let effective_el_min = az_dependent_min_el(config, az);
    if el < effective_el_min || motor_el < config.limits.el_min || motor_el > config.limits.el_max {
        return Err(RotatorError::ElevationOutOfRange {
            el,
            motor_el,
            el_min: effective_el_min.max(config.limits.el_min),
            el_max: config.limits.el_max,
        });
    }

    if let (Some(min_sun_angle), Some(gs)) = (config.min_sun_angle, gs) {
        let (sun_angle, _, _) = sun_angle_deg(gs, az, el, now);
        if sun_angle < min_sun_angle {
            return Err(RotatorError::SunAvoidance { actual: sun_angle, min_sun_angle });
        }
    }

    Ok(())
}

/// Clamps `(az, el)` to the closest position satisfying azimuth/elevation
/// limits, the horizon map, and Sun avoidance, by iteratively stepping 2°
/// away from the Sun (spec §4.I "Target acceptance").
pub fn closest_valid_position(
    config: &RotatorConfig,
    gs: Option<GroundStation>,
    mut az: f64,
    mut el: f64,
    now: crate::domain_types::Timestamp,
) -> (f64, f64) {
    let effective_el_min = az_dependent_min_el(config, az);
    el = el.max(effective_el_min);

    let (motor_az, motor_el) = config.model.to_motor(az, el);
    let motor_az = motor_az.clamp(config.limits.az_min, config.limits.az_max);
    let motor_el = motor_el.clamp(config.limits.el_min, config.limits.el_max);
    (az, el) = config.model.to_real(motor_az, motor_el);

    if let (Some(min_sun_angle), Some(gs)) = (config.min_sun_angle, gs) {
        for _ in 0..180 {
            let (sun_angle, sun_az, sun_el) = sun_angle_deg(gs, az, el, now);
            if sun_angle >= min_sun_angle {
                break;
            }
            let step_az = if az > sun_az { 2.0 } else { -2.0 };
            let step_el = if el > sun_el { 2.0 } else { -2.0 };
            az += step_az;
            el += step_el;
        }
    }

    (az, el)
}

/// Hardware driver abstraction (spec §4.I). Implementations perform the
/// actual serial/socket I/O; `RotatorModule` enforces safe-zone and Sun
/// avoidance around every call.
#[async_trait]
pub trait RotatorController: Send + Sync {
    /// Stops rotator movement.
    async fn stop(&mut self) -> Result<(), RotatorError>;

    /// Reads back the current motor-frame position.
    async fn get_position(&mut self) -> Result<(f64, f64), RotatorError>;

    /// Commands a motor-frame move.
    async fn set_position(&mut self, az: f64, el: f64, shortest_path: bool) -> Result<(), RotatorError>;

    /// Whether the hardware reports itself as currently moving.
    async fn is_moving(&mut self) -> Result<bool, RotatorError>;

    /// Resets the hardware's notion of current position without moving it.
    async fn reset_position(&mut self, az: f64, el: f64) -> Result<(), RotatorError>;

    /// Reads back the azimuth/elevation duty-cycle range.
    async fn get_dutycycle_range(&mut self) -> Result<(u8, u8, u8, u8), RotatorError>;

    /// Sets the azimuth/elevation duty-cycle range.
    async fn set_dutycycle_range(
        &mut self,
        az_min: Option<u8>,
        az_max: Option<u8>,
        el_min: Option<u8>,
        el_max: Option<u8>,
    ) -> Result<(), RotatorError>;
}

/// An in-memory driver with no real hardware, used for integration tests
/// and as a reference implementation of the [`RotatorController`] trait.
pub struct DummyRotator {
    position: (f64, f64),
    target: (f64, f64),
    duty: (u8, u8, u8, u8),
    moving: bool,
}

impl Default for DummyRotator {
    fn default() -> Self {
        Self { position: (0.0, 0.0), target: (0.0, 0.0), duty: (20, 60, 20, 60), moving: false }
    }
}

#[async_trait]
impl RotatorController for DummyRotator {
    async fn stop(&mut self) -> Result<(), RotatorError> {
        self.moving = false;
        Ok(())
    }

    async fn get_position(&mut self) -> Result<(f64, f64), RotatorError> {
        // A real driver polls hardware; the dummy just snaps straight to
        // target to keep control-loop tests deterministic.
        self.position = self.target;
        self.moving = false;
        Ok(self.position)
    }

    async fn set_position(&mut self, az: f64, el: f64, _shortest_path: bool) -> Result<(), RotatorError> {
        self.target = (az, el);
        self.moving = true;
        Ok(())
    }

    async fn is_moving(&mut self) -> Result<bool, RotatorError> {
        Ok(self.moving)
    }

    async fn reset_position(&mut self, az: f64, el: f64) -> Result<(), RotatorError> {
        self.position = (az, el);
        self.target = (az, el);
        Ok(())
    }

    async fn get_dutycycle_range(&mut self) -> Result<(u8, u8, u8, u8), RotatorError> {
        Ok(self.duty)
    }

    async fn set_dutycycle_range(
        &mut self,
        az_min: Option<u8>,
        az_max: Option<u8>,
        el_min: Option<u8>,
        el_max: Option<u8>,
    ) -> Result<(), RotatorError> {
        let (mut a0, mut a1, mut e0, mut e1) = self.duty;
        if let Some(v) = az_min {
            a0 = v;
        }
        if let Some(v) = az_max {
            a1 = v;
        }
        if let Some(v) = el_min {
            e0 = v;
        }
        if let Some(v) = el_max {
            e1 = v;
        }
        self.duty = (a0, a1, e0, e1);
        Ok(())
    }
}

const POSITION_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const ACCURACY_DEG: f64 = 0.1;
const DEFAULT_DUTYCYCLE_PCT: u8 = 60;
const PREAOS_DUTYCYCLE_PCT: u8 = 100;

/// `tracking` mode reported by `rpc.status` (spec §4.I "timeout | tracking
/// | manual").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// No fresh pointing has arrived within the freshness window.
    Timeout,
    /// Consuming tracker-published pointings automatically.
    Tracking,
    /// Operator has taken manual control.
    Manual,
}

/// `rpc.status` response payload (spec §4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotatorStatus {
    /// Current real-sky azimuth, degrees.
    pub az: f64,
    /// Current real-sky elevation, degrees.
    pub el: f64,
    /// Commanded azimuth, degrees.
    pub az_target: f64,
    /// Commanded elevation, degrees.
    pub el_target: f64,
    /// Current tracking mode.
    pub tracking: TrackingMode,
    /// Whether the hardware reports itself as moving.
    pub rotating: bool,
    /// Sun azimuth, degrees, if `min_sun_angle` is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub az_sun: Option<f64>,
    /// Sun elevation, degrees, if `min_sun_angle` is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub el_sun: Option<f64>,
    /// Current angular separation from the Sun, degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sun_angle: Option<f64>,
    /// Configured minimum Sun separation, degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sun_angle: Option<f64>,
}

/// Runs the control loop and RPC surface for one rotator instance
/// (spec §4.I).
pub struct RotatorModule {
    config: RotatorConfig,
    gs: Option<GroundStation>,
    driver: Box<dyn RotatorController>,
    target: Option<(f64, f64)>,
    last_auto_pointing_at: Option<Instant>,
    /// Last hardware-queried motor-frame position and when it was fetched,
    /// reused by `tick` while still within `POSITION_UPDATE_INTERVAL` (spec
    /// §4.I control-loop step 1). Distinct from `last_auto_pointing_at`,
    /// which tracks auto-commanded pointing rather than hardware reads.
    cached_position: Option<(Instant, f64, f64)>,
    mode: TrackingMode,
    dutycycle_pct: u8,
    calibration_history: VecDeque<String>,
}

const CALIBRATION_HISTORY_CAPACITY: usize = 50;

impl RotatorModule {
    /// Builds a module around `driver`, configured per `config`.
    pub fn new(config: RotatorConfig, gs: Option<GroundStation>, driver: Box<dyn RotatorController>) -> Self {
        Self {
            config,
            gs,
            driver,
            target: None,
            last_auto_pointing_at: None,
            cached_position: None,
            mode: TrackingMode::Timeout,
            dutycycle_pct: DEFAULT_DUTYCYCLE_PCT,
            calibration_history: VecDeque::with_capacity(CALIBRATION_HISTORY_CAPACITY),
        }
    }

    /// `rpc.rotate {az, el, shortest?}`: clamps the target to the closest
    /// valid position and commands the hardware (spec §4.I, §8 property 6).
    #[instrument(skip(self))]
    pub async fn rotate(&mut self, az: f64, el: f64, shortest: bool, now: crate::domain_types::Timestamp) -> Result<(f64, f64), RotatorError> {
        let (clamped_az, clamped_el) = closest_valid_position(&self.config, self.gs, az, el, now);
        let (motor_az, motor_el) = self.config.model.to_motor(clamped_az, clamped_el);
        self.driver.set_position(motor_az, motor_el, shortest).await?;
        self.target = Some((clamped_az, clamped_el));
        self.mode = TrackingMode::Manual;
        Ok((clamped_az, clamped_el))
    }

    /// `rpc.stop`.
    pub async fn stop(&mut self) -> Result<(), RotatorError> {
        self.driver.stop().await
    }

    /// `rpc.tracking {mode}`: switches auto-target consumption on or off.
    pub fn set_tracking_mode(&mut self, mode: TrackingMode) {
        self.mode = mode;
    }

    /// `rpc.reset_position {az, el}`: resets the hardware's notion of
    /// current position and appends a calibration-history audit line.
    pub async fn reset_position(&mut self, az: f64, el: f64) -> Result<(), RotatorError> {
        let (motor_az, motor_el) = self.config.model.to_motor(az, el);
        self.driver.reset_position(motor_az, motor_el).await?;
        if self.calibration_history.len() == CALIBRATION_HISTORY_CAPACITY {
            self.calibration_history.pop_front();
        }
        self.calibration_history.push_back(format!("reset_position az={az:.2} el={el:.2}"));
        Ok(())
    }

    /// `rpc.get_position_target`.
    pub fn get_position_target(&self) -> Option<(f64, f64)> {
        self.target
    }

    /// `rpc.get_position_range`.
    pub fn get_position_range(&self) -> RotatorLimits {
        self.config.limits
    }

    /// `rpc.set_position_range`.
    pub fn set_position_range(&mut self, limits: RotatorLimits) {
        self.config.limits = limits;
    }

    /// `rpc.get_dutycycle_range`.
    pub async fn get_dutycycle_range(&mut self) -> Result<(u8, u8, u8, u8), RotatorError> {
        self.driver.get_dutycycle_range().await
    }

    /// `rpc.set_dutycycle_range`.
    pub async fn set_dutycycle_range(
        &mut self,
        az_min: Option<u8>,
        az_max: Option<u8>,
        el_min: Option<u8>,
        el_max: Option<u8>,
    ) -> Result<(), RotatorError> {
        self.driver.set_dutycycle_range(az_min, az_max, el_min, el_max).await
    }

    /// Reacts to a `preaos` event: picks an initial sweep-biased azimuth,
    /// raises the azimuth duty cycle to 100%, and commands the long path to
    /// it (spec §4.I "Event reactions").
    #[instrument(skip(self))]
    pub async fn on_preaos(&mut self, az_aos: f64, az_max: f64, el_min: f64) -> Result<(), RotatorError> {
        let initial_az = initial_sweep_azimuth(az_aos, az_max);
        self.dutycycle_pct = PREAOS_DUTYCYCLE_PCT;
        self.driver.set_dutycycle_range(Some(self.dutycycle_pct), Some(self.dutycycle_pct), None, None).await?;
        let (motor_az, motor_el) = self.config.model.to_motor(initial_az, el_min.max(0.0));
        // Long path: commands the far side of the sweep so the rotator
        // arrives already moving in the pass direction.
        self.driver.set_position(motor_az, motor_el, false).await?;
        self.target = Some((initial_az, el_min.max(0.0)));
        Ok(())
    }

    /// Reacts to `aos`: restores the default duty cycle.
    pub async fn on_aos(&mut self) -> Result<(), RotatorError> {
        self.dutycycle_pct = DEFAULT_DUTYCYCLE_PCT;
        self.driver.set_dutycycle_range(Some(self.dutycycle_pct), Some(self.dutycycle_pct), None, None).await?;
        Ok(())
    }

    /// Reacts to `los`: commands a stop.
    pub async fn on_los(&mut self) -> Result<(), RotatorError> {
        self.driver.stop().await
    }

    /// One control-loop iteration (spec §4.I "Control loop", 1-2 s cadence).
    #[instrument(skip(self))]
    pub async fn tick(&mut self, now: crate::domain_types::Timestamp) -> Result<RotatorStatus, RotatorError> {
        let fresh = self.cached_position.is_some_and(|(fetched_at, _, _)| fetched_at.elapsed() < POSITION_UPDATE_INTERVAL);

        let (motor_az, motor_el) = if let Some((_, motor_az, motor_el)) = self.cached_position.filter(|_| fresh) {
            (motor_az, motor_el)
        } else {
            let position = self.driver.get_position().await?;
            self.cached_position = Some((Instant::now(), position.0, position.1));
            position
        };
        let (az, el) = self.config.model.to_real(motor_az, motor_el);

        if let Some((target_az, target_el)) = self.target {
            let moving = self.driver.is_moving().await?;
            let drifted = !moving && ((target_az - az).abs() > ACCURACY_DEG || (target_el - el).abs() > ACCURACY_DEG);
            if drifted {
                let (motor_az, motor_el) = self.config.model.to_motor(target_az, target_el);
                self.driver.set_position(motor_az, motor_el, true).await?;
                self.cached_position = None;
            }

            if position_valid(&self.config, self.gs, az, el, now).is_err() {
                let (valid_az, valid_el) = closest_valid_position(&self.config, self.gs, az, el, now);
                let (motor_az, motor_el) = self.config.model.to_motor(valid_az, valid_el);
                self.driver.set_position(motor_az, motor_el, true).await?;
                self.cached_position = None;
                warn!(target_az, target_el, "operator target left the safe zone; recovering to closest valid position");
                self.target = None;
            }
        }

        let rotating = self.driver.is_moving().await?;
        let (az_target, el_target) = self.target.unwrap_or((az, el));

        let (az_sun, el_sun, sun_angle) = match self.gs {
            Some(gs) if self.config.min_sun_angle.is_some() => {
                let (angle, sun_az, sun_el) = sun_angle_deg(gs, az, el, now);
                (Some(sun_az), Some(sun_el), Some(angle))
            }
            _ => (None, None, None),
        };

        Ok(RotatorStatus {
            az,
            el,
            az_target,
            el_target,
            tracking: self.mode,
            rotating,
            az_sun,
            el_sun,
            sun_angle,
            min_sun_angle: self.config.min_sun_angle,
        })
    }

    /// Consumes a tracker-published pointing while in automatic mode
    /// (spec §2 data flow: "rotator modules consume pointings").
    pub async fn on_tracked_pointing(&mut self, az: f64, el: f64, now: crate::domain_types::Timestamp) -> Result<(), RotatorError> {
        if self.mode != TrackingMode::Manual {
            self.mode = TrackingMode::Tracking;
            self.last_auto_pointing_at = Some(Instant::now());
            let (clamped_az, clamped_el) = closest_valid_position(&self.config, self.gs, az, el, now);
            let (motor_az, motor_el) = self.config.model.to_motor(clamped_az, clamped_el);
            self.driver.set_position(motor_az, motor_el, true).await?;
            self.target = Some((clamped_az, clamped_el));
        }
        Ok(())
    }

    /// Read-only access to the recorded calibration history.
    pub fn calibration_history(&self) -> impl Iterator<Item = &str> {
        self.calibration_history.iter().map(String::as_str)
    }
}

/// Picks an initial azimuth within the full `[-90, 450]` range, biased so
/// the rotator sweeps the pass in one direction (spec §4.I "Event
/// reactions: preaos"):
/// - if the arc straddles north and the max-elevation azimuth is > 180°,
///   shift an AOS in `[0, 90]` up by 360° so the rotator approaches from
///   the high end;
/// - the symmetric case applies for the opposite crossing.
fn initial_sweep_azimuth(az_aos: f64, az_max: f64) -> f64 {
    if (0.0..=90.0).contains(&az_aos) && az_max > 180.0 {
        az_aos + 360.0
    } else if (270.0..=360.0).contains(&az_aos) && az_max < 180.0 {
        az_aos - 360.0
    } else {
        az_aos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn helsinki() -> GroundStation {
        GroundStation { latitude_deg: 60.18, longitude_deg: 24.83, elevation_m: 40.0 }
    }

    fn plain_config() -> RotatorConfig {
        RotatorConfig {
            address: "dummy://".to_string(),
            limits: RotatorLimits::default(),
            model: AzElRotator::default(),
            horizon_map: None,
            min_sun_angle: None,
        }
    }

    fn now() -> crate::domain_types::Timestamp {
        Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn horizon_map_rejects_non_monotone_azimuth() {
        let points = vec![(0.0, 5.0), (10.0, 6.0), (5.0, 7.0), (360.0, 5.0)];
        assert!(HorizonMap::new(points).is_err());
    }

    #[test]
    fn horizon_map_interpolates_linearly() {
        let map = HorizonMap::new(vec![(0.0, 0.0), (180.0, 10.0), (360.0, 0.0)]).unwrap();
        assert!((map.min_elevation_at(90.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn position_valid_rejects_out_of_range_azimuth() {
        let config = plain_config();
        let err = position_valid(&config, None, 500.0, 45.0, now()).unwrap_err();
        assert!(matches!(err, RotatorError::AzimuthOutOfRange { .. }));
    }

    #[test]
    fn closest_valid_position_clamps_into_range() {
        let mut config = plain_config();
        config.limits.az_max = 180.0;
        let (az, el) = closest_valid_position(&config, None, 270.0, 45.0, now());
        assert!(az <= 180.0 + 1e-6);
        assert!(position_valid(&config, None, az, el, now()).is_ok());
    }

    #[test]
    fn sun_avoidance_pushes_away_from_sun() {
        let gs = helsinki();
        let mut config = plain_config();
        config.min_sun_angle = Some(10.0);
        let t = now();
        let (_, sun_az, sun_el) = sun_angle_deg(gs, 0.0, 0.0, t);
        let (az, el) = closest_valid_position(&config, Some(gs), sun_az, sun_el, t);
        let (final_angle, _, _) = sun_angle_deg(gs, az, el, t);
        assert!(final_angle >= 10.0 - 1e-6);
    }

    #[test]
    fn initial_sweep_azimuth_shifts_across_north() {
        assert!((initial_sweep_azimuth(45.0, 200.0) - 405.0).abs() < 1e-9);
        assert!((initial_sweep_azimuth(300.0, 100.0) - (-60.0)).abs() < 1e-9);
        assert!((initial_sweep_azimuth(120.0, 150.0) - 120.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rotate_clamps_and_commands_the_dummy_driver() {
        let config = plain_config();
        let mut module = RotatorModule::new(config, None, Box::new(DummyRotator::default()));
        let (az, el) = module.rotate(400.0, 45.0, true, now()).await.unwrap();
        assert!((az - 400.0).abs() < 1e-6 || az <= 450.0);
        assert!(el <= 90.0);
    }

    #[tokio::test]
    async fn reset_position_appends_calibration_history() {
        let config = plain_config();
        let mut module = RotatorModule::new(config, None, Box::new(DummyRotator::default()));
        module.reset_position(10.0, 20.0).await.unwrap();
        assert_eq!(module.calibration_history().count(), 1);
    }

    #[tokio::test]
    async fn tick_reports_status_without_a_target() {
        let config = plain_config();
        let mut module = RotatorModule::new(config, None, Box::new(DummyRotator::default()));
        let status = module.tick(now()).await.unwrap();
        assert_eq!(status.tracking, TrackingMode::Timeout);
        assert!(!status.rotating);
    }
}
