//! 4.F Pass-prediction core: groundstation-relative rise/max/set event
//! discovery, with optional sunlit/darkness visibility predicates.

pub mod target;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use sgp4::Constants;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::domain_types::Timestamp;

pub use target::{GroundStation, Target, Tle};
use target::TargetError;

/// Errors raised while predicting passes.
#[derive(Error, Debug)]
pub enum PredictError {
    /// Resolving the target's position failed.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// `t1 <= t0`.
    #[error("prediction window is empty or inverted: t0={t0}, t1={t1}")]
    EmptyWindow {
        /// Requested window start.
        t0: Timestamp,
        /// Requested window end.
        t1: Timestamp,
    },
}

/// Lifecycle status shared by a predicted [`Pass`] and the orbit tracker's
/// state machine (spec §4.H: `DISABLED → WAITING → AOS → TRACKING → LOS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassStatus {
    /// No target is being tracked.
    Disabled,
    /// A target is set; its pass has not yet begun.
    Waiting,
    /// Within `preaos_time` of acquisition.
    Aos,
    /// Above the horizon and being actively tracked.
    Tracking,
    /// Just dropped below the horizon.
    Los,
}

/// One rise/max/set event triple for a target, as seen from one
/// groundstation (spec §3 `Pass`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass {
    /// Name of the tracked object.
    pub object_name: String,
    /// Name of the observing groundstation.
    pub groundstation: String,
    /// Current lifecycle status of this pass.
    pub status: PassStatus,
    /// Acquisition-of-signal time.
    pub t_aos: Timestamp,
    /// Azimuth at AOS, degrees.
    pub az_aos: f64,
    /// Elevation at AOS, degrees.
    pub el_aos: f64,
    /// Time of peak elevation.
    pub t_max: Timestamp,
    /// Azimuth at peak elevation, degrees.
    pub az_max: f64,
    /// Peak elevation, degrees.
    pub el_max: f64,
    /// Loss-of-signal time.
    pub t_los: Timestamp,
    /// Azimuth at LOS, degrees.
    pub az_los: f64,
    /// Elevation at LOS, degrees.
    pub el_los: f64,
}

impl Pass {
    /// A pass is valid iff its peak clears the configured minimum and LOS
    /// strictly follows AOS (spec §3, §8 property 5).
    pub fn is_valid(&self, min_max_elevation: f64) -> bool {
        self.el_max >= min_max_elevation && self.t_los > self.t_aos
    }
}

/// Visibility predicates and search tuning for [`find_passes`] (spec §4.F).
#[derive(Debug, Clone, Copy)]
pub struct PassQuery {
    /// Minimum elevation required throughout the pass interior, degrees.
    pub min_elevation: f64,
    /// Minimum required peak elevation, degrees.
    pub min_max_elevation: f64,
    /// Darkness predicate: observer-side Sun elevation must stay below this.
    pub sun_max_elevation: Option<f64>,
    /// Sunlit predicate: target illumination must match this boolean.
    pub obj_sunlit: Option<bool>,
    /// Whether to include a partial trailing pass whose LOS falls beyond `t1`.
    pub partial_trailing: bool,
    /// "Accurate" mode consults the solar ephemeris for sunlit/darkness
    /// predicates; "fast" mode is pure line-of-sight geometry and rejects
    /// those predicates if set (spec §4.F "Accuracy modes").
    pub accurate: bool,
}

impl Default for PassQuery {
    fn default() -> Self {
        Self {
            min_elevation: 0.0,
            min_max_elevation: 0.0,
            sun_max_elevation: None,
            obj_sunlit: None,
            partial_trailing: false,
            accurate: false,
        }
    }
}

const SECOND: f64 = 1.0 / 86_400.0; // one second, expressed in days

/// `masked_elevation(t)`: true elevation where every visibility predicate
/// holds, else elevation pushed 180° below the horizon so it never wins a
/// maxima search (spec §4.F step 1).
fn masked_elevation(
    target: &Target,
    gs: GroundStation,
    elements: Option<&Constants>,
    query: &PassQuery,
    t: Timestamp,
) -> Result<f64, PredictError> {
    let (_, el) = target.topocentric(gs, t, elements)?;
    if is_visible(target, gs, elements, query, t, el)? {
        Ok(el)
    } else {
        Ok(el - 180.0)
    }
}

fn is_visible(
    target: &Target,
    gs: GroundStation,
    elements: Option<&Constants>,
    query: &PassQuery,
    t: Timestamp,
    el: f64,
) -> Result<bool, PredictError> {
    if el <= query.min_elevation {
        return Ok(false);
    }
    if let Some(max_sun_el) = query.sun_max_elevation {
        let (_, sun_el) = target::sun_topocentric(gs, t);
        if sun_el >= max_sun_el {
            return Ok(false);
        }
    }
    if let Some(want_sunlit) = query.obj_sunlit {
        let sunlit = target.is_sunlit(t, elements)?;
        if sunlit != want_sunlit {
            return Ok(false);
        }
    }
    let _ = el; // kept for clarity at call sites above
    Ok(true)
}

/// Golden-section search for a single interior maximum of `f` on
/// `[lo, hi]`, refined to `tol_days` (spec §4.F step 3, 0.5 s tolerance).
fn golden_section_max<F>(mut lo: f64, mut hi: f64, tol_days: f64, mut f: F) -> Result<(f64, f64), PredictError>
where
    F: FnMut(f64) -> Result<f64, PredictError>,
{
    const INV_PHI: f64 = 0.618_033_988_749_895;
    let mut c = hi - INV_PHI * (hi - lo);
    let mut d = lo + INV_PHI * (hi - lo);
    let mut fc = f(c)?;
    let mut fd = f(d)?;

    while (hi - lo).abs() > tol_days {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - INV_PHI * (hi - lo);
            fc = f(c)?;
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + INV_PHI * (hi - lo);
            fd = f(d)?;
        }
    }

    let t_mid = (lo + hi) / 2.0;
    let f_mid = f(t_mid)?;
    Ok((t_mid, f_mid))
}

/// Finds every local maximum of `masked_elevation` on `[t0, t1]` by
/// sampling at `step_days` and golden-sectioning each bracketed rise/fall.
fn find_maxima<F>(t0: f64, t1: f64, step_days: f64, mut f: F) -> Result<Vec<(f64, f64)>, PredictError>
where
    F: FnMut(f64) -> Result<f64, PredictError>,
{
    let mut samples = Vec::new();
    let mut t = t0;
    while t <= t1 {
        samples.push((t, f(t)?));
        t += step_days;
    }
    if *samples.last().map(|(t, _)| t).unwrap_or(&t0) < t1 {
        samples.push((t1, f(t1)?));
    }

    let mut maxima = Vec::new();
    for window in samples.windows(3) {
        let (a, fa) = window[0];
        let (b, fb) = window[1];
        let (c, fc) = window[2];
        if fb >= fa && fb >= fc && !(fa == fb && fb == fc) {
            let (t_max, el_max) = golden_section_max(a, c, 0.5 * SECOND, &mut f)?;
            maxima.push((t_max, el_max));
        }
    }
    Ok(maxima)
}

/// Bisects for the zero crossing of `predicate` (true → false or vice
/// versa) between `lo` and `hi`, refined to `tol_days` (spec §4.F step 5).
fn bisect_crossing<F>(mut lo: f64, mut hi: f64, tol_days: f64, mut predicate: F) -> Result<f64, PredictError>
where
    F: FnMut(f64) -> Result<bool, PredictError>,
{
    let lo_visible = predicate(lo)?;
    while (hi - lo).abs() > tol_days {
        let mid = (lo + hi) / 2.0;
        if predicate(mid)? == lo_visible {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok((lo + hi) / 2.0)
}

fn days_since_epoch(t: Timestamp, epoch: Timestamp) -> f64 {
    (t - epoch).num_milliseconds() as f64 / 86_400_000.0
}

fn epoch_plus_days(epoch: Timestamp, days: f64) -> Timestamp {
    epoch + ChronoDuration::milliseconds((days * 86_400_000.0).round() as i64)
}

/// Event kind at a given time, for the merge/walk in [`find_passes`]
/// (spec §4.F step 6-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Aos,
    Max,
    Los,
}

/// Sort rank used when two events land at the same instant: AOS before
/// Max before LOS, matching the source's `(jd, v)` ordering.
fn kind_rank(kind: Kind) -> u8 {
    match kind {
        Kind::Aos => 0,
        Kind::Max => 1,
        Kind::Los => 2,
    }
}

/// Finds every complete pass of `target` as seen from `gs` within
/// `[t0, t1]`, subject to `query` (spec §4.F).
#[instrument(skip(target, query), fields(t0 = %t0, t1 = %t1))]
pub fn find_passes(
    object_name: &str,
    groundstation_name: &str,
    target: &Target,
    gs: GroundStation,
    t0: Timestamp,
    t1: Timestamp,
    query: &PassQuery,
) -> Result<Vec<Pass>, PredictError> {
    if t1 <= t0 {
        return Err(PredictError::EmptyWindow { t0, t1 });
    }

    let elements = match target {
        Target::Orbit(tle) => Some(
            Constants::from_elements(&tle.elements()?)
                .map_err(|source| TargetError::InvalidTle { name: tle.name.clone(), source })?,
        ),
        Target::FixedRaDec { .. } => None,
    };

    let orbits_per_day = match target {
        Target::Orbit(tle) => tle.orbits_per_day()?,
        Target::FixedRaDec { .. } => 1.0, // one "pass" per sidereal day
    };
    let step_days = (0.25_f64).min(0.05 / orbits_per_day.max(1.0));

    let epoch = t0;
    let t0_d = 0.0;
    let t1_d = days_since_epoch(t1, epoch);

    let eval = |days: f64| -> Result<f64, PredictError> {
        masked_elevation(target, gs, elements.as_ref(), query, epoch_plus_days(epoch, days))
    };

    let maxima = find_maxima(t0_d, t1_d, step_days, eval)?;
    let surviving: Vec<(f64, f64)> =
        maxima.into_iter().filter(|(_, el)| *el >= query.min_max_elevation).collect();

    if surviving.is_empty() {
        return Ok(Vec::new());
    }

    // Bracket each maximum with its neighbors (and the window edges) to
    // bisect the rise/set crossing between them (spec §4.F step 5).
    let mut brackets: Vec<f64> = vec![t0_d];
    brackets.extend(surviving.iter().map(|(t, _)| *t));
    brackets.push(t1_d);

    let mut events: Vec<(f64, Kind)> = surviving.iter().map(|(t, _)| (*t, Kind::Max)).collect();

    let visible_at = |days: f64| -> Result<bool, PredictError> {
        let (_, el) = target.topocentric(gs, epoch_plus_days(epoch, days), elements.as_ref())?;
        is_visible(target, gs, elements.as_ref(), query, epoch_plus_days(epoch, days), el)
    };

    for pair in brackets.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if (right - left).abs() < SECOND {
            continue;
        }
        let left_visible = visible_at(left)?;
        let right_visible = visible_at(right)?;
        if left_visible != right_visible {
            let crossing = bisect_crossing(left, right, 0.5 * SECOND, visible_at)?;
            let kind = if right_visible { Kind::Aos } else { Kind::Los };
            events.push((crossing, kind));
        }
    }

    events.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(kind_rank(a.1).cmp(&kind_rank(b.1))));

    // If the sequence opens with a Max, the target is already up at t0:
    // synthesize an AOS just before the window (spec §4.F step 6).
    if matches!(events.first(), Some((_, Kind::Max))) {
        events.insert(0, (t0_d - SECOND, Kind::Aos));
    }
    // If it ends with a Max and trailing partials are wanted, synthesize a
    // LOS just past the window.
    if query.partial_trailing && matches!(events.last(), Some((_, Kind::Max))) {
        events.push((t1_d + SECOND, Kind::Los));
    }

    // Walk the event sequence, only emitting complete AOS/Max/LOS triples
    // (spec §4.F step 7); keep the highest Max seen between AOS and LOS.
    let mut passes = Vec::new();
    let mut t_aos: Option<f64> = None;
    let mut t_max: Option<f64> = None;
    let mut el_max = f64::NEG_INFINITY;

    for (days, kind) in &events {
        match kind {
            Kind::Aos => {
                t_aos = Some(*days);
                t_max = None;
                el_max = f64::NEG_INFINITY;
            }
            Kind::Max => {
                if t_aos.is_some() {
                    let (_, el) = target.topocentric(gs, epoch_plus_days(epoch, *days), elements.as_ref())?;
                    if el > el_max {
                        el_max = el;
                        t_max = Some(*days);
                    }
                }
            }
            Kind::Los => {
                if let (Some(aos), Some(max)) = (t_aos, t_max) {
                    let t_aos_ts = epoch_plus_days(epoch, aos);
                    let t_max_ts = epoch_plus_days(epoch, max);
                    let t_los_ts = epoch_plus_days(epoch, *days);
                    let (az_aos, el_aos) = target.topocentric(gs, t_aos_ts, elements.as_ref())?;
                    let (az_max, _) = target.topocentric(gs, t_max_ts, elements.as_ref())?;
                    let (az_los, el_los) = target.topocentric(gs, t_los_ts, elements.as_ref())?;

                    let pass = Pass {
                        object_name: object_name.to_string(),
                        groundstation: groundstation_name.to_string(),
                        status: PassStatus::Waiting,
                        t_aos: t_aos_ts,
                        az_aos,
                        el_aos,
                        t_max: t_max_ts,
                        az_max,
                        el_max,
                        t_los: t_los_ts,
                        az_los,
                        el_los,
                    };

                    if sanity_check(&pass, orbits_per_day) {
                        passes.push(pass);
                    }
                }
                t_aos = None;
                t_max = None;
                el_max = f64::NEG_INFINITY;
            }
        }
    }

    Ok(passes)
}

/// Rejects a pass whose duration exceeds half the orbital period, logging
/// a diagnostic (spec §4.F "Sanity", §7 "Pass-prediction degenerate").
fn sanity_check(pass: &Pass, orbits_per_day: f64) -> bool {
    let half_period_secs = (86_400.0 / orbits_per_day.max(1e-6)) / 2.0;
    let duration_secs = (pass.t_los - pass.t_aos).num_milliseconds() as f64 / 1000.0;
    if duration_secs > half_period_secs {
        warn!(
            object = %pass.object_name,
            duration_secs,
            half_period_secs,
            "dropping pass: duration exceeds half the orbital period"
        );
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn golden_section_finds_known_parabola_maximum() {
        let (t, v) = golden_section_max(0.0, 10.0, 1e-9, |x| Ok(-(x - 3.0).powi(2) + 5.0)).unwrap();
        assert!((t - 3.0).abs() < 1e-4);
        assert!((v - 5.0).abs() < 1e-6);
    }

    #[test]
    fn bisect_crossing_finds_sign_change() {
        let t = bisect_crossing(0.0, 10.0, 1e-9, |x| Ok(x < 4.5)).unwrap();
        assert!((t - 4.5).abs() < 1e-4);
    }

    #[test]
    fn empty_window_is_rejected() {
        let target = Target::Orbit(iss_tle());
        let t0 = Utc.with_ymd_and_hms(2024, 12, 10, 12, 0, 0).unwrap();
        let err = find_passes("ISS", "helsinki", &target, helsinki(), t0, t0, &PassQuery::default()).unwrap_err();
        assert!(matches!(err, PredictError::EmptyWindow { .. }));
    }

    #[test]
    fn every_returned_pass_satisfies_ordering_and_elevation_invariants() {
        let target = Target::Orbit(iss_tle());
        let t0 = Utc.with_ymd_and_hms(2024, 12, 10, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 12, 11, 0, 0, 0).unwrap();
        let query = PassQuery { min_elevation: 0.0, min_max_elevation: 0.0, ..Default::default() };
        let passes = find_passes("ISS", "helsinki", &target, helsinki(), t0, t1, &query).unwrap();
        for pass in &passes {
            assert!(pass.t_aos < pass.t_max);
            assert!(pass.t_max < pass.t_los);
            assert!(pass.el_max >= query.min_max_elevation);
        }
    }
}
