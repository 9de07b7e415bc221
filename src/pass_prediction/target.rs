//! Targets and ground-station geometry for pass prediction (spec §4.F).
//!
//! "Fast" mode uses pure line-of-sight geometry (ECI → ECEF → topocentric),
//! sufficient for LEO satellites. "Accurate" mode additionally consults a
//! low-precision solar ephemeris for Sun elevation / sunlit tests, which
//! `min_elevation`-only callers never need.

use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements};
use thiserror::Error;

use crate::domain_types::Timestamp;

/// Errors raised while resolving a target's position.
#[derive(Error, Debug)]
pub enum TargetError {
    /// The TLE could not be parsed or its element set is degenerate.
    #[error("invalid TLE for {name}: {source}")]
    InvalidTle {
        /// Name of the satellite as configured.
        name: String,
        /// Underlying `sgp4` error.
        source: sgp4::Error,
    },

    /// SGP4 propagation diverged (typically a decayed or garbage orbit).
    #[error("SGP4 propagation failed for {name} at {at}: {reason}")]
    PropagationFailed {
        /// Name of the satellite as configured.
        name: String,
        /// Time at which propagation was attempted.
        at: Timestamp,
        /// `sgp4`'s diagnostic string.
        reason: String,
    },

    /// `sun_max_elevation`/`sunlit` were requested but the target has no
    /// well-defined "object" position to test sunlit-ness against (e.g. a
    /// fixed RA/Dec star field target).
    #[error("sunlit/darkness predicates are not meaningful for this target kind")]
    SunlitNotApplicable,
}

/// Two-line element set plus the display name it resolves to passes under.
#[derive(Debug, Clone)]
pub struct Tle {
    /// Name under which this satellite is reported in `Pass::object_name`.
    pub name: String,
    /// First TLE line.
    pub line1: String,
    /// Second TLE line.
    pub line2: String,
}

impl Tle {
    /// Parses the element set once, for reuse across an entire prediction
    /// window. More than 14 days old is a hygiene warning the tracker
    /// module raises (spec §4.H), not an error here.
    pub fn elements(&self) -> Result<Elements, TargetError> {
        Elements::from_tle(Some(self.name.clone()), self.line1.as_bytes(), self.line2.as_bytes())
            .map_err(|source| TargetError::InvalidTle { name: self.name.clone(), source })
    }

    /// Orbits per day, from the TLE mean motion (revs/day), used to size
    /// the maxima-search initial step (spec §4.F step 2).
    pub fn orbits_per_day(&self) -> Result<f64, TargetError> {
        Ok(self.elements()?.mean_motion)
    }
}

/// A resolvable pass-prediction target (spec §3 process `tracker`
/// discriminator, restricted to the kinds pass-prediction itself handles).
#[derive(Debug, Clone)]
pub enum Target {
    /// An orbital object propagated from a TLE via SGP4.
    Orbit(Tle),
    /// A fixed celestial coordinate (star, deep-space target), unaffected
    /// by orbital motion.
    FixedRaDec {
        /// Right ascension, degrees.
        ra_deg: f64,
        /// Declination, degrees.
        dec_deg: f64,
    },
}

/// Observer location (spec §4.D `groundstation.yaml`).
#[derive(Debug, Clone, Copy)]
pub struct GroundStation {
    /// Degrees, north-positive.
    pub latitude_deg: f64,
    /// Degrees, east-positive.
    pub longitude_deg: f64,
    /// Meters above sea level.
    pub elevation_m: f64,
}

const WGS84_A: f64 = 6_378.137;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const EARTH_ROTATION_RATE: f64 = 7.292_115_855_3e-5; // rad/s

impl GroundStation {
    /// Observer position in ECEF (km), from geodetic coordinates.
    fn ecef_km(&self) -> [f64; 3] {
        let lat = self.latitude_deg.to_radians();
        let lon = self.longitude_deg.to_radians();
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let h = self.elevation_m / 1000.0;
        let x = (n + h) * lat.cos() * lon.cos();
        let y = (n + h) * lat.cos() * lon.sin();
        let z = (n * (1.0 - e2) + h) * lat.sin();
        [x, y, z]
    }
}

/// Greenwich mean sidereal time, radians, via the IAU 1982 polynomial.
/// Sufficient precision for LEO line-of-sight geometry (fast mode).
fn gmst_rad(t: DateTime<Utc>) -> f64 {
    let jd = julian_date(t);
    let tu = (jd - 2_451_545.0) / 36_525.0;
    let gmst_sec = 67_310.548_41 + (876_600.0 * 3600.0 + 8_640_184.812_866) * tu + 0.093_104 * tu * tu
        - 6.2e-6 * tu * tu * tu;
    let gmst_rad = (gmst_sec % 86_400.0) * (std::f64::consts::TAU / 86_400.0);
    gmst_rad.rem_euclid(std::f64::consts::TAU)
}

fn julian_date(t: DateTime<Utc>) -> f64 {
    2_440_587.5 + t.timestamp() as f64 / 86_400.0 + t.timestamp_subsec_nanos() as f64 / 86_400.0e9
}

/// Rotates an ECI vector into ECEF by `-gmst` about the Z axis.
fn eci_to_ecef(eci: [f64; 3], gmst: f64) -> [f64; 3] {
    let (s, c) = gmst.sin_cos();
    [c * eci[0] + s * eci[1], -s * eci[0] + c * eci[1], eci[2]]
}

/// Topocentric azimuth/elevation (degrees) of `target_ecef` as seen from
/// `observer_ecef`, via the standard ENU rotation.
fn ecef_to_topocentric(observer: GroundStation, observer_ecef: [f64; 3], target_ecef: [f64; 3]) -> (f64, f64) {
    let d = [
        target_ecef[0] - observer_ecef[0],
        target_ecef[1] - observer_ecef[1],
        target_ecef[2] - observer_ecef[2],
    ];
    let lat = observer.latitude_deg.to_radians();
    let lon = observer.longitude_deg.to_radians();

    let south = lat.sin() * lon.cos() * d[0] + lat.sin() * lon.sin() * d[1] - lat.cos() * d[2];
    let east = -lon.sin() * d[0] + lon.cos() * d[1];
    let up = lat.cos() * lon.cos() * d[0] + lat.cos() * lon.sin() * d[1] + lat.sin() * d[2];

    let range = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    let el = (up / range).asin().to_degrees();
    let az = east.atan2(-south).to_degrees().rem_euclid(360.0);
    (az, el)
}

impl Target {
    /// Azimuth/elevation (degrees) of this target as seen from `gs` at `t`.
    pub fn topocentric(&self, gs: GroundStation, t: Timestamp, elements: Option<&Constants>) -> Result<(f64, f64), TargetError> {
        match self {
            Target::Orbit(tle) => {
                let constants = match elements {
                    Some(c) => c.clone(),
                    None => Constants::from_elements(&tle.elements()?)
                        .map_err(|source| TargetError::InvalidTle { name: tle.name.clone(), source })?,
                };
                let epoch = constants.elements.datetime;
                let minutes_since_epoch = (t - DateTime::<Utc>::from_naive_utc_and_offset(epoch, Utc))
                    .num_milliseconds() as f64
                    / 60_000.0;
                let prediction = constants.propagate(sgp4::MinutesSinceEpoch(minutes_since_epoch)).map_err(|e| {
                    TargetError::PropagationFailed { name: tle.name.clone(), at: t, reason: e.to_string() }
                })?;
                let gmst = gmst_rad(t);
                let eci = prediction.position;
                let ecef = eci_to_ecef(eci, gmst);
                Ok(ecef_to_topocentric(gs, gs.ecef_km(), ecef))
            }
            Target::FixedRaDec { ra_deg, dec_deg } => {
                // Treat as effectively infinitely distant: ENU transform of
                // the unit vector on the celestial sphere via local
                // sidereal time, ignoring atmospheric refraction.
                let lst = gmst_rad(t) + gs.longitude_deg.to_radians();
                let ha = lst - ra_deg.to_radians();
                let lat = gs.latitude_deg.to_radians();
                let dec = dec_deg.to_radians();
                let el = (lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos()).asin();
                let az = (-ha.sin()).atan2(dec.tan() * lat.cos() - lat.sin() * ha.cos());
                Ok((az.to_degrees().rem_euclid(360.0), el.to_degrees()))
            }
        }
    }

    /// Whether the orbital target is illuminated by the Sun, via a simple
    /// cylindrical Earth-shadow model. Only meaningful for `Orbit` targets.
    pub fn is_sunlit(&self, t: Timestamp, elements: Option<&Constants>) -> Result<bool, TargetError> {
        let Target::Orbit(tle) = self else {
            return Err(TargetError::SunlitNotApplicable);
        };
        let constants = match elements {
            Some(c) => c.clone(),
            None => Constants::from_elements(&tle.elements()?)
                .map_err(|source| TargetError::InvalidTle { name: tle.name.clone(), source })?,
        };
        let epoch = constants.elements.datetime;
        let minutes_since_epoch =
            (t - DateTime::<Utc>::from_naive_utc_and_offset(epoch, Utc)).num_milliseconds() as f64 / 60_000.0;
        let prediction = constants.propagate(sgp4::MinutesSinceEpoch(minutes_since_epoch)).map_err(|e| {
            TargetError::PropagationFailed { name: tle.name.clone(), at: t, reason: e.to_string() }
        })?;
        let sun_eci = sun_direction_eci(t);
        Ok(!in_earth_shadow(prediction.position, sun_eci))
    }
}

const EARTH_RADIUS_KM: f64 = 6378.137;

/// Cylindrical Earth-shadow test: the satellite is shadowed if it is on
/// the night side of Earth and its distance from the Sun-Earth line is
/// less than Earth's radius.
fn in_earth_shadow(sat_eci_km: [f64; 3], sun_dir: [f64; 3]) -> bool {
    let dot = sat_eci_km[0] * sun_dir[0] + sat_eci_km[1] * sun_dir[1] + sat_eci_km[2] * sun_dir[2];
    if dot > 0.0 {
        return false;
    }
    let perp2 = (sat_eci_km[0] - dot * sun_dir[0]).powi(2)
        + (sat_eci_km[1] - dot * sun_dir[1]).powi(2)
        + (sat_eci_km[2] - dot * sun_dir[2]).powi(2);
    perp2 < EARTH_RADIUS_KM * EARTH_RADIUS_KM
}

/// Unit vector from Earth toward the Sun in ECI, via a low-precision solar
/// position formula (Meeus, accurate to about 0.01 degrees — ample for
/// shadow/sunlit tests and Sun-elevation predicates).
fn sun_direction_eci(t: Timestamp) -> [f64; 3] {
    let jd = julian_date(t);
    let d = jd - 2_451_545.0;
    let g = (357.529 + 0.985_600_28 * d).to_radians();
    let q = (280.459 + 0.985_647_33 * d).to_radians();
    let l = q + (1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    let e = (23.439 - 0.000_000_4 * d).to_radians();
    [l.cos(), e.cos() * l.sin(), e.sin() * l.sin()]
}

/// Sun azimuth/elevation (degrees) as seen from `gs` at `t`, for the
/// `sun_max_elevation` darkness predicate.
pub fn sun_topocentric(gs: GroundStation, t: Timestamp) -> (f64, f64) {
    let sun_dir = sun_direction_eci(t);
    // Treat the Sun as effectively at infinite distance: place it on a
    // large sphere along its direction vector so the existing topocentric
    // transform (which subtracts observer position) still behaves, since
    // the observer offset is negligible at astronomical-unit scale.
    const AU_KM: f64 = 149_597_870.7;
    let sun_eci = [sun_dir[0] * AU_KM, sun_dir[1] * AU_KM, sun_dir[2] * AU_KM];
    let gmst = gmst_rad(t);
    let ecef = eci_to_ecef(sun_eci, gmst);
    ecef_to_topocentric(gs, gs.ecef_km(), ecef)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn iss_tle() -> Tle {
        Tle {
            name: "ISS".to_string(),
            line1: "1 25544U 98067A   24341.14375093  .00014948  00000-0  85933-3 0  9999".to_string(),
            line2: "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.50377579 28618".to_string(),
        }
    }

    fn helsinki() -> GroundStation {
        GroundStation { latitude_deg: 60.18, longitude_deg: 24.83, elevation_m: 40.0 }
    }

    #[test]
    fn orbit_topocentric_is_physically_reasonable() {
        let target = Target::Orbit(iss_tle());
        let t = Utc.with_ymd_and_hms(2024, 12, 10, 12, 0, 0).unwrap();
        let (az, el) = target.topocentric(helsinki(), t, None).unwrap();
        assert!((0.0..360.0).contains(&az));
        assert!((-90.0..=90.0).contains(&el));
    }

    #[test]
    fn fixed_ra_dec_stays_within_bounds() {
        let target = Target::FixedRaDec { ra_deg: 120.0, dec_deg: 45.0 };
        let t = Utc.with_ymd_and_hms(2024, 12, 10, 12, 0, 0).unwrap();
        let (az, el) = target.topocentric(helsinki(), t, None).unwrap();
        assert!((0.0..360.0).contains(&az));
        assert!((-90.0..=90.0).contains(&el));
    }

    #[test]
    fn sun_direction_is_unit_length() {
        let t = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();
        let v = sun_direction_eci(t);
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        assert!((len - 1.0).abs() < 1e-6);
    }

    #[test]
    fn noon_shadow_test_places_sun_near_expected_hemisphere() {
        let gs = helsinki();
        let summer_noon = Utc.with_ymd_and_hms(2024, 6, 21, 10, 0, 0).unwrap();
        let (_, el) = sun_topocentric(gs, summer_noon);
        assert!(el > 0.0, "expected the sun above the horizon near local noon in summer, got {el}");
    }
}
