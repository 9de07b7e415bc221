//! Shared domain primitives for the Porthouse framework.
//!
//! Strongly-typed newtypes used across the broker, RPC, scheduler and
//! rotator modules, so that angle ranges, routing keys and identifiers
//! cannot be confused with bare `String`/`f64` values at call sites.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dotted-segment routing key, e.g. `rotator.uhf.rpc.status`.
#[nutype(
    validate(predicate = |s: &str| !s.is_empty() && !s.contains(' ')),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Builds a routing key from segments, joined with `.`.
    pub fn from_segments(segments: &[&str]) -> Result<Self, RoutingKeyError> {
        Self::try_new(segments.join("."))
    }

    /// Returns true if this key matches a binding pattern, where `*`
    /// matches exactly one segment and `#` matches zero or more segments.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let key_segs: Vec<&str> = self.as_ref().split('.').collect();
        let pat_segs: Vec<&str> = pattern.split('.').collect();
        match_segments(&key_segs, &pat_segs)
    }
}

fn match_segments(key: &[&str], pattern: &[&str]) -> bool {
    match (key.first(), pattern.first()) {
        (_, Some(&"#")) => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=key.len()).any(|split| match_segments(&key[split..], &pattern[1..]))
        }
        (Some(_), Some(&"*")) => match_segments(&key[1..], &pattern[1..]),
        (Some(k), Some(p)) if k == p => match_segments(&key[1..], &pattern[1..]),
        (None, None) => true,
        _ => false,
    }
}

/// Module instance namespace, prepended to routing keys marked "prefixed".
/// Prefix stacking composes launcher-level and module-level prefixes with `.`.
#[nutype(
    sanitize(with = |s: String| s.trim().to_string()),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Default, TryFrom, Into)
)]
pub struct Prefix(String);

impl Prefix {
    /// Stacks `outer` in front of `self`, joined by `.`. An empty `outer`
    /// or `self` leaves the non-empty side untouched.
    pub fn stack(&self, outer: &Prefix) -> Prefix {
        match (outer.as_ref().is_empty(), self.as_ref().is_empty()) {
            (true, _) => self.clone(),
            (false, true) => outer.clone(),
            (false, false) => Prefix::new(format!("{outer}.{self}")),
        }
    }

    /// Applies this prefix to a bare routing key when `prefixed` is set.
    pub fn apply(&self, key: &str, prefixed: bool) -> String {
        if prefixed && !self.as_ref().is_empty() {
            format!("{self}.{key}")
        } else {
            key.to_string()
        }
    }
}

/// RPC correlation identifier, a fresh `UUIDv4` per outbound request.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh correlation id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Azimuth in degrees, wrapped to `[0, 360)` on construction.
#[nutype(
    sanitize(with = |deg: f64| deg.rem_euclid(360.0)),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Into)
)]
pub struct AzimuthDeg(f64);

/// Elevation in degrees, unconstrained (validity against hardware limits
/// is a property of the rotator controller, not of the value itself).
#[nutype(derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Into))]
pub struct ElevationDeg(f64);

/// A non-negative duration expressed in seconds, as used throughout the
/// scheduler and config layers (`preaos_time`, heartbeat interval, ...).
#[nutype(
    validate(greater_or_equal = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Into)
)]
pub struct Seconds(f64);

impl Seconds {
    /// Converts to a `chrono::Duration`, truncating sub-millisecond precision.
    pub fn to_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.into_inner() * 1000.0).round() as i64)
    }

    /// Converts to a `tokio::time::Duration`.
    pub fn to_tokio(&self) -> tokio::time::Duration {
        tokio::time::Duration::from_secs_f64(self.into_inner().max(0.0))
    }
}

/// A UTC timestamp, re-exported as a newtype so call sites read as
/// domain time rather than a bare `chrono` type.
pub type Timestamp = DateTime<Utc>;

/// Name of a rotator, used as the sharing key for scheduler exclusivity.
#[nutype(
    validate(predicate = |s: &str| !s.is_empty()),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct RotatorName(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_rejects_whitespace() {
        assert!(RoutingKey::try_new("has space".to_string()).is_err());
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        let key = RoutingKey::try_new("rotator.uhf.status".to_string()).unwrap();
        assert!(key.matches_pattern("rotator.*.status"));
        assert!(!key.matches_pattern("rotator.status"));
    }

    #[test]
    fn hash_matches_zero_or_more_segments() {
        let key = RoutingKey::try_new("log.warning".to_string()).unwrap();
        assert!(key.matches_pattern("log.#"));
        assert!(key.matches_pattern("#"));
        let deep = RoutingKey::try_new("a.b.c.d".to_string()).unwrap();
        assert!(deep.matches_pattern("a.#.d"));
    }

    #[test]
    fn prefix_stacking_joins_non_empty_sides() {
        let launcher = Prefix::new("gs1".to_string());
        let module = Prefix::new("uhf".to_string());
        assert_eq!(module.stack(&launcher).into_inner(), "gs1.uhf");

        let empty = Prefix::default();
        assert_eq!(module.stack(&empty).into_inner(), "uhf");
    }

    #[test]
    fn azimuth_wraps_into_range() {
        let az = AzimuthDeg::new(-10.0);
        assert!((az.into_inner() - 350.0).abs() < 1e-9);
    }
}
