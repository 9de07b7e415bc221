//! 4.G Schedule model: `Task` and `Process` data types.
//!
//! The index/overlap/splitting machinery lives in [`model`]; this module
//! defines the data shapes and the per-task/process validity predicates
//! from spec §3.

pub mod model;

use std::collections::HashSet;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{RotatorName, Timestamp};

/// Errors raised by the schedule model.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    /// `end_time <= start_time`.
    #[error("task interval is empty or inverted: start={start}, end={end}")]
    InvalidInterval {
        /// Offending start time.
        start: Timestamp,
        /// Offending end time.
        end: Timestamp,
    },

    /// The candidate task overlaps one or more already-scheduled tasks
    /// sharing at least one rotator.
    #[error("{} conflicting task(s)", conflicts.len())]
    Overlap {
        /// Every conflicting task, for the caller to inspect or resolve.
        conflicts: Vec<Task>,
    },

    /// The task fails validity against its referenced process (duration,
    /// daily window, or date range).
    #[error("task is not valid against process '{process}': {reason}")]
    InvalidAgainstProcess {
        /// Name of the referenced process.
        process: String,
        /// Human-readable reason, for logs and CLI output.
        reason: String,
    },

    /// `task_name` referenced a process that isn't in the catalog.
    #[error("unknown process '{0}'")]
    UnknownProcess(String),
}

/// Lifecycle state of a scheduled [`Task`] (spec §3, §8 property 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not yet placed; exists only as a candidate.
    NotScheduled,
    /// Placed in the active schedule, in the future.
    Scheduled,
    /// Its interval contains the current time.
    Ongoing,
    /// Completed normally. Terminal.
    Executed,
    /// Removed before completion. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// `true` for the two terminal states (spec §8 property 4).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Executed | TaskStatus::Cancelled)
    }
}

/// One concrete scheduled occurrence of a [`Process`] on one ground-station
/// pass (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the schedule, of the shape `<process> #<n>[ <suffix>]`.
    pub task_name: String,
    /// Reference into the process catalog.
    pub process_name: String,
    /// Start of the half-open interval, UTC.
    pub start_time: Timestamp,
    /// End of the half-open interval, UTC.
    pub end_time: Timestamp,
    /// Rotators this task requires exclusively.
    pub rotators: HashSet<RotatorName>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Whether this task was placed by the auto-scheduler.
    pub auto_scheduled: bool,
    /// Per-task overrides that win over the referenced process at dispatch.
    #[serde(default)]
    pub process_overrides: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// `true` if `self` and `other` share no rotator (always "outside").
    fn disjoint_rotators(&self, other: &Task) -> bool {
        self.rotators.is_disjoint(&other.rotators)
    }

    /// Entirely before or after `other`'s interval, or sharing no rotator.
    pub fn is_outside(&self, other: &Task) -> bool {
        self.disjoint_rotators(other)
            || self.end_time <= other.start_time
            || self.start_time >= other.end_time
    }

    /// Entirely within `other`'s interval (both endpoints inside).
    pub fn is_inside(&self, other: &Task) -> bool {
        !self.disjoint_rotators(other)
            && self.start_time >= other.start_time
            && self.end_time <= other.end_time
    }

    /// Entirely contains `other`'s interval.
    pub fn is_encompassing(&self, other: &Task) -> bool {
        other.is_inside(self)
    }

    /// Starts before `other` and ends inside it (overlaps its leading edge).
    pub fn is_reaching_into(&self, other: &Task) -> bool {
        !self.disjoint_rotators(other)
            && self.start_time < other.start_time
            && other.start_time < self.end_time
            && self.end_time < other.end_time
    }

    /// Starts inside `other` and ends after it (overlaps its trailing edge).
    pub fn is_reaching_out(&self, other: &Task) -> bool {
        !self.disjoint_rotators(other)
            && other.start_time <= self.start_time
            && self.start_time <= other.end_time
            && other.end_time <= self.end_time
    }
}

/// A template for recurring tasks (spec §3). `process_name` never
/// references a `Task`; the reference direction is one-way (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    /// Unique, never contains `#`.
    pub process_name: String,
    /// Lower is higher priority; may be negative.
    pub priority: i32,
    /// Whether the auto-scheduler may place tasks for this process.
    pub enabled: bool,
    /// Rotators this process's tasks require.
    pub rotators: HashSet<RotatorName>,
    /// Which tracker backend resolves `target`.
    pub tracker: TrackerKind,
    /// Tracker-specific target identifier.
    pub target: String,
    /// Seconds before AOS the rotator should be commanded to prepare.
    pub preaos_time: f64,
    /// Minimum elevation throughout the pass interior, degrees.
    pub min_elevation: f64,
    /// Minimum required peak elevation, degrees.
    pub min_max_elevation: f64,
    /// Maximum Sun elevation at the observer for a valid pass, degrees.
    pub sun_max_elevation: Option<f64>,
    /// Whether the target must be sunlit (`Some(true)`), in shadow
    /// (`Some(false)`), or don't-care (`None`).
    pub obj_sunlit: Option<bool>,
    /// Minimum task duration, seconds.
    pub duration_min: f64,
    /// Maximum task duration, seconds, if bounded.
    pub duration_max: Option<f64>,
    /// Daily windows a task must fall within, if any are configured.
    pub daily_windows: Vec<(NaiveTime, NaiveTime)>,
    /// Date ranges a task must fall within, if any are configured.
    pub date_ranges: Vec<(chrono::NaiveDate, chrono::NaiveDate)>,
}

/// Discriminator for which subsystem resolves a process's `target`
/// (spec §3; GNSS/other are external collaborators per spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// Orbital target resolved via TLE propagation (pass-prediction core).
    Orbit,
    /// Live position feed from a GNSS receiver.
    Gnss,
    /// Any other externally supplied live position source.
    Other,
}

impl Process {
    /// A task is valid against its process iff duration, daily windows and
    /// date ranges (when configured) all accept it (spec §3).
    pub fn validate_task(&self, start: Timestamp, end: Timestamp) -> Result<(), String> {
        let duration = (end - start).num_milliseconds() as f64 / 1000.0;
        if duration < self.duration_min {
            return Err(format!(
                "duration {duration}s below process minimum {}s",
                self.duration_min
            ));
        }
        if let Some(max) = self.duration_max {
            if duration > max {
                return Err(format!("duration {duration}s exceeds process maximum {max}s"));
            }
        }

        if !self.daily_windows.is_empty() {
            let start_t = start.time();
            let end_t = end.time();
            let in_window = self
                .daily_windows
                .iter()
                .any(|(from, to)| time_in_window(start_t, *from, *to) && time_in_window(end_t, *from, *to));
            if !in_window {
                return Err("interval falls outside every configured daily window".to_string());
            }
        }

        if !self.date_ranges.is_empty() {
            let start_d = start.date_naive();
            let end_d = end.date_naive();
            let in_range = self
                .date_ranges
                .iter()
                .any(|(from, to)| *from <= start_d && start_d <= *to && *from <= end_d && end_d <= *to);
            if !in_range {
                return Err("interval falls outside every configured date range".to_string());
            }
        }

        Ok(())
    }
}

fn time_in_window(t: NaiveTime, from: NaiveTime, to: NaiveTime) -> bool {
    if from <= to {
        t >= from && t <= to
    } else {
        // Window wraps past midnight.
        t >= from || t <= to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2025, 1, 2, h, m, 0).unwrap()
    }

    fn rotators(names: &[&str]) -> HashSet<RotatorName> {
        names.iter().map(|n| RotatorName::try_new((*n).to_string()).unwrap()).collect()
    }

    fn task(name: &str, start_h: u32, start_m: u32, end_h: u32, end_m: u32, rot: &[&str]) -> Task {
        Task {
            task_name: name.to_string(),
            process_name: "proc".to_string(),
            start_time: ts(start_h, start_m),
            end_time: ts(end_h, end_m),
            rotators: rotators(rot),
            status: TaskStatus::Scheduled,
            auto_scheduled: false,
            process_overrides: serde_json::Map::new(),
        }
    }

    #[test]
    fn disjoint_rotators_are_always_outside() {
        let a = task("a", 10, 0, 10, 10, &["uhf"]);
        let b = task("b", 10, 0, 10, 10, &["sband"]);
        assert!(a.is_outside(&b));
        assert!(b.is_outside(&a));
    }

    #[test]
    fn interval_predicates_match_their_names() {
        let outer = task("outer", 10, 0, 11, 0, &["uhf"]);
        let inner = task("inner", 10, 10, 10, 50, &["uhf"]);
        assert!(inner.is_inside(&outer));
        assert!(outer.is_encompassing(&inner));

        let reach_in = task("reach_in", 9, 50, 10, 20, &["uhf"]);
        assert!(reach_in.is_reaching_into(&outer));

        let reach_out = task("reach_out", 10, 50, 11, 20, &["uhf"]);
        assert!(reach_out.is_reaching_out(&outer));
    }

    #[test]
    fn process_rejects_short_duration() {
        let process = Process {
            process_name: "ISS-pass".to_string(),
            priority: 0,
            enabled: true,
            rotators: rotators(&["uhf"]),
            tracker: TrackerKind::Orbit,
            target: "ISS".to_string(),
            preaos_time: 30.0,
            min_elevation: 0.0,
            min_max_elevation: 10.0,
            sun_max_elevation: None,
            obj_sunlit: None,
            duration_min: 600.0,
            duration_max: None,
            daily_windows: vec![],
            date_ranges: vec![],
        };
        let result = process.validate_task(ts(10, 0), ts(10, 1));
        assert!(result.is_err());
    }
}
