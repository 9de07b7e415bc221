//! Schedule model: indexed task storage, overlap resolution, task
//! splitting and renumbering (spec §4.G).

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, TimeZone};

use crate::domain_types::{RotatorName, Timestamp};

use super::{SchedulerError, Task, TaskStatus};

/// The active schedule plus its deleted-task archive.
///
/// Two order-preserving indexes (`start_index`, `end_index`) support
/// O(log n) overlap queries; deleted tasks move into `deleted_index`,
/// still queryable but no longer conflict-checked (spec §4.G).
#[derive(Default)]
pub struct ScheduleModel {
    tasks: HashMap<String, Task>,
    start_index: BTreeMap<Timestamp, Vec<String>>,
    end_index: BTreeMap<Timestamp, Vec<String>>,
    deleted_index: BTreeMap<Timestamp, Task>,
    max_task_no: HashMap<String, u64>,
}

/// Options controlling how `add_task` enforces process-level limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// When set, cap `end_time` so this process does not exceed its
    /// maximum allotted duration within the UTC-noon-to-noon window
    /// containing `start_time` (spec §4.G step 3).
    pub apply_limits: bool,
}

impl ScheduleModel {
    /// Builds an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every currently active task, in no particular order.
    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Looks up a task by name in the active schedule.
    pub fn get(&self, task_name: &str) -> Option<&Task> {
        self.tasks.get(task_name)
    }

    fn next_task_no(&self, process_name: &str) -> u64 {
        self.max_task_no.get(process_name).copied().unwrap_or(0) + 1
    }

    /// Extracts `<process> #<n>` and bumps `max_task_no[process]` so later
    /// names never collide (spec §8 property 2).
    fn absorb_numbering(&mut self, process_name: &str, task_name: &str) {
        if let Some(n) = parse_task_number(process_name, task_name) {
            let entry = self.max_task_no.entry(process_name.to_string()).or_insert(0);
            if n > *entry {
                *entry = n;
            }
        }
    }

    /// Tasks sharing at least one rotator with `rotators` whose interval
    /// `[start, end]` intersects, sorted by start time (spec §4.G).
    pub fn get_overlapping(
        &self,
        start: Timestamp,
        end: Timestamp,
        rotators: &HashSet<RotatorName>,
    ) -> Vec<Task> {
        let mut by_start: HashSet<&str> = self
            .start_index
            .range(..=end)
            .flat_map(|(_, names)| names.iter().map(String::as_str))
            .collect();
        let by_end: HashSet<&str> = self
            .end_index
            .range(start..)
            .flat_map(|(_, names)| names.iter().map(String::as_str))
            .collect();
        by_start.retain(|name| by_end.contains(name));

        let mut result: Vec<Task> = by_start
            .into_iter()
            .filter_map(|name| self.tasks.get(name))
            .filter(|task| !task.rotators.is_disjoint(rotators))
            .cloned()
            .collect();
        result.sort_by_key(|task| task.start_time);
        result
    }

    fn index_insert(&mut self, task: &Task) {
        self.start_index
            .entry(task.start_time)
            .or_default()
            .push(task.task_name.clone());
        self.end_index
            .entry(task.end_time)
            .or_default()
            .push(task.task_name.clone());
    }

    fn index_remove(&mut self, task: &Task) {
        if let Some(names) = self.start_index.get_mut(&task.start_time) {
            names.retain(|n| n != &task.task_name);
            if names.is_empty() {
                self.start_index.remove(&task.start_time);
            }
        }
        if let Some(names) = self.end_index.get_mut(&task.end_time) {
            names.retain(|n| n != &task.task_name);
            if names.is_empty() {
                self.end_index.remove(&task.end_time);
            }
        }
    }

    /// Adds `task` to the schedule (spec §4.G "Adding a task"). Returns
    /// `Ok(true)` when the task entered the active schedule, `Ok(false)`
    /// when it was already terminal and went straight to the archive.
    pub fn add_task(
        &mut self,
        mut task: Task,
        processes: &HashMap<String, super::Process>,
        options: AddOptions,
    ) -> Result<bool, SchedulerError> {
        // Step 1: terminal tasks are archived directly.
        if task.status.is_terminal() {
            self.absorb_numbering(&task.process_name, &task.task_name);
            self.deleted_index.insert(task.start_time, task);
            return Ok(false);
        }

        // Step 2: assign a name if missing.
        if task.task_name.is_empty() {
            let n = self.next_task_no(&task.process_name);
            task.task_name = format!("{} #{n}", task.process_name);
        }

        let process = processes.get(&task.process_name);

        // Step 3/4: apply process duration limits, or require a
        // non-empty interval.
        if options.apply_limits {
            if let Some(process) = process {
                let used = self.seconds_used_in_noon_window(&task.process_name, task.start_time);
                if let Some(max) = process.duration_max {
                    let remaining = (max - used).max(0.0);
                    let capped_end = task.start_time + chrono::Duration::milliseconds((remaining * 1000.0) as i64);
                    if capped_end < task.end_time {
                        task.end_time = capped_end;
                    }
                }
                process
                    .validate_task(task.start_time, task.end_time)
                    .map_err(|reason| SchedulerError::InvalidAgainstProcess {
                        process: task.process_name.clone(),
                        reason,
                    })?;
            }
        }

        if task.end_time <= task.start_time {
            return Err(SchedulerError::InvalidInterval {
                start: task.start_time,
                end: task.end_time,
            });
        }

        // Step 5: overlap check.
        let conflicts = self.get_overlapping(task.start_time, task.end_time, &task.rotators);
        let conflicts: Vec<Task> = conflicts
            .into_iter()
            .filter(|other| other.task_name != task.task_name)
            .collect();
        if !conflicts.is_empty() {
            return Err(SchedulerError::Overlap { conflicts });
        }

        // Step 6: insert and update numbering.
        self.absorb_numbering(&task.process_name, &task.task_name);
        self.index_insert(&task);
        self.tasks.insert(task.task_name.clone(), task);
        Ok(true)
    }

    /// Sums seconds already used by `process_name` within the UTC-noon-to-
    /// noon window containing `at` (including `EXECUTED` tasks), for the
    /// process duration cap in step 3.
    fn seconds_used_in_noon_window(&self, process_name: &str, at: Timestamp) -> f64 {
        let (window_start, window_end) = noon_window(at);
        self.tasks
            .values()
            .chain(self.deleted_index.values())
            .filter(|t| {
                t.process_name == process_name
                    && (t.status == TaskStatus::Executed || !t.status.is_terminal())
                    && t.start_time < window_end
                    && t.end_time > window_start
            })
            .map(|t| (t.end_time - t.start_time).num_milliseconds() as f64 / 1000.0)
            .sum()
    }

    /// Removes `task_name` from the active schedule, transitioning it to
    /// `EXECUTED` (if it was `ONGOING`) or `CANCELLED`, and migrates it to
    /// the deleted archive (spec §4.G "Removing").
    pub fn remove_task(&mut self, task_name: &str) -> Option<Task> {
        let mut task = self.tasks.remove(task_name)?;
        self.index_remove(&task);
        task.status = if task.status == TaskStatus::Ongoing {
            TaskStatus::Executed
        } else {
            TaskStatus::Cancelled
        };
        self.deleted_index.insert(task.start_time, task.clone());
        Some(task)
    }

    /// Splits `task` against a set of holes (merged first), producing the
    /// pieces that remain after each hole is carved out (spec §4.G
    /// "Splitting"). Does not mutate the schedule; callers re-add the
    /// resulting pieces (typically via `remove_task` + repeated
    /// `add_task`).
    pub fn split_by_holes(task: &Task, holes: &[(Timestamp, Timestamp)]) -> Vec<Task> {
        let merged = merge_holes(holes);
        let mut pieces = Vec::new();
        let mut cursor = task.start_time;

        for (hole_start, hole_end) in &merged {
            if *hole_end <= cursor || *hole_start >= task.end_time {
                continue;
            }
            if *hole_start > cursor {
                pieces.push((cursor, *hole_start - Duration::seconds(1)));
            }
            cursor = (*hole_end + Duration::seconds(1)).max(cursor);
        }
        if cursor < task.end_time {
            pieces.push((cursor, task.end_time));
        }

        if pieces.len() <= 1 {
            return pieces
                .into_iter()
                .map(|(start, end)| piece_of(task, task.task_name.clone(), start, end))
                .collect();
        }

        let mut suffixes = suffix_generator();
        pieces
            .into_iter()
            .map(|(start, end)| {
                let suffix = suffixes.next().expect("suffix generator is infinite");
                piece_of(task, format!("{} {suffix}", task.task_name), start, end)
            })
            .collect()
    }
}

fn piece_of(task: &Task, name: String, start: Timestamp, end: Timestamp) -> Task {
    Task {
        task_name: name,
        start_time: start,
        end_time: end,
        ..task.clone()
    }
}

/// Merges overlapping/adjacent hole intervals, sorted by start time.
fn merge_holes(holes: &[(Timestamp, Timestamp)]) -> Vec<(Timestamp, Timestamp)> {
    let mut sorted: Vec<(Timestamp, Timestamp)> = holes.to_vec();
    sorted.sort_by_key(|h| h.0);
    let mut merged: Vec<(Timestamp, Timestamp)> = Vec::new();
    for (start, end) in sorted {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

/// `a, b, ..., z, aa, ab, ..., az, ba, ...` — base-26 lower-case suffixes,
/// used to disambiguate pieces produced by splitting (spec §4.G).
fn suffix_generator() -> impl Iterator<Item = String> {
    SuffixIter { n: 0 }
}

struct SuffixIter {
    n: u64,
}

impl Iterator for SuffixIter {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut n = self.n;
        self.n += 1;
        let mut chars = Vec::new();
        loop {
            let rem = (n % 26) as u8;
            chars.push((b'a' + rem) as char);
            if n < 26 {
                break;
            }
            n = n / 26 - 1;
        }
        chars.reverse();
        Some(chars.into_iter().collect())
    }
}

/// Parses `<process> #<n>[ <suffix>]`, returning `n` if `task_name`
/// belongs to `process_name`.
fn parse_task_number(process_name: &str, task_name: &str) -> Option<u64> {
    let rest = task_name.strip_prefix(process_name)?.strip_prefix(" #")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// The UTC-noon-to-noon window containing `at`.
fn noon_window(at: Timestamp) -> (Timestamp, Timestamp) {
    let date = at.date_naive();
    let noon = date.and_hms_opt(12, 0, 0).unwrap();
    let noon_utc = chrono::Utc.from_utc_datetime(&noon);
    if at >= noon_utc {
        (noon_utc, noon_utc + chrono::Duration::days(1))
    } else {
        (noon_utc - chrono::Duration::days(1), noon_utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Process;

    fn ts(h: u32, m: u32, s: u32) -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2025, 1, 2, h, m, s).unwrap()
    }

    fn rotators(names: &[&str]) -> HashSet<RotatorName> {
        names
            .iter()
            .map(|n| RotatorName::try_new((*n).to_string()).unwrap())
            .collect()
    }

    fn task(name: &str, process: &str, start: Timestamp, end: Timestamp, rot: &[&str]) -> Task {
        Task {
            task_name: name.to_string(),
            process_name: process.to_string(),
            start_time: start,
            end_time: end,
            rotators: rotators(rot),
            status: TaskStatus::Scheduled,
            auto_scheduled: false,
            process_overrides: serde_json::Map::new(),
        }
    }

    #[test]
    fn suffixes_follow_excel_column_order() {
        let first: Vec<String> = suffix_generator().take(30).collect();
        assert_eq!(first[0], "a");
        assert_eq!(first[25], "z");
        assert_eq!(first[26], "aa");
        assert_eq!(first[27], "ab");
    }

    #[test]
    fn add_and_reject_conflict_scenario() {
        let mut model = ScheduleModel::new();
        let processes = HashMap::new();

        let a = task(
            "",
            "ISS-pass",
            ts(10, 0, 0),
            ts(10, 10, 0),
            &["uhf"],
        );
        assert!(model.add_task(a, &processes, AddOptions::default()).unwrap());

        let b = task("", "ISS-pass", ts(10, 5, 0), ts(10, 15, 0), &["uhf"]);
        let err = model.add_task(b.clone(), &processes, AddOptions::default()).unwrap_err();
        match err {
            SchedulerError::Overlap { conflicts } => assert_eq!(conflicts.len(), 1),
            other => panic!("expected overlap, got {other:?}"),
        }

        let b_other_rotator = task("", "ISS-pass", ts(10, 5, 0), ts(10, 15, 0), &["sband"]);
        assert!(model
            .add_task(b_other_rotator, &processes, AddOptions::default())
            .unwrap());
    }

    #[test]
    fn split_by_hole_scenario() {
        let original = task("DEMO #1", "DEMO", ts(10, 0, 0), ts(10, 30, 0), &["uhf"]);
        let holes = vec![(ts(10, 10, 0), ts(10, 15, 0))];
        let pieces = ScheduleModel::split_by_holes(&original, &holes);

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].task_name, "DEMO #1 a");
        assert_eq!(pieces[0].start_time, ts(10, 0, 0));
        assert_eq!(pieces[0].end_time, ts(10, 9, 59));
        assert_eq!(pieces[1].task_name, "DEMO #1 b");
        assert_eq!(pieces[1].start_time, ts(10, 15, 1));
        assert_eq!(pieces[1].end_time, ts(10, 30, 0));
    }

    #[test]
    fn adjacent_tasks_do_not_overlap() {
        let mut model = ScheduleModel::new();
        let processes = HashMap::new();
        let a = task("", "P", ts(10, 0, 0), ts(10, 10, 0), &["uhf"]);
        model.add_task(a, &processes, AddOptions::default()).unwrap();

        let b = task("", "P", ts(10, 10, 0), ts(10, 20, 0), &["uhf"]);
        assert!(model.add_task(b, &processes, AddOptions::default()).is_ok());
    }

    #[test]
    fn task_names_never_collide_after_remove_and_readd() {
        let mut model = ScheduleModel::new();
        let processes = HashMap::new();
        let a = task("", "P", ts(9, 0, 0), ts(9, 10, 0), &["uhf"]);
        model.add_task(a, &processes, AddOptions::default()).unwrap();
        model.remove_task("P #1");

        let b = task("", "P", ts(11, 0, 0), ts(11, 10, 0), &["uhf"]);
        model.add_task(b, &processes, AddOptions::default()).unwrap();
        assert!(model.get("P #2").is_some());
    }

    #[test]
    fn unknown_process_without_limits_still_requires_valid_interval() {
        let mut model = ScheduleModel::new();
        let processes: HashMap<String, Process> = HashMap::new();
        let degenerate = task("", "P", ts(10, 0, 0), ts(10, 0, 0), &["uhf"]);
        let err = model
            .add_task(degenerate, &processes, AddOptions::default())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInterval { .. }));
    }
}
