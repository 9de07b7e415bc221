//! Exercises the schedule model and the persistence layer together: add a
//! task, remove it, and confirm it lands in the deleted-task archive the
//! way an operator querying `porthouse-cli scheduler list_deleted` would
//! expect (spec §4.G, §4 storage).

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use porthouse::domain_types::RotatorName;
use porthouse::scheduler::model::{AddOptions, ScheduleModel};
use porthouse::scheduler::{Process, Task, TaskStatus, TrackerKind};
use porthouse::storage::Storage;

fn uhf() -> Process {
    Process {
        process_name: "uhf-downlink".to_string(),
        priority: 0,
        enabled: true,
        rotators: HashSet::from([RotatorName::try_new("uhf".to_string()).unwrap()]),
        tracker: TrackerKind::Orbit,
        target: "NOAA 19".to_string(),
        preaos_time: 30.0,
        min_elevation: 5.0,
        min_max_elevation: 10.0,
        sun_max_elevation: None,
    }
}

fn candidate_task() -> Task {
    let start = Utc::now() + Duration::minutes(10);
    Task {
        task_name: "uhf-downlink #1".to_string(),
        process_name: "uhf-downlink".to_string(),
        start_time: start,
        end_time: start + Duration::minutes(12),
        rotators: HashSet::from([RotatorName::try_new("uhf".to_string()).unwrap()]),
        status: TaskStatus::Scheduled,
        auto_scheduled: false,
        process_overrides: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn removed_task_is_archived_and_retrievable() {
    let mut schedule = ScheduleModel::new();
    let processes = HashMap::from([("uhf-downlink".to_string(), uhf())]);

    let placed = schedule
        .add_task(candidate_task(), &processes, AddOptions { apply_limits: false })
        .expect("non-conflicting task should place cleanly");
    assert!(placed);
    assert!(schedule.get("uhf-downlink #1").is_some());

    let removed = schedule.remove_task("uhf-downlink #1").expect("task was just added");
    assert!(schedule.get("uhf-downlink #1").is_none());

    let storage = Storage::open_in_memory().await.expect("in-memory db opens");
    storage.archive_task(&removed).await.expect("archive succeeds");

    let archived = storage
        .list_deleted_tasks("uhf-downlink")
        .await
        .expect("list succeeds");
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].task.task_name, "uhf-downlink #1");
}

#[tokio::test]
async fn a_second_overlapping_task_on_the_same_rotator_is_rejected() {
    let mut schedule = ScheduleModel::new();
    let processes = HashMap::from([("uhf-downlink".to_string(), uhf())]);

    schedule
        .add_task(candidate_task(), &processes, AddOptions { apply_limits: false })
        .expect("first task places cleanly");

    let mut overlapping = candidate_task();
    overlapping.task_name = "uhf-downlink #2".to_string();
    overlapping.start_time += Duration::minutes(5);
    overlapping.end_time += Duration::minutes(5);

    let result = schedule.add_task(overlapping, &processes, AddOptions { apply_limits: false });
    assert!(result.is_err(), "overlapping task on a shared rotator must be rejected");
}
