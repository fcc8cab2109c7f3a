//! Integration tests for the fleet seed file and worker status.

use chrono::{Duration, Utc};
use jobq::fleet::{Fleet, WorkerDirectory, WorkerStatus};
use jobq::model::WorkerId;

const SEED: &str = r#"
[[worker]]
id = "6c5f2d1e-8d1b-4c3f-9d2b-1f6a7e8b9c0d"
host_name = "ws-01"
platform = "windows"
padding_max = 64

[[worker]]
id = "0e9a8b7c-6d5e-4f3a-8b2c-1d0e9f8a7b6c"
wait_time = "1m"
max_retry = 2
"#;

#[test]
fn seed_file_registers_workers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.toml");
    std::fs::write(&path, SEED).unwrap();

    let fleet = Fleet::load_from_file(&path).unwrap();
    assert_eq!(fleet.len(), 2);

    let first: WorkerId = "6c5f2d1e-8d1b-4c3f-9d2b-1f6a7e8b9c0d".parse().unwrap();
    let info = fleet.info(first).unwrap();
    assert_eq!(info.sys_info.host_name, "ws-01");
    assert_eq!(info.wait_time, "30s");
    assert_eq!(fleet.profile(first).unwrap().padding_max, 64);

    let second: WorkerId = "0e9a8b7c-6d5e-4f3a-8b2c-1d0e9f8a7b6c".parse().unwrap();
    assert_eq!(fleet.profile(second).unwrap().max_retry, 2);
    assert_eq!(fleet.worker_ids(), {
        let mut ids = vec![first, second];
        ids.sort();
        ids
    });
}

#[test]
fn malformed_seed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.toml");
    std::fs::write(&path, "[[worker]]\nid = \"not-a-uuid\"\n").unwrap();

    assert!(matches!(
        Fleet::load_from_file(&path),
        Err(jobq::error::Error::Config(_))
    ));
    assert!(Fleet::load_from_file(&dir.path().join("absent.toml")).is_err());
}

#[test]
fn silent_worker_goes_dead() {
    let fleet = Fleet::new();
    let id = WorkerId::new();
    fleet.register(
        id,
        jobq::model::WorkerInfo {
            wait_time: "1m".into(),
            max_retry: 1,
            ..Default::default()
        },
    );
    let last = Utc::now();
    fleet.record_checkin(id, last);

    assert_eq!(fleet.status(id, last).unwrap(), WorkerStatus::Active);
    assert_eq!(
        fleet.status(id, last + Duration::seconds(90)).unwrap(),
        WorkerStatus::Delayed
    );
    assert_eq!(
        fleet.status(id, last + Duration::minutes(3)).unwrap(),
        WorkerStatus::Dead
    );
}
