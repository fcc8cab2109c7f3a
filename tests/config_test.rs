use std::collections::HashMap;
use std::path::PathBuf;

use jobq::config::{Config, DEFAULT_MAX_PADDING, DEFAULT_QUEUE_CAPACITY, DEFAULT_STORAGE_ROOT};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn empty_environment_uses_defaults() {
    let config = Config::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config.storage_root, PathBuf::from(DEFAULT_STORAGE_ROOT));
    assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    assert_eq!(config.max_padding, DEFAULT_MAX_PADDING);
    assert_eq!(config.otel_endpoint, None);
    assert_eq!(config.log_level, "info");
}

#[test]
fn variables_override_defaults() {
    let config = Config::from_lookup(lookup(&[
        ("JOBQ_STORAGE_ROOT", "/srv/jobq"),
        ("JOBQ_QUEUE_CAPACITY", "25"),
        ("JOBQ_MAX_PADDING", "0"),
        ("OTEL_ENDPOINT", "http://localhost:4317"),
        ("LOG_LEVEL", "jobq=debug"),
    ]))
    .unwrap();
    assert_eq!(config.storage_root, PathBuf::from("/srv/jobq"));
    assert_eq!(config.queue_capacity, 25);
    assert_eq!(config.max_padding, 0);
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(config.log_level, "jobq=debug");
}

#[test]
fn bad_queue_capacity_is_rejected() {
    assert!(Config::from_lookup(lookup(&[("JOBQ_QUEUE_CAPACITY", "0")])).is_err());
    assert!(Config::from_lookup(lookup(&[("JOBQ_QUEUE_CAPACITY", "lots")])).is_err());
}

#[test]
fn bad_max_padding_is_rejected() {
    assert!(Config::from_lookup(lookup(&[("JOBQ_MAX_PADDING", "-1")])).is_err());
    assert!(Config::from_lookup(lookup(&[("JOBQ_MAX_PADDING", "4k")])).is_err());
}

#[test]
fn config_from_env_reads_process_environment() {
    unsafe {
        std::env::set_var("JOBQ_STORAGE_ROOT", "/tmp/jobq-config-test");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.storage_root, PathBuf::from("/tmp/jobq-config-test"));

    unsafe {
        std::env::remove_var("JOBQ_STORAGE_ROOT");
    }
}
