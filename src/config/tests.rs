use super::*;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_local() {
    let config = ParmapConfig::default();
    assert_eq!(config.mode, Mode::Local);
    assert!(config.cpus.is_none());
    assert!(!config.logging);
    assert!(config.show_info);
    assert_eq!(config.poll_interval, Duration::from_millis(250));
}

#[test]
fn test_mode_parsing_accepts_known_names() {
    assert_eq!("multicore".parse::<Mode>().unwrap(), Mode::Multicore);
    assert_eq!("Legacy_Queue".parse::<Mode>().unwrap(), Mode::LegacyQueue);
    assert_eq!(" mpi ".parse::<Mode>().unwrap(), Mode::Mpi);

    let err = "fork".parse::<Mode>().unwrap_err();
    assert_eq!(err.code(), crate::error::ErrorCode::CONFIG_UNKNOWN_MODE);
}

#[test]
fn test_toml_parsing() {
    let config = ParmapConfig::from_toml_str(
        r#"
        mode = "queue"
        cpus = 3
        logging = true
        storage_dir = "/tmp/parmap"
        poll_interval = "50ms"
        registered_levels = ["tune.outer", "tune.inner"]

        [queue_resources]
        walltime = 60
        memory = "2G"
        "#,
    )
    .unwrap();

    assert_eq!(config.mode, Mode::Queue);
    assert_eq!(config.cpus, Some(3));
    assert!(config.logging);
    assert_eq!(config.poll_interval, Duration::from_millis(50));
    assert_eq!(config.registered_levels.len(), 2);
    assert_eq!(config.queue_resources["walltime"], serde_json::json!(60));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = ParmapConfig::from_toml_str("mode = [").unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_env_overrides() {
    let mut config = ParmapConfig::default();
    config
        .merge_env_with(lookup(&[
            ("PARMAP_MODE", "socket"),
            ("PARMAP_CPUS", "4"),
            ("PARMAP_LEVEL", "tune.outer"),
            ("PARMAP_LOGGING", "yes"),
            ("PARMAP_LOAD_BALANCING", "1"),
            ("PARMAP_SHOW_INFO", "false"),
        ]))
        .unwrap();

    assert_eq!(config.mode, Mode::Socket);
    assert_eq!(config.cpus, Some(4));
    assert_eq!(config.level.as_deref(), Some("tune.outer"));
    assert!(config.logging);
    assert!(config.load_balancing);
    assert!(!config.show_info);
}

#[test]
fn test_env_override_rejects_garbage() {
    let mut config = ParmapConfig::default();
    let err = config
        .merge_env_with(lookup(&[("PARMAP_CPUS", "many")]))
        .unwrap_err();
    assert!(err.to_string().contains("PARMAP_CPUS"));
}

#[tokio::test]
async fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "mode = \"multicore\"\ncpus = 2\n").unwrap();

    let config = load_from(&path).await.unwrap();
    assert_eq!(config, ParmapConfig::multicore(2));
}

#[tokio::test]
async fn test_load_from_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = load_from(&dir.path().join("absent.toml")).await.unwrap_err();
    assert_eq!(err.code(), crate::error::ErrorCode::CONFIG_NOT_FOUND);
}
