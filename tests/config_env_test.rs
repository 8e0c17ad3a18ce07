//! Tests for environment-driven configuration.
//!
//! Env vars are process-global, so these tests run serially.

use serial_test::serial;

use iat_survey::config::{Config, LogFormat};

const VARS: &[&str] = &[
    "DATABASE_PATH",
    "DATABASE_MAX_CONNECTIONS",
    "BIND_ADDR",
    "UPLOAD_DIR",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "REQUEST_TIMEOUT_MS",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_when_nothing_is_set() {
    clear_env();

    let config = Config::from_env().unwrap();

    assert_eq!(config.database.path.to_str().unwrap(), "./data/iat.db");
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.http.bind.to_string(), "127.0.0.1:5000");
    assert_eq!(config.uploads.dir.to_str().unwrap(), "./uploads");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.client.timeout_ms, 30000);
}

#[test]
#[serial]
fn test_env_overrides_are_picked_up() {
    clear_env();
    std::env::set_var("DATABASE_PATH", "/tmp/surveys.db");
    std::env::set_var("BIND_ADDR", "0.0.0.0:8080");
    std::env::set_var("LOG_FORMAT", "json");
    std::env::set_var("REQUEST_TIMEOUT_MS", "1500");

    let config = Config::from_env().unwrap();

    assert_eq!(config.database.path.to_str().unwrap(), "/tmp/surveys.db");
    assert_eq!(config.http.bind.to_string(), "0.0.0.0:8080");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.client.timeout_ms, 1500);

    clear_env();
}

#[test]
#[serial]
fn test_invalid_bind_addr_is_a_config_error() {
    clear_env();
    std::env::set_var("BIND_ADDR", "not-an-address");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("BIND_ADDR"));

    clear_env();
}

#[test]
#[serial]
fn test_unparseable_numbers_fall_back_to_defaults() {
    clear_env();
    std::env::set_var("DATABASE_MAX_CONNECTIONS", "many");
    std::env::set_var("REQUEST_TIMEOUT_MS", "soon");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.client.timeout_ms, 30000);

    clear_env();
}
