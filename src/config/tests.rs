//! Configuration Tests

use pretty_assertions::assert_eq;

use super::*;

#[test]
fn default_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.broker.host, None);
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.broker.keep_alive, 60);
    assert_eq!(config.broker.connect_timeout, 10);
    assert_eq!(config.broker.reconnect_interval, 1);
    assert_eq!(config.broker.max_reconnect_interval, 60);
    assert_eq!(config.tls.cafile, None);
    assert_eq!(config.can.interface, "can0");
}

#[test]
fn parse_full_config() {
    let config = Config::parse(
        r#"
        [log]
        level = "debug"

        [broker]
        host = "broker.fleet.local"
        port = 18883
        client_id = "door-bridge-7"
        keep_alive = 30

        [tls]
        cafile = "/etc/bridge/ca.crt"
        cert = "/etc/bridge/client.crt"
        key = "/etc/bridge/client.key"

        [can]
        interface = "vcan0"
        "#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.broker.host.as_deref(), Some("broker.fleet.local"));
    assert_eq!(config.broker.port, 18883);
    assert_eq!(config.broker.client_id.as_deref(), Some("door-bridge-7"));
    assert_eq!(config.broker.keep_alive, 30);
    assert_eq!(config.tls.cafile.as_deref(), Some("/etc/bridge/ca.crt"));
    assert_eq!(config.tls.cert.as_deref(), Some("/etc/bridge/client.crt"));
    assert_eq!(config.tls.key.as_deref(), Some("/etc/bridge/client.key"));
    assert_eq!(config.can.interface, "vcan0");
}

#[test]
fn partial_sections_keep_defaults() {
    let config = Config::parse(
        r#"
        [broker]
        host = "10.0.0.5"
        "#,
    )
    .unwrap();

    assert_eq!(config.broker.host.as_deref(), Some("10.0.0.5"));
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.can.interface, "can0");
}

#[test]
fn invalid_toml_is_parse_error() {
    match Config::parse("this is not toml [") {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected parse error, got {:?}", other.err()),
    }
}

#[test]
fn rejects_empty_host() {
    let result = Config::parse(
        r#"
        [broker]
        host = ""
        "#,
    );
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.contains("broker.host")),
        other => panic!("expected validation error, got {:?}", other.err()),
    }
}

#[test]
fn rejects_zero_keep_alive() {
    let result = Config::parse(
        r#"
        [broker]
        keep_alive = 0
        "#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn rejects_backoff_floor_above_ceiling() {
    let result = Config::parse(
        r#"
        [broker]
        reconnect_interval = 120
        max_reconnect_interval = 60
        "#,
    );
    match result {
        Err(ConfigError::Validation(msg)) => {
            assert!(msg.contains("reconnect_interval"));
        }
        other => panic!("expected validation error, got {:?}", other.err()),
    }
}

#[test]
fn rejects_empty_can_interface() {
    let result = Config::parse(
        r#"
        [can]
        interface = ""
        "#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn rejects_empty_tls_path() {
    let result = Config::parse(
        r#"
        [tls]
        cafile = ""
        "#,
    );
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.contains("tls.cafile")),
        other => panic!("expected validation error, got {:?}", other.err()),
    }
}

#[test]
fn env_var_substitution() {
    std::env::set_var("CANBRIDGE_TEST_SUBST_HOST", "env.broker.local");
    let substituted = substitute_env_vars("host = \"${CANBRIDGE_TEST_SUBST_HOST}\"");
    assert_eq!(substituted, "host = \"env.broker.local\"");
    std::env::remove_var("CANBRIDGE_TEST_SUBST_HOST");
}

#[test]
fn env_var_substitution_default() {
    std::env::remove_var("CANBRIDGE_TEST_SUBST_MISSING");
    let substituted = substitute_env_vars("port = ${CANBRIDGE_TEST_SUBST_MISSING:-8883}");
    assert_eq!(substituted, "port = 8883");
}

#[test]
fn load_missing_file_uses_defaults() {
    let config = Config::load("/nonexistent/canbridge.toml").unwrap();
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.can.interface, "can0");
}

#[test]
fn load_reads_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [broker]
        host = "file.broker.local"
        port = 9993

        [can]
        interface = "vcan1"
        "#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.host.as_deref(), Some("file.broker.local"));
    assert_eq!(config.broker.port, 9993);
    assert_eq!(config.can.interface, "vcan1");
}

#[test]
fn duration_accessors() {
    let config = Config::parse(
        r#"
        [broker]
        connect_timeout = 5
        reconnect_interval = 2
        max_reconnect_interval = 30
        "#,
    )
    .unwrap();

    assert_eq!(
        config.broker.connect_timeout_duration(),
        Duration::from_secs(5)
    );
    assert_eq!(
        config.broker.reconnect_interval_duration(),
        Duration::from_secs(2)
    );
    assert_eq!(
        config.broker.max_reconnect_interval_duration(),
        Duration::from_secs(30)
    );
}
