use std::sync::Mutex;
use std::time::Duration;

use weir::config::{Config, CONFIG_ENV, LISTEN_ENV};

// env vars are process-wide; tests touching them take this lock
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_config_default_address() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::remove_var(LISTEN_ENV);
        std::env::remove_var(CONFIG_ENV);
    }

    let cfg = Config::load().unwrap();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
}

#[test]
fn test_config_custom_address_from_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::remove_var(CONFIG_ENV);
        std::env::set_var(LISTEN_ENV, "0.0.0.0:3000");
    }

    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");

    unsafe {
        std::env::remove_var(LISTEN_ENV);
    }
}

#[test]
fn test_config_file_from_env_with_listen_override() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let path = std::env::temp_dir().join(format!("weir-config-{}.yaml", std::process::id()));
    std::fs::write(
        &path,
        "server:\n  listen_addr: \"127.0.0.1:9000\"\n  buffer_size: 8192\ntransfer:\n  slots: 3\n",
    )
    .unwrap();

    unsafe {
        std::env::set_var(CONFIG_ENV, &path);
        std::env::set_var(LISTEN_ENV, "127.0.0.1:9100");
    }

    let cfg = Config::load();

    unsafe {
        std::env::remove_var(CONFIG_ENV);
        std::env::remove_var(LISTEN_ENV);
    }
    let _ = std::fs::remove_file(&path);

    let cfg = cfg.unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:9100");
    assert_eq!(cfg.server.buffer_size, 8192);
    assert_eq!(cfg.transfer.slots, 3);
}

#[test]
fn test_config_missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var(CONFIG_ENV, "/definitely/not/here/weir.yaml");
    }

    let result = Config::load();

    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_config_defaults() {
    let cfg = Config::from_yaml_str("").unwrap();

    assert_eq!(cfg.server.buffer_size, 16 * 1024);
    assert_eq!(cfg.server.max_header_bytes, 16 * 1024);
    assert_eq!(cfg.server.read_timeout_secs, 60);
    assert_eq!(cfg.server.stop_timeout(), Duration::from_secs(5));
    assert!(cfg.server.tls.is_none());
    assert_eq!(cfg.transfer.slots, 5);
    assert_eq!(cfg.transfer.timeout(), Duration::from_secs(45));
    assert_eq!(cfg.transfer.poll_interval(), Duration::from_millis(500));
    assert!(cfg.log_level.is_none());
}

#[test]
fn test_config_partial_yaml_keeps_other_defaults() {
    let cfg = Config::from_yaml_str(
        r#"
server:
  read_timeout_secs: 0
  tls:
    cert_path: /etc/weir/cert.pem
    key_path: /etc/weir/key.pem
log_level: "weir=debug"
"#,
    )
    .unwrap();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.connection_options().read_timeout, None);

    let tls = cfg.server.tls.as_ref().unwrap();
    assert_eq!(tls.cert_path.to_str(), Some("/etc/weir/cert.pem"));
    assert!(tls.root_ca_path.is_none());
    assert!(!tls.require_client_cert);

    assert_eq!(cfg.log_level.as_deref(), Some("weir=debug"));
    assert_eq!(cfg.transfer.slots, 5);
}

#[test]
fn test_config_connection_options() {
    let cfg = Config::from_yaml_str("server:\n  buffer_size: 4096\n  max_header_bytes: 2048\n")
        .unwrap();

    let options = cfg.server.connection_options();

    assert_eq!(options.buffer_size, 4096);
    assert_eq!(options.max_header_bytes, 2048);
    assert_eq!(options.read_timeout, Some(Duration::from_secs(60)));
}

#[test]
fn test_config_invalid_yaml() {
    assert!(Config::from_yaml_str("server: [not, a, map]").is_err());
}

#[test]
fn test_config_validation() {
    let cfg = Config::from_yaml_str("transfer:\n  slots: 0\n").unwrap();

    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();

    assert_eq!(cfg1.server.listen_addr, cfg2.server.listen_addr);
}
