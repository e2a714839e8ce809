use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use munin_inspect_lib::config::{load_from_path, BackendChoice, TlsMode};

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    std::env::temp_dir().join(format!("munin-{nanos}-{name}.toml"))
}

#[test]
fn loads_minimal_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("minimal");
    fs::write(&path, "")?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.capture.interface, "any");
    assert_eq!(cfg.capture.buffer_mb, 256);
    assert_eq!(cfg.capture.flow.table_size, 100_000);
    assert_eq!(cfg.capture.flow.idle_timeout_sec, 300);
    assert_eq!(cfg.dpi.max_sessions, 100_000);
    assert_eq!(cfg.dpi.reassembly_buffer_mb, 16);
    assert_eq!(cfg.dpi.max_rules, 10_000);
    assert!(cfg.netflow.is_none());

    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn loads_full_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("full");
    fs::write(
        &path,
        r#"
        [capture]
        interface = "eth1"
        buffer_mb = 64
        timestamp_source = "kernel"
        backend = "xdp"
        snaplen = 128
        filter = "tcp port 443"

        [capture.flow]
        table_size = 4096
        idle_timeout_sec = 120

        [netflow]
        collector = "192.0.2.10:2055"
        export_interval_sec = 30

        [dpi]
        max_sessions = 2048
        reassembly_buffer_mb = 4
        anomaly_detection = false
        tls_mode = "inspect"

        [telemetry]
        log_level = "debug"
        metrics_port = 9191
        "#,
    )?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.capture.interface, "eth1");
    assert_eq!(cfg.capture.backend, BackendChoice::Xdp);
    assert_eq!(cfg.capture.snaplen, 128);
    assert_eq!(cfg.capture.filter, "tcp port 443");
    assert_eq!(cfg.capture.flow.idle_timeout_sec, 120);

    let netflow = cfg.netflow.expect("netflow section present");
    assert_eq!(netflow.collector, "192.0.2.10:2055");
    assert_eq!(netflow.export_interval_sec, 30);

    assert_eq!(cfg.dpi.max_sessions, 2048);
    assert!(!cfg.dpi.anomaly_detection);
    assert_eq!(cfg.dpi.tls_mode, TlsMode::Inspect);
    assert_eq!(cfg.telemetry.metrics_port, 9191);

    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn rejects_zero_table_size() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("zero-table");
    fs::write(
        &path,
        r#"
        [capture.flow]
        table_size = 0
        "#,
    )?;

    assert!(load_from_path(&path).is_err());
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn rejects_malformed_toml() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("broken");
    fs::write(&path, "[capture\ninterface=")?;
    assert!(load_from_path(&path).is_err());
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    assert!(load_from_path("/nonexistent/munin.toml").is_err());
}
