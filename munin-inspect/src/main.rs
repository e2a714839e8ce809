#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use munin_inspect_lib::capture::{available_backends, QueueBackend};
use munin_inspect_lib::config::load_from_path;
use munin_inspect_lib::telemetry::{init_metrics, init_tracing, start_metrics_server};
use munin_inspect_lib::{CaptureSession, Config, DpiEngine, TimestampSource};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Munin traffic inspection pipeline")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "config/basic.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.telemetry.log_level, cfg.telemetry.show_target) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    info!(interface = %cfg.capture.interface, "configuration loaded");
    info!(backends = ?available_backends(), "host backend probe");

    if let Err(err) = run(cfg).await {
        error!(%err, "inspection pipeline exited with error");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> munin_inspect_lib::Result<()> {
    let (metrics, registry) = init_metrics()?;

    // The queue backend stands in for the platform capture backends; a
    // production deployment feeds it from DPDK/XDP/PF_RING shims.
    let (_feed, backend) = QueueBackend::new();

    let session = Arc::new(
        CaptureSession::new(
            Box::new(backend),
            &cfg.capture.interface,
            cfg.capture.buffer_mb,
            timestamp_source(&cfg),
        )?
        .with_metrics(Arc::clone(&metrics)),
    );

    if cfg.capture.flow.enabled {
        session.flow_enable(cfg.capture.flow.table_size, cfg.capture.flow.idle_timeout_sec)?;
    }
    if let Some(netflow) = &cfg.netflow {
        let (ip, port) = split_collector(&netflow.collector);
        session.netflow_enable(&ip, port, netflow.export_interval_sec, None)?;
    }

    let filter = if cfg.capture.filter.is_empty() { None } else { Some(cfg.capture.filter.as_str()) };
    session.start(cfg.capture.snaplen, filter)?;

    let engine = Arc::new(DpiEngine::new(cfg.dpi.clone())?.with_metrics(Arc::clone(&metrics)));

    let poll_session = Arc::clone(&session);
    let poll_engine = Arc::clone(&engine);
    let poll_task = tokio::task::spawn_blocking(move || {
        while poll_session.is_running() {
            let result = poll_session.poll(Duration::from_millis(100), |packet| {
                // Feed decoded payloads straight into the DPI engine.
                if let Some(decoded) = munin_inspect_lib::capture::decode::decode_frame(packet.payload)
                {
                    let payload = &packet.payload
                        [decoded.payload_offset..decoded.payload_offset + decoded.payload_len];
                    let is_response = packet.metadata.direction
                        == munin_inspect_lib::capture::PacketDirection::Egress;
                    if let Err(err) = poll_engine.process_packet(
                        &decoded.tuple,
                        payload,
                        packet.metadata.timestamp_ns,
                        is_response,
                    ) {
                        warn!(%err, "dpi rejected packet");
                    }
                }
                true
            });
            if let Err(err) = result {
                warn!(%err, "capture poll failed");
            }
        }
    });

    let drain_engine = Arc::clone(&engine);
    let drain_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            for alert in drain_engine.get_alerts(256, true) {
                info!(
                    alert_id = alert.alert_id,
                    rule = %alert.rule_name,
                    tuple = %alert.tuple,
                    severity = ?alert.severity,
                    "alert"
                );
            }
        }
    });

    if cfg.telemetry.metrics_port != 0 {
        start_metrics_server(cfg.telemetry.metrics_port, registry).await?;
    } else {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutting down");
    drain_task.abort();
    session.stop();
    let _ = poll_task.await;

    let stats = session.stats();
    info!(
        captured = stats.packets_captured,
        dropped = stats.packets_dropped,
        flows = stats.flows_total,
        "capture summary"
    );
    let dpi = engine.stats();
    info!(
        inspected = dpi.packets_processed,
        alerts = dpi.alerts_generated,
        anomalies = dpi.anomalies_detected,
        "dpi summary"
    );
    Ok(())
}

fn timestamp_source(cfg: &Config) -> TimestampSource {
    use munin_inspect_lib::config::TimestampChoice;
    match cfg.capture.timestamp_source {
        TimestampChoice::Ntp => TimestampSource::Ntp,
        TimestampChoice::Ptp => TimestampSource::Ptp,
        TimestampChoice::Kernel => TimestampSource::Kernel,
        TimestampChoice::Hardware => TimestampSource::Hardware,
    }
}

fn split_collector(collector: &str) -> (String, u16) {
    match collector.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
        None => (collector.to_string(), 0),
    }
}
