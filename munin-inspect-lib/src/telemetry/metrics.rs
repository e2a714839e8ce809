use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;

use crate::error::{InspectError, Result};

#[derive(Clone)]
pub struct Metrics {
    pub packets_captured_total: Counter<u64>,
    pub packets_dropped_total: Counter<u64>,
    pub bytes_captured_total: Counter<u64>,
    pub poll_duration_seconds: Histogram<f64>,

    pub dpi_packets_total: Counter<u64>,
    pub alerts_total: Counter<u64>,
    pub anomalies_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            packets_captured_total: meter
                .u64_counter("munin_packets_captured_total")
                .with_description("Total packets appended to the capture ring")
                .build(),
            packets_dropped_total: meter
                .u64_counter("munin_packets_dropped_total")
                .with_description("Packets dropped because the ring buffer was full")
                .build(),
            bytes_captured_total: meter
                .u64_counter("munin_bytes_captured_total")
                .with_description("Total captured bytes")
                .build(),
            poll_duration_seconds: meter
                .f64_histogram("munin_poll_duration_seconds")
                .with_description("Time spent processing one capture poll batch")
                .build(),

            dpi_packets_total: meter
                .u64_counter("munin_dpi_packets_total")
                .with_description("Packets inspected by the DPI engine")
                .build(),
            alerts_total: meter
                .u64_counter("munin_alerts_total")
                .with_description("Alerts emitted into the alert queue")
                .build(),
            anomalies_total: meter
                .u64_counter("munin_anomalies_total")
                .with_description("Anomaly records produced by the detector")
                .build(),
        }
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry)> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| InspectError::Telemetry(format!("metrics exporter: {e}")))?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("munin-inspect");
    let metrics = Arc::new(Metrics::new(meter));

    Ok((metrics, registry))
}
