use serde::Deserialize;

/// Logging and metrics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Log level filter (overridden by RUST_LOG when set)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Include the module target in log lines
    #[serde(default)]
    pub show_target: bool,

    /// Prometheus metrics port; 0 disables the metrics server
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            show_target: false,
            metrics_port: default_metrics_port(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9094
}
