use serde::Deserialize;

use crate::config::{CaptureConfig, DpiConfig, NetflowConfig, TelemetryConfig};

/// Top-level configuration loaded from TOML
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub netflow: Option<NetflowConfig>,

    #[serde(default)]
    pub dpi: DpiConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
