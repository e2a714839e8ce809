use serde::Deserialize;

/// TLS handling mode for inspected sessions
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    Disabled,
    /// Capture records but never decrypt (default)
    #[default]
    Passthrough,
    Decrypt,
    /// Inspect record headers and ciphersuites without decryption
    Inspect,
}

/// DPI engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DpiConfig {
    /// Maximum concurrent sessions; new sessions are rejected when full
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    /// Per-direction reassembly buffer capacity in megabytes
    #[serde(default = "default_reassembly_mb")]
    pub reassembly_buffer_mb: u32,

    #[serde(default = "default_true")]
    pub anomaly_detection: bool,

    #[serde(default)]
    pub tls_mode: TlsMode,

    /// Maximum number of installed rules
    #[serde(default = "default_max_rules")]
    pub max_rules: u32,

    /// Alert queue capacity
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: u32,

    /// Bytes of matching payload copied into each alert
    #[serde(default = "default_payload_sample")]
    pub payload_sample_bytes: u32,
}

impl Default for DpiConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            reassembly_buffer_mb: default_reassembly_mb(),
            anomaly_detection: true,
            tls_mode: TlsMode::default(),
            max_rules: default_max_rules(),
            alert_capacity: default_alert_capacity(),
            payload_sample_bytes: default_payload_sample(),
        }
    }
}

fn default_max_sessions() -> u32 {
    100_000
}

fn default_reassembly_mb() -> u32 {
    16
}

fn default_max_rules() -> u32 {
    10_000
}

fn default_alert_capacity() -> u32 {
    1_000_000
}

fn default_payload_sample() -> u32 {
    64
}

fn default_true() -> bool {
    true
}
