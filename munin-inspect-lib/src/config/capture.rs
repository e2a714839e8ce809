use serde::Deserialize;

/// Preferred capture backend
///
/// `Auto` probes the host and picks the fastest available backend;
/// libpcap is always kept as the last-resort fallback.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Auto,
    Dpdk,
    Xdp,
    PfRing,
    Pcap,
}

/// Capture engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Network interface to capture on (e.g., "eth0", "any")
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Ring buffer size in megabytes
    #[serde(default = "default_buffer_mb")]
    pub buffer_mb: u32,

    /// Timestamp source: "ntp", "ptp", "kernel", "hardware"
    /// PTP falls back to realtime when no PTP clock is present.
    #[serde(default)]
    pub timestamp_source: TimestampChoice,

    #[serde(default)]
    pub backend: BackendChoice,

    /// Snap length (0 = full packets)
    #[serde(default)]
    pub snaplen: u16,

    /// Initial BPF filter expression (empty = all packets)
    #[serde(default)]
    pub filter: String,

    #[serde(default)]
    pub flow: FlowConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimestampChoice {
    Ntp,
    #[default]
    Ptp,
    Kernel,
    Hardware,
}

/// Flow metering configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FlowConfig {
    /// Whether flow aggregation starts enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of concurrent flows
    #[serde(default = "default_flow_table_size")]
    pub table_size: u32,

    /// Idle timeout before a flow is aged out
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_sec: u32,
}

/// NetFlow v5 export configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NetflowConfig {
    /// Collector address, "ip:port"; port defaults to 2055 when omitted
    pub collector: String,

    #[serde(default = "default_export_interval")]
    pub export_interval_sec: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            buffer_mb: default_buffer_mb(),
            timestamp_source: TimestampChoice::default(),
            backend: BackendChoice::default(),
            snaplen: 0,
            filter: String::new(),
            flow: FlowConfig::default(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            table_size: default_flow_table_size(),
            idle_timeout_sec: default_idle_timeout(),
        }
    }
}

fn default_interface() -> String {
    "any".to_string()
}

fn default_buffer_mb() -> u32 {
    256
}

fn default_flow_table_size() -> u32 {
    100_000
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_export_interval() -> u32 {
    60
}

fn default_true() -> bool {
    true
}
