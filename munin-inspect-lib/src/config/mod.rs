mod capture;
mod dpi;
mod loader;
mod root;
mod telemetry;

pub use capture::{BackendChoice, CaptureConfig, FlowConfig, NetflowConfig, TimestampChoice};
pub use dpi::{DpiConfig, TlsMode};
pub use loader::load_from_path;
pub use root::Config;
pub use telemetry::TelemetryConfig;
