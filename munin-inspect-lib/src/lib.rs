#![forbid(unsafe_code)]

pub mod capture;
pub mod config;
pub mod dissect;
pub mod dpi;
pub mod error;
pub mod telemetry;

pub use capture::{
    available_backends, verify_firmware, BackendKind, CaptureSession, CaptureStats, FlowRecord,
    FlowTuple, PacketBackend, PacketDirection, QueueBackend, RawFrame, TimestampSource,
};
pub use config::{load_from_path, CaptureConfig, Config, DpiConfig, TelemetryConfig};
pub use dissect::{classify_payload, Protocol, ProtocolData};
pub use dpi::{Alert, AlertSeverity, DpiEngine, DpiStats, RuleSpec, RuleType, SessionSnapshot};
pub use error::{InspectError, Result};
pub use telemetry::{init_tracing, Metrics};
