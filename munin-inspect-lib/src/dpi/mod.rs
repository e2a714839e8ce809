#![forbid(unsafe_code)]

pub mod alert;
pub mod anomaly;
pub mod engine;
pub mod rules;
pub mod session;

pub use alert::{Alert, AlertQueue, AlertSeverity};
pub use anomaly::AnomalyRecord;
pub use engine::{DpiEngine, DpiStats};
pub use rules::{Rule, RuleEngine, RuleMatch, RuleSpec, RuleType};
pub use session::{DpiSession, ReassemblyBuffer, SessionSnapshot, SessionState};
