use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;

use crate::capture::FlowTuple;
use crate::dissect::Protocol;

/// Alert severity, ordered least to most interesting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Critical,
    Malware,
    Anomaly,
}

/// A rule or anomaly hit destined for the alert queue
#[derive(Debug, Clone)]
pub struct Alert {
    pub alert_id: u64,
    pub timestamp_ns: u64,
    pub tuple: FlowTuple,
    pub severity: AlertSeverity,
    pub protocol: Protocol,
    pub rule_id: u32,
    pub rule_name: String,
    pub message: String,
    /// First bytes of the matching payload
    pub payload_sample: Bytes,
    pub offset_in_stream: u64,
}

struct AlertQueueInner {
    buf: VecDeque<Alert>,
    dropped: u64,
}

/// Bounded FIFO of alerts.
///
/// Push and pop are constant work under a short mutex. When the queue is
/// full new pushes are refused and counted; consumers drain on demand.
pub struct AlertQueue {
    inner: Mutex<AlertQueueInner>,
    capacity: usize,
}

impl AlertQueue {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            inner: Mutex::new(AlertQueueInner { buf: VecDeque::new(), dropped: 0 }),
            capacity,
        }
    }

    /// Returns false when the queue was full and the alert was dropped.
    pub fn push(&self, alert: Alert) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.buf.len() >= self.capacity {
            inner.dropped += 1;
            return false;
        }
        inner.buf.push_back(alert);
        true
    }

    /// Drain up to `max` alerts in FIFO order. With `clear` unset the
    /// entries stay queued and a future drain sees them again.
    pub fn drain(&self, max: usize, clear: bool) -> Vec<Alert> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let take = max.min(inner.buf.len());
        if clear {
            inner.buf.drain(..take).collect()
        } else {
            inner.buf.iter().take(take).cloned().collect()
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }
}
