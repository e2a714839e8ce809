use std::collections::HashMap;

use crate::capture::FlowTuple;
use crate::dissect::{Classification, ProtocolData};
use crate::dpi::anomaly::AnomalyRecord;

/// Per-session anomaly list cap; later detections only count globally.
pub const MAX_SESSION_ANOMALIES: usize = 10;

/// DPI session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    New,
    Established,
    Closing,
    Closed,
    Error,
}

/// Per-direction bounded reassembly buffer.
///
/// Holds in-order payload bytes for dissectors that need more than one
/// packet; bytes past capacity are discarded and counted.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    data: Vec<u8>,
    capacity: usize,
    discarded: u64,
}

impl ReassemblyBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { data: Vec::new(), capacity, discarded: 0 }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.capacity.saturating_sub(self.data.len());
        let take = bytes.len().min(room);
        self.data.extend_from_slice(&bytes[..take]);
        self.discarded += (bytes.len() - take) as u64;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// Full per-flow inspection state
#[derive(Debug)]
pub struct DpiSession {
    pub session_id: u64,
    pub tuple: FlowTuple,
    pub state: SessionState,
    pub classification: Classification,
    pub fwd: ReassemblyBuffer,
    pub rev: ReassemblyBuffer,
    pub protocol_data: Option<ProtocolData>,
    pub anomalies: Vec<AnomalyRecord>,
    pub created_ns: u64,
    pub last_seen_ns: u64,
    pub packets_seen: u32,
    pub total_bytes: u64,
}

/// Owned copy of a session's inspectable state
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: u64,
    pub tuple: FlowTuple,
    pub state: SessionState,
    pub classification: Classification,
    pub anomalies: Vec<AnomalyRecord>,
    pub created_ns: u64,
    pub last_seen_ns: u64,
    pub packets_seen: u32,
    pub total_bytes: u64,
}

/// Dense session array with a tuple index.
///
/// The engine wraps this in its session lock; methods here assume the
/// caller already holds it.
pub struct SessionStore {
    sessions: Vec<DpiSession>,
    index: HashMap<FlowTuple, usize, ahash::RandomState>,
    capacity: usize,
    reassembly_capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: u32, reassembly_capacity: usize) -> Self {
        Self {
            sessions: Vec::new(),
            index: HashMap::default(),
            capacity: capacity.max(1) as usize,
            reassembly_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, tuple: &FlowTuple) -> Option<&DpiSession> {
        self.index.get(tuple).map(|&i| &self.sessions[i])
    }

    pub fn get_mut(&mut self, tuple: &FlowTuple) -> Option<&mut DpiSession> {
        match self.index.get(tuple) {
            Some(&i) => Some(&mut self.sessions[i]),
            None => None,
        }
    }

    /// Find or create the session for `tuple`. Returns `None` when the
    /// table is at capacity; the caller counts the rejection.
    pub fn get_or_create(
        &mut self,
        tuple: &FlowTuple,
        session_id: u64,
        now_ns: u64,
    ) -> Option<(&mut DpiSession, bool)> {
        if let Some(&i) = self.index.get(tuple) {
            return Some((&mut self.sessions[i], false));
        }
        if self.sessions.len() >= self.capacity {
            return None;
        }

        let session = DpiSession {
            session_id,
            tuple: *tuple,
            state: SessionState::New,
            classification: Classification::default(),
            fwd: ReassemblyBuffer::new(self.reassembly_capacity),
            rev: ReassemblyBuffer::new(self.reassembly_capacity),
            protocol_data: None,
            anomalies: Vec::new(),
            created_ns: now_ns,
            last_seen_ns: now_ns,
            packets_seen: 0,
            total_bytes: 0,
        };
        self.sessions.push(session);
        let idx = self.sessions.len() - 1;
        self.index.insert(*tuple, idx);
        Some((&mut self.sessions[idx], true))
    }

    /// Remove a session, releasing its buffers and parsed records.
    /// Compaction keeps the array dense; the moved tail entry is
    /// reindexed.
    pub fn terminate(&mut self, tuple: &FlowTuple) -> Option<DpiSession> {
        let idx = self.index.remove(tuple)?;
        let session = self.sessions.swap_remove(idx);
        if let Some(moved) = self.sessions.get(idx) {
            self.index.insert(moved.tuple, idx);
        }
        Some(session)
    }

    pub fn snapshot(&self, tuple: &FlowTuple) -> Option<SessionSnapshot> {
        self.get(tuple).map(|s| SessionSnapshot {
            session_id: s.session_id,
            tuple: s.tuple,
            state: s.state,
            classification: s.classification,
            anomalies: s.anomalies.clone(),
            created_ns: s.created_ns,
            last_seen_ns: s.last_seen_ns,
            packets_seen: s.packets_seen,
            total_bytes: s.total_bytes,
        })
    }
}
