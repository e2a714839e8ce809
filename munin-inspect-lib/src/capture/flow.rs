use std::sync::RwLock;

use tracing::trace;

use crate::capture::{FlowTuple, PacketDirection};
use crate::error::{InspectError, Result};

/// Flow lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Active,
    Closing,
    Closed,
}

/// Aggregate record for one flow
#[derive(Debug, Clone, Copy)]
pub struct FlowRecord {
    pub tuple: FlowTuple,
    pub flow_id: u64,
    pub first_packet_id: u64,
    pub last_packet_id: u64,
    pub first_seen_ns: u64,
    pub last_seen_ns: u64,
    pub packets: u64,
    pub bytes: u64,
    pub bytes_fwd: u64,
    pub bytes_rev: u64,
    pub tcp_flags: u8,
    pub interface_id: u16,
    pub state: FlowState,
}

/// Per-packet update applied to the flow table
#[derive(Debug, Clone, Copy)]
pub struct FlowUpdate {
    pub payload_len: u32,
    pub packet_id: u64,
    pub timestamp_ns: u64,
    pub direction: PacketDirection,
    pub tcp_flags: u8,
    pub interface_id: u16,
}

struct FlowSlot {
    record: FlowRecord,
    last_activity_ns: u64,
}

struct FlowTableInner {
    slots: Vec<Option<FlowSlot>>,
    count: usize,
    /// Cumulative flows ever created, including evicted and replaced ones.
    total: u64,
}

/// Closed-address flow table.
///
/// `flow_id % size` selects the slot; a colliding tuple replaces the
/// resident entry. Readers take the lock shared, updates and scans take
/// it exclusive.
pub struct FlowTable {
    inner: RwLock<FlowTableInner>,
    size: usize,
    idle_timeout_ns: u64,
}

impl FlowTable {
    pub fn new(size: u32, idle_timeout_sec: u32) -> Result<Self> {
        if size == 0 {
            return Err(InspectError::InvalidArgument("flow table size must be nonzero".into()));
        }
        let size = size as usize;
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Ok(Self {
            inner: RwLock::new(FlowTableInner { slots, count: 0, total: 0 }),
            size,
            idle_timeout_ns: u64::from(idle_timeout_sec) * 1_000_000_000,
        })
    }

    /// Upsert the flow for `tuple`.
    ///
    /// Forward bytes are ingress and unknown-direction packets; egress
    /// counts as reverse, so `bytes_fwd + bytes_rev == bytes` always.
    pub fn update(&self, tuple: &FlowTuple, upd: FlowUpdate) {
        let flow_id = tuple.flow_id();
        let idx = (flow_id % self.size as u64) as usize;
        let payload = u64::from(upd.payload_len);
        let is_reverse = upd.direction == PacketDirection::Egress;

        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        match &mut inner.slots[idx] {
            Some(slot) if slot.record.tuple == *tuple => {
                let rec = &mut slot.record;
                rec.last_packet_id = upd.packet_id;
                rec.last_seen_ns = upd.timestamp_ns;
                rec.packets += 1;
                rec.bytes += payload;
                if is_reverse {
                    rec.bytes_rev += payload;
                } else {
                    rec.bytes_fwd += payload;
                }
                rec.tcp_flags |= upd.tcp_flags;
                slot.last_activity_ns = upd.timestamp_ns;
            }
            occupied => {
                // Empty slot, or a colliding tuple: the newcomer takes the slot.
                let replaced = occupied.is_some();
                *occupied = Some(FlowSlot {
                    record: new_record(tuple, flow_id, &upd, payload, is_reverse),
                    last_activity_ns: upd.timestamp_ns,
                });
                if replaced {
                    trace!(%tuple, "flow slot collision, resident entry replaced");
                } else {
                    inner.count += 1;
                }
                inner.total += 1;
            }
        }
    }

    pub fn lookup(&self, tuple: &FlowTuple) -> Option<FlowRecord> {
        let idx = (tuple.flow_id() % self.size as u64) as usize;
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match &inner.slots[idx] {
            Some(slot) if slot.record.tuple == *tuple => Some(slot.record),
            _ => None,
        }
    }

    pub fn scan_all(&self) -> Vec<FlowRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .slots
            .iter()
            .filter_map(|s| s.as_ref().map(|slot| slot.record))
            .collect()
    }

    /// Evict flows idle longer than the configured timeout.
    /// Returns the evicted records so the exporter can flush them.
    pub fn evict_idle(&self, now_ns: u64) -> Vec<FlowRecord> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let timeout = self.idle_timeout_ns;
        let mut evicted = Vec::new();
        for slot in inner.slots.iter_mut() {
            let idle = slot
                .as_ref()
                .map(|s| now_ns.saturating_sub(s.last_activity_ns) > timeout)
                .unwrap_or(false);
            if idle {
                if let Some(mut s) = slot.take() {
                    s.record.state = FlowState::Closed;
                    evicted.push(s.record);
                }
            }
        }
        inner.count -= evicted.len();
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_flows(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).total
    }
}

fn new_record(
    tuple: &FlowTuple,
    flow_id: u64,
    upd: &FlowUpdate,
    payload: u64,
    is_reverse: bool,
) -> FlowRecord {
    FlowRecord {
        tuple: *tuple,
        flow_id,
        first_packet_id: upd.packet_id,
        last_packet_id: upd.packet_id,
        first_seen_ns: upd.timestamp_ns,
        last_seen_ns: upd.timestamp_ns,
        packets: 1,
        bytes: payload,
        bytes_fwd: if is_reverse { 0 } else { payload },
        bytes_rev: if is_reverse { payload } else { 0 },
        tcp_flags: upd.tcp_flags,
        interface_id: upd.interface_id,
        state: FlowState::Active,
    }
}
