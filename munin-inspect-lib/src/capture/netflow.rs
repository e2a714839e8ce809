use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::capture::flow::{FlowRecord, FlowTable};
use crate::capture::session::ErrorCallback;
use crate::capture::TimestampSource;
use crate::error::Result;

pub const V5_HEADER_LEN: usize = 24;
pub const V5_RECORD_LEN: usize = 48;
/// v5 datagrams carry at most 30 records.
pub const V5_MAX_RECORDS: usize = 30;

pub const DEFAULT_COLLECTOR_PORT: u16 = 2055;

/// NetFlow-v5-compatible export record
#[derive(Debug, Clone, Copy)]
pub struct NetFlowRecord {
    pub flow: FlowRecord,
    pub next_hop: Ipv4Addr,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
    pub tcp_flags_final: u8,
}

impl NetFlowRecord {
    pub fn from_flow(flow: FlowRecord) -> Self {
        Self {
            flow,
            next_hop: Ipv4Addr::UNSPECIFIED,
            src_as: 0,
            dst_as: 0,
            src_mask: 0,
            dst_mask: 0,
            tcp_flags_final: flow.tcp_flags,
        }
    }
}

/// In-process consumer for exported flows, used instead of (or alongside)
/// the UDP path.
pub type FlowExportCallback = Arc<dyn Fn(&NetFlowRecord) + Send + Sync>;

/// Encode up to [`V5_MAX_RECORDS`] records into one v5 datagram.
///
/// Header layout and the 48-byte record layout follow the classic v5
/// wire format: all fields big-endian, timestamps expressed as router
/// uptime in milliseconds.
pub fn encode_v5(
    records: &[NetFlowRecord],
    flow_sequence: u32,
    uptime_ms: u32,
    unix_secs: u32,
    unix_nsecs: u32,
) -> Vec<u8> {
    let count = records.len().min(V5_MAX_RECORDS);
    let mut out = Vec::with_capacity(V5_HEADER_LEN + count * V5_RECORD_LEN);

    out.extend_from_slice(&5u16.to_be_bytes());
    out.extend_from_slice(&(count as u16).to_be_bytes());
    out.extend_from_slice(&uptime_ms.to_be_bytes());
    out.extend_from_slice(&unix_secs.to_be_bytes());
    out.extend_from_slice(&unix_nsecs.to_be_bytes());
    out.extend_from_slice(&flow_sequence.to_be_bytes());
    out.push(0); // engine_type
    out.push(0); // engine_id
    out.extend_from_slice(&0u16.to_be_bytes()); // sampling_interval

    for rec in &records[..count] {
        let f = &rec.flow;
        out.extend_from_slice(&f.tuple.src_ip.octets());
        out.extend_from_slice(&f.tuple.dst_ip.octets());
        out.extend_from_slice(&rec.next_hop.octets());
        out.extend_from_slice(&f.interface_id.to_be_bytes()); // input
        out.extend_from_slice(&0u16.to_be_bytes()); // output
        out.extend_from_slice(&(u32::try_from(f.packets).unwrap_or(u32::MAX)).to_be_bytes());
        out.extend_from_slice(&(u32::try_from(f.bytes).unwrap_or(u32::MAX)).to_be_bytes());
        out.extend_from_slice(&ns_to_uptime_ms(f.first_seen_ns).to_be_bytes());
        out.extend_from_slice(&ns_to_uptime_ms(f.last_seen_ns).to_be_bytes());
        out.extend_from_slice(&f.tuple.src_port.to_be_bytes());
        out.extend_from_slice(&f.tuple.dst_port.to_be_bytes());
        out.push(0); // pad1
        out.push(rec.tcp_flags_final);
        out.push(f.tuple.protocol);
        out.push(0); // tos
        out.extend_from_slice(&rec.src_as.to_be_bytes());
        out.extend_from_slice(&rec.dst_as.to_be_bytes());
        out.push(rec.src_mask);
        out.push(rec.dst_mask);
        out.extend_from_slice(&0u16.to_be_bytes()); // pad2
    }

    out
}

fn ns_to_uptime_ms(ns: u64) -> u32 {
    u32::try_from(ns / 1_000_000).unwrap_or(u32::MAX)
}

/// Periodic flow export task.
///
/// Snapshots the flow table every interval, flushes idle-evicted flows
/// first, and ships v5 datagrams to the collector. Stop is checked at
/// sub-second granularity so shutdown never waits a full interval.
pub struct FlowExporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub struct ExporterParams {
    pub flows: Arc<FlowTable>,
    pub collector: SocketAddr,
    pub interval: Duration,
    pub callback: Option<FlowExportCallback>,
    pub error_callback: Option<ErrorCallback>,
    pub ts_source: TimestampSource,
}

impl FlowExporter {
    pub fn spawn(params: ExporterParams) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("netflow-export".into())
            .spawn(move || run_export_loop(params, stop_flag))?;

        Ok(Self { stop, handle: Some(handle) })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlowExporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_export_loop(params: ExporterParams, stop: Arc<AtomicBool>) {
    let started = Instant::now();
    let mut sequence: u32 = 0;
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "netflow export socket unavailable, UDP path disabled");
            if let Some(cb) = &params.error_callback {
                cb(&format!("netflow socket: {e}"), -1);
            }
            None
        }
    };

    let tick = Duration::from_millis(200);
    let mut elapsed = Duration::ZERO;

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(tick);
        elapsed += tick;
        if elapsed < params.interval {
            continue;
        }
        elapsed = Duration::ZERO;

        let now_ns = params.ts_source.now_ns();
        let mut records: Vec<NetFlowRecord> = params
            .flows
            .evict_idle(now_ns)
            .into_iter()
            .map(NetFlowRecord::from_flow)
            .collect();
        records.extend(params.flows.scan_all().into_iter().map(NetFlowRecord::from_flow));

        if records.is_empty() {
            continue;
        }
        debug!(count = records.len(), "exporting flow records");

        if let Some(cb) = &params.callback {
            for rec in &records {
                cb(rec);
            }
        }

        if let Some(socket) = &socket {
            let uptime_ms =
                u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
            let unix_secs = u32::try_from(now_ns / 1_000_000_000).unwrap_or(u32::MAX);
            let unix_nsecs = (now_ns % 1_000_000_000) as u32;

            for chunk in records.chunks(V5_MAX_RECORDS) {
                sequence = sequence.wrapping_add(chunk.len() as u32);
                let datagram = encode_v5(chunk, sequence, uptime_ms, unix_secs, unix_nsecs);
                if let Err(e) = socket.send_to(&datagram, params.collector) {
                    warn!(error = %e, collector = %params.collector, "netflow export failed");
                    if let Some(cb) = &params.error_callback {
                        cb(&format!("netflow send: {e}"), -1);
                    }
                    break;
                }
            }
        }
    }
}
