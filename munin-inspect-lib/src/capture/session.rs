use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::capture::backend::{PacketBackend, RawFrame};
use crate::capture::decode::decode_frame;
use crate::capture::flow::{FlowRecord, FlowTable, FlowUpdate};
use crate::capture::netflow::{
    ExporterParams, FlowExportCallback, FlowExporter, DEFAULT_COLLECTOR_PORT,
};
use crate::capture::ring::{BufferCipher, RingBuffer};
use crate::capture::{
    CaptureStats, CapturedPacket, FlowTuple, PacketMetadata, TimestampSource,
};
use crate::error::{InspectError, Result};
use crate::telemetry::Metrics;

const DEFAULT_BUFFER_MB: u32 = 256;
const POLL_BATCH: usize = 64;

/// Recoverable-fault callback: short message plus an integer code.
pub type ErrorCallback = Arc<dyn Fn(&str, i32) + Send + Sync>;

struct EncryptionSettings {
    cipher_suite: String,
    key_path: String,
}

struct StatCounters {
    packets_captured: u64,
    packets_dropped: u64,
    packets_errors: u64,
    bytes_captured: u64,
}

/// Capture session: owns the ring buffer and the flow table, runs the
/// poll loop, and carries the export/encryption/error hooks.
pub struct CaptureSession {
    backend: Mutex<Box<dyn PacketBackend>>,
    interface: String,
    ring: RingBuffer,
    flows: RwLock<Option<Arc<FlowTable>>>,
    running: AtomicBool,
    ts_source: TimestampSource,
    snaplen: AtomicU16,
    filter: ArcSwap<String>,
    counters: RwLock<StatCounters>,
    error_cb: RwLock<Option<ErrorCallback>>,
    exporter: Mutex<Option<FlowExporter>>,
    encryption: RwLock<Option<EncryptionSettings>>,
    metrics: Option<Arc<Metrics>>,
    started_at: Instant,
}

impl CaptureSession {
    /// Build a session over `backend`. A zero `buffer_mb` selects the
    /// 256 MiB default.
    pub fn new(
        backend: Box<dyn PacketBackend>,
        interface: &str,
        buffer_mb: u32,
        ts_source: TimestampSource,
    ) -> Result<Self> {
        if interface.is_empty() {
            return Err(InspectError::InvalidArgument("interface name is empty".into()));
        }
        let buffer_mb = if buffer_mb == 0 { DEFAULT_BUFFER_MB } else { buffer_mb };
        let resolved = ts_source.resolve();
        if resolved != ts_source {
            debug!(requested = ?ts_source, using = ?resolved, "timestamp source degraded");
        }

        Ok(Self {
            backend: Mutex::new(backend),
            interface: interface.to_string(),
            ring: RingBuffer::new(buffer_mb)?,
            flows: RwLock::new(None),
            running: AtomicBool::new(false),
            ts_source: resolved,
            snaplen: AtomicU16::new(0),
            filter: ArcSwap::from_pointee(String::new()),
            counters: RwLock::new(StatCounters {
                packets_captured: 0,
                packets_dropped: 0,
                packets_errors: 0,
                bytes_captured: 0,
            }),
            error_cb: RwLock::new(None),
            exporter: Mutex::new(None),
            encryption: RwLock::new(None),
            metrics: None,
            started_at: Instant::now(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn start(&self, snaplen: u16, filter: Option<&str>) -> Result<()> {
        if let Some(f) = filter {
            self.set_filter(f)?;
        }
        self.snaplen.store(snaplen, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
        info!(interface = %self.interface, snaplen, "capture started");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        info!(interface = %self.interface, "capture stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Install a new BPF filter. A backend rejection leaves the previous
    /// filter active and returns `FilterInvalid`.
    pub fn set_filter(&self, filter: &str) -> Result<()> {
        let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        match backend.set_filter(filter) {
            Ok(()) => {
                self.filter.store(Arc::new(filter.to_string()));
                Ok(())
            }
            Err(e) => {
                warn!(filter, error = %e, "filter rejected by backend");
                Err(InspectError::FilterInvalid(filter.to_string()))
            }
        }
    }

    pub fn current_filter(&self) -> String {
        self.filter.load().as_ref().clone()
    }

    /// Drain up to one batch of frames from the backend.
    ///
    /// Each frame is appended to the ring buffer, metered into the flow
    /// table, and handed to `callback` as a borrowed [`CapturedPacket`].
    /// A `false` return halts the current poll. Returns the number of
    /// packets delivered to the callback.
    pub fn poll(
        &self,
        timeout: Duration,
        mut callback: impl FnMut(&CapturedPacket<'_>) -> bool,
    ) -> Result<usize> {
        if !self.is_running() {
            return Err(InspectError::NotRunning);
        }

        let frames = {
            let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());
            match backend.poll(POLL_BATCH, timeout) {
                Ok(frames) => frames,
                Err(e) => {
                    self.report_error(&format!("backend poll: {e}"), -1);
                    return Err(e);
                }
            }
        };

        let poll_started = Instant::now();
        let snaplen = self.snaplen.load(Ordering::Relaxed);
        let mut processed = 0usize;

        for frame in frames {
            if !self.process_frame(&frame, snaplen, &mut callback, &mut processed) {
                break;
            }
        }

        if let Some(m) = &self.metrics {
            m.poll_duration_seconds
                .record(poll_started.elapsed().as_secs_f64(), &[]);
        }
        Ok(processed)
    }

    /// Returns false when the callback asked to halt the poll.
    fn process_frame(
        &self,
        frame: &RawFrame,
        snaplen: u16,
        callback: &mut impl FnMut(&CapturedPacket<'_>) -> bool,
        processed: &mut usize,
    ) -> bool {
        let data: &[u8] = if snaplen > 0 && frame.bytes.len() > usize::from(snaplen) {
            &frame.bytes[..usize::from(snaplen)]
        } else {
            &frame.bytes
        };
        let timestamp_ns = frame.timestamp_ns.unwrap_or_else(|| self.ts_source.now_ns());

        let appended = match self.ring.append(data) {
            Ok(appended) => appended,
            Err(InspectError::CapacityExhausted(_)) => {
                self.bump(|c| c.packets_dropped += 1);
                if let Some(m) = &self.metrics {
                    m.packets_dropped_total.add(1, &[]);
                }
                return true;
            }
            Err(e) => {
                self.report_error(&format!("ring append: {e}"), -1);
                self.bump(|c| c.packets_errors += 1);
                return true;
            }
        };

        let decoded = decode_frame(data);
        let mut vlan_id = 0;
        let mut encapsulation_level = 0;
        match &decoded {
            Some(d) => {
                vlan_id = d.tuple.vlan_id;
                encapsulation_level = d.encapsulation_level;
                if let Some(flows) = self.flows.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
                    flows.update(
                        &d.tuple,
                        FlowUpdate {
                            payload_len: u32::try_from(d.payload_len).unwrap_or(u32::MAX),
                            packet_id: appended.packet_id,
                            timestamp_ns,
                            direction: frame.direction,
                            tcp_flags: d.tcp_flags,
                            interface_id: u16::try_from(frame.interface_id).unwrap_or(u16::MAX),
                        },
                    );
                }
            }
            None => {
                self.bump(|c| c.packets_errors += 1);
            }
        }

        self.bump(|c| {
            c.packets_captured += 1;
            c.bytes_captured += data.len() as u64;
        });
        if let Some(m) = &self.metrics {
            m.packets_captured_total.add(1, &[]);
            m.bytes_captured_total.add(data.len() as u64, &[]);
        }

        let metadata = PacketMetadata {
            packet_id: appended.packet_id,
            timestamp_ns,
            ts_source: self.ts_source,
            direction: frame.direction,
            interface_id: frame.interface_id,
            vlan_id,
            payload_length: u16::try_from(data.len()).unwrap_or(u16::MAX),
            wire_length: frame.wire_length,
            encapsulation_level,
        };

        let keep_going = self.ring.with_slot(appended.offset, data.len(), |payload| {
            callback(&CapturedPacket { metadata, payload })
        });
        self.ring.consume(data.len() as u64);
        *processed += 1;
        keep_going
    }

    pub fn stats(&self) -> CaptureStats {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        let elapsed = self.started_at.elapsed().as_secs_f64().max(f64::EPSILON);
        let (flows_active, flows_total) =
            match self.flows.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
                Some(flows) => (flows.len() as u64, flows.total_flows()),
                None => (0, 0),
            };

        CaptureStats {
            packets_captured: counters.packets_captured,
            packets_dropped: counters.packets_dropped,
            packets_errors: counters.packets_errors,
            bytes_captured: counters.bytes_captured,
            buffer_used_pct: self.ring.used_pct(),
            flows_active,
            flows_total,
            avg_pps: counters.packets_captured as f64 / elapsed,
            avg_throughput_mbps: counters.bytes_captured as f64 * 8.0 / elapsed / 1_000_000.0,
        }
    }

    pub fn flow_enable(&self, table_size: u32, idle_timeout_sec: u32) -> Result<()> {
        let table_size = if table_size == 0 { 100_000 } else { table_size };
        let idle_timeout_sec = if idle_timeout_sec == 0 { 300 } else { idle_timeout_sec };
        let table = Arc::new(FlowTable::new(table_size, idle_timeout_sec)?);
        *self.flows.write().unwrap_or_else(|e| e.into_inner()) = Some(table);
        Ok(())
    }

    pub fn flow_disable(&self) {
        // Stop the exporter first; it holds a handle to the table.
        if let Some(mut exporter) = self.exporter.lock().unwrap_or_else(|e| e.into_inner()).take() {
            exporter.stop();
        }
        *self.flows.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn flow_lookup(&self, tuple: &FlowTuple) -> Result<FlowRecord> {
        self.flows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .ok_or(InspectError::NotRunning)?
            .lookup(tuple)
            .ok_or(InspectError::NotFound)
    }

    pub fn flow_get_all(&self) -> Result<Vec<FlowRecord>> {
        Ok(self
            .flows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .ok_or(InspectError::NotRunning)?
            .scan_all())
    }

    /// Start periodic NetFlow export. Flow metering must be enabled; a
    /// zero port selects the conventional collector port 2055.
    pub fn netflow_enable(
        &self,
        collector_ip: &str,
        collector_port: u16,
        export_interval_sec: u32,
        callback: Option<FlowExportCallback>,
    ) -> Result<()> {
        let flows = self
            .flows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                InspectError::InvalidArgument("flow metering must be enabled before export".into())
            })?;

        let ip: IpAddr = collector_ip
            .parse()
            .map_err(|_| InspectError::InvalidArgument(format!("collector ip: {collector_ip}")))?;
        let port = if collector_port == 0 { DEFAULT_COLLECTOR_PORT } else { collector_port };
        let interval = if export_interval_sec == 0 { 60 } else { export_interval_sec };

        let exporter = FlowExporter::spawn(ExporterParams {
            flows,
            collector: SocketAddr::new(ip, port),
            interval: Duration::from_secs(u64::from(interval)),
            callback,
            error_callback: self.error_cb.read().unwrap_or_else(|e| e.into_inner()).clone(),
            ts_source: self.ts_source,
        })?;

        let mut slot = self.exporter.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut old) = slot.replace(exporter) {
            old.stop();
        }
        info!(collector = %ip, port, interval, "netflow export enabled");
        Ok(())
    }

    /// Declare at-rest encryption for the ring buffer. The key file must
    /// exist; the cipher itself is installed separately via
    /// [`CaptureSession::set_cipher`].
    pub fn set_encryption(&self, cipher_suite: &str, key_path: &str) -> Result<()> {
        if cipher_suite.is_empty() {
            return Err(InspectError::InvalidArgument("cipher suite is empty".into()));
        }
        if !std::path::Path::new(key_path).exists() {
            return Err(InspectError::InvalidArgument(format!("key file not found: {key_path}")));
        }
        *self.encryption.write().unwrap_or_else(|e| e.into_inner()) = Some(EncryptionSettings {
            cipher_suite: cipher_suite.to_string(),
            key_path: key_path.to_string(),
        });
        info!(cipher_suite, "ring buffer encryption declared");
        Ok(())
    }

    pub fn set_cipher(&self, cipher: Arc<dyn BufferCipher>) -> Result<()> {
        if self.encryption.read().unwrap_or_else(|e| e.into_inner()).is_none() {
            return Err(InspectError::InvalidArgument(
                "call set_encryption before installing a cipher".into(),
            ));
        }
        self.ring.set_cipher(Some(cipher));
        Ok(())
    }

    /// Declared encryption settings, `(cipher_suite, key_path)`.
    pub fn encryption_settings(&self) -> Option<(String, String)> {
        self.encryption
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|e| (e.cipher_suite.clone(), e.key_path.clone()))
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        *self.error_cb.write().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    fn report_error(&self, message: &str, code: i32) {
        if let Some(cb) = self.error_cb.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            cb(message, code);
        }
    }

    fn bump(&self, f: impl FnOnce(&mut StatCounters)) {
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        f(&mut counters);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
        if let Some(mut exporter) = self.exporter.lock().unwrap_or_else(|e| e.into_inner()).take() {
            exporter.stop();
        }
    }
}
