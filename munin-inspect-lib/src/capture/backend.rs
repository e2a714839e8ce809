use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::capture::PacketDirection;
use crate::error::{InspectError, Result};

/// Capture backend families, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Dpdk,
    Xdp,
    PfRing,
    Pcap,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Dpdk => "DPDK",
            BackendKind::Xdp => "XDP",
            BackendKind::PfRing => "PF_RING",
            BackendKind::Pcap => "libpcap",
        };
        f.write_str(name)
    }
}

/// A raw frame as delivered by a backend.
///
/// `timestamp_ns` is `Some` when the backend stamped the frame (hardware
/// or kernel timestamping); otherwise the session stamps it on receipt.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub bytes: Bytes,
    pub wire_length: u16,
    pub timestamp_ns: Option<u64>,
    pub interface_id: u32,
    pub direction: PacketDirection,
}

/// Frame source abstraction over DPDK / XDP / PF_RING / libpcap.
///
/// Implementations parse their own filter syntax; a rejected filter
/// must leave the previously installed one active.
pub trait PacketBackend: Send {
    fn kind(&self) -> BackendKind;

    fn set_filter(&mut self, filter: &str) -> Result<()>;

    /// Deliver up to `max` frames, waiting at most `timeout` for the
    /// first one. An empty vec means the timeout elapsed quietly.
    fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<RawFrame>>;
}

/// Producer handle feeding a [`QueueBackend`]
#[derive(Clone)]
pub struct QueueHandle {
    tx: Sender<RawFrame>,
}

impl QueueHandle {
    pub fn push(&self, frame: RawFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| InspectError::BackendUnavailable("queue backend closed".into()))
    }

    pub fn push_bytes(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let bytes = bytes.into();
        let wire_length = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
        self.push(RawFrame {
            bytes,
            wire_length,
            timestamp_ns: None,
            interface_id: 0,
            direction: PacketDirection::Ingress,
        })
    }
}

/// In-process frame queue backend.
///
/// The always-available last resort: replay tooling and tests feed it
/// through a [`QueueHandle`]. Filters are accepted verbatim and only
/// recorded; there is no kernel to compile them into.
pub struct QueueBackend {
    rx: Receiver<RawFrame>,
    filter: Option<String>,
}

impl QueueBackend {
    pub fn new() -> (QueueHandle, Self) {
        let (tx, rx) = mpsc::channel();
        (QueueHandle { tx }, Self { rx, filter: None })
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

impl PacketBackend for QueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pcap
    }

    fn set_filter(&mut self, filter: &str) -> Result<()> {
        // No compiler behind this backend; reject only strings that no
        // BPF parser would ever take.
        if filter.bytes().any(|b| b == 0 || !b.is_ascii()) {
            return Err(InspectError::FilterInvalid(filter.to_string()));
        }
        self.filter = if filter.is_empty() { None } else { Some(filter.to_string()) };
        Ok(())
    }

    fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        if max == 0 {
            return Ok(frames);
        }

        match self.rx.recv_timeout(timeout) {
            Ok(frame) => frames.push(frame),
            Err(RecvTimeoutError::Timeout) => return Ok(frames),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(InspectError::BackendUnavailable("queue backend closed".into()))
            }
        }
        while frames.len() < max {
            match self.rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(_) => break,
            }
        }
        Ok(frames)
    }
}

/// Probe the host for usable capture backends.
///
/// libpcap closes the list as the last-resort fallback.
pub fn available_backends() -> Vec<BackendKind> {
    let mut found = Vec::new();

    if Path::new("/usr/bin/dpdk-testpmd").exists() || Path::new("/usr/local/bin/dpdk-testpmd").exists()
    {
        found.push(BackendKind::Dpdk);
    }
    if Path::new("/sys/fs/bpf").exists() {
        found.push(BackendKind::Xdp);
    }
    if Path::new("/proc/net/pf_ring").exists() {
        found.push(BackendKind::PfRing);
    }
    found.push(BackendKind::Pcap);

    debug!(?found, "backend probe complete");
    found
}
