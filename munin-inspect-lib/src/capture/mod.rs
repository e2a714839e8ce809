#![forbid(unsafe_code)]

pub mod backend;
pub mod decode;
pub mod flow;
pub mod netflow;
pub mod ring;
pub mod session;

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub use backend::{available_backends, BackendKind, PacketBackend, QueueBackend, QueueHandle, RawFrame};
pub use flow::{FlowRecord, FlowState, FlowTable, FlowUpdate};
pub use netflow::{FlowExportCallback, NetFlowRecord};
pub use ring::{BufferCipher, RingBuffer};
pub use session::{CaptureSession, ErrorCallback};

use crate::error::{InspectError, Result};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 5-tuple flow identifier plus VLAN tag. IPv4 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub vlan_id: u16,
}

impl FlowTuple {
    /// Deterministic flow identifier: FNV-1a over the tuple bytes.
    ///
    /// The byte encoding is fixed (addresses as octets, ports and VLAN
    /// big-endian) so the same tuple hashes identically across runs
    /// and across hosts.
    pub fn flow_id(&self) -> u64 {
        let mut bytes = [0u8; 15];
        bytes[0..4].copy_from_slice(&self.src_ip.octets());
        bytes[4..8].copy_from_slice(&self.dst_ip.octets());
        bytes[8..10].copy_from_slice(&self.src_port.to_be_bytes());
        bytes[10..12].copy_from_slice(&self.dst_port.to_be_bytes());
        bytes[12] = self.protocol;
        bytes[13..15].copy_from_slice(&self.vlan_id.to_be_bytes());

        let mut hash = FNV_OFFSET_BASIS;
        for b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} (proto={}, vlan={})",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol, self.vlan_id
        )
    }
}

/// Packet direction relative to the monitored interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketDirection {
    #[default]
    Unknown,
    Ingress,
    Egress,
    /// SPAN/ERSPAN mirrored copy
    Mirrored,
}

/// Timestamp source selection. Advisory: PTP degrades to realtime when
/// the host has no PTP clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampSource {
    Ntp,
    #[default]
    Ptp,
    Kernel,
    Hardware,
}

impl TimestampSource {
    /// Resolve the advisory source against what the host actually has.
    pub fn resolve(self) -> TimestampSource {
        match self {
            TimestampSource::Ptp if !Path::new("/dev/ptp0").exists() => TimestampSource::Ntp,
            other => other,
        }
    }

    pub fn now_ns(self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Per-packet metadata attached to every ring buffer slot
#[derive(Debug, Clone, Copy)]
pub struct PacketMetadata {
    pub packet_id: u64,
    pub timestamp_ns: u64,
    pub ts_source: TimestampSource,
    pub direction: PacketDirection,
    pub interface_id: u32,
    pub vlan_id: u16,
    pub payload_length: u16,
    pub wire_length: u16,
    pub encapsulation_level: u8,
}

/// A captured packet handed to the poll callback.
///
/// The payload borrows directly from the ring buffer; the view is only
/// valid for the duration of the callback invocation.
#[derive(Debug)]
pub struct CapturedPacket<'a> {
    pub metadata: PacketMetadata,
    pub payload: &'a [u8],
}

/// Capture statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub packets_captured: u64,
    pub packets_dropped: u64,
    pub packets_errors: u64,
    pub bytes_captured: u64,
    pub buffer_used_pct: u64,
    pub flows_active: u64,
    pub flows_total: u64,
    pub avg_pps: f64,
    pub avg_throughput_mbps: f64,
}

/// Check a firmware image against its detached signature.
///
/// The core only enforces that both artifacts are present and the
/// signature is non-empty; the actual signature scheme is supplied by
/// the platform. Returns `Ok(true)` when the pair is acceptable,
/// `Ok(false)` when the signature is present but empty (treated as
/// invalid), and an error when either path cannot be read.
pub fn verify_firmware<P: AsRef<Path>>(firmware: P, signature: P) -> Result<bool> {
    let fw = firmware.as_ref();
    let sig = signature.as_ref();

    let fw_meta = std::fs::metadata(fw)
        .map_err(|e| InspectError::InvalidArgument(format!("firmware {}: {e}", fw.display())))?;
    let sig_meta = std::fs::metadata(sig)
        .map_err(|e| InspectError::InvalidArgument(format!("signature {}: {e}", sig.display())))?;

    if fw_meta.len() == 0 {
        return Err(InspectError::InvalidArgument("firmware image is empty".into()));
    }

    Ok(sig_meta.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FlowTuple {
        FlowTuple {
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 52344,
            dst_port: 80,
            protocol: 6,
            vlan_id: 0,
        }
    }

    #[test]
    fn flow_id_is_deterministic() {
        assert_eq!(tuple().flow_id(), tuple().flow_id());
    }

    #[test]
    fn flow_id_depends_on_every_field() {
        let base = tuple();
        let mut other = base;
        other.vlan_id = 100;
        assert_ne!(base.flow_id(), other.flow_id());

        let mut other = base;
        other.dst_port = 8080;
        assert_ne!(base.flow_id(), other.flow_id());
    }

    #[test]
    fn tuple_display_is_readable() {
        let s = tuple().to_string();
        assert!(s.contains("10.0.0.1:52344"));
        assert!(s.contains("proto=6"));
    }

    #[test]
    fn firmware_check_requires_nonempty_signature() {
        let dir = std::env::temp_dir();
        let fw = dir.join("munin-fw-test.bin");
        let sig = dir.join("munin-fw-test.sig");
        std::fs::write(&fw, b"firmware-bytes").unwrap();
        std::fs::write(&sig, b"").unwrap();
        assert!(!verify_firmware(&fw, &sig).unwrap());

        std::fs::write(&sig, b"sig").unwrap();
        assert!(verify_firmware(&fw, &sig).unwrap());

        let _ = std::fs::remove_file(&fw);
        let _ = std::fs::remove_file(&sig);
    }

    #[test]
    fn firmware_check_errors_on_missing_file() {
        assert!(verify_firmware("/nonexistent/fw", "/nonexistent/sig").is_err());
    }
}
