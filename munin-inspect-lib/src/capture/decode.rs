use std::net::Ipv4Addr;

use crate::capture::FlowTuple;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Result of decoding one Ethernet frame down to the transport payload
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame {
    pub tuple: FlowTuple,
    pub tcp_flags: u8,
    pub payload_offset: usize,
    pub payload_len: usize,
    pub encapsulation_level: u8,
}

/// Decode Ethernet / optional 802.1Q / IPv4 / TCP-or-UDP headers.
///
/// Returns `None` for truncated frames and non-IPv4 ethertypes; the
/// caller counts those as packet errors. Protocols other than TCP and
/// UDP decode with zero ports so ICMP and friends still aggregate.
pub fn decode_frame(bytes: &[u8]) -> Option<DecodedFrame> {
    if bytes.len() < ETH_HEADER_LEN {
        return None;
    }

    let mut ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
    let mut offset = ETH_HEADER_LEN;
    let mut vlan_id = 0u16;
    let mut encapsulation_level = 0u8;

    if ethertype == ETHERTYPE_VLAN {
        if bytes.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
            return None;
        }
        vlan_id = u16::from_be_bytes([bytes[14], bytes[15]]) & 0x0FFF;
        ethertype = u16::from_be_bytes([bytes[16], bytes[17]]);
        offset += VLAN_TAG_LEN;
        encapsulation_level = 1;
    }

    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let ip = bytes.get(offset..)?;
    if ip.len() < IPV4_MIN_HEADER_LEN || ip[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(ip[0] & 0x0F) * 4;
    if ihl < IPV4_MIN_HEADER_LEN || ip.len() < ihl {
        return None;
    }

    let total_len = usize::from(u16::from_be_bytes([ip[2], ip[3]]));
    if total_len < ihl {
        return None;
    }
    // Snap-length truncation may cut the frame short of the IP total
    // length; decode whatever was captured.
    let end = total_len.min(ip.len());

    let protocol = ip[9];
    let src_ip = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
    let dst_ip = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);

    let transport = &ip[ihl..end];
    let (src_port, dst_port, tcp_flags, header_len) = match protocol {
        IPPROTO_TCP => {
            if transport.len() < 20 {
                return None;
            }
            let data_offset = usize::from(transport[12] >> 4) * 4;
            if data_offset < 20 || transport.len() < data_offset {
                return None;
            }
            (
                u16::from_be_bytes([transport[0], transport[1]]),
                u16::from_be_bytes([transport[2], transport[3]]),
                transport[13],
                data_offset,
            )
        }
        IPPROTO_UDP => {
            if transport.len() < 8 {
                return None;
            }
            (
                u16::from_be_bytes([transport[0], transport[1]]),
                u16::from_be_bytes([transport[2], transport[3]]),
                0,
                8,
            )
        }
        _ => (0, 0, 0, 0),
    };

    let payload_offset = offset + ihl + header_len;
    let payload_len = end - ihl - header_len;

    Some(DecodedFrame {
        tuple: FlowTuple { src_ip, dst_ip, src_port, dst_port, protocol, vlan_id },
        tcp_flags,
        payload_offset,
        payload_len,
        encapsulation_level,
    })
}
