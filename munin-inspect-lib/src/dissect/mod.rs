#![forbid(unsafe_code)]

pub mod dns;
pub mod http;
pub mod smb;
pub mod smtp;
pub mod tls;

use std::fmt;

pub use dns::DnsData;
pub use http::HttpData;
pub use tls::TlsData;

/// Application protocols the engine can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Unknown,
    Http,
    Https,
    Dns,
    Smtp,
    Smtps,
    Ftp,
    Ftps,
    Smb,
    Ssh,
    Telnet,
    Snmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Unknown => "unknown",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Dns => "dns",
            Protocol::Smtp => "smtp",
            Protocol::Smtps => "smtps",
            Protocol::Ftp => "ftp",
            Protocol::Ftps => "ftps",
            Protocol::Smb => "smb",
            Protocol::Ssh => "ssh",
            Protocol::Telnet => "telnet",
            Protocol::Snmp => "snmp",
        };
        f.write_str(name)
    }
}

/// Parsed first-packet record, at most one per session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolData {
    Http(HttpData),
    Dns(DnsData),
    Tls(TlsData),
}

/// How a session's protocol was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub protocol: Protocol,
    /// 0-100; payload-based hits score 100, port-based 50
    pub confidence: u8,
    /// `packets_seen` on the session when classification succeeded
    pub detection_tick: u32,
}

pub const CONFIDENCE_PAYLOAD: u8 = 100;
pub const CONFIDENCE_PORT: u8 = 50;

/// Run the payload dissector cascade in its fixed order:
/// HTTP, DNS, TLS, SMTP, SMB. First match wins.
pub fn classify_payload(payload: &[u8]) -> Option<(Protocol, Option<ProtocolData>)> {
    if payload.is_empty() {
        return None;
    }
    if let Some(data) = http::dissect(payload) {
        return Some((Protocol::Http, Some(ProtocolData::Http(data))));
    }
    if let Some(data) = dns::dissect(payload) {
        return Some((Protocol::Dns, Some(ProtocolData::Dns(data))));
    }
    if let Some(data) = tls::dissect(payload) {
        return Some((Protocol::Https, Some(ProtocolData::Tls(data))));
    }
    if smtp::dissect(payload) {
        return Some((Protocol::Smtp, None));
    }
    if smb::dissect(payload) {
        return Some((Protocol::Smb, None));
    }
    None
}

/// Well-known-port fallback, applied only when every payload dissector
/// declines.
pub fn classify_by_port(src_port: u16, dst_port: u16) -> Protocol {
    for port in [dst_port, src_port] {
        let proto = match port {
            80 | 8080 => Protocol::Http,
            443 => Protocol::Https,
            53 => Protocol::Dns,
            25 | 587 => Protocol::Smtp,
            465 => Protocol::Smtps,
            21 => Protocol::Ftp,
            990 => Protocol::Ftps,
            445 => Protocol::Smb,
            22 => Protocol::Ssh,
            23 => Protocol::Telnet,
            161 => Protocol::Snmp,
            _ => Protocol::Unknown,
        };
        if proto != Protocol::Unknown {
            return proto;
        }
    }
    Protocol::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_prefers_http_over_port() {
        let (proto, data) = classify_payload(b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(proto, Protocol::Http);
        assert!(matches!(data, Some(ProtocolData::Http(_))));
    }

    #[test]
    fn empty_payload_declines() {
        assert!(classify_payload(b"").is_none());
    }

    #[test]
    fn tls_record_classifies_https() {
        let (proto, _) = classify_payload(&[0x16, 0x03, 0x03, 0x00, 0x20]).unwrap();
        assert_eq!(proto, Protocol::Https);
    }

    #[test]
    fn port_fallback_map() {
        assert_eq!(classify_by_port(40000, 80), Protocol::Http);
        assert_eq!(classify_by_port(40000, 8080), Protocol::Http);
        assert_eq!(classify_by_port(40000, 443), Protocol::Https);
        assert_eq!(classify_by_port(40000, 53), Protocol::Dns);
        assert_eq!(classify_by_port(40000, 587), Protocol::Smtp);
        assert_eq!(classify_by_port(40000, 465), Protocol::Smtps);
        assert_eq!(classify_by_port(40000, 21), Protocol::Ftp);
        assert_eq!(classify_by_port(40000, 990), Protocol::Ftps);
        assert_eq!(classify_by_port(40000, 445), Protocol::Smb);
        assert_eq!(classify_by_port(40000, 22), Protocol::Ssh);
        assert_eq!(classify_by_port(40000, 23), Protocol::Telnet);
        assert_eq!(classify_by_port(40000, 161), Protocol::Snmp);
        assert_eq!(classify_by_port(40000, 12345), Protocol::Unknown);
    }

    #[test]
    fn port_fallback_checks_source_side_too() {
        assert_eq!(classify_by_port(53, 40000), Protocol::Dns);
    }
}
