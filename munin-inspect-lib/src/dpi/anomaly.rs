use crate::dissect::Protocol;

pub const ANOMALY_OVERSIZE_HTTP: u16 = 1;
pub const ANOMALY_SUSPICIOUS_USER_AGENT: u16 = 2;
pub const ANOMALY_PORT_MISMATCH: u16 = 3;

const HTTP_OVERSIZE_THRESHOLD: usize = 8192;
const USER_AGENT_MARKER: &[u8] = b"User-Agent: ";
const HTTP_STANDARD_PORTS: [u16; 2] = [80, 8080];

/// A detected protocol anomaly, attached to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyRecord {
    pub anomaly_type: u16,
    pub description: String,
    /// 0-10
    pub severity: u8,
}

/// Stateless anomaly predicates over one packet.
///
/// Every predicate that fires yields a record; the session caps how many
/// it retains.
pub fn detect(protocol: Protocol, dst_port: u16, payload: &[u8]) -> Vec<AnomalyRecord> {
    let mut anomalies = Vec::new();

    if protocol == Protocol::Http {
        if payload.len() > HTTP_OVERSIZE_THRESHOLD {
            anomalies.push(AnomalyRecord {
                anomaly_type: ANOMALY_OVERSIZE_HTTP,
                description: format!(
                    "HTTP packet exceeds normal header size: {} bytes",
                    payload.len()
                ),
                severity: 5,
            });
        }

        if contains(payload, USER_AGENT_MARKER) {
            anomalies.push(AnomalyRecord {
                anomaly_type: ANOMALY_SUSPICIOUS_USER_AGENT,
                description: "HTTP request contains suspicious User-Agent".to_string(),
                severity: 3,
            });
        }

        if !HTTP_STANDARD_PORTS.contains(&dst_port) {
            anomalies.push(AnomalyRecord {
                anomaly_type: ANOMALY_PORT_MISMATCH,
                description: format!("HTTP on non-standard port {dst_port}"),
                severity: 4,
            });
        }
    }

    anomalies
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_request_on_port_80_is_clean() {
        let found = detect(Protocol::Http, 80, b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(found.is_empty());
    }

    #[test]
    fn oversize_packet_fires_type_1() {
        let payload = vec![b'a'; 9000];
        let found = detect(Protocol::Http, 80, &payload);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].anomaly_type, ANOMALY_OVERSIZE_HTTP);
        assert_eq!(found[0].severity, 5);
        assert!(found[0].description.contains("9000"));
    }

    #[test]
    fn user_agent_fires_type_2() {
        let found = detect(Protocol::Http, 80, b"GET / HTTP/1.1\r\nUser-Agent: curl/8\r\n\r\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].anomaly_type, ANOMALY_SUSPICIOUS_USER_AGENT);
        assert_eq!(found[0].severity, 3);
    }

    #[test]
    fn nonstandard_port_fires_type_3() {
        let found = detect(Protocol::Http, 8888, b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].anomaly_type, ANOMALY_PORT_MISMATCH);
        assert_eq!(found[0].severity, 4);
        assert!(found[0].description.contains("8888"));
    }

    #[test]
    fn multiple_predicates_can_fire_together() {
        let mut payload = b"GET / HTTP/1.1\r\nUser-Agent: x\r\n".to_vec();
        payload.resize(9000, b'a');
        let found = detect(Protocol::Http, 4444, &payload);
        let types: Vec<u16> = found.iter().map(|a| a.anomaly_type).collect();
        assert_eq!(
            types,
            vec![ANOMALY_OVERSIZE_HTTP, ANOMALY_SUSPICIOUS_USER_AGENT, ANOMALY_PORT_MISMATCH]
        );
    }

    #[test]
    fn non_http_sessions_are_ignored() {
        let found = detect(Protocol::Dns, 9999, b"User-Agent: not-http");
        assert!(found.is_empty());
    }
}
