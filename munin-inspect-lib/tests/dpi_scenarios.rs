//! End-to-end DPI engine scenarios over literal protocol payloads.

use std::net::Ipv4Addr;

use munin_inspect_lib::config::DpiConfig;
use munin_inspect_lib::dissect::{Protocol, ProtocolData};
use munin_inspect_lib::dpi::{DpiEngine, RuleSpec, SessionState};
use munin_inspect_lib::error::InspectError;
use munin_inspect_lib::FlowTuple;

fn tcp_tuple(src_port: u16, dst_port: u16) -> FlowTuple {
    FlowTuple {
        src_ip: Ipv4Addr::new(10, 0, 0, 1),
        dst_ip: Ipv4Addr::new(10, 0, 0, 2),
        src_port,
        dst_port,
        protocol: 6,
        vlan_id: 0,
    }
}

fn engine() -> DpiEngine {
    DpiEngine::new(DpiConfig { reassembly_buffer_mb: 1, ..DpiConfig::default() })
        .expect("default dpi config is valid")
}

#[test]
fn http_request_classification() {
    let engine = engine();
    let tuple = tcp_tuple(52344, 80);

    engine
        .process_packet(&tuple, b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n", 1_000, false)
        .unwrap();

    assert_eq!(engine.session_count(), 1);
    let session = engine.get_session(&tuple).unwrap();
    assert_eq!(session.classification.protocol, Protocol::Http);
    assert_eq!(session.state, SessionState::Established);
    assert!(session.anomalies.is_empty());

    match engine.protocol_data(&tuple) {
        Some(ProtocolData::Http(http)) => {
            assert!(http.is_request);
            assert_eq!(http.method, "GET");
            assert_eq!(http.uri, "/index");
        }
        other => panic!("expected parsed HTTP request, got {other:?}"),
    }
}

#[test]
fn http_on_nonstandard_port_raises_anomaly() {
    let engine = engine();
    let tuple = tcp_tuple(52344, 8888);

    engine
        .process_packet(&tuple, b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n", 1_000, false)
        .unwrap();

    let session = engine.get_session(&tuple).unwrap();
    assert_eq!(session.classification.protocol, Protocol::Http);
    assert_eq!(session.anomalies.len(), 1);
    assert_eq!(session.anomalies[0].anomaly_type, 3);
    assert_eq!(session.anomalies[0].severity, 4);
    assert!(session.anomalies[0].description.contains("8888"));
}

#[test]
fn tls12_client_hello_classifies_https() {
    let engine = engine();
    let tuple = tcp_tuple(40000, 443);

    engine
        .process_packet(&tuple, &[0x16, 0x03, 0x03, 0x00, 0x20], 1_000, false)
        .unwrap();

    let session = engine.get_session(&tuple).unwrap();
    assert_eq!(session.classification.protocol, Protocol::Https);
    assert_eq!(session.classification.confidence, 100);

    match engine.protocol_data(&tuple) {
        Some(ProtocolData::Tls(tls)) => {
            assert_eq!(tls.version_major, 3);
            assert_eq!(tls.version_minor, 3);
        }
        other => panic!("expected parsed TLS record, got {other:?}"),
    }
}

#[test]
fn dns_query_parses_header() {
    let engine = engine();
    let tuple = FlowTuple { protocol: 17, ..tcp_tuple(33000, 53) };
    let payload = [
        0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    engine.process_packet(&tuple, &payload, 1_000, false).unwrap();

    let session = engine.get_session(&tuple).unwrap();
    assert_eq!(session.classification.protocol, Protocol::Dns);

    match engine.protocol_data(&tuple) {
        Some(ProtocolData::Dns(dns)) => {
            assert_eq!(dns.transaction_id, 0x1234);
            assert!(dns.is_query);
            assert_eq!(dns.response_code, 0);
        }
        other => panic!("expected parsed DNS message, got {other:?}"),
    }
}

#[test]
fn rule_add_remove_roundtrip() {
    let engine = engine();

    let id = engine.add_rule(RuleSpec::regex("evil", "evil")).unwrap();
    assert_eq!(id, 1);
    assert_eq!(engine.rule_count(), 1);

    engine.remove_rule(id).unwrap();
    assert_eq!(engine.rule_count(), 0);

    assert!(matches!(engine.remove_rule(id), Err(InspectError::NotFound)));
}

#[test]
fn zero_length_payload_is_inert() {
    let engine = engine();
    let tuple = tcp_tuple(1, 80);

    let emitted = engine.process_packet(&tuple, b"", 1_000, false).unwrap();
    assert_eq!(emitted, 0);
    assert_eq!(engine.session_count(), 0);
    assert!(engine.get_session(&tuple).is_none());
}

#[test]
fn tls_boundary_lengths() {
    let engine = engine();

    let five = tcp_tuple(1, 9999);
    engine.process_packet(&five, &[0x16, 0x03, 0x03, 0x00, 0x20], 1, false).unwrap();
    assert_eq!(engine.get_session(&five).unwrap().classification.protocol, Protocol::Https);

    // Four bytes cannot be a TLS record; no payload dissector accepts,
    // and the unremarkable port yields no fallback either.
    let four = tcp_tuple(2, 9999);
    engine.process_packet(&four, &[0x16, 0x03, 0x03, 0x00], 1, false).unwrap();
    assert_eq!(engine.get_session(&four).unwrap().classification.protocol, Protocol::Unknown);
}

#[test]
fn http_prefix_space_is_significant() {
    let engine = engine();

    let hit = tcp_tuple(1, 9999);
    engine.process_packet(&hit, b"GET ", 1, false).unwrap();
    assert_eq!(engine.get_session(&hit).unwrap().classification.protocol, Protocol::Http);

    let miss = tcp_tuple(2, 9999);
    engine.process_packet(&miss, b"GET/index", 1, false).unwrap();
    assert_eq!(engine.get_session(&miss).unwrap().classification.protocol, Protocol::Unknown);
}

#[test]
fn alert_emission_path_is_wired() {
    let engine = engine();
    let mut spec = RuleSpec::regex("exfil marker", "SECRET-[0-9]+");
    spec.protocol = Protocol::Http;
    let rule_id = engine.add_rule(spec).unwrap();

    let tuple = tcp_tuple(52344, 80);
    let emitted = engine
        .process_packet(
            &tuple,
            b"POST /upload HTTP/1.1\r\n\r\nsecret-42 leaving the building",
            1_000,
            false,
        )
        .unwrap();
    assert_eq!(emitted, 1);

    let alerts = engine.get_alerts(16, true);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, rule_id);
    assert_eq!(alerts[0].tuple, tuple);
    assert!(!alerts[0].payload_sample.is_empty());

    let stats = engine.stats();
    assert_eq!(stats.alerts_generated, 1);
}

#[test]
fn smtp_and_smb_classify_from_payload() {
    let engine = engine();

    let smtp = tcp_tuple(4000, 9999);
    engine.process_packet(&smtp, b"EHLO mail.example.com\r\n", 1, false).unwrap();
    assert_eq!(engine.get_session(&smtp).unwrap().classification.protocol, Protocol::Smtp);

    let smb = tcp_tuple(4001, 9999);
    engine.process_packet(&smb, b"\xFESMB\x40\x00\x01\x00\x00\x00\x00\x00", 1, false).unwrap();
    assert_eq!(engine.get_session(&smb).unwrap().classification.protocol, Protocol::Smb);
}
