use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::capture::{FlowTuple, TimestampSource};
use crate::config::{DpiConfig, TlsMode};
use crate::dissect::{
    classify_by_port, classify_payload, Classification, Protocol, ProtocolData,
    CONFIDENCE_PAYLOAD, CONFIDENCE_PORT,
};
use crate::dpi::alert::{Alert, AlertQueue};
use crate::dpi::anomaly;
use crate::dpi::rules::{RuleEngine, RuleSpec};
use crate::dpi::session::{SessionSnapshot, SessionState, SessionStore, MAX_SESSION_ANOMALIES};
use crate::error::{InspectError, Result};
use crate::telemetry::Metrics;

const MB: usize = 1024 * 1024;

/// DPI engine statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct DpiStats {
    pub packets_processed: u64,
    pub bytes_processed: u64,
    pub flows_created: u64,
    pub flows_terminated: u64,
    pub active_sessions: u64,
    pub alerts_generated: u64,
    pub anomalies_detected: u64,
    pub sessions_rejected: u64,
    pub alerts_dropped: u64,

    pub http_packets: u64,
    pub dns_packets: u64,
    pub tls_packets: u64,
    pub smtp_packets: u64,
    pub smb_packets: u64,
}

/// Stateful inspection engine: session table, rule engine, anomaly
/// detection, and the alert queue behind one `process_packet` hot path.
///
/// Lock order is sessions, rules, alerts, stats; no step holds two of
/// them at once.
pub struct DpiEngine {
    config: RwLock<DpiConfig>,
    sessions: RwLock<SessionStore>,
    rules: RuleEngine,
    alerts: AlertQueue,
    stats: RwLock<DpiStats>,
    next_session_id: AtomicU64,
    next_alert_id: AtomicU64,
    ts_source: TimestampSource,
    metrics: Option<Arc<Metrics>>,
}

impl DpiEngine {
    pub fn new(config: DpiConfig) -> Result<Self> {
        if config.max_sessions == 0 {
            return Err(InspectError::InvalidArgument("max_sessions must be nonzero".into()));
        }
        let reassembly_capacity = config.reassembly_buffer_mb as usize * MB;
        Ok(Self {
            sessions: RwLock::new(SessionStore::new(config.max_sessions, reassembly_capacity)),
            rules: RuleEngine::new(config.max_rules),
            alerts: AlertQueue::new(config.alert_capacity),
            stats: RwLock::new(DpiStats::default()),
            next_session_id: AtomicU64::new(1),
            next_alert_id: AtomicU64::new(1),
            ts_source: TimestampSource::default().resolve(),
            metrics: None,
            config: RwLock::new(config),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Inspect one packet. Returns the number of alerts this call
    /// emitted into the queue.
    ///
    /// Zero-length payloads are rejected at the boundary: no session is
    /// created and no classification advances.
    pub fn process_packet(
        &self,
        tuple: &FlowTuple,
        payload: &[u8],
        timestamp_ns: u64,
        is_response: bool,
    ) -> Result<usize> {
        if payload.is_empty() {
            return Ok(0);
        }

        let anomaly_enabled =
            self.config.read().unwrap_or_else(|e| e.into_inner()).anomaly_detection;

        // Session phase: everything that needs the write lock, then the
        // facts rule evaluation needs are copied out.
        let (protocol, new_session, new_anomalies) = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let session_id = self.next_session_id.load(Ordering::Relaxed);
            let (session, created) = match sessions.get_or_create(tuple, session_id, timestamp_ns)
            {
                Some(found) => found,
                None => {
                    drop(sessions);
                    self.bump(|s| s.sessions_rejected += 1);
                    trace!(%tuple, "session table full, packet not inspected");
                    return Ok(0);
                }
            };
            if created {
                self.next_session_id.fetch_add(1, Ordering::Relaxed);
            }

            session.last_seen_ns = timestamp_ns;
            session.packets_seen += 1;
            session.total_bytes += payload.len() as u64;

            if is_response {
                session.rev.push(payload);
            } else {
                session.fwd.push(payload);
            }

            // The cascade runs exactly once, on the session's first
            // payload packet; zero-length payloads never get this far.
            if session.classification.protocol == Protocol::Unknown && session.packets_seen == 1 {
                let (protocol, data, confidence) = match classify_payload(payload) {
                    Some((protocol, data)) => (protocol, data, CONFIDENCE_PAYLOAD),
                    None => (
                        classify_by_port(tuple.src_port, tuple.dst_port),
                        None,
                        CONFIDENCE_PORT,
                    ),
                };
                if protocol != Protocol::Unknown {
                    session.classification = Classification {
                        protocol,
                        confidence,
                        detection_tick: session.packets_seen,
                    };
                    session.protocol_data = data;
                    debug!(%tuple, %protocol, confidence, "session classified");
                }
            }

            if session.state == SessionState::New {
                session.state = SessionState::Established;
            }

            let mut fresh = Vec::new();
            if anomaly_enabled {
                for record in
                    anomaly::detect(session.classification.protocol, tuple.dst_port, payload)
                {
                    if session.anomalies.len() < MAX_SESSION_ANOMALIES {
                        session.anomalies.push(record.clone());
                    }
                    fresh.push(record);
                }
            }

            (session.classification.protocol, created, fresh)
        };

        // Rule phase, outside the session lock.
        let hits = if self.rules.is_empty() {
            Vec::new()
        } else {
            self.rules
                .match_payload(protocol, tuple.src_port, tuple.dst_port, is_response, payload)
        };

        let sample_bytes =
            self.config.read().unwrap_or_else(|e| e.into_inner()).payload_sample_bytes as usize;
        let mut emitted = 0usize;
        for hit in hits {
            let alert = Alert {
                alert_id: self.next_alert_id.fetch_add(1, Ordering::Relaxed),
                timestamp_ns,
                tuple: *tuple,
                severity: hit.severity,
                protocol,
                rule_id: hit.rule_id,
                rule_name: hit.rule_name,
                message: format!("rule matched at offset {}", hit.offset),
                payload_sample: Bytes::copy_from_slice(
                    &payload[..payload.len().min(sample_bytes)],
                ),
                offset_in_stream: hit.offset,
            };
            // Queue refusals are counted by the queue itself and fold
            // into `alerts_dropped` at snapshot time.
            if self.alerts.push(alert) {
                emitted += 1;
            }
        }

        let active = self.sessions.read().unwrap_or_else(|e| e.into_inner()).len() as u64;
        self.bump(|s| {
            s.packets_processed += 1;
            s.bytes_processed += payload.len() as u64;
            if new_session {
                s.flows_created += 1;
            }
            s.active_sessions = active;
            s.alerts_generated += emitted as u64;
            s.anomalies_detected += new_anomalies.len() as u64;
            match protocol {
                Protocol::Http => s.http_packets += 1,
                Protocol::Dns => s.dns_packets += 1,
                Protocol::Https => s.tls_packets += 1,
                Protocol::Smtp | Protocol::Smtps => s.smtp_packets += 1,
                Protocol::Smb => s.smb_packets += 1,
                _ => {}
            }
        });

        if let Some(m) = &self.metrics {
            m.dpi_packets_total.add(1, &[]);
            if emitted > 0 {
                m.alerts_total.add(emitted as u64, &[]);
            }
            if !new_anomalies.is_empty() {
                m.anomalies_total.add(new_anomalies.len() as u64, &[]);
            }
        }

        Ok(emitted)
    }

    /// Install a rule; regex patterns are compiled here.
    pub fn add_rule(&self, spec: RuleSpec) -> Result<u32> {
        self.rules.add(spec, self.ts_source.now_ns())
    }

    pub fn remove_rule(&self, rule_id: u32) -> Result<()> {
        self.rules.remove(rule_id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn set_rule_enabled(&self, rule_id: u32, enabled: bool) -> Result<()> {
        self.rules.set_enabled(rule_id, enabled, self.ts_source.now_ns())
    }

    /// Drain up to `max` alerts; `clear` consumes them.
    pub fn get_alerts(&self, max: usize, clear: bool) -> Vec<Alert> {
        self.alerts.drain(max, clear)
    }

    pub fn stats(&self) -> DpiStats {
        let mut stats = *self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats.alerts_dropped += self.alerts.dropped();
        stats
    }

    pub fn get_session(&self, tuple: &FlowTuple) -> Option<SessionSnapshot> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).snapshot(tuple)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Classification for a flow; Unknown with zero confidence when the
    /// flow has no session.
    pub fn classify_protocol(&self, tuple: &FlowTuple) -> Classification {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tuple)
            .map(|s| s.classification)
            .unwrap_or_default()
    }

    /// Engine-wide TLS handling mode.
    pub fn set_tls_mode(&self, mode: TlsMode) {
        self.config.write().unwrap_or_else(|e| e.into_inner()).tls_mode = mode;
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.config.read().unwrap_or_else(|e| e.into_inner()).tls_mode
    }

    /// Parsed protocol record for a flow's session, if any.
    pub fn protocol_data(&self, tuple: &FlowTuple) -> Option<ProtocolData> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tuple)
            .and_then(|s| s.protocol_data.clone())
    }

    /// Terminate a session, releasing reassembly buffers and parsed
    /// records. Missing sessions report `NotFound`.
    pub fn terminate_session(&self, tuple: &FlowTuple) -> Result<()> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .terminate(tuple)
            .ok_or(InspectError::NotFound)?;
        debug!(%tuple, session_id = removed.session_id, "session terminated");
        self.bump(|s| {
            s.flows_terminated += 1;
            s.active_sessions = s.active_sessions.saturating_sub(1);
        });
        Ok(())
    }

    fn bump(&self, f: impl FnOnce(&mut DpiStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tuple(src_port: u16, dst_port: u16) -> FlowTuple {
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
            .expect("engine config is valid")
    }

    #[test]
    fn empty_payload_creates_no_session() {
        let engine = engine();
        let emitted = engine.process_packet(&tuple(1, 80), b"", 100, false).unwrap();
        assert_eq!(emitted, 0);
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn classification_happens_once() {
        let engine = engine();
        let t = tuple(52344, 80);
        engine.process_packet(&t, b"GET / HTTP/1.1\r\n\r\n", 1, false).unwrap();

        let first = engine.classify_protocol(&t);
        assert_eq!(first.protocol, Protocol::Http);
        assert_eq!(first.confidence, 100);
        assert_eq!(first.detection_tick, 1);

        // A later TLS-looking payload must not reclassify.
        engine.process_packet(&t, &[0x16, 0x03, 0x03, 0x00, 0x20], 2, true).unwrap();
        let second = engine.classify_protocol(&t);
        assert_eq!(second.protocol, Protocol::Http);
        assert_eq!(second.detection_tick, 1);
    }

    #[test]
    fn port_fallback_scores_fifty() {
        let engine = engine();
        let t = tuple(40000, 22);
        engine.process_packet(&t, b"\x00\x01\x02", 1, false).unwrap();
        let c = engine.classify_protocol(&t);
        assert_eq!(c.protocol, Protocol::Ssh);
        assert_eq!(c.confidence, 50);
    }

    #[test]
    fn session_advances_to_established() {
        let engine = engine();
        let t = tuple(1, 80);
        engine.process_packet(&t, b"GET / HTTP/1.1\r\n\r\n", 1, false).unwrap();
        assert_eq!(engine.get_session(&t).unwrap().state, SessionState::Established);
    }

    #[test]
    fn rule_match_emits_alert() {
        let engine = engine();
        let id = engine.add_rule(RuleSpec::regex("evil", "evil")).unwrap();
        assert_eq!(id, 1);

        let t = tuple(1, 80);
        let emitted = engine
            .process_packet(&t, b"GET /evil HTTP/1.1\r\n\r\n", 1, false)
            .unwrap();
        assert_eq!(emitted, 1);

        let alerts = engine.get_alerts(10, true);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, id);
        assert_eq!(alerts[0].protocol, Protocol::Http);
        assert_eq!(alerts[0].offset_in_stream, 5);
        assert!(engine.get_alerts(10, true).is_empty());
    }

    #[test]
    fn alert_ids_are_monotonic() {
        let engine = engine();
        engine.add_rule(RuleSpec::regex("evil", "evil")).unwrap();
        for i in 0..3 {
            engine
                .process_packet(&tuple(100 + i, 80), b"evil bytes", u64::from(i), false)
                .unwrap();
        }
        let alerts = engine.get_alerts(10, true);
        let ids: Vec<u64> = alerts.iter().map(|a| a.alert_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn terminate_missing_session_is_not_found() {
        let engine = engine();
        assert!(matches!(
            engine.terminate_session(&tuple(1, 2)),
            Err(InspectError::NotFound)
        ));
    }

    #[test]
    fn terminate_releases_session() {
        let engine = engine();
        let t = tuple(1, 80);
        engine.process_packet(&t, b"GET / HTTP/1.1\r\n\r\n", 1, false).unwrap();
        engine.terminate_session(&t).unwrap();
        assert!(engine.get_session(&t).is_none());
        assert_eq!(engine.stats().flows_terminated, 1);
    }

    #[test]
    fn stats_count_per_protocol() {
        let engine = engine();
        engine.process_packet(&tuple(1, 80), b"GET / HTTP/1.1\r\n\r\n", 1, false).unwrap();
        engine
            .process_packet(&tuple(2, 443), &[0x16, 0x03, 0x03, 0x00, 0x20], 2, false)
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.packets_processed, 2);
        assert_eq!(stats.http_packets, 1);
        assert_eq!(stats.tls_packets, 1);
        assert_eq!(stats.flows_created, 2);
        assert_eq!(stats.active_sessions, 2);
    }

    #[test]
    fn session_table_rejection_counts() {
        let engine = DpiEngine::new(DpiConfig {
            max_sessions: 1,
            reassembly_buffer_mb: 1,
            ..DpiConfig::default()
        })
        .expect("engine config is valid");

        engine.process_packet(&tuple(1, 80), b"x", 1, false).unwrap();
        engine.process_packet(&tuple(2, 80), b"x", 2, false).unwrap();

        assert_eq!(engine.session_count(), 1);
        assert_eq!(engine.stats().sessions_rejected, 1);
    }

    #[test]
    fn anomaly_list_caps_at_ten() {
        let engine = engine();
        let t = tuple(1, 9999);
        // Every packet on a non-standard HTTP port fires the port
        // mismatch predicate.
        for i in 0..15u64 {
            engine.process_packet(&t, b"GET / HTTP/1.1\r\n\r\n", i, false).unwrap();
        }
        let snapshot = engine.get_session(&t).unwrap();
        assert_eq!(snapshot.anomalies.len(), 10);
        assert_eq!(engine.stats().anomalies_detected, 15);
    }

    #[test]
    fn tls_mode_is_engine_global() {
        let engine = engine();
        assert_eq!(engine.tls_mode(), TlsMode::Passthrough);
        engine.set_tls_mode(TlsMode::Inspect);
        assert_eq!(engine.tls_mode(), TlsMode::Inspect);
    }

    #[test]
    fn reassembly_buffers_accumulate_by_direction() {
        let engine = engine();
        let t = tuple(1, 80);
        engine.process_packet(&t, b"GET / HTTP/1.1\r\n\r\n", 1, false).unwrap();
        engine.process_packet(&t, b"HTTP/1.1 200 OK\r\n\r\n", 2, true).unwrap();

        let sessions = engine.sessions.read().unwrap();
        let session = sessions.get(&t).unwrap();
        assert_eq!(session.fwd.data(), b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(session.rev.data(), b"HTTP/1.1 200 OK\r\n\r\n");
    }
}
