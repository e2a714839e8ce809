use std::collections::HashMap;
use std::sync::RwLock;

use regex::bytes::{Regex, RegexBuilder};
use tracing::debug;

use crate::dissect::Protocol;
use crate::dpi::alert::AlertSeverity;
use crate::error::{InspectError, Result};

/// Rule pattern families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Regex,
    Snort,
    Yara,
    Content,
    Behavioral,
}

/// A rule as supplied by the operator; ids and timestamps are assigned
/// on insert.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub rule_type: RuleType,
    pub name: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub pattern: Vec<u8>,
    /// `Protocol::Unknown` scopes the rule to every protocol
    pub protocol: Protocol,
    /// `0..=0` admits any port
    pub port_range: (u16, u16),
    pub applies_to_request: bool,
    pub applies_to_response: bool,
    pub category: String,
    pub enabled: bool,
}

impl RuleSpec {
    pub fn regex(name: &str, pattern: &str) -> Self {
        Self {
            rule_type: RuleType::Regex,
            name: name.to_string(),
            description: String::new(),
            severity: AlertSeverity::Warning,
            pattern: pattern.as_bytes().to_vec(),
            protocol: Protocol::Unknown,
            port_range: (0, 0),
            applies_to_request: true,
            applies_to_response: true,
            category: String::new(),
            enabled: true,
        }
    }

    pub fn content(name: &str, pattern: &[u8]) -> Self {
        Self {
            rule_type: RuleType::Content,
            pattern: pattern.to_vec(),
            ..Self::regex(name, "")
        }
    }
}

/// An installed rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub rule_id: u32,
    pub spec: RuleSpec,
    pub created_at_ns: u64,
    pub last_modified_ns: u64,
}

/// A payload hit against one rule
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule_id: u32,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub offset: u64,
}

struct RuleEngineInner {
    rules: Vec<Rule>,
    /// Compiled matchers keyed by rule id: removal of a neighboring rule
    /// never relocates compiled state.
    matchers: HashMap<u32, Regex, ahash::RandomState>,
    next_id: u32,
}

/// Indexed rule list with compile-on-insert
pub struct RuleEngine {
    inner: RwLock<RuleEngineInner>,
    max_rules: usize,
}

impl RuleEngine {
    pub fn new(max_rules: u32) -> Self {
        Self {
            inner: RwLock::new(RuleEngineInner {
                rules: Vec::new(),
                matchers: HashMap::default(),
                next_id: 1,
            }),
            max_rules: max_rules.max(1) as usize,
        }
    }

    /// Install a rule and return its id. Regex patterns compile
    /// case-insensitively at insert time; a pattern that fails to
    /// compile rejects the insertion.
    pub fn add(&self, spec: RuleSpec, now_ns: u64) -> Result<u32> {
        if spec.pattern.is_empty() && spec.rule_type != RuleType::Behavioral {
            return Err(InspectError::InvalidArgument("rule pattern is empty".into()));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.rules.len() >= self.max_rules {
            return Err(InspectError::CapacityExhausted("rule table full"));
        }

        let rule_id = inner.next_id;

        if spec.rule_type == RuleType::Regex {
            let pattern = std::str::from_utf8(&spec.pattern)
                .map_err(|_| InspectError::CompileError("regex pattern is not UTF-8".into()))?;
            let compiled = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| InspectError::CompileError(e.to_string()))?;
            inner.matchers.insert(rule_id, compiled);
        }

        inner.next_id += 1;
        inner.rules.push(Rule {
            rule_id,
            spec,
            created_at_ns: now_ns,
            last_modified_ns: now_ns,
        });
        debug!(rule_id, "rule installed");
        Ok(rule_id)
    }

    pub fn remove(&self, rule_id: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let idx = inner
            .rules
            .iter()
            .position(|r| r.rule_id == rule_id)
            .ok_or(InspectError::NotFound)?;
        inner.rules.remove(idx);
        inner.matchers.remove(&rule_id);
        debug!(rule_id, "rule removed");
        Ok(())
    }

    pub fn set_enabled(&self, rule_id: u32, enabled: bool, now_ns: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.rule_id == rule_id)
            .ok_or(InspectError::NotFound)?;
        rule.spec.enabled = enabled;
        rule.last_modified_ns = now_ns;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, rule_id: u32) -> Option<Rule> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rules
            .iter()
            .find(|r| r.rule_id == rule_id)
            .cloned()
    }

    /// Evaluate every enabled rule whose scope admits the session
    /// against `payload`.
    pub fn match_payload(
        &self,
        protocol: Protocol,
        src_port: u16,
        dst_port: u16,
        is_response: bool,
        payload: &[u8],
    ) -> Vec<RuleMatch> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut hits = Vec::new();

        for rule in &inner.rules {
            let spec = &rule.spec;
            if !spec.enabled {
                continue;
            }
            if spec.protocol != Protocol::Unknown && spec.protocol != protocol {
                continue;
            }
            if !port_admitted(spec.port_range, src_port, dst_port) {
                continue;
            }
            if is_response && !spec.applies_to_response {
                continue;
            }
            if !is_response && !spec.applies_to_request {
                continue;
            }

            let offset = match spec.rule_type {
                RuleType::Regex => inner
                    .matchers
                    .get(&rule.rule_id)
                    .and_then(|re| re.find(payload))
                    .map(|m| m.start() as u64),
                RuleType::Content | RuleType::Snort | RuleType::Yara => {
                    find_subslice(payload, &spec.pattern).map(|p| p as u64)
                }
                // Behavioral rules have no payload matcher.
                RuleType::Behavioral => None,
            };

            if let Some(offset) = offset {
                hits.push(RuleMatch {
                    rule_id: rule.rule_id,
                    rule_name: spec.name.clone(),
                    severity: spec.severity,
                    offset,
                });
            }
        }
        hits
    }
}

fn port_admitted(range: (u16, u16), src_port: u16, dst_port: u16) -> bool {
    let (start, end) = range;
    if start == 0 && end == 0 {
        return true;
    }
    (start..=end).contains(&dst_port) || (start..=end).contains(&src_port)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
