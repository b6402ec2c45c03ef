use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use juggernaut_core::stop::GuardrailReason;
use juggernaut_settings::GuardrailSettings;

use crate::fingerprint;

/// How many recent tool names are remembered for loop detection.
pub const CALL_SEQUENCE_WINDOW: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub max_failures_per_fingerprint: u32,
    pub max_no_progress_steps: u32,
    /// Consecutive identical tool names that count as a tight loop.
    pub tool_loop_window: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_failures_per_fingerprint: 3,
            max_no_progress_steps: 5,
            tool_loop_window: 5,
        }
    }
}

impl From<&GuardrailSettings> for GuardrailConfig {
    fn from(s: &GuardrailSettings) -> Self {
        Self {
            max_failures_per_fingerprint: s.max_failures_per_fingerprint,
            max_no_progress_steps: s.max_no_progress_steps,
            tool_loop_window: s.tool_loop_window.clamp(1, CALL_SEQUENCE_WINDOW),
        }
    }
}

/// Safety rules that halt an unproductive loop.
///
/// The stop decision latches: the first rule to fire is recorded and every
/// later query reports that same reason, so `should_stop()` never flips back.
#[derive(Debug)]
pub struct GuardrailTracker {
    config: GuardrailConfig,
    failure_fingerprints: HashMap<String, u32>,
    fingerprint_tools: HashMap<String, String>,
    tool_failure_counts: HashMap<String, u32>,
    attempted_call_keys: HashSet<String>,
    call_sequence: VecDeque<String>,
    no_progress_steps: u32,
    last_state_hash: Option<String>,
    stop: Option<(GuardrailReason, String)>,
}

impl GuardrailTracker {
    pub fn new(config: GuardrailConfig) -> Self {
        Self {
            config,
            failure_fingerprints: HashMap::new(),
            fingerprint_tools: HashMap::new(),
            tool_failure_counts: HashMap::new(),
            attempted_call_keys: HashSet::new(),
            call_sequence: VecDeque::with_capacity(CALL_SEQUENCE_WINDOW),
            no_progress_steps: 0,
            last_state_hash: None,
            stop: None,
        }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Record a finished call and return its fingerprint.
    pub fn record_tool_call(&mut self, name: &str, arguments: &Value, success: bool) -> String {
        let fp = fingerprint::fingerprint(name, arguments);
        if !success {
            *self.failure_fingerprints.entry(fp.clone()).or_insert(0) += 1;
            *self.tool_failure_counts.entry(name.to_string()).or_insert(0) += 1;
            self.fingerprint_tools
                .entry(fp.clone())
                .or_insert_with(|| name.to_string());
        }
        if self.call_sequence.len() == CALL_SEQUENCE_WINDOW {
            self.call_sequence.pop_front();
        }
        self.call_sequence.push_back(name.to_string());
        self.latch();
        fp
    }

    /// Same no-progress rule as the budget, tracked independently.
    pub fn record_state(&mut self, hash: &str) {
        if self.last_state_hash.as_deref() == Some(hash) {
            self.no_progress_steps += 1;
        } else {
            self.no_progress_steps = 0;
            self.last_state_hash = Some(hash.to_string());
        }
        self.latch();
    }

    /// Remember a call that completed successfully.
    pub fn mark_attempted(&mut self, call_key: &str) {
        self.attempted_call_keys.insert(call_key.to_string());
    }

    pub fn was_attempted(&self, call_key: &str) -> bool {
        self.attempted_call_keys.contains(call_key)
    }

    pub fn failure_count(&self, fingerprint: &str) -> u32 {
        self.failure_fingerprints.get(fingerprint).copied().unwrap_or(0)
    }

    pub fn tool_failures(&self, tool: &str) -> u32 {
        self.tool_failure_counts.get(tool).copied().unwrap_or(0)
    }

    /// A tool whose failures have reached the per-fingerprint ceiling is not called again.
    pub fn circuit_open(&self, tool: &str) -> bool {
        self.tool_failures(tool) >= self.config.max_failures_per_fingerprint
    }

    /// Stop for a reason detected outside the tracker (repeated call, open circuit).
    /// Has no effect once a stop is already latched.
    pub fn trigger(&mut self, reason: GuardrailReason, detail: impl Into<String>) {
        if self.stop.is_none() {
            self.stop = Some((reason, detail.into()));
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_some()
    }

    pub fn stop_reason(&self) -> Option<GuardrailReason> {
        self.stop.as_ref().map(|(reason, _)| *reason)
    }

    pub fn stop_detail(&self) -> Option<&str> {
        self.stop.as_ref().map(|(_, detail)| detail.as_str())
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        self.stop_reason().map(suggestion_for)
    }

    fn latch(&mut self) {
        if self.stop.is_none() {
            self.stop = self.evaluate();
        }
    }

    fn evaluate(&self) -> Option<(GuardrailReason, String)> {
        let ceiling = self.config.max_failures_per_fingerprint;
        let worst = self
            .failure_fingerprints
            .iter()
            .filter(|(_, n)| **n >= ceiling)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));
        if let Some((fp, count)) = worst {
            let tool = self.fingerprint_tools.get(fp).map(String::as_str).unwrap_or("tool");
            return Some((
                GuardrailReason::RepeatedFailure,
                format!("{tool} failed {count} times with the same arguments"),
            ));
        }

        if self.no_progress_steps >= self.config.max_no_progress_steps {
            return Some((
                GuardrailReason::NoProgress,
                format!(
                    "no observable progress for {} consecutive iterations",
                    self.no_progress_steps
                ),
            ));
        }

        let window = self.config.tool_loop_window;
        if window > 0 && self.call_sequence.len() >= window {
            let mut recent = self.call_sequence.iter().rev().take(window);
            if let Some(first) = recent.next() {
                if recent.all(|name| name == first) {
                    return Some((
                        GuardrailReason::ToolLoop,
                        format!("last {window} tool calls were all {first}"),
                    ));
                }
            }
        }
        None
    }

    pub fn snapshot(&self) -> GuardrailSnapshot {
        GuardrailSnapshot {
            config: self.config.clone(),
            failure_fingerprints: sorted(&self.failure_fingerprints),
            fingerprint_tools: sorted(&self.fingerprint_tools),
            tool_failure_counts: sorted(&self.tool_failure_counts),
            attempted_call_keys: self.attempted_call_keys.iter().cloned().collect(),
            call_sequence: self.call_sequence.iter().cloned().collect(),
            no_progress_steps: self.no_progress_steps,
            last_state_hash: self.last_state_hash.clone(),
            stop_reason: self.stop_reason(),
            stop_detail: self.stop_detail().map(str::to_string),
        }
    }

    pub fn from_snapshot(snapshot: &GuardrailSnapshot) -> Self {
        let stop = snapshot
            .stop_reason
            .map(|reason| (reason, snapshot.stop_detail.clone().unwrap_or_default()));
        let mut tracker = Self {
            config: snapshot.config.clone(),
            failure_fingerprints: snapshot.failure_fingerprints.clone().into_iter().collect(),
            fingerprint_tools: snapshot.fingerprint_tools.clone().into_iter().collect(),
            tool_failure_counts: snapshot.tool_failure_counts.clone().into_iter().collect(),
            attempted_call_keys: snapshot.attempted_call_keys.iter().cloned().collect(),
            call_sequence: snapshot
                .call_sequence
                .iter()
                .rev()
                .take(CALL_SEQUENCE_WINDOW)
                .rev()
                .cloned()
                .collect(),
            no_progress_steps: snapshot.no_progress_steps,
            last_state_hash: snapshot.last_state_hash.clone(),
            stop,
        };
        tracker.latch();
        tracker
    }
}

fn sorted<V: Clone>(map: &HashMap<String, V>) -> BTreeMap<String, V> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// One-line remediation hint shown to the caller.
pub fn suggestion_for(reason: GuardrailReason) -> &'static str {
    match reason {
        GuardrailReason::RepeatedFailure => {
            "The same call keeps failing; check its arguments and the executor logs."
        }
        GuardrailReason::NoProgress => {
            "Recent steps did not change the outcome; rephrase the task or supply the missing data."
        }
        GuardrailReason::ToolLoop => "Narrow the request or combine the lookups into one call.",
        GuardrailReason::RepeatedCall => {
            "Reuse the result already returned for this call instead of requesting it again."
        }
        GuardrailReason::CircuitOpen => {
            "This tool is failing repeatedly; verify the downstream service before retrying."
        }
    }
}

/// Dictionary form of [`GuardrailTracker`], persisted with the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailSnapshot {
    pub config: GuardrailConfig,
    pub failure_fingerprints: BTreeMap<String, u32>,
    #[serde(default)]
    pub fingerprint_tools: BTreeMap<String, String>,
    pub tool_failure_counts: BTreeMap<String, u32>,
    pub attempted_call_keys: BTreeSet<String>,
    pub call_sequence: Vec<String>,
    pub no_progress_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<GuardrailReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_detail: Option<String>,
}
