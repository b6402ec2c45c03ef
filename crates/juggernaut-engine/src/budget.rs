use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use juggernaut_core::mode::AgentMode;
use juggernaut_core::stop::BudgetReason;

/// Resource ceilings for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_steps: u32,
    pub wall_clock_max: Duration,
    pub max_retries_per_fingerprint: u32,
    pub max_no_progress_steps: u32,
}

impl BudgetConfig {
    pub fn for_mode(mode: AgentMode) -> Self {
        let (steps, secs, retries, no_progress) = match mode {
            AgentMode::Normal => (100, 300, 3, 5),
            AgentMode::DeepResearch => (500, 1800, 5, 10),
            AgentMode::Code => (200, 600, 3, 5),
            AgentMode::Ops => (50, 120, 2, 3),
        };
        Self {
            max_steps: steps,
            wall_clock_max: Duration::from_secs(secs),
            max_retries_per_fingerprint: retries,
            max_no_progress_steps: no_progress,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self::for_mode(AgentMode::Normal)
    }
}

/// Counts steps, elapsed time, per-fingerprint retries and repeated states.
///
/// Pure bookkeeping: no I/O, and every method is O(1) apart from the retry scan
/// in [`exceeded_reason`](Self::exceeded_reason).
#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    steps_used: u32,
    start: Instant,
    /// Time already spent before `start`, when restored from a snapshot.
    carried: Duration,
    retries_by_fingerprint: HashMap<String, u32>,
    no_progress_steps: u32,
    last_state_hash: Option<String>,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            steps_used: 0,
            start: Instant::now(),
            carried: Duration::ZERO,
            retries_by_fingerprint: HashMap::new(),
            no_progress_steps: 0,
            last_state_hash: None,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn increment_step(&mut self) {
        self.steps_used = self.steps_used.saturating_add(1);
    }

    pub fn record_retry(&mut self, fingerprint: &str) {
        *self
            .retries_by_fingerprint
            .entry(fingerprint.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_state(&mut self, hash: &str) {
        if self.last_state_hash.as_deref() == Some(hash) {
            self.no_progress_steps += 1;
        } else {
            self.no_progress_steps = 0;
            self.last_state_hash = Some(hash.to_string());
        }
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded_reason().is_some()
    }

    /// First exceeded limit in priority order: steps, time, retries, no progress.
    pub fn exceeded_reason(&self) -> Option<BudgetReason> {
        if self.steps_used >= self.config.max_steps {
            return Some(BudgetReason::Steps);
        }
        self.exceeded_within_step()
    }

    /// Limits that can run out while a step's tool calls execute. The step count is not
    /// one of them: a step that has started may finish its calls.
    pub fn exceeded_within_step(&self) -> Option<BudgetReason> {
        if self.elapsed() >= self.config.wall_clock_max {
            return Some(BudgetReason::Time);
        }
        if self
            .retries_by_fingerprint
            .values()
            .any(|n| *n >= self.config.max_retries_per_fingerprint)
        {
            return Some(BudgetReason::Retries);
        }
        if self.no_progress_steps >= self.config.max_no_progress_steps {
            return Some(BudgetReason::NoProgress);
        }
        None
    }

    pub fn steps_used(&self) -> u32 {
        self.steps_used
    }

    pub fn elapsed(&self) -> Duration {
        self.carried + self.start.elapsed()
    }

    pub fn retries(&self, fingerprint: &str) -> u32 {
        self.retries_by_fingerprint.get(fingerprint).copied().unwrap_or(0)
    }

    pub fn no_progress_steps(&self) -> u32 {
        self.no_progress_steps
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            steps_used: self.steps_used,
            steps_max: self.config.max_steps,
            elapsed_ms: self.elapsed().as_millis() as u64,
            wall_clock_max_ms: self.config.wall_clock_max.as_millis() as u64,
            retries_by_fingerprint: self
                .retries_by_fingerprint
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            max_retries_per_fingerprint: self.config.max_retries_per_fingerprint,
            no_progress_steps: self.no_progress_steps,
            max_no_progress_steps: self.config.max_no_progress_steps,
            last_state_hash: self.last_state_hash.clone(),
        }
    }

    /// Rebuild a tracker. Elapsed time is restored relative to now.
    pub fn from_snapshot(snapshot: &BudgetSnapshot) -> Self {
        Self {
            config: BudgetConfig {
                max_steps: snapshot.steps_max,
                wall_clock_max: Duration::from_millis(snapshot.wall_clock_max_ms),
                max_retries_per_fingerprint: snapshot.max_retries_per_fingerprint,
                max_no_progress_steps: snapshot.max_no_progress_steps,
            },
            steps_used: snapshot.steps_used,
            start: Instant::now(),
            carried: Duration::from_millis(snapshot.elapsed_ms),
            retries_by_fingerprint: snapshot
                .retries_by_fingerprint
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            no_progress_steps: snapshot.no_progress_steps,
            last_state_hash: snapshot.last_state_hash.clone(),
        }
    }
}

/// Dictionary form of [`BudgetTracker`], persisted with the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub steps_used: u32,
    pub steps_max: u32,
    pub elapsed_ms: u64,
    pub wall_clock_max_ms: u64,
    pub retries_by_fingerprint: BTreeMap<String, u32>,
    pub max_retries_per_fingerprint: u32,
    pub no_progress_steps: u32,
    pub max_no_progress_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(steps: u32, secs: u64) -> BudgetConfig {
        BudgetConfig {
            max_steps: steps,
            wall_clock_max: Duration::from_secs(secs),
            max_retries_per_fingerprint: 3,
            max_no_progress_steps: 5,
        }
    }

    #[test]
    fn mode_defaults() {
        let ops = BudgetConfig::for_mode(AgentMode::Ops);
        assert_eq!(ops.max_steps, 50);
        assert_eq!(ops.wall_clock_max, Duration::from_secs(120));
        assert_eq!(ops.max_retries_per_fingerprint, 2);
        assert_eq!(ops.max_no_progress_steps, 3);

        let research = BudgetConfig::for_mode(AgentMode::DeepResearch);
        assert_eq!(research.max_steps, 500);
        assert_eq!(research.wall_clock_max, Duration::from_secs(1800));
        assert_eq!(BudgetConfig::default(), BudgetConfig::for_mode(AgentMode::Normal));
        assert_eq!(BudgetConfig::for_mode(AgentMode::Code).max_steps, 200);
    }

    #[tokio::test]
    async fn steps_exceed_at_limit() {
        let mut budget = BudgetTracker::new(config(2, 300));
        budget.increment_step();
        assert!(!budget.is_exceeded());
        budget.increment_step();
        assert!(budget.is_exceeded());
        assert_eq!(budget.exceeded_reason(), Some(BudgetReason::Steps));
    }

    #[tokio::test]
    async fn last_step_is_not_exceeded_within_itself() {
        let mut budget = BudgetTracker::new(config(1, 300));
        budget.increment_step();
        assert_eq!(budget.exceeded_reason(), Some(BudgetReason::Steps));
        assert_eq!(budget.exceeded_within_step(), None);

        for _ in 0..3 {
            budget.record_retry("fp");
        }
        assert_eq!(budget.exceeded_within_step(), Some(BudgetReason::Retries));
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_exceeds() {
        let budget = BudgetTracker::new(config(100, 10));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!budget.is_exceeded());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(budget.exceeded_reason(), Some(BudgetReason::Time));
    }

    #[tokio::test(start_paused = true)]
    async fn steps_take_priority_over_time() {
        let mut budget = BudgetTracker::new(config(1, 1));
        budget.increment_step();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(budget.exceeded_reason(), Some(BudgetReason::Steps));
    }

    #[tokio::test]
    async fn retries_per_fingerprint() {
        let mut budget = BudgetTracker::new(config(100, 300));
        budget.record_retry("fp-a");
        budget.record_retry("fp-a");
        budget.record_retry("fp-b");
        assert!(!budget.is_exceeded());
        budget.record_retry("fp-a");
        assert_eq!(budget.retries("fp-a"), 3);
        assert_eq!(budget.exceeded_reason(), Some(BudgetReason::Retries));
    }

    #[tokio::test]
    async fn no_progress_counts_repeats_and_resets() {
        let mut budget = BudgetTracker::new(config(100, 300));
        budget.record_state("h1");
        assert_eq!(budget.no_progress_steps(), 0);
        budget.record_state("h1");
        budget.record_state("h1");
        assert_eq!(budget.no_progress_steps(), 2);
        budget.record_state("h2");
        assert_eq!(budget.no_progress_steps(), 0);

        for _ in 0..5 {
            budget.record_state("h2");
        }
        assert_eq!(budget.exceeded_reason(), Some(BudgetReason::NoProgress));
    }

    #[tokio::test]
    async fn snapshot_round_trip_preserves_outcome() {
        let mut budget = BudgetTracker::new(config(3, 300));
        budget.increment_step();
        budget.record_retry("fp");
        budget.record_state("h");
        budget.record_state("h");

        let json = serde_json::to_value(budget.snapshot()).unwrap();
        let restored = BudgetTracker::from_snapshot(&serde_json::from_value(json).unwrap());
        assert_eq!(restored.is_exceeded(), budget.is_exceeded());
        assert_eq!(restored.steps_used(), 1);
        assert_eq!(restored.retries("fp"), 1);
        assert_eq!(restored.no_progress_steps(), 1);

        let mut exhausted = restored;
        exhausted.increment_step();
        exhausted.increment_step();
        let again = BudgetTracker::from_snapshot(&exhausted.snapshot());
        assert!(again.is_exceeded());
        assert_eq!(again.exceeded_reason(), exhausted.exceeded_reason());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_restores_elapsed_time() {
        let budget = BudgetTracker::new(config(100, 60));
        tokio::time::advance(Duration::from_secs(61)).await;
        let snapshot = budget.snapshot();
        assert!(snapshot.elapsed_ms >= 61_000);

        let restored = BudgetTracker::from_snapshot(&snapshot);
        assert_eq!(restored.exceeded_reason(), Some(BudgetReason::Time));
    }
}
