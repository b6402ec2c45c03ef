//! What to do after a failed LLM or tool call.
//!
//! | category    | attempt 1 | attempt 2 | later        |
//! |-------------|-----------|-----------|--------------|
//! | rate_limit  | backoff   | backoff   | switch model |
//! | model_error | switch    | switch    | switch       |
//! | timeout     | backoff   | degrade   | degrade      |
//! | tool_error  | retry now | skip      | skip         |
//! | auth_error  | abort     | abort     | abort        |
//! | unknown     | backoff   | abort     | abort        |
//!
//! Every path is capped by [`RecoveryPolicy::max_attempts`].

use std::time::Duration;

use rand::Rng;

use juggernaut_core::errors::ErrorCategory;
use juggernaut_core::provider::{StreamOptions, ToolChoice};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
pub const MIN_DEGRADED_MAX_TOKENS: u32 = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry { delay: Duration },
    SwitchModel,
    Degrade,
    Skip,
    Abort,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::SwitchModel => "switch_model",
            Self::Degrade => "degrade",
            Self::Skip => "skip",
            Self::Abort => "abort",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecoveryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied to each backoff, e.g. 0.2 for ±20%.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RecoveryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Decide the next step after the `attempt`-th failure (1-based) of one call.
    pub fn next_action(
        &self,
        category: ErrorCategory,
        attempt: u32,
        suggested_delay: Option<Duration>,
    ) -> RecoveryAction {
        if attempt >= self.max_attempts {
            return RecoveryAction::Abort;
        }
        match category {
            ErrorCategory::RateLimit if attempt <= 2 => RecoveryAction::Retry {
                delay: self.backoff(attempt, suggested_delay),
            },
            ErrorCategory::RateLimit | ErrorCategory::ModelError => RecoveryAction::SwitchModel,
            ErrorCategory::Timeout if attempt == 1 => RecoveryAction::Retry {
                delay: self.backoff(attempt, None),
            },
            ErrorCategory::Timeout => RecoveryAction::Degrade,
            ErrorCategory::ToolError if attempt == 1 => RecoveryAction::Retry {
                delay: Duration::ZERO,
            },
            ErrorCategory::ToolError => RecoveryAction::Skip,
            ErrorCategory::AuthError => RecoveryAction::Abort,
            ErrorCategory::Unknown if attempt == 1 => RecoveryAction::Retry {
                delay: self.backoff(attempt, None),
            },
            ErrorCategory::Unknown => RecoveryAction::Abort,
        }
    }

    /// Exponential backoff with jitter. A server-provided delay wins, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.max_delay);
        }
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if self.jitter <= 0.0 {
            return raw;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        raw.mul_f64(factor.max(0.0)).min(self.max_delay)
    }
}

/// The model and token limit used for the next LLM request of a session.
///
/// The fallback chain is walked at most once: switching only moves forward.
#[derive(Clone, Debug)]
pub struct LlmPlan {
    models: Vec<String>,
    current: usize,
    max_tokens: u32,
    degraded: bool,
}

impl LlmPlan {
    pub fn new(primary: impl Into<String>, fallbacks: &[String], max_tokens: u32) -> Self {
        let mut models = vec![primary.into()];
        for model in fallbacks {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        Self {
            models,
            current: 0,
            max_tokens,
            degraded: false,
        }
    }

    pub fn model(&self) -> &str {
        &self.models[self.current]
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Move to the next fallback model. False when the chain is exhausted.
    pub fn switch_model(&mut self) -> bool {
        if self.current + 1 < self.models.len() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    /// Halve the token limit and drop to the last fallback model. Only once.
    pub fn degrade(&mut self) -> bool {
        if self.degraded {
            return false;
        }
        self.degraded = true;
        self.max_tokens = (self.max_tokens / 2).max(MIN_DEGRADED_MAX_TOKENS);
        self.current = self.models.len() - 1;
        true
    }

    pub fn options(&self, tool_choice: ToolChoice) -> StreamOptions {
        StreamOptions {
            max_tokens: Some(self.max_tokens),
            temperature: None,
            model: Some(self.model().to_string()),
            tool_choice,
        }
    }
}
