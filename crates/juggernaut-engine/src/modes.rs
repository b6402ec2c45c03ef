//! Per-mode limits and system prompts.

use juggernaut_core::mode::AgentMode;

use crate::budget::BudgetConfig;

/// Hard ceiling applied when no explicit ceiling is configured.
pub const DEFAULT_MAX_ITERATIONS_CEILING: u32 = 30;

const NORMAL_BASE_ITERATIONS: u32 = 6;
const NORMAL_MAX_ITERATIONS: u32 = 15;
const COMPLEXITY_STEP: u32 = 2;
const LONG_PROMPT_CHARS: usize = 400;

const ANALYSIS_VERBS: &[&str] = &[
    "analyze",
    "analyse",
    "compare",
    "investigate",
    "correlate",
    "summarize",
    "summarise",
    "audit",
    "diagnose",
    "evaluate",
    "reconcile",
    "break down",
];

/// Limits resolved for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeProfile {
    pub mode: AgentMode,
    pub budget: BudgetConfig,
    pub max_iterations: u32,
}

impl ModeProfile {
    pub fn resolve(mode: AgentMode, prompt: &str, ceiling: u32) -> Self {
        Self {
            mode,
            budget: BudgetConfig::for_mode(mode),
            max_iterations: max_iterations(mode, prompt, ceiling),
        }
    }
}

/// Iteration cap for a mode. Normal mode derives it from the prompt.
pub fn max_iterations(mode: AgentMode, prompt: &str, ceiling: u32) -> u32 {
    let raw = match mode {
        AgentMode::DeepResearch => 18,
        AgentMode::Code => 12,
        AgentMode::Ops => 6,
        AgentMode::Normal => (NORMAL_BASE_ITERATIONS
            + COMPLEXITY_STEP * complexity_signals(prompt))
        .min(NORMAL_MAX_ITERATIONS),
    };
    raw.min(ceiling.max(1))
}

/// Count of independent complexity signals in a prompt (0..=3).
pub fn complexity_signals(prompt: &str) -> u32 {
    let lower = prompt.to_lowercase();
    let mut signals = 0;

    if prompt.chars().count() > LONG_PROMPT_CHARS {
        signals += 1;
    }

    let enumerated = lower
        .lines()
        .filter(|l| {
            let l = l.trim_start();
            l.starts_with("- ")
                || l.starts_with("* ")
                || l.split_once(|c| c == '.' || c == ')')
                    .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        })
        .count();
    let clauses = lower.matches(" and then ").count()
        + lower.matches(" then ").count()
        + lower.matches(';').count()
        + lower.matches(", and ").count();
    if enumerated >= 2 || clauses >= 2 {
        signals += 1;
    }

    if ANALYSIS_VERBS.iter().any(|verb| lower.contains(verb)) {
        signals += 1;
    }

    signals
}

/// System prompt placed first in every conversation.
pub fn system_prompt(mode: AgentMode) -> String {
    let focus = match mode {
        AgentMode::Normal => "Answer the request directly, calling tools only when they add facts you do not have.",
        AgentMode::DeepResearch => "Gather evidence from several sources before answering and cross-check figures between them.",
        AgentMode::Code => "Work against the repository through the GitHub tools and cite file paths for every claim about code.",
        AgentMode::Ops => "Act quickly and conservatively: prefer read-only queries and post to Slack only when asked.",
    };
    format!(
        "You are Juggernaut, an operations agent with access to SQL, GitHub, Slack and task tools.\n\
         {focus}\n\
         Every identifier, date, amount or count in your final answer must appear verbatim in a tool result. \
         If the tools did not return the information, say so instead of guessing.\n\
         Do not repeat a tool call that already succeeded; reuse its result."
    )
}
