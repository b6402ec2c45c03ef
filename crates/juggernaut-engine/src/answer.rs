//! Final-answer helpers: non-answer detection and the no-LLM fallback summary.

use juggernaut_core::tools::ToolCallRecord;

use crate::truncate::preview;

/// Appended as a user turn for the post-loop synthesis call.
pub const SYNTHESIS_PROMPT: &str = "Using only the tool results above, write the final answer \
     to the original request. Quote identifiers, dates, amounts and counts exactly as the tools \
     returned them. If a needed result is missing or failed, say which one.";

const REFUSAL_MARKERS: &[&str] = &[
    "i cannot",
    "i can't",
    "i'm unable",
    "i am unable",
    "i don't have access",
    "i do not have access",
];

/// True for empty text or a model refusal that gives the caller nothing to use.
pub fn is_refusal(text: &str) -> bool {
    let normalized = text.trim().to_lowercase().replace('\u{2019}', "'");
    normalized.is_empty() || REFUSAL_MARKERS.iter().any(|m| normalized.contains(m))
}

/// Plain listing of what the tools returned, used when synthesis is unavailable.
pub fn deterministic_summary(tool_log: &[ToolCallRecord]) -> Option<String> {
    if tool_log.is_empty() {
        return None;
    }
    let ok = tool_log.iter().filter(|r| r.success).count();
    let mut out = format!(
        "Completed {} tool call(s), {} succeeded and {} failed:\n",
        tool_log.len(),
        ok,
        tool_log.len() - ok
    );
    for record in tool_log {
        let status = if record.success { "ok" } else { "failed" };
        out.push_str(&format!(
            "- {} [{}]: {}\n",
            record.tool_name,
            status,
            preview(&record.outcome.content_text())
        ));
    }
    Some(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use juggernaut_core::ids::ToolCallId;
    use juggernaut_core::tools::ToolOutcome;
    use serde_json::json;
    use std::time::Duration;

    fn record(name: &str, outcome: ToolOutcome) -> ToolCallRecord {
        ToolCallRecord {
            tool_call_id: ToolCallId::new(),
            tool_name: name.into(),
            arguments: json!({}),
            success: outcome.is_success(),
            outcome,
            call_key: format!("{name}:{{}}"),
            failure_fingerprint: None,
            duration: Duration::from_millis(5),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn refusals() {
        assert!(is_refusal(""));
        assert!(is_refusal("   "));
        assert!(is_refusal("I cannot access that database."));
        assert!(is_refusal("Sorry, I can\u{2019}t help with that."));
        assert!(is_refusal("I don't have access to Slack."));
        assert!(!is_refusal("There were 41 orders yesterday."));
    }

    #[test]
    fn summary_lists_each_call() {
        let log = vec![
            record("sql_query", ToolOutcome::success(json!([{"orders": 41}]))),
            record("slack_post", ToolOutcome::failure("channel_not_found")),
        ];
        let summary = deterministic_summary(&log).unwrap();
        assert!(summary.starts_with("Completed 2 tool call(s), 1 succeeded and 1 failed"));
        assert!(summary.contains(r#"- sql_query [ok]: [{"orders":41}]"#));
        assert!(summary.contains("- slack_post [failed]: channel_not_found"));
    }

    #[test]
    fn no_summary_without_tools() {
        assert!(deterministic_summary(&[]).is_none());
    }
}
