//! Literal grounding check for final answers.
//!
//! Every amount, date, identifier and count quoted in an answer has to occur
//! verbatim in some tool result from the same session. This is string
//! containment only; a paraphrased figure fails and a coincidental match passes.

use std::sync::LazyLock;

use regex::Regex;

/// Replaces answers whose specifics cannot be traced to a tool result.
pub const EVIDENCE_REFUSAL: &str = "I can't give a verified answer: the tool results from this \
     session don't contain the specific figures or identifiers the answer relied on.";

static AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s?\d[\d,]*(?:\.\d+)?").unwrap());
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b").unwrap()
});
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2,}-\d+\b|\b[A-Za-z]+_\d+\b|#\d+\b").unwrap()
});
static COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:,\d{3})+\b|\b\d+\b").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactKind {
    Amount,
    Date,
    Identifier,
    Count,
}

/// One specific claim lifted from an answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fact {
    pub kind: FactKind,
    pub text: String,
}

impl Fact {
    fn new(kind: FactKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
        }
    }

    /// Spellings that count as the same fact in tool output.
    fn forms(&self) -> Vec<String> {
        let mut forms = vec![self.text.clone()];
        match self.kind {
            FactKind::Amount => {
                let bare = self.text.trim_start_matches('$').trim_start().to_string();
                forms.push(bare.replace(',', ""));
                forms.push(bare);
            }
            FactKind::Count => forms.push(self.text.replace(',', "")),
            FactKind::Identifier => {
                if let Some(number) = self.text.strip_prefix('#') {
                    forms.push(number.to_string());
                }
            }
            FactKind::Date => {}
        }
        forms
    }

    fn is_supported_by(&self, evidence: &str) -> bool {
        self.forms().iter().any(|form| evidence.contains(form.as_str()))
    }
}

/// Pull the checkable specifics out of an answer, in order of appearance per kind.
pub fn extract_facts(answer: &str) -> Vec<Fact> {
    let mut facts = Vec::new();
    let mut masked = answer.to_string();

    for (kind, re) in [
        (FactKind::Amount, &*AMOUNT),
        (FactKind::Date, &*DATE),
        (FactKind::Identifier, &*IDENTIFIER),
    ] {
        let spans: Vec<(usize, usize)> = re
            .find_iter(&masked)
            .map(|m| {
                facts.push(Fact::new(kind, m.as_str()));
                (m.start(), m.end())
            })
            .collect();
        for (start, end) in spans {
            masked.replace_range(start..end, &" ".repeat(end - start));
        }
    }

    for m in COUNT.find_iter(&masked) {
        let digits = m.as_str().replace(',', "");
        if digits.parse::<u64>().map_or(true, |n| n >= 10) {
            facts.push(Fact::new(FactKind::Count, m.as_str()));
        }
    }
    facts
}

/// Facts in `answer` that appear nowhere in `evidence`.
pub fn unsupported_facts(answer: &str, evidence: &str) -> Vec<Fact> {
    extract_facts(answer)
        .into_iter()
        .filter(|fact| !fact.is_supported_by(evidence))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(answer: &str) -> Vec<(FactKind, String)> {
        extract_facts(answer)
            .into_iter()
            .map(|f| (f.kind, f.text))
            .collect()
    }

    #[test]
    fn extracts_each_kind() {
        let facts = kinds("Invoice INV-2041 for $1,250.00 was paid on 2026-03-14; 37 refunds, user_42 and #118.");
        assert!(facts.contains(&(FactKind::Amount, "$1,250.00".into())));
        assert!(facts.contains(&(FactKind::Date, "2026-03-14".into())));
        assert!(facts.contains(&(FactKind::Identifier, "INV-2041".into())));
        assert!(facts.contains(&(FactKind::Identifier, "user_42".into())));
        assert!(facts.contains(&(FactKind::Identifier, "#118".into())));
        assert!(facts.contains(&(FactKind::Count, "37".into())));
    }

    #[test]
    fn matched_spans_are_not_rescanned_as_counts() {
        let facts = kinds("Paid $250 on 2026-03-14.");
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|(k, _)| *k != FactKind::Count));
    }

    #[test]
    fn small_numbers_are_ignored() {
        assert!(kinds("There are 3 open incidents and 0 blockers.").is_empty());
    }

    #[test]
    fn grounded_answer_passes() {
        let evidence = r#"[{"id":"INV-2041","amount":1250.00,"paid_at":"2026-03-14"},{"refunds":37}]"#;
        let answer = "INV-2041 was paid on 2026-03-14 and there were 37 refunds.";
        assert!(unsupported_facts(answer, evidence).is_empty());
    }

    #[test]
    fn numeric_forms_of_amounts_and_counts_are_accepted() {
        assert!(unsupported_facts("Revenue was $1,250.", r#"{"revenue":1250}"#).is_empty());
        assert!(unsupported_facts("We shipped 12,400 units.", "units=12400").is_empty());
        assert!(unsupported_facts("See PR #118.", r#"{"number":118}"#).is_empty());
    }

    #[test]
    fn fabricated_figure_is_unsupported() {
        let evidence = r#"{"orders": 41}"#;
        let answer = "There were 41 orders totalling $9,999.";
        let missing = unsupported_facts(answer, evidence);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].kind, FactKind::Amount);
    }

    #[test]
    fn answer_without_specifics_passes() {
        assert!(unsupported_facts("No anomalies found.", "").is_empty());
    }
}
