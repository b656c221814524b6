//! Identity-fact regexes, LLM fact extraction and JSON fence stripping.
//!
//! Detection precedence is deterministic: regex extraction always runs
//! first; LLM-backed classification is reserved for semantic-similarity
//! ties and never overrides a regex identity match.

use regex::Regex;
use std::sync::OnceLock;

use engram_providers::Llm;

/// A durable identity fact detected in free text.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityFact {
    pub key: &'static str,
    pub value: String,
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bmy name is ([A-Za-z][A-Za-z .'-]{0,60})").expect("static regex")
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bmy (?:primary )?email is ([\w.+-]+@[\w.-]+\.[A-Za-z]{2,})")
            .expect("static regex")
    })
}

/// Extract identity invariant candidates (`identity.name`,
/// `identity.primary_email`) from text.
pub fn identity_facts(content: &str) -> Vec<IdentityFact> {
    let mut facts = Vec::new();
    if let Some(caps) = name_regex().captures(content) {
        // The capture is greedy; cut at the first conjunction or comma so
        // "my name is Alice and ..." yields just the name.
        let raw = caps[1].trim();
        let value = raw
            .split(" and ")
            .next()
            .unwrap_or(raw)
            .split(',')
            .next()
            .unwrap_or(raw)
            .trim()
            .trim_end_matches('.')
            .trim()
            .to_string();
        if !value.is_empty() {
            facts.push(IdentityFact {
                key: "identity.name",
                value,
            });
        }
    }
    if let Some(caps) = email_regex().captures(content) {
        facts.push(IdentityFact {
            key: "identity.primary_email",
            value: caps[1].trim().to_string(),
        });
    }
    facts
}

/// Strip markdown code fences so fenced LLM output parses as plain JSON.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let inner = match inner.find('\n') {
        Some(pos) => &inner[pos + 1..],
        None => inner,
    };
    inner.trim().trim_end_matches("```").trim()
}

const FACT_EXTRACTION_PROMPT: &str = "Split the following note into independent atomic facts. \
Return strict JSON: {\"facts\": [\"...\"]}. Keep each fact self-contained and first-person \
where the note is first-person. Do not invent facts.\n\nNote:\n";

/// Split input into atomic facts with the LLM; falls back to sentence
/// splitting when the model output is not valid JSON.
pub async fn extract_facts(llm: &dyn Llm, content: &str) -> Vec<String> {
    let prompt = format!("{FACT_EXTRACTION_PROMPT}{content}");
    match llm.generate(&prompt).await {
        Ok(raw) => {
            let cleaned = strip_code_fences(&raw);
            match serde_json::from_str::<serde_json::Value>(cleaned) {
                Ok(parsed) => {
                    let facts: Vec<String> = parsed
                        .get("facts")
                        .and_then(|f| f.as_array())
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|v| v.as_str())
                                .map(|s| s.trim().to_string())
                                .filter(|s| !s.is_empty())
                                .collect()
                        })
                        .unwrap_or_default();
                    if facts.is_empty() {
                        split_sentences(content)
                    } else {
                        facts
                    }
                }
                Err(_) => {
                    tracing::warn!("fact extraction returned invalid JSON; using sentence split");
                    split_sentences(content)
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "fact extraction LLM call failed; using sentence split");
            split_sentences(content)
        }
    }
}

/// Regex-free fallback: sentence boundaries on `.`, `!`, `?` and newlines.
pub fn split_sentences(content: &str) -> Vec<String> {
    let mut facts: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in content.chars() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                facts.push(sentence.to_string());
            }
            current.clear();
        } else {
            current.push(ch);
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        facts.push(tail.to_string());
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_providers::MockLlm;

    #[test]
    fn identity_regexes_capture_name_and_email() {
        let facts = identity_facts("By the way, my name is Alice and my email is a@ex.com.");
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].key, "identity.name");
        assert_eq!(facts[0].value, "Alice");
        assert_eq!(facts[1].key, "identity.primary_email");
        assert_eq!(facts[1].value, "a@ex.com");
    }

    #[test]
    fn simple_name_statement() {
        let facts = identity_facts("my name is Bob");
        assert_eq!(facts, vec![IdentityFact { key: "identity.name", value: "Bob".into() }]);
        assert!(identity_facts("the project is named Atlas").is_empty());
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn llm_facts_parse_and_fallback() {
        let llm = MockLlm::with_responses(vec![
            "```json\n{\"facts\": [\"likes tea\", \"works remotely\"]}\n```".into(),
        ]);
        let facts = extract_facts(&llm, "likes tea and works remotely").await;
        assert_eq!(facts, vec!["likes tea".to_string(), "works remotely".to_string()]);

        let broken = MockLlm::with_responses(vec!["not json at all".into()]);
        let fallback = extract_facts(&broken, "First thing. Second thing.").await;
        assert_eq!(fallback, vec!["First thing".to_string(), "Second thing".to_string()]);
    }

    #[test]
    fn sentence_split_edge_cases() {
        assert!(split_sentences("   ").is_empty());
        assert_eq!(split_sentences("one"), vec!["one".to_string()]);
    }
}
