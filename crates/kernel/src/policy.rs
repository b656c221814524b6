//! Scope detection and result masking.
//!
//! Readers see items whose confidentiality scope their session allows;
//! everything else collapses into a fixed redacted shape that never
//! carries the original content.

use serde::Serialize;

use engram_domain::memory::ConfidentialityScope;

/// Keyword hints used to classify a write when no explicit scope or
/// metadata scope is given. First match wins in this order.
const SCOPE_HINTS: &[(ConfidentialityScope, &[&str])] = &[
    (
        ConfidentialityScope::Finance,
        &["finance", "bank", "salary", "invoice", "tax", "payment", "credit"],
    ),
    (
        ConfidentialityScope::Health,
        &["health", "medical", "doctor", "diagnosis", "therapy", "medication"],
    ),
    (
        ConfidentialityScope::Private,
        &["password", "secret", "token", "api_key", "apikey", "private"],
    ),
    (
        ConfidentialityScope::Personal,
        &["family", "relationship", "home", "personal"],
    ),
];

/// Resolve a write's confidentiality scope: explicit value, then metadata,
/// then keyword hints, defaulting to `work`.
pub fn detect_scope(
    explicit: Option<&str>,
    metadata: &serde_json::Value,
    categories: &[String],
    content: &str,
) -> ConfidentialityScope {
    if let Some(explicit) = explicit.filter(|s| !s.trim().is_empty()) {
        return ConfidentialityScope::parse_lenient(explicit);
    }
    if let Some(meta_scope) = metadata
        .get("confidentiality_scope")
        .or_else(|| metadata.get("scope_confidentiality"))
        .and_then(|v| v.as_str())
    {
        return ConfidentialityScope::parse_lenient(meta_scope);
    }

    let mut terms: Vec<String> = Vec::new();
    for category in categories {
        terms.extend(
            category
                .to_lowercase()
                .replace(['/', '_'], " ")
                .split_whitespace()
                .map(String::from),
        );
    }
    terms.extend(content.to_lowercase().split_whitespace().map(String::from));

    for (scope, hints) in SCOPE_HINTS {
        if terms.iter().any(|t| hints.contains(&t.as_str())) {
            return *scope;
        }
    }
    ConfidentialityScope::Work
}

/// The redacted shape returned for items outside the reader's scopes or
/// namespaces. Carries no content.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedHit {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub time: Option<String>,
    pub importance: f64,
    pub details: &'static str,
    pub masked: bool,
}

impl RedactedHit {
    pub fn for_scope(
        id: &str,
        scope: ConfidentialityScope,
        time: Option<String>,
        importance: f64,
    ) -> RedactedHit {
        let kind = if scope == ConfidentialityScope::Work {
            "memory_event".to_string()
        } else {
            format!("{scope}_event")
        };
        RedactedHit {
            id: id.to_string(),
            kind,
            time,
            importance,
            details: "[REDACTED]",
            masked: true,
        }
    }

    pub fn for_namespace(id: &str, time: Option<String>, importance: f64) -> RedactedHit {
        RedactedHit {
            id: id.to_string(),
            kind: "private_event".to_string(),
            time,
            importance,
            details: "[REDACTED]",
            masked: true,
        }
    }
}

/// Is `scope` visible to a session holding `allowed`?
/// `None` = unrestricted local user; `Some(empty)` = nothing visible.
pub fn scope_visible(
    scope: ConfidentialityScope,
    allowed: Option<&[ConfidentialityScope]>,
) -> bool {
    match allowed {
        None => true,
        Some(allowed) => allowed.contains(&scope),
    }
}

/// Is `namespace` visible? `None` or a `*` entry = unrestricted.
pub fn namespace_visible(namespace: &str, allowed: Option<&[String]>) -> bool {
    match allowed {
        None => true,
        Some(allowed) => {
            allowed.iter().any(|n| n == "*")
                || allowed.iter().any(|n| n == namespace)
        }
    }
}

/// Loopback peers may use the trusted-local bypass.
pub fn is_trusted_local_host(host: &str) -> bool {
    matches!(
        host.trim().to_ascii_lowercase().as_str(),
        "127.0.0.1" | "::1" | "::ffff:127.0.0.1" | "localhost"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_scope_wins_over_hints() {
        let scope = detect_scope(
            Some("personal"),
            &serde_json::json!({}),
            &[],
            "salary and tax update",
        );
        assert_eq!(scope, ConfidentialityScope::Personal);
    }

    #[test]
    fn metadata_scope_wins_over_hints() {
        let scope = detect_scope(
            None,
            &serde_json::json!({"confidentiality_scope": "health"}),
            &[],
            "salary numbers",
        );
        assert_eq!(scope, ConfidentialityScope::Health);
    }

    #[test]
    fn keyword_hints_classify_content() {
        let meta = serde_json::json!({});
        assert_eq!(
            detect_scope(None, &meta, &[], "got my salary statement today"),
            ConfidentialityScope::Finance
        );
        assert_eq!(
            detect_scope(None, &meta, &[], "doctor appointment on Friday"),
            ConfidentialityScope::Health
        );
        assert_eq!(
            detect_scope(None, &meta, &[], "rotated the api_key"),
            ConfidentialityScope::Private
        );
        assert_eq!(
            detect_scope(None, &meta, &[], "sprint retro notes"),
            ConfidentialityScope::Work
        );
    }

    #[test]
    fn category_terms_count_as_hints() {
        let scope = detect_scope(
            None,
            &serde_json::json!({}),
            &["life/family".to_string()],
            "weekend plans",
        );
        assert_eq!(scope, ConfidentialityScope::Personal);
    }

    #[test]
    fn visibility_rules() {
        use ConfidentialityScope::*;
        assert!(scope_visible(Finance, None));
        assert!(scope_visible(Work, Some(&[Work])));
        assert!(!scope_visible(Finance, Some(&[Work])));
        assert!(!scope_visible(Work, Some(&[])));

        assert!(namespace_visible("anything", None));
        assert!(namespace_visible("anything", Some(&["*".to_string()])));
        assert!(namespace_visible("default", Some(&["default".to_string()])));
        assert!(!namespace_visible("projects", Some(&["default".to_string()])));
    }

    #[test]
    fn redacted_shape_never_leaks_content() {
        let hit = RedactedHit::for_scope("m1", ConfidentialityScope::Finance, None, 0.5);
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["details"], "[REDACTED]");
        assert_eq!(json["masked"], true);
        assert_eq!(json["type"], "finance_event");
        assert!(json.get("content").is_none());
        assert!(json.get("memory").is_none());
    }

    #[test]
    fn loopback_detection() {
        assert!(is_trusted_local_host("127.0.0.1"));
        assert!(is_trusted_local_host("::1"));
        assert!(!is_trusted_local_host("10.0.0.5"));
    }
}
