//! Deterministic lexical routing from task text to a handler name.
//!
//! An ordered table of (handler, keywords) pairs is scanned top to
//! bottom; the first entry with any keyword matching as a
//! case-insensitive substring of the task wins, and a configured
//! default handler is returned when nothing matches. Matching is
//! substring-based rather than tokenized, so rule ordering must place
//! more specific keywords ahead of generic ones; that ordering is a
//! documented property of the table, not something the algorithm
//! resolves.

use reflex_core::HandlerManifest;

/// One routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub handler: String,
    pub keywords: Vec<String>,
}

/// The ordered routing table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    default_handler: String,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>, default_handler: impl Into<String>) -> Self {
        Self {
            rules,
            default_handler: default_handler.into(),
        }
    }

    /// Build the table from a handler manifest, preserving its order.
    pub fn from_manifest(manifest: &HandlerManifest) -> Self {
        let rules = manifest
            .handlers
            .iter()
            .map(|h| RouteRule {
                handler: h.name.clone(),
                keywords: h.keywords.clone(),
            })
            .collect();
        Self::new(rules, manifest.default_handler.clone())
    }

    /// Resolve a task to a handler name.
    ///
    /// Pure function of the table and the task text; always returns a
    /// name, never fails.
    pub fn resolve(&self, task: &str) -> &str {
        let task_lower = task.to_lowercase();
        for rule in &self.rules {
            for keyword in &rule.keywords {
                if task_lower.contains(&keyword.to_lowercase()) {
                    return &rule.handler;
                }
            }
        }
        &self.default_handler
    }

    pub fn default_handler(&self) -> &str {
        &self.default_handler
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin_table() -> RouteTable {
        RouteTable::from_manifest(&HandlerManifest::builtin())
    }

    #[test]
    fn implement_routes_to_coder() {
        let table = builtin_table();
        assert_eq!(table.resolve("implement OAuth login"), "coder");
    }

    #[test]
    fn review_routes_to_reviewer() {
        let table = builtin_table();
        assert_eq!(table.resolve("review the pull request"), "reviewer");
    }

    #[test]
    fn no_match_returns_default() {
        let table = builtin_table();
        assert_eq!(table.resolve("hello there"), "coder");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let table = builtin_table();
        assert_eq!(table.resolve("REVIEW this ASAP"), "reviewer");
        assert_eq!(table.resolve("Deploy to staging"), "devops");
    }

    #[test]
    fn earliest_matching_rule_wins() {
        let table = RouteTable::new(
            vec![
                RouteRule {
                    handler: "first".to_string(),
                    keywords: vec!["shared".to_string()],
                },
                RouteRule {
                    handler: "second".to_string(),
                    keywords: vec!["shared".to_string()],
                },
            ],
            "fallback",
        );
        assert_eq!(table.resolve("a shared keyword"), "first");
    }

    #[test]
    fn substring_matching_has_no_word_boundaries() {
        // Deliberate, documented behavior: "test" matches inside
        // "latest" because matching is substring-based.
        let table = builtin_table();
        assert_eq!(table.resolve("ship the latest changes"), "tester");
    }

    #[test]
    fn specific_rules_precede_generic_ones() {
        let table = builtin_table();
        // "review" (reviewer) appears before "build" (coder) in the
        // table, so a task containing both routes to the reviewer.
        assert_eq!(table.resolve("review the build script"), "reviewer");
    }
}
