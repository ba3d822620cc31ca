//! Handler manifest: routing rules, skill allow-lists, and auxiliary
//! service declarations.
//!
//! The manifest is an ordered document: routing scans handlers top to
//! bottom and the first keyword match wins, so more specific keywords
//! must be listed ahead of generic ones. Matching is plain substring,
//! not tokenized; rule ordering is the only tie-break.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for manifest parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("invalid YAML manifest: {0}")]
    InvalidYaml(String),
    #[error("invalid handler name: {0}")]
    InvalidName(String),
    #[error("duplicate handler: {0}")]
    DuplicateHandler(String),
    #[error("handler {handler} declares unknown service: {service}")]
    UnknownService { handler: String, service: String },
    #[error("manifest declares no handlers")]
    Empty,
}

/// A single handler declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Handler name (lowercase alphanumeric + hyphens).
    pub name: String,
    /// Routing keywords, matched as case-insensitive substrings.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Skills this handler is authorized to invoke.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Auxiliary services to best-effort start before each step.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An auxiliary service declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Command used to start the service; absent means externally managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The parsed handler manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerManifest {
    /// Handler used when no routing rule matches.
    pub default_handler: String,
    /// Ordered handler table; order is the routing tie-break.
    pub handlers: Vec<HandlerSpec>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// Validates a handler name.
///
/// Rules: 1-64 chars, lowercase letters, numbers, and hyphens; no
/// leading/trailing/consecutive hyphens.
pub fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > 64 {
        return Err(ManifestError::InvalidName(format!(
            "name exceeds 64 characters (got {})",
            name.len()
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(ManifestError::InvalidName(
            "name cannot start or end with hyphen".to_string(),
        ));
    }
    if name.contains("--") {
        return Err(ManifestError::InvalidName(
            "name cannot contain consecutive hyphens".to_string(),
        ));
    }
    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(ManifestError::InvalidName(format!(
                "invalid character '{}': only lowercase letters, numbers, and hyphens allowed",
                c
            )));
        }
    }
    Ok(())
}

/// Parse and validate a manifest from YAML content.
pub fn parse_manifest(content: &str) -> Result<HandlerManifest, ManifestError> {
    let manifest: HandlerManifest =
        serde_yaml::from_str(content).map_err(|e| ManifestError::InvalidYaml(e.to_string()))?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Validate an already-constructed manifest.
pub fn validate_manifest(manifest: &HandlerManifest) -> Result<(), ManifestError> {
    if manifest.handlers.is_empty() {
        return Err(ManifestError::Empty);
    }

    let mut seen = std::collections::HashSet::new();
    for handler in &manifest.handlers {
        validate_name(&handler.name)?;
        if !seen.insert(handler.name.as_str()) {
            return Err(ManifestError::DuplicateHandler(handler.name.clone()));
        }
    }

    let declared: std::collections::HashSet<&str> =
        manifest.services.iter().map(|s| s.name.as_str()).collect();
    for handler in &manifest.handlers {
        for service in &handler.services {
            if !declared.contains(service.as_str()) {
                return Err(ManifestError::UnknownService {
                    handler: handler.name.clone(),
                    service: service.clone(),
                });
            }
        }
    }

    Ok(())
}

impl HandlerManifest {
    /// Built-in manifest used when the config names no manifest file.
    ///
    /// Order matters: handlers with rarer, more specific keywords come
    /// before the generic coder fallback so substring matching does not
    /// mis-route (e.g., "review the build script" must hit the reviewer,
    /// not the coder via "build").
    pub fn builtin() -> Self {
        let handler = |name: &str, keywords: &[&str], skills: &[&str]| HandlerSpec {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| (*s).to_string()).collect(),
            skills: skills.iter().map(|s| (*s).to_string()).collect(),
            services: Vec::new(),
            description: None,
        };

        Self {
            default_handler: "coder".to_string(),
            handlers: vec![
                handler(
                    "reviewer",
                    &["review", "audit", "critique", "pull request"],
                    &["diff-summary", "style-check"],
                ),
                handler(
                    "tester",
                    &["test", "verify", "validate", "coverage"],
                    &["test-runner", "coverage-report"],
                ),
                handler(
                    "documenter",
                    &["document", "readme", "changelog", "docstring"],
                    &["doc-outline"],
                ),
                handler(
                    "devops",
                    &["deploy", "release", "docker", "pipeline", "kubernetes"],
                    &["deploy-plan"],
                ),
                handler(
                    "architect",
                    &["design", "architecture", "diagram"],
                    &["dependency-graph"],
                ),
                handler(
                    "researcher",
                    &["research", "investigate", "explore", "compare"],
                    &["web-search", "summarize"],
                ),
                handler(
                    "coder",
                    &["implement", "code", "build", "fix", "refactor", "debug"],
                    &["diff-summary", "test-runner"],
                ),
            ],
            services: Vec::new(),
        }
    }

    /// Look up a handler declaration by name.
    pub fn handler(&self, name: &str) -> Option<&HandlerSpec> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Look up a service declaration by name.
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}
