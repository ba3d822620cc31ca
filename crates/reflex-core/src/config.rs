//! Configuration parsing for the orchestrator.
//!
//! Key=value format, one setting per line. Precedence: explicit setters >
//! config file > defaults.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid float value for {key}: {value}")]
    InvalidFloat { key: String, value: String },
}

/// Orchestrator configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite cache database.
    pub db_path: PathBuf,

    /// Handler used when no routing rule matches.
    pub default_handler: String,
    /// Maximum handoff transitions per chain (executions = depth + 1).
    pub max_handoff_depth: u32,
    /// Wall-clock budget per handler execution, in seconds.
    pub step_timeout_sec: u32,

    /// Default result count for semantic queries.
    pub query_limit: usize,
    /// Drop query results below this similarity when set.
    pub min_similarity: Option<f32>,

    // Ingestion
    /// Target words per document chunk.
    pub chunk_size_words: usize,
    /// Words carried over between adjacent chunks.
    pub chunk_overlap_words: usize,

    /// Optional handler manifest overriding the built-in routing table.
    pub manifest_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_handler: "coder".to_string(),
            max_handoff_depth: 3,
            step_timeout_sec: 300,
            query_limit: 5,
            min_similarity: None,
            chunk_size_words: 400,
            chunk_overlap_words: 50,
            manifest_path: None,
        }
    }
}

/// Get the default database path (~/.local/share/reflexd/reflex.db).
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map_or_else(|| PathBuf::from(".reflex"), |d| d.join("reflexd"))
        .join("reflex.db")
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            // Must contain '='
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "db_path" => self.db_path = PathBuf::from(value),
            "default_handler" => self.default_handler = value.to_string(),
            "max_handoff_depth" => self.max_handoff_depth = Self::parse_int(key, value)?,
            "step_timeout_sec" => self.step_timeout_sec = Self::parse_int(key, value)?,
            "query_limit" => self.query_limit = Self::parse_int(key, value)?,
            "min_similarity" => {
                self.min_similarity = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| ConfigError::InvalidFloat {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?)
                }
            }
            "chunk_size_words" => self.chunk_size_words = Self::parse_int(key, value)?,
            "chunk_overlap_words" => self.chunk_overlap_words = Self::parse_int(key, value)?,
            "manifest_path" => {
                self.manifest_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            _ => {
                // Warn but don't fail for unknown keys.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.db_path.is_relative() {
            self.db_path = workspace_root.join(&self.db_path);
        }
        if let Some(ref manifest) = self.manifest_path {
            if manifest.is_relative() {
                self.manifest_path = Some(workspace_root.join(manifest));
            }
        }
    }
}

/// Optional dependency for resolving user directories.
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.default_handler, "coder");
        assert_eq!(config.max_handoff_depth, 3);
        assert_eq!(config.step_timeout_sec, 300);
        assert_eq!(config.query_limit, 5);
        assert!(config.min_similarity.is_none());
        assert_eq!(config.chunk_size_words, 400);
        assert_eq!(config.chunk_overlap_words, 50);
        assert!(config.manifest_path.is_none());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
default_handler="researcher"
max_handoff_depth=5
step_timeout_sec=60
min_similarity=0.4
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.default_handler, "researcher");
        assert_eq!(config.max_handoff_depth, 5);
        assert_eq!(config.step_timeout_sec, 60);
        assert_eq!(config.min_similarity, Some(0.4));
    }

    #[test]
    fn parse_rejects_bad_int() {
        let mut config = Config::default();
        let result = config.parse_content("max_handoff_depth=lots");
        assert!(matches!(result, Err(ConfigError::InvalidInt { .. })));
    }

    #[test]
    fn parse_rejects_missing_equals() {
        let mut config = Config::default();
        let result = config.parse_content("just some text");
        assert!(matches!(result, Err(ConfigError::InvalidLine(_))));
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn resolve_paths_joins_relative() {
        let mut config = Config::default();
        config.db_path = PathBuf::from("state/reflex.db");
        config.manifest_path = Some(PathBuf::from("handlers.yaml"));
        config.resolve_paths(Path::new("/workspace"));
        assert_eq!(config.db_path, PathBuf::from("/workspace/state/reflex.db"));
        assert_eq!(
            config.manifest_path,
            Some(PathBuf::from("/workspace/handlers.yaml"))
        );
    }

    #[test]
    fn load_file_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "query_limit=10\nchunk_size_words=200\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.query_limit, 10);
        assert_eq!(config.chunk_size_words, 200);
    }
}
