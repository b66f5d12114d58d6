//! Engine configuration
//!
//! Configuration is optional: the built-in defaults run a Python profile
//! with a 2 second per-case timeout. A TOML file (pointed at by
//! `PROCTOR_CONFIG`) can replace the language table, and single values can
//! be overridden from the environment.

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

/// Default wall-clock budget for one test-case execution
pub const DEFAULT_CASE_TIMEOUT_MS: u64 = 2_000;

/// Captured output is truncated beyond this many bytes
pub const MAX_CAPTURED_OUTPUT_BYTES: usize = 64 * 1024;

/// How to materialize and run a candidate program for one language
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageProfile {
    /// File suffix for the temp source file (e.g. ".py")
    pub source_suffix: String,
    /// Command template; the `{source}` placeholder is replaced with the
    /// temp file path
    pub run_command: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Engine-wide configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock timeout per test case in milliseconds
    pub case_timeout_ms: u64,
    languages: HashMap<String, LanguageProfile>,
}

/// Raw TOML shape
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    case_timeout_ms: Option<u64>,
    #[serde(default)]
    languages: HashMap<String, LanguageProfile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut languages = HashMap::new();
        languages.insert(
            "python".to_string(),
            LanguageProfile {
                source_suffix: ".py".to_string(),
                run_command: vec!["python3".to_string(), "{source}".to_string()],
                aliases: vec!["py".to_string(), "python3".to_string()],
            },
        );
        Self {
            case_timeout_ms: DEFAULT_CASE_TIMEOUT_MS,
            languages,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment and the optional TOML file
    /// named by `PROCTOR_CONFIG`.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("PROCTOR_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid config file {}", path))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(raw) = std::env::var("CASE_TIMEOUT_MS") {
            config.case_timeout_ms = raw
                .parse()
                .with_context(|| format!("Invalid CASE_TIMEOUT_MS: {}", raw))?;
        }

        Ok(config)
    }

    /// Parse a TOML document; languages in the file replace the defaults,
    /// an empty table keeps them.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        let mut config = Self::default();
        if let Some(timeout) = raw.case_timeout_ms {
            config.case_timeout_ms = timeout;
        }
        if !raw.languages.is_empty() {
            config.languages = raw.languages;
        }
        Ok(config)
    }

    /// Look up a language profile by name or alias (case-insensitive)
    pub fn language(&self, name: &str) -> Option<&LanguageProfile> {
        let wanted = name.to_lowercase();
        if let Some(profile) = self.languages.get(&wanted) {
            return Some(profile);
        }
        self.languages
            .values()
            .find(|p| p.aliases.iter().any(|a| a.to_lowercase() == wanted))
    }

    /// Replace the language table (used by tests and embedders)
    pub fn with_language(mut self, name: impl Into<String>, profile: LanguageProfile) -> Self {
        self.languages.insert(name.into(), profile);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_python_profile() {
        let config = EngineConfig::default();
        let python = config.language("python").unwrap();
        assert_eq!(python.source_suffix, ".py");
        assert_eq!(config.case_timeout_ms, DEFAULT_CASE_TIMEOUT_MS);
    }

    #[test]
    fn test_alias_lookup() {
        let config = EngineConfig::default();
        assert!(config.language("PY").is_some());
        assert!(config.language("python3").is_some());
        assert!(config.language("cobol").is_none());
    }

    #[test]
    fn test_from_toml_overrides() {
        let config = EngineConfig::from_toml(
            r#"
case_timeout_ms = 500

[languages.sh]
source_suffix = ".sh"
run_command = ["sh", "{source}"]
"#,
        )
        .unwrap();
        assert_eq!(config.case_timeout_ms, 500);
        assert!(config.language("sh").is_some());
        // file table replaces the defaults entirely
        assert!(config.language("python").is_none());
    }
}
