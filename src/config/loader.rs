//! Configuration loader
//!
//! Loading pipeline:
//! 1. File size check
//! 2. UTF-8 BOM stripping
//! 3. YAML parsing with line numbers
//! 4. Validation (collects every issue)
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::EngineConfig;
use crate::config::validation::Validator;
use crate::detection::MatcherLimits;
use crate::detection::matcher::DEFAULT_MAX_PATTERN_LENGTH;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Limits on configuration size to prevent resource exhaustion.
///
/// Each limit can be raised through its environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigLimits {
    /// Maximum configuration file size in bytes (`PHASEKEEPER_MAX_CONFIG_SIZE`).
    pub max_config_size: usize,

    /// Maximum pattern length in characters (`PHASEKEEPER_MAX_PATTERN_LENGTH`).
    pub max_pattern_length: usize,

    /// Maximum number of accounts (`PHASEKEEPER_MAX_ACCOUNTS`).
    pub max_accounts: usize,

    /// Maximum target pairs per action (`PHASEKEEPER_MAX_TARGET_PAIRS`).
    pub max_target_pairs: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_config_size: env_or("PHASEKEEPER_MAX_CONFIG_SIZE", 1024 * 1024),
            max_pattern_length: env_or(
                "PHASEKEEPER_MAX_PATTERN_LENGTH",
                DEFAULT_MAX_PATTERN_LENGTH,
            ),
            max_accounts: env_or("PHASEKEEPER_MAX_ACCOUNTS", 64),
            max_target_pairs: env_or("PHASEKEEPER_MAX_TARGET_PAIRS", 256),
        }
    }
}

impl ConfigLimits {
    /// Limits for pattern compilation.
    #[must_use]
    pub const fn matcher_limits(&self) -> MatcherLimits {
        MatcherLimits {
            max_pattern_length: self.max_pattern_length,
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<EngineConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location.as_deref() {
            Some(location) if !location.is_empty() => write!(f, "{} at {location}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    limits: ConfigLimits,
}

impl ConfigLoader {
    /// Creates a loader with explicit limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Creates a loader with limits from the environment.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// The limits this loader enforces.
    #[must_use]
    pub const fn limits(&self) -> &ConfigLimits {
        &self.limits
    }

    /// Loads a configuration file and returns the frozen configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or is over the size limit
    /// - YAML parsing fails or the file is empty
    /// - Validation reports errors
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.limits.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!(
                    "at most {} bytes (set PHASEKEEPER_MAX_CONFIG_SIZE to increase)",
                    self.limits.max_config_size
                ),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_from_str(&raw, path)
    }

    /// Parses and validates configuration text; `source` names it in errors.
    ///
    /// # Errors
    ///
    /// Returns an error if YAML parsing fails, the document is empty, or
    /// validation reports errors.
    pub fn load_from_str(&self, content: &str, source: &Path) -> Result<LoadResult, ConfigError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        if content.trim().is_empty() {
            return Err(empty_config(source));
        }

        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| parse_error(source, &e))?;
        if value.is_null() {
            return Err(empty_config(source));
        }

        let config: EngineConfig =
            serde_yaml::from_str(content).map_err(|e| parse_error(source, &e))?;

        let mut validator = Validator::new();
        let result = validator.validate(&config, &self.limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: source.display().to_string(),
                errors: result.errors,
            });
        }

        let warnings = result
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

fn parse_error(source: &Path, e: &serde_yaml::Error) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::from(source),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    }
}

fn empty_config(source: &Path) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::from(source),
        line: None,
        message: "Configuration file is empty".to_string(),
    }
}

/// Reads an environment variable, parsing it to type `T`, or returns the default.
///
/// Logs a warning if the variable is set but cannot be parsed.
pub(crate) fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %v, "invalid env var value, using default");
            default
        }),
        Err(_) => default,
    }
}
