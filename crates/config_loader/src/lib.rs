//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `StreamingBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("feeds.toml")).unwrap();
//! println!("Feeds: {}", blueprint.feeds.len());
//! ```

mod parser;
mod validator;

pub use contracts::StreamingBlueprint;
pub use parser::ConfigFormat;

use contracts::{StreamError, StreamingConfig};
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<StreamingBlueprint, StreamError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<StreamingBlueprint, StreamError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an already-built blueprint (e.g. after CLI overrides)
    pub fn validate(blueprint: &StreamingBlueprint) -> Result<(), StreamError> {
        validator::validate(blueprint)
    }

    /// Validate runtime options only (no feeds / channels / upstream)
    pub fn validate_streaming(streaming: &StreamingConfig) -> Result<(), StreamError> {
        validator::validate_streaming(streaming)
    }

    /// Serialize StreamingBlueprint to TOML string
    pub fn to_toml(blueprint: &StreamingBlueprint) -> Result<String, StreamError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| StreamError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize StreamingBlueprint to JSON string
    pub fn to_json(blueprint: &StreamingBlueprint) -> Result<String, StreamError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| StreamError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, StreamError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            StreamError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            StreamError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, StreamError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<StreamingBlueprint, StreamError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }
}
