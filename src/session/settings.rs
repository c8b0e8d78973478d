use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::{DbError, Result};

/// Which executor a session writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorType {
    #[default]
    Simple,
    Reuse,
    Batch,
}

/// Lifetime of the first-level cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalCacheScope {
    /// Entries live until a write, commit, rollback or close.
    #[default]
    Session,
    /// Entries are dropped after every outermost query.
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoMappingBehavior {
    None,
    /// Auto-map top-level maps only.
    #[default]
    Partial,
    Full,
}

/// What auto-mapping does with a column it cannot place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoMappingUnknownColumnBehavior {
    #[default]
    None,
    Warning,
    Failing,
}

/// Engine-wide settings.
///
/// Every field has a default, so a settings file only names what it
/// changes:
///
/// ```
/// use rustsqlmap::session::{LocalCacheScope, Settings};
///
/// let settings = Settings::from_json_str(r#"{ "local_cache_scope": "STATEMENT" }"#).unwrap();
/// assert_eq!(settings.local_cache_scope, LocalCacheScope::Statement);
/// assert!(settings.cache_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wrap executors with the shared-cache layer
    pub cache_enabled: bool,
    pub lazy_loading_enabled: bool,
    pub local_cache_scope: LocalCacheScope,
    pub auto_mapping_behavior: AutoMappingBehavior,
    pub auto_mapping_unknown_column_behavior: AutoMappingUnknownColumnBehavior,
    /// Map `first_name` columns onto `firstName` properties
    pub map_underscore_to_camel_case: bool,
    pub call_setters_on_nulls: bool,
    pub return_instance_for_empty_row: bool,
    pub default_executor_type: ExecutorType,
    /// Seconds; applied to statements without their own timeout
    pub default_statement_timeout: Option<u64>,
    pub safe_row_bounds_enabled: bool,
    pub safe_result_handler_enabled: bool,
    /// Read generated keys after inserts that name no key generator
    pub use_generated_keys: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            lazy_loading_enabled: false,
            local_cache_scope: LocalCacheScope::Session,
            auto_mapping_behavior: AutoMappingBehavior::Partial,
            auto_mapping_unknown_column_behavior: AutoMappingUnknownColumnBehavior::None,
            map_underscore_to_camel_case: false,
            call_setters_on_nulls: false,
            return_instance_for_empty_row: false,
            default_executor_type: ExecutorType::Simple,
            default_statement_timeout: None,
            safe_row_bounds_enabled: false,
            safe_result_handler_enabled: true,
            use_generated_keys: false,
        }
    }
}

impl Settings {
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn lazy_loading_enabled(mut self, enabled: bool) -> Self {
        self.lazy_loading_enabled = enabled;
        self
    }

    pub fn local_cache_scope(mut self, scope: LocalCacheScope) -> Self {
        self.local_cache_scope = scope;
        self
    }

    pub fn auto_mapping_behavior(mut self, behavior: AutoMappingBehavior) -> Self {
        self.auto_mapping_behavior = behavior;
        self
    }

    pub fn auto_mapping_unknown_column_behavior(mut self, behavior: AutoMappingUnknownColumnBehavior) -> Self {
        self.auto_mapping_unknown_column_behavior = behavior;
        self
    }

    pub fn map_underscore_to_camel_case(mut self, enabled: bool) -> Self {
        self.map_underscore_to_camel_case = enabled;
        self
    }

    pub fn call_setters_on_nulls(mut self, enabled: bool) -> Self {
        self.call_setters_on_nulls = enabled;
        self
    }

    pub fn return_instance_for_empty_row(mut self, enabled: bool) -> Self {
        self.return_instance_for_empty_row = enabled;
        self
    }

    pub fn default_executor_type(mut self, executor_type: ExecutorType) -> Self {
        self.default_executor_type = executor_type;
        self
    }

    /// Set the default statement timeout in seconds
    pub fn default_statement_timeout(mut self, seconds: u64) -> Self {
        self.default_statement_timeout = Some(seconds);
        self
    }

    pub fn safe_row_bounds_enabled(mut self, enabled: bool) -> Self {
        self.safe_row_bounds_enabled = enabled;
        self
    }

    pub fn safe_result_handler_enabled(mut self, enabled: bool) -> Self {
        self.safe_result_handler_enabled = enabled;
        self
    }

    pub fn use_generated_keys(mut self, enabled: bool) -> Self {
        self.use_generated_keys = enabled;
        self
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.default_statement_timeout == Some(0) {
            return Err(DbError::Configuration(
                "default_statement_timeout must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate settings from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| DbError::Configuration(format!("Invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| DbError::Io(format!("Cannot read settings file {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.cache_enabled);
        assert!(settings.safe_result_handler_enabled);
        assert!(!settings.safe_row_bounds_enabled);
        assert_eq!(settings.auto_mapping_behavior, AutoMappingBehavior::Partial);
        assert_eq!(settings.default_executor_type, ExecutorType::Simple);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = Settings::from_json_str(
            r#"{ "auto_mapping_behavior": "FULL", "default_executor_type": "BATCH", "default_statement_timeout": 5 }"#,
        )
        .unwrap();
        assert_eq!(settings.auto_mapping_behavior, AutoMappingBehavior::Full);
        assert_eq!(settings.default_executor_type, ExecutorType::Batch);
        assert_eq!(settings.default_statement_timeout, Some(5));
        assert!(settings.cache_enabled);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(Settings::from_json_str(r#"{ "default_statement_timeout": 0 }"#).unwrap_err().is_configuration());
        assert!(Settings::from_json_str(r#"{ "local_cache_scope": "FOREVER" }"#).is_err());
    }
}
