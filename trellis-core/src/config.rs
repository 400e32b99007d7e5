//! Engine Configuration
//!
//! Per-document settings. Every field has a default so a document can be
//! opened with `EngineConfig::default()` or from a partial JSON object.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Settings for one [`Engine`](crate::engine::Engine) instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Document flags, read by `flag` dependencies.
    pub flags: IndexMap<String, Value>,

    /// Run the value-graph cycle check before computing a value.
    pub check_value_cycles: bool,

    /// Emit one warning per referenced component that does not exist.
    pub warn_on_missing_components: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flags: IndexMap::new(),
            check_value_cycles: true,
            warn_on_missing_components: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set a document flag.
    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }

    /// Look up a document flag.
    pub fn flag(&self, name: &str) -> Option<&Value> {
        self.flags.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_enable_checks() {
        let config = EngineConfig::default();
        assert!(config.check_value_cycles);
        assert!(config.warn_on_missing_components);
        assert!(config.flags.is_empty());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"flags": {"readOnly": true}}"#).unwrap();
        assert!(config.check_value_cycles);
        assert_eq!(config.flag("readOnly"), Some(&json!(true)));
    }

    #[test]
    fn json_overrides() {
        let config = EngineConfig::from_json(
            r#"{"checkValueCycles": false, "warnOnMissingComponents": false}"#,
        )
        .unwrap();
        assert!(!config.check_value_cycles);
        assert!(!config.warn_on_missing_components);
    }

    #[test]
    fn builder_sets_flags() {
        let config = EngineConfig::default().with_flag("showFeedback", false);
        assert_eq!(config.flag("showFeedback"), Some(&json!(false)));
        assert_eq!(config.flag("missing"), None);
    }
}
