//! Configuration provider.
//!
//! A dotted-path accessor over a JSON tree loaded once at startup. Holds
//! the account mappings, mandatory tag list, deprecated database versions,
//! the administrator email and the per-policy feature flags.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::accounts::AccountMapping;

/// Tags every resource must carry. `BSP` is a composite rule, not a
/// literal tag lookup; see [`crate::tags`].
pub const DEFAULT_MANDATORY_TAGS: &[&str] = &[
    "PRCode",
    "Source",
    "SN_ServiceID",
    "SN_Environment",
    "SN_Application",
    "BSP",
];

#[derive(Debug, Clone, Deserialize)]
pub struct DeprecatedVersion {
    pub version: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone)]
pub struct Config {
    root: Value,
}

impl Config {
    /// Loads from the file named by `PORTAL_CONFIG`, defaulting to
    /// `config/default.json`. A missing file is an error; an empty
    /// configuration must be asked for explicitly.
    pub fn from_env() -> Result<Self> {
        let path =
            env::var("PORTAL_CONFIG").unwrap_or_else(|_| "config/default.json".to_string());
        Self::from_file(&path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let root: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(Self { root })
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn empty() -> Self {
        Self {
            root: Value::Object(serde_json::Map::new()),
        }
    }

    /// Dotted-path lookup, e.g. `get("auth.admin_emails")`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Typed lookup falling back to `default` when the path is absent or
    /// has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn account_mappings(&self) -> Vec<AccountMapping> {
        self.get_or("account_mappings", Vec::new())
    }

    pub fn mandatory_tags(&self) -> Vec<String> {
        self.get_or(
            "compliance.tagging.mandatory_tags",
            DEFAULT_MANDATORY_TAGS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Deprecated engine versions keyed by engine name.
    pub fn deprecated_versions(
        &self,
    ) -> std::collections::HashMap<String, Vec<DeprecatedVersion>> {
        self.get_or(
            "compliance.database.deprecated_versions",
            std::collections::HashMap::new(),
        )
    }

    pub fn admin_email(&self) -> Option<String> {
        self.get("auth.admin_emails")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn config() -> Config {
        Config::from_value(json!({
            "auth": {"admin_emails": "admin@example.org"},
            "features": {"compliance": {"policies": {"tagging": true}}},
            "compliance": {
                "tagging": {"mandatory_tags": ["BillingID", "BSP"]},
                "database": {"deprecated_versions": {
                    "postgres": [{"version": "9.6", "message": "upgrade"}]
                }}
            }
        }))
    }

    #[test]
    fn dotted_path_lookup() {
        let cfg = config();
        assert_eq!(
            cfg.get("auth.admin_emails"),
            Some(&json!("admin@example.org"))
        );
        assert_eq!(cfg.get("auth.missing"), None);
        assert!(cfg.get_bool("features.compliance.policies.tagging", false));
        assert!(!cfg.get_bool("features.compliance.policies.kms", false));
    }

    #[test]
    fn mandatory_tags_default_when_unset() {
        let cfg = Config::empty();
        assert_eq!(cfg.mandatory_tags().len(), DEFAULT_MANDATORY_TAGS.len());
        assert_eq!(config().mandatory_tags(), vec!["BillingID", "BSP"]);
    }

    #[test]
    fn deprecated_versions_deserialize() {
        let versions = config().deprecated_versions();
        assert_eq!(versions["postgres"][0].version, "9.6");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json!({"auth": {"admin_emails": "a@b.c"}})).unwrap();
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.admin_email().as_deref(), Some("a@b.c"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::from_file("/definitely/not/here.json").is_err());
    }
}
