use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Process-wide governance settings shared by every session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GovernanceConfig {
    pub general_log: bool,
    pub enable_fingerprint: bool,
    pub default_charset: String,
    pub max_allowed_packet: u32,
    /// Name of the sqlparser dialect used to parse scripts.
    pub sql_dialect: String,
    pub backup_host: String,
    pub backup_port: u16,
    pub backup_user: String,
    #[serde(skip_serializing, default)]
    pub backup_password: String,
}

impl GovernanceConfig {
    pub fn new() -> Self {
        Self {
            general_log: false,
            enable_fingerprint: false,
            default_charset: "AL32UTF8".to_string(),
            max_allowed_packet: 8192,
            sql_dialect: "generic".to_string(),
            backup_host: String::new(),
            backup_port: 0,
            backup_user: String::new(),
            backup_password: String::new(),
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("sqlgate");
            path.push("config.json");
            path
        })
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|err| {
                log::warn!("ignoring unreadable config {}: {err}", path.display());
                Self::new()
            }),
            _ => Self::new(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply a single `name = value` override.
    ///
    /// Values are interpreted by the type of the existing field, so
    /// `enable_fingerprint = 1` and `enable_fingerprint = true` both work.
    pub fn set_var(&mut self, name: &str, value: &str) -> Result<(), String> {
        let key = name.trim().to_ascii_lowercase();
        let mut doc = serde_json::to_value(&*self).map_err(|e| e.to_string())?;
        let fields = doc
            .as_object_mut()
            .ok_or_else(|| "config is not an object".to_string())?;

        let current = match fields.get(&key) {
            Some(current) => current.clone(),
            None => return Err(format!("Unknown system variable '{}'", name.trim())),
        };

        let raw = value.trim().trim_matches(|c| c == '\'' || c == '"');
        let parsed = match current {
            serde_json::Value::Bool(_) => match raw.to_ascii_lowercase().as_str() {
                "1" | "on" | "true" => serde_json::Value::Bool(true),
                "0" | "off" | "false" => serde_json::Value::Bool(false),
                _ => return Err(format!("Variable '{}' can't be set to '{}'", key, raw)),
            },
            serde_json::Value::Number(_) => raw
                .parse::<u64>()
                .map(serde_json::Value::from)
                .map_err(|_| format!("Incorrect argument type to variable '{}'", key))?,
            _ => serde_json::Value::String(raw.to_string()),
        };
        fields.insert(key.clone(), parsed);

        let mut updated: GovernanceConfig = serde_json::from_value(doc)
            .map_err(|e| format!("Variable '{}' can't be set to '{}': {}", key, raw, e))?;
        updated.backup_password = std::mem::take(&mut self.backup_password);
        *self = updated;
        Ok(())
    }

    /// Visible variables as `(name, value)` rows; secrets are never listed.
    pub fn variables(&self) -> Vec<(String, String)> {
        let doc = serde_json::to_value(self).unwrap_or_default();
        let mut rows: Vec<(String, String)> = doc
            .as_object()
            .map(|fields| {
                fields
                    .iter()
                    .map(|(name, value)| {
                        let shown = match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), shown)
                    })
                    .collect()
            })
            .unwrap_or_default();
        rows.sort();
        rows
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_var_by_field_type() {
        let mut config = GovernanceConfig::new();
        config.set_var("enable_fingerprint", "1").unwrap();
        assert!(config.enable_fingerprint);
        config.set_var("ENABLE_FINGERPRINT", "off").unwrap();
        assert!(!config.enable_fingerprint);
        config.set_var("max_allowed_packet", "65536").unwrap();
        assert_eq!(config.max_allowed_packet, 65536);
        config.set_var("default_charset", "'UTF8'").unwrap();
        assert_eq!(config.default_charset, "UTF8");
    }

    #[test]
    fn test_set_var_rejects_unknown_and_bad_values() {
        let mut config = GovernanceConfig::new();
        let err = config.set_var("no_such_var", "1").unwrap_err();
        assert!(err.contains("Unknown system variable"));
        assert!(config.set_var("general_log", "maybe").is_err());
        assert!(config.set_var("max_allowed_packet", "lots").is_err());
        assert_eq!(config, GovernanceConfig::new());
    }

    #[test]
    fn test_set_var_keeps_backup_password() {
        let mut config = GovernanceConfig::new();
        config.backup_password = "s3cret".to_string();
        config.set_var("backup_host", "bk1").unwrap();
        assert_eq!(config.backup_host, "bk1");
        assert_eq!(config.backup_password, "s3cret");
        assert!(config.variables().iter().all(|(name, _)| name != "backup_password"));
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"general_log": true, "backup_port": 1522}"#).unwrap();
        let config = GovernanceConfig::load_from(&path).unwrap();
        assert!(config.general_log);
        assert_eq!(config.backup_port, 1522);
        assert_eq!(config.sql_dialect, "generic");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = GovernanceConfig::new();
        config.enable_fingerprint = true;
        config.save_to(&path).unwrap();
        assert_eq!(GovernanceConfig::load_from(&path).unwrap(), config);
    }
}
