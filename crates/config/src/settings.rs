// Collaboration host settings
// Loaded from ~/.config/cogrid/collab.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest column count addressable with three letters (ZZZ).
const MAX_ADDRESSABLE_COLS: usize = 18_278;

/// How concurrent writes to the same cell are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicyKind {
    /// Later write wins; the overwritten session is notified (default)
    #[default]
    LastWriterWins,
    /// Stale edits to concurrently modified cells are rejected
    RejectStale,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("invalid collab.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabSettings {
    /// Operation log entries kept for delta resync
    pub retention: usize,

    /// Per-session event queue capacity
    pub event_queue_depth: usize,

    /// Deliver a session's own change sets back to it
    pub echo_to_origin: bool,

    pub conflict_policy: ConflictPolicyKind,

    /// Name of the sheet every new workbook starts with
    pub default_sheet: String,

    pub max_rows: usize,
    pub max_cols: usize,
}

impl Default for CollabSettings {
    fn default() -> Self {
        Self {
            retention: 1000,
            event_queue_depth: 256,
            echo_to_origin: false,
            conflict_policy: ConflictPolicyKind::default(),
            default_sheet: "Sheet1".to_string(),
            max_rows: 1_048_576,
            max_cols: 16_384,
        }
    }
}

impl CollabSettings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cogrid")
            .join("collab.toml")
    }

    /// Load settings from the default path, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    /// Load and validate settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.event_queue_depth == 0 {
            return invalid("event_queue_depth", "must be at least 1");
        }
        if self.max_rows == 0 {
            return invalid("max_rows", "must be at least 1");
        }
        if self.max_cols == 0 || self.max_cols > MAX_ADDRESSABLE_COLS {
            return invalid("max_cols", "must be between 1 and 18278");
        }
        let name = self.default_sheet.trim();
        if name.is_empty()
            || name.chars().count() > 31
            || name.contains(['[', ']', ':', '*', '?', '/', '\\'])
        {
            return invalid("default_sheet", "not a valid sheet name");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = CollabSettings::default();
        assert_eq!(settings.retention, 1000);
        assert_eq!(settings.event_queue_depth, 256);
        assert!(!settings.echo_to_origin);
        assert_eq!(settings.conflict_policy, ConflictPolicyKind::LastWriterWins);
        assert_eq!(settings.default_sheet, "Sheet1");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let settings = CollabSettings::from_toml_str(
            r#"
retention = 50
conflict_policy = "reject_stale"
"#,
        )
        .unwrap();
        assert_eq!(settings.retention, 50);
        assert_eq!(settings.conflict_policy, ConflictPolicyKind::RejectStale);
        assert_eq!(settings.event_queue_depth, 256);
        assert_eq!(settings.max_cols, 16_384);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = CollabSettings::from_toml_str(r#"conflict_policy = "first_writer_wins""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let err = CollabSettings::from_toml_str("event_queue_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "event_queue_depth", .. }));

        let err = CollabSettings::from_toml_str(r#"default_sheet = "a/b""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "default_sheet", .. }));

        let err = CollabSettings::from_toml_str("max_cols = 20000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_cols", .. }));
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("collab.toml");

        let settings = CollabSettings {
            retention: 10,
            echo_to_origin: true,
            default_sheet: "Data".to_string(),
            ..CollabSettings::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = CollabSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempdir().unwrap();
        let err = CollabSettings::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_config_path() {
        let path = CollabSettings::config_path();
        assert!(path.ends_with("cogrid/collab.toml"));
    }
}
