// Configuration loading

pub mod settings;

pub use settings::{CollabSettings, ConfigError, ConflictPolicyKind};
