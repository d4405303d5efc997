//! cogrid command-line tooling.

use std::fmt;

pub mod exit_codes;
pub mod formula;
pub mod replay;

use exit_codes::{EXIT_CONFIG, EXIT_FORMULA_PARSE, EXIT_REPLAY_BAD_MESSAGE, EXIT_REPLAY_IO, EXIT_USAGE};

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_REPLAY_IO, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(EXIT_CONFIG, msg)
    }

    pub fn bad_message(msg: impl Into<String>) -> Self {
        Self::new(EXIT_REPLAY_BAD_MESSAGE, msg)
    }

    pub fn formula(msg: impl Into<String>) -> Self {
        Self::new(EXIT_FORMULA_PARSE, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
