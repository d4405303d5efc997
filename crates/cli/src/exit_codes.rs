//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                              |
//! |---------|------------|------------------------------------------|
//! | 0       | Universal  | Success                                  |
//! | 1       | Universal  | General error (unspecified)              |
//! | 2       | Universal  | CLI usage error (bad args, missing file) |
//! | 3-9     | config     | Settings file problems                   |
//! | 10-19   | formula    | `parse` command codes                    |
//! | 30-39   | replay     | Collaboration script replay codes        |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Config (3-9)
// =============================================================================

/// The settings file given with --config is unreadable or invalid.
pub const EXIT_CONFIG: u8 = 3;

// =============================================================================
// Formula (10-19)
// =============================================================================

/// The formula passed to `parse` does not parse.
pub const EXIT_FORMULA_PARSE: u8 = 10;

// =============================================================================
// Replay (30-39)
// =============================================================================

/// The script could not be read, or output could not be written.
pub const EXIT_REPLAY_IO: u8 = 30;

/// A script line is not a valid client message.
pub const EXIT_REPLAY_BAD_MESSAGE: u8 = 31;

/// `--strict` and at least one message was answered with an error.
pub const EXIT_REPLAY_REJECTED: u8 = 32;

/// The in-process host failed (a workbook thread could not start).
pub const EXIT_REPLAY_HOST: u8 = 33;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_CONFIG,
            EXIT_FORMULA_PARSE,
            EXIT_REPLAY_IO,
            EXIT_REPLAY_BAD_MESSAGE,
            EXIT_REPLAY_REJECTED,
            EXIT_REPLAY_HOST,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }
}
