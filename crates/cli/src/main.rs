// cogrid CLI - replay collaboration scripts, inspect formulas

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cogrid_cli::exit_codes::{EXIT_REPLAY_REJECTED, EXIT_SUCCESS};
use cogrid_cli::{formula, replay, CliError};
use cogrid_config::CollabSettings;

#[derive(Parser)]
#[command(name = "cogrid")]
#[command(about = "Collaborative spreadsheet engine tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSONL script of client messages through an in-process host
    #[command(after_help = "\
Examples:
  cogrid replay session.jsonl
  cogrid replay session.jsonl --config collab.toml --workbook budget
  cat session.jsonl | cogrid replay - --strict")]
    Replay {
        /// Script path, or - for stdin
        script: PathBuf,

        /// Settings file (defaults to the user config, then built-in defaults)
        #[arg(long, env = "COGRID_CONFIG")]
        config: Option<PathBuf>,

        /// Open this workbook before the script runs
        #[arg(long)]
        workbook: Option<String>,

        /// Exit non-zero if any message was answered with an error
        #[arg(long)]
        strict: bool,

        /// Suppress the summary on stderr
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Parse a formula and print its canonical form and references
    #[command(after_help = "\
Examples:
  cogrid parse '=sum(A1:A3)*2'
  cogrid parse '=Data!B2+C1' --json")]
    Parse {
        /// Formula (must start with =)
        formula: String,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            script,
            config,
            workbook,
            strict,
            quiet,
        } => cmd_replay(script, config, workbook, strict, quiet),
        Commands::Parse { formula, json } => cmd_parse(formula, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

// ============================================================================
// replay
// ============================================================================

fn cmd_replay(
    script: PathBuf,
    config: Option<PathBuf>,
    workbook: Option<String>,
    strict: bool,
    quiet: bool,
) -> Result<(), CliError> {
    let settings = match config {
        Some(path) => CollabSettings::load_from(&path).map_err(|e| {
            CliError::config(e.to_string()).with_hint("see collab.toml keys: retention, event_queue_depth, conflict_policy")
        })?,
        None => CollabSettings::load(),
    };

    let summary = replay::execute_script(&script, settings, workbook.as_deref(), io::stdout().lock())?;

    if !quiet {
        eprintln!(
            "Replayed {} messages across {} workbook(s), {} error(s)",
            summary.messages,
            summary.workbooks.len(),
            summary.errors
        );
    }

    if strict && summary.errors > 0 {
        return Err(CliError::new(
            EXIT_REPLAY_REJECTED,
            format!("{} message(s) were answered with an error", summary.errors),
        ));
    }
    Ok(())
}

// ============================================================================
// parse
// ============================================================================

fn cmd_parse(text: String, json: bool) -> Result<(), CliError> {
    let info = formula::describe(&text).map_err(|e| {
        let err = CliError::formula(format!("{}: {}", text, e));
        if text.trim_start().starts_with('=') {
            err
        } else {
            err.with_hint(format!("did you mean '={}'?", text.trim()))
        }
    })?;

    if json {
        let value = serde_json::json!({
            "canonical": info.canonical,
            "references": info.references,
            "functions": info.functions,
        });
        println!("{}", value);
    } else {
        println!("canonical:  {}", info.canonical);
        println!("references: {}", info.references.join(", "));
        if !info.functions.is_empty() {
            println!("functions:  {}", info.functions.join(", "));
        }
    }
    Ok(())
}
