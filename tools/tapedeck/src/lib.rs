pub mod boundary;
pub mod config;
pub mod errors;
pub mod log_retention;
pub mod logging;
pub mod schema;
pub mod sink;
pub mod tape;
pub mod task;

use clap::{error::ErrorKind, Parser, Subcommand};
use config::{load_config, AppConfig};
use errors::TapedeckError;
use logging::{init_run_logger, JsonlLogger};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use tape::RecordTape;
use task::record::RecordType;

pub use boundary::{Boundaries, Boundary, BoundaryMode};
pub use errors::TaskError;
pub use schema::{Field, Schema};
pub use tape::LogItem;
pub use task::record::ExecutionRecord;
pub use task::{ReplayConfig, RunOutcome, Task};

#[derive(Debug, Clone, Parser)]
#[command(name = "tapedeck")]
#[command(about = "Inspect and trim execution record tapes")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print one summary line per tape entry, oldest first.
    Show {
        #[arg(long)]
        tape: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = false)]
        errors: bool,
    },
    /// Count success and error entries per task.
    Stats {
        #[arg(long)]
        tape: Option<PathBuf>,
    },
    /// Evict the oldest entries until at most `max` remain, then save.
    Trim {
        #[arg(long)]
        tape: Option<PathBuf>,
        #[arg(long)]
        max: Option<usize>,
    },
}

pub fn run() -> Result<i32, TapedeckError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_args(&args, &mut out)
}

pub fn run_with_args(args: &[OsString], out: &mut dyn Write) -> Result<i32, TapedeckError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write_out(out, &error.to_string())?;
                return Ok(0);
            }
            _ => return Err(TapedeckError::Cli(error.to_string())),
        },
    };

    let cfg = load_config(cli.config.as_deref())?;
    if let Some(path) = &cfg.logging.path {
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = cfg.logging.max_payload_bytes;
        logger.budget_bytes = cfg.logging.budget_bytes;
        init_run_logger(logger);
    }

    match cli.command {
        Command::Show { tape, name, errors } => {
            let tape = open_tape(&cfg, tape)?;
            for (idx, item) in tape.log().iter().enumerate() {
                if name.as_deref().is_some_and(|n| n != item.name) {
                    continue;
                }
                if errors && item.record_type != RecordType::Error {
                    continue;
                }
                let calls: usize = item.boundaries.values().map(Vec::len).sum();
                let mut line = format!(
                    "{idx} {} {} calls={calls}",
                    item.name,
                    item.record_type.as_str()
                );
                if let Some(error) = &item.error {
                    line.push_str(&format!(" error={}", error.replace('\n', "\\n")));
                }
                write_line(out, &line)?;
            }
        }
        Command::Stats { tape } => {
            let tape = open_tape(&cfg, tape)?;
            let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
            for item in tape.log() {
                let entry = counts.entry(item.name.as_str()).or_default();
                match item.record_type {
                    RecordType::Success => entry.0 += 1,
                    RecordType::Error => entry.1 += 1,
                }
            }
            for (name, (success, error)) in &counts {
                write_line(out, &format!("{name} success={success} error={error}"))?;
            }
            write_line(out, &format!("total={}", tape.len()))?;
        }
        Command::Trim { tape, max } => {
            let max = max.unwrap_or(cfg.tape.max_length);
            if max == 0 {
                return Err(TapedeckError::Cli("--max must be at least 1".to_string()));
            }
            let mut tape = open_tape(&cfg, tape)?;
            let mut removed = 0usize;
            while tape.len() > max && tape.shift().is_some() {
                removed += 1;
            }
            tape.save_sync()?;
            write_line(
                out,
                &format!("trimmed {removed} entries; {} remain", tape.len()),
            )?;
        }
    }

    Ok(0)
}

fn open_tape(cfg: &AppConfig, path: Option<PathBuf>) -> Result<RecordTape, TapedeckError> {
    let mut tape = RecordTape::new(path.unwrap_or_else(|| cfg.tape.path.clone()));
    tape.load_sync()?;
    Ok(tape)
}

fn write_out(out: &mut dyn Write, text: &str) -> Result<(), TapedeckError> {
    out.write_all(text.as_bytes())
        .map_err(|e| TapedeckError::Io(e.to_string()))
}

fn write_line(out: &mut dyn Write, line: &str) -> Result<(), TapedeckError> {
    writeln!(out, "{line}").map_err(|e| TapedeckError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::run_with_args;
    use crate::errors::TapedeckError;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn help_exits_zero_and_writes_usage() {
        let mut out = Vec::new();
        let code = run_with_args(&args(&["tapedeck", "--help"]), &mut out).expect("help");
        assert_eq!(code, 0);
        assert!(String::from_utf8(out).expect("utf8").contains("Usage"));
    }

    #[test]
    fn unknown_subcommand_is_cli_error() {
        let mut out = Vec::new();
        let err = run_with_args(&args(&["tapedeck", "rewind"]), &mut out).expect_err("unknown");
        assert!(matches!(err, TapedeckError::Cli(_)));
    }

    #[test]
    fn stats_on_missing_tape_reports_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tape = dir.path().join("absent.jsonl");
        let mut out = Vec::new();
        run_with_args(
            &args(&["tapedeck", "stats", "--tape", &tape.display().to_string()]),
            &mut out,
        )
        .expect("stats");
        assert_eq!(String::from_utf8(out).expect("utf8"), "total=0\n");
    }
}
