use crate::errors::TapedeckError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub tape: TapeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TapeConfig {
    pub path: PathBuf,
    pub max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Run log destination. `None` disables the run log.
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tape: TapeConfig {
                path: PathBuf::from(".tapedeck/tape.jsonl"),
                max_length: 100,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    tape: Option<PartialTapeConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTapeConfig {
    path: Option<PathBuf>,
    max_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Loads `path` over the defaults. `None` yields the defaults untouched.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, TapedeckError> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| TapedeckError::Io(format!("{}: {e}", path.display())))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<AppConfig, TapedeckError> {
    let partial: PartialAppConfig =
        toml::from_str(text).map_err(|e| TapedeckError::ConfigParse(e.to_string()))?;
    let mut cfg = AppConfig::default();

    if let Some(tape) = partial.tape {
        if let Some(path) = tape.path {
            cfg.tape.path = path;
        }
        if let Some(max_length) = tape.max_length {
            cfg.tape.max_length = max_length;
        }
    }
    if let Some(logging) = partial.logging {
        if logging.path.is_some() {
            cfg.logging.path = logging.path;
        }
        if let Some(max_payload_bytes) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = max_payload_bytes;
        }
        if let Some(budget_bytes) = logging.budget_bytes {
            cfg.logging.budget_bytes = budget_bytes;
        }
    }

    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_config(cfg: &AppConfig) -> Result<(), TapedeckError> {
    if cfg.tape.max_length == 0 {
        return Err(TapedeckError::InvalidConfig(
            "tape.max_length must be at least 1".to_string(),
        ));
    }
    if cfg.tape.path.as_os_str().is_empty() {
        return Err(TapedeckError::InvalidConfig(
            "tape.path must not be empty".to_string(),
        ));
    }
    if cfg.logging.path.as_deref() == Some(cfg.tape.path.as_path()) {
        return Err(TapedeckError::InvalidConfig(
            "logging.path must differ from tape.path".to_string(),
        ));
    }
    Ok(())
}
