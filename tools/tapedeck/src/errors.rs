use crate::schema::Violation;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure failures: tape files, config, CLI, sinks.
#[derive(Debug, Error)]
pub enum TapedeckError {
    #[error("io error: {0}")]
    Io(String),
    #[error("folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("serialize error: {0}")]
    Serialize(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("sink error: {0}")]
    Sink(String),
}

/// Failures surfaced by a task run or replay.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Raised by a handler or boundary. Displays as the bare message.
    #[error("{0}")]
    Execution(String),
    #[error("boundary `{boundary}` has no recorded call at position {position}")]
    ReplayExhausted { boundary: String, position: usize },
    #[error("no boundary named `{0}`")]
    HandlerNotFound(String),
}

impl TaskError {
    pub fn execution(message: impl fmt::Display) -> Self {
        Self::Execution(message.to_string())
    }
}

/// Schema rejection, listing every violated constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input validation failed")?;
        for (idx, violation) in self.violations.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{sep}{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_displays_bare_message() {
        let err = TaskError::execution("Value cannot be negative");
        assert_eq!(err.to_string(), "Value cannot be negative");
    }

    #[test]
    fn validation_error_lists_all_violations() {
        let err = TaskError::from(ValidationError {
            violations: vec![
                Violation::new("value", "expected number, got string"),
                Violation::new("name", "required"),
            ],
        });
        assert_eq!(
            err.to_string(),
            "input validation failed: value: expected number, got string; name: required"
        );
    }

    #[test]
    fn folder_not_found_names_the_path() {
        let err = TapedeckError::FolderNotFound(PathBuf::from("/missing/dir"));
        assert_eq!(err.to_string(), "folder not found: /missing/dir");
    }
}
