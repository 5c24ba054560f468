use crate::errors::TapedeckError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Deletes the oldest files belonging to the run log at `log_path` until
/// their combined size fits in `budget_bytes`.
///
/// A file belongs to the run log when it sits in the same folder, has the same
/// extension, and its stem is the log's stem or the stem followed by `.` or `-`
/// (`run.jsonl`, `run.1.jsonl`, `run-2026.jsonl`). Tapes sharing the folder
/// and extension are left alone.
pub fn prune_run_logs(log_path: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, TapedeckError> {
    let (Some(dir), Some(stem), Some(ext)) = (
        log_path.parent(),
        log_path.file_stem().and_then(|s| s.to_str()),
        log_path.extension(),
    ) else {
        return Ok(Vec::new());
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let mut files: Vec<(PathBuf, u64, Option<SystemTime>)> = fs::read_dir(dir)
        .map_err(|e| TapedeckError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension() == Some(ext))
        .filter(|path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|candidate| belongs_to(candidate, stem))
        })
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            Some((path, meta.len(), meta.modified().ok()))
        })
        .collect();
    files.sort_by(|a, b| a.2.cmp(&b.2));

    let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
    let mut deleted = Vec::new();
    for (path, len, _) in files {
        if total <= budget_bytes {
            break;
        }
        fs::remove_file(&path).map_err(|e| TapedeckError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}

fn belongs_to(candidate: &str, stem: &str) -> bool {
    match candidate.strip_prefix(stem) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') || rest.starts_with('-'),
        None => false,
    }
}
