//! Stage-then-publish helpers for directory-shaped outputs.
//!
//! Writers fill a fresh hidden sibling directory and only rename it over the
//! destination once every file is complete, so readers never observe a mix of
//! two runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use mfq_common::{MfqError, Result};

/// Hidden sibling of `path` unique to this call, e.g. `.mfq_staged_by_map_<nanos>.tmp`.
pub fn temp_sibling_path(path: &Path, label: &str) -> PathBuf {
    let parent = path
        .parent()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("target");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    parent.join(format!(".mfq_{label}_{stem}_{nanos}.tmp"))
}

/// Create a fresh staging directory next to `target`.
pub fn create_staging_dir(target: &Path) -> Result<PathBuf> {
    let staged = temp_sibling_path(target, "staged");
    fs::create_dir_all(&staged)?;
    Ok(staged)
}

/// Replace `target` with the fully written `staged` directory.
///
/// Previous content is moved aside first and restored if the final rename fails.
pub fn replace_dir_atomically(staged: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if !target.exists() {
        fs::rename(staged, target).map_err(|e| {
            MfqError::Execution(format!(
                "directory publish failed: {} -> {} ({e})",
                staged.display(),
                target.display()
            ))
        })?;
        return Ok(());
    }

    let backup = temp_sibling_path(target, "backup");
    fs::rename(target, &backup).map_err(|e| {
        MfqError::Execution(format!(
            "directory backup rename failed: {} -> {} ({e})",
            target.display(),
            backup.display()
        ))
    })?;

    match fs::rename(staged, target) {
        Ok(_) => {
            let _ = fs::remove_dir_all(backup);
            Ok(())
        }
        Err(e) => {
            let _ = fs::rename(&backup, target);
            Err(MfqError::Execution(format!(
                "directory publish failed: {} -> {} ({e})",
                staged.display(),
                target.display()
            )))
        }
    }
}

/// Best-effort cleanup of an abandoned staging directory.
pub fn discard_staging_dir(staged: &Path) {
    let _ = fs::remove_dir_all(staged);
}
