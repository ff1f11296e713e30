//! Storage Layer
//!
//! Platform directories, retention cleanup for batch uploads, and the
//! optional SQLite sink for scan outcomes.

pub mod database;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "mediscan", "MediScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "mediscan", "MediScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Delete files under `dir` older than `days`, returning how many were
/// removed. Failures are logged, never fatal.
pub fn cleanup_stale(dir: &Path, days: u32) -> usize {
    if !dir.is_dir() {
        warn!("cleanup skipped, not a directory: {dir:?}");
        return 0;
    }

    let threshold = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut deleted = 0;

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cleanup failed to read {dir:?}: {e}");
            return 0;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > threshold);

        if stale {
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("failed to remove stale file {path:?}: {e}"),
            }
        }
    }

    info!("removed {deleted} files older than {days} days from {dir:?}");
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_cleanup_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("fresh.jpg")).unwrap();

        let deleted = cleanup_stale(dir.path(), 7);
        assert_eq!(deleted, 0);
        assert!(dir.path().join("fresh.jpg").exists());
    }

    #[test]
    fn test_cleanup_zero_retention_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.jpg");
        File::create(&path).unwrap();

        // With a zero-day threshold any existing file is stale.
        std::thread::sleep(Duration::from_millis(50));
        let deleted = cleanup_stale(dir.path(), 0);
        assert_eq!(deleted, 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_missing_directory() {
        assert_eq!(cleanup_stale(Path::new("/nonexistent/uploads"), 7), 0);
    }
}
