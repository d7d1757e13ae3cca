//! Snapshot file holding the specs of every managed process.
//!
//! Only sanitized records are written, so no live state survives a restart.
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::debug;

use crate::{error::SnapshotError, process::ManagedProcess};

/// Distinguishes concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let sequence = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.tmp-{}-{sequence}", std::process::id()))
}

/// Writes `processes` to `path` as a YAML sequence, atomically.
///
/// The content goes to a temporary file in the same directory, is flushed to
/// disk and then renamed over `path`.
pub fn write_snapshot(path: &Path, processes: &[ManagedProcess]) -> Result<(), SnapshotError> {
    let sanitized: Vec<ManagedProcess> = processes.iter().map(ManagedProcess::sanitized).collect();
    let content = serde_yaml::to_string(&sanitized).map_err(SnapshotError::SerializeError)?;

    let write_error = |source: io::Error| SnapshotError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }

    let temp = temp_path(path);
    let written = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, path)
    })();

    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(write_error(err));
    }

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    debug!("Wrote {} record(s) to {path:?}", sanitized.len());
    Ok(())
}

/// Reads the records stored at `path`.
///
/// `Ok(None)` when the file does not exist. An empty or whitespace-only file
/// holds no records.
pub fn read_snapshot(path: &Path) -> Result<Option<Vec<ManagedProcess>>, SnapshotError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SnapshotError::ReadError {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        return Ok(Some(Vec::new()));
    }

    let records = serde_yaml::from_str(&content).map_err(|source| SnapshotError::ParseError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(records))
}
