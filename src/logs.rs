//! Output capture for spawned processes.
use std::{
    fs::{self, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    thread,
};

use tracing::{debug, warn};

use crate::process::ProcessKey;

/// `<dir>/<namespace>_<name>.<stream>.log`
pub fn resolve_log_path(dir: &Path, key: &ProcessKey, stream: &str) -> PathBuf {
    dir.join(format!("{}_{}.{stream}.log", key.namespace, key.name))
}

/// Appends every line read from `source` to the log file for `key` and `stream`.
///
/// The writer thread ends when the process closes the stream.
pub fn spawn_log_writer<R>(
    dir: &Path,
    key: &ProcessKey,
    source: R,
    stream: &'static str,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    fs::create_dir_all(dir)?;
    let path = resolve_log_path(dir, key, stream);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let key = key.clone();

    Ok(thread::spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    debug!("Stopped reading {stream} of '{key}': {err}");
                    break;
                }
            };
            if let Err(err) = writeln!(file, "{line}") {
                warn!("Failed to write {stream} of '{key}' to {path:?}: {err}");
                break;
            }
        }
    }))
}
