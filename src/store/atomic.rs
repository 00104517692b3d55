//! Atomic blob writes
//!
//! A blob is written to `<name>.tmp`, synced, then renamed over `<name>`.
//! Readers therefore see either the previous blob or the new one, never a
//! partially written file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix of in-flight writes
pub const TEMP_SUFFIX: &str = ".tmp";

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Atomically replace the file at `path` with `content`
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);

    let mut file = File::create(&temp)?;
    if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    drop(file);

    fs::rename(&temp, path)
}

/// Remove leftover temp files from interrupted writes
///
/// Returns the number of files removed.
pub fn cleanup_temp_files(dir: &Path) -> io::Result<usize> {
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let is_temp = entry
            .file_name()
            .to_str()
            .map(|name| name.ends_with(TEMP_SUFFIX))
            .unwrap_or(false);

        if is_temp && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
