use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Read and parse a JSON file. Missing or unparseable files yield `None`;
/// a corrupt record never takes the store down.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write a JSON file atomically: serialize to `<path>.tmp`, then rename.
/// A crash mid-write can only lose the record being written.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    write_json_atomic_mode(path, value, None)
}

/// Atomic JSON write with an explicit unix file mode (e.g. 0o600 for secrets).
pub fn write_json_atomic_mode<T: Serialize>(
    path: &Path,
    value: &T,
    mode: Option<u32>,
) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp, body)?;
    if let Some(mode) = mode {
        fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    }
    fs::rename(&tmp, path)
}

/// Write raw text atomically with an explicit mode (used for PEM key files).
pub fn write_text_atomic_mode(path: &Path, body: &str, mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, body)?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// List the `.json` files directly under a directory. Missing directories
/// are treated as empty.
pub fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect()
}

/// List subdirectory names of a directory (e.g. agent UUIDs under `agents/`).
pub fn list_subdirs(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
