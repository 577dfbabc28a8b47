//! Flat-file persistence for the configuration store
//!
//! On disk the tree is one sorted line per leaf, `path = <json value>`, so
//! diffs between saves stay readable. Saves rotate numbered backups, take an
//! advisory lock on a sidecar file, and go through a temp file plus rename so
//! a crash never leaves a half-written configuration behind.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{DroverResult, StoreError};
use crate::store::tree::{PropertyPath, PropertyValue};

/// How many numbered backups a save keeps around
pub const BACKUP_KEEP: usize = 5;

/// Advisory lock held for the duration of a load or save
///
/// The lock lives on a `<file>.lock` sidecar so rotation can rename the real
/// file freely. Released on drop.
pub struct StoreLock {
    _file: File,
}

impl StoreLock {
    pub fn acquire(config_path: &Path) -> DroverResult<StoreLock> {
        let lock_path = sidecar_lock_path(config_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| StoreError::Locked {
            file: config_path.to_path_buf(),
        })?;
        Ok(StoreLock { _file: file })
    }
}

fn sidecar_lock_path(config_path: &Path) -> PathBuf {
    let mut name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drover.cfg".to_string());
    name.push_str(".lock");
    config_path.with_file_name(name)
}

/// Render a tree as sorted `path = value` lines
pub fn to_flat_string(tree: &PropertyValue) -> String {
    let mut out = String::new();
    for (path, leaf) in tree.leaves() {
        let value = match leaf {
            PropertyValue::Text(s) => serde_json::to_string(s),
            PropertyValue::List(items) => serde_json::to_string(items),
            PropertyValue::Tree(_) => continue,
        };
        // serde_json cannot fail on strings and string lists
        if let Ok(value) = value {
            out.push_str(&format!("{path} = {value}\n"));
        }
    }
    out
}

/// Content fingerprint of a tree's flat form
pub fn fingerprint(tree: &PropertyValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_flat_string(tree).as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Parse flat `path = value` content back into a tree
///
/// Comment lines (`#`) and blank lines are skipped. Every malformed line is
/// an error with its line number; nothing is silently dropped.
pub fn parse_flat(content: &str, file: &Path) -> DroverResult<PropertyValue> {
    let mut root = PropertyValue::tree();
    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| StoreError::MalformedLine {
            file: file.to_path_buf(),
            line: idx + 1,
            message: "missing '=' separator".to_string(),
        })?;
        let path = PropertyPath::parse(key.trim()).map_err(|e| StoreError::MalformedLine {
            file: file.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        let parsed: serde_json::Value =
            serde_json::from_str(value.trim()).map_err(|e| StoreError::MalformedLine {
                file: file.to_path_buf(),
                line: idx + 1,
                message: e.to_string(),
            })?;
        let leaf = match parsed {
            serde_json::Value::String(s) => PropertyValue::Text(s),
            serde_json::Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        serde_json::Value::String(s) => list.push(s),
                        other => {
                            return Err(StoreError::MalformedLine {
                                file: file.to_path_buf(),
                                line: idx + 1,
                                message: format!("list item is not a string: {other}"),
                            }
                            .into());
                        }
                    }
                }
                PropertyValue::List(list)
            }
            other => {
                return Err(StoreError::MalformedLine {
                    file: file.to_path_buf(),
                    line: idx + 1,
                    message: format!("value is not a string or string list: {other}"),
                }
                .into());
            }
        };
        root.set(&path, leaf)?;
    }
    Ok(root)
}

/// Load a tree from `path`; a missing file is an empty tree
pub fn load_tree(path: &Path) -> DroverResult<PropertyValue> {
    if !path.exists() {
        return Ok(PropertyValue::tree());
    }
    let _lock = StoreLock::acquire(path)?;
    let content = fs::read_to_string(path)?;
    parse_flat(&content, path)
}

/// Save a tree to `path` with backup rotation and an atomic replace
pub fn save_tree(tree: &PropertyValue, path: &Path, keep: usize) -> DroverResult<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }
    let _lock = StoreLock::acquire(path)?;
    rotate_backups(path, keep)?;

    let body = to_flat_string(tree);
    let header = format!(
        "# drover cluster configuration\n# modified: {}\n",
        chrono::Utc::now().to_rfc3339()
    );

    let dir = parent.unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(header.as_bytes())?;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Shift `path` into `path.1`, pushing older backups up to `path.<keep>`
///
/// The oldest backup falls off the end; no more than `keep` are retained.
fn rotate_backups(path: &Path, keep: usize) -> DroverResult<()> {
    if keep == 0 || !path.exists() {
        return Ok(());
    }
    for i in (1..keep).rev() {
        let from = numbered(path, i);
        if from.exists() {
            fs::rename(&from, numbered(path, i + 1))?;
        }
    }
    fs::rename(path, numbered(path, 1))?;
    Ok(())
}

fn numbered(path: &Path, n: usize) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".{n}"));
    path.with_file_name(name)
}
