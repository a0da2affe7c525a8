//! Flat `name=value` property files.
//!
//! Each channel directory holds one. The whole file is rewritten on every
//! change: write `props.tmp`, sync it, rename it over the original, then
//! sync the directory so the rename itself survives a crash. Readers
//! therefore only ever see a complete file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::PropsError;

const TMP_EXTENSION: &str = "tmp";

/// A property file cached in memory.
#[derive(Debug)]
pub struct PropsFile {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl PropsFile {
    /// Open a property file. A missing file is an empty property set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PropsError> {
        let path = path.into();
        let entries = match File::open(&path) {
            Ok(file) => read_entries(BufReader::new(file), &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(PropsError::Read { path, source }),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Return the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a property.
    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    /// Set a property and persist the file.
    pub fn put(&self, name: &str, value: &str) -> Result<(), PropsError> {
        self.put_all(&[(name, value)])
    }

    /// Set several properties with a single file replacement.
    pub fn put_all(&self, props: &[(&str, &str)]) -> Result<(), PropsError> {
        for (name, value) in props {
            validate(name, value)?;
        }
        let mut entries = self.lock();
        let mut updated = entries.clone();
        for (name, value) in props {
            updated.insert((*name).to_string(), (*value).to_string());
        }
        write_atomic(&self.path, &updated)?;
        *entries = updated;
        Ok(())
    }

    /// Remove a property and persist the file. Returns the old value.
    pub fn remove(&self, name: &str) -> Result<Option<String>, PropsError> {
        let mut entries = self.lock();
        if !entries.contains_key(name) {
            return Ok(None);
        }
        let mut updated = entries.clone();
        let old = updated.remove(name);
        write_atomic(&self.path, &updated)?;
        *entries = updated;
        Ok(old)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still consistent: it is only replaced whole.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate(name: &str, value: &str) -> Result<(), PropsError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('=') {
        "name contains '='"
    } else if name.contains(['\n', '\r']) {
        "name contains a line break"
    } else if value.contains(['\n', '\r']) {
        "value contains a line break"
    } else {
        return Ok(());
    };
    Err(PropsError::InvalidEntry {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Parse `name=value` lines. Lines without `=` are ignored.
fn read_entries(reader: impl BufRead, path: &Path) -> Result<BTreeMap<String, String>, PropsError> {
    let mut entries = BTreeMap::new();
    for line in reader.lines() {
        let line = line.map_err(|source| PropsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some((name, value)) = line.split_once('=') {
            entries.insert(name.to_string(), value.to_string());
        }
    }
    Ok(entries)
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), PropsError> {
    let write_err = |source| PropsError::Write {
        path: path.to_path_buf(),
        source,
    };
    let tmp_path = path.with_extension(TMP_EXTENSION);
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(write_err)?;
        let mut buf = String::new();
        for (name, value) in entries {
            buf.push_str(name);
            buf.push('=');
            buf.push_str(value);
            buf.push('\n');
        }
        tmp.write_all(buf.as_bytes()).map_err(write_err)?;
        tmp.sync_all().map_err(write_err)?;
    }
    fs::rename(&tmp_path, path).map_err(write_err)?;
    sync_parent(path).map_err(write_err)
}

/// Flush the directory entry of `path` to disk.
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let props = PropsFile::open(dir.path().join("props")).unwrap();
        assert_eq!(props.get("fetchslot"), None);
        assert!(!props.path().exists(), "open must not create the file");
    }

    #[test]
    fn test_put_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        let props = PropsFile::open(&path).unwrap();
        props.put("fetchslot", "AAAA,BBBB").unwrap();
        props.put("isInitiator", "true").unwrap();

        let reloaded = PropsFile::open(&path).unwrap();
        assert_eq!(reloaded.get("fetchslot").as_deref(), Some("AAAA,BBBB"));
        assert_eq!(reloaded.get("isInitiator").as_deref(), Some("true"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_sync_parent_flushes_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        fs::write(&path, "a=b\n").unwrap();
        sync_parent(&path).unwrap();

        let gone = dir.path().join("missing").join("props");
        assert!(sync_parent(&gone).is_err());
    }

    #[test]
    fn test_write_fails_when_directory_is_gone() {
        let dir = TempDir::new().unwrap();
        let channel_dir = dir.path().join("bob");
        fs::create_dir(&channel_dir).unwrap();
        let props = PropsFile::open(channel_dir.join("props")).unwrap();
        fs::remove_dir(&channel_dir).unwrap();

        assert!(matches!(
            props.put("fetchslot", "AAAA"),
            Err(PropsError::Write { .. })
        ));
        assert_eq!(props.get("fetchslot"), None);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        let props = PropsFile::open(&path).unwrap();
        props.put("fetchslot", "AAAA=1700000000000,BBBB").unwrap();
        let reloaded = PropsFile::open(&path).unwrap();
        assert_eq!(
            reloaded.get("fetchslot").as_deref(),
            Some("AAAA=1700000000000,BBBB")
        );
    }

    #[test]
    fn test_put_all_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        let props = PropsFile::open(&path).unwrap();
        props
            .put_all(&[("privatekey", "SSK@priv/"), ("publickey", "SSK@pub/")])
            .unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "privatekey=SSK@priv/\npublickey=SSK@pub/\n");
    }

    #[test]
    fn test_rejects_line_breaks() {
        let dir = TempDir::new().unwrap();
        let props = PropsFile::open(dir.path().join("props")).unwrap();
        let err = props.put("ackssk", "a\nb").unwrap_err();
        assert!(matches!(err, PropsError::InvalidEntry { .. }));
        assert!(props.put("a=b", "c").is_err());
        assert_eq!(props.get("ackssk"), None);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        let props = PropsFile::open(&path).unwrap();
        props.put("ackssk", "SSK@ack/").unwrap();
        assert_eq!(props.remove("ackssk").unwrap().as_deref(), Some("SSK@ack/"));
        assert_eq!(props.remove("ackssk").unwrap(), None);
        assert_eq!(PropsFile::open(&path).unwrap().get("ackssk"), None);
    }

    #[test]
    fn test_ignores_junk_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        fs::write(&path, "# comment\n\nfetchslot=AAAA\ngarbage\n").unwrap();
        let props = PropsFile::open(&path).unwrap();
        assert_eq!(props.get("fetchslot").as_deref(), Some("AAAA"));
        assert_eq!(props.get("garbage"), None);
    }
}
