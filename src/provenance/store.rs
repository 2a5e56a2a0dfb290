//! Versioned on-disk line-provenance blobs, one JSON file per tracked path.

use crate::store::RecordStore;
use crate::types::Phase;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current blob schema version. Blobs with any other version are ignored.
pub const BLOB_VERSION: u32 = 1;

/// Phase that introduced a line, with the line text at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub phase: Option<Phase>,
    pub text: String,
}

impl LineRecord {
    pub fn new(phase: Option<Phase>, text: impl Into<String>) -> Self {
        Self {
            phase,
            text: text.into(),
        }
    }
}

/// Persisted provenance of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceBlob {
    pub version: u32,
    pub path: PathBuf,
    pub source_mtime_ns: u64,
    pub lines: Vec<LineRecord>,
}

impl ProvenanceBlob {
    pub fn new(path: PathBuf, source_mtime_ns: u64, lines: Vec<LineRecord>) -> Self {
        Self {
            version: BLOB_VERSION,
            path,
            source_mtime_ns,
            lines,
        }
    }
}

#[derive(Deserialize)]
struct VersionTag {
    version: u32,
}

/// Stable blob file name for a tracked path: hex SHA-224 of the path.
pub fn blob_name(path: &Path) -> String {
    let digest = Sha224::digest(path.to_string_lossy().as_bytes());
    let mut name = String::with_capacity(digest.len() * 2 + 5);
    for b in digest {
        name.push_str(&format!("{:02x}", b));
    }
    name.push_str(".json");
    name
}

/// Directory of provenance blobs keyed by absolute file path.
///
/// Each `put` is written to a temporary file, fsync'ed and renamed into
/// place; `sync` makes the renames durable.
#[derive(Debug, Clone)]
pub struct BlobDir {
    dir: PathBuf,
}

impl BlobDir {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating metadata directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &Path) -> PathBuf {
        self.dir.join(blob_name(key))
    }

    /// Parse a blob file, treating unknown versions and corrupt files as absent.
    fn load(file: &Path) -> Result<Option<ProvenanceBlob>> {
        let data = match fs::read(file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading provenance blob {}", file.display()));
            }
        };
        match serde_json::from_slice::<VersionTag>(&data) {
            Ok(tag) if tag.version == BLOB_VERSION => {}
            Ok(tag) => {
                warn!(file = %file.display(), version = tag.version, "ignoring provenance blob with unknown version");
                return Ok(None);
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "ignoring unreadable provenance blob");
                return Ok(None);
            }
        }
        match serde_json::from_slice(&data) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) => {
                warn!(file = %file.display(), error = %e, "ignoring malformed provenance blob");
                Ok(None)
            }
        }
    }
}

impl RecordStore for BlobDir {
    type Key = PathBuf;
    type Record = ProvenanceBlob;

    fn get(&self, key: &PathBuf) -> Result<Option<ProvenanceBlob>> {
        Ok(Self::load(&self.blob_path(key))?.filter(|blob| blob.path == *key))
    }

    fn put(&mut self, key: &PathBuf, blob: &ProvenanceBlob) -> Result<()> {
        let path = self.blob_path(key);
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_vec(blob)?;

        let mut file = File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replacing provenance blob {}", path.display()))?;
        debug!(path = %key.display(), lines = blob.lines.len(), "provenance blob written");
        Ok(())
    }

    fn delete(&mut self, key: &PathBuf) -> Result<bool> {
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable blob, ordered by tracked path.
    fn iterate(&self) -> Result<Vec<(PathBuf, ProvenanceBlob)>> {
        let mut blobs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let file = entry?.path();
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(blob) = Self::load(&file)? {
                blobs.push((blob.path.clone(), blob));
            }
        }
        blobs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(blobs)
    }

    fn sync(&mut self) -> Result<()> {
        #[cfg(unix)]
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .with_context(|| format!("syncing metadata directory {}", self.dir.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(path: &str) -> ProvenanceBlob {
        ProvenanceBlob::new(
            PathBuf::from(path),
            42,
            vec![
                LineRecord::new(Some(Phase::Code), "x = 1"),
                LineRecord::new(None, ""),
            ],
        )
    }

    #[test]
    fn blob_names_are_stable_hex() {
        let name = blob_name(Path::new("/src/a.py"));
        assert_eq!(name, blob_name(Path::new("/src/a.py")));
        assert_ne!(name, blob_name(Path::new("/src/b.py")));
        // 28-byte digest as hex plus extension
        assert_eq!(name.len(), 56 + 5);
    }

    #[test]
    fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlobDir::open(dir.path().join("meta")).unwrap();
        let key = PathBuf::from("/src/a.py");

        assert!(store.get(&key).unwrap().is_none());
        store.put(&key, &blob("/src/a.py")).unwrap();
        store.sync().unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(blob("/src/a.py")));
        assert_eq!(store.iterate().unwrap().len(), 1);

        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn unknown_version_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlobDir::open(dir.path()).unwrap();
        let key = PathBuf::from("/src/a.py");
        let mut future = blob("/src/a.py");
        future.version = BLOB_VERSION + 1;
        store.put(&key, &future).unwrap();

        assert!(store.get(&key).unwrap().is_none());
        assert!(store.iterate().unwrap().is_empty());
    }

    #[test]
    fn corrupt_blob_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobDir::open(dir.path()).unwrap();
        let key = PathBuf::from("/src/a.py");
        fs::write(dir.path().join(blob_name(&key)), b"{not json").unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }
}
