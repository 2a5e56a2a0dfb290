//! Line provenance: which phase introduced each line of a tracked file.
//!
//! Provenance is rebuilt lazily whenever a file's modification stamp differs
//! from the one captured with its metadata. Lines matched by the diff keep
//! their recorded phase; inserted lines take the phase active at rebuild time.

pub mod diff;
pub mod reader;
pub mod store;

pub use diff::{AlignedPair, DiffEngine, DiffStats, LcsDiff};
pub use reader::{FileReader, FsReader, Newline, SourceText};
pub use store::{BLOB_VERSION, BlobDir, LineRecord, ProvenanceBlob};

use crate::error::{PspError, PspResult};
use crate::store::RecordStore;
use crate::types::{Phase, phase_label};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Carry phases across an edit: matched lines keep their phase, inserted
/// lines get `current`, deleted lines are dropped.
pub fn reconcile<D: DiffEngine + ?Sized>(
    diff: &D,
    old: &[LineRecord],
    new: &[String],
    current: Option<Phase>,
) -> Vec<LineRecord> {
    let old_text: Vec<String> = old.iter().map(|l| l.text.clone()).collect();
    let pairs = diff.align(&old_text, new);
    let stats = DiffStats::of(&pairs);
    debug!(
        matched = stats.matched,
        inserted = stats.inserted,
        deleted = stats.deleted,
        "reconciled line provenance"
    );
    pairs
        .into_iter()
        .filter_map(|pair| match pair {
            (Some(o), Some(n)) => Some(LineRecord::new(old[o].phase, new[n].clone())),
            (None, Some(n)) => Some(LineRecord::new(current, new[n].clone())),
            _ => None,
        })
        .collect()
}

struct CachedLines {
    mtime_ns: u64,
    lines: Vec<LineRecord>,
}

/// Per-file line→phase mapping, cached in memory and persisted per path.
pub struct LineProvenanceTracker<R, S, D> {
    reader: R,
    store: S,
    diff: D,
    cache: HashMap<PathBuf, CachedLines>,
}

impl<R, S, D> LineProvenanceTracker<R, S, D>
where
    R: FileReader,
    S: RecordStore<Key = PathBuf, Record = ProvenanceBlob>,
    D: DiffEngine,
{
    pub fn new(reader: R, store: S, diff: D) -> Self {
        Self {
            reader,
            store,
            diff,
            cache: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bring the provenance of `path` up to date and return it.
    pub fn lines(&mut self, path: &Path, current: Option<Phase>) -> PspResult<&[LineRecord]> {
        let path = absolute(path);
        let mtime = self.reader.modified(&path)?;
        let stale = self.cache.get(&path).is_none_or(|c| c.mtime_ns != mtime);
        if stale {
            let lines = self.load(&path, mtime, current)?;
            self.cache.insert(path.clone(), CachedLines { mtime_ns: mtime, lines });
        }
        Ok(self
            .cache
            .get(&path)
            .map(|c| c.lines.as_slice())
            .unwrap_or_default())
    }

    /// Rebuild the provenance of `path` if its content changed.
    pub fn refresh(&mut self, path: &Path, current: Option<Phase>) -> PspResult<()> {
        self.lines(path, current).map(|_| ())
    }

    /// Phase that introduced the 1-based line `lineno` of `path`.
    pub fn phase_at(
        &mut self,
        path: &Path,
        lineno: usize,
        current: Option<Phase>,
    ) -> PspResult<Option<Phase>> {
        let lines = self.lines(path, current)?;
        match lineno.checked_sub(1).and_then(|i| lines.get(i)) {
            Some(line) => Ok(line.phase),
            None => Err(PspError::LineOutOfRange {
                path: path.to_path_buf(),
                lineno,
                lines: lines.len(),
            }),
        }
    }

    /// Number of lines attributed to each phase.
    pub fn phase_counts(
        &mut self,
        path: &Path,
        current: Option<Phase>,
    ) -> PspResult<BTreeMap<Option<Phase>, usize>> {
        let mut counts = BTreeMap::new();
        for line in self.lines(path, current)? {
            *counts.entry(line.phase).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Paths with provenance, in memory or persisted.
    pub fn tracked_paths(&self) -> PspResult<Vec<PathBuf>> {
        let mut paths: BTreeSet<PathBuf> = self.cache.keys().cloned().collect();
        paths.extend(self.store.iterate()?.into_iter().map(|(path, _)| path));
        Ok(paths.into_iter().collect())
    }

    /// Refresh every tracked file, attributing pending edits to `current`.
    /// Files that can no longer be read are skipped.
    pub fn refresh_all(&mut self, current: Option<Phase>) -> PspResult<usize> {
        let mut refreshed = 0;
        for path in self.tracked_paths()? {
            match self.refresh(&path, current) {
                Ok(()) => refreshed += 1,
                Err(PspError::Storage(e)) => return Err(PspError::Storage(e)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping provenance refresh"),
            }
        }
        Ok(refreshed)
    }

    /// Drop the in-memory copy of `path`; the next lookup reloads it.
    pub fn invalidate(&mut self, path: &Path) {
        self.cache.remove(&absolute(path));
    }

    fn load(&mut self, path: &Path, mtime: u64, current: Option<Phase>) -> PspResult<Vec<LineRecord>> {
        let key = path.to_path_buf();
        let persisted = self.store.get(&key)?;
        if persisted.as_ref().is_some_and(|b| b.source_mtime_ns == mtime) {
            return Ok(persisted.map(|b| b.lines).unwrap_or_default());
        }

        let source = self.reader.read(path)?;
        let lines = match persisted {
            Some(blob) => reconcile(&self.diff, &blob.lines, &source.lines, current),
            None => source
                .lines
                .into_iter()
                .map(|text| LineRecord::new(current, text))
                .collect(),
        };
        debug!(
            path = %path.display(),
            lines = lines.len(),
            phase = phase_label(current),
            "line provenance rebuilt"
        );

        self.store
            .put(&key, &ProvenanceBlob::new(key.clone(), mtime, lines.clone()))?;
        self.store.sync()?;
        Ok(lines)
    }
}

/// Provenance as consumed by defect attribution and phase changes.
pub trait ProvenanceSource {
    /// Phase that introduced the 1-based line `lineno` of `path`.
    fn injection_phase(
        &mut self,
        path: &Path,
        lineno: usize,
        current: Option<Phase>,
    ) -> PspResult<Option<Phase>>;

    /// Attribute pending edits of every tracked file to `current`.
    fn refresh_tracked(&mut self, current: Option<Phase>) -> PspResult<usize>;
}

impl<R, S, D> ProvenanceSource for LineProvenanceTracker<R, S, D>
where
    R: FileReader,
    S: RecordStore<Key = PathBuf, Record = ProvenanceBlob>,
    D: DiffEngine,
{
    fn injection_phase(
        &mut self,
        path: &Path,
        lineno: usize,
        current: Option<Phase>,
    ) -> PspResult<Option<Phase>> {
        self.phase_at(path, lineno, current)
    }

    fn refresh_tracked(&mut self, current: Option<Phase>) -> PspResult<usize> {
        self.refresh_all(current)
    }
}

/// File-backed provenance with on-disk blobs.
pub type FileProvenance = LineProvenanceTracker<FsReader, BlobDir, LcsDiff>;

impl FileProvenance {
    pub fn open<P: AsRef<Path>>(metadata_dir: P) -> PspResult<Self> {
        Ok(Self::new(FsReader, BlobDir::open(metadata_dir)?, LcsDiff))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryReader;
    use super::*;
    use crate::store::testing::FailingStore;

    fn text(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reconcile_keeps_matched_phases() {
        let old = vec![
            LineRecord::new(Some(Phase::Design), "a"),
            LineRecord::new(Some(Phase::Code), "b"),
            LineRecord::new(Some(Phase::Code), "c"),
        ];
        let new = text(&["a", "x", "c"]);
        let lines = reconcile(&LcsDiff, &old, &new, Some(Phase::Review));
        assert_eq!(
            lines,
            vec![
                LineRecord::new(Some(Phase::Design), "a"),
                LineRecord::new(Some(Phase::Review), "x"),
                LineRecord::new(Some(Phase::Code), "c"),
            ]
        );
    }

    #[test]
    fn reconcile_from_empty_tags_everything() {
        let lines = reconcile(&LcsDiff, &[], &text(&["a", "b"]), Some(Phase::Code));
        assert!(lines.iter().all(|l| l.phase == Some(Phase::Code)));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn blob_write_failure_is_a_storage_error() {
        let reader = MemoryReader::default();
        reader.write("/work/a.py", &["x = 1"]);
        let mut tracker = LineProvenanceTracker::new(reader, FailingStore::<PathBuf, ProvenanceBlob>::broken(), LcsDiff);

        let err = tracker.phase_at(Path::new("/work/a.py"), 1, Some(Phase::Code)).unwrap_err();
        assert!(matches!(err, PspError::Storage(_)));
        assert!(tracker.tracked_paths().unwrap().is_empty());
    }

    #[test]
    fn refresh_all_propagates_storage_failures() {
        let reader = MemoryReader::default();
        reader.write("/work/a.py", &["x = 1"]);
        let store = FailingStore::<PathBuf, ProvenanceBlob>::new();
        let switch = store.switch();
        let mut tracker = LineProvenanceTracker::new(reader.clone(), store, LcsDiff);
        tracker.refresh(Path::new("/work/a.py"), Some(Phase::Code)).unwrap();
        assert_eq!(tracker.refresh_all(Some(Phase::Code)).unwrap(), 1);

        reader.write("/work/a.py", &["x = 1", "y = 2"]);
        switch.set(true);
        let err = tracker.refresh_all(Some(Phase::Test)).unwrap_err();
        assert!(matches!(err, PspError::Storage(_)));

        // Once storage recovers the edit is attributed normally.
        switch.set(false);
        assert_eq!(tracker.refresh_all(Some(Phase::Test)).unwrap(), 1);
        assert_eq!(
            tracker.phase_at(Path::new("/work/a.py"), 2, Some(Phase::Test)).unwrap(),
            Some(Phase::Test)
        );
    }
}
