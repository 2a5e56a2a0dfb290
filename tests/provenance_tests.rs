//! Integration tests for file-backed line provenance.
//!
//! Files are rewritten with explicit modification times so that staleness
//! detection does not depend on filesystem timestamp granularity.

use psp_metrics::error::PspError;
use psp_metrics::provenance::FileProvenance;
use psp_metrics::store::RecordStore;
use psp_metrics::types::Phase;
use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Write `content` to `path` and stamp it with `secs` after the epoch.
fn write_at(path: &Path, content: &str, secs: u64) {
    std::fs::write(path, content).expect("write source");
    let file = File::options().write(true).open(path).expect("open source");
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .expect("set mtime");
}

fn setup() -> (TempDir, FileProvenance) {
    let dir = tempfile::tempdir().expect("tempdir");
    let provenance = FileProvenance::open(dir.path().join("metadata")).expect("open provenance");
    (dir, provenance)
}

fn phases(provenance: &mut FileProvenance, path: &Path, current: Option<Phase>) -> Vec<Option<Phase>> {
    provenance
        .lines(path, current)
        .expect("lines")
        .iter()
        .map(|l| l.phase)
        .collect()
}

#[test]
fn inserted_line_takes_the_current_phase() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("a.py");
    write_at(&path, "l1\nl2\nl3\nl4\nl5", 1_000);

    assert_eq!(phases(&mut provenance, &path, Some(Phase::Code)), vec![Some(Phase::Code); 5]);

    write_at(&path, "l1\nl2\nl3\nnew\nl4\nl5", 2_000);
    let after = phases(&mut provenance, &path, Some(Phase::Test));
    assert_eq!(after.len(), 6);
    assert_eq!(after[3], Some(Phase::Test));
    for (i, phase) in after.iter().enumerate().filter(|(i, _)| *i != 3) {
        assert_eq!(*phase, Some(Phase::Code), "line {} changed phase", i);
    }
}

#[test]
fn deleted_lines_are_dropped() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("b.py");
    write_at(&path, "a\nb\nc", 1_000);
    provenance.refresh(&path, Some(Phase::Design)).unwrap();

    write_at(&path, "a\nc", 2_000);
    let lines = provenance.lines(&path, Some(Phase::Code)).unwrap();
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["a", "c"]);
    assert!(lines.iter().all(|l| l.phase == Some(Phase::Design)));
}

#[test]
fn unchanged_file_is_not_reattributed() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("c.py");
    write_at(&path, "x\ny", 1_000);
    provenance.refresh(&path, Some(Phase::Code)).unwrap();

    // Same stamp: the later phase must not leak into existing lines.
    assert_eq!(phases(&mut provenance, &path, Some(Phase::Test)), vec![Some(Phase::Code); 2]);
}

#[test]
fn provenance_survives_a_new_tracker() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("d.py");
    write_at(&path, "one\ntwo", 1_000);
    provenance.refresh(&path, Some(Phase::Code)).unwrap();
    drop(provenance);

    let mut reopened = FileProvenance::open(dir.path().join("metadata")).unwrap();
    assert_eq!(reopened.store().iterate().unwrap().len(), 1);

    write_at(&path, "one\ntwo\nthree", 2_000);
    assert_eq!(
        phases(&mut reopened, &path, Some(Phase::Test)),
        vec![Some(Phase::Code), Some(Phase::Code), Some(Phase::Test)]
    );
}

#[test]
fn phase_at_is_one_based_and_bounded() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("e.py");
    write_at(&path, "a\nb\nc", 1_000);

    assert_eq!(provenance.phase_at(&path, 1, Some(Phase::Code)).unwrap(), Some(Phase::Code));
    assert!(matches!(
        provenance.phase_at(&path, 0, Some(Phase::Code)),
        Err(PspError::LineOutOfRange { lines: 3, .. })
    ));
    assert!(matches!(
        provenance.phase_at(&path, 4, Some(Phase::Code)),
        Err(PspError::LineOutOfRange { lineno: 4, .. })
    ));
}

#[test]
fn refresh_all_attributes_pending_edits() {
    let (dir, mut provenance) = setup();
    let first = dir.path().join("f.py");
    let second = dir.path().join("g.py");
    write_at(&first, "a", 1_000);
    write_at(&second, "b", 1_000);
    provenance.refresh(&first, Some(Phase::Code)).unwrap();
    provenance.refresh(&second, Some(Phase::Code)).unwrap();

    write_at(&first, "a\nfix", 2_000);
    std::fs::remove_file(&second).unwrap();

    // The vanished file is skipped, the edited one picks up the phase.
    assert_eq!(provenance.refresh_all(Some(Phase::Review)).unwrap(), 1);
    assert_eq!(
        provenance.phase_at(&first, 2, Some(Phase::Test)).unwrap(),
        Some(Phase::Review)
    );
}

#[test]
fn counts_group_lines_by_phase() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("h.py");
    write_at(&path, "a\nb", 1_000);
    provenance.refresh(&path, Some(Phase::Code)).unwrap();
    write_at(&path, "a\nb\nc", 2_000);

    let counts = provenance.phase_counts(&path, Some(Phase::Test)).unwrap();
    assert_eq!(counts.get(&Some(Phase::Code)), Some(&2));
    assert_eq!(counts.get(&Some(Phase::Test)), Some(&1));
}

#[test]
fn undecodable_file_is_an_error() {
    let (dir, mut provenance) = setup();
    let path = dir.path().join("blob.bin");
    std::fs::write(&path, [0xff, 0xfe, 0x00, 0xc3]).unwrap();
    assert!(matches!(
        provenance.lines(&path, Some(Phase::Code)),
        Err(PspError::Undecodable { .. })
    ));
}
