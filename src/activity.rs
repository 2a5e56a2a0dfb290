//! Activity probes decide whether a tick counts as on-task or off-task time.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

pub trait ActivityProbe {
    fn is_active(&self) -> bool;
}

/// Probe for hosts without an activity signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysActive;

impl ActivityProbe for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}

impl<F: Fn() -> bool> ActivityProbe for F {
    fn is_active(&self) -> bool {
        self()
    }
}

/// Reports activity while any watched file was modified within the idle
/// window. With nothing to watch, the host is always considered active.
#[derive(Debug, Clone)]
pub struct FileActivityProbe {
    paths: Vec<PathBuf>,
    idle_after: Duration,
}

impl FileActivityProbe {
    pub fn new(paths: Vec<PathBuf>, idle_after: Duration) -> Self {
        Self { paths, idle_after }
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.paths
            .iter()
            .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
            .max()
    }
}

impl ActivityProbe for FileActivityProbe {
    fn is_active(&self) -> bool {
        if self.paths.is_empty() {
            return true;
        }
        match self.last_modified() {
            Some(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|idle| idle <= self.idle_after)
                // Modified "in the future" (clock skew) counts as fresh.
                .unwrap_or(true),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn closures_are_probes() {
        let active = Cell::new(false);
        let probe = || active.get();
        assert!(!probe.is_active());
        active.set(true);
        assert!(probe.is_active());
    }

    #[test]
    fn file_probe_goes_idle_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.py");
        std::fs::write(&path, "print('hi')\n").unwrap();

        let probe = FileActivityProbe::new(vec![path.clone()], Duration::from_secs(60));
        assert!(probe.is_active());

        let stale = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stale)
            .unwrap();
        assert!(!probe.is_active());
    }

    #[test]
    fn missing_files_are_inactive() {
        let probe = FileActivityProbe::new(vec![PathBuf::from("/nonexistent/x")], Duration::from_secs(1));
        assert!(!probe.is_active());
        assert!(FileActivityProbe::new(vec![], Duration::from_secs(1)).is_active());
    }
}
