//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Project-local configuration file.
pub const LOCAL_CONFIG_PATH: &str = ".psp/config.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding line-provenance blobs.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    /// Audit event log file.
    #[serde(default = "default_event_log")]
    pub event_log: PathBuf,

    /// Task the time and defect logs belong to.
    #[serde(default = "default_task")]
    pub task: String,

    /// Seconds without file activity before ticks count as off-task.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            metadata_dir: default_metadata_dir(),
            event_log: default_event_log(),
            task: default_task(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".psp/psp.db")
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from(".psp/metadata")
}

fn default_event_log() -> PathBuf {
    PathBuf::from(".psp/psp_event_log.txt")
}

fn default_task() -> String {
    "default".to_string()
}

fn default_idle_timeout() -> u64 {
    300 // 5 minutes
}

impl EngineConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from an explicit path, or the first of `./.psp/config.yaml` and
    /// `~/.psp/config.yaml` that exists, else defaults. Environment variables
    /// override whatever was loaded.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::candidate_paths()
                .into_iter()
                .find(|p| p.is_file())
                .map(|p| {
                    debug!(path = %p.display(), "loading config");
                    Self::load(p)
                })
                .transpose()?
                .unwrap_or_default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_PATH)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".psp").join("config.yaml"));
        }
        paths
    }

    /// Apply `PSP_*` overrides. Unparsable numbers are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("PSP_DB_PATH") {
            self.engine.db_path = PathBuf::from(db_path);
        }
        if let Some(dir) = lookup("PSP_METADATA_DIR") {
            self.engine.metadata_dir = PathBuf::from(dir);
        }
        if let Some(log) = lookup("PSP_EVENT_LOG") {
            self.engine.event_log = PathBuf::from(log);
        }
        if let Some(task) = lookup("PSP_TASK") {
            self.engine.task = task;
        }
        if let Some(timeout) = lookup("PSP_IDLE_TIMEOUT")
            && let Ok(timeout) = timeout.parse()
        {
            self.engine.idle_timeout_seconds = timeout;
        }
    }

    /// Ensure the database, event log and metadata directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for file in [&self.engine.db_path, &self.engine.event_log] {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(&self.engine.metadata_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str("engine:\n  task: kata\n").unwrap();
        assert_eq!(config.engine.task, "kata");
        assert_eq!(config.engine.db_path, PathBuf::from(".psp/psp.db"));
        assert_eq!(config.engine.idle_timeout_seconds, 300);
    }

    #[test]
    fn env_overrides_loaded_values() {
        let env: HashMap<&str, &str> = [
            ("PSP_TASK", "bowling"),
            ("PSP_IDLE_TIMEOUT", "60"),
            ("PSP_DB_PATH", "/tmp/psp.db"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.engine.task, "bowling");
        assert_eq!(config.engine.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.engine.db_path, PathBuf::from("/tmp/psp.db"));
    }

    #[test]
    fn bad_timeout_is_ignored() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "PSP_IDLE_TIMEOUT").then(|| "soon".to_string()));
        assert_eq!(config.engine.idle_timeout_seconds, 300);
    }

    #[test]
    fn explicit_path_must_exist() {
        assert!(Config::load_or_default(Some(Path::new("/nonexistent/psp.yaml"))).is_err());
    }

    #[test]
    fn ensure_dirs_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.engine.db_path = dir.path().join("a/psp.db");
        config.engine.event_log = dir.path().join("b/events.txt");
        config.engine.metadata_dir = dir.path().join("c/meta");
        config.ensure_dirs().unwrap();
        assert!(dir.path().join("a").is_dir());
        assert!(dir.path().join("b").is_dir());
        assert!(dir.path().join("c/meta").is_dir());
    }
}
