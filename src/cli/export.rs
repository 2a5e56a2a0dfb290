//! Snapshot subcommand arguments.

use clap::Args;
use std::path::{Path, PathBuf};

const SIZE_UNITS: [(&str, u64); 4] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)];

/// Why a snapshot is (or is not) written gzip-compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Requested,
    Extension,
    OverThreshold,
    Plain,
}

impl Compression {
    pub fn is_gzip(&self) -> bool {
        *self != Compression::Plain
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Gzip the snapshot (implied by a .gz output file)
    #[arg(long)]
    pub gzip: bool,

    /// Gzip when the JSON is larger than this, e.g. 512KB or 2MB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub compress_threshold: Option<u64>,
}

impl ExportArgs {
    /// Decide compression for a snapshot of `json_len` bytes.
    pub fn compression(&self, json_len: u64) -> Compression {
        if self.gzip {
            Compression::Requested
        } else if self.output.as_deref().is_some_and(has_gz_extension) {
            Compression::Extension
        } else if self.compress_threshold.is_some_and(|limit| json_len > limit) {
            Compression::OverThreshold
        } else {
            Compression::Plain
        }
    }
}

fn has_gz_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Parse `1024`, `100B`, `64kb`, `2 MB`... into bytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let upper = s.trim().to_ascii_uppercase();
    let (number, factor) = SIZE_UNITS
        .iter()
        .find_map(|(suffix, factor)| upper.strip_suffix(suffix).map(|n| (n, *factor)))
        .unwrap_or((upper.as_str(), 1));
    number
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(factor))
        .ok_or_else(|| format!("invalid size {:?}", s))
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Snapshot file to import (plain JSON or gzip)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Delete the task's existing defects before importing
    #[arg(long)]
    pub replace: bool,

    /// Also restore the snapshot's current phase
    #[arg(long)]
    pub with_phase: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(output: Option<&str>, gzip: bool, threshold: Option<u64>) -> ExportArgs {
        ExportArgs {
            output: output.map(PathBuf::from),
            gzip,
            compress_threshold: threshold,
        }
    }

    #[test]
    fn sizes_accept_units_in_any_case() {
        assert_eq!(parse_size("100"), Ok(100));
        assert_eq!(parse_size("100B"), Ok(100));
        assert_eq!(parse_size("64kb"), Ok(64 * 1024));
        assert_eq!(parse_size("2 MB"), Ok(2 * 1024 * 1024));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn compression_reasons() {
        assert_eq!(args(None, true, None).compression(0), Compression::Requested);
        assert_eq!(
            args(Some("kata.json.GZ"), false, None).compression(0),
            Compression::Extension
        );
        assert_eq!(args(Some("kata.json"), false, None).compression(10), Compression::Plain);

        let limited = args(None, false, Some(1024));
        assert!(!limited.compression(1024).is_gzip());
        assert_eq!(limited.compression(1025), Compression::OverThreshold);
    }
}
