//! Reading tracked source files as line sequences.

use crate::error::{PspError, PspResult};
use std::path::Path;
use std::time::UNIX_EPOCH;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newline {
    Lf,
    CrLf,
    Cr,
}

impl Newline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Newline::Lf => "\n",
            Newline::CrLf => "\r\n",
            Newline::Cr => "\r",
        }
    }

    /// The first line terminator found in `text`; `\n` when there is none.
    pub fn detect(text: &str) -> Self {
        match text.find(['\r', '\n']) {
            Some(i) if text[i..].starts_with("\r\n") => Newline::CrLf,
            Some(i) if text[i..].starts_with('\r') => Newline::Cr,
            _ => Newline::Lf,
        }
    }
}

/// Decoded content of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    /// Lines split on the detected newline. A trailing newline yields a final
    /// empty line, and an empty file has one empty line.
    pub lines: Vec<String>,
    pub encoding: &'static str,
    pub newline: Newline,
}

impl SourceText {
    pub fn decode(path: &Path, bytes: &[u8]) -> PspResult<Self> {
        let (encoding, body) = match bytes.strip_prefix(UTF8_BOM) {
            Some(rest) => ("utf-8-sig", rest),
            None => ("utf-8", bytes),
        };
        let text = std::str::from_utf8(body).map_err(|_| PspError::Undecodable {
            path: path.to_path_buf(),
        })?;
        let newline = Newline::detect(text);
        Ok(Self {
            lines: text.split(newline.as_str()).map(str::to_string).collect(),
            encoding,
            newline,
        })
    }
}

/// Source of file content and modification stamps.
pub trait FileReader {
    fn read(&self, path: &Path) -> PspResult<SourceText>;

    /// Modification time in nanoseconds since the Unix epoch.
    fn modified(&self, path: &Path) -> PspResult<u64>;
}

/// Reads files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl FileReader for FsReader {
    fn read(&self, path: &Path) -> PspResult<SourceText> {
        let bytes = std::fs::read(path).map_err(|source| PspError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        SourceText::decode(path, &bytes)
    }

    fn modified(&self, path: &Path) -> PspResult<u64> {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|source| PspError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_detected_newline() {
        let text = SourceText::decode(Path::new("a.py"), b"a\r\nb\r\n").unwrap();
        assert_eq!(text.newline, Newline::CrLf);
        assert_eq!(text.lines, vec!["a", "b", ""]);

        let text = SourceText::decode(Path::new("a.py"), b"a\rb").unwrap();
        assert_eq!(text.newline, Newline::Cr);
        assert_eq!(text.lines, vec!["a", "b"]);
    }

    #[test]
    fn empty_file_has_one_line() {
        let text = SourceText::decode(Path::new("a.py"), b"").unwrap();
        assert_eq!(text.lines, vec![""]);
        assert_eq!(text.newline, Newline::Lf);
    }

    #[test]
    fn bom_is_stripped() {
        let text = SourceText::decode(Path::new("a.py"), b"\xef\xbb\xbfx = 1\n").unwrap();
        assert_eq!(text.encoding, "utf-8-sig");
        assert_eq!(text.lines[0], "x = 1");
    }

    #[test]
    fn invalid_utf8_is_undecodable() {
        let err = SourceText::decode(Path::new("a.py"), b"\xff\xfe\x00").unwrap_err();
        assert!(matches!(err, PspError::Undecodable { .. }));
    }

    #[test]
    fn missing_file_is_read_failure() {
        let err = FsReader.read(Path::new("/nonexistent/psp/file.py")).unwrap_err();
        assert!(matches!(err, PspError::ReadFailed { .. }));
        assert!(FsReader.modified(Path::new("/nonexistent/psp/file.py")).is_err());
    }
}
