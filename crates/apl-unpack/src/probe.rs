//! Format probe: bounded, memoized inspection of a path.
//!
//! The magic prefix is read at most once per [`ArchivePath`] and never more
//! than [`MAGIC_LEN`] bytes. Directories never touch the disk for magic
//! checks.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::bytes::Regex;

/// Longest signature window: the ustar marker sits at offset 257.
pub const MAGIC_LEN: usize = 262;

/// Immutable handle to an input path with a lazily cached magic prefix.
#[derive(Debug)]
pub struct ArchivePath {
    path: PathBuf,
    is_dir: OnceLock<bool>,
    magic: OnceLock<Vec<u8>>,
}

impl ArchivePath {
    /// Wrap `path`. Nothing is read until a check needs it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_dir: OnceLock::new(),
            magic: OnceLock::new(),
        }
    }

    /// The wrapped path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the path is a directory (follows symlinks, cached).
    pub fn is_dir(&self) -> bool {
        *self.is_dir.get_or_init(|| self.path.is_dir())
    }

    /// Final path component as a string, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Last extension including the dot (`.gz` for `foo.tar.gz`), or empty.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }

    /// Everything from the first dot of the file name (`.tar.gz`), or empty.
    ///
    /// A leading dot (hidden file) does not start an extension.
    pub fn full_extension(&self) -> String {
        let Some(name) = self.file_name() else {
            return String::new();
        };
        let stem_start = usize::from(name.starts_with('.'));
        name[stem_start..]
            .find('.')
            .map(|idx| name[stem_start + idx..].to_string())
            .unwrap_or_default()
    }

    /// Case-insensitive check of the file name's suffix against `pattern`.
    pub fn extension_matches(&self, pattern: &str) -> bool {
        self.file_name().is_some_and(|name| {
            name.to_ascii_lowercase()
                .ends_with(&pattern.to_ascii_lowercase())
        })
    }

    /// The cached magic prefix (empty for directories and unreadable files).
    pub fn magic_number(&self) -> &[u8] {
        self.magic.get_or_init(|| {
            if self.is_dir() {
                return Vec::new();
            }
            read_prefix(&self.path).unwrap_or_default()
        })
    }

    /// Match the magic prefix against a byte regex (anchor it with `\A`).
    pub fn magic_number_matches(&self, pattern: &Regex) -> bool {
        !self.is_dir() && pattern.is_match(self.magic_number())
    }

    /// Whether the magic prefix starts with `signature`.
    pub fn magic_number_starts_with(&self, signature: &[u8]) -> bool {
        self.magic_number_at(0, signature)
    }

    /// Whether `signature` appears at `offset` within the magic prefix.
    pub fn magic_number_at(&self, offset: usize, signature: &[u8]) -> bool {
        if self.is_dir() {
            return false;
        }
        self.magic_number()
            .get(offset..offset + signature.len())
            .is_some_and(|window| window == signature)
    }
}

fn read_prefix(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(MAGIC_LEN);
    file.take(MAGIC_LEN as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_magic_prefix_is_bounded() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big.bin");
        std::fs::write(&file, vec![0xABu8; 4096]).unwrap();

        let probe = ArchivePath::new(&file);
        assert_eq!(probe.magic_number().len(), MAGIC_LEN);
    }

    #[test]
    fn test_magic_read_is_memoized() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.gz");
        std::fs::write(&file, [0x1F, 0x8B, 0x08]).unwrap();

        let probe = ArchivePath::new(&file);
        assert!(probe.magic_number_starts_with(&[0x1F, 0x8B]));

        // Rewriting the file must not change what the probe already saw.
        std::fs::write(&file, b"PK\x03\x04").unwrap();
        assert!(probe.magic_number_starts_with(&[0x1F, 0x8B]));
        assert!(!probe.magic_number_starts_with(b"PK"));
    }

    #[test]
    fn test_directory_never_matches_magic() {
        let dir = tempdir().unwrap();
        let probe = ArchivePath::new(dir.path());
        assert!(probe.is_dir());
        assert!(!probe.magic_number_starts_with(b""));
        assert!(!probe.magic_number_matches(&Regex::new(r"\A").unwrap()));
        assert!(probe.magic_number().is_empty());
    }

    #[test]
    fn test_magic_regex_and_offset() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.tar");
        let mut header = vec![0u8; 512];
        header[257..262].copy_from_slice(b"ustar");
        std::fs::write(&file, &header).unwrap();

        let probe = ArchivePath::new(&file);
        assert!(probe.magic_number_at(257, b"ustar"));
        assert!(probe.magic_number_matches(&Regex::new(r"(?s-u)\A.{257}ustar").unwrap()));
        assert!(!probe.magic_number_at(300, b"ustar"));
    }

    #[test]
    fn test_missing_file_has_empty_magic() {
        let probe = ArchivePath::new("/nonexistent/definitely/missing.zip");
        assert!(probe.magic_number().is_empty());
        assert!(!probe.magic_number_starts_with(b"PK"));
    }

    #[test]
    fn test_extensions() {
        let probe = ArchivePath::new("/downloads/tool-1.2.tar.GZ");
        assert_eq!(probe.extension(), ".GZ");
        assert_eq!(probe.full_extension(), ".2.tar.GZ");
        assert!(probe.extension_matches(".tar.gz"));
        assert!(!probe.extension_matches(".zip"));

        let hidden = ArchivePath::new("/x/.hidden");
        assert_eq!(hidden.extension(), "");
        assert_eq!(hidden.full_extension(), "");

        let bare = ArchivePath::new("/x/README");
        assert_eq!(bare.extension(), "");
    }
}
