//! Request-scoped scratch storage
//!
//! Everything staged here lives in one temporary directory that is removed
//! when the [`ScratchSpace`] drops.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Temporary directory owned by one request
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("woom-").tempdir()?;
        debug!(path = %dir.path().display(), "Created scratch space");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy a byte stream into the scratch space as `name`
    ///
    /// Only the final component of `name` is used, so callers cannot
    /// escape the directory.
    pub fn stage_reader<R: Read>(&self, name: &str, mut reader: R) -> io::Result<PathBuf> {
        let path = self.dir.path().join(sanitize_name(name));
        let mut file = File::create(&path)?;
        let written = io::copy(&mut reader, &mut file)?;
        file.flush()?;
        debug!(path = %path.display(), bytes = written, "Staged input");
        Ok(path)
    }

    pub fn stage_bytes(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        self.stage_reader(name, bytes)
    }
}

fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_cleanup() {
        let scratch = ScratchSpace::new().unwrap();
        let root = scratch.path().to_path_buf();
        let path = scratch.stage_bytes("clip.wav", b"RIFF").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
        assert!(path.starts_with(&root));

        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn test_names_stay_inside() {
        let scratch = ScratchSpace::new().unwrap();
        let path = scratch
            .stage_reader("../../etc/passwd", io::Cursor::new(vec![1u8, 2, 3]))
            .unwrap();
        assert_eq!(path, scratch.path().join("passwd"));

        let fallback = scratch.stage_bytes("..", b"x").unwrap();
        assert_eq!(fallback, scratch.path().join("upload"));
    }
}
