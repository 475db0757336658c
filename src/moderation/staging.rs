//! Photo Staging
//!
//! Fetched photo bytes are parked in a scratch file while the moderation
//! gate looks at them, then removed on drop no matter how moderation ends.
//! The file name mixes a SHA-256 of the opaque photo reference with a
//! process-unique sequence number: wire-supplied strings never reach the
//! filesystem verbatim, and two concurrent stagings of the same reference
//! never share a file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A staged photo on disk. Removing it is the owner's drop, not a separate
/// cleanup pass.
#[derive(Debug)]
pub struct StagedImage {
    path: PathBuf,
    size: u64,
}

impl StagedImage {
    /// Writes `bytes` to a scratch file named after `photo_ref`'s digest
    /// plus a fresh sequence number. Every staging owns its own file, so
    /// one review's cleanup can never pull the file out from under another.
    pub fn stage(photo_ref: &str, bytes: &[u8]) -> io::Result<Self> {
        let digest = Sha256::digest(photo_ref.as_bytes());
        let seq = STAGE_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "throne-stage-{}-{}-{seq}.img",
            std::process::id(),
            hex::encode(&digest[..16])
        );
        let path = std::env::temp_dir().join(name);

        fs::write(&path, bytes)?;
        Ok(Self {
            path,
            size: bytes.len() as u64,
        })
    }

    /// Where the bytes sit.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staged size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "staged photo already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_writes_and_drop_removes() {
        let path = {
            let staged = StagedImage::stage("file-ref-1", b"jpeg bytes").unwrap();
            assert_eq!(staged.size(), 10);
            assert_eq!(fs::read(staged.path()).unwrap(), b"jpeg bytes");
            staged.path().to_path_buf()
        };

        assert!(!path.exists());
    }

    #[test]
    fn test_same_ref_stages_independently() {
        let first = StagedImage::stage("file-ref-2", b"aa").unwrap();
        let second = StagedImage::stage("file-ref-2", b"bbbb").unwrap();
        assert_ne!(first.path(), second.path());

        // One review's cleanup leaves the other staging untouched
        drop(first);
        assert_eq!(fs::read(second.path()).unwrap(), b"bbbb");
        assert_eq!(second.size(), 4);
    }

    #[test]
    fn test_ref_never_appears_in_path() {
        let hostile = "../../etc/passwd";
        let staged = StagedImage::stage(hostile, b"x").unwrap();
        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.contains(".."));
        assert!(name.starts_with("throne-stage-"));
    }
}
