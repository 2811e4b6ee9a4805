//! Content-addressed cache of optimized image bytes.
//!
//! Image optimization is the only expensive step that runs on every build,
//! so optimized outputs are stored on disk keyed by what produced them.
//!
//! ## Cache keys
//!
//! A key is the SHA-256 of the source bytes followed by a fingerprint of the
//! optimizer parameters (format, PNG level, JPEG quality). Paths never enter
//! the key: moving or renaming an image keeps its cache entry, and changing
//! a parameter re-optimizes every affected image.
//!
//! ## Storage
//!
//! One file per entry under `<cache>/images/<key>`. The cache lives outside
//! the output directory so the cleaner never wipes it. Entries are written
//! to a temporary name and renamed into place, so concurrent writers for the
//! same key race harmlessly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk store of optimized image bytes.
#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compute the cache key for `source` under the given parameter fingerprint.
    pub fn key(source: &[u8], params: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update(b"\0");
        hasher.update(params.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Stored bytes for `key`, if present.
    pub fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.dir.join(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store `bytes` under `key`.
    pub fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let temp = self.dir.join(format!(
            ".{}.{}.{}",
            key,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, bytes)?;
        fs::rename(&temp, self.dir.join(key))
    }
}
