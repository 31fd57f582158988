//! Persistence of the consuming repository's manifest.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::domain::{Manifest, RollResult};

/// SHA-256 hex digest of raw manifest bytes.
pub fn manifest_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Read/write access to one manifest.
///
/// `read_raw`/`write_raw` work on exact bytes so that a restore is
/// bit-for-bit; `load`/`store` go through the JSON encoding.
pub trait ManifestStore: Send + Sync {
    fn read_raw(&self) -> RollResult<Vec<u8>>;

    fn write_raw(&self, bytes: &[u8]) -> RollResult<()>;

    fn load(&self) -> RollResult<Manifest> {
        Ok(Manifest::from_json(&self.read_raw()?)?)
    }

    fn store(&self, manifest: &Manifest) -> RollResult<()> {
        self.write_raw(manifest.to_json_pretty()?.as_bytes())
    }
}

/// Manifest stored as a JSON file on disk.
///
/// Writes go to a temp file in the same directory which is then renamed
/// over the target, so readers never observe a partial manifest.
#[derive(Debug, Clone)]
pub struct FileManifestStore {
    path: PathBuf,
}

impl FileManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestStore for FileManifestStore {
    fn read_raw(&self) -> RollResult<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    fn write_raw(&self, bytes: &[u8]) -> RollResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
