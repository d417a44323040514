//! File-backed key-value store, one JSON document per backend origin.

use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::*;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::error::{storage_error, Error, StorageErrorKind};

/// Durable store scoped to one origin.
///
/// The whole document is rewritten through a temporary file and a rename, so a
/// crash mid-write leaves either the old or the new document on disk. On unix
/// the document is readable by its owner only.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    /// Opens the store for `origin` inside `dir`. The file is created lazily.
    pub fn new(dir: impl AsRef<Path>, origin: &str) -> Self {
        let path = dir.as_ref().join(format!("{}.json", sanitize(origin)));
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<BTreeMap<String, String>, Error> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(storage_error(StorageErrorKind::Read, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            warn!("Token store {} is not valid JSON", self.path.display());
            storage_error(StorageErrorKind::Corrupt, e)
        })
    }

    async fn write_document(&self, document: &BTreeMap<String, String>) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(StorageErrorKind::Write, e))?;
        }
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| storage_error(StorageErrorKind::Write, e))?;

        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, &bytes)
            .await
            .map_err(|e| storage_error(StorageErrorKind::Write, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error(StorageErrorKind::Write, e))
    }
}

/// Writes `bytes` to a fresh file at `path`, owner read/write only on unix.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // A leftover from an interrupted write keeps its old mode, so start over.
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != IoErrorKind::NotFound => return Err(e),
        _ => {}
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Turns an origin like `https://api.example.com:8443` into a file stem.
fn sanitize(origin: &str) -> String {
    origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value.to_string());
        self.write_document(&document).await
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        if document.remove(key).is_none() {
            return Ok(());
        }
        self.write_document(&document).await
    }
}
