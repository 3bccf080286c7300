//! Received BLOB storage and the "image available" signal

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::config::{process_env, resolve_blob_dir_with, EnvLookup};
use crate::device::BlobValue;
use crate::error::{IndiError, IndiResult};

#[derive(Debug, Default)]
struct FlagInner {
    set: AtomicBool,
    count: AtomicU64,
    notify: Notify,
}

/// Set once for every BLOB written to disk
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ImageAvailable {
    inner: Arc<FlagInner>,
}

impl ImageAvailable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Read and clear
    pub fn take(&self) -> bool {
        self.inner.set.swap(false, Ordering::SeqCst)
    }

    /// Number of BLOBs signalled since creation
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set, then clear it
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.take() {
                return;
            }
            notified.await;
        }
    }
}

/// Writes decoded BLOBs under the session's BLOB directory
#[derive(Debug, Clone)]
pub(crate) struct BlobSink {
    dir: Option<PathBuf>,
    env: EnvLookup,
    image: ImageAvailable,
    mirror: Arc<RwLock<Option<ImageAvailable>>>,
}

impl BlobSink {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self::with_env(dir, process_env)
    }

    /// Resolve the fallback directory through `env` instead of the process environment
    pub fn with_env(dir: Option<PathBuf>, env: EnvLookup) -> Self {
        Self {
            dir,
            env,
            image: ImageAvailable::new(),
            mirror: Arc::new(RwLock::new(None)),
        }
    }

    pub fn image_available(&self) -> ImageAvailable {
        self.image.clone()
    }

    /// Also signal `flag` for every stored BLOB
    pub async fn set_mirror(&self, flag: Option<ImageAvailable>) {
        *self.mirror.write().await = flag;
    }

    /// Write `blob` as `{dir}/{label}{format}` and signal it
    pub async fn store(&self, label: &str, blob: &BlobValue) -> IndiResult<PathBuf> {
        let dir = resolve_blob_dir_with(self.dir.as_deref(), self.env)?;
        if blob.format.ends_with(".z") {
            tracing::warn!("BLOB {} is compressed ({}), storing as received", label, blob.format);
        }
        let path = blob_path(&dir, label, &blob.format);
        tokio::fs::write(&path, &blob.data)
            .await
            .map_err(|e| IndiError::BlobStorage(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Stored BLOB {} ({} bytes)", path.display(), blob.data.len());

        self.image.set();
        if let Some(mirror) = self.mirror.read().await.as_ref() {
            mirror.set();
        }
        Ok(path)
    }
}

fn blob_path(dir: &Path, label: &str, format: &str) -> PathBuf {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect()
    };
    let stem = match clean(label.trim()) {
        s if s.is_empty() || s == "." || s == ".." => "blob".to_string(),
        s => s,
    };
    dir.join(format!("{}{}", stem, clean(format.trim())))
}
