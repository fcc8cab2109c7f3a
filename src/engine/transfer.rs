//! Files received from workers.
//!
//! Each worker gets its own subdirectory under the storage root, named by
//! worker ID. Only the basename of the path the worker reported is kept.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fleet::{WorkerDirectory, resolve};
use crate::model::{Direction, FileTransferPayload, WorkerId};
use crate::notify::Notifier;
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a file named `name` from `worker_id` ends up.
    pub fn path_for(&self, worker_id: WorkerId, name: &str) -> PathBuf {
        self.root.join(worker_id.to_string()).join(name)
    }

    /// Persist a file the worker sent back. Uploads to the worker need no
    /// server-side work and return `Ok(None)`.
    ///
    /// The storage root must already exist; the per-worker directory is
    /// created as needed.
    pub async fn receive(
        &self,
        directory: &dyn WorkerDirectory,
        notifier: &Notifier,
        worker_id: WorkerId,
        payload: &FileTransferPayload,
    ) -> Result<Option<PathBuf>> {
        if payload.direction == Direction::ServerToWorker {
            return Ok(None);
        }
        resolve(directory, worker_id)?;

        let blob = payload.blob.as_deref().ok_or_else(|| {
            Error::CorruptPayload(format!("download of {} carried no file data", payload.path))
        })?;
        let data = BASE64_STANDARD.decode(blob.trim()).map_err(|e| {
            let err = Error::CorruptPayload(format!(
                "file data for {} is not valid base64: {e}",
                payload.path
            ));
            directory.log(worker_id, &err.to_string());
            err
        })?;
        let name = basename(&payload.path).ok_or_else(|| {
            Error::CorruptPayload(format!("{:?} does not name a file", payload.path))
        })?;

        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::StorageUnavailable {
                    path: self.root.clone(),
                    source: std::io::Error::other("not a directory"),
                });
            }
            Err(source) => {
                warn!(root = %self.root.display(), error = %source, "storage root missing");
                return Err(Error::StorageUnavailable {
                    path: self.root.clone(),
                    source,
                });
            }
        }

        let worker_dir = self.root.join(worker_id.to_string());
        tokio::fs::create_dir_all(&worker_dir)
            .await
            .map_err(|source| Error::WriteFailed {
                path: worker_dir.clone(),
                source,
            })?;

        let dest = worker_dir.join(name);
        tokio::fs::write(&dest, &data)
            .await
            .map_err(|source| Error::WriteFailed {
                path: dest.clone(),
                source,
            })?;
        restrict_permissions(&dest).await?;

        metrics::transfer_bytes().record(data.len() as u64, &[]);
        info!(
            worker_id = %worker_id,
            path = %dest.display(),
            bytes = data.len(),
            "file received"
        );
        let summary = format!(
            "Successfully downloaded file {} with a size of {} bytes from worker to {}",
            payload.path,
            data.len(),
            dest.display()
        );
        directory.log(worker_id, &summary);
        notifier.success(summary);
        Ok(Some(dest))
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|source| Error::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Last component of a worker-reported path, split on either separator.
pub(crate) fn basename(declared: &str) -> Option<&str> {
    match declared.rsplit(['/', '\\']).next()? {
        "" | "." | ".." => None,
        name => Some(name),
    }
}
