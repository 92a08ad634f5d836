use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cloud_storage::{
    Bucket, ErrorKind, Object, Operation, SignedAction, StorageBackend, StorageError,
};
use thiserror::Error;
use url::Url;

use crate::{validate, validate_signing};

/// Directory under the home directory used by [FileSystemStorage::open_default]
pub const DEFAULT_ROOT: &str = ".google-cloud-storage";

/// Errors raised while opening a [FileSystemStorage]
#[derive(Error, Debug)]
pub enum FileSystemError {
    /// The home directory of the current user could not be determined
    #[error("Unable to locate the home directory")]
    NoHomeDirectory,

    /// The root directory could not be created or resolved
    #[error("Failed to prepare root directory {path}: {source}")]
    Root {
        /// The root that was being prepared
        path: PathBuf,
        /// The underlying failure
        #[source]
        source: io::Error,
    },
}

/// A basic file-system-based [StorageBackend] implementation. Every object is
/// stored as a file at `{root}/{bucket}/{path}`, with intermediate
/// directories created as needed.
///
/// Signed URLs are `file://` URLs of the object's location. They carry no
/// signature and do not expire.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Store objects under `root`, creating it if needed.
    pub async fn open<Pathlike>(root: Pathlike) -> Result<Self, FileSystemError>
    where
        Pathlike: AsRef<Path>,
    {
        let root = root.as_ref();
        let fail = |source| FileSystemError::Root {
            path: root.to_owned(),
            source,
        };

        tokio::fs::create_dir_all(root).await.map_err(fail)?;
        let root = std::path::absolute(root).map_err(fail)?;

        tracing::debug!(root = %root.display(), "Opened filesystem storage");
        Ok(Self { root })
    }

    /// Store objects under `~/.google-cloud-storage`.
    pub async fn open_default() -> Result<Self, FileSystemError> {
        let home = dirs::home_dir().ok_or(FileSystemError::NoHomeDirectory)?;
        Self::open(home.join(DEFAULT_ROOT)).await
    }

    /// The directory objects are stored under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `object` in `bucket` lives on disk. Paths containing empty, `.`
    /// or `..` segments are rejected so objects cannot escape their bucket.
    pub fn path_for(&self, object: &Object, bucket: &Bucket) -> Result<PathBuf, ErrorKind> {
        bucket.validate()?;
        object.validate()?;

        let mut path = self.root.join(bucket.name());
        for segment in object.path().split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(ErrorKind::InvalidInput(format!(
                    "Object path {:?} cannot be stored on a filesystem",
                    object.path()
                )));
            }
            path.push(segment);
        }

        Ok(path)
    }

    /// Content of `object`, or `None` when it does not exist
    pub async fn read(&self, object: &Object, bucket: &Bucket) -> Result<Option<Bytes>, ErrorKind> {
        let path = self.path_for(object, bucket)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(ErrorKind::Io(error)),
        }
    }

    fn resolve(
        &self,
        operation: Operation,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<PathBuf, StorageError> {
        validate(operation, object, bucket)?;
        self.path_for(object, bucket)
            .map_err(|kind| StorageError::new(operation, bucket, object, kind))
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn insert(
        &self,
        data: Bytes,
        _content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<(), StorageError> {
        let path = self.resolve(Operation::Insert, object, bucket)?;
        let fail = |error: io::Error| {
            StorageError::new(Operation::Insert, bucket, object, ErrorKind::Io(error))
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
        tokio::fs::write(&path, &data).await.map_err(fail)?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "Wrote object");
        Ok(())
    }

    async fn delete(&self, object: &Object, bucket: &Bucket) -> Result<(), StorageError> {
        let path = self.resolve(Operation::Delete, object, bucket)?;

        tokio::fs::remove_file(&path).await.map_err(|error| {
            let kind = if error.kind() == io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io(error)
            };
            StorageError::new(Operation::Delete, bucket, object, kind)
        })
    }

    async fn generate_signed_url(
        &self,
        _action: SignedAction,
        expiration: Duration,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<Url, StorageError> {
        validate_signing(expiration, object, bucket)?;
        let path = self.resolve(Operation::SignUrl, object, bucket)?;

        Url::from_file_path(&path).map_err(|_| {
            StorageError::new(
                Operation::SignUrl,
                bucket,
                object,
                ErrorKind::InvalidInput(format!("{} is not an absolute path", path.display())),
            )
        })
    }
}
