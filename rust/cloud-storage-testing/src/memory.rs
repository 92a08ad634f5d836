use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cloud_storage::{
    Bucket, ErrorKind, Object, Operation, SignedAction, StorageBackend, StorageError,
};
use tokio::sync::RwLock;
use url::Url;

use crate::{validate, validate_signing};

#[derive(Clone)]
struct Entry {
    data: Bytes,
    content_type: String,
}

/// A trivial implementation of [StorageBackend] - backed by a [HashMap] - where
/// all objects are kept in memory and never persisted.
///
/// Clones share the same objects. Signed URLs cannot be produced since there
/// is nothing a URL could point at.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<(Bucket, Object), Entry>>>,
}

impl MemoryStorage {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of `object`, if present
    pub async fn read(&self, object: &Object, bucket: &Bucket) -> Option<Bytes> {
        let objects = self.objects.read().await;
        objects
            .get(&(bucket.clone(), object.clone()))
            .map(|entry| entry.data.clone())
    }

    /// Content type `object` was inserted with, if present
    pub async fn content_type(&self, object: &Object, bucket: &Bucket) -> Option<String> {
        let objects = self.objects.read().await;
        objects
            .get(&(bucket.clone(), object.clone()))
            .map(|entry| entry.content_type.clone())
    }

    /// True when `object` exists in `bucket`
    pub async fn contains(&self, object: &Object, bucket: &Bucket) -> bool {
        let objects = self.objects.read().await;
        objects.contains_key(&(bucket.clone(), object.clone()))
    }

    /// Number of objects across all buckets
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// True when nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn insert(
        &self,
        data: Bytes,
        content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<(), StorageError> {
        validate(Operation::Insert, object, bucket)?;

        let mut objects = self.objects.write().await;
        objects.insert(
            (bucket.clone(), object.clone()),
            Entry {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, object: &Object, bucket: &Bucket) -> Result<(), StorageError> {
        validate(Operation::Delete, object, bucket)?;

        let mut objects = self.objects.write().await;
        match objects.remove(&(bucket.clone(), object.clone())) {
            Some(_) => Ok(()),
            None => Err(StorageError::new(
                Operation::Delete,
                bucket,
                object,
                ErrorKind::NotFound,
            )),
        }
    }

    async fn generate_signed_url(
        &self,
        _action: SignedAction,
        expiration: Duration,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<Url, StorageError> {
        validate_signing(expiration, object, bucket)?;

        Err(StorageError::new(
            Operation::SignUrl,
            bucket,
            object,
            ErrorKind::Unsupported("in-memory objects have no URL".into()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn bucket() -> Bucket {
        Bucket::new("test-bucket")
    }

    #[tokio::test]
    async fn it_writes_and_reads_an_object() -> Result<()> {
        let storage = MemoryStorage::new();
        let object = Object::new("test/file.txt");

        storage
            .insert(Bytes::from_static(b"Hello, World!"), "text/plain", &object, &bucket())
            .await?;

        assert!(storage.contains(&object, &bucket()).await);
        assert_eq!(
            storage.read(&object, &bucket()).await,
            Some(Bytes::from_static(b"Hello, World!"))
        );
        assert_eq!(
            storage.content_type(&object, &bucket()).await.as_deref(),
            Some("text/plain")
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_missing_objects_on_delete() -> Result<()> {
        let storage = MemoryStorage::new();
        let object = Object::new("missing.txt");

        let error = storage.delete(&object, &bucket()).await.unwrap_err();
        assert!(error.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn it_shares_objects_between_clones() -> Result<()> {
        let storage = MemoryStorage::new();
        let clone = storage.clone();

        clone
            .insert(Bytes::from_static(b"shared"), "text/plain", &Object::new("a"), &bucket())
            .await?;

        assert_eq!(storage.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_refuses_to_sign_urls() {
        let storage = MemoryStorage::new();

        let error = storage
            .generate_signed_url(
                SignedAction::Reading,
                Duration::from_secs(60),
                &Object::new("file.txt"),
                &bucket(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Unsupported(_)));

        let error = storage
            .generate_signed_url(
                SignedAction::Reading,
                Duration::ZERO,
                &Object::new("file.txt"),
                &bucket(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::InvalidInput(_)));
    }

    #[tokio::test]
    async fn it_validates_names_like_the_client() {
        let storage = MemoryStorage::new();

        let error = storage
            .insert(Bytes::new(), "text/plain", &Object::new(""), &bucket())
            .await
            .unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::InvalidInput(_)));

        let error = storage
            .delete(&Object::new("file.txt"), &Bucket::new("UPPER"))
            .await
            .unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::InvalidInput(_)));
        assert!(storage.is_empty().await);
    }
}
