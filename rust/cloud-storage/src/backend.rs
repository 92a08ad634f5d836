use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::{Bucket, Object, SignedAction, StorageError};

/// A [StorageBackend] is a facade over some object storage substrate that is
/// capable of storing and removing named blobs and handing out time-limited
/// URLs for them.
///
/// The real client and the test doubles all implement it, so callers can
/// pick one at composition time and hold it as `Arc<dyn StorageBackend>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `data` as the full content of `object`, replacing anything that
    /// was there before
    async fn insert(
        &self,
        data: Bytes,
        content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<(), StorageError>;

    /// Remove `object`; fails with a not-found error when it does not exist
    async fn delete(&self, object: &Object, bucket: &Bucket) -> Result<(), StorageError>;

    /// Produce a URL granting `action` on `object` until `expiration` has
    /// elapsed
    async fn generate_signed_url(
        &self,
        action: SignedAction,
        expiration: Duration,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<Url, StorageError>;
}

#[async_trait]
impl<T> StorageBackend for Arc<T>
where
    T: StorageBackend + ?Sized,
{
    async fn insert(
        &self,
        data: Bytes,
        content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<(), StorageError> {
        (**self).insert(data, content_type, object, bucket).await
    }

    async fn delete(&self, object: &Object, bucket: &Bucket) -> Result<(), StorageError> {
        (**self).delete(object, bucket).await
    }

    async fn generate_signed_url(
        &self,
        action: SignedAction,
        expiration: Duration,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<Url, StorageError> {
        (**self)
            .generate_signed_url(action, expiration, object, bucket)
            .await
    }
}
