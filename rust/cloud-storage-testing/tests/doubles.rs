//! Behaviour shared by every test double: the same scenarios run against the
//! in-memory and the filesystem implementation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use cloud_storage::{Bucket, Object, StorageBackend};
use cloud_storage_testing::{FileSystemStorage, MemoryStorage};
use futures_util::future::try_join_all;

/// Reads an object back out of a double.
#[async_trait]
trait ReadBack {
    async fn read_back(&self, object: &Object, bucket: &Bucket) -> Result<Option<Bytes>>;
}

#[async_trait]
impl ReadBack for MemoryStorage {
    async fn read_back(&self, object: &Object, bucket: &Bucket) -> Result<Option<Bytes>> {
        Ok(self.read(object, bucket).await)
    }
}

#[async_trait]
impl ReadBack for FileSystemStorage {
    async fn read_back(&self, object: &Object, bucket: &Bucket) -> Result<Option<Bytes>> {
        Ok(self.read(object, bucket).await?)
    }
}

async fn inserts_and_deletes(storage: &dyn StorageBackend) -> Result<()> {
    let bucket = Bucket::new("test-bucket");
    let object = Object::new("test/file.txt");

    storage
        .insert(Bytes::from_static(b"Hello, World!"), "text/plain", &object, &bucket)
        .await?;
    storage.delete(&object, &bucket).await?;

    let error = storage.delete(&object, &bucket).await.unwrap_err();
    assert!(error.is_not_found());
    Ok(())
}

async fn isolates_buckets<S>(storage: &S) -> Result<()>
where
    S: StorageBackend + ReadBack,
{
    let first = Bucket::new("bucket-1");
    let second = Bucket::new("bucket-2");
    let object = Object::new("same/path.txt");

    storage
        .insert(Bytes::from_static(b"Data in bucket 1"), "text/plain", &object, &first)
        .await?;
    storage
        .insert(Bytes::from_static(b"Data in bucket 2"), "text/plain", &object, &second)
        .await?;

    assert_eq!(
        storage.read_back(&object, &first).await?,
        Some(Bytes::from_static(b"Data in bucket 1"))
    );
    assert_eq!(
        storage.read_back(&object, &second).await?,
        Some(Bytes::from_static(b"Data in bucket 2"))
    );

    storage.delete(&object, &first).await?;
    assert_eq!(storage.read_back(&object, &first).await?, None);
    assert_eq!(
        storage.read_back(&object, &second).await?,
        Some(Bytes::from_static(b"Data in bucket 2"))
    );

    storage.delete(&object, &second).await?;
    assert!(storage.delete(&object, &first).await.unwrap_err().is_not_found());
    Ok(())
}

async fn handles_concurrent_calls(storage: Arc<dyn StorageBackend>) -> Result<()> {
    let bucket = Bucket::new("test-bucket");
    let objects = (0..100)
        .map(|i| Object::new(format!("concurrent/file{i}.txt")))
        .collect::<Vec<_>>();

    try_join_all(objects.iter().enumerate().map(|(i, object)| {
        let storage = storage.clone();
        let bucket = bucket.clone();
        async move {
            storage
                .insert(Bytes::from(format!("Content {i}")), "text/plain", object, &bucket)
                .await
        }
    }))
    .await?;

    try_join_all(objects.iter().map(|object| {
        let storage = storage.clone();
        let bucket = bucket.clone();
        async move { storage.delete(object, &bucket).await }
    }))
    .await?;
    Ok(())
}

#[tokio::test]
async fn it_runs_the_lifecycle_in_memory() -> Result<()> {
    let storage = MemoryStorage::new();

    inserts_and_deletes(&storage).await?;
    isolates_buckets(&storage).await?;
    handles_concurrent_calls(Arc::new(storage.clone())).await?;

    assert!(storage.is_empty().await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn it_runs_the_lifecycle_on_the_filesystem() -> Result<()> {
    let root = tempfile::tempdir()?;
    let storage = FileSystemStorage::open(root.path()).await?;

    inserts_and_deletes(&storage).await?;
    isolates_buckets(&storage).await?;
    handles_concurrent_calls(Arc::new(storage.clone())).await?;
    Ok(())
}

#[tokio::test]
async fn it_keeps_content_types_and_overwrites_in_memory() -> Result<()> {
    let storage = MemoryStorage::new();
    let bucket = Bucket::new("test-bucket");

    let cases = [
        ("test.txt", "text/plain", Bytes::from_static(b"Text")),
        ("test.json", "application/json", Bytes::from_static(br#"{"key":"value"}"#)),
        ("test.jpg", "image/jpeg", Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0])),
        ("empty.txt", "text/plain", Bytes::new()),
    ];
    for (path, content_type, data) in cases {
        let object = Object::new(path);
        storage.insert(data.clone(), content_type, &object, &bucket).await?;

        assert_eq!(storage.read(&object, &bucket).await, Some(data));
        assert_eq!(
            storage.content_type(&object, &bucket).await.as_deref(),
            Some(content_type)
        );
    }

    let object = Object::new("overwrite.txt");
    storage
        .insert(Bytes::from_static(b"Original"), "text/plain", &object, &bucket)
        .await?;
    storage
        .insert(Bytes::from_static(b"Updated"), "text/plain", &object, &bucket)
        .await?;
    assert_eq!(
        storage.read(&object, &bucket).await,
        Some(Bytes::from_static(b"Updated"))
    );
    Ok(())
}

#[tokio::test]
async fn it_overwrites_and_keeps_binary_content_on_the_filesystem() -> Result<()> {
    let root = tempfile::tempdir()?;
    let storage = FileSystemStorage::open(root.path()).await?;
    let bucket = Bucket::new("test-bucket");

    let image = Object::new("test.jpg");
    storage
        .insert(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg", &image, &bucket)
        .await?;
    assert_eq!(
        storage.read(&image, &bucket).await?,
        Some(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0]))
    );

    let object = Object::new("overwrite.txt");
    storage
        .insert(Bytes::from_static(b"Original"), "text/plain", &object, &bucket)
        .await?;
    storage
        .insert(Bytes::from_static(b"Updated"), "text/plain", &object, &bucket)
        .await?;
    assert_eq!(
        storage.read(&object, &bucket).await?,
        Some(Bytes::from_static(b"Updated"))
    );

    assert_eq!(storage.read(&Object::new("missing.txt"), &bucket).await?, None);
    Ok(())
}
