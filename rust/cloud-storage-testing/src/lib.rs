#![warn(missing_docs)]

//! Drop-in replacements for the [cloud_storage::Storage] client for tests
//! that should not touch the network.
//!
//! Both doubles implement [StorageBackend] and validate buckets, objects and
//! expirations exactly like the real client, so code exercised against them
//! fails the same way it would in production.
//!
//! ```rust
//! use bytes::Bytes;
//! use cloud_storage::{Bucket, Object, StorageBackend};
//! use cloud_storage_testing::MemoryStorage;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::new();
//! let bucket = Bucket::new("test-bucket");
//! let object = Object::new("test/file.txt");
//!
//! storage
//!     .insert(Bytes::from_static(b"Hello, World!"), "text/plain", &object, &bucket)
//!     .await?;
//! assert_eq!(
//!     storage.read(&object, &bucket).await,
//!     Some(Bytes::from_static(b"Hello, World!"))
//! );
//! # Ok(())
//! # }
//! ```
//!
//! [StorageBackend]: cloud_storage::StorageBackend

use std::time::Duration;

use cloud_storage::{Bucket, ErrorKind, Object, Operation, StorageError, signing};

mod memory;
pub use memory::*;

mod fs;
pub use fs::*;

/// Apply the checks the real client performs before doing any work.
fn validate(operation: Operation, object: &Object, bucket: &Bucket) -> Result<(), StorageError> {
    let check = || -> Result<(), ErrorKind> {
        bucket.validate()?;
        object.validate()
    };
    check().map_err(|kind| StorageError::new(operation, bucket, object, kind))
}

/// Like [validate], for signed URL requests.
fn validate_signing(
    expiration: Duration,
    object: &Object,
    bucket: &Bucket,
) -> Result<(), StorageError> {
    signing::validate_expiration(expiration)
        .map_err(|kind| StorageError::new(Operation::SignUrl, bucket, object, kind))?;
    validate(Operation::SignUrl, object, bucket)
}
