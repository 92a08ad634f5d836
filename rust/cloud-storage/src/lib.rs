#![warn(missing_docs)]

//! A client for an object storage service shaped like the Google Cloud
//! Storage JSON and XML APIs.
//!
//! It covers three operations: uploading an object, deleting it, and
//! producing a time-limited V4 signed URL that lets a third party read or
//! write it without holding any credentials.
//!
//! All three are exposed through the [StorageBackend] trait. [Storage] is the
//! network implementation; the `cloud-storage-testing` crate provides
//! in-memory and filesystem implementations for tests.
//!
//! ```rust
//! use std::time::Duration;
//! use cloud_storage::{
//!     Bucket, Object, SignedAction, StaticCredentials, Storage, StorageBackend, StorageConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = StaticCredentials::new("ya29.token")
//!     .with_signing_identity("signer@project.iam.gserviceaccount.com", b"secret".to_vec());
//! let storage = Storage::new(StorageConfig::default(), credentials);
//!
//! // Signing is local: the client does not need to be started for it
//! let url = storage
//!     .generate_signed_url(
//!         SignedAction::Reading,
//!         Duration::from_secs(900),
//!         &Object::new("reports/2024.csv"),
//!         &Bucket::new("my-bucket"),
//!     )
//!     .await?;
//!
//! assert_eq!(url.path(), "/my-bucket/reports/2024.csv");
//! # Ok(())
//! # }
//! ```
//!
//! Credentials are never acquired by this crate. Implement
//! [CredentialProvider] over whatever source you have, or use
//! [StaticCredentials], and wrap it in [CachedCredentials] when tokens are
//! expensive to mint.

mod backend;
pub use backend::*;

mod client;
pub use client::*;

mod config;
pub use config::*;

mod credentials;
pub use credentials::*;

pub mod encoding;

mod error;
pub use error::*;

mod executor;
pub use executor::*;

mod model;
pub use model::*;

pub mod signing;
pub use signing::{SignedUrlRequest, UrlSigner};

#[cfg(any(test, feature = "helpers"))]
mod helpers;
#[cfg(any(test, feature = "helpers"))]
pub use helpers::*;
