use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use super::{CanonicalRequest, SigningKeyCache, SigningParams, validate_expiration};
use crate::{Bucket, ErrorKind, Object, SignedAction, SigningIdentity};

/// A request for a signed URL.
///
/// ```
/// use std::time::Duration;
/// use cloud_storage::{Bucket, Object, SignedAction, SignedUrlRequest};
///
/// let request = SignedUrlRequest::new(
///     SignedAction::Writing,
///     Duration::from_secs(900),
///     Object::new("uploads/report.csv"),
///     Bucket::new("my-bucket"),
/// )
/// .with_header("content-type", "text/csv");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrlRequest {
    action: SignedAction,
    expiration: Duration,
    object: Object,
    bucket: Bucket,
    headers: Vec<(String, String)>,
    timestamp: Option<DateTime<Utc>>,
}

impl SignedUrlRequest {
    /// A URL granting `action` on `object` for `expiration`
    pub fn new(action: SignedAction, expiration: Duration, object: Object, bucket: Bucket) -> Self {
        Self {
            action,
            expiration,
            object,
            bucket,
            headers: Vec::new(),
            timestamp: None,
        }
    }

    /// Require the holder to send `name: value` with the request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sign as of `timestamp` rather than the current time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The action the URL grants
    pub fn action(&self) -> SignedAction {
        self.action
    }

    /// How long the URL stays valid
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// The object the URL grants access to
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// The bucket holding the object
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Check every input that can be checked without credentials.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        validate_expiration(self.expiration)?;
        self.bucket.validate()?;
        self.object.validate()
    }
}

/// Produces signed URLs rooted at a fixed endpoint.
#[derive(Debug)]
pub struct UrlSigner {
    endpoint: Url,
    keys: SigningKeyCache,
}

impl UrlSigner {
    /// A signer for URLs on `endpoint`
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            keys: SigningKeyCache::new(),
        }
    }

    /// The endpoint URLs are rooted at
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The signing-key cache
    pub fn keys(&self) -> &SigningKeyCache {
        &self.keys
    }

    /// Sign `request` with `identity`.
    pub fn sign(
        &self,
        request: &SignedUrlRequest,
        identity: &SigningIdentity,
    ) -> Result<Url, ErrorKind> {
        request.validate()?;

        let params = SigningParams {
            action: request.action,
            bucket: request.bucket.clone(),
            object: request.object.clone(),
            expiration: request.expiration,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
            account: identity.account().to_string(),
            host: self.host()?,
            headers: request.headers.clone(),
        };

        self.sign_params(&params, identity)
    }

    /// Sign fully resolved parameters.
    pub fn sign_params(
        &self,
        params: &SigningParams,
        identity: &SigningIdentity,
    ) -> Result<Url, ErrorKind> {
        let canonical = CanonicalRequest::new(params)?;
        let signature = self.signature_for(&canonical, identity);

        let url = format!(
            "{}://{}{}?{}&X-Goog-Signature={}",
            self.endpoint.scheme(),
            params.host,
            canonical.uri(),
            canonical.canonical_query_string(),
            signature
        );

        Url::parse(&url)
            .map_err(|error| ErrorKind::InvalidInput(format!("Failed to build signed URL: {error}")))
    }

    /// Lowercase hex signature over `params`, for checking URLs presented by
    /// a client.
    pub fn signature(
        &self,
        params: &SigningParams,
        identity: &SigningIdentity,
    ) -> Result<String, ErrorKind> {
        let canonical = CanonicalRequest::new(params)?;
        Ok(self.signature_for(&canonical, identity))
    }

    fn signature_for(&self, canonical: &CanonicalRequest, identity: &SigningIdentity) -> String {
        let key = self.keys.get(identity, canonical.date());
        key.sign(canonical.string_to_sign().as_bytes()).to_string()
    }

    fn host(&self) -> Result<String, ErrorKind> {
        let hostname = self
            .endpoint
            .host_str()
            .ok_or_else(|| ErrorKind::InvalidInput("Endpoint URL has no host".into()))?;

        Ok(match self.endpoint.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        })
    }
}
