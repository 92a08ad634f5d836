use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

use super::{ALGORITHM, REGION, REQUEST_TYPE, SERVICE, TIMESTAMP_FORMAT, UNSIGNED_PAYLOAD};
use crate::encoding::encode_query;
use crate::{Bucket, ErrorKind, Object, SignedAction};

/// Everything a signature is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningParams {
    /// Action the URL grants
    pub action: SignedAction,
    /// Bucket holding the object
    pub bucket: Bucket,
    /// Object the URL grants access to
    pub object: Object,
    /// How long the URL stays valid after `timestamp`
    pub expiration: Duration,
    /// Instant the URL is considered issued at
    pub timestamp: DateTime<Utc>,
    /// Service-account email of the signer
    pub account: String,
    /// `host[:port]` the URL will be sent to
    pub host: String,
    /// Additional headers the holder must send verbatim
    pub headers: Vec<(String, String)>,
}

/// The canonical form of a signed request.
///
/// Rendering it with [Display] yields the exact byte string whose SHA-256
/// digest goes into the string-to-sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    method: &'static str,
    uri: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    signed_headers: String,
    timestamp: String,
    scope: String,
}

impl CanonicalRequest {
    /// Build the canonical request for `params`, validating every input.
    pub fn new(params: &SigningParams) -> Result<Self, ErrorKind> {
        params.bucket.validate()?;
        params.object.validate()?;
        super::validate_expiration(params.expiration)?;

        let timestamp = params.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let scope = derive_scope(&params.timestamp);

        let mut headers = vec![("host".to_string(), params.host.trim().to_string())];
        for (name, value) in &params.headers {
            let name = name.trim().to_ascii_lowercase();
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ErrorKind::InvalidInput(format!("Invalid header name {name:?}")))?;
            HeaderValue::from_str(value).map_err(|_| {
                ErrorKind::InvalidInput(format!("Invalid value for header {name:?}"))
            })?;

            if headers.iter().any(|(existing, _)| *existing == name) {
                return Err(ErrorKind::InvalidInput(format!(
                    "Header {name:?} is signed more than once"
                )));
            }
            headers.push((name, value.trim().to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let mut query = vec![
            ("X-Goog-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Goog-Credential".to_string(),
                format!("{}/{}", params.account, scope),
            ),
            ("X-Goog-Date".to_string(), timestamp.clone()),
            (
                "X-Goog-Expires".to_string(),
                params.expiration.as_secs().to_string(),
            ),
            ("X-Goog-SignedHeaders".to_string(), signed_headers.clone()),
        ];
        query.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            method: params.action.method(),
            uri: format!("/{}/{}", params.bucket.name(), params.object.encoded_path()),
            query,
            headers,
            signed_headers,
            timestamp,
            scope,
        })
    }

    /// HTTP method the request is signed for
    pub fn method(&self) -> &str {
        self.method
    }

    /// Canonical URI, `/{bucket}/{encoded object}`
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Query parameters sorted by key, each key and value encoded
    pub fn canonical_query_string(&self) -> String {
        self.query
            .iter()
            .map(|(key, value)| format!("{}={}", encode_query(key), encode_query(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Sorted, `;`-joined names of the signed headers
    pub fn signed_headers(&self) -> &str {
        &self.signed_headers
    }

    /// Request timestamp in `YYYYMMDDTHHMMSSZ` form
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Credential scope, `{date}/auto/storage/goog4_request`
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The date component of the scope, `YYYYMMDD`
    pub fn date(&self) -> &str {
        &self.timestamp[..8]
    }

    /// Lowercase hex SHA-256 of the canonical form
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }

    /// The string the signing key is applied to
    pub fn string_to_sign(&self) -> String {
        format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            self.timestamp,
            self.scope,
            self.digest()
        )
    }
}

impl Display for CanonicalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}"))
            .collect::<Vec<_>>()
            .join("\n");

        write!(
            f,
            "{}\n{}\n{}\n{}\n\n{}\n{UNSIGNED_PAYLOAD}",
            self.method,
            self.uri,
            self.canonical_query_string(),
            headers,
            self.signed_headers,
        )
    }
}

/// Credential scope for the date of `timestamp`
pub fn derive_scope(timestamp: &DateTime<Utc>) -> String {
    format!(
        "{}/{REGION}/{SERVICE}/{REQUEST_TYPE}",
        timestamp.format("%Y%m%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> SigningParams {
        SigningParams {
            action: SignedAction::Reading,
            bucket: Bucket::new("test-bucket"),
            object: Object::new("folder/my file.txt"),
            expiration: Duration::from_secs(3600),
            timestamp: Utc.with_ymd_and_hms(2025, 5, 7, 5, 48, 59).unwrap(),
            account: "signer@test-project.iam.gserviceaccount.com".into(),
            host: "storage.googleapis.com".into(),
            headers: vec![],
        }
    }

    #[test]
    fn it_derives_scope() {
        let time = Utc.with_ymd_and_hms(2025, 5, 7, 5, 48, 59).unwrap();
        assert_eq!(derive_scope(&time), "20250507/auto/storage/goog4_request");
    }

    #[test]
    fn it_renders_the_canonical_form() {
        let request = CanonicalRequest::new(&params()).unwrap();

        assert_eq!(
            request.to_string(),
            "GET\n\
             /test-bucket/folder/my%20file.txt\n\
             X-Goog-Algorithm=GOOG4-HMAC-SHA256\
             &X-Goog-Credential=signer%40test-project.iam.gserviceaccount.com%2F20250507%2Fauto%2Fstorage%2Fgoog4_request\
             &X-Goog-Date=20250507T054859Z\
             &X-Goog-Expires=3600\
             &X-Goog-SignedHeaders=host\n\
             host:storage.googleapis.com\n\
             \n\
             host\n\
             UNSIGNED-PAYLOAD"
        );
    }

    #[test]
    fn it_sorts_and_normalizes_extra_headers() {
        let mut params = params();
        params.action = SignedAction::Writing;
        params.headers = vec![
            ("X-Goog-Meta-Owner".into(), "  team-a ".into()),
            ("Content-Type".into(), "text/plain".into()),
        ];

        let request = CanonicalRequest::new(&params).unwrap();
        let rendered = request.to_string();

        assert_eq!(request.method(), "PUT");
        assert_eq!(request.signed_headers(), "content-type;host;x-goog-meta-owner");
        assert!(rendered.contains(
            "content-type:text/plain\nhost:storage.googleapis.com\nx-goog-meta-owner:team-a\n\n"
        ));
    }

    #[test]
    fn it_is_a_pure_function_of_its_inputs() {
        let first = CanonicalRequest::new(&params()).unwrap();
        let second = CanonicalRequest::new(&params()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 64);
    }

    #[test]
    fn it_rejects_invalid_inputs() {
        let mut bad_bucket = params();
        bad_bucket.bucket = Bucket::new("Bad Bucket");

        let mut bad_object = params();
        bad_object.object = Object::new("");

        let mut bad_header = params();
        bad_header.headers = vec![("bad header".into(), "value".into())];

        let mut duplicate_host = params();
        duplicate_host.headers = vec![("Host".into(), "elsewhere".into())];

        let mut bad_expiration = params();
        bad_expiration.expiration = Duration::from_secs(604_801);

        for params in [
            bad_bucket,
            bad_object,
            bad_header,
            duplicate_host,
            bad_expiration,
        ] {
            assert!(matches!(
                CanonicalRequest::new(&params),
                Err(ErrorKind::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn it_rejects_objects_with_dot_segments() {
        for path in ["a/../b.txt", "./file.txt", ".."] {
            let mut params = params();
            params.object = Object::new(path);

            assert!(
                matches!(CanonicalRequest::new(&params), Err(ErrorKind::InvalidInput(_))),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn it_builds_the_string_to_sign() {
        let request = CanonicalRequest::new(&params()).unwrap();
        let lines = request.string_to_sign();
        let lines = lines.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "GOOG4-HMAC-SHA256");
        assert_eq!(lines[1], "20250507T054859Z");
        assert_eq!(lines[2], "20250507/auto/storage/goog4_request");
        assert_eq!(lines[3], request.digest());
    }
}
