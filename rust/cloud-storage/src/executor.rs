use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use url::Url;

use crate::{Bucket, CredentialProvider, ErrorKind, Object};

/// Error envelope returned by the JSON API
#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Issues authenticated JSON API calls over a shared connection pool.
///
/// Every call asks the credential provider for a bearer token; caching, if
/// any, is the provider's business. Nothing is retried.
pub struct RequestExecutor<P> {
    client: reqwest::Client,
    endpoint: Url,
    credentials: Arc<P>,
}

impl<P> RequestExecutor<P>
where
    P: CredentialProvider,
{
    /// Create an executor issuing requests through `client`
    pub fn new(client: reqwest::Client, endpoint: Url, credentials: Arc<P>) -> Self {
        Self {
            client,
            endpoint,
            credentials,
        }
    }

    /// Upload `data` as the full content of `object`.
    #[tracing::instrument(
        name = "storage-insert",
        skip_all,
        fields(storage.bucket = %bucket, storage.object = %object)
    )]
    pub async fn insert(
        &self,
        data: Bytes,
        content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<(), ErrorKind> {
        let result = self.send_insert(data, content_type, object, bucket).await;
        match &result {
            Ok(size) => tracing::debug!(bytes = size, "Inserted object"),
            Err(error) => tracing::warn!(%error, "Insert failed"),
        }
        result.map(|_| ())
    }

    /// Remove `object`. A missing object is reported as [ErrorKind::NotFound].
    #[tracing::instrument(
        name = "storage-delete",
        skip_all,
        fields(storage.bucket = %bucket, storage.object = %object)
    )]
    pub async fn delete(&self, object: &Object, bucket: &Bucket) -> Result<(), ErrorKind> {
        let result = self.send_delete(object, bucket).await;
        match &result {
            Ok(()) => tracing::debug!("Deleted object"),
            Err(ErrorKind::NotFound) => tracing::debug!("Object to delete was not found"),
            Err(error) => tracing::warn!(%error, "Delete failed"),
        }
        result
    }

    async fn send_insert(
        &self,
        data: Bytes,
        content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<usize, ErrorKind> {
        let url = self.insert_url(object, bucket)?;
        let token = self.credentials.bearer_token().await?;
        let size = data.len();

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", token.token()))
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(data)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(size),
            status => {
                let body = error_body(response).await;
                Err(error_for_status(status, &body))
            }
        }
    }

    async fn send_delete(&self, object: &Object, bucket: &Bucket) -> Result<(), ErrorKind> {
        let url = self.delete_url(object, bucket)?;
        let token = self.credentials.bearer_token().await?;

        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, format!("Bearer {}", token.token()))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ErrorKind::NotFound),
            status => {
                let body = error_body(response).await;
                Err(error_for_status(status, &body))
            }
        }
    }

    fn insert_url(&self, object: &Object, bucket: &Bucket) -> Result<Url, ErrorKind> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        parse_url(&format!(
            "{base}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            bucket.name(),
            object.encoded_component()
        ))
    }

    fn delete_url(&self, object: &Object, bucket: &Bucket) -> Result<Url, ErrorKind> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        parse_url(&format!(
            "{base}/storage/v1/b/{}/o/{}",
            bucket.name(),
            object.encoded_component()
        ))
    }
}

fn parse_url(url: &str) -> Result<Url, ErrorKind> {
    Url::parse(url).map_err(|error| ErrorKind::InvalidInput(format!("Invalid request URL: {error}")))
}

/// Body of a failed response. A body that cannot be read is described in
/// its place.
async fn error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(%error, "Failed to read error response body");
            format!("Failed to read response body: {error}")
        }
    }
}

/// Map a non-success status and its body to an error.
fn error_for_status(status: StatusCode, body: &str) -> ErrorKind {
    if status.is_server_error() {
        return ErrorKind::Server {
            code: status.as_u16(),
        };
    }

    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|response| response.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    ErrorKind::Client {
        code: status.as_u16(),
        message,
    }
}
