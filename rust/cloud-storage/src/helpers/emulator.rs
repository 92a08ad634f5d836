use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;

use crate::encoding::decode;
use crate::signing::{ALGORITHM, SigningParams, UrlSigner};
use crate::{Bucket, Object, SignedAction, SigningIdentity, StaticCredentials, StorageConfig};

type EmulatorResponse = Response<Full<Bytes>>;

/// An object held by the [Emulator]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object content
    pub data: Bytes,
    /// Content type given at upload, if any
    pub content_type: Option<String>,
}

struct EmulatorState {
    token: String,
    identity: SigningIdentity,
    signer: UrlSigner,
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    failures: Mutex<VecDeque<(StatusCode, String)>>,
    latency: Mutex<Option<Duration>>,
    requests: AtomicUsize,
}

/// A running storage emulator.
///
/// Accepts uploads and deletes carrying the expected bearer token and signed
/// URLs produced for the expected identity. Everything is kept in memory and
/// lost on [Emulator::stop].
pub struct Emulator {
    endpoint: Url,
    state: Arc<EmulatorState>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl Emulator {
    /// Start an emulator on an ephemeral local port.
    pub async fn start(token: &str, identity: SigningIdentity) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let endpoint = Url::parse(&format!("http://{addr}"))?;

        let state = Arc::new(EmulatorState {
            token: token.to_string(),
            identity,
            signer: UrlSigner::new(endpoint.clone()),
            objects: RwLock::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            requests: AtomicUsize::new(0),
        });

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = listener.accept() => {
                        if let Ok((stream, _)) = result {
                            let state = server_state.clone();
                            tokio::spawn(async move {
                                let service = hyper::service::service_fn(move |req| {
                                    let state = state.clone();
                                    async move { handle_request(req, state).await }
                                });
                                let _ = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await;
                            });
                        }
                    }
                }
            }
        });

        tracing::debug!(%endpoint, "Storage emulator listening");

        Ok(Self {
            endpoint,
            state,
            shutdown_tx,
        })
    }

    /// Base URL of the emulator
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Client settings pointing at this emulator
    pub fn config(&self) -> StorageConfig {
        StorageConfig::default().with_endpoint(self.endpoint.clone())
    }

    /// Credentials the emulator accepts
    pub fn credentials(&self) -> StaticCredentials {
        StaticCredentials::new(self.state.token.clone()).with_signing_identity(
            self.state.identity.account(),
            self.state.identity.secret().to_vec(),
        )
    }

    /// The stored object at `object` in `bucket`, if any
    pub fn object(&self, object: &Object, bucket: &Bucket) -> Option<StoredObject> {
        self.state
            .objects
            .read()
            .get(&(bucket.name().to_string(), object.path().to_string()))
            .cloned()
    }

    /// Number of stored objects across all buckets
    pub fn len(&self) -> usize {
        self.state.objects.read().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.state.objects.read().is_empty()
    }

    /// Answer the next request with `status` and `body` instead of handling
    /// it. Injected failures queue up and are used in order.
    pub fn inject_failure(&self, status: u16, body: impl Into<String>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.state.failures.lock().push_back((status, body.into()));
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.state.latency.lock() = latency;
    }

    /// Number of requests received so far
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Stop the emulator.
    pub fn stop(self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<EmulatorState>,
) -> Result<EmulatorResponse, Infallible> {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let latency = *state.latency.lock();
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }

    let injected = state.failures.lock().pop_front();
    if let Some((status, body)) = injected {
        return Ok(respond(status, body));
    }

    let path = req.uri().path().to_string();
    let response = if let Some(rest) = path.strip_prefix("/upload/storage/v1/b/") {
        handle_upload(req, rest, &state).await
    } else if let Some(rest) = path.strip_prefix("/storage/v1/b/") {
        handle_delete(&req, rest, &state)
    } else {
        handle_signed(req, &path, &state).await
    };

    Ok(response)
}

async fn handle_upload(req: Request<Incoming>, rest: &str, state: &EmulatorState) -> EmulatorResponse {
    if req.method() != Method::POST {
        return json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }
    if let Some(response) = check_bearer(&req, state) {
        return response;
    }

    let Some(bucket) = rest.strip_suffix("/o") else {
        return json_error(StatusCode::NOT_FOUND, "Unknown upload path");
    };

    let query = query_pairs(&req);
    if query.get("uploadType").map(String::as_str) != Some("media") {
        return json_error(StatusCode::BAD_REQUEST, "Only media uploads are supported");
    }
    let Some(name) = query.get("name").cloned() else {
        return json_error(StatusCode::BAD_REQUEST, "Missing object name");
    };

    let content_type = header_value(&req, CONTENT_TYPE.as_str());
    let data = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("Failed to read body: {error}"));
        }
    };

    let size = data.len();
    state.objects.write().insert(
        (bucket.to_string(), name.clone()),
        StoredObject {
            data,
            content_type: content_type.clone(),
        },
    );

    let body = json!({
        "kind": "storage#object",
        "bucket": bucket,
        "name": name,
        "size": size.to_string(),
        "contentType": content_type,
    });
    respond(StatusCode::OK, body.to_string())
}

fn handle_delete(req: &Request<Incoming>, rest: &str, state: &EmulatorState) -> EmulatorResponse {
    if req.method() != Method::DELETE {
        return json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }
    if let Some(response) = check_bearer(req, state) {
        return response;
    }

    let Some((bucket, encoded)) = rest.split_once("/o/") else {
        return json_error(StatusCode::NOT_FOUND, "Unknown object path");
    };
    let name = decode(encoded).into_owned();

    match state
        .objects
        .write()
        .remove(&(bucket.to_string(), name.clone()))
    {
        Some(_) => respond(StatusCode::NO_CONTENT, String::new()),
        None => json_error(
            StatusCode::NOT_FOUND,
            &format!("No such object: {bucket}/{name}"),
        ),
    }
}

async fn handle_signed(req: Request<Incoming>, path: &str, state: &EmulatorState) -> EmulatorResponse {
    let action = match *req.method() {
        Method::GET => SignedAction::Reading,
        Method::PUT => SignedAction::Writing,
        _ => return xml_error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
    };

    let Some((bucket, encoded)) = path.trim_start_matches('/').split_once('/') else {
        return xml_error(StatusCode::NOT_FOUND, "NoSuchKey");
    };
    let bucket = Bucket::new(bucket);
    let object = Object::new(decode(encoded).into_owned());

    if let Err(response) = verify_signature(&req, action, &bucket, &object, state) {
        return response;
    }

    let key = (bucket.name().to_string(), object.path().to_string());
    match action {
        SignedAction::Reading => match state.objects.read().get(&key).cloned() {
            Some(stored) => {
                let mut response = respond(StatusCode::OK, String::new());
                *response.body_mut() = Full::new(stored.data);
                if let Some(content_type) = stored
                    .content_type
                    .as_deref()
                    .and_then(|value| value.parse().ok())
                {
                    response.headers_mut().insert(CONTENT_TYPE, content_type);
                }
                response
            }
            None => xml_error(StatusCode::NOT_FOUND, "NoSuchKey"),
        },
        SignedAction::Writing => {
            let content_type = header_value(&req, CONTENT_TYPE.as_str());
            let data = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return xml_error(StatusCode::BAD_REQUEST, "IncompleteBody"),
            };
            state
                .objects
                .write()
                .insert(key, StoredObject { data, content_type });
            respond(StatusCode::OK, String::new())
        }
    }
}

/// Re-derive the signature of a signed request and compare it with the one
/// presented.
fn verify_signature(
    req: &Request<Incoming>,
    action: SignedAction,
    bucket: &Bucket,
    object: &Object,
    state: &EmulatorState,
) -> Result<(), EmulatorResponse> {
    let query = query_pairs(req);
    let param = |name: &str| {
        query
            .get(name)
            .cloned()
            .ok_or_else(|| xml_error(StatusCode::BAD_REQUEST, &format!("Missing {name}")))
    };

    if param("X-Goog-Algorithm")? != ALGORITHM {
        return Err(xml_error(StatusCode::BAD_REQUEST, "InvalidAlgorithm"));
    }

    let credential = param("X-Goog-Credential")?;
    let account = credential.split_once('/').map(|(account, _)| account);
    if account != Some(state.identity.account()) {
        return Err(xml_error(StatusCode::FORBIDDEN, "InvalidCredential"));
    }

    let timestamp = NaiveDateTime::parse_from_str(&param("X-Goog-Date")?, "%Y%m%dT%H%M%SZ")
        .map_err(|_| xml_error(StatusCode::BAD_REQUEST, "InvalidDate"))?
        .and_utc();
    let expires = param("X-Goog-Expires")?
        .parse::<u64>()
        .map_err(|_| xml_error(StatusCode::BAD_REQUEST, "InvalidExpires"))?;

    let deadline = timestamp + chrono::Duration::seconds(expires as i64);
    if Utc::now() > deadline {
        return Err(xml_error(StatusCode::BAD_REQUEST, "ExpiredToken"));
    }

    let host = header_value(req, HOST.as_str())
        .ok_or_else(|| xml_error(StatusCode::BAD_REQUEST, "MissingHost"))?;

    let mut headers = Vec::new();
    for name in param("X-Goog-SignedHeaders")?.split(';') {
        if name == "host" {
            continue;
        }
        let value = header_value(req, name)
            .ok_or_else(|| xml_error(StatusCode::FORBIDDEN, "SignatureDoesNotMatch"))?;
        headers.push((name.to_string(), value));
    }

    let params = SigningParams {
        action,
        bucket: bucket.clone(),
        object: object.clone(),
        expiration: Duration::from_secs(expires),
        timestamp,
        account: state.identity.account().to_string(),
        host,
        headers,
    };

    let expected = state
        .signer
        .signature(&params, &state.identity)
        .map_err(|error| xml_error(StatusCode::BAD_REQUEST, &error.to_string()))?;

    if param("X-Goog-Signature")? != expected {
        return Err(xml_error(StatusCode::FORBIDDEN, "SignatureDoesNotMatch"));
    }

    Ok(())
}

fn check_bearer(req: &Request<Incoming>, state: &EmulatorState) -> Option<EmulatorResponse> {
    let expected = format!("Bearer {}", state.token);
    match header_value(req, AUTHORIZATION.as_str()) {
        Some(value) if value == expected => None,
        _ => Some(json_error(StatusCode::UNAUTHORIZED, "Invalid Credentials")),
    }
}

fn query_pairs(req: &Request<Incoming>) -> HashMap<String, String> {
    url::form_urlencoded::parse(req.uri().query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn header_value(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

fn respond(status: StatusCode, body: String) -> EmulatorResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

fn json_error(status: StatusCode, message: &str) -> EmulatorResponse {
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
        }
    });
    let mut response = respond(status, body.to_string());
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn xml_error(status: StatusCode, code: &str) -> EmulatorResponse {
    respond(
        status,
        format!("<?xml version='1.0' encoding='UTF-8'?><Error><Code>{code}</Code></Error>"),
    )
}
