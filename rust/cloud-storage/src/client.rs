use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    Bucket, CredentialProvider, ErrorKind, LifecycleError, Object, Operation, RequestExecutor,
    SignedAction, SignedUrlRequest, StorageBackend, StorageConfig, StorageError, UrlSigner,
};

/// Where a [Storage] client is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed but not yet started
    Created,
    /// Accepting insert and delete calls
    Running,
    /// Stopped for good
    Stopped,
}

struct Running<P> {
    executor: Arc<RequestExecutor<P>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    driver: JoinHandle<()>,
}

enum State<P> {
    Created,
    Running(Running<P>),
    /// Holds the tracker of the last run, if any, so late `stop` calls can
    /// wait for the same drain.
    Stopped(Option<TaskTracker>),
}

struct Inner<P> {
    config: StorageConfig,
    credentials: Arc<P>,
    signer: UrlSigner,
    state: RwLock<State<P>>,
}

/// Client for the object storage service.
///
/// Signed URLs can be generated at any time since they need no network
/// access. Inserts and deletes go through a pooled HTTP client that only
/// exists between [Storage::start] and [Storage::stop].
///
/// Cloning is cheap and every clone shares the same connection pool and
/// lifecycle.
///
/// ```no_run
/// use std::time::Duration;
/// use bytes::Bytes;
/// use cloud_storage::{
///     Bucket, Object, SignedAction, StaticCredentials, Storage, StorageBackend, StorageConfig,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = StaticCredentials::new("ya29.token")
///     .with_signing_identity("signer@project.iam.gserviceaccount.com", b"secret".to_vec());
/// let storage = Storage::new(StorageConfig::from_env()?, credentials);
///
/// storage.start().await?;
///
/// let bucket = Bucket::new("my-bucket");
/// let object = Object::new("reports/2024.csv");
/// storage
///     .insert(Bytes::from_static(b"a,b\n1,2\n"), "text/csv", &object, &bucket)
///     .await?;
///
/// let url = storage
///     .generate_signed_url(SignedAction::Reading, Duration::from_secs(900), &object, &bucket)
///     .await?;
/// println!("{url}");
///
/// storage.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Storage<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for Storage<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> Storage<P>
where
    P: CredentialProvider + 'static,
{
    /// Create a client that has not been started yet
    pub fn new(config: StorageConfig, credentials: P) -> Self {
        let signer = UrlSigner::new(config.endpoint.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                credentials: Arc::new(credentials),
                signer,
                state: RwLock::new(State::Created),
            }),
        }
    }

    /// The configuration the client was created with
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// The credential provider shared by every clone of this client
    pub fn credentials(&self) -> &P {
        &self.inner.credentials
    }

    /// The signer used for signed URLs
    pub fn signer(&self) -> &UrlSigner {
        &self.inner.signer
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        match &*self.inner.state.read() {
            State::Created => LifecycleState::Created,
            State::Running(_) => LifecycleState::Running,
            State::Stopped(_) => LifecycleState::Stopped,
        }
    }

    /// True between a successful [Storage::start] and [Storage::stop]
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Build the connection pool and spawn the background driver.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut state = self.inner.state.write();
        match &*state {
            State::Running(_) => return Err(LifecycleError::AlreadyRunning),
            State::Stopped(_) => return Err(LifecycleError::Stopped),
            State::Created => {}
        }

        let client = reqwest::Client::builder()
            .timeout(self.inner.config.timeout())
            .build()?;

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(
            self.inner.credentials.clone(),
            self.inner.config.token_refresh(),
            cancel.clone(),
        ));

        *state = State::Running(Running {
            executor: Arc::new(RequestExecutor::new(
                client,
                self.inner.config.endpoint.clone(),
                self.inner.credentials.clone(),
            )),
            cancel,
            tracker: TaskTracker::new(),
            driver,
        });

        info!(endpoint = %self.inner.config.endpoint, "Storage client started");
        Ok(())
    }

    /// Abort in-flight calls, wait for them to drain and release the
    /// connection pool. Stopping a stopped client only waits for that drain.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let (running, tracker) = {
            let mut state = self.inner.state.write();
            match std::mem::replace(&mut *state, State::Stopped(None)) {
                State::Running(running) => {
                    running.cancel.cancel();
                    running.tracker.close();

                    let tracker = running.tracker.clone();
                    *state = State::Stopped(Some(tracker.clone()));
                    (Some(running), tracker)
                }
                State::Stopped(Some(tracker)) => {
                    *state = State::Stopped(Some(tracker.clone()));
                    (None, tracker)
                }
                State::Created | State::Stopped(None) => return Ok(()),
            }
        };

        debug!(in_flight = tracker.len(), "Waiting for in-flight calls to drain");
        tracker.wait().await;

        let Some(running) = running else {
            return Ok(());
        };

        let joined = running.driver.await;
        drop(running.executor);

        info!("Storage client stopped");
        joined.map_err(|error| LifecycleError::Driver(error.to_string()))
    }

    /// Produce a signed URL for an arbitrary [SignedUrlRequest].
    pub async fn sign(&self, request: SignedUrlRequest) -> Result<Url, StorageError> {
        let fail = |kind: ErrorKind| {
            StorageError::new(Operation::SignUrl, request.bucket(), request.object(), kind)
        };

        request.validate().map_err(fail)?;

        let identity = self
            .inner
            .credentials
            .signing_identity()
            .await
            .map_err(|error| fail(error.into()))?;

        let url = self.inner.signer.sign(&request, &identity).map_err(fail)?;
        debug!(
            storage.bucket = %request.bucket(),
            action = %request.action(),
            expires_in = request.expiration().as_secs(),
            "Signed URL"
        );
        Ok(url)
    }

    /// Run `call` against the executor of a running client, aborting it if the
    /// client is stopped first.
    async fn dispatch<F, Fut>(
        &self,
        operation: Operation,
        object: &Object,
        bucket: &Bucket,
        call: F,
    ) -> Result<(), StorageError>
    where
        F: FnOnce(Arc<RequestExecutor<P>>) -> Fut,
        Fut: Future<Output = Result<(), ErrorKind>>,
    {
        let fail = |kind: ErrorKind| StorageError::new(operation, bucket, object, kind);

        bucket.validate().map_err(fail)?;
        object.validate().map_err(fail)?;

        let (executor, cancel, token) = match &*self.inner.state.read() {
            State::Running(running) => (
                running.executor.clone(),
                running.cancel.clone(),
                running.tracker.token(),
            ),
            State::Created | State::Stopped(_) => return Err(fail(ErrorKind::NotRunning)),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ErrorKind::Cancelled),
            result = call(executor) => result,
        };
        drop(token);

        result.map_err(fail)
    }
}

#[async_trait]
impl<P> StorageBackend for Storage<P>
where
    P: CredentialProvider + 'static,
{
    async fn insert(
        &self,
        data: Bytes,
        content_type: &str,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<(), StorageError> {
        self.dispatch(Operation::Insert, object, bucket, |executor| async move {
            executor.insert(data, content_type, object, bucket).await
        })
        .await
    }

    async fn delete(&self, object: &Object, bucket: &Bucket) -> Result<(), StorageError> {
        self.dispatch(Operation::Delete, object, bucket, |executor| async move {
            executor.delete(object, bucket).await
        })
        .await
    }

    async fn generate_signed_url(
        &self,
        action: SignedAction,
        expiration: Duration,
        object: &Object,
        bucket: &Bucket,
    ) -> Result<Url, StorageError> {
        self.sign(SignedUrlRequest::new(
            action,
            expiration,
            object.clone(),
            bucket.clone(),
        ))
        .await
    }
}

/// Background task owned by a running client. Keeps the bearer token warm
/// when a refresh interval is configured, otherwise just waits to be
/// cancelled.
async fn drive<P>(credentials: Arc<P>, refresh: Option<Duration>, cancel: CancellationToken)
where
    P: CredentialProvider,
{
    let Some(period) = refresh else {
        cancel.cancelled().await;
        return;
    };

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(interval_secs = period.as_secs(), "Token refresh driver started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = credentials.bearer_token() => match result {
                        Ok(_) => debug!("Refreshed bearer token"),
                        Err(error) => warn!(%error, "Failed to refresh bearer token"),
                    },
                }
            }
        }
    }

    debug!("Token refresh driver stopped");
}

impl<P> std::fmt::Debug for Storage<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.read() {
            State::Created => LifecycleState::Created,
            State::Running(_) => LifecycleState::Running,
            State::Stopped(_) => LifecycleState::Stopped,
        };

        f.debug_struct("Storage")
            .field("endpoint", &self.inner.config.endpoint.as_str())
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
