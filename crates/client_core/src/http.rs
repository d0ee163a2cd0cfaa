//! Request coordinator on top of an [`HttpTransport`].
//!
//! Every logical request goes through the same pipeline: dedup by
//! [`RequestKey`], request interceptors, header resolution, then a bounded
//! retry loop where each attempt is exactly one transport call under a
//! deadline. Error interceptors see the final classified error once.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use shared::error::{ApiError, ErrorKind, CODE_INTERCEPTOR_ERROR, CODE_UNKNOWN_ERROR};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    session::SessionHandler,
    transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse},
};

const CONTENT_TYPE: &str = "content-type";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub parts: Vec<MultipartPart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: value.into().into_bytes(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type,
            data,
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Bytes {
        content_type: String,
        data: Vec<u8>,
    },
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Stable textual identity of the body. Binary payloads hash to SHA-256.
    fn identity(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Json(value) => value.to_string(),
            Self::Bytes { content_type, data } => {
                format!("sha256:{}", digest([content_type.as_bytes(), data.as_slice()]))
            }
            Self::Multipart(form) => {
                let mut chunks: Vec<&[u8]> = Vec::with_capacity(form.parts.len() * 4);
                for part in &form.parts {
                    chunks.push(part.name.as_bytes());
                    chunks.push(part.file_name.as_deref().unwrap_or_default().as_bytes());
                    chunks.push(part.content_type.as_deref().unwrap_or_default().as_bytes());
                    chunks.push(&part.data);
                }
                format!("multipart:{}", digest(chunks))
            }
        }
    }
}

fn digest<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update((chunk.len() as u64).to_le_bytes());
        hasher.update(chunk);
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Identity used for in-flight deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub retry_on_timeout: Option<bool>,
    pub skip_credentials: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            headers: Vec::new(),
            timeout: None,
            retries: None,
            retry_delay: None,
            retry_on_timeout: None,
            skip_credentials: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn bytes(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes {
            content_type: content_type.into(),
            data,
        };
        self
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn retry_on_timeout(mut self, enabled: bool) -> Self {
        self.retry_on_timeout = Some(enabled);
        self
    }

    pub fn skip_credentials(mut self) -> Self {
        self.skip_credentials = true;
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    pub fn key(&self) -> RequestKey {
        RequestKey(format!(
            "{} {} {}",
            self.method,
            self.path,
            self.body.identity()
        ))
    }
}

/// A successful response. Cloning shares the body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    status: u16,
    headers: Arc<Vec<(String, String)>>,
    bytes: Arc<Vec<u8>>,
}

impl ResponseBody {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.bytes).map_err(|err| ApiError::parse(&err))
    }
}

impl From<TransportResponse> for ResponseBody {
    fn from(response: TransportResponse) -> Self {
        Self {
            status: response.status,
            headers: Arc::new(response.headers),
            bytes: Arc::new(response.body),
        }
    }
}

pub type RequestInterceptor =
    Arc<dyn Fn(RequestDescriptor) -> anyhow::Result<RequestDescriptor> + Send + Sync>;
pub type ResponseInterceptor =
    Arc<dyn Fn(TransportResponse) -> anyhow::Result<TransportResponse> + Send + Sync>;
pub type ErrorInterceptor = Arc<dyn Fn(ApiError) -> ApiError + Send + Sync>;

#[derive(Default, Clone)]
struct Interceptors {
    request: Vec<RequestInterceptor>,
    response: Vec<ResponseInterceptor>,
    error: Vec<ErrorInterceptor>,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    retry_on_timeout: bool,
}

impl RetryPolicy {
    fn should_retry(&self, attempt: u32, err: &ApiError) -> bool {
        attempt < self.retries
            && (err.kind().is_transient()
                || (self.retry_on_timeout && err.kind() == ErrorKind::Timeout))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

type SharedOutcome = Shared<BoxFuture<'static, Result<ResponseBody, ApiError>>>;

struct InFlight {
    id: u64,
    outcome: SharedOutcome,
    waiters: usize,
    abort: AbortHandle,
}

struct Inner {
    base_url: String,
    defaults: RetryPolicy,
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionHandler>,
    interceptors: Mutex<Interceptors>,
    in_flight: Mutex<HashMap<RequestKey, InFlight>>,
    next_call_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

impl HttpClient {
    pub fn new(settings: &Settings, session: Arc<dyn SessionHandler>) -> Self {
        Self::with_transport(settings, Arc::new(ReqwestTransport::new()), session)
    }

    pub fn with_transport(
        settings: &Settings,
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: settings.api_url.trim_end_matches('/').to_string(),
                defaults: RetryPolicy {
                    timeout: settings.request_timeout,
                    retries: settings.retries,
                    retry_delay: settings.retry_delay,
                    retry_on_timeout: settings.retry_on_timeout,
                },
                transport,
                session,
                interceptors: Mutex::new(Interceptors::default()),
                in_flight: Mutex::new(HashMap::new()),
                next_call_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn add_request_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(RequestDescriptor) -> anyhow::Result<RequestDescriptor> + Send + Sync + 'static,
    {
        lock(&self.inner.interceptors)
            .request
            .push(Arc::new(interceptor));
    }

    pub fn add_response_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(TransportResponse) -> anyhow::Result<TransportResponse> + Send + Sync + 'static,
    {
        lock(&self.inner.interceptors)
            .response
            .push(Arc::new(interceptor));
    }

    pub fn add_error_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(ApiError) -> ApiError + Send + Sync + 'static,
    {
        lock(&self.inner.interceptors)
            .error
            .push(Arc::new(interceptor));
    }

    /// Number of distinct requests currently on the wire.
    pub fn in_flight_len(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<ResponseBody, ApiError> {
        self.request_with_cancel(descriptor, &CancellationToken::new())
            .await
    }

    /// Like [`HttpClient::request`], but `cancel` detaches this caller.
    ///
    /// When the last caller waiting on a shared call detaches, the call is
    /// aborted.
    pub async fn request_with_cancel(
        &self,
        descriptor: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody, ApiError> {
        if cancel.is_cancelled() {
            return Err(self.inner.apply_error_interceptors(ApiError::cancelled()));
        }

        let key = descriptor.key();
        let (id, outcome) = self.join_or_start(key.clone(), descriptor);
        let waiter = Waiter {
            inner: Arc::clone(&self.inner),
            key,
            id,
        };

        let result = tokio::select! {
            result = outcome => result,
            _ = cancel.cancelled() => {
                debug!(key = waiter.key.as_str(), "http: caller cancelled request");
                Err(self.inner.apply_error_interceptors(ApiError::cancelled()))
            }
        };
        drop(waiter);
        result
    }

    fn join_or_start(&self, key: RequestKey, descriptor: RequestDescriptor) -> (u64, SharedOutcome) {
        let mut table = lock(&self.inner.in_flight);
        if let Some(entry) = table.get_mut(&key) {
            entry.waiters += 1;
            debug!(key = key.as_str(), waiters = entry.waiters, "http: joined in-flight request");
            return (entry.id, entry.outcome.clone());
        }

        let id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let entry_guard = EntryGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            id,
        };
        let handle = tokio::spawn(async move {
            let _entry_guard = entry_guard;
            inner.run(descriptor).await
        });
        let abort = handle.abort_handle();
        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(ApiError::cancelled()),
                Err(err) => Err(ApiError::unknown(
                    CODE_UNKNOWN_ERROR,
                    format!("request task failed: {err}"),
                )),
            }
        }
        .boxed()
        .shared();

        table.insert(
            key,
            InFlight {
                id,
                outcome: outcome.clone(),
                waiters: 1,
                abort,
            },
        );
        (id, outcome)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(RequestDescriptor::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|err| ApiError::parse(&err))?;
        self.request(RequestDescriptor::post(path).json(body))
            .await?
            .json()
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: MultipartForm,
    ) -> Result<T, ApiError> {
        self.request(RequestDescriptor::post(path).multipart(form))
            .await?
            .json()
    }
}

impl Inner {
    async fn run(&self, descriptor: RequestDescriptor) -> Result<ResponseBody, ApiError> {
        self.run_with_retry(descriptor)
            .await
            .map_err(|err| self.apply_error_interceptors(err))
    }

    async fn run_with_retry(&self, descriptor: RequestDescriptor) -> Result<ResponseBody, ApiError> {
        let descriptor = self.apply_request_interceptors(descriptor)?;
        let policy = RetryPolicy {
            timeout: descriptor.timeout.unwrap_or(self.defaults.timeout),
            retries: descriptor.retries.unwrap_or(self.defaults.retries),
            retry_delay: descriptor.retry_delay.unwrap_or(self.defaults.retry_delay),
            retry_on_timeout: descriptor
                .retry_on_timeout
                .unwrap_or(self.defaults.retry_on_timeout),
        };
        let request = self.resolve(descriptor);

        let mut attempt = 0;
        loop {
            match self.attempt(&request, policy.timeout).await {
                Ok(body) => return Ok(body),
                Err(err) if policy.should_retry(attempt, &err) => {
                    let delay = policy.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code = err.code(),
                        "http: retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<ResponseBody, ApiError> {
        let response = match tokio::time::timeout(timeout, self.transport.execute(request.clone()))
            .await
        {
            Err(_) => return Err(ApiError::timeout(timeout)),
            Ok(Err(err)) => return Err(ApiError::network(err.to_string())),
            Ok(Ok(response)) => response,
        };
        let response = self.apply_response_interceptors(response)?;

        if matches!(response.status, 401 | 403) {
            info!(status = response.status, url = %request.url, "http: unauthorized response");
            self.session.on_unauthorized().await;
        }
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body));
        }
        Ok(response.into())
    }

    fn resolve(&self, descriptor: RequestDescriptor) -> TransportRequest {
        let mut headers = descriptor.headers.clone();
        let has_header = |headers: &[(String, String)], name: &str| {
            headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
        };

        match &descriptor.body {
            RequestBody::Multipart(_) => {}
            RequestBody::Bytes { content_type, .. } => {
                if !has_header(&headers, CONTENT_TYPE) {
                    headers.push((CONTENT_TYPE.to_string(), content_type.clone()));
                }
            }
            RequestBody::Empty | RequestBody::Json(_) => {
                if !has_header(&headers, CONTENT_TYPE) {
                    headers.push((CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string()));
                }
            }
        }

        if !descriptor.skip_credentials {
            if let Some(credentials) = self.session.credentials() {
                if !has_header(&headers, &credentials.header) {
                    headers.push((credentials.header, credentials.value));
                }
            }
        }

        let url = if descriptor.path.starts_with("http://") || descriptor.path.starts_with("https://")
        {
            descriptor.path
        } else {
            format!("{}{}", self.base_url, descriptor.path)
        };

        TransportRequest {
            method: descriptor.method,
            url,
            headers,
            body: descriptor.body,
        }
    }

    fn snapshot(&self) -> Interceptors {
        lock(&self.interceptors).clone()
    }

    fn apply_request_interceptors(
        &self,
        mut descriptor: RequestDescriptor,
    ) -> Result<RequestDescriptor, ApiError> {
        for interceptor in self.snapshot().request {
            descriptor = interceptor(descriptor).map_err(|err| {
                ApiError::unknown(
                    CODE_INTERCEPTOR_ERROR,
                    format!("request interceptor failed: {err:#}"),
                )
            })?;
        }
        Ok(descriptor)
    }

    fn apply_response_interceptors(
        &self,
        mut response: TransportResponse,
    ) -> Result<TransportResponse, ApiError> {
        for interceptor in self.snapshot().response {
            response = interceptor(response).map_err(|err| {
                ApiError::unknown(
                    CODE_INTERCEPTOR_ERROR,
                    format!("response interceptor failed: {err:#}"),
                )
            })?;
        }
        Ok(response)
    }

    fn apply_error_interceptors(&self, err: ApiError) -> ApiError {
        self.snapshot()
            .error
            .into_iter()
            .fold(err, |err, interceptor| interceptor(err))
    }

    /// Drops one waiter; the last one out aborts the call.
    fn release(&self, key: &RequestKey, id: u64) {
        let abandoned = {
            let mut table = lock(&self.in_flight);
            match table.get_mut(key) {
                Some(entry) if entry.id == id => {
                    entry.waiters = entry.waiters.saturating_sub(1);
                    if entry.waiters == 0 {
                        table.remove(key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(entry) = abandoned {
            debug!(key = key.as_str(), "http: aborting request with no waiters");
            entry.abort.abort();
        }
    }

    fn remove_settled(&self, key: &RequestKey, id: u64) {
        let mut table = lock(&self.in_flight);
        if table.get(key).is_some_and(|entry| entry.id == id) {
            table.remove(key);
        }
    }
}

struct Waiter {
    inner: Arc<Inner>,
    key: RequestKey,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.id);
    }
}

/// Owned by the call task; clears the table entry however the task ends.
struct EntryGuard {
    inner: Arc<Inner>,
    key: RequestKey,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.inner.remove_settled(&self.key, self.id);
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
