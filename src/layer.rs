use std::error::Error as StdError;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::CONTENT_LENGTH;
use http::{HeaderName, Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use tower::{Layer, Service};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::memory::InMemoryStorage;
use crate::backend::{ResponseStorage, RetainedResponse};
use crate::capture::{Commit, RetentionBody};
use crate::error::RetentionError;
use crate::key::KeyDeriver;
use crate::logging::{RetentionEvent, RetentionEventType};
use crate::policy::{RetentionPolicy, Skipper};
use crate::request_id::RequestId;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Layer that retains responses and replays them for identical requests.
///
/// On every request the layer derives a fingerprint from the method, URL
/// and headers, and asks the [`ResponseStorage`] for a retained response.
/// A hit is replayed without touching the inner service. A miss calls the
/// inner service once and wiretaps its body; when the body completes, the
/// response is stored under the fingerprint.
///
/// Cloning a `RetentionLayer` is cheap and shares the underlying storage.
#[derive(Clone)]
pub struct RetentionLayer<St> {
    storage: St,
    policy: RetentionPolicy,
    key_deriver: KeyDeriver,
}

/// Builder for configuring [`RetentionLayer`] instances.
pub struct RetentionLayerBuilder<St> {
    storage: St,
    policy: RetentionPolicy,
    key_deriver: KeyDeriver,
}

impl<St> RetentionLayerBuilder<St>
where
    St: ResponseStorage,
{
    pub fn new(storage: St) -> Self {
        Self {
            storage,
            policy: RetentionPolicy::default(),
            key_deriver: KeyDeriver::default(),
        }
    }

    /// Replaces the retention policy with a pre-built value.
    pub fn policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the predicate that bypasses retention for matching requests.
    pub fn skipper(mut self, skipper: Skipper) -> Self {
        self.policy = self.policy.with_skipper(skipper);
        self
    }

    pub fn max_body_size(mut self, size: Option<usize>) -> Self {
        self.policy = self.policy.with_max_body_size(size);
        self
    }

    pub fn key_deriver(mut self, deriver: KeyDeriver) -> Self {
        self.key_deriver = deriver;
        self
    }

    /// Leaves `name` out of request fingerprints.
    pub fn ignore_header(mut self, name: HeaderName) -> Self {
        self.key_deriver = self.key_deriver.ignore_header(name);
        self
    }

    pub fn build(self) -> RetentionLayer<St> {
        RetentionLayer {
            storage: self.storage,
            policy: self.policy,
            key_deriver: self.key_deriver,
        }
    }
}

impl RetentionLayer<InMemoryStorage> {
    /// Creates a retention layer backed by a fresh [`InMemoryStorage`].
    pub fn new_in_memory() -> Self {
        RetentionLayerBuilder::new(InMemoryStorage::new()).build()
    }
}

impl<St> RetentionLayer<St>
where
    St: ResponseStorage,
{
    /// Builds a retention layer with the default policy.
    pub fn new(storage: St) -> Self {
        RetentionLayerBuilder::new(storage).build()
    }

    pub fn builder(storage: St) -> RetentionLayerBuilder<St> {
        RetentionLayerBuilder::new(storage)
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_skipper(mut self, skipper: Skipper) -> Self {
        self.policy = self.policy.clone().with_skipper(skipper);
        self
    }

    pub fn with_key_deriver(mut self, deriver: KeyDeriver) -> Self {
        self.key_deriver = deriver;
        self
    }
}

impl<S, St> Layer<S> for RetentionLayer<St>
where
    St: ResponseStorage,
{
    type Service = RetentionService<S, St>;

    fn layer(&self, inner: S) -> Self::Service {
        RetentionService {
            inner,
            storage: self.storage.clone(),
            policy: self.policy.clone(),
            key_deriver: self.key_deriver.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RetentionService<S, St> {
    inner: S,
    storage: St,
    policy: RetentionPolicy,
    key_deriver: KeyDeriver,
}

/// Request head fields carried into log events.
#[derive(Clone)]
struct RequestContext {
    method: Method,
    uri: Uri,
    request_id: Option<RequestId>,
}

impl RequestContext {
    fn event(&self, event_type: RetentionEventType) -> RetentionEvent {
        RetentionEvent::new(event_type)
            .with_request(&self.method, &self.uri)
            .with_request_id(self.request_id.clone())
    }
}

impl<S, St, ReqBody, ResBody> Service<Request<ReqBody>> for RetentionService<S, St>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
    St: ResponseStorage,
{
    type Response = Response<RetentionBody<ResBody>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The readied service handles this request; a fresh clone takes its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let ctx = RequestContext {
            method: req.method().clone(),
            uri: req.uri().clone(),
            request_id: RequestId::from_headers(req.headers()),
        };

        if self
            .policy
            .should_skip(req.method(), req.uri(), req.headers())
        {
            #[cfg(feature = "metrics")]
            counter!("tower_response_retention.skip").increment(1);
            ctx.event(RetentionEventType::Skip).log();

            return Box::pin(async move {
                let response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
                Ok::<_, BoxError>(response.map(RetentionBody::passthrough))
            });
        }

        let derived = self.key_deriver.derive_for(&req);
        let storage = self.storage.clone();
        let policy = self.policy.clone();

        Box::pin(retain(inner, req, storage, derived, ctx, policy))
    }
}

/// Lookup, then either replay or call `inner` and wiretap its body.
async fn retain<S, St, ReqBody, ResBody>(
    mut inner: S,
    req: Request<ReqBody>,
    storage: St,
    derived: Result<String, RetentionError>,
    ctx: RequestContext,
    policy: RetentionPolicy,
) -> Result<Response<RetentionBody<ResBody>>, BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
    St: ResponseStorage,
{
    let key = match derived {
        Ok(key) => Some(key),
        Err(err) => {
            ctx.event(RetentionEventType::KeyDerivationFailed)
                .with_reason(err.to_string())
                .log();
            None
        }
    };

    if let Some(key) = &key {
        let started = Instant::now();
        match storage.retrieve(key).await {
            Ok(retained) => {
                #[cfg(feature = "metrics")]
                counter!("tower_response_retention.hit").increment(1);
                ctx.event(RetentionEventType::Hit)
                    .with_key(key.as_str())
                    .with_request_id(
                        RequestId::from_headers(&retained.headers).or(ctx.request_id.clone()),
                    )
                    .with_status(retained.status)
                    .with_size(retained.body.len())
                    .with_latency(started.elapsed())
                    .log();
                return replay(retained).map_err(Into::into);
            }
            Err(RetentionError::NotRetained) => {}
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %key, error = %err, "retained response lookup failed");
                #[cfg(not(feature = "tracing"))]
                let _ = err;
            }
        }
    }

    #[cfg(feature = "metrics")]
    counter!("tower_response_retention.miss").increment(1);
    let mut miss = ctx.event(RetentionEventType::Miss);
    if let Some(key) = &key {
        miss = miss.with_key(key.as_str());
    }
    miss.log();

    let response = inner.call(req).await.map_err(Into::<BoxError>::into)?;

    let Some(key) = key else {
        return Ok(response.map(RetentionBody::passthrough));
    };

    let (parts, body) = response.into_parts();

    if parts.status == StatusCode::SWITCHING_PROTOCOLS {
        skipped(&ctx, &key, "protocol upgrade");
        return Ok(Response::from_parts(parts, RetentionBody::passthrough(body)));
    }

    if body.is_end_stream() {
        let retained = RetainedResponse::from_parts(&parts, Bytes::new());
        persist(&storage, key, retained, &ctx).await;
        return Ok(Response::from_parts(parts, RetentionBody::passthrough(body)));
    }

    let declared_len = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let commit = {
        let store_key = key.clone();
        let store_ctx = ctx.clone();
        let status = parts.status;
        let version = parts.version;
        let headers = parts.headers.clone();
        Commit::new(
            move |bytes| -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    let retained = RetainedResponse::new(status, version, headers, bytes);
                    persist(&storage, store_key, retained, &store_ctx).await;
                })
            },
            move |reason| skipped(&ctx, &key, reason),
        )
    };

    Ok(Response::from_parts(
        parts,
        RetentionBody::capture(body, policy, declared_len, commit),
    ))
}

/// Turns a retained response back into a live one.
fn replay<B>(retained: RetainedResponse) -> Result<Response<RetentionBody<B>>, RetentionError> {
    retained.into_response_with(RetentionBody::replay)
}

async fn persist<St>(storage: &St, key: String, retained: RetainedResponse, ctx: &RequestContext)
where
    St: ResponseStorage,
{
    let event = ctx
        .event(RetentionEventType::Store)
        .with_key(key.as_str())
        .with_status(retained.status)
        .with_size(retained.body.len());

    match storage.store(key, retained).await {
        Ok(()) => {
            #[cfg(feature = "metrics")]
            counter!("tower_response_retention.store").increment(1);
            event.log();
        }
        Err(err) => {
            #[cfg(feature = "metrics")]
            counter!("tower_response_retention.store_error").increment(1);
            RetentionEvent {
                event_type: RetentionEventType::StoreFailed,
                ..event
            }
            .with_reason(err.to_string())
            .log();
        }
    }
}

fn skipped(ctx: &RequestContext, key: &str, reason: &'static str) {
    #[cfg(feature = "metrics")]
    counter!("tower_response_retention.store_skipped").increment(1);
    ctx.event(RetentionEventType::StoreSkipped)
        .with_key(key)
        .with_reason(reason)
        .log();
}
