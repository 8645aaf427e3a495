//! Response bodies produced by the retention layer.
//!
//! [`RetentionBody`] has three shapes:
//!
//! - **replay**: a retained body emitted as a single data frame;
//! - **passthrough**: the handler's body, untouched (skipped requests,
//!   upgrades, responses whose body was already complete);
//! - **capture**: a wiretap around the handler's body. Each frame is handed to
//!   the caller in the same poll it is produced, and data frames are also
//!   appended to an accumulator. When the handler's body reaches end of
//!   stream the accumulated bytes are stored, and only then is end of stream
//!   reported to the caller. A body of known length completes on its last
//!   data frame instead; that frame is held back until the store finishes.
//!
//! A capture that errors, overflows the configured size cap, or is dropped
//! before end of stream stores nothing, so truncated bodies are never
//! replayed.

use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::future::{BoxFuture, FutureExt};
use http_body::{Body, Frame, SizeHint};

use crate::layer::BoxError;
use crate::policy::RetentionPolicy;

type StoreFn = Box<dyn FnOnce(Bytes) -> BoxFuture<'static, ()> + Send>;
type AbandonFn = Box<dyn FnOnce(&'static str) + Send>;

/// Deferred hand-off of a captured body to storage.
///
/// Exactly one of `store` or `abandon` runs for every commit.
pub(crate) struct Commit {
    store: StoreFn,
    abandon: AbandonFn,
}

impl Commit {
    pub(crate) fn new<F, A>(store: F, abandon: A) -> Self
    where
        F: FnOnce(Bytes) -> BoxFuture<'static, ()> + Send + 'static,
        A: FnOnce(&'static str) + Send + 'static,
    {
        Self {
            store: Box::new(store),
            abandon: Box::new(abandon),
        }
    }

    fn store(self, body: Bytes) -> BoxFuture<'static, ()> {
        (self.store)(body)
    }

    fn abandon(self, reason: &'static str) {
        (self.abandon)(reason)
    }
}

/// Body type returned by [`RetentionService`](crate::layer::RetentionService).
pub struct RetentionBody<B> {
    kind: Kind<B>,
}

enum Kind<B> {
    Replay(Option<Bytes>),
    Passthrough(Pin<Box<B>>),
    Capture(Capture<B>),
}

struct Capture<B> {
    inner: Pin<Box<B>>,
    buffer: BytesMut,
    policy: RetentionPolicy,
    commit: Option<Commit>,
    storing: Option<BoxFuture<'static, ()>>,
    // Last data frame, released once `storing` completes.
    held: Option<Frame<Bytes>>,
    // Body length known up front, from an exact size hint or `content-length`.
    expected: Option<u64>,
    seen: u64,
    stored: bool,
    finished: bool,
}

impl<B> RetentionBody<B> {
    /// A body replaying `bytes` from storage.
    pub fn replay(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Replay(Some(bytes)),
        }
    }

    /// Wraps `inner` without observing it.
    pub fn passthrough(inner: B) -> Self {
        Self {
            kind: Kind::Passthrough(Box::pin(inner)),
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self.kind, Kind::Replay(_))
    }

    pub fn is_capture(&self) -> bool {
        matches!(self.kind, Kind::Capture(_))
    }
}

impl<B> RetentionBody<B>
where
    B: Body,
{
    /// Wiretaps `inner`. `declared_len` is the response's `content-length`,
    /// used when the body itself does not report an exact size.
    pub(crate) fn capture(
        inner: B,
        policy: RetentionPolicy,
        declared_len: Option<u64>,
        commit: Commit,
    ) -> Self {
        let expected = inner.size_hint().exact().or(declared_len);
        Self {
            kind: Kind::Capture(Capture {
                inner: Box::pin(inner),
                buffer: BytesMut::new(),
                policy,
                commit: Some(commit),
                storing: None,
                held: None,
                expected,
                seen: 0,
                stored: false,
                finished: false,
            }),
        }
    }
}

impl<B> fmt::Debug for RetentionBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Replay(_) => "replay",
            Kind::Passthrough(_) => "passthrough",
            Kind::Capture(_) => "capture",
        };
        f.debug_struct("RetentionBody")
            .field("kind", &kind)
            .finish()
    }
}

impl<B> Capture<B> {
    fn record(&mut self, data: &Bytes) {
        self.seen += data.len() as u64;
        if self.commit.is_none() {
            return;
        }
        if !self.policy.body_fits(self.buffer.len() + data.len()) {
            self.buffer = BytesMut::new();
            self.abandon("body exceeds max_body_size");
            return;
        }
        self.buffer.extend_from_slice(data);
    }

    fn begin_store(&mut self) {
        if let Some(commit) = self.commit.take() {
            let body = self.buffer.split().freeze();
            self.storing = Some(commit.store(body));
        }
    }

    fn abandon(&mut self, reason: &'static str) {
        if let Some(commit) = self.commit.take() {
            commit.abandon(reason);
        }
    }
}

impl<B> Capture<B>
where
    B: Body,
{
    /// Every data byte the body will produce has been seen.
    fn body_complete(&self) -> bool {
        self.inner.is_end_stream() || self.expected.is_some_and(|len| self.seen >= len)
    }

    fn is_end_stream(&self) -> bool {
        self.finished || (self.stored && self.held.is_none() && self.body_complete())
    }
}

impl<B> Capture<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    fn poll_frame(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        loop {
            if let Some(storing) = self.storing.as_mut() {
                ready!(storing.poll_unpin(cx));
                self.storing = None;
                self.stored = true;
                match self.held.take() {
                    Some(frame) => return Poll::Ready(Some(Ok(frame))),
                    None => self.finished = true,
                }
            }

            if self.finished {
                return Poll::Ready(None);
            }

            match ready!(self.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        self.record(data);
                    }
                    // Servers that know the length stop polling after the
                    // last byte, so the store runs before that frame leaves.
                    if self.commit.is_some() && frame.is_data() && self.body_complete() {
                        self.begin_store();
                        self.held = Some(frame);
                        continue;
                    }
                    return Poll::Ready(Some(Ok(frame)));
                }
                Some(Err(err)) => {
                    self.abandon("handler body failed");
                    return Poll::Ready(Some(Err(err.into())));
                }
                None => {
                    if self.commit.is_some() {
                        self.begin_store();
                    } else {
                        self.finished = true;
                    }
                }
            }
        }
    }
}

impl<B> Drop for Capture<B> {
    fn drop(&mut self) {
        self.abandon("body dropped before end of stream");
    }
}

impl<B> Body for RetentionBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Replay(bytes) => match bytes.take() {
                Some(bytes) if !bytes.is_empty() => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                _ => Poll::Ready(None),
            },
            Kind::Passthrough(inner) => inner
                .as_mut()
                .poll_frame(cx)
                .map(|frame| frame.map(|result| result.map_err(Into::into))),
            Kind::Capture(capture) => capture.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Replay(bytes) => bytes.as_ref().map_or(true, Bytes::is_empty),
            Kind::Passthrough(inner) => inner.is_end_stream(),
            Kind::Capture(capture) => capture.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Replay(bytes) => {
                SizeHint::with_exact(bytes.as_ref().map_or(0, |bytes| bytes.len() as u64))
            }
            Kind::Passthrough(inner) => inner.size_hint(),
            Kind::Capture(capture) => match &capture.held {
                Some(frame) => {
                    let held = frame.data_ref().map_or(0, |data| data.len() as u64);
                    let inner = capture.inner.size_hint();
                    let mut hint = SizeHint::new();
                    hint.set_lower(inner.lower() + held);
                    if let Some(upper) = inner.upper() {
                        hint.set_upper(upper + held);
                    }
                    hint
                }
                None => capture.inner.size_hint(),
            },
        }
    }
}
