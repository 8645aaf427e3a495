//! Structured retention events.
//!
//! Every decision the layer takes (hit, miss, skip, store) is described by a
//! [`RetentionEvent`] and emitted through `tracing` as a single JSON payload
//! under the `tower_response_retention::events` target, so the events can be
//! filtered and shipped independently of the crate's diagnostics.

use crate::request_id::RequestId;
use http::{Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub const EVENT_TARGET: &str = "tower_response_retention::events";

/// Kinds of retention events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionEventType {
    /// Retained response replayed
    Hit,
    /// No retained response; the inner service ran
    Miss,
    /// Skip predicate matched
    Skip,
    /// Response stored after the handler finished
    Store,
    /// Response not stored (oversized, truncated, upgrade, ...)
    StoreSkipped,
    /// Storage rejected the response
    StoreFailed,
    /// No fingerprint could be derived
    KeyDerivationFailed,
}

/// A single retention decision.
#[derive(Debug, Clone)]
pub struct RetentionEvent {
    pub event_type: RetentionEventType,
    pub key: Option<String>,
    pub request_id: Option<RequestId>,
    pub method: Option<Method>,
    pub uri: Option<Uri>,
    pub status: Option<StatusCode>,
    pub size_bytes: Option<usize>,
    pub latency_us: Option<u64>,
    pub reason: Option<String>,
}

impl RetentionEvent {
    pub fn new(event_type: RetentionEventType) -> Self {
        Self {
            event_type,
            key: None,
            request_id: None,
            method: None,
            uri: None,
            status: None,
            size_bytes: None,
            latency_us: None,
            reason: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_request(mut self, method: &Method, uri: &Uri) -> Self {
        self.method = Some(method.clone());
        self.uri = Some(uri.clone());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size_bytes = Some(size);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_us = Some(latency.as_micros() as u64);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Renders the event as the JSON payload that [`RetentionEvent::log`] emits.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "event": self.event_type,
            "key": self.key,
            "request_id": self.request_id.as_ref().map(RequestId::as_str),
            "method": self.method.as_ref().map(Method::as_str),
            "uri": self.uri.as_ref().map(|u| u.to_string()),
            "status": self.status.map(|s| s.as_u16()),
            "size_bytes": self.size_bytes,
            "latency_us": self.latency_us,
            "reason": self.reason,
        })
    }

    pub fn log(&self) {
        #[cfg(feature = "tracing")]
        {
            let payload = self.to_json();
            match self.event_type {
                RetentionEventType::StoreFailed | RetentionEventType::KeyDerivationFailed => {
                    tracing::warn!(target: EVENT_TARGET, event = %payload)
                }
                _ => tracing::debug!(target: EVENT_TARGET, event = %payload),
            }
        }
    }
}
