//! Tower Response Retention
//! ========================
//!
//! `tower-response-retention` is a Tower middleware that remembers the
//! responses a service produced and replays them, byte for byte, when an
//! identical request arrives again.
//!
//! Requests are fingerprinted from their method, URL and full header set
//! (see [`key`]). On a miss the inner service runs once and its response body
//! is wiretapped on its way to the caller (see [`capture`]); when the body
//! completes, status, headers and body are stored in a [`ResponseStorage`].
//! On a hit the stored response is replayed and the inner service is never
//! called.
//!
//! ```no_run
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_response_retention::prelude::*;
//!
//! # async fn run() -> Result<(), tower_response_retention::layer::BoxError> {
//! let layer = RetentionLayer::builder(InMemoryStorage::new())
//!     .skipper(Skipper::paths(["/health"]))
//!     .ignore_header(http::HeaderName::from_static("x-request-id"))
//!     .build();
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::<bytes::Bytes>::from("ok")))
//!     }));
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::new(()))
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```
//!
//! Retention is best effort: storage failures are logged and never reach the
//! caller, and nothing is stored unless the handler's body ran to completion.

pub mod backend;
pub mod capture;
pub mod error;
pub mod key;
pub mod layer;
pub mod logging;
pub mod policy;
pub mod prelude;
pub mod request_id;

pub use backend::{ResponseStorage, RetainedResponse};
pub use capture::RetentionBody;
pub use error::RetentionError;
pub use key::{derive_key, KeyDeriver};
pub use layer::{RetentionLayer, RetentionLayerBuilder, RetentionService};
pub use logging::{RetentionEvent, RetentionEventType};
pub use policy::{RetentionPolicy, Skipper};
pub use request_id::RequestId;
