//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tower_response_retention::prelude::*;
//! let layer = RetentionLayer::builder(InMemoryStorage::new())
//!     .skipper(Skipper::path_prefixes(["/admin/"]))
//!     .build();
//! # drop(layer);
//! ```

pub use crate::backend::bounded::BoundedMemoryStorage;
pub use crate::backend::memory::InMemoryStorage;
pub use crate::backend::{ResponseStorage, RetainedResponse};
pub use crate::capture::RetentionBody;
pub use crate::error::RetentionError;
pub use crate::key::{derive_key, KeyDeriver};
pub use crate::layer::{RetentionLayer, RetentionLayerBuilder, RetentionService};
pub use crate::policy::{RetentionPolicy, Skipper};
