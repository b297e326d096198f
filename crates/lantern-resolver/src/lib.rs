//! Identifier resolution against a remote lookup backend.
//!
//! The [`BatchResolver`] is the primary API surface: it checks the
//! resolution cache, groups the misses into chunked per-kind requests
//! against a pluggable [`ResolverBackend`], writes results (negatives
//! included) back to the cache, and reports progress. Concurrent lookups
//! of the same id are coalesced by [`SingleFlight`].
//!
//! Backend wire shapes are data, not code: a [`BackendConfig`] describes
//! the query parameter, id dispatch style, and response-extraction path
//! for each resource kind, and one generic HTTP routine interprets it.

pub mod backend;
pub mod error;
pub mod http;
pub mod resolver;
pub mod single_flight;

pub use backend::{
    follow_response_path, BackendConfig, EndpointConfig, IdDispatch, ResolverBackend, ResponseStep,
};
pub use error::{ResolverError, Result};
pub use http::{HttpResolverBackend, RequestSignature, RequestSigner};
pub use resolver::{BatchResolver, DEFAULT_CHUNK_SIZE};
pub use single_flight::SingleFlight;
