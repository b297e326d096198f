//! Core types and the locator grammar for the Lantern resolver.
//!
//! This crate provides the shared value types used by the cache and
//! resolver crates, plus the parser/builder for the decentralized
//! platform's addressing scheme. It performs no I/O.

pub mod descriptor;
pub mod locator;

pub use descriptor::{ResolvedLocator, ResourceDescriptor, ResourceKind};
pub use locator::{Modifier, PathSegment, SegmentKind};
