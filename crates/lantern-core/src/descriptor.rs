use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The kind of external resource an identifier refers to.
///
/// Resolver backends expose separate endpoints per kind, so descriptors
/// are grouped by this before a request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Channel,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Video => f.write_str("video"),
            ResourceKind::Channel => f.write_str("channel"),
        }
    }
}

/// An external-platform identifier paired with its resource kind.
///
/// The unit of resolution. Descriptors are created per call and discarded
/// once resolved; they carry no state of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub kind: ResourceKind,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, ResourceKind::Video)
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self::new(id, ResourceKind::Channel)
    }

    /// Serialized parameter set identifying one resolution attempt.
    ///
    /// Concurrent calls that share a signature are coalesced into a single
    /// in-flight request.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

/// A successful resolution of one external identifier.
///
/// Negative results ("this id has no known locator") are never represented
/// by this type; they are absent from result maps and stored in the cache
/// as explicit `None` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocator {
    /// Canonical locator on the decentralized platform.
    pub locator: String,
    pub kind: ResourceKind,
}
