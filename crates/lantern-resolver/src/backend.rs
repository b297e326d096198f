use crate::error::{ResolverError, Result};
use async_trait::async_trait;
use lantern_core::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How a backend endpoint accepts identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdDispatch {
    /// All ids of a group joined into one query parameter value.
    Joined { separator: char },
    /// One request per id.
    Single,
}

/// One step of the response-extraction path.
///
/// A small interpreted language instead of per-backend code branches:
/// descend into a field, or replace an object with its keys or values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStep {
    Field(String),
    Keys,
    Values,
}

/// Walks `steps` over a JSON response body.
///
/// Returns `None` when the declared path does not exist in the body,
/// which callers treat as an unexpected response rather than a negative
/// result.
pub fn follow_response_path(value: Value, steps: &[ResponseStep]) -> Option<Value> {
    let mut current = value;
    for step in steps {
        current = match step {
            ResponseStep::Field(name) => current.get(name.as_str())?.clone(),
            ResponseStep::Keys => Value::Array(
                current
                    .as_object()?
                    .keys()
                    .map(|key| Value::String(key.clone()))
                    .collect(),
            ),
            ResponseStep::Values => Value::Array(current.as_object()?.values().cloned().collect()),
        };
    }
    Some(current)
}

/// Request/response shape for one resource kind on one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path appended to the backend base URL.
    pub path: String,
    /// Query parameter the ids are sent under.
    pub param: String,
    pub dispatch: IdDispatch,
    /// Steps from the response body root to the id → locator mapping
    /// (joined dispatch) or to the locator value (single dispatch).
    pub response_path: Vec<ResponseStep>,
}

/// Static description of one resolver backend.
///
/// Selected by name from the built-in registry and never mutated at
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub base_url: String,
    /// Whether requests must carry a detached signature parameter.
    pub sign_request: bool,
    pub video: EndpointConfig,
    pub channel: EndpointConfig,
}

impl BackendConfig {
    pub fn endpoint(&self, kind: ResourceKind) -> &EndpointConfig {
        match kind {
            ResourceKind::Video => &self.video,
            ResourceKind::Channel => &self.channel,
        }
    }

    /// The Odysee public resolver: batched ids, unsigned requests.
    pub fn odysee() -> Self {
        Self {
            name: "odysee".to_owned(),
            base_url: "https://api.odysee.com/yt".to_owned(),
            sign_request: false,
            video: EndpointConfig {
                path: "resolve".to_owned(),
                param: "video_ids".to_owned(),
                dispatch: IdDispatch::Joined { separator: ',' },
                response_path: vec![
                    ResponseStep::Field("data".to_owned()),
                    ResponseStep::Field("videos".to_owned()),
                ],
            },
            channel: EndpointConfig {
                path: "resolve".to_owned(),
                param: "channel_ids".to_owned(),
                dispatch: IdDispatch::Joined { separator: ',' },
                response_path: vec![
                    ResponseStep::Field("data".to_owned()),
                    ResponseStep::Field("channels".to_owned()),
                ],
            },
        }
    }

    /// The Finder resolver: same wire shape as Odysee, but requests are
    /// signed.
    pub fn finder() -> Self {
        Self {
            name: "finder".to_owned(),
            base_url: "https://finder.madiator.com/api/v1".to_owned(),
            sign_request: true,
            ..Self::odysee()
        }
    }

    /// Looks up a built-in backend by its user-facing name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "odysee" => Ok(Self::odysee()),
            "finder" => Ok(Self::finder()),
            other => Err(ResolverError::UnknownBackend(other.to_owned())),
        }
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["odysee", "finder"]
    }
}

/// A remote lookup API translating external ids into locators.
#[async_trait]
pub trait ResolverBackend: Send + Sync + 'static {
    /// How ids of `kind` are dispatched to this backend.
    fn dispatch(&self, kind: ResourceKind) -> IdDispatch;

    /// Resolves a group of ids in a single request.
    ///
    /// The returned map has an entry for every requested id; `None` means
    /// the backend definitively knows no locator (a cacheable negative).
    async fn resolve_group(
        &self,
        kind: ResourceKind,
        ids: &[String],
    ) -> Result<HashMap<String, Option<String>>>;

    /// Resolves a single id.
    ///
    /// `Ok(None)` is a definitive negative; transport and server failures
    /// are `Err` and safe to retry.
    async fn resolve_single(&self, kind: ResourceKind, id: &str) -> Result<Option<String>>;
}
