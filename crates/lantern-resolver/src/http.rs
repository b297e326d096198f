use crate::backend::{
    follow_response_path, BackendConfig, EndpointConfig, IdDispatch, ResolverBackend,
};
use crate::error::{ResolverError, Result};
use async_trait::async_trait;
use lantern_core::ResourceKind;
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Detached signature attached to outgoing requests as the `keys` query
/// parameter.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSignature {
    pub signature: String,
    pub public_key: String,
}

/// Signs request payloads for backends that require authenticated queries.
///
/// Key management and the signature algorithm are the caller's concern;
/// the resolver only transports the result.
#[async_trait]
pub trait RequestSigner: Send + Sync + 'static {
    async fn sign(&self, payload: &str) -> Result<RequestSignature>;
}

/// HTTP implementation of [`ResolverBackend`].
///
/// One generic request routine driven entirely by the [`BackendConfig`]:
/// the query parameter names, id dispatch style, and response-extraction
/// paths are data. Requests always ask intermediaries to revalidate, since
/// the resolution cache is the sole cache authority.
pub struct HttpResolverBackend {
    config: BackendConfig,
    http: reqwest::Client,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl HttpResolverBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ResolverError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            signer: None,
        })
    }

    /// Attaches a signer for backends whose config sets `sign_request`.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn endpoint_url(&self, endpoint: &EndpointConfig) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ResolverError::InvalidConfig(format!("bad base url: {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                ResolverError::InvalidConfig("base url cannot carry a path".to_owned())
            })?;
            segments.pop_if_empty();
            segments.extend(endpoint.path.split('/').filter(|part| !part.is_empty()));
        }
        Ok(url)
    }

    async fn sign_query(&self, url: &mut Url) -> Result<()> {
        if !self.config.sign_request {
            return Ok(());
        }
        let Some(signer) = &self.signer else {
            return Err(ResolverError::Signing(format!(
                "backend '{}' requires signed requests but no signer is configured",
                self.config.name
            )));
        };

        let payload = url.query().unwrap_or("").to_owned();
        let signature = signer.sign(&payload).await?;
        let keys = serde_json::to_string(&signature)
            .map_err(|e| ResolverError::Signing(e.to_string()))?;
        url.query_pairs_mut().append_pair("keys", &keys);
        Ok(())
    }

    async fn fetch(&self, endpoint: &EndpointConfig, param_value: &str) -> Result<reqwest::Response> {
        let mut url = self.endpoint_url(endpoint)?;
        url.query_pairs_mut().append_pair(&endpoint.param, param_value);
        self.sign_query(&mut url).await?;

        trace!(url = %url, "sending resolver request");
        self.http
            .get(url)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await
            .map_err(|e| ResolverError::Http(e.to_string()))
    }

    async fn read_body(&self, response: reqwest::Response, endpoint: &EndpointConfig) -> Result<Value> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| ResolverError::UnexpectedResponse(e.to_string()))?;
        follow_response_path(body, &endpoint.response_path).ok_or_else(|| {
            ResolverError::UnexpectedResponse(
                "response body is missing the configured path".to_owned(),
            )
        })
    }
}

#[async_trait]
impl ResolverBackend for HttpResolverBackend {
    fn dispatch(&self, kind: ResourceKind) -> IdDispatch {
        self.config.endpoint(kind).dispatch
    }

    async fn resolve_group(
        &self,
        kind: ResourceKind,
        ids: &[String],
    ) -> Result<HashMap<String, Option<String>>> {
        let endpoint = self.config.endpoint(kind);
        let IdDispatch::Joined { separator } = endpoint.dispatch else {
            return Err(ResolverError::InvalidConfig(format!(
                "endpoint for {kind} requires one request per id"
            )));
        };

        let joined = ids.join(&separator.to_string());
        let response = self.fetch(endpoint, &joined).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::Status(status.as_u16()));
        }

        let mapping = self.read_body(response, endpoint).await?;
        let mapping = mapping.as_object().ok_or_else(|| {
            ResolverError::UnexpectedResponse("expected an object of id to locator".to_owned())
        })?;

        // An id the backend left out or mapped to null has no locator; both
        // are definitive negatives here.
        let mut results = HashMap::with_capacity(ids.len());
        for id in ids {
            let locator = mapping
                .get(id)
                .and_then(Value::as_str)
                .map(str::to_owned);
            results.insert(id.clone(), locator);
        }

        debug!(
            kind = %kind,
            requested = ids.len(),
            found = results.values().filter(|v| v.is_some()).count(),
            "resolved id group"
        );
        Ok(results)
    }

    async fn resolve_single(&self, kind: ResourceKind, id: &str) -> Result<Option<String>> {
        let endpoint = self.config.endpoint(kind);
        let response = self.fetch(endpoint, id).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // The one status that means "definitively absent" rather than
            // "try again later".
            debug!(kind = %kind, id = %id, "backend reported id not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ResolverError::Status(status.as_u16()));
        }

        let value = self.read_body(response, endpoint).await?;
        match value {
            Value::String(locator) => Ok(Some(locator)),
            Value::Null => Ok(None),
            other => Err(ResolverError::UnexpectedResponse(format!(
                "expected a locator string, got {other}"
            ))),
        }
    }
}
