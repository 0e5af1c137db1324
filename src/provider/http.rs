//! HTTP provider implementation.
//!
//! Bridges resource operations to a REST provisioning service:
//!
//! - `POST   {endpoint}/resources/{kind}`
//! - `PUT    {endpoint}/resources/{kind}/{identity}`
//! - `DELETE {endpoint}/resources/{kind}/{identity}`

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::Attributes;
use crate::error::{ProviderError, Result, StratumError};

use super::{ProviderResource, ProviderResult, ResourceProvider};

/// Request body sent on create and update.
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    attributes: &'a Attributes,
}

/// Response body returned on create and update.
#[derive(Debug, Deserialize)]
struct ResourceResponse {
    identity: Option<String>,
    #[serde(default)]
    attributes: Attributes,
}

/// Provider talking to a REST provisioning service.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpProvider {
    /// Creates a provider for `endpoint` with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP
    /// client cannot be created.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StratumError::internal(format!("Invalid provider endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StratumError::internal(format!(
                "Provider endpoint '{endpoint}' cannot be used as a base URL"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StratumError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn resource_url(&self, kind: &str, identity: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("resources").push(kind);
            if let Some(identity) = identity {
                segments.push(identity);
            }
        }
        url
    }

    /// Sends a request and classifies any failure.
    async fn send(&self, request: RequestBuilder, target: &str) -> ProviderResult<Response> {
        let request = match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("Request to {target} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                identity: target.to_string(),
            });
        }

        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            let retry_after_ms = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transient {
                message: format!("{target} returned {status}: {body}"),
                retry_after_ms,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::permanent(format!("{target} returned {status}: {body}")))
    }

    async fn parse(response: Response, target: &str) -> ProviderResult<ResourceResponse> {
        response
            .json::<ResourceResponse>()
            .await
            .map_err(|e| ProviderError::permanent(format!("Malformed response from {target}: {e}")))
    }
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(&self, kind: &str, attributes: &Attributes) -> ProviderResult<ProviderResource> {
        let url = self.resource_url(kind, None);
        trace!("POST {url}");

        let response = self
            .send(self.client.post(url).json(&ResourceRequest { attributes }), kind)
            .await?;
        let body = Self::parse(response, kind).await?;

        let identity = body
            .identity
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::permanent(format!("Create of {kind} returned no identity")))?;

        debug!("Provider created {kind} as {identity}");
        Ok(ProviderResource {
            identity,
            outputs: body.attributes,
        })
    }

    async fn update(
        &self,
        identity: &str,
        kind: &str,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResource> {
        let url = self.resource_url(kind, Some(identity));
        trace!("PUT {url}");

        let response = self
            .send(self.client.put(url).json(&ResourceRequest { attributes }), identity)
            .await?;
        let body = Self::parse(response, identity).await?;

        Ok(ProviderResource {
            identity: body.identity.unwrap_or_else(|| identity.to_string()),
            outputs: body.attributes,
        })
    }

    async fn delete(&self, identity: &str, kind: &str) -> ProviderResult<()> {
        let url = self.resource_url(kind, Some(identity));
        trace!("DELETE {url}");

        self.send(self.client.delete(url), identity).await?;
        debug!("Provider deleted {kind} {identity}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttributeValue;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn attrs() -> Attributes {
        Attributes::from([(String::from("name"), AttributeValue::from("lake-logs"))])
    }

    #[tokio::test]
    async fn test_create_posts_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/log_group"))
            .and(body_json(json!({"attributes": {"name": "lake-logs"}})))
            .and(header_matcher("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "identity": "lg-123",
                "attributes": {"arn": "arn:lg-123"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider").with_token("secret");
        let created = provider.create("log_group", &attrs()).await.expect("create");

        assert_eq!(created.identity, "lg-123");
        assert_eq!(created.outputs.get("arn").and_then(AttributeValue::as_str), Some("arn:lg-123"));
    }

    #[tokio::test]
    async fn test_update_keeps_identity_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resources/log_group/lg-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"attributes": {}})))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider");
        let updated = provider.update("lg-123", "log_group", &attrs()).await.expect("update");
        assert_eq!(updated.identity, "lg-123");
    }

    #[tokio::test]
    async fn test_throttling_is_transient_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider");
        let err = provider.create("log_group", &attrs()).await.expect_err("throttled");

        assert!(err.is_transient());
        assert_eq!(err.retry_after_ms(), Some(2000));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider");
        let err = provider.update("x", "log_group", &attrs()).await.expect_err("unavailable");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("name too long"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider");
        let err = provider.create("log_group", &attrs()).await.expect_err("rejected");

        assert!(matches!(err, ProviderError::Permanent { ref message } if message.contains("name too long")));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/log_group/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider");
        let err = provider.delete("gone", "log_group").await.expect_err("missing");
        assert_eq!(err, ProviderError::NotFound { identity: String::from("gone") });
    }

    #[tokio::test]
    async fn test_malformed_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), 5).expect("provider");
        let err = provider.create("log_group", &attrs()).await.expect_err("malformed");
        assert!(matches!(err, ProviderError::Permanent { .. }));
    }

    #[test]
    fn test_identity_is_path_encoded() {
        let provider = HttpProvider::new("http://localhost:9000/api/", 5).expect("provider");
        let url = provider.resource_url("iam_role", Some("role/with space"));
        assert_eq!(url.as_str(), "http://localhost:9000/api/resources/iam_role/role%2Fwith%20space");
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        assert!(HttpProvider::new("not a url", 5).is_err());
    }
}
