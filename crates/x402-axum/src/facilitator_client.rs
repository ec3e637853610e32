//! A [`Facilitator`] implementation that talks to a remote x402 facilitator
//! over HTTP.
//!
//! The client posts JSON to the facilitator's `/verify`, `/settle`, and
//! `/supported` endpoints. It is cheap to clone and shares a connection pool
//! via `reqwest::Client`, so it can be reused across routes and concurrent
//! requests.
//!
//! An optional API key is sent as `Authorization: Bearer <key>`; arbitrary
//! extra headers can be attached for facilitators with custom auth.

use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use x402_proto::facilitator::Facilitator;
use x402_proto::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// A client for a remote x402 facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Base URL of the facilitator (e.g. `https://facilitator.example/`).
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    /// Extra headers sent with each request (Bearer auth lives here).
    headers: HeaderMap,
    timeout: Option<Duration>,
}

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid API key: not a legal header value")]
    InvalidApiKey,
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl FacilitatorClient {
    /// Constructs a new client from a base URL, deriving the endpoint URLs.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |segment: &str, context: &'static str| {
            base_url
                .join(segment)
                .map_err(|e| FacilitatorClientError::UrlParse { context, source: e })
        };
        let verify_url = join("./verify", "Failed to construct ./verify URL")?;
        let settle_url = join("./settle", "Failed to construct ./settle URL")?;
        let supported_url = join("./supported", "Failed to construct ./supported URL")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            supported_url,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Attaches custom headers to all future requests.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        let mut this = self.clone();
        this.headers = headers;
        this
    }

    /// Sends the API key as `Authorization: Bearer <key>` on every request.
    pub fn with_api_key(&self, api_key: &str) -> Result<Self, FacilitatorClientError> {
        let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| FacilitatorClientError::InvalidApiKey)?;
        let mut this = self.clone();
        this.headers.insert(http::header::AUTHORIZATION, value);
        Ok(this)
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    /// Sends a `POST /verify` request to the facilitator.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(&self.verify_url, "POST /verify", request).await
    }

    /// Sends a `POST /settle` request to the facilitator.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.post_json(&self.settle_url, "POST /settle", request).await
    }

    /// Sends a `POST /supported` request to the facilitator.
    pub async fn supported(
        &self,
    ) -> Result<SupportedPaymentKindsResponse, FacilitatorClientError> {
        self.post_json(&self.supported_url, "POST /supported", &serde_json::json!({}))
            .await
    }

    /// Generic POST helper handling JSON serialization, auth headers, error
    /// mapping, and timeouts.
    ///
    /// `context` is a human-readable identifier used in tracing and error
    /// messages (e.g. `"POST /verify"`).
    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        let status = http_response.status();
        if status == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
        } else {
            // Protocol-level rejections also arrive as structured JSON on
            // 4xx; try to decode before giving up.
            let body = http_response
                .text()
                .await
                .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e })?;
            if status.is_client_error() {
                if let Ok(decoded) = serde_json::from_str::<R>(&body) {
                    return Ok(decoded);
                }
            }
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        FacilitatorClient::verify(self, request).await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        FacilitatorClient::settle(self, request).await
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        FacilitatorClient::supported(self).await
    }
}

/// Converts a string URL into a [`FacilitatorClient`], normalizing trailing
/// slashes so endpoint joins behave.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_proto::ChainId;

    #[test]
    fn derives_endpoint_urls() {
        let client = FacilitatorClient::try_from("https://facilitator.example/api").unwrap();
        assert_eq!(client.verify_url.as_str(), "https://facilitator.example/api/verify");
        assert_eq!(client.settle_url.as_str(), "https://facilitator.example/api/settle");
        assert_eq!(
            client.supported_url.as_str(),
            "https://facilitator.example/api/supported"
        );
    }

    #[tokio::test]
    async fn supported_posts_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/supported"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kinds": [
                    {"x402Version": 2, "scheme": "exact", "network": "eip155:56"}
                ]
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str())
            .unwrap()
            .with_api_key("sekrit")
            .unwrap();
        let supported = client.supported().await.unwrap();
        assert_eq!(supported.kinds.len(), 1);
        assert_eq!(supported.kinds[0].network, ChainId::eip155(56));
    }

    #[tokio::test]
    async fn verify_decodes_structured_rejections_on_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "isValid": false,
                "invalidReason": "insufficient_funds",
                "payer": "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510"
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let request: VerifyRequest = serde_json::from_value(serde_json::json!({
            "paymentPayload": {
                "x402Version": 2,
                "payload": {
                    "signature": format!("0x{}", "ab".repeat(65)),
                    "authorization": {
                        "from": "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510",
                        "to": "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628",
                        "value": "1000",
                        "validAfter": "1700000000",
                        "validBefore": "1700000600",
                        "nonce": format!("0x{}", "11".repeat(32))
                    }
                },
                "accepted": {
                    "scheme": "exact",
                    "network": "eip155:8453",
                    "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                    "payTo": "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628",
                    "amount": "1000",
                    "maxTimeoutSeconds": 600
                }
            },
            "paymentRequirements": {
                "scheme": "exact",
                "network": "eip155:8453",
                "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                "payTo": "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628",
                "amount": "1000",
                "maxTimeoutSeconds": 600
            }
        }))
        .unwrap();
        let response = client.verify(&request).await.unwrap();
        assert!(!response.is_valid());
    }
}
