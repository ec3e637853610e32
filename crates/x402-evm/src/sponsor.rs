//! Paymaster client for sponsored (gasless) settlement.
//!
//! On BNB Smart Chain the facilitator prefers to settle through a paymaster:
//! the transfer transaction is submitted with `gasPrice = 0` and the
//! paymaster covers the gas under a sponsorship policy. Before submitting,
//! the facilitator asks the paymaster whether the fully-formed call is
//! sponsorable; a negative or failed answer routes settlement to the direct
//! path instead.

use alloy::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use url::Url;

/// The only chain the paymaster sponsors.
pub const SPONSORED_CHAIN_ID: u64 = 56;

/// Client for the sponsorship validation endpoint.
#[derive(Clone, Debug)]
pub struct SponsorClient {
    url: Url,
    policy_uuid: String,
    client: reqwest::Client,
}

/// A candidate transaction submitted for sponsorship validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorCandidate {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    /// Always `"0"`: the paymaster pays for gas.
    pub gas_price: String,
    pub policy_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorVerdict {
    sponsorable: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Errors from talking to the paymaster.
#[derive(Debug, thiserror::Error)]
pub enum SponsorError {
    #[error("paymaster request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("paymaster answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl SponsorClient {
    pub fn new(url: Url, policy_uuid: String) -> Self {
        Self {
            url,
            policy_uuid,
            client: reqwest::Client::new(),
        }
    }

    pub fn policy_uuid(&self) -> &str {
        &self.policy_uuid
    }

    /// Asks the paymaster whether the candidate call is sponsorable.
    ///
    /// Any transport failure is surfaced as an error; the caller treats it
    /// the same as "not sponsorable" and falls through to direct settlement.
    pub async fn validate(
        &self,
        chain_id: u64,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<bool, SponsorError> {
        let candidate = SponsorCandidate {
            chain_id,
            from,
            to,
            data,
            gas_price: "0".to_string(),
            policy_uuid: self.policy_uuid.clone(),
        };
        let response = self.client.post(self.url.clone()).json(&candidate).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SponsorError::Status { status, body });
        }
        let verdict: SponsorVerdict = response.json().await?;
        if !verdict.sponsorable {
            tracing::debug!(reason = ?verdict.reason, "paymaster declined sponsorship");
        }
        Ok(verdict.sponsorable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn validate_reports_sponsorable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sponsorable": true
            })))
            .mount(&server)
            .await;

        let url: Url = format!("{}/validate", server.uri()).parse().unwrap();
        let client = SponsorClient::new(url, "policy-1".into());
        let sponsorable = client
            .validate(
                56,
                Address::ZERO,
                Address::ZERO,
                Bytes::from(vec![1, 2, 3]),
            )
            .await
            .unwrap();
        assert!(sponsorable);
    }

    #[tokio::test]
    async fn validate_reports_declined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sponsorable": false,
                "reason": "policy exhausted"
            })))
            .mount(&server)
            .await;

        let url: Url = format!("{}/validate", server.uri()).parse().unwrap();
        let client = SponsorClient::new(url, "policy-1".into());
        let sponsorable = client
            .validate(56, Address::ZERO, Address::ZERO, Bytes::new())
            .await
            .unwrap();
        assert!(!sponsorable);
    }

    #[tokio::test]
    async fn validate_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url: Url = format!("{}/validate", server.uri()).parse().unwrap();
        let client = SponsorClient::new(url, "policy-1".into());
        let result = client
            .validate(56, Address::ZERO, Address::ZERO, Bytes::new())
            .await;
        assert!(matches!(result, Err(SponsorError::Status { status: 500, .. })));
    }
}
