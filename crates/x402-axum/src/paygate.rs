//! The payment gate: per-request enforcement of x402 payment requirements.
//!
//! For a gated route the gate:
//!
//! 1. answers requests without a payment header with `402 Payment Required`,
//!    as JSON for programmatic clients or an HTML paywall for browsers,
//! 2. decodes the `payment-signature` (V2) or `X-PAYMENT` (legacy) header,
//! 3. selects the single matching requirement by `(scheme, network,
//!    networkId)`,
//! 4. verifies the payment with the facilitator,
//! 5. runs the downstream handler,
//! 6. settles after a successful response and surfaces the receipt in the
//!    `X-PAYMENT-RESPONSE` header. A failed settlement replaces the response
//!    with a 402.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use x402_proto::facilitator::Facilitator;
use x402_proto::types::{
    EvmAddress, PaymentPayload, PaymentRequiredResponse, PaymentRequirements, ResourceInfo,
    SettleResponse, VerifyRequest, VerifyResponse, X402Version,
};
use x402_proto::util::Base64Bytes;

use crate::paywall::{PaywallConfig, render_paywall};

/// Legacy request header carrying the base64 payment payload.
pub const PAYMENT_HEADER_V1: &str = "x-payment";
/// V2 request header carrying the base64 payment payload.
pub const PAYMENT_HEADER_V2: &str = "payment-signature";
/// V2 response header mirroring the 402 body, base64-encoded.
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";
/// Response header carrying the base64 settlement receipt.
pub const PAYMENT_RESPONSE_HEADER: &str = "x-payment-response";

/// Payment enforcement for a single matched route.
pub struct Paygate<F> {
    pub facilitator: F,
    /// Effective requirements for this request, `resource` already filled.
    pub accepts: Arc<Vec<PaymentRequirements>>,
    pub resource: ResourceInfo,
    pub paywall: Arc<PaywallConfig>,
}

/// Why a request was bounced with 402.
#[derive(Debug, thiserror::Error)]
enum PaygateRejection {
    #[error("X-PAYMENT header is required")]
    PaymentHeaderRequired,
    #[error("Invalid or malformed payment header: {0}")]
    InvalidPaymentHeader(String),
    #[error("Unable to find matching payment requirements")]
    NoPaymentMatching,
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),
}

impl<F> Paygate<F>
where
    F: Facilitator,
{
    /// Handles one request against the gate.
    pub async fn handle_request<S>(
        &self,
        inner: S,
        req: Request,
    ) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send,
        S::Future: Send,
    {
        let wants_html = is_browser_request(req.headers());
        match self.handle_request_fallible(inner, req).await {
            Ok(response) => Ok(response),
            Err((rejection, payer)) => Ok(self.payment_required(&rejection, payer, wants_html)),
        }
    }

    async fn handle_request_fallible<S>(
        &self,
        inner: S,
        req: Request,
    ) -> Result<Response, (PaygateRejection, Option<EvmAddress>)>
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send,
        S::Future: Send,
    {
        let header = extract_payment_header(req.headers())
            .ok_or((PaygateRejection::PaymentHeaderRequired, None))?;
        let payload = PaymentPayload::try_from(Base64Bytes::from(header))
            .map_err(|e| (PaygateRejection::InvalidPaymentHeader(e.to_string()), None))?;
        let payer = payload.payer();

        let selected = self
            .select_requirements(&payload)
            .ok_or((PaygateRejection::NoPaymentMatching, Some(payer)))?;

        let verify_request = VerifyRequest {
            x402_version: Some(payload.x402_version),
            payment_payload: payload,
            payment_requirements: selected.clone(),
        };

        let verify_response = self
            .facilitator
            .verify(&verify_request)
            .await
            .map_err(|e| {
                (
                    PaygateRejection::VerificationFailed(e.to_string()),
                    Some(payer),
                )
            })?;
        if let VerifyResponse::Invalid { reason, payer: reported } = verify_response {
            return Err((
                PaygateRejection::VerificationFailed(reason.to_string()),
                reported.or(Some(payer)),
            ));
        }

        let response = run_inner(inner, req).await;

        // Downstream refused the request: the payment must not be captured.
        if response.status().is_client_error() || response.status().is_server_error() {
            return Ok(response);
        }

        let settlement = self
            .facilitator
            .settle(&verify_request)
            .await
            .map_err(|e| (PaygateRejection::SettlementFailed(e.to_string()), Some(payer)))?;
        if !settlement.success {
            let reason = settlement
                .error_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err((
                PaygateRejection::SettlementFailed(reason),
                settlement.payer.or(Some(payer)),
            ));
        }

        let mut response = response;
        match settlement_to_header(&settlement) {
            Ok(header_value) => {
                response
                    .headers_mut()
                    .insert(PAYMENT_RESPONSE_HEADER, header_value);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode settlement response header");
            }
        }
        Ok(response)
    }

    /// Finds the single requirement matching the payload's
    /// `(scheme, network, networkId)` triple.
    fn select_requirements(&self, payload: &PaymentPayload) -> Option<&PaymentRequirements> {
        let scheme = payload.scheme()?;
        let network = payload.network()?;
        let network_id = payload
            .accepted
            .as_ref()
            .and_then(|accepted| accepted.network_id.as_deref());
        self.accepts
            .iter()
            .find(|requirements| requirements.matches(scheme, network, network_id))
    }

    /// Builds the 402 response: JSON body plus the base64 `payment-required`
    /// header, or the HTML paywall for browsers.
    fn payment_required(
        &self,
        rejection: &PaygateRejection,
        payer: Option<EvmAddress>,
        wants_html: bool,
    ) -> Response {
        let body = PaymentRequiredResponse {
            x402_version: X402Version::V2,
            error: rejection.to_string(),
            resource: Some(self.resource.clone()),
            accepts: self.accepts.as_ref().clone(),
            payer,
        };

        if wants_html {
            let html = render_paywall(&body, &self.paywall);
            return Response::builder()
                .status(StatusCode::PAYMENT_REQUIRED)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(Body::from(html))
                .unwrap_or_else(|_| StatusCode::PAYMENT_REQUIRED.into_response());
        }

        let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
        let required_header =
            HeaderValue::from_bytes(Base64Bytes::encode(&json).as_ref()).ok();
        let mut builder = Response::builder()
            .status(StatusCode::PAYMENT_REQUIRED)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(required_header) = required_header {
            builder = builder.header(PAYMENT_REQUIRED_HEADER, required_header);
        }
        builder
            .body(Body::from(json))
            .unwrap_or_else(|_| StatusCode::PAYMENT_REQUIRED.into_response())
    }
}

async fn run_inner<S>(mut inner: S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible> + Send,
    S::Future: Send,
{
    match inner.call(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

/// Extracts the payment header, preferring the V2 name.
fn extract_payment_header(headers: &HeaderMap) -> Option<&[u8]> {
    headers
        .get(PAYMENT_HEADER_V2)
        .or_else(|| headers.get(PAYMENT_HEADER_V1))
        .map(|value| value.as_bytes())
}

/// HTML browsers advertise `text/html` and a Mozilla user agent; everything
/// else gets JSON.
fn is_browser_request(headers: &HeaderMap) -> bool {
    let accepts_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false);
    let mozilla_ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.contains("Mozilla"))
        .unwrap_or(false);
    accepts_html && mozilla_ua
}

/// Converts a settlement receipt into the base64 response header value.
fn settlement_to_header(settlement: &SettleResponse) -> Result<HeaderValue, String> {
    let encoded: Base64Bytes = settlement.try_into().map_err(|e| format!("{e}"))?;
    HeaderValue::from_bytes(encoded.as_ref()).map_err(|e| e.to_string())
}
