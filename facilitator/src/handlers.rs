//! HTTP endpoints of the facilitator.
//!
//! Protocol endpoints are `POST /verify`, `POST /settle`, and
//! `POST /supported` (also answered on GET for discovery). Protocol-level
//! rejections keep their structured JSON shape: an invalid verification is a
//! 400 with `{isValid: false, invalidReason, payer}`, a failed settlement a
//! 400 with `{success: false, errorReason, ...}`.
//!
//! When an API key is configured, every endpoint demands
//! `Authorization: Bearer <key>` and answers 401 otherwise.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::instrument;

use x402_evm::FacilitatorLocal;
use x402_proto::facilitator::Facilitator;
use x402_proto::types::{ErrorResponse, SettleRequest, VerifyRequest, VerifyResponse};

/// Shared state of the HTTP service.
pub struct AppState {
    pub facilitator: FacilitatorLocal,
    pub api_key: Option<String>,
}

/// Builds the protocol router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(|| async { "x402 facilitator" }))
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/supported", post(post_supported).get(post_supported))
}

/// Checks the Bearer key when one is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Unauthorized".to_string(),
        }),
    )
        .into_response()
}

/// `POST /verify`: verifies a payment payload against requirements.
#[instrument(skip_all)]
pub async fn post_verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    if authorize(&state, &headers).is_err() {
        return unauthorized();
    }
    match state.facilitator.verify(&body).await {
        Ok(response @ VerifyResponse::Valid { .. }) => {
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(response @ VerifyResponse::Invalid { .. }) => {
            (StatusCode::BAD_REQUEST, Json(response)).into_response()
        }
        Err(error) => {
            tracing::error!(error = %error, "verification errored");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Verification failed unexpectedly".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /settle`: settles a verified payment on-chain.
#[instrument(skip_all)]
pub async fn post_settle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SettleRequest>,
) -> impl IntoResponse {
    if authorize(&state, &headers).is_err() {
        return unauthorized();
    }
    match state.facilitator.settle(&body).await {
        Ok(response) if response.success => (StatusCode::OK, Json(response)).into_response(),
        Ok(response) => (StatusCode::BAD_REQUEST, Json(response)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "settlement errored");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Settlement failed unexpectedly".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /supported` (and GET): lists supported payment kinds.
#[instrument(skip_all)]
pub async fn post_supported(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if authorize(&state, &headers).is_err() {
        return unauthorized();
    }
    match state.facilitator.supported().await {
        Ok(kinds) => (StatusCode::OK, Json(kinds)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "supported listing errored");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to list supported kinds".to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(api_key: Option<&str>) -> Arc<AppState> {
        Arc::new(AppState {
            facilitator: FacilitatorLocal::new(),
            api_key: api_key.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn supported_is_open_without_api_key() {
        let app = routes().with_state(state(None));
        let response = app
            .oneshot(Request::post("/supported").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_bearer_is_401() {
        let app = routes().with_state(state(Some("sekrit")));
        let response = app
            .oneshot(Request::post("/supported").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matching_bearer_is_accepted() {
        let app = routes().with_state(state(Some("sekrit")));
        let response = app
            .oneshot(
                Request::post("/supported")
                    .header(header::AUTHORIZATION, "Bearer sekrit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn verify_rejects_unknown_network_as_structured_json() {
        let app = routes().with_state(state(None));
        let body = serde_json::json!({
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
        });
        let response = app
            .oneshot(
                Request::post("/verify")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        // No engine is registered for the network in this test state.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "invalid_network");
    }
}
