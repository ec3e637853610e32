//! End-to-end middleware tests against a stubbed facilitator.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use http::Method;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use x402_proto::ChainId;
use x402_proto::types::{PaymentRequiredResponse, SettleResponse};
use x402_proto::util::Base64Bytes;
use x402_axum::{RouteConfig, RoutesConfig, X402Middleware};

const PAY_TO: &str = "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628";
const PAYER: &str = "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510";

fn routes() -> RoutesConfig {
    RoutesConfig::new()
        .route(
            Method::GET,
            "/premium/.*",
            RouteConfig::new()
                .with_description("Premium data")
                .with_mime_type("application/json")
                .with_price(ChainId::eip155(8453), PAY_TO.parse().unwrap(), "$0.001")
                .unwrap(),
        )
        .unwrap()
}

fn app(facilitator_url: &str) -> Router {
    let x402 = X402Middleware::try_new(facilitator_url)
        .unwrap()
        .with_base_url("https://api.example".parse().unwrap())
        .with_routes(routes());
    Router::new()
        .route("/free", get(|| async { "free" }))
        .route("/premium/data", get(|| async { "vip" }))
        .route(
            "/premium/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .layer(x402)
}

/// A signed V2 payment payload for the premium route, as the header value.
fn payment_header(network: &str) -> String {
    let payload = serde_json::json!({
        "x402Version": 2,
        "payload": {
            "signature": format!("0x{}", "ab".repeat(65)),
            "authorization": {
                "from": PAYER,
                "to": PAY_TO,
                "value": "1000",
                "validAfter": "1700000000",
                "validBefore": "1700000600",
                "nonce": format!("0x{}", "11".repeat(32))
            }
        },
        "resource": {
            "url": "https://api.example/premium/data",
            "description": "Premium data"
        },
        "accepted": {
            "scheme": "exact",
            "network": network,
            "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "payTo": PAY_TO,
            "amount": "1000",
            "maxTimeoutSeconds": 300
        }
    });
    Base64Bytes::encode(serde_json::to_vec(&payload).unwrap()).to_string()
}

async fn facilitator_ok() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isValid": true,
            "payer": PAYER
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "transaction": format!("0x{}", "99".repeat(32)),
            "network": "eip155:8453",
            "namespace": "evm",
            "payer": PAYER
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn unmatched_routes_pass_through() {
    let server = MockServer::start().await;
    let response = app(&server.uri())
        .oneshot(Request::get("/free").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_header_yields_402_json() {
    let server = MockServer::start().await;
    let response = app(&server.uri())
        .oneshot(Request::get("/premium/data").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    // The v2 header mirrors the JSON body, base64-encoded.
    let header_value = response
        .headers()
        .get("payment-required")
        .expect("payment-required header")
        .as_bytes()
        .to_vec();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: PaymentRequiredResponse = serde_json::from_slice(&body_bytes).unwrap();
    assert_eq!(body.error, "X-PAYMENT header is required");
    assert_eq!(body.accepts.len(), 1);
    assert_eq!(body.accepts[0].network, ChainId::eip155(8453));
    assert_eq!(
        body.accepts[0].resource.as_ref().unwrap().as_str(),
        "https://api.example/premium/data"
    );

    let decoded_header = Base64Bytes::from(header_value.as_slice()).decode().unwrap();
    let from_header: PaymentRequiredResponse = serde_json::from_slice(&decoded_header).unwrap();
    assert_eq!(from_header.accepts.len(), body.accepts.len());
}

#[tokio::test]
async fn browsers_get_a_paywall() {
    let server = MockServer::start().await;
    let request = Request::get("/premium/data")
        .header(header::ACCEPT, "text/html,application/xhtml+xml")
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("window.x402"));
    assert!(html.contains("eip155:8453"));
}

#[tokio::test]
async fn valid_payment_unlocks_and_carries_receipt() {
    let server = facilitator_ok().await;
    let request = Request::get("/premium/data")
        .header("payment-signature", payment_header("eip155:8453"))
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let receipt_header = response
        .headers()
        .get("x-payment-response")
        .expect("x-payment-response header")
        .as_bytes()
        .to_vec();
    let decoded = Base64Bytes::from(receipt_header.as_slice()).decode().unwrap();
    let receipt: SettleResponse = serde_json::from_slice(&decoded).unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.network, ChainId::eip155(8453));
    assert_eq!(receipt.payer.unwrap().to_string(), PAYER);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"vip");
}

#[tokio::test]
async fn legacy_x_payment_header_is_accepted() {
    let server = facilitator_ok().await;
    let request = Request::get("/premium/data")
        .header("X-PAYMENT", payment_header("eip155:8453"))
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mismatched_network_finds_no_requirements() {
    let server = facilitator_ok().await;
    let request = Request::get("/premium/data")
        .header("payment-signature", payment_header("eip155:56"))
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: PaymentRequiredResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.error, "Unable to find matching payment requirements");
}

#[tokio::test]
async fn malformed_header_is_rejected() {
    let server = facilitator_ok().await;
    let request = Request::get("/premium/data")
        .header("payment-signature", "not!!base64")
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: PaymentRequiredResponse = serde_json::from_slice(&body).unwrap();
    assert!(body.error.starts_with("Invalid or malformed payment header"));
}

#[tokio::test]
async fn invalid_verification_bounces_with_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isValid": false,
            "invalidReason": "insufficient_funds",
            "payer": PAYER
        })))
        .mount(&server)
        .await;

    let request = Request::get("/premium/data")
        .header("payment-signature", payment_header("eip155:8453"))
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: PaymentRequiredResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.error, "Verification failed: insufficient_funds");
    assert_eq!(body.payer.unwrap().to_string(), PAYER);
}

#[tokio::test]
async fn downstream_errors_skip_settlement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isValid": true,
            "payer": PAYER
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settle"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let request = Request::get("/premium/broken")
        .header("payment-signature", payment_header("eip155:8453"))
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get("x-payment-response").is_none());
}

#[tokio::test]
async fn failed_settlement_replaces_response_with_402() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isValid": true,
            "payer": PAYER
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "errorReason": "nonce_used",
            "network": "eip155:8453",
            "namespace": "evm",
            "payer": PAYER
        })))
        .mount(&server)
        .await;

    let request = Request::get("/premium/data")
        .header("payment-signature", payment_header("eip155:8453"))
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: PaymentRequiredResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.error, "Settlement failed: nonce_used");
}

#[tokio::test]
async fn broken_route_without_payment_still_asks_for_payment() {
    let server = MockServer::start().await;
    let response = app(&server.uri())
        .oneshot(Request::get("/premium/broken").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}
