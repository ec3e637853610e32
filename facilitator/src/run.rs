//! Facilitator HTTP entrypoint.
//!
//! Launches an Axum-based HTTP server exposing the x402 protocol interface:
//!
//! - `POST /verify` — verify a payment payload against requirements
//! - `POST /settle` — settle an accepted payment payload on-chain
//! - `POST /supported` (and GET) — list supported payment kinds
//!
//! The server includes OpenTelemetry tracing via `TraceLayer`, CORS support
//! for cross-origin clients, and a per-network Ethereum provider cache.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `RPC_URL_*`, `EVM_PRIVATE_KEY`, `SIGNER_TYPE` configure chain access
//! - `OTEL_*` variables enable tracing export

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_evm::ProviderCache;

use crate::config::Config;
use crate::handlers::{self, AppState};
use crate::schemes::build_facilitator;
use crate::sig_down::SigDown;
use crate::telemetry::Telemetry;

/// Initializes and serves the facilitator until shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Config::load()?;

    let providers = ProviderCache::from_env().await.inspect_err(|e| {
        tracing::error!("Failed to create Ethereum providers: {}", e);
    })?;
    let facilitator = build_facilitator(&providers, &config);
    let state = Arc::new(AppState {
        facilitator,
        api_key: config.api_key().map(str::to_string),
    });

    let app = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    otel.kind = "server",
                    otel.name = %format!("{} {}", request.method(), request.uri()),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
