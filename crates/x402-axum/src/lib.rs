//! Axum middleware for the [x402 protocol](https://www.x402.org): gate HTTP
//! routes behind blockchain payment requirements.
//!
//! The middleware intercepts requests to configured routes, answers unpaid
//! requests with `402 Payment Required` (JSON for API clients, an HTML
//! paywall for browsers), verifies submitted payments through an x402
//! facilitator, and settles them on-chain after the downstream handler
//! succeeds. The settlement receipt travels back in the
//! `X-PAYMENT-RESPONSE` header.
//!
//! # Modules
//!
//! - [`layer`] — the tower [`Layer`](tower::Layer)/`Service` pair.
//! - [`routes`] — the `(method, path regex) -> RouteConfig` table.
//! - [`paygate`] — the per-request enforcement algorithm.
//! - [`facilitator_client`] — HTTP client for a remote facilitator.
//! - [`paywall`] — the browser paywall page.

pub mod facilitator_client;
pub mod layer;
pub mod paygate;
pub mod paywall;
pub mod routes;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{X402Middleware, X402MiddlewareService};
pub use paywall::PaywallConfig;
pub use routes::{RouteConfig, RoutesConfig};
