//! Axum middleware for enforcing x402 payments on protected routes.
//!
//! The middleware matches each request against a [`RoutesConfig`]; requests
//! hitting a gated route must carry a valid payment header, verified and
//! settled through a configured facilitator. Everything else passes through
//! untouched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use http::Method;
//! use x402_axum::{RouteConfig, RoutesConfig, X402Middleware};
//! use x402_proto::ChainId;
//!
//! let routes = RoutesConfig::new()
//!     .route(
//!         Method::GET,
//!         "/premium/.*",
//!         RouteConfig::new()
//!             .with_description("Premium data feed")
//!             .with_price(
//!                 ChainId::eip155(8453),
//!                 "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
//!                 "$0.001",
//!             )
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let x402 = X402Middleware::try_new("https://facilitator.example")
//!     .unwrap()
//!     .with_routes(routes);
//! # let _ = x402;
//! ```

use axum_core::extract::Request;
use axum_core::response::Response;
use http::uri::Uri;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use x402_proto::facilitator::Facilitator;
use x402_proto::types::ResourceInfo;

use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::paygate::Paygate;
use crate::paywall::PaywallConfig;
use crate::routes::{RouteConfig, RoutesConfig};

/// The x402 middleware: a facilitator handle plus the gated-route table.
///
/// Cheap to clone; one instance is usually shared by the whole application.
#[derive(Clone, Debug)]
pub struct X402Middleware<F> {
    facilitator: F,
    routes: Arc<RoutesConfig>,
    base_url: Option<Arc<Url>>,
    paywall: Arc<PaywallConfig>,
}

impl X402Middleware<Arc<FacilitatorClient>> {
    /// Creates a middleware instance backed by a remote facilitator.
    pub fn try_new(facilitator_url: &str) -> Result<Self, FacilitatorClientError> {
        let facilitator = FacilitatorClient::try_from(facilitator_url)?;
        Ok(Self {
            facilitator: Arc::new(facilitator),
            routes: Arc::new(RoutesConfig::new()),
            base_url: None,
            paywall: Arc::new(PaywallConfig::default()),
        })
    }

    /// Sends the API key as a Bearer token on facilitator calls.
    pub fn with_api_key(&self, api_key: &str) -> Result<Self, FacilitatorClientError> {
        let facilitator = self.facilitator.with_api_key(api_key)?;
        let mut this = self.clone();
        this.facilitator = Arc::new(facilitator);
        Ok(this)
    }
}

impl<F> X402Middleware<F> {
    /// Creates a middleware instance from any [`Facilitator`], e.g. an
    /// in-process engine.
    pub fn with_facilitator(facilitator: F) -> Self {
        Self {
            facilitator,
            routes: Arc::new(RoutesConfig::new()),
            base_url: None,
            paywall: Arc::new(PaywallConfig::default()),
        }
    }

    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }
}

impl<F: Clone> X402Middleware<F> {
    /// Sets the gated-route table.
    pub fn with_routes(&self, routes: RoutesConfig) -> Self {
        let mut this = self.clone();
        this.routes = Arc::new(routes);
        this
    }

    /// Sets the base URL used to compute each request's full resource URL.
    /// Without it, resources default to `http://localhost/`.
    pub fn with_base_url(&self, base_url: Url) -> Self {
        let mut this = self.clone();
        this.base_url = Some(Arc::new(base_url));
        this
    }

    /// Configures the browser paywall page.
    pub fn with_paywall(&self, paywall: PaywallConfig) -> Self {
        let mut this = self.clone();
        this.paywall = Arc::new(paywall);
        this
    }
}

impl<S, F> Layer<S> for X402Middleware<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = X402MiddlewareService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            facilitator: self.facilitator.clone(),
            routes: self.routes.clone(),
            base_url: self.base_url.clone(),
            paywall: self.paywall.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The wrapped service enforcing payments per request.
#[derive(Clone)]
pub struct X402MiddlewareService<F> {
    facilitator: F,
    routes: Arc<RoutesConfig>,
    base_url: Option<Arc<Url>>,
    paywall: Arc<PaywallConfig>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Service<Request> for X402MiddlewareService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let facilitator = self.facilitator.clone();
        let routes = self.routes.clone();
        let base_url = self.base_url.clone();
        let paywall = self.paywall.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(config) = routes.matching(req.method(), req.uri().path()) else {
                return inner.call(req).await;
            };
            let resource_url = resource_url(base_url.as_deref(), req.uri());
            let accepts = config.effective_accepts(&resource_url);
            let resource = resource_info(config, &resource_url);

            let gate = Paygate {
                facilitator,
                accepts: Arc::new(accepts),
                resource,
                paywall,
            };
            gate.handle_request(inner, req).await
        })
    }
}

/// Computes the full resource URL: the configured base plus the request's
/// path and query.
fn resource_url(base_url: Option<&Url>, uri: &Uri) -> Url {
    static LOCALHOST: once_cell::sync::Lazy<Url> =
        once_cell::sync::Lazy::new(|| Url::parse("http://localhost/").expect("valid URL"));
    let mut url = base_url.cloned().unwrap_or_else(|| LOCALHOST.clone());
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

fn resource_info(config: &RouteConfig, url: &Url) -> ResourceInfo {
    ResourceInfo {
        url: url.to_string(),
        description: config.description.clone(),
        mime_type: config.mime_type.clone(),
    }
}
