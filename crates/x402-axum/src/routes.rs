//! Route table for payment-gated endpoints.
//!
//! The middleware holds a precompiled list of `(method, path regex)` patterns
//! mapped to a [`RouteConfig`]. The first matching entry wins; requests that
//! match no entry pass through untouched.

use http::Method;
use regex::Regex;
use url::Url;

use x402_proto::ChainId;
use x402_proto::networks::USDCDeployment;
use x402_proto::types::{EvmAddress, PaymentRequirements, Scheme};
use x402_proto::util::MoneyAmount;

/// Payment configuration for one route pattern.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// The payment requirements the route accepts, one per network/asset.
    pub accepts: Vec<PaymentRequirements>,
    /// Human-readable description for 402 responses.
    pub description: String,
    /// MIME type of the protected resource.
    pub mime_type: Option<String>,
}

impl RouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fully specified payment requirement.
    pub fn with_accepts(mut self, requirements: PaymentRequirements) -> Self {
        self.accepts.push(requirements);
        self
    }

    /// Price shorthand: synthesizes a single requirement for the network's
    /// known USDC deployment.
    ///
    /// Fails for networks without a registered deployment (kite needs an
    /// explicit requirement) and for prices more precise than the token.
    pub fn with_price(
        mut self,
        network: ChainId,
        pay_to: EvmAddress,
        price: &str,
    ) -> Result<Self, PriceError> {
        let deployment =
            USDCDeployment::by_chain_id(&network).ok_or(PriceError::NoKnownAsset(network.clone()))?;
        let amount = MoneyAmount::parse(price)
            .map_err(|e| PriceError::Amount(e.to_string()))?
            .as_token_amount(deployment.decimals)
            .map_err(|e| PriceError::Amount(e.to_string()))?;
        self.accepts.push(PaymentRequirements {
            scheme: Scheme::Exact,
            network,
            network_id: None,
            asset: deployment.asset.address,
            pay_to,
            amount: Some(amount),
            amount_required: None,
            token_decimals: None,
            max_timeout_seconds: 300,
            extra: deployment.eip712.clone(),
            resource: None,
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        });
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// The requirements with per-request fields filled in: the `resource` URL
    /// and the route's description/MIME type.
    pub fn effective_accepts(&self, resource: &Url) -> Vec<PaymentRequirements> {
        self.accepts
            .iter()
            .map(|requirements| {
                let mut effective = requirements.clone();
                effective.resource = Some(resource.clone());
                if effective.description.is_empty() {
                    effective.description = self.description.clone();
                }
                if effective.mime_type.is_none() {
                    effective.mime_type = self.mime_type.clone();
                }
                effective
            })
            .collect()
    }
}

/// Errors from the `price` shorthand.
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("No known settlement asset on {0}; spell out a full payment requirement")]
    NoKnownAsset(ChainId),
    #[error("Invalid price: {0}")]
    Amount(String),
}

/// One compiled route pattern.
#[derive(Debug, Clone)]
struct Route {
    /// `None` matches any verb.
    method: Option<Method>,
    pattern: Regex,
    config: RouteConfig,
}

/// Ordered list of payment-gated route patterns.
#[derive(Debug, Clone, Default)]
pub struct RoutesConfig {
    routes: Vec<Route>,
}

/// Errors from building a [`RoutesConfig`].
#[derive(Debug, thiserror::Error)]
pub enum RoutesConfigError {
    #[error("Invalid route pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl RoutesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route for one HTTP verb. The pattern is anchored: it must
    /// match the whole request path.
    pub fn route(
        mut self,
        method: Method,
        pattern: &str,
        config: RouteConfig,
    ) -> Result<Self, RoutesConfigError> {
        let anchored = format!("^(?:{pattern})$");
        let pattern_regex = Regex::new(&anchored).map_err(|e| RoutesConfigError::Pattern {
            pattern: pattern.to_string(),
            source: e,
        })?;
        self.routes.push(Route {
            method: Some(method),
            pattern: pattern_regex,
            config,
        });
        Ok(self)
    }

    /// Registers a route matching any HTTP verb.
    pub fn route_any(mut self, pattern: &str, config: RouteConfig) -> Result<Self, RoutesConfigError> {
        let anchored = format!("^(?:{pattern})$");
        let pattern_regex = Regex::new(&anchored).map_err(|e| RoutesConfigError::Pattern {
            pattern: pattern.to_string(),
            source: e,
        })?;
        self.routes.push(Route {
            method: None,
            pattern: pattern_regex,
            config,
        });
        Ok(self)
    }

    /// Finds the first route matching the request, if any.
    pub fn matching(&self, method: &Method, path: &str) -> Option<&RouteConfig> {
        self.routes
            .iter()
            .find(|route| {
                route
                    .method
                    .as_ref()
                    .map(|m| m == method)
                    .unwrap_or(true)
                    && route.pattern.is_match(path)
            })
            .map(|route| &route.config)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
