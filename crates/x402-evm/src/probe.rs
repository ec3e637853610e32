//! EIP-3009 capability probe.
//!
//! Not every ERC-20 implements `transferWithAuthorization`. The engine probes
//! each asset once by issuing the call with zero arguments as a view call and
//! classifying the resulting revert:
//!
//! - reverts that say the function does not exist mean the token lacks
//!   EIP-3009 support,
//! - business-logic reverts ("authorization is expired", "invalid signature")
//!   mean the function exists and choked on the dummy arguments,
//! - anything ambiguous is treated as unsupported.
//!
//! Results are cached per `(chain, asset)` for the process lifetime; entries
//! are never invalidated.

use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::instrument;

use x402_proto::ChainId;

use crate::contracts::IEIP3009;
use crate::provider::EvmProvider;

/// Process-wide cache of `(chain, asset) -> supports EIP-3009`.
#[derive(Clone, Debug, Default)]
pub struct Eip3009Probe {
    cache: Arc<DashMap<(ChainId, Address), bool>>,
}

impl Eip3009Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `asset` on the provider's chain supports ERC-3009
    /// `transferWithAuthorization`. Cached after the first probe.
    #[instrument(skip_all, fields(chain = %provider.chain_id(), asset = %asset))]
    pub async fn supports_eip3009(&self, provider: &EvmProvider, asset: Address) -> bool {
        let key = (provider.chain_id().clone(), asset);
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        let supported = probe(provider, asset).await;
        // First write wins; concurrent probes agree anyway.
        let supported = *self.cache.entry(key).or_insert(supported);
        tracing::debug!(supported, "EIP-3009 probe result");
        supported
    }

    /// Pre-seeds a probe result, used by tests and static configuration.
    pub fn seed(&self, chain_id: ChainId, asset: Address, supported: bool) {
        self.cache.entry((chain_id, asset)).or_insert(supported);
    }
}

async fn probe(provider: &EvmProvider, asset: Address) -> bool {
    let contract = IEIP3009::new(asset, provider.inner());
    let call = contract.transferWithAuthorization(
        Address::ZERO,
        Address::ZERO,
        U256::ZERO,
        U256::ZERO,
        U256::ZERO,
        FixedBytes([0u8; 32]),
        Bytes::new(),
    );
    match call.call().await {
        Ok(_) => true,
        Err(e) => classify_probe_revert(&format!("{e:?}")),
    }
}

/// Classifies a probe revert message: `true` means the function exists,
/// `false` means it is absent or the result is ambiguous.
pub fn classify_probe_revert(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    if looks_like_function_missing(&msg) {
        return false;
    }
    if looks_like_business_logic_revert(&msg) {
        return true;
    }
    // Bare "execution reverted" with no reason, or raw revert data only:
    // treat as unsupported.
    false
}

fn looks_like_function_missing(msg: &str) -> bool {
    msg.contains("function does not exist")
        || msg.contains("method not found")
        || msg.contains("unknown method")
        || msg.contains("function selector not found")
        || msg.contains("no matching function")
        || msg.contains("invalid function selector")
        || msg.contains("function not found")
        || (msg.contains("contract function") && msg.contains("not found"))
}

fn looks_like_business_logic_revert(msg: &str) -> bool {
    msg.contains("authorization is expired")
        || msg.contains("authorization is used")
        || msg.contains("authorization is not yet valid")
        || msg.contains("invalid authorization")
        || msg.contains("invalid signature")
        || msg.contains("invalid signature length")
}
