//! Registry of supported networks and known token deployments.
//!
//! The facilitator settles payments on four EVM networks: BNB Smart Chain,
//! Base, X Layer, and Kite. This module maps between human-readable network
//! names and CAIP-2 chain ids, and records the statically known USDC
//! deployments used by the `price` shorthand in route configuration.

use alloy::primitives::address;
use once_cell::sync::Lazy;
use std::ops::Deref;

use crate::chain_id::ChainId;
use crate::types::{EvmAddress, TokenAsset, TokenDeployment, TokenDeploymentEip712};

/// `(network name, chain id)` pairs for every supported network.
static KNOWN_NETWORKS: Lazy<Vec<(&'static str, ChainId)>> = Lazy::new(|| {
    vec![
        ("bsc", ChainId::eip155(56)),
        ("base", ChainId::eip155(8453)),
        ("xlayer", ChainId::eip155(196)),
        ("kite", ChainId::eip155(2366)),
    ]
});

/// Returns the chain id for a well-known network name, case-insensitively.
pub fn chain_id_by_network_name(name: &str) -> Option<&'static ChainId> {
    KNOWN_NETWORKS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, chain_id)| chain_id)
}

/// Returns the well-known network name for a chain id.
pub fn network_name_by_chain_id(chain_id: &ChainId) -> Option<&'static str> {
    KNOWN_NETWORKS
        .iter()
        .find(|(_, known)| known == chain_id)
        .map(|(name, _)| *name)
}

/// Returns all supported chain ids.
pub fn supported_chain_ids() -> Vec<ChainId> {
    KNOWN_NETWORKS
        .iter()
        .map(|(_, chain_id)| chain_id.clone())
        .collect()
}

static USDC_BSC: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: EvmAddress(address!("0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d")),
            chain_id: ChainId::eip155(56),
        },
        decimals: 18,
        eip712: Some(TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        }),
    })
});

static USDC_BASE: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: EvmAddress(address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")),
            chain_id: ChainId::eip155(8453),
        },
        decimals: 6,
        eip712: Some(TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        }),
    })
});

static USDC_XLAYER: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: EvmAddress(address!("0x74b7F16337b8972027F6196A17a631aC6dE26d22")),
            chain_id: ChainId::eip155(196),
        },
        decimals: 6,
        eip712: Some(TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        }),
    })
});

/// A known USDC deployment as a wrapper around [`TokenDeployment`].
#[derive(Clone, Debug)]
pub struct USDCDeployment(pub TokenDeployment);

impl Deref for USDCDeployment {
    type Target = TokenDeployment;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&USDCDeployment> for TokenDeployment {
    fn from(deployment: &USDCDeployment) -> Self {
        deployment.0.clone()
    }
}

impl USDCDeployment {
    /// Returns the known USDC deployment for the given chain, if one is
    /// registered.
    ///
    /// Kite (eip155:2366) has no registered deployment: routes on kite must
    /// spell out a full payment requirement instead of using the `price`
    /// shorthand.
    pub fn by_chain_id(chain_id: &ChainId) -> Option<&'static USDCDeployment> {
        match chain_id.evm_chain_id()? {
            56 => Some(&USDC_BSC),
            8453 => Some(&USDC_BASE),
            196 => Some(&USDC_XLAYER),
            _ => None,
        }
    }
}
