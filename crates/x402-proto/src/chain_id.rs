//! CAIP-2 chain identifier types.
//!
//! A [CAIP-2](https://standards.chainagnostic.org/CAIPs/caip-2) chain id is a
//! `namespace:reference` pair, e.g. `eip155:56` for BNB Smart Chain. The x402
//! wire format uses these strings to name networks in payment requirements and
//! payloads.
//!
//! Parsing is deliberately forgiving: besides the canonical `eip155:56` form,
//! a bare decimal reference (`"56"`) and a handful of well-known network names
//! (`"bsc"`, `"base"`, `"xlayer"`, `"kite"`) are accepted. An unknown network
//! name resolves to `eip155:1`.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::networks;

/// Namespace for EVM chains per EIP-155.
pub const EIP155: &str = "eip155";

/// A CAIP-2 compliant blockchain identifier.
///
/// # Serialization
///
/// Serializes as the colon-separated string, e.g. `"eip155:56"`. Deserializes
/// from that form, from a bare decimal chain id, or from a well-known network
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    /// The blockchain namespace (`eip155` for EVM chains).
    pub namespace: String,
    /// The chain-specific reference (e.g. `56` for BSC).
    pub reference: String,
}

impl ChainId {
    /// Creates a new chain id from namespace and reference components.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Creates an `eip155` chain id from a numeric EVM chain id.
    pub fn eip155(chain_id: u64) -> Self {
        Self::new(EIP155, chain_id.to_string())
    }

    /// Returns the numeric EVM chain id, if this is an `eip155` chain with a
    /// decimal reference.
    pub fn evm_chain_id(&self) -> Option<u64> {
        if self.namespace != EIP155 {
            return None;
        }
        self.reference.parse().ok()
    }

    /// Returns the well-known network name for this chain id, if any.
    pub fn as_network_name(&self) -> Option<&'static str> {
        networks::network_name_by_chain_id(self)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.to_string()
    }
}

/// Error returned when parsing an empty chain id string.
#[derive(Debug, thiserror::Error)]
#[error("Invalid chain id format: {0:?}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    /// Parses `namespace:reference`, a bare decimal chain id, or a well-known
    /// network name. Unknown names fall back to `eip155:1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        if let Some((namespace, reference)) = s.split_once(':') {
            if namespace.is_empty() || reference.is_empty() {
                return Err(ChainIdFormatError(s.into()));
            }
            return Ok(ChainId::new(namespace, reference));
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            return Ok(ChainId::new(EIP155, s));
        }
        match networks::chain_id_by_network_name(s) {
            Some(chain_id) => Ok(chain_id.clone()),
            None => Ok(ChainId::eip155(1)),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}
