//! Exact-EVM scheme engine for the [x402 protocol](https://www.x402.org).
//!
//! This crate implements on-chain verification and settlement of `exact`
//! payments on EVM networks, plus the client-side construction of signed
//! payment payloads.
//!
//! # Architecture
//!
//! - [`provider`] — alloy provider stack per network, with a cache keyed by
//!   CAIP-2 chain id.
//! - [`contracts`] — Solidity bindings for the ERC-20, ERC-3009, and
//!   facilitator contract surfaces, plus the revert selector table.
//! - [`probe`] — cached EIP-3009 capability probe per `(chain, asset)`.
//! - [`signature`] — EOA / EIP-1271 / EIP-6492 signature classification.
//! - [`typed_data`] — the two EIP-712 authorization variants as a tagged
//!   union.
//! - [`exact`] — the scheme engine: seven-step verification and three-stage
//!   settlement with sponsored (gasless) support on BNB Smart Chain.
//! - [`facilitator_local`] — routes requests to per-network engines.
//! - [`sponsor`] — paymaster sponsorship validation client.
//! - [`scan`] — fire-and-forget settlement reporting.
//! - [`client`] — buyer-side payment selection, signing, and encoding.

pub mod client;
pub mod contracts;
pub mod error;
pub mod exact;
pub mod facilitator_local;
pub mod nonce;
pub mod probe;
pub mod provider;
pub mod scan;
pub mod signature;
pub mod sponsor;
pub mod typed_data;

pub use error::ExactEvmError;
pub use exact::{ExactEvm, ExactEvmSettings};
pub use facilitator_local::FacilitatorLocal;
pub use probe::Eip3009Probe;
pub use provider::{EvmProvider, ProviderCache, ProviderMap};
pub use scan::ScanSink;
pub use sponsor::SponsorClient;
