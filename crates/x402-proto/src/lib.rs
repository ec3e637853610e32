//! Wire types and protocol definitions for the [x402 protocol](https://www.x402.org).
//!
//! The x402 protocol enables HTTP-native payments using the
//! `402 Payment Required` status code. This crate holds the shared vocabulary
//! of the workspace: payment payloads and requirements, verification and
//! settlement results, the closed error-reason taxonomy, CAIP-2 chain
//! identifiers, and the [`Facilitator`](facilitator::Facilitator) trait that
//! both the local scheme engine and the remote HTTP client implement.
//!
//! # Modules
//!
//! - [`chain_id`] — CAIP-2 chain identifiers with forgiving parsing.
//! - [`networks`] — Registry of supported networks and known USDC deployments.
//! - [`types`] — Payment payloads, requirements, responses, error taxonomy.
//! - [`timestamp`] — Unix timestamp type for authorization windows.
//! - [`facilitator`] — The verify/settle/supported trait.
//! - [`util`] — Base64 envelope and human-readable money parsing.

pub mod chain_id;
pub mod facilitator;
pub mod networks;
pub mod timestamp;
pub mod types;
pub mod util;

pub use chain_id::ChainId;
pub use timestamp::UnixTimestamp;
