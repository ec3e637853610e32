//! Error type for the Exact-EVM scheme engine.
//!
//! Internal failures carry context for logging; [`ExactEvmError::verify_reason`]
//! and [`ExactEvmError::settle_reason`] collapse them onto the closed wire
//! taxonomy defined by the protocol.

use std::time::SystemTimeError;

use x402_proto::ChainId;
use x402_proto::types::{ErrorReason, EvmAddress, TransactionHash};

use crate::contracts::FacilitatorRevert;

/// Errors produced while verifying or settling an Exact-EVM payment.
#[derive(Debug, thiserror::Error)]
pub enum ExactEvmError {
    #[error("Unsupported scheme")]
    UnsupportedScheme,
    #[error("Unsupported x402 version")]
    UnsupportedVersion,
    #[error("Payload is malformed: {0}")]
    InvalidPayload(String),
    #[error("Network mismatch: provider on {expected}, payload for {actual}")]
    NetworkMismatch { expected: ChainId, actual: ChainId },
    #[error("No provider configured for network {0}")]
    UnsupportedNetwork(ChainId),
    #[error("Missing EIP-712 domain for asset")]
    MissingEip712Domain,
    #[error("Recipient mismatch: authorization pays {actual}, requirement demands {expected}")]
    RecipientMismatch {
        payer: EvmAddress,
        expected: EvmAddress,
        actual: EvmAddress,
    },
    #[error("Authorization expires too soon: {0}")]
    ValidBefore(String),
    #[error("Authorization not yet valid: {0}")]
    ValidAfter(String),
    #[error("Insufficient funds for {0}")]
    InsufficientFunds(EvmAddress),
    #[error("Authorization value below required amount for {0}")]
    InsufficientValue(EvmAddress),
    #[error("Invalid signature for {payer}: {message}")]
    InvalidSignature { payer: EvmAddress, message: String },
    #[error("Smart wallet for {0} is not deployed and carries no factory data")]
    UndeployedSmartWallet(EvmAddress),
    #[error("Facilitator contract reverted: {0:?}")]
    Revert(FacilitatorRevert),
    #[error("Transaction landed with failed status: {0}")]
    TransactionFailed(TransactionHash),
    #[error("Timed out waiting for transaction receipt: {transaction}")]
    ReceiptTimeout { transaction: TransactionHash },
    #[error("Contract call failed: {0}")]
    ContractCall(String),
    #[error("Transaction signing failed: {0}")]
    Signer(String),
    #[error("System clock error: {0}")]
    Clock(#[from] SystemTimeError),
}

impl ExactEvmError {
    /// Wire `invalidReason` for a verification failure.
    pub fn verify_reason(&self) -> ErrorReason {
        match self {
            Self::UnsupportedScheme => ErrorReason::UnsupportedScheme,
            Self::UnsupportedVersion => ErrorReason::InvalidX402Version,
            Self::InvalidPayload(_) => ErrorReason::InvalidPayload,
            Self::NetworkMismatch { .. } => ErrorReason::NetworkMismatch,
            Self::UnsupportedNetwork(_) => ErrorReason::InvalidNetwork,
            Self::MissingEip712Domain => ErrorReason::MissingEip712Domain,
            Self::RecipientMismatch { .. } => ErrorReason::RecipientMismatch,
            Self::ValidBefore(_) => ErrorReason::AuthorizationValidBefore,
            Self::ValidAfter(_) => ErrorReason::AuthorizationValidAfter,
            Self::InsufficientFunds(_) => ErrorReason::InsufficientFunds,
            Self::InsufficientValue(_) => ErrorReason::AuthorizationValue,
            Self::InvalidSignature { .. } => ErrorReason::InvalidSignature,
            Self::UndeployedSmartWallet(_) => ErrorReason::UndeployedSmartWallet,
            Self::Revert(revert) => revert.verify_reason(),
            Self::TransactionFailed(_) | Self::ReceiptTimeout { .. } => {
                ErrorReason::InvalidTransactionState
            }
            Self::ContractCall(_) | Self::Signer(_) | Self::Clock(_) => {
                ErrorReason::UnexpectedVerifyError
            }
        }
    }

    /// Wire `errorReason` for a settlement failure.
    pub fn settle_reason(&self) -> ErrorReason {
        match self {
            Self::Revert(revert) => revert.settle_reason(),
            Self::TransactionFailed(_) | Self::ReceiptTimeout { .. } => {
                ErrorReason::InvalidTransactionState
            }
            Self::ContractCall(_) | Self::Signer(_) | Self::Clock(_) => {
                ErrorReason::UnexpectedSettleError
            }
            other => other.verify_reason(),
        }
    }

    /// The transaction hash attached to this error, when one exists. Kept so
    /// callers can still observe in-flight transactions after a timeout.
    pub fn transaction(&self) -> Option<TransactionHash> {
        match self {
            Self::TransactionFailed(hash) => Some(*hash),
            Self::ReceiptTimeout { transaction } => Some(*transaction),
            _ => None,
        }
    }
}
