//! Solidity bindings and EVM constants for the Exact-EVM scheme.
//!
//! The facilitator contract exposes `tokenTransferWithAuthorization`, a
//! meta-transfer entry point that either forwards to the token's native
//! ERC-3009 `transferWithAuthorization` or pulls tokens via a prior
//! `approve` (`needApprove = true`).

use alloy::primitives::{Address, address, hex};
use alloy::sol;

use x402_proto::types::ErrorReason;

/// Well-known deployment address of the facilitator contract. Seeded into
/// [`crate::exact::ExactEvmSettings`] at startup; never mutated afterwards.
pub const FACILITATOR_ADDRESS: Address = address!("0x555e3311a9893c9B17444C1Ff0d88192a57Ef13e");

sol! {
    /// Minimal ERC-20 surface used by the scheme engine: balance and
    /// allowance reads for verification, `approve` for the client-side
    /// pre-authorization flow, and `name`/`version` for EIP-712 domain
    /// resolution.
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function name() external view returns (string);
        function version() external view returns (string);
    }

    /// ERC-3009 `transferWithAuthorization` with a packed bytes signature.
    /// Used only for the capability probe; settlement always goes through the
    /// facilitator contract.
    #[sol(rpc)]
    interface IEIP3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;
    }

    /// The facilitator contract's meta-transfer entry point.
    #[sol(rpc)]
    interface IFacilitator {
        function tokenTransferWithAuthorization(
            address token,
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bool needApprove,
            bytes signature
        ) external;
    }

    /// EIP-712 message for the ERC-3009 path. The domain's verifying contract
    /// is the token itself.
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    /// EIP-712 message for the facilitator-contract path. The domain is
    /// `{name: "Facilitator", version: "1"}` with the facilitator contract as
    /// verifying contract. The type name is lowercase on purpose: it must
    /// match the string the contract hashes.
    #[allow(non_camel_case_types)]
    #[derive(Debug)]
    struct tokenTransferWithAuthorization {
        address token;
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
        bool needApprove;
    }

    /// Decoded body of an EIP-6492 wrapped signature (without the 32-byte
    /// magic suffix).
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes factoryCalldata;
        bytes innerSig;
    }
}

/// Deterministic 4-byte error selectors reverted by the facilitator contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilitatorRevert {
    InsufficientAllowance,
    InvalidOperator,
    AuthorizationNotYetValid,
    AuthorizationExpired,
    NonceUsed,
    InvalidSignature,
}

impl FacilitatorRevert {
    pub const INSUFFICIENT_ALLOWANCE: [u8; 4] = hex!("13be252b");
    pub const INVALID_OPERATOR: [u8; 4] = hex!("ccea9e6f");
    pub const AUTH_NOT_YET_VALID: [u8; 4] = hex!("df8e4372");
    pub const AUTH_EXPIRED: [u8; 4] = hex!("0f05f5bf");
    pub const NONCE_USED: [u8; 4] = hex!("1f6d5aef");
    pub const INVALID_SIGNATURE: [u8; 4] = hex!("8baa579f");

    /// Maps a 4-byte selector to its meaning.
    pub fn from_selector(selector: [u8; 4]) -> Option<Self> {
        match selector {
            Self::INSUFFICIENT_ALLOWANCE => Some(Self::InsufficientAllowance),
            Self::INVALID_OPERATOR => Some(Self::InvalidOperator),
            Self::AUTH_NOT_YET_VALID => Some(Self::AuthorizationNotYetValid),
            Self::AUTH_EXPIRED => Some(Self::AuthorizationExpired),
            Self::NONCE_USED => Some(Self::NonceUsed),
            Self::INVALID_SIGNATURE => Some(Self::InvalidSignature),
            _ => None,
        }
    }

    /// Scans an RPC error message for one of the known selectors.
    ///
    /// Alloy surfaces contract reverts as stringified transport errors that
    /// embed the revert data as 0x-prefixed hex, so substring matching on the
    /// selector is reliable.
    pub fn from_error_text(message: &str) -> Option<Self> {
        let lowered = message.to_ascii_lowercase();
        const KNOWN: [([u8; 4], FacilitatorRevert); 6] = [
            (
                FacilitatorRevert::INSUFFICIENT_ALLOWANCE,
                FacilitatorRevert::InsufficientAllowance,
            ),
            (
                FacilitatorRevert::INVALID_OPERATOR,
                FacilitatorRevert::InvalidOperator,
            ),
            (
                FacilitatorRevert::AUTH_NOT_YET_VALID,
                FacilitatorRevert::AuthorizationNotYetValid,
            ),
            (
                FacilitatorRevert::AUTH_EXPIRED,
                FacilitatorRevert::AuthorizationExpired,
            ),
            (FacilitatorRevert::NONCE_USED, FacilitatorRevert::NonceUsed),
            (
                FacilitatorRevert::INVALID_SIGNATURE,
                FacilitatorRevert::InvalidSignature,
            ),
        ];
        for (selector, revert) in KNOWN {
            if lowered.contains(&hex::encode(selector)) {
                return Some(revert);
            }
        }
        None
    }

    /// The `invalidReason` emitted when this revert surfaces during
    /// verification.
    pub fn verify_reason(&self) -> ErrorReason {
        match self {
            Self::InsufficientAllowance => ErrorReason::InsufficientFunds,
            Self::InvalidOperator => ErrorReason::UnexpectedVerifyError,
            Self::AuthorizationNotYetValid => ErrorReason::AuthorizationValidAfter,
            Self::AuthorizationExpired => ErrorReason::AuthorizationValidBefore,
            Self::NonceUsed => ErrorReason::NonceUsed,
            Self::InvalidSignature => ErrorReason::InvalidSignature,
        }
    }

    /// The `errorReason` emitted when this revert surfaces during settlement.
    pub fn settle_reason(&self) -> ErrorReason {
        match self {
            Self::InsufficientAllowance => ErrorReason::InsufficientFunds,
            Self::InvalidOperator => ErrorReason::UnexpectedSettleError,
            Self::AuthorizationNotYetValid => ErrorReason::AuthorizationValidAfter,
            Self::AuthorizationExpired => ErrorReason::PaymentExpired,
            Self::NonceUsed => ErrorReason::NonceUsed,
            Self::InvalidSignature => ErrorReason::InvalidSignature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_table_is_deterministic() {
        assert_eq!(
            FacilitatorRevert::from_selector(hex!("13be252b")),
            Some(FacilitatorRevert::InsufficientAllowance)
        );
        assert_eq!(
            FacilitatorRevert::from_selector(hex!("ccea9e6f")),
            Some(FacilitatorRevert::InvalidOperator)
        );
        assert_eq!(
            FacilitatorRevert::from_selector(hex!("df8e4372")),
            Some(FacilitatorRevert::AuthorizationNotYetValid)
        );
        assert_eq!(
            FacilitatorRevert::from_selector(hex!("0f05f5bf")),
            Some(FacilitatorRevert::AuthorizationExpired)
        );
        assert_eq!(
            FacilitatorRevert::from_selector(hex!("1f6d5aef")),
            Some(FacilitatorRevert::NonceUsed)
        );
        assert_eq!(
            FacilitatorRevert::from_selector(hex!("8baa579f")),
            Some(FacilitatorRevert::InvalidSignature)
        );
        assert_eq!(FacilitatorRevert::from_selector(hex!("deadbeef")), None);
    }

    #[test]
    fn classifies_from_error_text() {
        let message = "server returned an error response: error code 3: execution reverted, data: \"0x1f6d5aef\"";
        assert_eq!(
            FacilitatorRevert::from_error_text(message),
            Some(FacilitatorRevert::NonceUsed)
        );
        assert_eq!(FacilitatorRevert::from_error_text("gas required exceeds allowance"), None);
    }

    #[test]
    fn reason_mapping_differs_between_stages() {
        let expired = FacilitatorRevert::AuthorizationExpired;
        assert_eq!(expired.verify_reason(), ErrorReason::AuthorizationValidBefore);
        assert_eq!(expired.settle_reason(), ErrorReason::PaymentExpired);
    }
}
