//! EIP-712 typed data for payment authorizations.
//!
//! The authorization blob has two structurally similar but semantically
//! distinct typed-data variants, selected by the token's EIP-3009 capability:
//!
//! - [`AuthorizationTypedData::Eip3009`] — `TransferWithAuthorization` under
//!   the token's own domain (`{name, version, chainId, verifyingContract =
//!   asset}`).
//! - [`AuthorizationTypedData::Facilitator`] — `tokenTransferWithAuthorization`
//!   under the facilitator domain (`{name: "Facilitator", version: "1",
//!   chainId, verifyingContract = facilitator}`), with `needApprove` set.
//!
//! Modeled as a tagged enum so the two variants can never be confused by
//! field shape alone.

use alloy::primitives::{Address, B256, FixedBytes, U256};
use alloy::sol_types::{Eip712Domain, SolStruct, eip712_domain};

use x402_proto::types::{ExactEvmAuthorization, TokenDeploymentEip712};

use crate::contracts::{TransferWithAuthorization, tokenTransferWithAuthorization};

/// The two EIP-712 shapes a payment authorization can take.
#[derive(Debug, Clone)]
pub enum AuthorizationTypedData {
    /// ERC-3009 `TransferWithAuthorization`, verified by the token contract.
    Eip3009 {
        message: TransferWithAuthorization,
        domain: Eip712Domain,
    },
    /// Facilitator `tokenTransferWithAuthorization`, verified by the
    /// facilitator contract.
    Facilitator {
        message: tokenTransferWithAuthorization,
        domain: Eip712Domain,
    },
}

impl AuthorizationTypedData {
    /// Builds the ERC-3009 variant under the token's own domain.
    pub fn eip3009(
        authorization: &ExactEvmAuthorization,
        asset: Address,
        chain_id: u64,
        eip712: &TokenDeploymentEip712,
    ) -> Self {
        let message = TransferWithAuthorization {
            from: authorization.from.into(),
            to: authorization.to.into(),
            value: authorization.value.into(),
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: FixedBytes(authorization.nonce.0),
        };
        let domain = eip712_domain! {
            name: eip712.name.clone(),
            version: eip712.version.clone(),
            chain_id: chain_id,
            verifying_contract: asset,
        };
        Self::Eip3009 { message, domain }
    }

    /// Builds the facilitator-contract variant under the `Facilitator/1`
    /// domain.
    pub fn facilitator(
        authorization: &ExactEvmAuthorization,
        asset: Address,
        chain_id: u64,
        facilitator: Address,
        need_approve: bool,
    ) -> Self {
        let message = tokenTransferWithAuthorization {
            token: asset,
            from: authorization.from.into(),
            to: authorization.to.into(),
            value: authorization.value.into(),
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: FixedBytes(authorization.nonce.0),
            needApprove: need_approve,
        };
        let domain = eip712_domain! {
            name: "Facilitator",
            version: "1",
            chain_id: chain_id,
            verifying_contract: facilitator,
        };
        Self::Facilitator { message, domain }
    }

    /// The 32-byte digest the payer signs.
    pub fn signing_hash(&self) -> B256 {
        match self {
            Self::Eip3009 { message, domain } => message.eip712_signing_hash(domain),
            Self::Facilitator { message, domain } => message.eip712_signing_hash(domain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x402_proto::UnixTimestamp;
    use x402_proto::types::{HexEncodedNonce, TokenAmount};

    use crate::contracts::FACILITATOR_ADDRESS;

    fn authorization() -> ExactEvmAuthorization {
        ExactEvmAuthorization {
            from: "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap(),
            to: "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
            value: TokenAmount::from(1000u64),
            valid_after: UnixTimestamp::from_secs(1700000000),
            valid_before: UnixTimestamp::from_secs(1700000600),
            nonce: HexEncodedNonce([5u8; 32]),
        }
    }

    #[test]
    fn variants_hash_differently() {
        let auth = authorization();
        let asset: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let eip712 = TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        };
        let eip3009 = AuthorizationTypedData::eip3009(&auth, asset, 8453, &eip712);
        let facilitator =
            AuthorizationTypedData::facilitator(&auth, asset, 8453, FACILITATOR_ADDRESS, true);
        assert_ne!(eip3009.signing_hash(), facilitator.signing_hash());
    }

    #[test]
    fn need_approve_changes_the_digest() {
        let auth = authorization();
        let asset: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let with_approve =
            AuthorizationTypedData::facilitator(&auth, asset, 56, FACILITATOR_ADDRESS, true);
        let without_approve =
            AuthorizationTypedData::facilitator(&auth, asset, 56, FACILITATOR_ADDRESS, false);
        assert_ne!(with_approve.signing_hash(), without_approve.signing_hash());
    }

    #[test]
    fn chain_id_changes_the_digest() {
        let auth = authorization();
        let asset: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let eip712 = TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        };
        let on_base = AuthorizationTypedData::eip3009(&auth, asset, 8453, &eip712);
        let on_bsc = AuthorizationTypedData::eip3009(&auth, asset, 56, &eip712);
        assert_ne!(on_base.signing_hash(), on_bsc.signing_hash());
    }
}
