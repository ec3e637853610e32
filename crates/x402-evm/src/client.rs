//! Client-side payment construction.
//!
//! A buyer that receives a 402 response picks one of the offered
//! requirements, builds a time-boxed authorization with a random nonce, signs
//! the typed-data variant matching the token's EIP-3009 capability, and
//! retries the request with the encoded payload in the payment header.
//!
//! For tokens without EIP-3009 support the facilitator contract pulls funds
//! via `transferFrom`, so the client first makes sure
//! `allowance(payer, facilitator)` covers the value, sending `approve` (and
//! the approve(0)-first dance some tokens require) when it does not.

use alloy::primitives::{Address, Bytes, U256};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use rand::RngCore;
use std::time::Duration;
use tracing::instrument;

use x402_proto::types::{
    EvmSignature, ExactEvmAuthorization, ExactEvmPayload, HexEncodedNonce, PaymentPayload,
    PaymentRequirements, ResourceInfo, Scheme, SettleResponse, TokenAmount,
};
use x402_proto::util::Base64Bytes;
use x402_proto::UnixTimestamp;

use crate::contracts::IERC20;
use crate::error::ExactEvmError;
use crate::probe::Eip3009Probe;
use crate::provider::EvmProvider;
use crate::typed_data::AuthorizationTypedData;

/// Authorizations start this many seconds in the past to absorb clock skew.
const VALID_AFTER_SKEW_SECS: u64 = 60;

/// Errors from client-side payment construction.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No matching payment requirement in accepts list")]
    NoMatchingRequirement,
    #[error("Requirement amount {amount} exceeds configured maximum {max}")]
    AmountExceeded { amount: TokenAmount, max: TokenAmount },
    #[error("Requirement carries no derivable amount: {0}")]
    Amount(String),
    #[error("Missing EIP-712 domain for asset")]
    MissingEip712Domain,
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Approval transaction failed: {0}")]
    Approval(String),
    #[error(transparent)]
    Chain(#[from] ExactEvmError),
    #[error("Failed to encode payment payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Selects a requirement from a 402 `accepts` list.
///
/// Filters by network and scheme when given, and enforces an optional upper
/// bound on the amount the client is willing to pay.
pub fn select_payment_requirements<'a>(
    accepts: &'a [PaymentRequirements],
    network_filter: Option<&x402_proto::ChainId>,
    scheme_filter: Option<Scheme>,
    max_value: Option<TokenAmount>,
) -> Result<&'a PaymentRequirements, ClientError> {
    for requirements in accepts {
        if let Some(scheme) = scheme_filter {
            if requirements.scheme != scheme {
                continue;
            }
        }
        if let Some(network) = network_filter {
            if &requirements.network != network {
                continue;
            }
        }
        if requirements.scheme != Scheme::Exact {
            continue;
        }
        let amount = requirements
            .required_atomic_amount()
            .map_err(|e| ClientError::Amount(e.to_string()))?;
        if let Some(max) = max_value {
            if amount > max {
                return Err(ClientError::AmountExceeded { amount, max });
            }
        }
        return Ok(requirements);
    }
    Err(ClientError::NoMatchingRequirement)
}

/// Builds, signs, and encodes a payment for the selected requirement.
pub struct PaymentBuilder<'a> {
    provider: &'a EvmProvider,
    signer: &'a PrivateKeySigner,
    probe: &'a Eip3009Probe,
    facilitator_address: Address,
}

impl<'a> PaymentBuilder<'a> {
    pub fn new(
        provider: &'a EvmProvider,
        signer: &'a PrivateKeySigner,
        probe: &'a Eip3009Probe,
        facilitator_address: Address,
    ) -> Self {
        Self {
            provider,
            signer,
            probe,
            facilitator_address,
        }
    }

    /// Constructs and signs a payment payload for the requirement, returning
    /// the base64 header value for the retry request.
    #[instrument(skip_all, err, fields(network = %requirements.network))]
    pub async fn create_payment_header(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<Base64Bytes<'static>, ClientError> {
        let payload = self.create_payment(requirements).await?;
        let json = serde_json::to_vec(&payload)?;
        Ok(Base64Bytes::encode(json))
    }

    /// Constructs and signs a payment payload for the requirement.
    pub async fn create_payment(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, ClientError> {
        let amount = requirements
            .required_atomic_amount()
            .map_err(|e| ClientError::Amount(e.to_string()))?;
        let now = UnixTimestamp::try_now().map_err(|e| ClientError::Signing(e.to_string()))?;
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let authorization = ExactEvmAuthorization {
            from: self.signer.address().into(),
            to: requirements.pay_to,
            value: amount,
            valid_after: now - VALID_AFTER_SKEW_SECS,
            valid_before: now + requirements.max_timeout_seconds,
            nonce: HexEncodedNonce(nonce),
        };

        let asset: Address = requirements.asset.into();
        let chain_id = self.provider.evm_chain_id();
        let supports_eip3009 = self.probe.supports_eip3009(self.provider, asset).await;

        let typed_data = if supports_eip3009 {
            let eip712 = self
                .provider
                .resolve_eip712_domain(asset, requirements.extra.as_ref())
                .await
                .map_err(|_| ClientError::MissingEip712Domain)?;
            AuthorizationTypedData::eip3009(&authorization, asset, chain_id, &eip712)
        } else {
            self.ensure_allowance(asset, authorization.value).await?;
            AuthorizationTypedData::facilitator(
                &authorization,
                asset,
                chain_id,
                self.facilitator_address,
                true,
            )
        };

        let hash = typed_data.signing_hash();
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|e| ClientError::Signing(e.to_string()))?;
        let signature_bytes: Bytes = signature.as_bytes().to_vec().into();

        let resource = requirements.resource.as_ref().map(|url| ResourceInfo {
            url: url.to_string(),
            description: requirements.description.clone(),
            mime_type: requirements.mime_type.clone(),
        });

        Ok(PaymentPayload {
            x402_version: x402_proto::types::X402Version::V2,
            scheme: None,
            network: None,
            payload: ExactEvmPayload {
                signature: EvmSignature(signature_bytes),
                authorization,
            },
            resource,
            accepted: Some(requirements.clone()),
            kind: None,
        })
    }

    /// Ensures `allowance(payer, facilitator) >= required`, approving when
    /// short. Some tokens require resetting the allowance to zero before it
    /// can be raised; that path is retried once.
    #[instrument(skip_all, err, fields(asset = %asset))]
    async fn ensure_allowance(
        &self,
        asset: Address,
        required: TokenAmount,
    ) -> Result<(), ClientError> {
        let owner = self.signer.address();
        let contract = IERC20::new(asset, self.provider.inner());
        let current: U256 = contract
            .allowance(owner, self.facilitator_address)
            .call()
            .await
            .map_err(|e| ClientError::Approval(format!("allowance read failed: {e:?}")))?;
        if current >= <TokenAmount as Into<U256>>::into(required) {
            return Ok(());
        }
        tracing::info!(
            spender = %self.facilitator_address,
            required = %required,
            "raising facilitator allowance"
        );
        match self.approve_and_wait(&contract, required.into()).await {
            Ok(()) => Ok(()),
            Err(message) => {
                let lowered = message.to_ascii_lowercase();
                let needs_reset = lowered.contains("must approve 0")
                    || lowered.contains("reset allowance")
                    || lowered.contains("approve from non-zero");
                if !needs_reset {
                    return Err(ClientError::Approval(message));
                }
                self.approve_and_wait(&contract, U256::ZERO)
                    .await
                    .map_err(ClientError::Approval)?;
                self.approve_and_wait(&contract, required.into())
                    .await
                    .map_err(ClientError::Approval)
            }
        }
    }

    async fn approve_and_wait(
        &self,
        contract: &IERC20::IERC20Instance<&crate::provider::InnerProvider>,
        amount: U256,
    ) -> Result<(), String> {
        let pending = contract
            .approve(self.facilitator_address, amount)
            .send()
            .await
            .map_err(|e| format!("{e:?}"))?;
        let receipt = self
            .provider
            .wait_for_receipt(pending, Duration::from_secs(120))
            .await
            .map_err(|e| e.to_string())?;
        if receipt.status() {
            Ok(())
        } else {
            Err(format!(
                "approval transaction {} reverted",
                receipt.transaction_hash
            ))
        }
    }
}

/// Decodes the settlement receipt from an `X-PAYMENT-RESPONSE` (or V2
/// `payment-response`) header value.
pub fn decode_payment_response(header: &[u8]) -> Option<SettleResponse> {
    let decoded = Base64Bytes::from(header).decode().ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use x402_proto::ChainId;

    fn requirement(network: ChainId, amount: u64) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network,
            network_id: None,
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap(),
            pay_to: "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
            amount: Some(TokenAmount::from(amount)),
            amount_required: None,
            token_decimals: None,
            max_timeout_seconds: 600,
            extra: None,
            resource: None,
            description: String::new(),
            mime_type: None,
        }
    }

    #[test]
    fn selects_by_network_filter() {
        let accepts = vec![
            requirement(ChainId::eip155(56), 500),
            requirement(ChainId::eip155(8453), 1000),
        ];
        let selected =
            select_payment_requirements(&accepts, Some(&ChainId::eip155(8453)), None, None)
                .unwrap();
        assert_eq!(selected.network, ChainId::eip155(8453));
    }

    #[test]
    fn enforces_max_value() {
        let accepts = vec![requirement(ChainId::eip155(8453), 1000)];
        let result = select_payment_requirements(
            &accepts,
            None,
            None,
            Some(TokenAmount::from(999u64)),
        );
        assert!(matches!(result, Err(ClientError::AmountExceeded { .. })));
        let ok = select_payment_requirements(
            &accepts,
            None,
            None,
            Some(TokenAmount::from(1000u64)),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn empty_accepts_has_no_match() {
        let result = select_payment_requirements(&[], None, None, None);
        assert!(matches!(result, Err(ClientError::NoMatchingRequirement)));
    }

    #[test]
    fn payment_response_roundtrip() {
        let response = SettleResponse {
            success: true,
            error_reason: None,
            transaction: Some(x402_proto::types::TransactionHash([1u8; 32])),
            network: ChainId::eip155(8453),
            namespace: Default::default(),
            payer: Some("0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap()),
        };
        let encoded: Base64Bytes = (&response).try_into().unwrap();
        let decoded = decode_payment_response(encoded.as_ref()).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.network, ChainId::eip155(8453));
    }
}
