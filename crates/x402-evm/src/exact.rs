//! The Exact-EVM scheme engine.
//!
//! Verification runs seven ordered checks against a payment payload; the
//! first failure is returned as a protocol-level `invalidReason`. Settlement
//! is a three-stage pipeline: optional EIP-6492 wallet deployment, a
//! sponsored (gasless) path through the paymaster on BNB Smart Chain, and a
//! direct facilitator-contract call as the fallback.
//!
//! The engine exclusively owns its provider (and therefore the signer) for
//! the duration of one verify/settle pair; payloads are immutable after
//! decode.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use std::time::Duration;
use tracing::instrument;

use x402_proto::facilitator::Facilitator;
use x402_proto::types::{
    EvmAddress, ExactEvmAuthorization, PayloadKind, Scheme, SettleRequest, SettleResponse,
    SupportedPaymentKind, SupportedPaymentKindsResponse, TokenAmount, TransactionHash,
    VerifyRequest, VerifyResponse, X402Version,
};
use x402_proto::UnixTimestamp;

use crate::contracts::{FACILITATOR_ADDRESS, FacilitatorRevert, IFacilitator};
use crate::error::ExactEvmError;
use crate::nonce::{DEFAULT_NONCE_RETRY_ATTEMPTS, NonceConflict};
use crate::probe::Eip3009Probe;
use crate::provider::{EvmProvider, PreparedCall};
use crate::scan::{ScanRecord, ScanSink};
use crate::signature::StructuredSignature;
use crate::sponsor::{SPONSORED_CHAIN_ID, SponsorClient};

/// Authorizations must outlive `now` by at least this many seconds at verify
/// time, to survive block inclusion latency.
const VALID_BEFORE_BUFFER_SECS: u64 = 6;

/// Tunable knobs of the scheme engine, seeded at startup.
#[derive(Debug, Clone)]
pub struct ExactEvmSettings {
    /// Address of the deployed facilitator contract.
    pub facilitator_address: Address,
    /// Enables settlement Stage A: deploying a counterfactual smart wallet
    /// from its EIP-6492 factory data before the transfer.
    pub deploy_erc4337_with_eip6492: bool,
    /// Submission attempts in the sponsored path before giving up on nonce
    /// conflicts.
    pub nonce_retry_attempts: u32,
}

impl Default for ExactEvmSettings {
    fn default() -> Self {
        Self {
            facilitator_address: FACILITATOR_ADDRESS,
            deploy_erc4337_with_eip6492: false,
            nonce_retry_attempts: DEFAULT_NONCE_RETRY_ATTEMPTS,
        }
    }
}

/// The Exact-EVM scheme engine for one network.
#[derive(Clone)]
pub struct ExactEvm {
    provider: EvmProvider,
    probe: Eip3009Probe,
    sponsor: Option<SponsorClient>,
    scan: Option<ScanSink>,
    settings: ExactEvmSettings,
}

/// Validates the authorization window against `now`.
///
/// `validBefore` must leave at least [`VALID_BEFORE_BUFFER_SECS`] of headroom
/// for block inclusion; `validAfter` must not be in the future.
fn check_window(
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
    now: UnixTimestamp,
) -> Result<(), ExactEvmError> {
    if valid_before < now + VALID_BEFORE_BUFFER_SECS {
        return Err(ExactEvmError::ValidBefore(format!(
            "expires {valid_before} but now+{VALID_BEFORE_BUFFER_SECS} is {}",
            now + VALID_BEFORE_BUFFER_SECS
        )));
    }
    if valid_after > now {
        return Err(ExactEvmError::ValidAfter(format!(
            "active from {valid_after} but now is {now}"
        )));
    }
    Ok(())
}

/// A payload that passed the structural guards, with its derived call data.
struct PreparedPayment<'a> {
    authorization: &'a ExactEvmAuthorization,
    signature: Bytes,
    asset: Address,
    required: TokenAmount,
    call: PreparedCall,
}

impl ExactEvm {
    pub fn new(
        provider: EvmProvider,
        probe: Eip3009Probe,
        sponsor: Option<SponsorClient>,
        scan: Option<ScanSink>,
        settings: ExactEvmSettings,
    ) -> Self {
        let sponsor = sponsor.filter(|_| provider.evm_chain_id() == SPONSORED_CHAIN_ID);
        Self {
            provider,
            probe,
            sponsor,
            scan,
            settings,
        }
    }

    pub fn provider(&self) -> &EvmProvider {
        &self.provider
    }

    /// Structural guards shared by verify and settle: payload kind, scheme,
    /// and network agreement between payload, requirement, and provider.
    fn guard(&self, request: &VerifyRequest) -> Result<(), ExactEvmError> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        if payload.kind == Some(PayloadKind::Transaction) {
            return Err(ExactEvmError::InvalidPayload(
                "signAndSendTransaction payments are not settled by this facilitator".into(),
            ));
        }
        let scheme = payload
            .scheme()
            .ok_or_else(|| ExactEvmError::InvalidPayload("payload names no scheme".into()))?;
        if scheme != Scheme::Exact || requirements.scheme != Scheme::Exact {
            return Err(ExactEvmError::UnsupportedScheme);
        }
        let network = payload
            .network()
            .ok_or_else(|| ExactEvmError::InvalidPayload("payload names no network".into()))?;
        if network != &requirements.network {
            return Err(ExactEvmError::NetworkMismatch {
                expected: requirements.network.clone(),
                actual: network.clone(),
            });
        }
        if &requirements.network != self.provider.chain_id() {
            return Err(ExactEvmError::NetworkMismatch {
                expected: self.provider.chain_id().clone(),
                actual: requirements.network.clone(),
            });
        }
        Ok(())
    }

    /// Runs the guards, probes the asset, and encodes the facilitator call.
    async fn prepare<'a>(
        &self,
        request: &'a VerifyRequest,
    ) -> Result<PreparedPayment<'a>, ExactEvmError> {
        self.guard(request)?;
        let requirements = &request.payment_requirements;
        let authorization = &request.payment_payload.payload.authorization;
        let signature: Bytes = request.payment_payload.payload.signature.clone().into();
        let asset: Address = requirements.asset.into();
        let required = requirements
            .required_atomic_amount()
            .map_err(|e| ExactEvmError::InvalidPayload(e.to_string()))?;
        let supports_eip3009 = self.probe.supports_eip3009(&self.provider, asset).await;
        let need_approve = !supports_eip3009;
        let call = self.facilitator_call(asset, authorization, need_approve, signature.clone());
        Ok(PreparedPayment {
            authorization,
            signature,
            asset,
            required,
            call,
        })
    }

    /// Encodes `tokenTransferWithAuthorization` for the facilitator contract.
    fn facilitator_call(
        &self,
        asset: Address,
        authorization: &ExactEvmAuthorization,
        need_approve: bool,
        signature: Bytes,
    ) -> PreparedCall {
        let call = IFacilitator::tokenTransferWithAuthorizationCall {
            token: asset,
            from: authorization.from.into(),
            to: authorization.to.into(),
            value: authorization.value.into(),
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: FixedBytes(authorization.nonce.0),
            needApprove: need_approve,
            signature,
        };
        PreparedCall {
            to: self.settings.facilitator_address,
            input: call.abi_encode().into(),
        }
    }

    /// The seven ordered verification checks. The first failure wins.
    #[instrument(skip_all, err, fields(network = %self.provider.chain_id()))]
    async fn check_payment(&self, request: &VerifyRequest) -> Result<EvmAddress, ExactEvmError> {
        let prepared = self.prepare(request).await?;
        let authorization = prepared.authorization;
        let payer = authorization.from;

        // Authorization gas simulation against the facilitator contract. The
        // contract enforces the signature, window, and nonce; a classified
        // revert selector is a definitive rejection.
        let estimate_tx = prepared.call.as_request(self.provider.signer_address().into());
        if let Err(message) = self.provider.estimate_gas(estimate_tx).await {
            if let Some(revert) = FacilitatorRevert::from_error_text(&message) {
                return Err(ExactEvmError::Revert(revert));
            }
            self.analyze_smart_wallet(payer, &prepared.signature, &message)
                .await?;
        }

        let requirements = &request.payment_requirements;
        let pay_to = requirements.pay_to;
        if authorization.to != pay_to {
            return Err(ExactEvmError::RecipientMismatch {
                payer,
                expected: pay_to,
                actual: authorization.to,
            });
        }

        let now = UnixTimestamp::try_now()?;
        check_window(authorization.valid_after, authorization.valid_before, now)?;

        match self.provider.token_balance(prepared.asset, payer.into()).await {
            Ok(balance) => {
                if balance < <TokenAmount as Into<U256>>::into(prepared.required) {
                    return Err(ExactEvmError::InsufficientFunds(payer));
                }
            }
            // A failed balance read is tolerated; the settlement transaction
            // is the final arbiter.
            Err(message) => {
                tracing::warn!(error = %message, "balance read failed, continuing");
            }
        }

        if authorization.value < prepared.required {
            return Err(ExactEvmError::InsufficientValue(payer));
        }

        Ok(payer)
    }

    /// Smart-wallet analysis for unclassified gas-estimate failures.
    ///
    /// A signature longer than 65 bytes may belong to a contract wallet. An
    /// undeployed wallet is acceptable only when its EIP-6492 wrapper carries
    /// a factory address and calldata (deployment happens at settlement).
    async fn analyze_smart_wallet(
        &self,
        payer: EvmAddress,
        signature: &Bytes,
        message: &str,
    ) -> Result<(), ExactEvmError> {
        if signature.len() <= 65 {
            return Err(ExactEvmError::InvalidSignature {
                payer,
                message: message.to_string(),
            });
        }
        let deployed = self.provider.has_code(payer.into()).await?;
        if deployed {
            return Err(ExactEvmError::InvalidSignature {
                payer,
                message: message.to_string(),
            });
        }
        match StructuredSignature::parse(signature) {
            Ok(parsed) if parsed.has_deploy_data() => Ok(()),
            _ => Err(ExactEvmError::UndeployedSmartWallet(payer)),
        }
    }

    /// Settlement Stage A: deploy a counterfactual wallet from its EIP-6492
    /// factory data. A failed deployment aborts settlement.
    async fn deploy_smart_wallet(
        &self,
        payer: EvmAddress,
        signature: &Bytes,
        deadline: Duration,
    ) -> Result<(), ExactEvmError> {
        if !self.settings.deploy_erc4337_with_eip6492 {
            return Ok(());
        }
        let Ok(parsed) = StructuredSignature::parse(signature) else {
            return Ok(());
        };
        let StructuredSignature::Eip6492 {
            factory,
            factory_calldata,
            ..
        } = &parsed
        else {
            return Ok(());
        };
        if !parsed.has_deploy_data() || self.provider.has_code(payer.into()).await? {
            return Ok(());
        }
        tracing::info!(payer = %payer, factory = %factory, "deploying smart wallet before settlement");
        let tx = TransactionRequest::default()
            .with_to(*factory)
            .with_input(factory_calldata.clone());
        let pending = self
            .provider
            .inner()
            .send_transaction(tx)
            .await
            .map_err(|e| ExactEvmError::ContractCall(format!("{e:?}")))?;
        let receipt = self.provider.wait_for_receipt(pending, deadline).await?;
        if !receipt.status() {
            return Err(ExactEvmError::TransactionFailed(
                receipt.transaction_hash.into(),
            ));
        }
        Ok(())
    }

    /// Settlement Stage B: the sponsored (gasless) path.
    ///
    /// Validates sponsorship, then submits with `gasPrice = 0`, refetching the
    /// signer's pending nonce for every attempt and retrying classified nonce
    /// conflicts with backoff. Non-nonce errors abort immediately.
    async fn settle_sponsored(
        &self,
        sponsor: &SponsorClient,
        prepared: &PreparedPayment<'_>,
        deadline: Duration,
    ) -> Result<TransactionHash, ExactEvmError> {
        let signer: Address = self.provider.signer_address().into();
        let sponsorable = sponsor
            .validate(
                self.provider.evm_chain_id(),
                signer,
                prepared.call.to,
                prepared.call.input.clone(),
            )
            .await
            .map_err(|e| ExactEvmError::ContractCall(e.to_string()))?;
        if !sponsorable {
            return Err(ExactEvmError::ContractCall(
                "paymaster declined sponsorship".into(),
            ));
        }

        let gas = self
            .provider
            .estimate_gas(prepared.call.as_request(signer))
            .await
            .map_err(ExactEvmError::ContractCall)?;

        let attempts = self.settings.nonce_retry_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            // Never trust an in-memory counter: refetch the pending nonce on
            // every attempt.
            let nonce = self.provider.transaction_count_pending(signer).await?;
            let tx = prepared
                .call
                .as_request(signer)
                .with_nonce(nonce)
                .with_gas_price(0)
                .with_gas_limit(gas.saturating_mul(12) / 10)
                .with_chain_id(self.provider.evm_chain_id());
            match self.provider.sign_and_send_raw(tx).await {
                Ok(pending) => {
                    let receipt = self.provider.wait_for_receipt(pending, deadline).await?;
                    if receipt.status() {
                        return Ok(receipt.transaction_hash.into());
                    }
                    return Err(ExactEvmError::TransactionFailed(
                        receipt.transaction_hash.into(),
                    ));
                }
                Err(message) => {
                    let Some(conflict) = NonceConflict::classify(&message) else {
                        return Err(ExactEvmError::ContractCall(message));
                    };
                    tracing::warn!(
                        attempt,
                        conflict = ?conflict,
                        error = %message,
                        "sponsored submission hit nonce conflict"
                    );
                    last_error = message;
                    if conflict == NonceConflict::TooHigh {
                        // Resynchronize against confirmed state before retrying.
                        let _ = self.provider.transaction_count_latest(signer).await;
                    }
                    tokio::time::sleep(conflict.backoff(attempt)).await;
                }
            }
        }
        Err(ExactEvmError::ContractCall(last_error))
    }

    /// Settlement Stage C: direct submission from the facilitator's signer.
    async fn settle_direct(
        &self,
        prepared: &PreparedPayment<'_>,
        deadline: Duration,
    ) -> Result<TransactionHash, ExactEvmError> {
        let signer: Address = self.provider.signer_address().into();
        let mut tx = prepared.call.as_request(signer);
        if !self.provider.is_eip1559() {
            let gas_price = self.provider.gas_price().await?;
            tx = tx.with_gas_price(gas_price);
        }
        let pending = self.provider.inner().send_transaction(tx).await.map_err(|e| {
                let message = format!("{e:?}");
                match FacilitatorRevert::from_error_text(&message) {
                    Some(revert) => ExactEvmError::Revert(revert),
                    None => ExactEvmError::ContractCall(message),
                }
            })?;
        let receipt = self.provider.wait_for_receipt(pending, deadline).await?;
        if receipt.status() {
            Ok(receipt.transaction_hash.into())
        } else {
            Err(ExactEvmError::TransactionFailed(
                receipt.transaction_hash.into(),
            ))
        }
    }

    /// Emits the scan record for a sponsored settlement. Fire-and-forget.
    fn emit_scan_record(
        &self,
        request: &SettleRequest,
        prepared: &PreparedPayment<'_>,
        transaction: TransactionHash,
    ) {
        let Some(scan) = &self.scan else { return };
        let requirements = &request.payment_requirements;
        let resource = request
            .payment_payload
            .resource
            .as_ref()
            .map(|r| r.url.clone())
            .or_else(|| requirements.resource.as_ref().map(|u| u.to_string()));
        scan.record(ScanRecord {
            from: prepared.authorization.from,
            to: prepared.authorization.to,
            value: prepared.authorization.value,
            valid_after: prepared.authorization.valid_after,
            valid_before: prepared.authorization.valid_before,
            nonce: prepared.authorization.nonce,
            asset: requirements.asset,
            network: requirements.network.clone(),
            pay_to: requirements.pay_to,
            amount: prepared.required,
            resource,
            transaction,
            timestamp: String::new(),
        });
    }
}

impl Facilitator for ExactEvm {
    type Error = ExactEvmError;

    /// Verifies a payment payload. Protocol-level rejections are returned as
    /// an invalid [`VerifyResponse`], never as `Err`.
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let payer = request.payment_payload.payer();
        match self.check_payment(request).await {
            Ok(payer) => Ok(VerifyResponse::valid(payer)),
            Err(error) => {
                tracing::warn!(error = %error, payer = %payer, "verification failed");
                Ok(VerifyResponse::invalid(error.verify_reason(), Some(payer)))
            }
        }
    }

    /// Settles a verified payment on-chain.
    #[instrument(skip_all, fields(network = %self.provider.chain_id()))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let payer = request.payment_payload.payer();
        let network = request.payment_requirements.network.clone();
        let deadline = Duration::from_secs(request.payment_requirements.max_timeout_seconds);

        let outcome = async {
            let prepared = self.prepare(request).await?;
            self.deploy_smart_wallet(payer, &prepared.signature, deadline)
                .await?;

            if let Some(sponsor) = &self.sponsor {
                match self.settle_sponsored(sponsor, &prepared, deadline).await {
                    Ok(transaction) => {
                        self.emit_scan_record(request, &prepared, transaction);
                        return Ok(transaction);
                    }
                    Err(error) => {
                        tracing::debug!(error = %error, "sponsored path failed, falling back to direct settlement");
                    }
                }
            }

            self.settle_direct(&prepared, deadline).await
        }
        .await;

        match outcome {
            Ok(transaction) => {
                tracing::info!(tx = %transaction, "settlement succeeded");
                Ok(SettleResponse {
                    success: true,
                    error_reason: None,
                    transaction: Some(transaction),
                    network,
                    namespace: Default::default(),
                    payer: Some(payer),
                })
            }
            Err(error) => {
                tracing::warn!(error = %error, "settlement failed");
                Ok(SettleResponse {
                    success: false,
                    error_reason: Some(error.settle_reason()),
                    transaction: error.transaction(),
                    network,
                    namespace: Default::default(),
                    payer: Some(payer),
                })
            }
        }
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let fee_payer = self.provider.signer_address().to_string();
        let kinds = [X402Version::V1, X402Version::V2]
            .into_iter()
            .map(|version| SupportedPaymentKind {
                x402_version: version,
                scheme: Scheme::Exact,
                network: self.provider.chain_id().clone(),
                extra: Some(serde_json::json!({ "feePayer": fee_payer })),
            })
            .collect();
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_wellknown_contract() {
        let settings = ExactEvmSettings::default();
        assert_eq!(settings.facilitator_address, FACILITATOR_ADDRESS);
        assert!(!settings.deploy_erc4337_with_eip6492);
        assert_eq!(settings.nonce_retry_attempts, 5);
    }

    #[test]
    fn window_boundary_around_the_six_second_buffer() {
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let valid_after = now - 60;
        assert!(matches!(
            check_window(valid_after, now + 5, now),
            Err(ExactEvmError::ValidBefore(_))
        ));
        assert!(check_window(valid_after, now + 6, now).is_ok());
    }

    #[test]
    fn future_valid_after_is_rejected() {
        let now = UnixTimestamp::from_secs(1_700_000_000);
        assert!(matches!(
            check_window(now + 1, now + 600, now),
            Err(ExactEvmError::ValidAfter(_))
        ));
        assert!(check_window(now, now + 600, now).is_ok());
    }
}
