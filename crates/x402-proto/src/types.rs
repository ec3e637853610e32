//! Wire types for the x402 protocol.
//!
//! This mirrors the structures and validation logic of the official x402 SDKs.
//! The key objects are [`PaymentPayload`], [`PaymentRequirements`],
//! [`VerifyResponse`], and [`SettleResponse`], which encode payment intent,
//! authorization, and the result of verification and settlement.
//!
//! Authorizations follow the ERC-3009 shape (EIP-712 typed signatures); the
//! facilitator-contract variant adds a `needApprove` flag for tokens without
//! native `transferWithAuthorization` support.

use alloy::hex;
use alloy::primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use url::Url;

use crate::chain_id::ChainId;
use crate::timestamp::UnixTimestamp;
use crate::util::money_amount::MoneyAmount;
use crate::util::Base64Bytes;

/// Represents the protocol version. Version 2 is current; version 1 payloads
/// are still accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    /// Legacy version `1`: `X-PAYMENT` / `X-PAYMENT-RESPONSE` headers.
    V1,
    /// Version `2`: `payment-required` / `payment-signature` headers.
    V2,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V1 => serializer.serialize_u8(1),
            X402Version::V2 => serializer.serialize_u8(2),
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X402Version::V1 => write!(f, "1"),
            X402Version::V2 => write!(f, "2"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported x402Version: {0}")]
pub struct X402VersionError(pub u8);

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            2 => Ok(X402Version::V2),
            _ => Err(X402VersionError(value)),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(serde::de::Error::custom)
    }
}

/// Enumerates payment schemes. Only `"exact"` is supported: the amount to be
/// transferred is fixed by the requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// Legacy V1 payload discriminator. Only `"payload"` payments are produced;
/// `"transaction"` is recognized on decode and rejected during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Payload,
    Transaction,
}

/// Represents an EVM address.
///
/// Wrapper around `alloy::primitives::Address`. Serializes as the EIP-55
/// checksummed form, accepts any-cased hex on decode.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy::primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy::primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl PartialEq<alloy::primitives::Address> for EvmAddress {
    fn eq(&self, other: &alloy::primitives::Address) -> bool {
        self.0 == *other
    }
}

/// An EVM signature blob, 0x-prefixed hex on the wire.
///
/// A plain EOA signature is exactly 65 bytes; EIP-1271 contract signatures and
/// EIP-6492 wrapped signatures are longer. Anything shorter than 65 bytes is
/// rejected at decode time.
#[derive(Clone, PartialEq, Eq)]
pub struct EvmSignature(pub alloy::primitives::Bytes);

impl EvmSignature {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<alloy::primitives::Bytes> for EvmSignature {
    fn from(bytes: alloy::primitives::Bytes) -> Self {
        EvmSignature(bytes)
    }
}

impl From<EvmSignature> for alloy::primitives::Bytes {
    fn from(signature: EvmSignature) -> Self {
        signature.0
    }
}

impl Debug for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmSignature(0x{})", hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x(?:[0-9a-fA-F]{2}){65,}$").expect("Invalid regex for EVM signature")
        });

        if !SIG_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed hex of at least 65 bytes",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Failed to decode EVM signature hex string"))?;
        Ok(EvmSignature(bytes.into()))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

/// A 32-byte random nonce, hex-encoded with 0x prefix (64 hex characters).
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl Debug for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexEncodedNonce(0x{})", hex::encode(self.0))
    }
}

impl Display for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<HexEncodedNonce> for alloy::primitives::FixedBytes<32> {
    fn from(nonce: HexEncodedNonce) -> Self {
        alloy::primitives::FixedBytes(nonce.0)
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid nonce regex"));

        if !NONCE_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("Invalid nonce format"));
        }
        let bytes =
            hex::decode(&s[2..]).map_err(|_| serde::de::Error::custom("Invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid length for nonce"))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A precise on-chain token amount in atomic units (after scaling by
/// `10^decimals`). Represented as a stringified integer in JSON to prevent
/// precision loss.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            String(String),
            Number(u64),
        }
        let raw = Raw::deserialize(deserializer)?;
        let value = match raw {
            Raw::String(s) => U256::from_str_radix(&s, 10)
                .map_err(|_| serde::de::Error::custom("amount must be a decimal integer string"))?,
            Raw::Number(n) => U256::from(n),
        };
        Ok(TokenAmount(value))
    }
}

/// A 32-byte EVM transaction hash, 0x-prefixed hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl From<alloy::primitives::FixedBytes<32>> for TransactionHash {
    fn from(hash: alloy::primitives::FixedBytes<32>) -> Self {
        TransactionHash(hash.0)
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

        if !TX_HASH_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("Invalid transaction hash format"));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Invalid hex in transaction hash"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Transaction hash must be exactly 32 bytes"))?;
        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// EIP-712 structured data for an authorization: who can transfer how much,
/// to whom, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Full payload authorizing a transfer: the EIP-712 struct plus its signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: ExactEvmAuthorization,
}

/// Metadata about the resource being paid for, carried in 402 responses and
/// mirrored back in V2 payment payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Describes a signed request to transfer a specific amount of funds on-chain.
///
/// Covers both wire generations: V1 payloads carry `scheme`/`network` at the
/// top level, V2 payloads embed the `accepted` requirement the client chose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ChainId>,
    pub payload: ExactEvmPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<PaymentRequirements>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<PayloadKind>,
}

impl PaymentPayload {
    /// The scheme the payer signed for: the V1 top-level field, or the
    /// `accepted` requirement's scheme for V2.
    pub fn scheme(&self) -> Option<Scheme> {
        self.scheme.or_else(|| self.accepted.as_ref().map(|a| a.scheme))
    }

    /// The network the payer signed for: the V1 top-level field, or the
    /// `accepted` requirement's network for V2.
    pub fn network(&self) -> Option<&ChainId> {
        self.network
            .as_ref()
            .or_else(|| self.accepted.as_ref().map(|a| &a.network))
    }

    /// The payer address from the signed authorization.
    pub fn payer(&self) -> EvmAddress {
        self.payload.authorization.from
    }
}

/// Error returned when decoding a base64-encoded [`PaymentPayload`] fails.
#[derive(Debug, thiserror::Error)]
pub enum PaymentPayloadB64DecodingError {
    /// The input bytes were not valid base64.
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// The JSON structure was invalid or did not conform to [`PaymentPayload`].
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TryFrom<Base64Bytes<'_>> for PaymentPayload {
    type Error = PaymentPayloadB64DecodingError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        let decoded = value.decode()?;
        serde_json::from_slice(&decoded).map_err(PaymentPayloadB64DecodingError::from)
    }
}

/// Metadata required to identify a token in EIP-712 typed data signatures:
/// the `name` and `version` fields of the domain separator.
///
/// These values must match what the token contract reports and are critical
/// for signature validity. Also used as the `extra` attachment on a
/// [`PaymentRequirements`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TokenDeploymentEip712 {
    pub name: String,
    pub version: String,
}

/// A fungible token identified by its address and network.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenAsset {
    pub address: EvmAddress,
    pub chain_id: ChainId,
}

impl Display for TokenAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // CAIP-19 asset id https://chainagnostic.org/CAIPs/caip-19
        write!(f, "{}/erc20:{}", self.chain_id, self.address)
    }
}

/// A specific deployed ERC-20 token instance, including the metadata needed
/// for value formatting and EIP-712 signing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenDeployment {
    pub asset: TokenAsset,
    pub decimals: u32,
    pub eip712: Option<TokenDeploymentEip712>,
}

impl TokenDeployment {
    pub fn address(&self) -> EvmAddress {
        self.asset.address
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.asset.chain_id
    }
}

/// Requirements set by the payment-gated endpoint for an acceptable payment.
///
/// The required amount is carried either as `amount` (atomic units) or as the
/// human-readable `amountRequired` plus `tokenDecimals`; one of the two forms
/// must be derivable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    pub asset: EvmAddress,
    pub pay_to: EvmAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<TokenAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_required: Option<MoneyAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_decimals: Option<u32>,
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<TokenDeploymentEip712>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Url>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

fn default_max_timeout_seconds() -> u64 {
    300
}

/// Error returned when a requirement carries no derivable amount.
#[derive(Debug, thiserror::Error)]
pub enum RequirementAmountError {
    #[error("Payment requirement carries neither `amount` nor `amountRequired`")]
    Missing,
    #[error("`amountRequired` needs `tokenDecimals` to derive atomic units")]
    MissingDecimals,
    #[error("Failed to scale amountRequired: {0}")]
    Scale(String),
}

impl PaymentRequirements {
    /// Derives the required amount in atomic units.
    ///
    /// Prefers the explicit `amount`; otherwise scales `amountRequired` by
    /// `tokenDecimals`.
    pub fn required_atomic_amount(&self) -> Result<TokenAmount, RequirementAmountError> {
        if let Some(amount) = self.amount {
            return Ok(amount);
        }
        let human = self
            .amount_required
            .as_ref()
            .ok_or(RequirementAmountError::Missing)?;
        let decimals = self
            .token_decimals
            .ok_or(RequirementAmountError::MissingDecimals)?;
        let amount = human
            .as_token_amount(decimals)
            .map_err(|e| RequirementAmountError::Scale(e.to_string()))?;
        Ok(amount)
    }

    /// Whether a payload's accepted `(scheme, network, networkId)` triple
    /// matches this requirement. Used by the middleware's match selection.
    pub fn matches(&self, scheme: Scheme, network: &ChainId, network_id: Option<&str>) -> bool {
        self.scheme == scheme
            && self.network == *network
            && match (self.network_id.as_deref(), network_id) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

/// Wrapper for a payment payload and requirements sent to a facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x402_version: Option<X402Version>,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Settlement uses the same request shape as verification.
pub type SettleRequest = VerifyRequest;

/// Closed taxonomy of protocol error reasons.
///
/// The wire strings are part of the protocol; they are emitted verbatim and
/// must not be reworded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorReason {
    #[error("insufficient_funds")]
    #[serde(rename = "insufficient_funds")]
    InsufficientFunds,
    #[error("unsupported_scheme")]
    #[serde(rename = "unsupported_scheme")]
    UnsupportedScheme,
    #[error("network_mismatch")]
    #[serde(rename = "network_mismatch")]
    NetworkMismatch,
    #[error("missing_eip712_domain")]
    #[serde(rename = "missing_eip712_domain")]
    MissingEip712Domain,
    #[error("invalid_exact_evm_payload_signature")]
    #[serde(rename = "invalid_exact_evm_payload_signature")]
    InvalidSignature,
    #[error("invalid_exact_evm_payload_undeployed_smart_wallet")]
    #[serde(rename = "invalid_exact_evm_payload_undeployed_smart_wallet")]
    UndeployedSmartWallet,
    #[error("invalid_exact_evm_payload_recipient_mismatch")]
    #[serde(rename = "invalid_exact_evm_payload_recipient_mismatch")]
    RecipientMismatch,
    #[error("invalid_exact_evm_payload_authorization_valid_before")]
    #[serde(rename = "invalid_exact_evm_payload_authorization_valid_before")]
    AuthorizationValidBefore,
    #[error("invalid_exact_evm_payload_authorization_valid_after")]
    #[serde(rename = "invalid_exact_evm_payload_authorization_valid_after")]
    AuthorizationValidAfter,
    #[error("invalid_exact_evm_payload_authorization_value")]
    #[serde(rename = "invalid_exact_evm_payload_authorization_value")]
    AuthorizationValue,
    #[error("invalid_scheme")]
    #[serde(rename = "invalid_scheme")]
    InvalidScheme,
    #[error("invalid_transaction_state")]
    #[serde(rename = "invalid_transaction_state")]
    InvalidTransactionState,
    #[error("invalid_payload")]
    #[serde(rename = "invalid_payload")]
    InvalidPayload,
    #[error("invalid_network")]
    #[serde(rename = "invalid_network")]
    InvalidNetwork,
    #[error("invalid_x402_version")]
    #[serde(rename = "invalid_x402_version")]
    InvalidX402Version,
    #[error("payment_expired")]
    #[serde(rename = "payment_expired")]
    PaymentExpired,
    #[error("nonce_used")]
    #[serde(rename = "nonce_used")]
    NonceUsed,
    #[error("unexpected_verify_error")]
    #[serde(rename = "unexpected_verify_error")]
    UnexpectedVerifyError,
    #[error("unexpected_settle_error")]
    #[serde(rename = "unexpected_settle_error")]
    UnexpectedSettleError,
}

/// Result returned by a facilitator after verifying a [`PaymentPayload`]
/// against the provided [`PaymentRequirements`].
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResponse {
    /// The payload matches the requirements and passes all checks.
    Valid { payer: EvmAddress },
    /// The payload failed verification for the given [`ErrorReason`].
    Invalid {
        reason: ErrorReason,
        payer: Option<EvmAddress>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: EvmAddress) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(reason: ErrorReason, payer: Option<EvmAddress>) -> Self {
        VerifyResponse::Invalid { reason, payer }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }

    pub fn payer(&self) -> Option<EvmAddress> {
        match self {
            VerifyResponse::Valid { payer } => Some(*payer),
            VerifyResponse::Invalid { payer, .. } => *payer,
        }
    }
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VerifyResponse::Valid { payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 2)?;
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", payer)?;
                s.end()
            }
            VerifyResponse::Invalid { reason, payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 3)?;
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
                s.serialize_field("payer", payer)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            #[serde(default)]
            payer: Option<EvmAddress>,
            #[serde(default)]
            invalid_reason: Option<ErrorReason>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match (raw.is_valid, raw.invalid_reason) {
            (true, None) => {
                let payer = raw.payer.ok_or_else(|| {
                    serde::de::Error::custom("`payer` must be present when `isValid` is true")
                })?;
                Ok(VerifyResponse::Valid { payer })
            }
            (false, Some(reason)) => Ok(VerifyResponse::Invalid {
                payer: raw.payer,
                reason,
            }),
            (true, Some(_)) => Err(serde::de::Error::custom(
                "`invalidReason` must be absent when `isValid` is true",
            )),
            (false, None) => Err(serde::de::Error::custom(
                "`invalidReason` must be present when `isValid` is false",
            )),
        }
    }
}

/// Settlement namespace marker; always `"evm"` for this facilitator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvmNamespace;

impl Serialize for EvmNamespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("evm")
    }
}

impl<'de> Deserialize<'de> for EvmNamespace {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "evm" {
            Ok(EvmNamespace)
        } else {
            Err(serde::de::Error::custom(format!(
                "unexpected namespace: {s}"
            )))
        }
    }
}

/// Returned from a facilitator after attempting to settle a payment on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    pub network: ChainId,
    #[serde(default)]
    pub namespace: EvmNamespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<EvmAddress>,
}

/// Error returned when encoding a [`SettleResponse`] into base64 fails.
#[derive(Debug, thiserror::Error)]
#[error("Failed to encode settle response as base64 string: {0}")]
pub struct SettleResponseB64EncodingError(#[from] pub serde_json::Error);

impl TryFrom<&SettleResponse> for Base64Bytes<'static> {
    type Error = SettleResponseB64EncodingError;

    fn try_from(value: &SettleResponse) -> Result<Self, Self::Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Base64Bytes::encode(json))
    }
}

/// Response returned from a payment-gated endpoint when no valid payment was
/// provided or accepted.
///
/// Serialized into an HTTP 402 body and, base64-encoded, into the V2
/// `payment-required` header. Cases include a missing payment header, a
/// malformed payload, no matching requirements, and failed verification or
/// settlement.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: X402Version,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<EvmAddress>,
}

impl Display for PaymentRequiredResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PaymentRequiredResponse: error='{}', accepts={} requirement(s), version={}",
            self.error,
            self.accepts.len(),
            self.x402_version
        )
    }
}

/// One `(version, scheme, network)` capability tuple of a facilitator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response of the facilitator's `/supported` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

/// A simple error structure returned on unexpected or fatal server errors.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorization() -> ExactEvmAuthorization {
        ExactEvmAuthorization {
            from: "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap(),
            to: "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
            value: TokenAmount::from(1000u64),
            valid_after: UnixTimestamp::from_secs(1700000000),
            valid_before: UnixTimestamp::from_secs(1700000600),
            nonce: HexEncodedNonce([7u8; 32]),
        }
    }

    #[test]
    fn error_reason_wire_strings_are_fixed() {
        let expectations = [
            (ErrorReason::InsufficientFunds, "insufficient_funds"),
            (ErrorReason::UnsupportedScheme, "unsupported_scheme"),
            (ErrorReason::NetworkMismatch, "network_mismatch"),
            (ErrorReason::MissingEip712Domain, "missing_eip712_domain"),
            (
                ErrorReason::InvalidSignature,
                "invalid_exact_evm_payload_signature",
            ),
            (
                ErrorReason::UndeployedSmartWallet,
                "invalid_exact_evm_payload_undeployed_smart_wallet",
            ),
            (
                ErrorReason::RecipientMismatch,
                "invalid_exact_evm_payload_recipient_mismatch",
            ),
            (
                ErrorReason::AuthorizationValidBefore,
                "invalid_exact_evm_payload_authorization_valid_before",
            ),
            (
                ErrorReason::AuthorizationValidAfter,
                "invalid_exact_evm_payload_authorization_valid_after",
            ),
            (
                ErrorReason::AuthorizationValue,
                "invalid_exact_evm_payload_authorization_value",
            ),
            (ErrorReason::InvalidScheme, "invalid_scheme"),
            (
                ErrorReason::InvalidTransactionState,
                "invalid_transaction_state",
            ),
            (ErrorReason::InvalidPayload, "invalid_payload"),
            (ErrorReason::InvalidNetwork, "invalid_network"),
            (ErrorReason::InvalidX402Version, "invalid_x402_version"),
            (ErrorReason::PaymentExpired, "payment_expired"),
            (ErrorReason::NonceUsed, "nonce_used"),
            (ErrorReason::UnexpectedVerifyError, "unexpected_verify_error"),
            (ErrorReason::UnexpectedSettleError, "unexpected_settle_error"),
        ];
        for (reason, wire) in expectations {
            assert_eq!(serde_json::to_string(&reason).unwrap(), format!("\"{wire}\""));
            assert_eq!(reason.to_string(), wire);
        }
    }

    #[test]
    fn signature_accepts_long_blobs() {
        let eoa = format!("\"0x{}\"", "ab".repeat(65));
        let sig: EvmSignature = serde_json::from_str(&eoa).unwrap();
        assert_eq!(sig.len(), 65);

        let wrapped = format!("\"0x{}\"", "cd".repeat(300));
        let sig: EvmSignature = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(sig.len(), 300);
    }

    #[test]
    fn signature_rejects_short_blobs() {
        let short = format!("\"0x{}\"", "ab".repeat(64));
        assert!(serde_json::from_str::<EvmSignature>(&short).is_err());
    }

    #[test]
    fn payment_payload_base64_roundtrip() {
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: None,
            network: None,
            payload: ExactEvmPayload {
                signature: EvmSignature(vec![1u8; 65].into()),
                authorization: authorization(),
            },
            resource: Some(ResourceInfo {
                url: "https://api.example/premium".into(),
                description: "Premium data".into(),
                mime_type: Some("application/json".into()),
            }),
            accepted: Some(requirement()),
            kind: None,
        };
        let json = serde_json::to_vec(&payload).unwrap();
        let encoded = Base64Bytes::encode(&json);
        let decoded = PaymentPayload::try_from(encoded).unwrap();
        assert_eq!(
            serde_json::to_value(&decoded).unwrap(),
            serde_json::to_value(&payload).unwrap()
        );
        assert_eq!(decoded.scheme(), Some(Scheme::Exact));
        assert_eq!(decoded.network(), Some(&ChainId::eip155(8453)));
    }

    fn requirement() -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: ChainId::eip155(8453),
            network_id: None,
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap(),
            pay_to: "0x2EC8A9A2dd6b33ca2a89375f0b9e6d34b9AF3628".parse().unwrap(),
            amount: Some(TokenAmount::from(1000u64)),
            amount_required: None,
            token_decimals: None,
            max_timeout_seconds: 600,
            extra: Some(TokenDeploymentEip712 {
                name: "USD Coin".into(),
                version: "2".into(),
            }),
            resource: None,
            description: String::new(),
            mime_type: None,
        }
    }

    #[test]
    fn atomic_amount_prefers_explicit_amount() {
        let requirements = requirement();
        assert_eq!(
            requirements.required_atomic_amount().unwrap(),
            TokenAmount::from(1000u64)
        );
    }

    #[test]
    fn atomic_amount_scales_human_form() {
        let mut requirements = requirement();
        requirements.amount = None;
        requirements.amount_required = Some("0.01".parse().unwrap());
        requirements.token_decimals = Some(6);
        assert_eq!(
            requirements.required_atomic_amount().unwrap(),
            TokenAmount::from(10000u64)
        );
    }

    #[test]
    fn atomic_amount_requires_one_form() {
        let mut requirements = requirement();
        requirements.amount = None;
        assert!(matches!(
            requirements.required_atomic_amount(),
            Err(RequirementAmountError::Missing)
        ));
        requirements.amount_required = Some("0.01".parse().unwrap());
        assert!(matches!(
            requirements.required_atomic_amount(),
            Err(RequirementAmountError::MissingDecimals)
        ));
    }

    #[test]
    fn verify_response_serde_consistency() {
        let valid = VerifyResponse::valid(
            "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap(),
        );
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["isValid"], true);
        assert!(json.get("invalidReason").is_none());

        let invalid = VerifyResponse::invalid(ErrorReason::InsufficientFunds, None);
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "insufficient_funds");

        let inconsistent = serde_json::json!({"isValid": false});
        assert!(serde_json::from_value::<VerifyResponse>(inconsistent).is_err());
    }

    #[test]
    fn settle_response_carries_evm_namespace() {
        let response = SettleResponse {
            success: true,
            error_reason: None,
            transaction: Some(TransactionHash([9u8; 32])),
            network: ChainId::eip155(8453),
            namespace: EvmNamespace,
            payer: Some("0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap()),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["namespace"], "evm");
        assert_eq!(json["network"], "eip155:8453");
        let b64: Base64Bytes = (&response).try_into().unwrap();
        let decoded: SettleResponse = serde_json::from_slice(&b64.decode().unwrap()).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.transaction, response.transaction);
    }

    #[test]
    fn requirement_matching_honors_network_id() {
        let mut requirements = requirement();
        requirements.network_id = Some("8453".into());
        assert!(requirements.matches(Scheme::Exact, &ChainId::eip155(8453), Some("8453")));
        assert!(requirements.matches(Scheme::Exact, &ChainId::eip155(8453), None));
        assert!(!requirements.matches(Scheme::Exact, &ChainId::eip155(8453), Some("56")));
        assert!(!requirements.matches(Scheme::Exact, &ChainId::eip155(56), None));
    }
}
