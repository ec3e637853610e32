//! Ethereum provider stack and per-network provider cache.
//!
//! The scheme engine talks to each chain through an [`EvmProvider`]: an alloy
//! provider composed of gas, nonce, chain-id and wallet filler layers over a
//! JSON-RPC transport. Providers are constructed from environment variables,
//! one per configured network.
//!
//! Environment variables used:
//! - `SIGNER_TYPE` — currently only `"private-key"` is supported,
//! - `EVM_PRIVATE_KEY` — comma-separated list of private keys used to sign
//!   transactions,
//! - `RPC_URL_BSC`, `RPC_URL_BASE`, `RPC_URL_XLAYER`, `RPC_URL_KITE` — RPC
//!   endpoints per network.

use alloy::network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy::providers::{Identity, PendingTransactionBuilder, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{Instrument, instrument};

use x402_proto::ChainId;
use x402_proto::networks::USDCDeployment;
use x402_proto::types::{EvmAddress, TokenDeploymentEip712, TransactionHash};

use crate::contracts::IERC20;
use crate::error::ExactEvmError;

const ENV_SIGNER_TYPE: &str = "SIGNER_TYPE";
const ENV_EVM_PRIVATE_KEY: &str = "EVM_PRIVATE_KEY";
const ENV_RPC_BSC: &str = "RPC_URL_BSC";
const ENV_RPC_BASE: &str = "RPC_URL_BASE";
const ENV_RPC_XLAYER: &str = "RPC_URL_XLAYER";
const ENV_RPC_KITE: &str = "RPC_URL_KITE";

/// The fully composed Ethereum provider type used in this project.
///
/// Combines filler layers for gas, blob gas, nonce, and chain ID with wallet
/// signing, wrapping a [`RootProvider`] for actual JSON-RPC communication.
pub type InnerProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

/// A single network's provider: RPC transport, signing wallet, and chain
/// metadata.
#[derive(Clone, Debug)]
pub struct EvmProvider {
    inner: InnerProvider,
    wallet: EthereumWallet,
    chain_id: ChainId,
    evm_chain_id: u64,
    eip1559: bool,
}

impl EvmProvider {
    /// Connects a provider for the given network.
    pub fn try_new(
        wallet: EthereumWallet,
        rpc_url: &str,
        eip1559: bool,
        chain_id: ChainId,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let evm_chain_id = chain_id
            .evm_chain_id()
            .ok_or_else(|| format!("Not an EVM chain id: {chain_id}"))?;
        let url = rpc_url.parse::<url::Url>()?;
        let inner = ProviderBuilder::new()
            .wallet(wallet.clone())
            .connect_http(url);
        Ok(Self {
            inner,
            wallet,
            chain_id,
            evm_chain_id,
            eip1559,
        })
    }

    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn evm_chain_id(&self) -> u64 {
        self.evm_chain_id
    }

    pub fn is_eip1559(&self) -> bool {
        self.eip1559
    }

    /// The default signer address: transactions are sent from this account.
    pub fn signer_address(&self) -> EvmAddress {
        NetworkWallet::<Ethereum>::default_signer_address(&self.wallet).into()
    }

    /// All signer addresses registered on the wallet.
    pub fn signer_addresses(&self) -> Vec<EvmAddress> {
        NetworkWallet::<Ethereum>::signer_addresses(&self.wallet)
            .map(EvmAddress::from)
            .collect()
    }

    /// Whether contract code is present at `address`.
    #[instrument(skip_all, err, fields(address = %address))]
    pub async fn has_code(&self, address: Address) -> Result<bool, ExactEvmError> {
        let code = self
            .inner
            .get_code_at(address)
            .into_future()
            .instrument(tracing::info_span!("get_code_at", otel.kind = "client"))
            .await
            .map_err(|e| ExactEvmError::ContractCall(format!("{e:?}")))?;
        Ok(!code.is_empty())
    }

    /// Estimates gas for a call, surfacing the raw RPC error text so callers
    /// can classify revert selectors.
    pub async fn estimate_gas(&self, tx: TransactionRequest) -> Result<u64, String> {
        self.inner
            .estimate_gas(tx)
            .into_future()
            .instrument(tracing::info_span!("estimate_gas", otel.kind = "client"))
            .await
            .map_err(|e| format!("{e:?}"))
    }

    /// The account's transaction count including mempool transactions. Used
    /// when picking a nonce for submission.
    pub async fn transaction_count_pending(&self, address: Address) -> Result<u64, ExactEvmError> {
        self.inner
            .get_transaction_count(address)
            .pending()
            .into_future()
            .instrument(tracing::info_span!("get_transaction_count_pending", otel.kind = "client"))
            .await
            .map_err(|e| ExactEvmError::ContractCall(format!("{e:?}")))
    }

    /// The account's confirmed transaction count. Used to recover from
    /// "nonce too high" submission failures.
    pub async fn transaction_count_latest(&self, address: Address) -> Result<u64, ExactEvmError> {
        self.inner
            .get_transaction_count(address)
            .latest()
            .into_future()
            .instrument(tracing::info_span!("get_transaction_count_latest", otel.kind = "client"))
            .await
            .map_err(|e| ExactEvmError::ContractCall(format!("{e:?}")))
    }

    pub async fn gas_price(&self) -> Result<u128, ExactEvmError> {
        self.inner
            .get_gas_price()
            .instrument(tracing::info_span!("get_gas_price", otel.kind = "client"))
            .await
            .map_err(|e| ExactEvmError::ContractCall(format!("{e:?}")))
    }

    /// Reads the payer's token balance. Callers decide whether a read failure
    /// is fatal.
    pub async fn token_balance(&self, asset: Address, owner: Address) -> Result<U256, String> {
        let contract = IERC20::new(asset, &self.inner);
        contract
            .balanceOf(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "fetch_token_balance",
                token_contract = %asset,
                owner = %owner,
                otel.kind = "client"
            ))
            .await
            .map_err(|e| format!("{e:?}"))
    }

    /// Signs a fully specified transaction request with the wallet and
    /// broadcasts it as a raw transaction.
    ///
    /// The request must already carry nonce, gas, fees, and chain id: no
    /// filler runs on this path, which is what the sponsored-settlement flow
    /// needs for its `gasPrice = 0` transactions.
    pub async fn sign_and_send_raw(
        &self,
        tx: TransactionRequest,
    ) -> Result<PendingTransactionBuilder<Ethereum>, String> {
        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| format!("signing failed: {e}"))?;
        self.inner
            .send_tx_envelope(envelope)
            .instrument(tracing::info_span!("send_raw_transaction", otel.kind = "client"))
            .await
            .map_err(|e| format!("{e:?}"))
    }

    /// Waits for the receipt of a pending transaction, bounded by `deadline`.
    ///
    /// On timeout the transaction hash is preserved in the error so callers
    /// can still observe the in-flight transaction.
    pub async fn wait_for_receipt(
        &self,
        pending: PendingTransactionBuilder<Ethereum>,
        deadline: Duration,
    ) -> Result<TransactionReceipt, ExactEvmError> {
        let tx_hash: TxHash = *pending.tx_hash();
        let receipt = tokio::time::timeout(deadline, pending.get_receipt())
            .instrument(tracing::info_span!(
                "get_receipt",
                transaction = %tx_hash,
                otel.kind = "client"
            ))
            .await;
        match receipt {
            Err(_) => Err(ExactEvmError::ReceiptTimeout {
                transaction: TransactionHash(tx_hash.0),
            }),
            Ok(Err(e)) => Err(ExactEvmError::ContractCall(format!("{e:?}"))),
            Ok(Ok(receipt)) => Ok(receipt),
        }
    }

    /// Resolves the EIP-712 domain metadata for an asset.
    ///
    /// Resolution order: the requirement's `extra`, the statically known USDC
    /// deployment, then the token contract's `name()`/`version()` views.
    #[instrument(skip_all, err, fields(asset = %asset))]
    pub async fn resolve_eip712_domain(
        &self,
        asset: Address,
        extra: Option<&TokenDeploymentEip712>,
    ) -> Result<TokenDeploymentEip712, ExactEvmError> {
        if let Some(extra) = extra {
            return Ok(extra.clone());
        }
        if let Some(known) = USDCDeployment::by_chain_id(&self.chain_id) {
            if known.asset.address == EvmAddress(asset) {
                if let Some(eip712) = &known.eip712 {
                    return Ok(eip712.clone());
                }
            }
        }
        let contract = IERC20::new(asset, &self.inner);
        let name = contract
            .name()
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_eip712_name", otel.kind = "client"))
            .await
            .map_err(|_| ExactEvmError::MissingEip712Domain)?;
        let version = contract
            .version()
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_eip712_version", otel.kind = "client"))
            .await
            .map_err(|_| ExactEvmError::MissingEip712Domain)?;
        Ok(TokenDeploymentEip712 { name, version })
    }
}

/// A cache of pre-initialized [`EvmProvider`] instances keyed by chain id.
///
/// Built once at startup from environment variables; entries are never
/// replaced afterwards.
#[derive(Clone)]
pub struct ProviderCache {
    providers: HashMap<ChainId, EvmProvider>,
}

/// A generic map of providers keyed by chain id.
pub trait ProviderMap {
    type Value;

    /// Returns the provider for the given chain, if configured.
    fn by_chain_id<C: Borrow<ChainId>>(&self, chain_id: C) -> Option<&Self::Value>;

    /// Iterates over all configured providers.
    fn values(&self) -> impl Iterator<Item = &Self::Value>;
}

impl<'a> IntoIterator for &'a ProviderCache {
    type Item = (&'a ChainId, &'a EvmProvider);
    type IntoIter = std::collections::hash_map::Iter<'a, ChainId, EvmProvider>;

    fn into_iter(self) -> Self::IntoIter {
        self.providers.iter()
    }
}

impl ProviderCache {
    /// Constructs a [`ProviderCache`] from environment variables.
    ///
    /// Networks without an RPC URL are skipped with a warning. Fails if the
    /// signer configuration is missing or malformed.
    pub async fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut providers = HashMap::new();
        for chain_id in x402_proto::networks::supported_chain_ids() {
            let (env_var, eip1559) = match chain_id.evm_chain_id() {
                Some(56) => (ENV_RPC_BSC, false),
                Some(8453) => (ENV_RPC_BASE, true),
                Some(196) => (ENV_RPC_XLAYER, true),
                Some(2366) => (ENV_RPC_KITE, true),
                _ => continue,
            };
            let Ok(rpc_url) = env::var(env_var) else {
                tracing::warn!("No RPC URL configured for {} (skipped)", chain_id);
                continue;
            };
            let wallet = SignerType::from_env()?.make_evm_wallet()?;
            let provider = EvmProvider::try_new(wallet, &rpc_url, eip1559, chain_id.clone())?;
            tracing::info!(
                "Initialized provider for {} at {} using {}",
                chain_id,
                rpc_url,
                provider.signer_address()
            );
            providers.insert(chain_id, provider);
        }
        Ok(Self { providers })
    }

    /// Builds a cache from explicit providers, mainly for tests.
    pub fn new(providers: HashMap<ChainId, EvmProvider>) -> Self {
        Self { providers }
    }
}

impl ProviderMap for ProviderCache {
    type Value = EvmProvider;

    fn by_chain_id<C: Borrow<ChainId>>(&self, chain_id: C) -> Option<&EvmProvider> {
        self.providers.get(chain_id.borrow())
    }

    fn values(&self) -> impl Iterator<Item = &EvmProvider> {
        self.providers.values()
    }
}

/// Supported methods for constructing an Ethereum wallet from environment
/// variables.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerType {
    /// A local private key stored in the `EVM_PRIVATE_KEY` environment
    /// variable.
    #[serde(rename = "private-key")]
    PrivateKey,
}

impl SignerType {
    /// Parses the signer type from the `SIGNER_TYPE` environment variable.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let signer_type_string =
            env::var(ENV_SIGNER_TYPE).map_err(|_| format!("env {ENV_SIGNER_TYPE} not set"))?;
        match signer_type_string.as_str() {
            "private-key" => Ok(SignerType::PrivateKey),
            _ => Err(format!("Unknown signer type {signer_type_string}").into()),
        }
    }

    /// Constructs an [`EthereumWallet`] from the `EVM_PRIVATE_KEY` list. The
    /// first key becomes the default signer.
    pub fn make_evm_wallet(&self) -> Result<EthereumWallet, Box<dyn std::error::Error>> {
        match self {
            SignerType::PrivateKey => {
                let raw_keys = env::var(ENV_EVM_PRIVATE_KEY)
                    .map_err(|_| format!("env {ENV_EVM_PRIVATE_KEY} not set"))?;
                let keys: Vec<_> = raw_keys
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_owned)
                    .collect();
                let mut iter = keys.into_iter();
                let first_key = iter
                    .next()
                    .ok_or("env EVM_PRIVATE_KEY did not contain any private keys")?;
                let first_signer = PrivateKeySigner::from_str(&first_key)
                    .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
                let mut wallet = EthereumWallet::from(first_signer);
                for key in iter {
                    let signer = PrivateKeySigner::from_str(&key)
                        .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
                    wallet.register_signer(signer);
                }
                Ok(wallet)
            }
        }
    }
}

/// Encoded call data plus target, ready to estimate or submit.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub to: Address,
    pub input: Bytes,
}

impl PreparedCall {
    /// A [`TransactionRequest`] for this call from the given sender.
    pub fn as_request(&self, from: Address) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(from)
            .with_to(self.to)
            .with_input(self.input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn restore_env(key: &str, original: Option<String>) {
        if let Some(value) = original {
            // Safety: guarded by `ENV_LOCK`, so no concurrent environment mutation occurs.
            unsafe { env::set_var(key, value) };
        } else {
            // Safety: guarded by `ENV_LOCK`, so no concurrent environment mutation occurs.
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn make_evm_wallet_supports_multiple_private_keys() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original_signer_type = env::var(ENV_SIGNER_TYPE).ok();
        let original_evm_keys = env::var(ENV_EVM_PRIVATE_KEY).ok();

        const KEY_1: &str = "0xcafe000000000000000000000000000000000000000000000000000000000001";
        const KEY_2: &str = "0xcafe000000000000000000000000000000000000000000000000000000000002";

        // Safety: guarded by `ENV_LOCK`, so no concurrent environment mutation occurs.
        unsafe {
            env::set_var(ENV_SIGNER_TYPE, "private-key");
            env::set_var(ENV_EVM_PRIVATE_KEY, format!("{KEY_1},{KEY_2}"));
        }

        let signer_type = SignerType::from_env().expect("SIGNER_TYPE");
        let wallet = signer_type
            .make_evm_wallet()
            .expect("wallet constructed from env");

        let expected_primary = PrivateKeySigner::from_str(KEY_1).expect("key1 parses").address();
        let expected_secondary = PrivateKeySigner::from_str(KEY_2).expect("key2 parses").address();

        assert_eq!(
            NetworkWallet::<Ethereum>::default_signer_address(&wallet),
            expected_primary
        );
        let signers: Vec<_> = NetworkWallet::<Ethereum>::signer_addresses(&wallet).collect();
        assert_eq!(signers.len(), 2);
        assert!(signers.contains(&expected_primary));
        assert!(signers.contains(&expected_secondary));

        restore_env(ENV_EVM_PRIVATE_KEY, original_evm_keys);
        restore_env(ENV_SIGNER_TYPE, original_signer_type);
    }

    #[test]
    fn prepared_call_builds_request() {
        let call = PreparedCall {
            to: "0x555e3311a9893c9B17444C1Ff0d88192a57Ef13e".parse().unwrap(),
            input: Bytes::from(vec![1, 2, 3]),
        };
        let from: Address = "0x34B79cfE537C5a87dEeF7EA3a2C02ab2b4c1F510".parse().unwrap();
        let request = call.as_request(from);
        assert_eq!(request.from, Some(from));
        assert_eq!(request.input.input().map(|b| b.len()), Some(3));
    }
}
