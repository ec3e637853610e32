//! Scheme engine wiring.
//!
//! Builds one Exact-EVM engine per configured network provider, sharing the
//! EIP-3009 probe cache, the paymaster client, and the scan sink across
//! engines.

use x402_evm::ExactEvmSettings;
use x402_evm::{Eip3009Probe, ExactEvm, FacilitatorLocal, ProviderCache, ScanSink, SponsorClient};

use crate::config::Config;

/// Builds the local facilitator from the provider cache and configuration.
pub fn build_facilitator(providers: &ProviderCache, config: &Config) -> FacilitatorLocal {
    let probe = Eip3009Probe::new();
    let sponsor = config
        .sponsor()
        .map(|(url, policy_uuid)| SponsorClient::new(url, policy_uuid));
    let scan = config.scan_url().cloned().map(ScanSink::spawn);
    let settings = ExactEvmSettings {
        deploy_erc4337_with_eip6492: config.deploy_erc4337_with_eip6492(),
        ..ExactEvmSettings::default()
    };

    let mut facilitator = FacilitatorLocal::new();
    for (chain_id, provider) in providers {
        tracing::info!(network = %chain_id, "registering exact-evm scheme engine");
        let engine = ExactEvm::new(
            provider.clone(),
            probe.clone(),
            sponsor.clone(),
            scan.clone(),
            settings.clone(),
        );
        facilitator = facilitator.register(engine);
    }
    facilitator
}
