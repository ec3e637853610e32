//! Local facilitator implementation routing payments to per-network engines.
//!
//! A payload is routed to the registered [`ExactEvm`] engine by its
//! `(scheme, network)` pair. Unknown networks are rejected with
//! `invalid_network`, unknown schemes with `unsupported_scheme`; both as
//! protocol-level results, not transport errors.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use x402_proto::ChainId;
use x402_proto::facilitator::Facilitator;
use x402_proto::types::{
    ErrorReason, Scheme, SettleRequest, SettleResponse, SupportedPaymentKindsResponse,
    VerifyRequest, VerifyResponse,
};

use crate::error::ExactEvmError;
use crate::exact::ExactEvm;

/// A concrete [`Facilitator`] that verifies and settles x402 payments with a
/// registry of per-network scheme engines.
#[derive(Clone, Default)]
pub struct FacilitatorLocal {
    engines: HashMap<(Scheme, ChainId), Arc<ExactEvm>>,
}

impl FacilitatorLocal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an engine under its `(scheme, network)` key.
    pub fn register(mut self, engine: ExactEvm) -> Self {
        let key = (Scheme::Exact, engine.provider().chain_id().clone());
        self.engines.insert(key, Arc::new(engine));
        self
    }

    fn route(&self, request: &VerifyRequest) -> Result<&Arc<ExactEvm>, ErrorReason> {
        let requirements = &request.payment_requirements;
        let scheme = request
            .payment_payload
            .scheme()
            .unwrap_or(requirements.scheme);
        if scheme != Scheme::Exact {
            return Err(ErrorReason::UnsupportedScheme);
        }
        self.engines
            .get(&(scheme, requirements.network.clone()))
            .ok_or(ErrorReason::InvalidNetwork)
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = ExactEvmError;

    #[instrument(skip_all, fields(network = %request.payment_requirements.network))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let payer = request.payment_payload.payer();
        match self.route(request) {
            Ok(engine) => engine.verify(request).await,
            Err(reason) => Ok(VerifyResponse::invalid(reason, Some(payer))),
        }
    }

    #[instrument(skip_all, fields(network = %request.payment_requirements.network))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let payer = request.payment_payload.payer();
        match self.route(request) {
            Ok(engine) => engine.settle(request).await,
            Err(reason) => Ok(SettleResponse {
                success: false,
                error_reason: Some(reason),
                transaction: None,
                network: request.payment_requirements.network.clone(),
                namespace: Default::default(),
                payer: Some(payer),
            }),
        }
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let mut kinds = vec![];
        for engine in self.engines.values() {
            let supported = engine.supported().await.ok();
            let mut supported_kinds = supported.map(|k| k.kinds).unwrap_or_default();
            kinds.append(&mut supported_kinds);
        }
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}
