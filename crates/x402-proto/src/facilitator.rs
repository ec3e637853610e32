//! Core trait defining the verification and settlement interface for x402
//! facilitators.
//!
//! Implementors validate incoming payment payloads against requirements
//! ([`Facilitator::verify`]) and execute on-chain transfers
//! ([`Facilitator::settle`]). Both a local scheme engine and a remote HTTP
//! client implement this trait, so middleware is agnostic to where
//! verification happens.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;

use crate::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// Asynchronous interface for x402 payment facilitators.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed x402 payment payload against a [`VerifyRequest`].
    ///
    /// This includes checking payload integrity, signature plausibility,
    /// balance sufficiency, network compatibility, and compliance with the
    /// declared payment requirements.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] only on transport or infrastructure failures;
    /// protocol-level rejections are carried inside [`VerifyResponse`].
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Executes an on-chain x402 settlement for a valid [`SettleRequest`].
    ///
    /// Implementations should re-validate the payment and, if valid, perform
    /// an on-chain call to settle it, waiting for the transaction receipt.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Lists the `(version, scheme, network)` tuples this facilitator can
    /// handle.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send;
}

impl<T: Facilitator + Sync> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
