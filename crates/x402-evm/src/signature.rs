//! Signature parsing for Exact-EVM payment authorizations.
//!
//! Payers sign with one of three mechanisms: a plain EOA key (65-byte
//! signature), a deployed contract wallet validated via EIP-1271, or a
//! counterfactual contract wallet whose signature is wrapped per EIP-6492
//! with the factory address and calldata needed to deploy it.

use alloy::primitives::{Address, Bytes, hex};
use alloy::sol_types::SolValue;

use crate::contracts::Sig6492;

/// The fixed 32-byte magic suffix defined by
/// [EIP-6492](https://eips.ethereum.org/EIPS/eip-6492).
pub const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// A structured representation of a payment signature.
#[derive(Debug, Clone)]
pub enum StructuredSignature {
    /// A plain 65-byte EOA signature.
    Eoa(Bytes),
    /// A contract-wallet signature validated on-chain per EIP-1271.
    Eip1271(Bytes),
    /// An EIP-6492 wrapped signature for a possibly-undeployed wallet.
    Eip6492 {
        factory: Address,
        factory_calldata: Bytes,
        inner: Bytes,
        original: Bytes,
    },
}

/// Errors from parsing a structured signature.
#[derive(Debug, thiserror::Error)]
pub enum StructuredSignatureError {
    /// The EIP-6492 wrapper could not be decoded.
    #[error("invalid EIP-6492 wrapper: {0}")]
    InvalidEip6492(alloy::sol_types::Error),
}

impl StructuredSignature {
    /// Classifies raw signature bytes by shape.
    ///
    /// Bytes ending in the EIP-6492 magic suffix decode as a wrapper;
    /// exactly 65 bytes are treated as an EOA signature; everything else is
    /// an EIP-1271 blob for the wallet contract to judge.
    pub fn parse(bytes: &Bytes) -> Result<Self, StructuredSignatureError> {
        let is_eip6492 = bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX;
        if is_eip6492 {
            let body = &bytes[..bytes.len() - 32];
            let sig6492 =
                Sig6492::abi_decode_params(body).map_err(StructuredSignatureError::InvalidEip6492)?;
            return Ok(Self::Eip6492 {
                factory: sig6492.factory,
                factory_calldata: sig6492.factoryCalldata,
                inner: sig6492.innerSig,
                original: bytes.clone(),
            });
        }
        if bytes.len() == 65 {
            Ok(Self::Eoa(bytes.clone()))
        } else {
            Ok(Self::Eip1271(bytes.clone()))
        }
    }

    /// Whether the wrapper carries usable deployment data: a nonzero factory
    /// address and non-empty calldata.
    pub fn has_deploy_data(&self) -> bool {
        match self {
            Self::Eip6492 {
                factory,
                factory_calldata,
                ..
            } => *factory != Address::ZERO && !factory_calldata.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn wrap_6492(factory: Address, calldata: &[u8], inner: &[u8]) -> Bytes {
        let body = (
            factory,
            Bytes::copy_from_slice(calldata),
            Bytes::copy_from_slice(inner),
        )
            .abi_encode_params();
        let mut bytes = body;
        bytes.extend_from_slice(&EIP6492_MAGIC_SUFFIX);
        bytes.into()
    }

    #[test]
    fn classifies_eoa_signature() {
        let bytes = Bytes::from(vec![7u8; 65]);
        assert!(matches!(
            StructuredSignature::parse(&bytes).unwrap(),
            StructuredSignature::Eoa(_)
        ));
    }

    #[test]
    fn classifies_eip1271_blob() {
        let bytes = Bytes::from(vec![7u8; 96]);
        assert!(matches!(
            StructuredSignature::parse(&bytes).unwrap(),
            StructuredSignature::Eip1271(_)
        ));
    }

    #[test]
    fn decodes_eip6492_wrapper() {
        let factory = address!("0x00000000000000000000000000000000000000aa");
        let wrapped = wrap_6492(factory, &[1, 2, 3], &[9u8; 65]);
        let parsed = StructuredSignature::parse(&wrapped).unwrap();
        match &parsed {
            StructuredSignature::Eip6492 {
                factory: parsed_factory,
                factory_calldata,
                inner,
                original,
            } => {
                assert_eq!(*parsed_factory, factory);
                assert_eq!(factory_calldata.as_ref(), &[1, 2, 3]);
                assert_eq!(inner.len(), 65);
                assert_eq!(original, &wrapped);
            }
            other => panic!("expected EIP-6492, got {other:?}"),
        }
        assert!(parsed.has_deploy_data());
    }

    #[test]
    fn zero_factory_has_no_deploy_data() {
        let wrapped = wrap_6492(Address::ZERO, &[1, 2, 3], &[9u8; 65]);
        let parsed = StructuredSignature::parse(&wrapped).unwrap();
        assert!(!parsed.has_deploy_data());
    }

    #[test]
    fn rejects_garbage_wrapper() {
        let mut bytes = vec![0xffu8; 40];
        bytes.extend_from_slice(&EIP6492_MAGIC_SUFFIX);
        assert!(StructuredSignature::parse(&Bytes::from(bytes)).is_err());
    }
}
