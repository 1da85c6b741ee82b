//! The Ed25519 signature block.
//!
//! The block carries the signer's public key and a signature over the CBOR
//! concatenation of the primary block and the payload block. Fragments
//! cannot be signed; they carry replicated copies of the block that only
//! become verifiable again after reassembly, so verification inside a
//! fragment succeeds vacuously.

use super::*;
use block::Type;
use bundle::Bundle;
use canonical::CanonicalData;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

impl cbor::encode::Encode for SignatureData {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(2), |a| {
            a.emit_bytes(&self.public_key);
            a.emit_bytes(&self.signature);
        })
    }
}

impl cbor::decode::Decode for SignatureData {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            let public_key = a.pull_bytes()?;
            let signature = a.pull_bytes()?;
            Ok(Self {
                public_key: public_key
                    .as_slice()
                    .try_into()
                    .map_err(|_| cbor::decode::Error::WrongType {
                        expected: "32-byte public key",
                        found: 2,
                    })?,
                signature: signature
                    .as_slice()
                    .try_into()
                    .map_err(|_| cbor::decode::Error::WrongType {
                        expected: "64-byte signature",
                        found: 2,
                    })?,
            })
        })
    }
}

/// The signed message: primary block bytes followed by payload block bytes.
fn message(bundle: &Bundle) -> Result<Vec<u8>, Error> {
    let mut message = bundle.primary.to_cbor()?;
    message.extend(
        bundle
            .payload_block()
            .ok_or(Error::MissingPayload)?
            .to_cbor()?,
    );
    Ok(message)
}

/// Signs the bundle, replacing any existing signature block. The block is
/// flagged for replication so fragments keep carrying it.
pub fn sign(bundle: &mut Bundle, key: &SigningKey) -> Result<(), Error> {
    if bundle.is_fragment() {
        return Err(Error::SignedFragment);
    }

    // The signature must not cover an older signature block
    if let Some(block) = bundle.find_block(Type::Signature) {
        let number = block.number;
        bundle.remove_block(number);
    }

    let signature = key.sign(&message(bundle)?);
    let number = bundle.add_block(CanonicalData::Signature(SignatureData {
        public_key: key.verifying_key().to_bytes(),
        signature: signature.to_bytes(),
    }));
    if let Some(block) = bundle.block_by_number_mut(number) {
        block.flags.must_replicate = true;
    }
    Ok(())
}

/// Verifies the bundle's signature block against its embedded public key.
///
/// Returns `Ok(false)` when the signature does not match, and `Ok(true)`
/// without checking anything for fragments.
pub fn verify(bundle: &Bundle) -> Result<bool, Error> {
    if bundle.is_fragment() {
        return Ok(true);
    }

    let block = bundle
        .find_block(Type::Signature)
        .ok_or(Error::MissingBlock(u64::from(Type::Signature)))?;
    let CanonicalData::Signature(data) = &block.data else {
        return Err(Error::MissingBlock(u64::from(Type::Signature)));
    };

    let key = VerifyingKey::from_bytes(&data.public_key)?;
    Ok(key
        .verify(
            &message(bundle)?,
            &ed25519_dalek::Signature::from_bytes(&data.signature),
        )
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder::Builder;
    use registry::Registry;

    fn keypair() -> SigningKey {
        SigningKey::from_bytes(&[0x17; 32])
    }

    fn test_bundle() -> Bundle {
        Builder::new()
            .source("dtn://src/".parse().unwrap())
            .destination("dtn://dst/".parse().unwrap())
            .payload(b"signed payload".to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let mut bundle = test_bundle();
        sign(&mut bundle, &keypair()).unwrap();
        assert!(verify(&bundle).unwrap());

        // Survives the wire
        let parsed =
            bundle::parse(&bundle.to_cbor().unwrap(), &Registry::default()).unwrap();
        assert!(verify(&parsed).unwrap());
    }

    #[test]
    fn payload_mutation_invalidates() {
        let mut bundle = test_bundle();
        sign(&mut bundle, &keypair()).unwrap();

        if let Some(CanonicalData::Payload(data)) =
            bundle.find_block_mut(Type::Payload).map(|b| &mut b.data)
        {
            data[0] ^= 0x01;
        }
        assert!(!verify(&bundle).unwrap());

        // Restoring the byte restores verifiability
        if let Some(CanonicalData::Payload(data)) =
            bundle.find_block_mut(Type::Payload).map(|b| &mut b.data)
        {
            data[0] ^= 0x01;
        }
        assert!(verify(&bundle).unwrap());
    }

    #[test]
    fn primary_mutation_invalidates() {
        let mut bundle = test_bundle();
        sign(&mut bundle, &keypair()).unwrap();

        bundle.primary.lifetime += 1;
        assert!(!verify(&bundle).unwrap());
    }

    #[test]
    fn fragments_verify_vacuously_and_reassembly_restores() {
        let mut bundle = Builder::new()
            .source("dtn://src/".parse().unwrap())
            .destination("dtn://dst/".parse().unwrap())
            .payload(vec![0x5A; 600])
            .build()
            .unwrap();
        sign(&mut bundle, &keypair()).unwrap();

        let fragments = fragment::fragment(&bundle, 256).unwrap();
        assert!(fragments.len() > 1);
        for f in &fragments {
            // Signing a fragment is refused, verification is vacuous
            assert!(matches!(
                sign(&mut f.clone(), &keypair()),
                Err(Error::SignedFragment)
            ));
            assert!(verify(f).unwrap());
            assert!(f.find_block(Type::Signature).is_some());
        }

        let reassembled = fragment::reassemble(fragments).unwrap();
        assert!(verify(&reassembled).unwrap());
    }
}
