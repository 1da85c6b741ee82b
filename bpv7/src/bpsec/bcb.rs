//! BCB-AES-GCM (RFC 9173 §4): block confidentiality via AES-GCM.
//!
//! The target block's type-specific payload is encrypted in place; the
//! authentication tag is stored as the security result and the additional
//! authenticated data is assembled from the same scope-flag sections as the
//! integrity IPPT, minus the protected payload itself.

use super::*;
use aes_gcm::{
    Aes128Gcm, Aes256Gcm, Nonce,
    aead::{AeadInPlace, KeyInit},
};
use bundle::Bundle;
use canonical::CanonicalData;
use crate::crc::CrcType;
use rand::RngCore;
use registry::Registry;
use zeroize::Zeroize;

const PARAM_IV: u64 = 1;
const PARAM_AES_VARIANT: u64 = 2;
const PARAM_SCOPE_FLAGS: u64 = 4;
const RESULT_AUTH_TAG: u64 = 1;

const AES_128_GCM: u64 = 1;
const AES_256_GCM: u64 = 3;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    /// The key length selects the cipher: 16 bytes for AES-128, 32 for
    /// AES-256.
    fn from_key(key: &KeyMaterial) -> Result<(Self, u64), Error> {
        match key.len() {
            16 => Ok((
                Cipher::Aes128(Box::new(
                    Aes128Gcm::new_from_slice(key.as_ref()).expect("length checked"),
                )),
                AES_128_GCM,
            )),
            32 => Ok((
                Cipher::Aes256(Box::new(
                    Aes256Gcm::new_from_slice(key.as_ref()).expect("length checked"),
                )),
                AES_256_GCM,
            )),
            len => Err(Error::KeyLengthMismatch(len)),
        }
    }

    fn encrypt(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        buffer: &mut Vec<u8>,
    ) -> Result<[u8; TAG_LEN], Error> {
        let tag = match self {
            Cipher::Aes128(cipher) => {
                cipher.encrypt_in_place_detached(Nonce::from_slice(iv), aad, buffer)
            }
            Cipher::Aes256(cipher) => {
                cipher.encrypt_in_place_detached(Nonce::from_slice(iv), aad, buffer)
            }
        }
        .map_err(|_| Error::AuthenticationFailed)?;
        Ok(tag.into())
    }

    fn decrypt(
        &self,
        iv: &[u8; IV_LEN],
        aad: &[u8],
        buffer: &mut Vec<u8>,
        tag: &[u8],
    ) -> Result<(), Error> {
        if tag.len() != TAG_LEN {
            return Err(Error::AuthenticationFailed);
        }
        let tag = aes_gcm::Tag::from_slice(tag);
        match self {
            Cipher::Aes128(cipher) => {
                cipher.decrypt_in_place_detached(Nonce::from_slice(iv), aad, buffer, tag)
            }
            Cipher::Aes256(cipher) => {
                cipher.decrypt_in_place_detached(Nonce::from_slice(iv), aad, buffer, tag)
            }
        }
        .map_err(|_| Error::AuthenticationFailed)
    }
}

fn build_aad(
    scope: &ScopeFlags,
    bundle: &Bundle,
    target_number: u64,
    bcb_number: u64,
    bcb_flags: &block::Flags,
) -> Result<Vec<u8>, crate::Error> {
    let target = bundle
        .block_by_number(target_number)
        .ok_or(Error::MissingTarget(target_number))?;
    scope_sections(
        scope,
        &bundle.primary,
        Some(target),
        (
            block::Type::BlockConfidentiality.into(),
            bcb_number,
            bcb_flags,
        ),
    )
}

/// Encrypts the payload of `target_number` in place and attaches the Block
/// Confidentiality Block, returning its block number.
///
/// If no IV is supplied one is drawn from the system CSPRNG and recorded in
/// the parameter list.
pub fn encrypt(
    bundle: &mut Bundle,
    target_number: u64,
    key: &KeyMaterial,
    scope: ScopeFlags,
    security_source: Eid,
    iv: Option<[u8; IV_LEN]>,
) -> Result<u64, crate::Error> {
    let (cipher, aes_variant) = Cipher::from_key(key)?;

    let iv = iv.unwrap_or_else(|| {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        iv
    });

    let bcb_number = bundle.next_block_number();
    let bcb_flags = block::Flags {
        must_replicate: true,
        ..Default::default()
    };
    let aad = build_aad(&scope, bundle, target_number, bcb_number, &bcb_flags)?;

    let target = bundle
        .block_by_number_mut(target_number)
        .ok_or(Error::MissingTarget(target_number))?;
    let mut buffer = target.data.content();
    let tag = cipher.encrypt(&iv, &aad, &mut buffer)?;

    target.data = CanonicalData::opaque(target.type_code(), buffer);
    target.crc_type = CrcType::None;

    let mut parameters = vec![
        (PARAM_IV, cbor::encode::emit_bytes(&iv)),
        (PARAM_AES_VARIANT, cbor::encode::emit(&aes_variant)),
    ];
    if scope != ScopeFlags::default() {
        parameters.push((PARAM_SCOPE_FLAGS, cbor::encode::emit(&scope)));
    }

    let mut block = canonical::CanonicalBlock::new(
        bcb_number,
        CanonicalData::BlockConfidentiality(AbstractSecurityBlock {
            targets: vec![target_number],
            context_id: CONTEXT_BCB_AES_GCM,
            source: security_source,
            parameters,
            results: vec![vec![(RESULT_AUTH_TAG, cbor::encode::emit_bytes(&tag))]],
        }),
    );
    block.flags = bcb_flags;

    let at = bundle
        .blocks
        .iter()
        .position(|b| b.block_type() == block::Type::Payload)
        .unwrap_or(bundle.blocks.len());
    bundle.blocks.insert(at, block);
    Ok(bcb_number)
}

/// Reverses [`encrypt`]: authenticates and decrypts every target of the
/// bundle's Block Confidentiality Block, restores the targets' typed data
/// (and a CRC-32 on each), and removes the BCB.
pub fn decrypt(
    bundle: &mut Bundle,
    key: &KeyMaterial,
    registry: &Registry,
) -> Result<(), crate::Error> {
    let (cipher, expected_variant) = Cipher::from_key(key)?;

    let bcb = bundle
        .blocks
        .iter()
        .find(|b| b.block_type() == block::Type::BlockConfidentiality)
        .ok_or(Error::MissingSecurityBlock("Block Confidentiality"))?
        .clone();
    let CanonicalData::BlockConfidentiality(asb) = &bcb.data else {
        return Err(Error::MissingSecurityBlock("Block Confidentiality").into());
    };
    asb.check_valid()?;
    if asb.context_id != CONTEXT_BCB_AES_GCM {
        return Err(Error::InvalidContextId(asb.context_id).into());
    }

    let iv_bytes: Vec<u8> = cbor::decode::parse(
        asb.parameter(PARAM_IV)
            .ok_or(Error::MissingParameter("initialisation vector"))?,
    )
    .map_err(Error::from)?;
    let iv: [u8; IV_LEN] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidIvLength(iv_bytes.len()))?;

    if let Some(raw) = asb.parameter(PARAM_AES_VARIANT) {
        let variant: u64 = cbor::decode::parse(raw).map_err(Error::from)?;
        if variant != expected_variant {
            return Err(Error::UnsupportedAesVariant(variant).into());
        }
    }
    let scope: ScopeFlags = match asb.parameter(PARAM_SCOPE_FLAGS) {
        Some(raw) => cbor::decode::parse(raw).map_err(Error::from)?,
        None => ScopeFlags::default(),
    };

    for (index, target_number) in asb.targets.iter().enumerate() {
        let tag: Vec<u8> = cbor::decode::parse(
            asb.result(index, RESULT_AUTH_TAG)
                .ok_or(Error::InvalidContextResult(RESULT_AUTH_TAG))?,
        )
        .map_err(Error::from)?;

        let aad = build_aad(&scope, bundle, *target_number, bcb.number, &bcb.flags)?;

        let target = bundle
            .block_by_number_mut(*target_number)
            .ok_or(Error::MissingTarget(*target_number))?;
        let mut buffer = target.data.content();
        cipher.decrypt(&iv, &aad, &mut buffer, &tag)?;

        target.data = registry.decode(target.type_code(), &buffer)?;
        target.crc_type = CrcType::Crc32Castagnoli;
        buffer.zeroize();
    }

    bundle.remove_block(bcb.number);
    Ok(())
}
