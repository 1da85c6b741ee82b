//! BIB-HMAC-SHA2 (RFC 9173 §3): block integrity via HMAC over the
//! Integrity-Protected Plaintext.

use super::*;
use bundle::Bundle;
use canonical::CanonicalData;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};

const PARAM_SHA_VARIANT: u64 = 1;
const PARAM_SCOPE_FLAGS: u64 = 3;
const RESULT_HMAC: u64 = 1;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ShaVariant {
    HmacSha256,
    #[default]
    HmacSha384,
    HmacSha512,
}

impl ShaVariant {
    fn code(&self) -> u64 {
        match self {
            ShaVariant::HmacSha256 => 5,
            ShaVariant::HmacSha384 => 6,
            ShaVariant::HmacSha512 => 7,
        }
    }

    fn from_code(code: u64) -> Result<Self, Error> {
        match code {
            5 => Ok(ShaVariant::HmacSha256),
            6 => Ok(ShaVariant::HmacSha384),
            7 => Ok(ShaVariant::HmacSha512),
            code => Err(Error::UnsupportedShaVariant(code)),
        }
    }
}

/// Builds the Integrity-Protected Plaintext for one target.
fn build_ippt(
    scope: &ScopeFlags,
    bundle: &Bundle,
    target_number: u64,
    bib_number: u64,
    bib_flags: &block::Flags,
) -> Result<Vec<u8>, crate::Error> {
    let target = if target_number == 0 {
        None
    } else {
        Some(
            bundle
                .block_by_number(target_number)
                .ok_or(Error::MissingTarget(target_number))?,
        )
    };

    let mut ippt = scope_sections(
        scope,
        &bundle.primary,
        target,
        (block::Type::BlockIntegrity.into(), bib_number, bib_flags),
    )?;

    // Finally the protected data: the primary block for target 0, the
    // target's type-specific payload otherwise
    match target {
        None => append_wrapped(&mut ippt, &bundle.primary.to_cbor()?),
        Some(target) => append_wrapped(&mut ippt, &target.data.content()),
    }
    Ok(ippt)
}

macro_rules! with_mac {
    ($variant:expr, $key:expr, $message:expr, |$mac:ident| $body:expr) => {
        match $variant {
            ShaVariant::HmacSha256 => {
                let mut $mac = Hmac::<Sha256>::new_from_slice($key)
                    .expect("HMAC accepts keys of any length");
                $mac.update($message);
                $body
            }
            ShaVariant::HmacSha384 => {
                let mut $mac = Hmac::<Sha384>::new_from_slice($key)
                    .expect("HMAC accepts keys of any length");
                $mac.update($message);
                $body
            }
            ShaVariant::HmacSha512 => {
                let mut $mac = Hmac::<Sha512>::new_from_slice($key)
                    .expect("HMAC accepts keys of any length");
                $mac.update($message);
                $body
            }
        }
    };
}

fn compute_hmac(
    variant: ShaVariant,
    key: &KeyMaterial,
    message: &[u8],
) -> Result<Vec<u8>, Error> {
    Ok(with_mac!(variant, key.as_ref(), message, |mac| mac
        .finalize()
        .into_bytes()
        .to_vec()))
}

fn verify_hmac(
    variant: ShaVariant,
    key: &KeyMaterial,
    message: &[u8],
    expected: &[u8],
) -> Result<(), Error> {
    // verify_slice compares in constant time
    with_mac!(variant, key.as_ref(), message, |mac| mac
        .verify_slice(expected)
        .map_err(|_| Error::AuthenticationFailed))
}

/// Attaches a Block Integrity Block protecting `targets` to the bundle,
/// returning its block number. The key is supplied out-of-band.
pub fn apply(
    bundle: &mut Bundle,
    targets: &[u64],
    key: &KeyMaterial,
    variant: ShaVariant,
    scope: ScopeFlags,
    security_source: Eid,
) -> Result<u64, crate::Error> {
    if targets.is_empty() {
        return Err(Error::NoTargets.into());
    }
    let bib_number = bundle.next_block_number();
    let bib_flags = block::Flags::default();

    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let ippt = build_ippt(&scope, bundle, *target, bib_number, &bib_flags)?;
        let hmac = compute_hmac(variant, key, &ippt)?;
        results.push(vec![(RESULT_HMAC, cbor::encode::emit_bytes(&hmac))]);
    }

    let mut parameters = vec![(
        PARAM_SHA_VARIANT,
        cbor::encode::emit(&variant.code()),
    )];
    if scope != ScopeFlags::default() {
        parameters.push((PARAM_SCOPE_FLAGS, cbor::encode::emit(&scope)));
    }

    let number = bundle.add_block(CanonicalData::BlockIntegrity(AbstractSecurityBlock {
        targets: targets.to_vec(),
        context_id: CONTEXT_BIB_HMAC_SHA2,
        source: security_source,
        parameters,
        results,
    }));
    debug_assert_eq!(number, bib_number);
    Ok(number)
}

/// Verifies every target of every Block Integrity Block in the bundle.
pub fn verify(bundle: &Bundle, key: &KeyMaterial) -> Result<(), crate::Error> {
    let mut found = false;
    for bib in bundle
        .blocks
        .iter()
        .filter(|b| b.block_type() == block::Type::BlockIntegrity)
    {
        let CanonicalData::BlockIntegrity(asb) = &bib.data else {
            continue;
        };
        found = true;
        asb.check_valid()?;
        if asb.context_id != CONTEXT_BIB_HMAC_SHA2 {
            return Err(Error::InvalidContextId(asb.context_id).into());
        }

        let variant = match asb.parameter(PARAM_SHA_VARIANT) {
            Some(raw) => ShaVariant::from_code(cbor::decode::parse(raw).map_err(Error::from)?)?,
            None => ShaVariant::default(),
        };
        let scope = match asb.parameter(PARAM_SCOPE_FLAGS) {
            Some(raw) => cbor::decode::parse(raw).map_err(Error::from)?,
            None => ScopeFlags::default(),
        };

        for (index, target) in asb.targets.iter().enumerate() {
            let expected: Vec<u8> = cbor::decode::parse(
                asb.result(index, RESULT_HMAC)
                    .ok_or(Error::InvalidContextResult(RESULT_HMAC))?,
            )
            .map_err(Error::from)?;
            let ippt = build_ippt(&scope, bundle, *target, bib.number, &bib.flags)?;
            verify_hmac(variant, key, &ippt, &expected)?;
        }
    }
    if !found {
        return Err(Error::MissingSecurityBlock("Block Integrity").into());
    }
    Ok(())
}
