//! BPSec (RFC 9172): per-block integrity and confidentiality.
//!
//! Both mechanisms share the Abstract Security Block layout and the
//! canonicalised byte sequences their cryptography covers: the IPPT for
//! integrity, the AAD for authenticated encryption. The two security
//! contexts implemented are BIB-HMAC-SHA2 and BCB-AES-GCM (RFC 9173).

use super::*;
use canonical::CanonicalBlock;
use eid::Eid;
use primary_block::PrimaryBlock;
use thiserror::Error as ThisError;

pub mod bcb;
pub mod bib;
pub mod key;

#[cfg(test)]
mod tests;

pub use key::KeyMaterial;

pub const CONTEXT_BIB_HMAC_SHA2: u64 = 1;
pub const CONTEXT_BCB_AES_GCM: u64 = 2;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("unexpected security context id {0}")]
    InvalidContextId(u64),

    #[error("invalid security context parameter id {0}")]
    InvalidContextParameter(u64),

    #[error("invalid security context result id {0}")]
    InvalidContextResult(u64),

    #[error("security block has no targets")]
    NoTargets,

    #[error("results list does not mirror the targets list")]
    MismatchedResults,

    #[error("security target block {0} is missing from the bundle")]
    MissingTarget(u64),

    #[error("bundle has no {0} block")]
    MissingSecurityBlock(&'static str),

    #[error("unsupported SHA-2 variant {0}")]
    UnsupportedShaVariant(u64),

    #[error("unsupported AES variant {0}")]
    UnsupportedAesVariant(u64),

    #[error("integrity or authentication check failed")]
    AuthenticationFailed,

    #[error("key length {0} does not select a supported cipher")]
    KeyLengthMismatch(usize),

    #[error("initialisation vector must be 12 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("missing mandatory security parameter: {0}")]
    MissingParameter(&'static str),

    #[error(transparent)]
    InvalidEid(#[from] eid::Error),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

/// The integrity/confidentiality scope flags shared by both RFC 9173
/// contexts. All bits default to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeFlags {
    pub include_primary_block: bool,
    pub include_target_header: bool,
    pub include_security_header: bool,
}

impl Default for ScopeFlags {
    fn default() -> Self {
        Self {
            include_primary_block: true,
            include_target_header: true,
            include_security_header: true,
        }
    }
}

impl From<u64> for ScopeFlags {
    fn from(value: u64) -> Self {
        Self {
            include_primary_block: value & (1 << 0) != 0,
            include_target_header: value & (1 << 1) != 0,
            include_security_header: value & (1 << 2) != 0,
        }
    }
}

impl From<&ScopeFlags> for u64 {
    fn from(value: &ScopeFlags) -> Self {
        let mut flags = 0;
        if value.include_primary_block {
            flags |= 1 << 0;
        }
        if value.include_target_header {
            flags |= 1 << 1;
        }
        if value.include_security_header {
            flags |= 1 << 2;
        }
        flags
    }
}

impl cbor::encode::Encode for ScopeFlags {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(self))
    }
}

impl cbor::decode::Decode for ScopeFlags {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_uint().map(Into::into)
    }
}

/// The Abstract Security Block: the block-type-specific data of BIB and BCB
/// blocks. On the wire it is a CBOR sequence, not an array.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractSecurityBlock {
    pub targets: Vec<u64>,
    pub context_id: u64,
    pub source: Eid,
    /// `(id, raw CBOR value)` pairs.
    pub parameters: Vec<(u64, Vec<u8>)>,
    /// One `(id, raw CBOR value)` list per target, same order as `targets`.
    pub results: Vec<Vec<(u64, Vec<u8>)>>,
}

impl AbstractSecurityBlock {
    /// Structural invariants: at least one target, and a results list that
    /// mirrors the targets list.
    pub fn check_valid(&self) -> Result<(), Error> {
        if self.targets.is_empty() {
            return Err(Error::NoTargets);
        }
        if self.results.len() != self.targets.len() {
            return Err(Error::MismatchedResults);
        }
        Ok(())
    }

    pub fn parameter(&self, id: u64) -> Option<&[u8]> {
        self.parameters
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, v)| v.as_slice())
    }

    pub fn result(&self, target_index: usize, id: u64) -> Option<&[u8]> {
        self.results
            .get(target_index)?
            .iter()
            .find(|(rid, _)| *rid == id)
            .map(|(_, v)| v.as_slice())
    }

    pub fn to_content(&self) -> Vec<u8> {
        let mut encoder = cbor::encode::Encoder::new();
        encoder.emit(&self.targets);
        encoder.emit(&self.context_id);
        encoder.emit(&u64::from(!self.parameters.is_empty()));
        encoder.emit(&self.source);
        if !self.parameters.is_empty() {
            emit_id_values(&mut encoder, &self.parameters);
        }
        encoder.emit_array(Some(self.results.len()), |a| {
            for result in &self.results {
                let mut inner = cbor::encode::Encoder::new();
                emit_id_values(&mut inner, result);
                a.emit_raw(&inner.build());
            }
        });
        encoder.build()
    }

    pub fn from_content(content: &[u8]) -> Result<Self, Error> {
        let mut decoder = cbor::decode::Decoder::new(content);

        let targets = decoder.pull_array(|a| {
            let mut targets = Vec::new();
            while !a.at_end()? {
                targets.push(a.pull_uint()?);
            }
            Ok::<_, Error>(targets)
        })?;
        let context_id = decoder.pull_uint()?;
        let has_parameters = decoder.pull_uint()? & 1 != 0;
        let source: Eid = decoder.parse()?;

        let parameters = if has_parameters {
            parse_id_values(&mut decoder, content)?
        } else {
            Vec::new()
        };

        let results = decoder.pull_array(|a| {
            let mut results = Vec::new();
            while !a.at_end()? {
                results.push(a.pull_array(|a| parse_id_value_items(a, content))?);
            }
            Ok::<_, Error>(results)
        })?;

        if !decoder.is_exhausted() {
            return Err(cbor::decode::Error::AdditionalItems.into());
        }

        let asb = Self {
            targets,
            context_id,
            source,
            parameters,
            results,
        };
        asb.check_valid()?;
        Ok(asb)
    }
}

fn emit_id_values(encoder: &mut cbor::encode::Encoder, values: &[(u64, Vec<u8>)]) {
    encoder.emit_array(Some(values.len()), |a| {
        for (id, value) in values {
            a.emit_array(Some(2), |a| {
                a.emit(id);
                a.emit_raw(value);
            });
        }
    })
}

fn parse_id_values(
    decoder: &mut cbor::decode::Decoder<'_>,
    content: &[u8],
) -> Result<Vec<(u64, Vec<u8>)>, Error> {
    decoder.pull_array(|a| parse_id_value_items(a, content))
}

fn parse_id_value_items(
    a: &mut cbor::decode::ArrayDecoder<'_, '_>,
    content: &[u8],
) -> Result<Vec<(u64, Vec<u8>)>, Error> {
    let mut values = Vec::new();
    while !a.at_end()? {
        values.push(a.pull_array(|pair| {
            let id = pair.pull_uint()?;
            let start = pair.position();
            pair.skip_value()?;
            Ok::<_, Error>((id, content[start..pair.position()].to_vec()))
        })?);
    }
    Ok(values)
}

/// The canonicalised scope sections shared by the IPPT and the AAD: the
/// scope flags themselves, then the primary block, the target block header
/// and the security block header as the flag bits demand.
pub(crate) fn scope_sections(
    scope: &ScopeFlags,
    primary: &PrimaryBlock,
    target: Option<&CanonicalBlock>,
    security_header: (u64, u64, &block::Flags),
) -> Result<Vec<u8>, crate::Error> {
    let mut encoder = cbor::encode::Encoder::new();
    encoder.emit(scope);

    if let Some(target) = target {
        if scope.include_primary_block {
            encoder.emit_raw(&primary.to_cbor()?);
        }
        if scope.include_target_header {
            encoder.emit(&target.type_code());
            encoder.emit(&target.number);
            encoder.emit(&target.flags);
        }
    } else if scope.include_primary_block {
        // The primary block is itself the target; it appears once, as the
        // protected data, not here
    }

    if scope.include_security_header {
        let (type_code, number, flags) = security_header;
        encoder.emit(&type_code);
        encoder.emit(&number);
        encoder.emit(flags);
    }

    Ok(encoder.build())
}

/// Appends `data` wrapped as a CBOR byte string to `buffer`.
pub(crate) fn append_wrapped(buffer: &mut Vec<u8>, data: &[u8]) {
    let mut encoder = cbor::encode::Encoder::new();
    encoder.emit_bytes(data);
    buffer.extend_from_slice(&encoder.build());
}
