//! Block type codes and block processing control flags shared by every
//! canonical block.

use super::*;

/// Block processing control flags (RFC 9171 §4.2.4).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Flags {
    /// Replicate this block in every fragment.
    pub must_replicate: bool,
    /// Request a status report if this block cannot be processed.
    pub report_on_failure: bool,
    /// Delete the whole bundle if this block cannot be processed.
    pub delete_bundle_on_failure: bool,
    /// Remove this block if it cannot be processed.
    pub delete_block_on_failure: bool,

    pub unrecognised: Option<u64>,
}

impl From<&Flags> for u64 {
    fn from(value: &Flags) -> Self {
        let mut flags = value.unrecognised.unwrap_or_default();
        if value.must_replicate {
            flags |= 1 << 0;
        }
        if value.report_on_failure {
            flags |= 1 << 1;
        }
        if value.delete_bundle_on_failure {
            flags |= 1 << 2;
        }
        if value.delete_block_on_failure {
            flags |= 1 << 4;
        }
        flags
    }
}

impl From<u64> for Flags {
    fn from(value: u64) -> Self {
        let mut flags = Self {
            must_replicate: value & (1 << 0) != 0,
            report_on_failure: value & (1 << 1) != 0,
            delete_bundle_on_failure: value & (1 << 2) != 0,
            delete_block_on_failure: value & (1 << 4) != 0,
            unrecognised: None,
        };
        let unrecognised = value & !0b10111;
        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl cbor::encode::Encode for Flags {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(self))
    }
}

impl cbor::decode::Decode for Flags {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_uint().map(Into::into)
    }
}

/// Canonical block type codes. The experimental codes (192..) follow the
/// private-use range convention.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Payload Block (1).
    Payload,
    /// Previous Node Block (6).
    PreviousNode,
    /// Bundle Age Block (7).
    BundleAge,
    /// Hop Count Block (10).
    HopCount,
    /// Block Integrity Block (11, BPSec).
    BlockIntegrity,
    /// Block Confidentiality Block (12, BPSec).
    BlockConfidentiality,
    /// Binary spray-and-wait copy-count block (192).
    BinarySpray,
    /// DTLSR link-state advertisement block (193).
    Dtlsr,
    /// PRoPHET delivery-predictability block (194).
    Prophet,
    /// Ed25519 signature block (195).
    Signature,
    /// Any other type code.
    Unrecognised(u64),
}

impl From<Type> for u64 {
    fn from(value: Type) -> Self {
        match value {
            Type::Payload => 1,
            Type::PreviousNode => 6,
            Type::BundleAge => 7,
            Type::HopCount => 10,
            Type::BlockIntegrity => 11,
            Type::BlockConfidentiality => 12,
            Type::BinarySpray => 192,
            Type::Dtlsr => 193,
            Type::Prophet => 194,
            Type::Signature => 195,
            Type::Unrecognised(v) => v,
        }
    }
}

impl From<u64> for Type {
    fn from(value: u64) -> Self {
        match value {
            1 => Type::Payload,
            6 => Type::PreviousNode,
            7 => Type::BundleAge,
            10 => Type::HopCount,
            11 => Type::BlockIntegrity,
            12 => Type::BlockConfidentiality,
            192 => Type::BinarySpray,
            193 => Type::Dtlsr,
            194 => Type::Prophet,
            195 => Type::Signature,
            value => Type::Unrecognised(value),
        }
    }
}

impl cbor::encode::Encode for Type {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(*self))
    }
}

impl cbor::decode::Decode for Type {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_uint().map(Into::into)
    }
}
