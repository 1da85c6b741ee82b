//! The canonical block model: a common header wrapping a tagged,
//! type-specific payload.
//!
//! Known block types decode into typed variants of [`CanonicalData`];
//! unknown type codes are preserved byte-for-byte as
//! [`CanonicalData::Unrecognised`] so they survive forwarding unaltered.

use super::*;
use bpsec::AbstractSecurityBlock;
use crate::crc::CrcType;
use dtn_time::DtnTime;
use eid::Eid;
use signature::SignatureData;

/// Hop Count Block content: `[limit, count]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopCount {
    pub limit: u64,
    pub count: u64,
}

impl HopCount {
    pub fn new(limit: u64) -> Self {
        Self { limit, count: 0 }
    }

    pub fn exceeded(&self) -> bool {
        self.count > self.limit
    }
}

impl cbor::encode::Encode for HopCount {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&(self.limit, self.count))
    }
}

impl cbor::decode::Decode for HopCount {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            Ok(Self {
                limit: a.pull_uint()?,
                count: a.pull_uint()?,
            })
        })
    }
}

/// DTLSR link-state advertisement: the advertising node, the advertisement
/// timestamp, and the node's reachable peers with last-seen times.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStateAdvert {
    pub node: Eid,
    pub timestamp: DtnTime,
    pub reachable: Vec<(Eid, DtnTime)>,
}

impl cbor::encode::Encode for LinkStateAdvert {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(3), |a| {
            a.emit(&self.node);
            a.emit(&self.timestamp);
            a.emit_map(Some(self.reachable.len()), |m| {
                for (peer, last_seen) in &self.reachable {
                    m.emit(peer);
                    m.emit(last_seen);
                }
            });
        })
    }
}

impl cbor::decode::Decode for LinkStateAdvert {
    type Error = Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            let node = a.parse()?;
            let timestamp = a.parse().map_err(Error::InvalidCbor)?;
            let reachable = a.pull_map(|m| {
                let mut reachable = Vec::new();
                while !m.at_end()? {
                    let peer = m.parse()?;
                    let last_seen = m.parse().map_err(Error::InvalidCbor)?;
                    reachable.push((peer, last_seen));
                }
                Ok::<_, Error>(reachable)
            })?;
            Ok(Self {
                node,
                timestamp,
                reachable,
            })
        })
    }
}

/// PRoPHET delivery-predictability advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPredictability {
    pub node: Eid,
    pub entries: Vec<(Eid, f64)>,
}

impl cbor::encode::Encode for DeliveryPredictability {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(2), |a| {
            a.emit(&self.node);
            a.emit_map(Some(self.entries.len()), |m| {
                for (peer, predictability) in &self.entries {
                    m.emit(peer);
                    m.emit(predictability);
                }
            });
        })
    }
}

impl cbor::decode::Decode for DeliveryPredictability {
    type Error = Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            let node = a.parse()?;
            let entries = a.pull_map(|m| {
                let mut entries = Vec::new();
                while !m.at_end()? {
                    let peer = m.parse()?;
                    let p = m.parse().map_err(Error::InvalidCbor)?;
                    entries.push((peer, p));
                }
                Ok::<_, Error>(entries)
            })?;
            Ok(Self { node, entries })
        })
    }
}

/// The type-specific payload of a canonical block.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalData {
    Payload(Vec<u8>),
    PreviousNode(Eid),
    /// Milliseconds the bundle has spent in the network.
    BundleAge(u64),
    HopCount(HopCount),
    BinarySpray {
        remaining: u64,
    },
    Dtlsr(LinkStateAdvert),
    Prophet(DeliveryPredictability),
    Signature(SignatureData),
    BlockIntegrity(AbstractSecurityBlock),
    BlockConfidentiality(AbstractSecurityBlock),
    /// A type code outside the registry; the raw content is preserved.
    Unrecognised(u64, Vec<u8>),
}

impl CanonicalData {
    pub fn block_type(&self) -> block::Type {
        match self {
            CanonicalData::Payload(_) => block::Type::Payload,
            CanonicalData::PreviousNode(_) => block::Type::PreviousNode,
            CanonicalData::BundleAge(_) => block::Type::BundleAge,
            CanonicalData::HopCount(_) => block::Type::HopCount,
            CanonicalData::BinarySpray { .. } => block::Type::BinarySpray,
            CanonicalData::Dtlsr(_) => block::Type::Dtlsr,
            CanonicalData::Prophet(_) => block::Type::Prophet,
            CanonicalData::Signature(_) => block::Type::Signature,
            CanonicalData::BlockIntegrity(_) => block::Type::BlockIntegrity,
            CanonicalData::BlockConfidentiality(_) => block::Type::BlockConfidentiality,
            CanonicalData::Unrecognised(code, _) => block::Type::from(*code),
        }
    }

    /// The content bytes carried inside the block's byte string.
    pub fn content(&self) -> Vec<u8> {
        match self {
            CanonicalData::Payload(data) => data.clone(),
            CanonicalData::PreviousNode(eid) => cbor::encode::emit(eid),
            CanonicalData::BundleAge(age) => cbor::encode::emit(age),
            CanonicalData::HopCount(hop_count) => cbor::encode::emit(hop_count),
            CanonicalData::BinarySpray { remaining } => cbor::encode::emit(remaining),
            CanonicalData::Dtlsr(advert) => cbor::encode::emit(advert),
            CanonicalData::Prophet(p) => cbor::encode::emit(p),
            CanonicalData::Signature(s) => cbor::encode::emit(s),
            CanonicalData::BlockIntegrity(asb) | CanonicalData::BlockConfidentiality(asb) => {
                asb.to_content()
            }
            CanonicalData::Unrecognised(_, data) => data.clone(),
        }
    }

    /// Wraps opaque bytes back into the variant matching `code`. Used when a
    /// block's content has been replaced wholesale (e.g. by encryption).
    pub fn opaque(code: u64, data: Vec<u8>) -> Self {
        match block::Type::from(code) {
            block::Type::Payload => CanonicalData::Payload(data),
            _ => CanonicalData::Unrecognised(code, data),
        }
    }
}

/// A canonical block: header plus type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalBlock {
    pub number: u64,
    pub flags: block::Flags,
    pub crc_type: CrcType,
    pub data: CanonicalData,
}

impl CanonicalBlock {
    pub fn new(number: u64, data: CanonicalData) -> Self {
        Self {
            number,
            flags: block::Flags::default(),
            crc_type: CrcType::default(),
            data,
        }
    }

    pub fn block_type(&self) -> block::Type {
        self.data.block_type()
    }

    pub fn type_code(&self) -> u64 {
        self.block_type().into()
    }

    /// Serialises the block: `[type, number, flags, crc-type, data, crc?]`.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let has_crc = !matches!(self.crc_type, CrcType::None);
        let body = cbor::encode::emit_array(Some(if has_crc { 6 } else { 5 }), |a| {
            a.emit(&self.type_code());
            a.emit(&self.number);
            a.emit(&self.flags);
            a.emit(&self.crc_type);
            a.emit_bytes(&self.data.content());
            if has_crc {
                // Patched in by append_crc below
                a.skip_value();
            }
        });
        crc::append_crc(self.crc_type, body).map_err(Into::into)
    }

    /// Structural checks that need no bundle context.
    pub fn check_valid(&self) -> Result<(), Error> {
        match (self.block_type(), self.number) {
            (block::Type::Payload, 1) => Ok(()),
            (block::Type::Payload, _) => Err(Error::InvalidPayloadBlockNumber),
            (t, n @ (0 | 1)) => Err(Error::InvalidBlockNumber(t, n)),
            _ => Ok(()),
        }
    }
}
