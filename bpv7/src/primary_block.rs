//! The primary block.
//!
//! Wire form is a CBOR array of 8, 9, 10 or 11 items depending on whether
//! the bundle is a fragment and whether a CRC is present. The block is
//! immutable in spirit: every serialisation recomputes the CRC, and setting
//! CRC type none silently upgrades to CRC-32, because a primary block must
//! always be covered by a CRC.

use super::*;
use bundle_flags::BundleFlags;
use bundle_id::{BundleId, FragmentInfo};
use crate::crc::CrcType;
use creation_timestamp::CreationTimestamp;
use dtn_time::DtnTime;
use eid::Eid;
use error::CaptureFieldErr;

pub const BP_VERSION: u64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryBlock {
    pub flags: BundleFlags,
    pub(crate) crc_type: CrcType,
    pub destination: Eid,
    pub source: Eid,
    pub report_to: Eid,
    pub timestamp: CreationTimestamp,
    /// Lifetime in milliseconds from creation time.
    pub lifetime: u64,
    pub fragment: Option<FragmentInfo>,
}

impl PrimaryBlock {
    pub fn crc_type(&self) -> CrcType {
        self.crc_type
    }

    /// CRC type none is upgraded to CRC-32; the primary block always
    /// carries a CRC when serialised by this node.
    pub fn set_crc_type(&mut self, crc_type: CrcType) {
        self.crc_type = match crc_type {
            CrcType::None => CrcType::Crc32Castagnoli,
            t => t,
        };
    }

    pub fn id(&self) -> BundleId {
        BundleId {
            source: self.source.clone(),
            timestamp: self.timestamp.clone(),
            fragment: self.fragment,
        }
    }

    /// Absolute expiry time. For unclocked sources the caller must account
    /// for the bundle age instead.
    pub fn expires_at(&self) -> DtnTime {
        self.timestamp
            .creation_time
            .saturating_add_millis(self.lifetime)
    }

    pub(crate) fn emit(&self, array: &mut cbor::encode::Array) -> Result<(), Error> {
        array.emit_raw(&self.to_cbor()?);
        Ok(())
    }

    /// Serialises the block with a freshly computed CRC.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let count = match (self.fragment.is_some(), self.crc_type) {
            (false, CrcType::None) => 8,
            (false, _) => 9,
            (true, CrcType::None) => 10,
            (true, _) => 11,
        };
        let body = cbor::encode::emit_array(Some(count), |a| {
            a.emit(&BP_VERSION);
            a.emit(&self.flags);
            a.emit(&self.crc_type);
            a.emit(&self.destination);
            a.emit(&self.source);
            a.emit(&self.report_to);
            a.emit(&self.timestamp);
            a.emit(&self.lifetime);
            if let Some(fragment) = &self.fragment {
                a.emit(&fragment.offset);
                a.emit(&fragment.total_len);
            }
            if !matches!(self.crc_type, CrcType::None) {
                a.skip_value();
            }
        });
        crc::append_crc(self.crc_type, body).map_err(Into::into)
    }

    /// Parses the primary block from `block`, the exact serialised bytes of
    /// the block, verifying its CRC.
    pub fn from_cbor(block: &[u8]) -> Result<Self, Error> {
        let mut decoder = cbor::decode::Decoder::new(block);
        let parsed = decoder.pull_array(|a| {
            let count = a.count();

            let version = a.pull_uint().map_field_err("version")?;
            if version != BP_VERSION {
                return Err(Error::InvalidVersion(version));
            }

            let flags: BundleFlags = a.parse().map_field_err("bundle processing control flags")?;
            let crc_type: CrcType = a.parse().map_field_err("CRC type")?;
            let destination: Eid = a.parse().map_field_err("destination EID")?;
            let source: Eid = a.parse().map_field_err("source EID")?;
            let report_to: Eid = a.parse().map_field_err("report-to EID")?;
            let timestamp: CreationTimestamp =
                a.parse().map_field_err("creation timestamp")?;
            let lifetime = a.pull_uint().map_field_err("lifetime")?;

            let fragment = if flags.is_fragment {
                let offset = a.pull_uint().map_field_err("fragment offset")?;
                let total_len = a
                    .pull_uint()
                    .map_field_err("total application data unit length")?;
                if offset >= total_len {
                    return Err(Error::InvalidFragmentInfo(offset, total_len));
                }
                Some(FragmentInfo { offset, total_len })
            } else {
                None
            };

            // The CRC item, when present, is the last array element
            let crc_range = if !a.at_end()? {
                let start = a.position();
                let value = a.pull_bytes()?;
                if crc_type.width() != 0 && value.len() != crc_type.width() {
                    return Err(crc::Error::InvalidLength(value.len()).into());
                }
                // Skip the byte string head to the content bytes
                Some(start + 1..a.position())
            } else {
                None
            };

            // Definite arrays must have declared a consistent length
            if let Some(count) = count {
                let expected = match (fragment.is_some(), crc_range.is_some()) {
                    (false, false) => 8,
                    (false, true) => 9,
                    (true, false) => 10,
                    (true, true) => 11,
                };
                if count != expected {
                    return Err(cbor::decode::Error::AdditionalItems.into());
                }
            }

            crc::verify_crc(block, crc_range, crc_type)?;

            Ok(Self {
                flags,
                crc_type,
                destination,
                source,
                report_to,
                timestamp,
                lifetime,
                fragment,
            })
        })?;

        if !decoder.is_exhausted() {
            return Err(Error::AdditionalData);
        }
        Ok(parsed)
    }
}

impl Default for PrimaryBlock {
    fn default() -> Self {
        Self {
            flags: BundleFlags::default(),
            crc_type: CrcType::Crc32Castagnoli,
            destination: Eid::Null,
            source: Eid::Null,
            report_to: Eid::Null,
            timestamp: CreationTimestamp::default(),
            lifetime: 0,
            fragment: None,
        }
    }
}
