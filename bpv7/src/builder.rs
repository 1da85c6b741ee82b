//! Fluent bundle construction.

use super::*;
use bundle::Bundle;
use bundle_flags::BundleFlags;
use canonical::{CanonicalBlock, CanonicalData, HopCount};
use crate::crc::CrcType;
use creation_timestamp::CreationTimestamp;
use dtn_time::DtnTime;
use eid::Eid;
use error::CaptureFieldErr;
use primary_block::PrimaryBlock;

const DEFAULT_LIFETIME_MS: u64 = 24 * 60 * 60 * 1000;

pub struct Builder {
    flags: BundleFlags,
    crc_type: CrcType,
    source: Eid,
    destination: Eid,
    report_to: Option<Eid>,
    timestamp: Option<CreationTimestamp>,
    lifetime: u64,
    payload: (Vec<u8>, block::Flags, CrcType),
    extensions: Vec<(CanonicalData, block::Flags, CrcType)>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            flags: BundleFlags::default(),
            crc_type: CrcType::Crc32Castagnoli,
            source: Eid::default(),
            destination: Eid::default(),
            report_to: None,
            timestamp: None,
            lifetime: DEFAULT_LIFETIME_MS,
            payload: (
                Vec::new(),
                block::Flags::default(),
                CrcType::Crc32Castagnoli,
            ),
            extensions: Vec::new(),
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn flags(mut self, flags: BundleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn crc_type(mut self, crc_type: CrcType) -> Self {
        self.crc_type = crc_type;
        self
    }

    pub fn source(mut self, source: Eid) -> Self {
        self.source = source;
        self
    }

    pub fn source_str(self, source: &str) -> Result<Self, Error> {
        Ok(self.source(source.parse()?))
    }

    pub fn destination(mut self, destination: Eid) -> Self {
        self.destination = destination;
        self
    }

    pub fn destination_str(self, destination: &str) -> Result<Self, Error> {
        Ok(self.destination(destination.parse()?))
    }

    /// Defaults to the source endpoint when not set.
    pub fn report_to(mut self, report_to: Eid) -> Self {
        self.report_to = Some(report_to);
        self
    }

    pub fn report_to_str(self, report_to: &str) -> Result<Self, Error> {
        Ok(self.report_to(report_to.parse()?))
    }

    /// An explicit creation timestamp. When not set, the bundle is stamped
    /// with the current time and sequence number zero at build.
    pub fn timestamp(mut self, timestamp: CreationTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// A zero creation time, for sources without an accurate clock. A
    /// Bundle Age Block is added automatically at build if none was
    /// configured.
    pub fn timestamp_epoch(mut self, sequence_number: u64) -> Self {
        self.timestamp = Some(CreationTimestamp::unclocked(sequence_number));
        self
    }

    pub fn lifetime_millis(mut self, millisecs: u64) -> Self {
        self.lifetime = millisecs;
        self
    }

    pub fn lifetime(self, lifetime: std::time::Duration) -> Self {
        self.lifetime_millis(lifetime.as_millis() as u64)
    }

    /// Accepts human-readable durations such as `"5m"` or `"24h"`.
    pub fn lifetime_str(self, lifetime: &str) -> Result<Self, Error> {
        Ok(self.lifetime(humantime::parse_duration(lifetime).map_field_err("lifetime")?))
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload.0 = data;
        self
    }

    pub fn hop_count(self, limit: u64) -> Self {
        self.add_block(CanonicalData::HopCount(HopCount::new(limit)))
    }

    pub fn bundle_age(self, millisecs: u64) -> Self {
        self.add_block(CanonicalData::BundleAge(millisecs))
    }

    pub fn previous_node(self, node_id: Eid) -> Self {
        self.add_block(CanonicalData::PreviousNode(node_id))
    }

    pub fn add_block(mut self, data: CanonicalData) -> Self {
        let crc_type = self.crc_type;
        self.extensions.push((data, block::Flags::default(), crc_type));
        self
    }

    pub fn add_block_with(
        mut self,
        data: CanonicalData,
        flags: block::Flags,
        crc_type: CrcType,
    ) -> Self {
        self.extensions.push((data, flags, crc_type));
        self
    }

    pub fn build(mut self) -> Result<Bundle, Error> {
        let timestamp = self
            .timestamp
            .take()
            .unwrap_or_else(|| CreationTimestamp::new(DtnTime::now(), 0));

        if !timestamp.is_clocked()
            && !self
                .extensions
                .iter()
                .any(|(data, _, _)| data.block_type() == block::Type::BundleAge)
        {
            self.extensions.push((
                CanonicalData::BundleAge(0),
                block::Flags::default(),
                self.crc_type,
            ));
        }

        let mut primary = PrimaryBlock {
            flags: self.flags,
            destination: self.destination,
            report_to: self.report_to.unwrap_or_else(|| self.source.clone()),
            source: self.source,
            timestamp,
            lifetime: self.lifetime,
            fragment: None,
            ..Default::default()
        };
        primary.set_crc_type(self.crc_type);

        let mut blocks = Vec::with_capacity(self.extensions.len() + 1);
        for (number, (data, flags, crc_type)) in self.extensions.into_iter().enumerate() {
            blocks.push(CanonicalBlock {
                number: number as u64 + 2,
                flags,
                crc_type,
                data,
            });
        }
        let (payload, payload_flags, payload_crc) = self.payload;
        blocks.push(CanonicalBlock {
            number: 1,
            flags: payload_flags,
            crc_type: payload_crc,
            data: CanonicalData::Payload(payload),
        });

        let mut bundle = Bundle { primary, blocks };
        bundle.sort_blocks();
        bundle.validate()?;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_build() {
        let bundle = Builder::new()
            .source_str("dtn://src/app")
            .unwrap()
            .destination_str("dtn://dst/app")
            .unwrap()
            .report_to_str("dtn://rpt/")
            .unwrap()
            .lifetime_str("5m")
            .unwrap()
            .payload(b"hello".to_vec())
            .build()
            .unwrap();

        assert_eq!(bundle.primary.lifetime, 5 * 60 * 1000);
        assert_eq!(bundle.payload().unwrap(), b"hello");
        assert_eq!(bundle.blocks.len(), 1);
    }

    #[test]
    fn epoch_timestamp_gains_bundle_age() {
        let bundle = Builder::new()
            .source("ipn:1.1".parse().unwrap())
            .destination("ipn:2.1".parse().unwrap())
            .timestamp_epoch(42)
            .payload(b"x".to_vec())
            .build()
            .unwrap();

        assert_eq!(bundle.bundle_age(), Some(0));
        assert_eq!(bundle.id().timestamp.sequence_number, 42);
    }

    #[test]
    fn extension_ordering() {
        let bundle = Builder::new()
            .source("ipn:1.1".parse().unwrap())
            .destination("ipn:2.1".parse().unwrap())
            .hop_count(8)
            .previous_node("ipn:3.0".parse().unwrap())
            .payload(b"x".to_vec())
            .build()
            .unwrap();

        // Payload is last, extensions keep ascending numbers
        assert_eq!(bundle.blocks.last().unwrap().number, 1);
        assert_eq!(bundle.blocks[0].number, 2);
        assert_eq!(bundle.blocks[1].number, 3);
    }

    #[test]
    fn anonymous_source_must_not_fragment() {
        assert!(
            Builder::new()
                .destination("ipn:2.1".parse().unwrap())
                .payload(b"x".to_vec())
                .build()
                .is_err()
        );

        let bundle = Builder::new()
            .destination("ipn:2.1".parse().unwrap())
            .flags(BundleFlags {
                do_not_fragment: true,
                ..Default::default()
            })
            .payload(b"x".to_vec())
            .build()
            .unwrap();
        assert!(bundle.primary.source.is_null());
    }
}
