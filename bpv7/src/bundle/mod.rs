//! The bundle: one primary block plus an ordered sequence of canonical
//! blocks, the last of which is always the Payload Block.

use super::*;
use block::Type;
use bundle_id::BundleId;
use canonical::{CanonicalBlock, CanonicalData, HopCount};
use eid::Eid;
use primary_block::PrimaryBlock;

mod parse;

#[cfg(test)]
mod tests;

pub use parse::parse;

#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub primary: PrimaryBlock,
    pub blocks: Vec<CanonicalBlock>,
}

impl Bundle {
    pub fn id(&self) -> BundleId {
        self.primary.id()
    }

    pub fn is_fragment(&self) -> bool {
        self.primary.flags.is_fragment
    }

    pub fn is_admin_record(&self) -> bool {
        self.primary.flags.is_admin_record
    }

    pub fn payload_block(&self) -> Option<&CanonicalBlock> {
        self.find_block(Type::Payload)
    }

    /// The payload bytes, if the bundle has a payload block.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.payload_block()?.data {
            CanonicalData::Payload(data) => Some(data),
            _ => None,
        }
    }

    pub fn find_block(&self, block_type: Type) -> Option<&CanonicalBlock> {
        self.blocks.iter().find(|b| b.block_type() == block_type)
    }

    pub fn find_block_mut(&mut self, block_type: Type) -> Option<&mut CanonicalBlock> {
        self.blocks
            .iter_mut()
            .find(|b| b.block_type() == block_type)
    }

    pub fn block_by_number(&self, number: u64) -> Option<&CanonicalBlock> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn block_by_number_mut(&mut self, number: u64) -> Option<&mut CanonicalBlock> {
        self.blocks.iter_mut().find(|b| b.number == number)
    }

    /// The lowest unused block number above 1.
    pub fn next_block_number(&self) -> u64 {
        self.blocks
            .iter()
            .map(|b| b.number)
            .max()
            .map_or(2, |n| n.max(1) + 1)
    }

    /// Inserts an extension block with the next free number, keeping the
    /// payload block last. Returns the assigned block number.
    pub fn add_block(&mut self, data: CanonicalData) -> u64 {
        let number = self.next_block_number();
        let block = CanonicalBlock::new(number, data);
        let at = self
            .blocks
            .iter()
            .position(|b| b.block_type() == Type::Payload)
            .unwrap_or(self.blocks.len());
        self.blocks.insert(at, block);
        number
    }

    pub fn remove_block(&mut self, number: u64) -> Option<CanonicalBlock> {
        let at = self.blocks.iter().position(|b| b.number == number)?;
        Some(self.blocks.remove(at))
    }

    pub fn hop_count(&self) -> Option<HopCount> {
        match self.find_block(Type::HopCount)?.data {
            CanonicalData::HopCount(hop_count) => Some(hop_count),
            _ => None,
        }
    }

    pub fn set_hop_count(&mut self, hop_count: HopCount) {
        if let Some(block) = self.find_block_mut(Type::HopCount) {
            block.data = CanonicalData::HopCount(hop_count);
        }
    }

    /// Age in milliseconds carried by the Bundle Age Block, if present.
    pub fn bundle_age(&self) -> Option<u64> {
        match self.find_block(Type::BundleAge)?.data {
            CanonicalData::BundleAge(age) => Some(age),
            _ => None,
        }
    }

    pub fn set_bundle_age(&mut self, age: u64) {
        if let Some(block) = self.find_block_mut(Type::BundleAge) {
            block.data = CanonicalData::BundleAge(age);
        }
    }

    pub fn previous_node(&self) -> Option<&Eid> {
        match &self.find_block(Type::PreviousNode)?.data {
            CanonicalData::PreviousNode(eid) => Some(eid),
            _ => None,
        }
    }

    /// Replaces (or inserts) the Previous Node Block.
    pub fn set_previous_node(&mut self, node_id: Eid) {
        if let Some(block) = self.find_block_mut(Type::PreviousNode) {
            block.data = CanonicalData::PreviousNode(node_id);
        } else {
            self.add_block(CanonicalData::PreviousNode(node_id));
        }
    }

    /// Sorts canonical blocks by ascending block number with the payload
    /// block forced last.
    pub fn sort_blocks(&mut self) {
        self.blocks.sort_by_key(|b| {
            if b.block_type() == Type::Payload {
                (1, 0)
            } else {
                (0, b.number)
            }
        });
    }

    /// Serialises the bundle as the wire-format indefinite-length array.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut encoder = cbor::encode::Encoder::new();
        encoder.try_emit_array(None, |a| {
            self.primary.emit(a)?;
            for block in &self.blocks {
                a.emit_raw(&block.to_cbor()?);
            }
            Ok::<_, Error>(())
        })?;
        Ok(encoder.build())
    }

    /// Runs the full validation rule set, collecting every violation.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.blocks.is_empty() {
            errors.push(Error::MissingPayload);
        } else {
            match self.blocks.last() {
                Some(b) if b.block_type() == Type::Payload => {}
                _ => errors.push(Error::PayloadNotFinal),
            }
            if !self.blocks.iter().any(|b| b.block_type() == Type::Payload) {
                errors.push(Error::MissingPayload);
            }
        }

        let mut numbers = std::collections::HashSet::new();
        for block in &self.blocks {
            if !numbers.insert(block.number) {
                errors.push(Error::DuplicateBlockNumber(block.number));
            }
            if let Err(e) = block.check_valid() {
                errors.push(e);
            }
        }

        // At most one instance per type, except the security blocks which
        // may appear repeatedly with disjoint targets
        let mut seen = std::collections::HashSet::new();
        for block in &self.blocks {
            let block_type = block.block_type();
            if matches!(
                block_type,
                Type::BlockIntegrity | Type::BlockConfidentiality | Type::Unrecognised(_)
            ) {
                continue;
            }
            if !seen.insert(block_type) {
                errors.push(Error::DuplicateBlocks(block_type));
            }
        }

        if !self.primary.timestamp.is_clocked() && self.bundle_age().is_none() {
            errors.push(Error::MissingBundleAge);
        }

        if let Some(age) = self.bundle_age()
            && age > self.primary.lifetime
        {
            errors.push(Error::BundleAgeExceedsLifetime(age, self.primary.lifetime));
        }

        if self.primary.source.is_null()
            && (!self.primary.flags.do_not_fragment || self.primary.flags.any_report_requested())
        {
            errors.push(Error::AnonymousFlags);
        }

        if self.primary.flags.is_fragment && self.primary.flags.do_not_fragment {
            errors.push(Error::FragmentFlagConflict);
        }

        if self.primary.flags.is_admin_record
            && self.blocks.iter().any(|b| b.flags.report_on_failure)
        {
            errors.push(Error::AdminRecordReportFlags);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ValidationFailed(errors))
        }
    }
}
