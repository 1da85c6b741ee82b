//! Bundle identification: source endpoint, creation timestamp, and (for
//! fragments) the fragment offset and total payload length. Two bundles with
//! equal identifiers are replicas of one another.

use super::*;
use creation_timestamp::CreationTimestamp;
use eid::Eid;

#[derive(Default, Debug, Clone, Hash, PartialEq, Eq)]
pub struct BundleId {
    pub source: Eid,
    pub timestamp: CreationTimestamp,
    pub fragment: Option<FragmentInfo>,
}

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct FragmentInfo {
    pub offset: u64,
    pub total_len: u64,
}

impl BundleId {
    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    /// The identifier with the fragmentation fields stripped. Replica
    /// fragments of one bundle all scrub to the same identifier.
    pub fn scrubbed(&self) -> BundleId {
        BundleId {
            source: self.source.clone(),
            timestamp: self.timestamp.clone(),
            fragment: None,
        }
    }

    /// The store key for this identifier.
    pub fn to_key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.source, self.timestamp)?;
        if let Some(fragment) = &self.fragment {
            write!(f, "-{}-{}", fragment.offset, fragment.total_len)?;
        }
        Ok(())
    }
}
