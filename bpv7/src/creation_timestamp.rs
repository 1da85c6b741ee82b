//! The BPv7 creation timestamp: a `(dtn-time, sequence-number)` pair.
//!
//! Sequence numbers disambiguate bundles produced by one source within the
//! same millisecond; they are allocated by the node's identifier keeper, not
//! here. A zero dtn-time means the source has no accurate clock, in which
//! case the bundle must carry a Bundle Age Block.

use super::*;
use dtn_time::DtnTime;
use error::CaptureFieldErr;

#[derive(Default, Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreationTimestamp {
    pub creation_time: DtnTime,
    pub sequence_number: u64,
}

impl CreationTimestamp {
    pub fn new(creation_time: DtnTime, sequence_number: u64) -> Self {
        Self {
            creation_time,
            sequence_number,
        }
    }

    /// A timestamp for a source without an accurate clock.
    pub fn unclocked(sequence_number: u64) -> Self {
        Self {
            creation_time: DtnTime::new(0),
            sequence_number,
        }
    }

    pub fn is_clocked(&self) -> bool {
        !self.creation_time.is_zero()
    }
}

impl cbor::encode::Encode for CreationTimestamp {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&(self.creation_time.millisecs(), self.sequence_number))
    }
}

impl cbor::decode::Decode for CreationTimestamp {
    type Error = Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            Ok(CreationTimestamp {
                creation_time: a.parse().map_field_err("bundle creation time")?,
                sequence_number: a.parse().map_field_err("sequence number")?,
            })
        })
    }
}

impl std::fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.creation_time.millisecs(),
            self.sequence_number
        )
    }
}
