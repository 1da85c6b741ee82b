//! DTN time: the number of milliseconds since 2000-01-01 00:00:00 UTC.

use super::*;

const DTN_EPOCH: time::OffsetDateTime = time::macros::datetime!(2000-01-01 00:00:00 UTC);

#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DtnTime(u64);

impl DtnTime {
    pub fn now() -> Self {
        Self::from_datetime(time::OffsetDateTime::now_utc())
    }

    pub fn new(millisecs: u64) -> Self {
        Self(millisecs)
    }

    pub fn millisecs(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add_millis(&self, millisecs: u64) -> Self {
        Self(self.0.saturating_add(millisecs))
    }

    /// Clamps times before the DTN epoch to zero.
    pub fn from_datetime(t: time::OffsetDateTime) -> Self {
        let millisecs = (t - DTN_EPOCH).whole_milliseconds();
        if millisecs < 0 {
            Self(0)
        } else if millisecs > u64::MAX as i128 {
            Self(u64::MAX)
        } else {
            Self(millisecs as u64)
        }
    }
}

impl From<DtnTime> for time::OffsetDateTime {
    fn from(dtn_time: DtnTime) -> Self {
        DTN_EPOCH.saturating_add(time::Duration::new(
            (dtn_time.0 / 1000) as i64,
            (dtn_time.0 % 1000 * 1_000_000) as i32,
        ))
    }
}

impl cbor::encode::Encode for DtnTime {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&self.0)
    }
}

impl cbor::decode::Decode for DtnTime {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_uint().map(Self)
    }
}

impl std::fmt::Display for DtnTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", time::OffsetDateTime::from(*self))
    }
}
