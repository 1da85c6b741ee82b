//! Per-block CRC handling.
//!
//! A CRC-bearing block is emitted by writing header and payload with a
//! zeroed CRC placeholder, computing the CRC over those bytes, then patching
//! the real value in. Verification replays the incoming block bytes with the
//! CRC field zeroed and compares.

use super::*;
use std::ops::Range;
use thiserror::Error;

const X25: ::crc::Crc<u16> = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_SDLC);
const CASTAGNOLI: ::crc::Crc<u32> = ::crc::Crc::<u32>::new(&::crc::CRC_32_ISCSI);

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid CRC type {0}")]
    InvalidType(u64),

    #[error("block has unexpected CRC value length {0}")]
    InvalidLength(usize),

    #[error("block has a CRC value but CRC type none")]
    UnexpectedCrcValue,

    #[error("incorrect CRC value")]
    IncorrectCrc,

    #[error("missing CRC value")]
    MissingCrc,

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrcType {
    None,
    Crc16X25,
    #[default]
    Crc32Castagnoli,
    Unrecognised(u64),
}

impl CrcType {
    /// The width of the CRC value in bytes.
    pub fn width(&self) -> usize {
        match self {
            CrcType::None | CrcType::Unrecognised(_) => 0,
            CrcType::Crc16X25 => 2,
            CrcType::Crc32Castagnoli => 4,
        }
    }
}

impl From<u64> for CrcType {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Crc16X25,
            2 => Self::Crc32Castagnoli,
            v => Self::Unrecognised(v),
        }
    }
}

impl From<CrcType> for u64 {
    fn from(value: CrcType) -> Self {
        match value {
            CrcType::None => 0,
            CrcType::Crc16X25 => 1,
            CrcType::Crc32Castagnoli => 2,
            CrcType::Unrecognised(v) => v,
        }
    }
}

impl cbor::encode::Encode for CrcType {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(*self))
    }
}

impl cbor::decode::Decode for CrcType {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_uint().map(Into::into)
    }
}

/// Appends the CRC value item to a block serialised with all other array
/// items already in place. `data` must end immediately before where the CRC
/// item belongs.
pub(crate) fn append_crc(crc_type: CrcType, mut data: Vec<u8>) -> Result<Vec<u8>, Error> {
    match crc_type {
        CrcType::None => {}
        CrcType::Crc16X25 => {
            // Byte string header for the 2-byte value
            data.push(0x42);
            let mut digest = X25.digest();
            digest.update(&data);
            digest.update(&[0; 2]);
            data.extend_from_slice(&digest.finalize().to_be_bytes());
        }
        CrcType::Crc32Castagnoli => {
            // Byte string header for the 4-byte value
            data.push(0x44);
            let mut digest = CASTAGNOLI.digest();
            digest.update(&data);
            digest.update(&[0; 4]);
            data.extend_from_slice(&digest.finalize().to_be_bytes());
        }
        CrcType::Unrecognised(t) => return Err(Error::InvalidType(t)),
    }
    Ok(data)
}

/// Verifies the CRC of a parsed block.
///
/// `block` is the full serialised block; `value` is the range of the CRC
/// content bytes within it (`None` when the block carried no CRC item).
pub(crate) fn verify_crc(
    block: &[u8],
    value: Option<Range<usize>>,
    crc_type: CrcType,
) -> Result<(), Error> {
    match (crc_type, value) {
        (CrcType::None, None) => Ok(()),
        (CrcType::None, Some(_)) => Err(Error::UnexpectedCrcValue),
        (CrcType::Crc16X25, Some(range)) => {
            let expected = u16::from_be_bytes(
                block[range.clone()]
                    .try_into()
                    .map_err(|_| Error::InvalidLength(range.len()))?,
            );
            let mut digest = X25.digest();
            digest.update(&block[..range.start]);
            digest.update(&[0; 2]);
            digest.update(&block[range.end..]);
            if digest.finalize() != expected {
                Err(Error::IncorrectCrc)
            } else {
                Ok(())
            }
        }
        (CrcType::Crc32Castagnoli, Some(range)) => {
            let expected = u32::from_be_bytes(
                block[range.clone()]
                    .try_into()
                    .map_err(|_| Error::InvalidLength(range.len()))?,
            );
            let mut digest = CASTAGNOLI.digest();
            digest.update(&block[..range.start]);
            digest.update(&[0; 4]);
            digest.update(&block[range.end..]);
            if digest.finalize() != expected {
                Err(Error::IncorrectCrc)
            } else {
                Ok(())
            }
        }
        (CrcType::Unrecognised(t), _) => Err(Error::InvalidType(t)),
        _ => Err(Error::MissingCrc),
    }
}
