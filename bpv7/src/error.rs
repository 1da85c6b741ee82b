//! The primary error type for the `bpv7` crate.

use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Data remains after the closing break of the bundle array.
    #[error("bundle has additional data after end of CBOR array")]
    AdditionalData,

    #[error("unsupported bundle protocol version {0}")]
    InvalidVersion(u64),

    #[error("bundle has no payload block")]
    MissingPayload,

    #[error("final block of bundle is not the payload block")]
    PayloadNotFinal,

    #[error("payload block must be block number 1")]
    InvalidPayloadBlockNumber,

    #[error("more than one block with block number {0}")]
    DuplicateBlockNumber(u64),

    #[error("multiple {0:?} blocks")]
    DuplicateBlocks(block::Type),

    #[error("{0:?} block cannot have block number {1}")]
    InvalidBlockNumber(block::Type, u64),

    #[error("bundle with a zero creation time has no bundle age block")]
    MissingBundleAge,

    #[error("bundle age {0}ms exceeds the primary block lifetime {1}ms")]
    BundleAgeExceedsLifetime(u64, u64),

    #[error("anonymous bundle must set the no-fragment flag and clear all status request flags")]
    AnonymousFlags,

    #[error("administrative record bundle has a block requesting status reports on failure")]
    AdminRecordReportFlags,

    #[error("is-fragment and must-not-fragment flags are both set")]
    FragmentFlagConflict,

    #[error("invalid fragment information: offset {0}, total length {1}")]
    InvalidFragmentInfo(u64, u64),

    /// Composite error from the validation walker.
    #[error("bundle validation failed: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationFailed(Vec<Error>),

    #[error("block type code {0} is already registered")]
    DuplicateFactory(u64),

    #[error("fragmentation of this bundle is forbidden")]
    MustNotFragment,

    #[error("per-fragment overhead exceeds the MTU of {0} bytes")]
    MtuTooSmall(usize),

    #[error("bundle is not a fragment")]
    NotAFragment,

    #[error("fragments do not cover the payload: gap at offset {0}")]
    FragmentGap(u64),

    #[error("fragments belong to different bundles")]
    MixedFragments,

    #[error("payload is not an administrative record")]
    NotAdministrativeRecord,

    #[error("bundle does not contain block {0}")]
    MissingBlock(u64),

    #[error("fragmented bundles cannot be signed")]
    SignedFragment,

    #[error(transparent)]
    InvalidBpsec(#[from] bpsec::Error),

    #[error(transparent)]
    InvalidCrc(#[from] crc::Error),

    #[error(transparent)]
    InvalidEid(#[from] eid::Error),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),

    #[error("failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    InvalidSignature(#[from] ed25519_dalek::SignatureError),
}

/// Extension trait mapping a `Result`'s error into [`Error::InvalidField`]
/// with the name of the offending wire field attached.
pub trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T, E> CaptureFieldErr<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::InvalidField {
            field,
            source: e.into(),
        })
    }
}
