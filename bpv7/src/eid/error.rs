use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported EID scheme {0}")]
    UnsupportedScheme(String),

    #[error("unsupported EID scheme number {0}")]
    UnsupportedSchemeNumber(u64),

    #[error("dtn URIs must start with '//'")]
    DtnMissingPrefix,

    #[error("dtn node name {0:?} contains characters outside [A-Za-z0-9._-]")]
    DtnInvalidNodeName(String),

    #[error("dtn URI has no demux separator after the node name")]
    DtnMissingDemux,

    #[error("ipn node number must be non-zero")]
    IpnZeroNode,

    #[error("invalid ipn number component: {0}")]
    IpnInvalidNumber(#[from] std::num::ParseIntError),

    #[error("ipn URIs are a dot-separated number pair")]
    IpnInvalidFormat,

    #[error("dtn scheme-specific part is neither 0 nor a text string")]
    DtnInvalidSsp,

    #[error(transparent)]
    InvalidCbor(#[from] corvid_cbor::decode::Error),
}
