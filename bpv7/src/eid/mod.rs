use super::*;

mod error;
mod parse;

#[cfg(test)]
mod str_tests;

#[cfg(test)]
mod cbor_tests;

pub use error::Error;

/// A BPv7 endpoint identifier.
///
/// Two URI schemes are supported: `dtn` (a node name plus a demux path) and
/// `ipn` (a pair of node and service numbers). `dtn:none` is the
/// distinguished null endpoint.
#[derive(Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Eid {
    #[default]
    Null,
    Dtn {
        node_name: String,
        demux: String,
    },
    Ipn {
        node_number: u64,
        service_number: u64,
    },
}

impl Eid {
    /// `true` for `dtn:none`.
    pub fn is_null(&self) -> bool {
        matches!(self, Eid::Null)
    }

    /// An endpoint is a singleton unless it is `dtn:none` or its demux
    /// begins with `~` (a multicast group).
    pub fn is_singleton(&self) -> bool {
        match self {
            Eid::Null => false,
            Eid::Dtn { demux, .. } => !demux.starts_with('~'),
            Eid::Ipn { .. } => true,
        }
    }

    /// Two endpoints are same-node iff their authorities match.
    pub fn same_node(&self, other: &Eid) -> bool {
        match (self, other) {
            (Eid::Dtn { node_name: a, .. }, Eid::Dtn { node_name: b, .. }) => a == b,
            (Eid::Ipn { node_number: a, .. }, Eid::Ipn { node_number: b, .. }) => a == b,
            _ => false,
        }
    }

    /// The node administrative endpoint for this endpoint's authority.
    pub fn node_id(&self) -> Eid {
        match self {
            Eid::Null => Eid::Null,
            Eid::Dtn { node_name, .. } => Eid::Dtn {
                node_name: node_name.clone(),
                demux: String::new(),
            },
            Eid::Ipn { node_number, .. } => Eid::Ipn {
                node_number: *node_number,
                service_number: 0,
            },
        }
    }
}

impl cbor::encode::Encode for Eid {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(2), |a| match self {
            Eid::Null => {
                a.emit(&1u64);
                a.emit(&0u64);
            }
            Eid::Dtn { node_name, demux } => {
                a.emit(&1u64);
                a.emit_text(&format!("//{node_name}/{demux}"));
            }
            Eid::Ipn {
                node_number,
                service_number,
            } => {
                a.emit(&2u64);
                a.emit(&(*node_number, *service_number));
            }
        })
    }
}

impl cbor::decode::Decode for Eid {
    type Error = self::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| parse::eid_from_cbor(a))
    }
}

impl std::str::FromStr for Eid {
    type Err = self::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::eid_from_str(s)
    }
}

impl std::fmt::Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Eid::Null => f.write_str("dtn:none"),
            Eid::Dtn { node_name, demux } => write!(f, "dtn://{node_name}/{demux}"),
            Eid::Ipn {
                node_number,
                service_number,
            } => write!(f, "ipn:{node_number}.{service_number}"),
        }
    }
}

impl std::fmt::Debug for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}
