//! BPv7 (RFC 9171) bundle wire format for the corvid DTN node.
//!
//! The crate covers everything that travels on the wire: endpoint
//! identifiers, the primary and canonical block model with per-block CRCs,
//! the extension-block registry, bundle assembly and validation,
//! fragmentation and reassembly, administrative records, and the BPSec
//! security sublayer.

use corvid_cbor as cbor;

pub mod block;
pub mod bpsec;
pub mod builder;
pub mod bundle;
pub mod bundle_flags;
pub mod bundle_id;
pub mod canonical;
pub mod creation_timestamp;
pub mod crc;
pub mod dtn_time;
pub mod eid;
pub mod error;
pub mod fragment;
pub mod primary_block;
pub mod registry;
pub mod signature;
pub mod status_report;

pub use error::Error;
