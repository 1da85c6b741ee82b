//! The corvid DTN node core.
//!
//! Wires the bundle store, the convergence-layer manager, peer discovery,
//! the routing engine and the application-agent multiplexer into a
//! store-and-forward Bundle Protocol node. The wire format itself lives in
//! [`corvid_bpv7`].

use corvid_bpv7 as bpv7;
use corvid_cbor as cbor;

pub mod agents;
pub mod cla;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod dispatcher;
pub mod id_keeper;
pub mod node;
pub mod routing;
pub mod scheduler;
pub mod store;

pub use async_trait::async_trait;
pub use node::Node;

use tracing::{debug, error, info, trace, warn};
