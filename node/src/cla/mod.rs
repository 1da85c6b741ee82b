//! Convergence-layer abstractions.
//!
//! A [`Convergence`] is one started transport endpoint: a sender toward a
//! known peer, or a receiver (listener) for inbound bundles. A
//! [`ConvergenceProvider`] is a listener that mints new `Convergence`
//! instances as connections arrive (connection-oriented CLAs such as
//! TCPCLv4 register through it). Both report back to the node over the
//! manager's status channel.

use super::*;
use bpv7::eid::Eid;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

pub mod manager;
pub mod mtcp;

pub use manager::Manager;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("a CLA named {0} is already registered")]
    AlreadyExists(String),

    #[error("unknown CLA type {0}")]
    UnknownKind(String),

    #[error("CLA {0} is not active")]
    NotActive(String),

    #[error("protocol violation from peer: {0}")]
    PeerError(String),

    #[error("operation timed out")]
    Timeout,

    #[error("the status channel is disconnected")]
    Disconnected,

    #[error(transparent)]
    Connection(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] cbor::decode::Error),

    #[error(transparent)]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The transport kinds a node knows how to address. The numeric codes
/// appear in discovery announcements.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaKind {
    Mtcp,
    TcpClV4,
    Quicl,
}

impl ClaKind {
    pub fn code(&self) -> u64 {
        match self {
            ClaKind::Mtcp => 0,
            ClaKind::TcpClV4 => 1,
            ClaKind::Quicl => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(ClaKind::Mtcp),
            1 => Some(ClaKind::TcpClV4),
            2 => Some(ClaKind::Quicl),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ClaKind::Mtcp => "mtcp",
            ClaKind::TcpClV4 => "tcpclv4",
            ClaKind::Quicl => "quicl",
        })
    }
}

/// Status events flowing from the adapters to the routing side.
#[derive(Debug)]
pub enum ConvergenceStatus {
    ReceivedBundle { cla: String, data: Vec<u8> },
    PeerAppeared(Eid),
    PeerDisappeared(Eid),
}

/// Outcome of starting an adapter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Running.
    Up,
    /// Failed, worth retrying on the next tick.
    Retry,
    /// Failed permanently; the manager evicts the element.
    Abandon,
}

/// One transport endpoint.
#[async_trait]
pub trait Convergence: Send + Sync {
    /// Unique element name, e.g. `mtcp://10.0.0.7:16162`.
    fn name(&self) -> String;

    fn kind(&self) -> ClaKind;

    /// The peer this endpoint sends toward; `None` for pure receivers.
    fn peer(&self) -> Option<Eid>;

    async fn start(&self, events: mpsc::Sender<ConvergenceStatus>) -> StartOutcome;

    /// Transmits one serialised bundle.
    async fn send(&self, bundle: &[u8]) -> Result<()>;

    async fn close(&self);
}

/// A listener that creates and registers new [`Convergence`] instances,
/// e.g. one per inbound connection.
#[async_trait]
pub trait ConvergenceProvider: Send + Sync {
    fn kind(&self) -> ClaKind;

    async fn start(&self, manager: Arc<Manager>) -> Result<()>;

    async fn close(&self);
}

/// The set of currently reachable peers, shared with the routing engine.
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<Eid, String>>,
}

impl PeerTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `peer` as reachable through the named CLA element. Returns
    /// `false` if the peer was already known.
    pub fn insert(&self, peer: Eid, cla_name: String) -> bool {
        self.peers
            .write()
            .unwrap()
            .insert(peer.node_id(), cla_name)
            .is_none()
    }

    pub fn remove(&self, peer: &Eid) -> bool {
        self.peers.write().unwrap().remove(&peer.node_id()).is_some()
    }

    pub fn cla_for(&self, peer: &Eid) -> Option<String> {
        self.peers.read().unwrap().get(&peer.node_id()).cloned()
    }

    /// Node ids of every reachable peer.
    pub fn current(&self) -> Vec<Eid> {
        self.peers.read().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, peer: &Eid) -> bool {
        self.peers.read().unwrap().contains_key(&peer.node_id())
    }
}
