//! Peer discovery over IP multicast.
//!
//! Every interval the node multicasts a CBOR array of announcements, one
//! per configured listener. Receiving nodes create a sender of the
//! advertised CLA type toward the announcer's address, unless the
//! announcement is their own.

use super::*;
use bpv7::eid::Eid;
use cla::{ClaKind, Manager};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const DISCOVERY_PORT: u16 = 35039;
pub const MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 23, 23, 23);
pub const MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0, 0x23);
pub const DEFAULT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// One advertised ingress point: `(cla-type-code, endpoint, port)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub kind: ClaKind,
    pub endpoint: Eid,
    pub port: u16,
}

impl cbor::encode::Encode for Announcement {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(3), |a| {
            a.emit(&self.kind.code());
            a.emit(&self.endpoint);
            a.emit(&(self.port as u64));
        })
    }
}

impl cbor::decode::Decode for Announcement {
    type Error = DecodeError;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            let code = a.pull_uint()?;
            let kind = ClaKind::from_code(code).ok_or(DecodeError::UnknownClaType(code))?;
            let endpoint: Eid = a.parse()?;
            let port = a.pull_uint()?;
            Ok(Self {
                kind,
                endpoint,
                port: u16::try_from(port).map_err(cbor::decode::Error::from)?,
            })
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unknown CLA type code {0}")]
    UnknownClaType(u64),

    #[error(transparent)]
    InvalidEid(#[from] bpv7::eid::Error),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

fn encode_beacon(announcements: &[Announcement]) -> Vec<u8> {
    cbor::encode::emit(&announcements.to_vec())
}

fn decode_beacon(data: &[u8]) -> Result<Vec<Announcement>, DecodeError> {
    let mut decoder = cbor::decode::Decoder::new(data);
    decoder.pull_array(|a| {
        let mut announcements = Vec::new();
        while !a.at_end().map_err(cbor::decode::Error::from)? {
            announcements.push(a.parse()?);
        }
        Ok(announcements)
    })
}

pub struct Discovery {
    node_id: Eid,
    announcements: Vec<Announcement>,
    interval: std::time::Duration,
    manager: Arc<Manager>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Discovery {
    pub fn new(
        node_id: Eid,
        announcements: Vec<Announcement>,
        interval: std::time::Duration,
        manager: Arc<Manager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            announcements,
            interval,
            manager,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    async fn bind_v4() -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)).await?;
        socket.join_multicast_v4(MULTICAST_V4, Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        Ok(socket)
    }

    async fn bind_v6() -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, DISCOVERY_PORT)).await?;
        socket.join_multicast_v6(&MULTICAST_V6, 0)?;
        Ok(socket)
    }

    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let v4 = Arc::new(Self::bind_v4().await?);
        let v6 = match Self::bind_v6().await {
            Ok(socket) => Some(Arc::new(socket)),
            Err(e) => {
                // Running without IPv6 discovery is tolerable
                warn!("IPv6 discovery unavailable: {e}");
                None
            }
        };

        // Announcer
        let beacon = encode_beacon(&self.announcements);
        let announce_v4 = v4.clone();
        let announce_v6 = v6.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = announce_v4
                            .send_to(&beacon, (MULTICAST_V4, DISCOVERY_PORT))
                            .await
                        {
                            debug!("discovery announce failed: {e}");
                        }
                        if let Some(v6) = &announce_v6
                            && let Err(e) =
                                v6.send_to(&beacon, (MULTICAST_V6, DISCOVERY_PORT)).await
                        {
                            debug!("IPv6 discovery announce failed: {e}");
                        }
                    }
                }
            }
        });

        // Receivers
        self.spawn_receiver(v4);
        if let Some(v6) = v6 {
            self.spawn_receiver(v6);
        }
        Ok(())
    }

    fn spawn_receiver(self: &Arc<Self>, socket: Arc<UdpSocket>) {
        let this = self.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let mut buffer = [0u8; 64 * 1024];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok((len, from)) => this.handle_beacon(&buffer[..len], from).await,
                        Err(e) => {
                            debug!("discovery receive error: {e}");
                        }
                    },
                }
            }
        });
    }

    async fn handle_beacon(&self, data: &[u8], from: SocketAddr) {
        let announcements = match decode_beacon(data) {
            Ok(announcements) => announcements,
            Err(e) => {
                debug!("malformed discovery beacon from {from}: {e}");
                return;
            }
        };

        for announcement in announcements {
            if announcement.endpoint.same_node(&self.node_id) {
                continue;
            }
            let address = SocketAddr::new(from.ip(), announcement.port).to_string();
            let result = match announcement.kind {
                ClaKind::Mtcp => {
                    self.manager
                        .register(cla::mtcp::MtcpSender::new(
                            announcement.endpoint.clone(),
                            address,
                        ))
                        .await
                }
                kind => {
                    trace!("no in-tree dialer for advertised CLA type {kind}");
                    continue;
                }
            };
            match result {
                Ok(()) => {
                    debug!(
                        "discovered peer {} via {}",
                        announcement.endpoint, announcement.kind
                    );
                }
                Err(cla::Error::AlreadyExists(_)) => {}
                Err(e) => warn!("failed to register discovered peer: {e}"),
            }
        }
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_round_trip() {
        let announcements = vec![
            Announcement {
                kind: ClaKind::Mtcp,
                endpoint: "dtn://alpha/".parse().unwrap(),
                port: 16162,
            },
            Announcement {
                kind: ClaKind::TcpClV4,
                endpoint: "ipn:42.0".parse().unwrap(),
                port: 4556,
            },
        ];
        let beacon = encode_beacon(&announcements);
        assert_eq!(decode_beacon(&beacon).unwrap(), announcements);
    }

    #[test]
    fn unknown_cla_type_rejected() {
        let beacon = cbor::encode::emit_array(Some(1), |a| {
            a.emit_array(Some(3), |a| {
                a.emit(&99u64);
                a.emit(&"dtn://alpha/".parse::<Eid>().unwrap());
                a.emit(&16162u64);
            });
        });
        assert!(matches!(
            decode_beacon(&beacon),
            Err(DecodeError::UnknownClaType(99))
        ));
    }
}
