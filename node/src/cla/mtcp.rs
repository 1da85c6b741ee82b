//! Minimal TCP convergence layer.
//!
//! One CBOR byte-string-prefixed bundle per message over a persistent TCP
//! connection; an empty byte string is the keepalive, sent every five
//! seconds and consumed silently on reception.

use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
pub const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Frames one bundle for the wire.
fn frame(bundle: &[u8]) -> Vec<u8> {
    cbor::encode::emit_bytes(bundle)
}

/// The empty-byte-string keepalive frame.
const KEEPALIVE: [u8; 1] = [0x40];

/// Drains complete frames out of `buffer`, forwarding non-empty ones as
/// received bundles. Returns an error on malformed framing.
async fn drain_frames(
    cla: &str,
    buffer: &mut Vec<u8>,
    events: &mpsc::Sender<ConvergenceStatus>,
) -> Result<()> {
    loop {
        match cbor::decode::parse_prefix::<Vec<u8>>(buffer) {
            Ok((data, consumed)) => {
                buffer.drain(..consumed);
                if data.is_empty() {
                    // Keepalive
                    continue;
                }
                events
                    .send(ConvergenceStatus::ReceivedBundle {
                        cla: cla.to_string(),
                        data,
                    })
                    .await
                    .map_err(|_| Error::Disconnected)?;
            }
            Err(cbor::decode::Error::NeedMoreData(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Listening side: a receiver element accepting any number of inbound
/// connections.
pub struct MtcpListener {
    listen_addr: std::net::SocketAddr,
    bound: std::sync::Mutex<Option<std::net::SocketAddr>>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
    tracker: TaskTracker,
}

impl MtcpListener {
    pub fn new(listen_addr: std::net::SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            listen_addr,
            bound: std::sync::Mutex::new(None),
            cancel: std::sync::Mutex::new(None),
            tracker: TaskTracker::new(),
        })
    }

    /// The bound address, once started. Differs from the configured one
    /// when listening on an ephemeral port.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.bound.lock().unwrap()
    }

    async fn connection_loop(
        name: String,
        mut stream: TcpStream,
        events: mpsc::Sender<ConvergenceStatus>,
        cancel: CancellationToken,
    ) {
        let mut buffer = Vec::with_capacity(16 * 1024);
        let mut chunk = [0u8; 16 * 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                read = stream.read(&mut chunk) => match read {
                    Ok(0) => return,
                    Ok(n) => {
                        buffer.extend_from_slice(&chunk[..n]);
                        if let Err(e) = drain_frames(&name, &mut buffer, &events).await {
                            // A framing error makes the connection suspect
                            warn!("mtcp connection dropped: {e}");
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("mtcp read error: {e}");
                        return;
                    }
                },
            }
        }
    }
}

#[async_trait]
impl Convergence for MtcpListener {
    fn name(&self) -> String {
        format!("mtcp-listen://{}", self.listen_addr)
    }

    fn kind(&self) -> ClaKind {
        ClaKind::Mtcp
    }

    fn peer(&self) -> Option<Eid> {
        None
    }

    async fn start(&self, events: mpsc::Sender<ConvergenceStatus>) -> StartOutcome {
        let listener = match TcpListener::bind(self.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("mtcp failed to bind {}: {e}", self.listen_addr);
                return StartOutcome::Retry;
            }
        };
        *self.bound.lock().unwrap() = listener.local_addr().ok();

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());

        let name = self.name();
        let tracker = self.tracker.clone();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            trace!("mtcp connection from {remote}");
                            tracker.spawn(Self::connection_loop(
                                name.clone(),
                                stream,
                                events.clone(),
                                cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            debug!("mtcp accept error: {e}");
                        }
                    },
                }
            }
        });
        StartOutcome::Up
    }

    async fn send(&self, _bundle: &[u8]) -> Result<()> {
        Err(Error::NotActive("mtcp listener cannot send".into()))
    }

    async fn close(&self) {
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Connection state shared between the sender element and its keepalive
/// task.
struct SenderShared {
    peer: Eid,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    events: std::sync::Mutex<Option<mpsc::Sender<ConvergenceStatus>>>,
}

impl SenderShared {
    async fn peer_lost(&self) {
        let events = self.events.lock().unwrap().clone();
        if let Some(events) = events {
            let _ = events
                .send(ConvergenceStatus::PeerDisappeared(self.peer.clone()))
                .await;
        }
    }

    async fn write_frame(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(Error::NotActive(self.peer.to_string()));
        };
        if let Err(e) = stream.write_all(data).await {
            *guard = None;
            drop(guard);
            self.peer_lost().await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Sending side: one persistent connection toward a peer.
pub struct MtcpSender {
    address: String,
    shared: Arc<SenderShared>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl MtcpSender {
    pub fn new(peer: Eid, address: String) -> Arc<Self> {
        Arc::new(Self {
            address,
            shared: Arc::new(SenderShared {
                peer,
                stream: tokio::sync::Mutex::new(None),
                events: std::sync::Mutex::new(None),
            }),
            cancel: std::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl Convergence for MtcpSender {
    fn name(&self) -> String {
        format!("mtcp://{}", self.address)
    }

    fn kind(&self) -> ClaKind {
        ClaKind::Mtcp
    }

    fn peer(&self) -> Option<Eid> {
        Some(self.shared.peer.clone())
    }

    async fn start(&self, events: mpsc::Sender<ConvergenceStatus>) -> StartOutcome {
        let stream = match tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect(&self.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("mtcp connect to {} failed: {e}", self.address);
                return StartOutcome::Retry;
            }
            Err(_) => {
                debug!("mtcp connect to {} timed out", self.address);
                return StartOutcome::Retry;
            }
        };

        *self.shared.stream.lock().await = Some(stream);
        *self.shared.events.lock().unwrap() = Some(events);

        let cancel = CancellationToken::new();
        if let Some(old) = self.cancel.lock().unwrap().replace(cancel.clone()) {
            old.cancel();
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick of a fresh interval
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        if shared.write_frame(&KEEPALIVE).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        StartOutcome::Up
    }

    async fn send(&self, bundle: &[u8]) -> Result<()> {
        self.shared.write_frame(&frame(bundle)).await
    }

    async fn close(&self) {
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        if let Some(mut stream) = self.shared.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}
