//! Public API: binds one UDP socket and drives the Reader and Retransmitter
//! tasks that implement the rest of the transport.

use crate::clock::now_ms_truncated;
use crate::config::EndpointConfig;
use crate::error::{EndpointError, RegisterError, SendError};
use crate::metrics::{bump, Metrics, MetricsSnapshot};
use crate::peer::RegisteredPeers;
use crate::sender::{InFlightKind, InFlightTable};
use crate::session::SessionTable;
use crate::wire::{AckFrame, Channel, DataFrame, Frame, WireError};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Which logical channel a [`Received`] payload arrived on. Only the two
/// channels an application ever sees -- REGISTER/DEREGISTER are handled
/// entirely inside the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryChannel {
    Reliable,
    Unreliable,
}

/// An application payload delivered from a peer.
#[derive(Debug, Clone)]
pub struct Received {
    pub peer: SocketAddr,
    pub channel: DeliveryChannel,
    pub payload: Bytes,
}

/// One bound UDP endpoint. [`Endpoint::bind`] returns it inside an `Arc`;
/// clone that `Arc` to share the endpoint with other tasks.
pub struct Endpoint {
    socket: UdpSocket,
    peer_addr: Mutex<Option<SocketAddr>>,
    config: EndpointConfig,
    registered: RegisteredPeers,
    sessions: SessionTable,
    in_flight: InFlightTable,
    metrics: Metrics,
    reliable_seq: AtomicU16,
    unreliable_seq: AtomicU16,
    to_app: mpsc::UnboundedSender<Received>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    retransmitter_task: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Binds `local_addr`, optionally pinning a single remote `peer_addr`
    /// (this transport talks to at most one peer, no multi-peer fan-out),
    /// and starts the background Reader and Retransmitter tasks.
    pub async fn bind(
        local_addr: SocketAddr,
        peer_addr: Option<SocketAddr>,
        config: EndpointConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Received>), EndpointError> {
        let socket = UdpSocket::bind(local_addr)
            .await
            .map_err(EndpointError::Bind)?;
        log::info!("hudp endpoint bound to {local_addr}");

        let (to_app, from_endpoint) = mpsc::unbounded_channel();

        let endpoint = Arc::new(Self {
            socket,
            peer_addr: Mutex::new(peer_addr),
            config,
            registered: RegisteredPeers::new(),
            sessions: SessionTable::new(),
            in_flight: InFlightTable::new(),
            metrics: Metrics::default(),
            // The reliable counter (shared by RELIABLE/REGISTER/DEREGISTER)
            // starts at a random value, so the first REGISTER frame this
            // endpoint ever sends carries a random initial sequence number
            // rather than always starting a fresh handshake at zero.
            reliable_seq: AtomicU16::new(rand::random()),
            unreliable_seq: AtomicU16::new(0),
            to_app,
            reader_task: Mutex::new(None),
            retransmitter_task: Mutex::new(None),
        });

        let reader = tokio::spawn(Self::run_reader(Arc::clone(&endpoint)));
        let retransmitter = tokio::spawn(Self::run_retransmitter(Arc::clone(&endpoint)));
        *endpoint.reader_task.lock().expect("mutex poisoned") = Some(reader);
        *endpoint.retransmitter_task.lock().expect("mutex poisoned") = Some(retransmitter);

        Ok((endpoint, from_endpoint))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sets or replaces the single peer this endpoint exchanges reliable
    /// traffic with. Useful when the local port is OS-assigned (bound to
    /// `:0`) and the peer's address is only known after both sides bind.
    pub fn set_peer(&self, addr: SocketAddr) {
        *self.peer_addr.lock().expect("mutex poisoned") = Some(addr);
    }

    fn peer(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock().expect("mutex poisoned")
    }

    fn next_reliable_seq(&self) -> u16 {
        self.reliable_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn next_unreliable_seq(&self) -> u16 {
        self.unreliable_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs the registration handshake against the configured peer: sends a
    /// REGISTER frame through the same in-flight/retransmit machinery as
    /// ordinary reliable data and waits for its ACK.
    pub async fn register_peer(&self) -> Result<(), RegisterError> {
        let peer = self.peer().ok_or(RegisterError::NoPeer)?;
        let seq = self.next_reliable_seq();
        let frame = DataFrame {
            channel: Channel::Register,
            seq,
            timestamp: now_ms_truncated(),
            payload: Bytes::new(),
        };
        let encoded = frame.encode();

        let (tx, rx) = oneshot::channel();
        self.in_flight.insert(
            seq,
            encoded.clone(),
            peer,
            InFlightKind::Registration,
            self.config.handshake_timeout,
            Some(tx),
        );
        self.socket
            .send_to(&encoded, peer)
            .await
            .map_err(RegisterError::Io)?;
        bump!(self.metrics, sent_reg);

        match tokio::time::timeout(self.config.handshake_timeout, rx).await {
            Ok(Ok(_rtt)) => {
                self.registered.register(peer, &self.metrics);
                Ok(())
            }
            _ => Err(RegisterError::Timeout),
        }
    }

    /// Gracefully tears down this endpoint: best-efforts a DEREGISTER
    /// handshake with the configured peer (sender side), joins the
    /// background tasks, and clears the registered-peer set. Sessions are
    /// only cleared wholesale on the receiver side (no peer configured) --
    /// a sender-side endpoint leaves its own sessions to be torn down by
    /// the normal per-peer DEREGISTER handling on the receiving side.
    pub async fn stop(&self) -> Result<(), RegisterError> {
        let result = if let Some(peer) = self.peer() {
            self.registered.deregister(&peer);
            self.sessions.remove(&peer);

            let seq = self.next_reliable_seq();
            let frame = DataFrame {
                channel: Channel::Deregister,
                seq,
                timestamp: now_ms_truncated(),
                payload: Bytes::new(),
            };
            let encoded = frame.encode();

            let (tx, rx) = oneshot::channel();
            self.in_flight.insert(
                seq,
                encoded.clone(),
                peer,
                InFlightKind::Deregistration,
                self.config.handshake_timeout,
                Some(tx),
            );
            self.socket
                .send_to(&encoded, peer)
                .await
                .map_err(RegisterError::Io)?;

            match tokio::time::timeout(self.config.handshake_timeout, rx).await {
                Ok(Ok(_rtt)) => Ok(()),
                _ => Err(RegisterError::Timeout),
            }
        } else {
            self.sessions.clear();
            Ok(())
        };

        if let Some(task) = self.reader_task.lock().expect("mutex poisoned").take() {
            task.abort();
        }
        if let Some(task) = self.retransmitter_task.lock().expect("mutex poisoned").take() {
            task.abort();
        }
        self.registered.clear();

        result
    }

    /// Sends `payload` on the RELIABLE channel. Fails closed if the
    /// configured peer hasn't completed registration.
    pub async fn send_reliable(&self, payload: Bytes) -> Result<(), SendError> {
        let peer = self.peer().ok_or(SendError::NoPeer)?;
        if !self.registered.is_registered(&peer) {
            return Err(SendError::NotRegistered(peer));
        }

        let seq = self.next_reliable_seq();
        let frame = DataFrame {
            channel: Channel::Reliable,
            seq,
            timestamp: now_ms_truncated(),
            payload,
        };
        let encoded = frame.encode();

        self.in_flight.insert(
            seq,
            encoded.clone(),
            peer,
            InFlightKind::Normal,
            self.config.skip_threshold,
            None,
        );
        self.socket
            .send_to(&encoded, peer)
            .await
            .map_err(SendError::Io)?;
        bump!(self.metrics, sent_reliable);
        Ok(())
    }

    /// Sends `payload` on the UNRELIABLE channel: no ACK, no retransmission,
    /// no ordering guarantee.
    pub async fn send_unreliable(&self, payload: Bytes) -> Result<(), SendError> {
        let peer = self.peer().ok_or(SendError::NoPeer)?;
        let frame = DataFrame {
            channel: Channel::Unreliable,
            seq: self.next_unreliable_seq(),
            timestamp: now_ms_truncated(),
            payload,
        };
        self.socket
            .send_to(&frame.encode(), peer)
            .await
            .map_err(SendError::Io)?;
        bump!(self.metrics, sent_unreliable);
        Ok(())
    }

    async fn run_reader(self_: Arc<Self>) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, src) = match self_.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("reader: recv_from failed: {e}");
                    continue;
                }
            };
            if len == 0 {
                continue;
            }
            self_.handle_datagram(&buf[..len], src).await;
        }
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let frame = match crate::wire::decode_frame(data) {
            Ok(frame) => frame,
            Err(WireError::TooShort { len, min }) => {
                bump!(self.metrics, invalid_packets);
                log::warn!("dropping {len}-byte datagram from {src}, need at least {min}");
                return;
            }
            Err(WireError::UnknownChannel(byte)) => {
                bump!(self.metrics, invalid_packets);
                log::warn!("dropping datagram from {src} with unknown channel {byte:#04x}");
                return;
            }
        };

        match frame {
            Frame::Ack(ack) => self.in_flight.mark_acked(ack.seq, &self.metrics),
            Frame::Data(frame) => self.handle_data_frame(frame, src).await,
        }
    }

    async fn handle_data_frame(&self, frame: DataFrame, src: SocketAddr) {
        match frame.channel {
            Channel::Unreliable => {
                bump!(self.metrics, recv_unreliable);
                let _ = self.to_app.send(Received {
                    peer: src,
                    channel: DeliveryChannel::Unreliable,
                    payload: frame.payload,
                });
            }
            Channel::Reliable => {
                if !self.registered.is_registered(&src) {
                    bump!(self.metrics, invalid_packets);
                    log::warn!("dropping reliable frame from unregistered peer {src}");
                    return;
                }
                bump!(self.metrics, recv_reliable);
                self.ack(frame.seq, frame.timestamp, src).await;

                let delivered = self.sessions.admit(
                    src,
                    self.config.max_buffered,
                    self.config.skip_threshold,
                    frame.seq,
                    frame.timestamp,
                    frame.payload,
                    Instant::now(),
                );
                for d in delivered {
                    let _ = self.to_app.send(Received {
                        peer: src,
                        channel: DeliveryChannel::Reliable,
                        payload: d.payload,
                    });
                }
            }
            Channel::Register => {
                bump!(self.metrics, recv_reg);
                self.registered.register(src, &self.metrics);
                self.ack(frame.seq, frame.timestamp, src).await;
            }
            Channel::Deregister => {
                self.registered.deregister(&src);
                self.sessions.remove(&src);
                self.ack(frame.seq, frame.timestamp, src).await;
            }
        }
    }

    async fn ack(&self, seq: u16, timestamp: u32, dest: SocketAddr) {
        let ack = AckFrame { seq, timestamp };
        if let Err(e) = self.socket.send_to(&ack.encode(), dest).await {
            log::warn!("failed to send ack for seq {seq} to {dest}: {e}");
        }
    }

    async fn run_retransmitter(self_: Arc<Self>) {
        let mut ticker = tokio::time::interval(crate::sender::RETX_INTERVAL);
        loop {
            ticker.tick().await;
            let now = Instant::now();

            for resend in self_.in_flight.tick(now, &self_.metrics) {
                if let Err(e) = self_.socket.send_to(&resend.bytes, resend.dest).await {
                    log::warn!("retransmit of seq {} to {} failed: {e}", resend.seq, resend.dest);
                }
            }

            for (peer, delivered) in self_.sessions.pump_all(now) {
                for d in delivered {
                    let _ = self_.to_app.send(Received {
                        peer,
                        channel: DeliveryChannel::Reliable,
                        payload: d.payload,
                    });
                }
            }
        }
    }
}
