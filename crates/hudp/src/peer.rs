//! The set of peers currently authorized to exchange reliable-class traffic
//! with this endpoint.
//!
//! A peer enters the set either because we initiated [`Endpoint::register_peer`]
//! and got the ACK back, or because we received a REGISTER frame from them --
//! receiving one is itself treated as their side of the handshake, so no
//! separate acceptance step is required of the receiver. A peer leaves the
//! set the moment either side's DEREGISTER frame is observed, not when the
//! deregistration ACK eventually arrives.

use crate::metrics::{bump, Metrics};
use dashmap::DashSet;
use std::net::SocketAddr;

#[derive(Default)]
pub struct RegisteredPeers {
    peers: DashSet<SocketAddr>,
}

impl RegisteredPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, peer: &SocketAddr) -> bool {
        self.peers.contains(peer)
    }

    /// Adds `peer` to the registered set. Returns `true` if it was newly
    /// added (and bumps the `registrations` counter), `false` if it was
    /// already registered.
    pub fn register(&self, peer: SocketAddr, metrics: &Metrics) -> bool {
        let newly_added = self.peers.insert(peer);
        if newly_added {
            bump!(metrics, registrations);
            log::info!("peer {peer} registered for reliable traffic");
        }
        newly_added
    }

    pub fn deregister(&self, peer: &SocketAddr) {
        if self.peers.remove(peer).is_some() {
            log::info!("peer {peer} deregistered");
        }
    }

    /// Drops every registered peer, used when an endpoint shuts down.
    pub fn clear(&self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    #[test]
    fn register_is_idempotent_and_only_counts_once() {
        let metrics = Metrics::default();
        let peers = RegisteredPeers::new();

        assert!(peers.register(addr(), &metrics));
        assert!(!peers.register(addr(), &metrics));
        assert_eq!(metrics.snapshot().registrations, 1);
        assert!(peers.is_registered(&addr()));
    }

    #[test]
    fn deregister_removes_a_registered_peer() {
        let metrics = Metrics::default();
        let peers = RegisteredPeers::new();
        peers.register(addr(), &metrics);

        peers.deregister(&addr());

        assert!(!peers.is_registered(&addr()));
    }

    #[test]
    fn clear_drops_every_registered_peer() {
        let metrics = Metrics::default();
        let peers = RegisteredPeers::new();
        peers.register(addr(), &metrics);
        peers.register("127.0.0.1:9002".parse().unwrap(), &metrics);

        peers.clear();

        assert!(!peers.is_registered(&addr()));
        assert!(!peers.is_registered(&"127.0.0.1:9002".parse().unwrap()));
    }
}
