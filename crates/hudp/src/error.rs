//! Typed errors for the public API.

use std::net::SocketAddr;
use thiserror::Error;

/// Fatal construction-time failure, propagated from [`Endpoint::bind`](crate::Endpoint::bind).
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("failed to bind local socket: {0}")]
    Bind(#[source] std::io::Error),
}

/// Sentinel returned by [`Endpoint::send`](crate::Endpoint::send) instead of escalating a
/// policy rejection to a panic or a dropped packet the caller can't observe.
#[derive(Error, Debug)]
pub enum SendError {
    /// Reliable send attempted before the destination peer completed registration.
    #[error("peer {0} is not registered for reliable traffic")]
    NotRegistered(SocketAddr),
    /// No peer address configured on this endpoint.
    #[error("no peer address configured")]
    NoPeer,
    #[error("socket send failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Outcome of [`Endpoint::register_peer`](crate::Endpoint::register_peer) and the
/// deregister handshake run from [`Endpoint::stop`](crate::Endpoint::stop).
#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("registration handshake timed out")]
    Timeout,
    #[error("no peer address configured")]
    NoPeer,
    #[error("socket send failed: {0}")]
    Io(#[source] std::io::Error),
}
