//! Sender in-flight table: retransmission and expiry engine.
//!
//! The table is guarded by a single, short-held `std::sync::Mutex`. `tick`
//! mutates bookkeeping (or drops an expired entry) while holding the lock,
//! then returns the datagrams that need resending so the caller can perform
//! the actual socket writes *after* releasing it -- the lock is never held
//! across a socket send.

use crate::metrics::{bump, Metrics};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Default cadence at which unacknowledged reliable-class entries are resent.
pub const RETX_INTERVAL: Duration = Duration::from_millis(50);

/// Distinguishes which metrics counter an ACK bumps and lets the reader log
/// meaningfully; does not otherwise change retransmission behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightKind {
    Normal,
    Registration,
    Deregistration,
}

struct InFlightEntry {
    bytes: Bytes,
    dest: SocketAddr,
    kind: InFlightKind,
    first_send: Instant,
    last_send: Instant,
    retrans_count: u32,
    /// Age at which this entry is retired unacknowledged. For normal reliable
    /// sends this is the endpoint's `skip_threshold`; for registration and
    /// deregistration entries it is the handshake's own timeout.
    deadline: Duration,
    /// Fires with the observed RTT when the entry is ACKed. Dropped without
    /// firing when the entry expires, which a waiting oneshot receiver
    /// observes as a closed channel -- i.e. a timeout.
    completion: Option<oneshot::Sender<Duration>>,
}

/// A datagram that must be resent to `dest`, produced by [`InFlightTable::tick`].
pub struct Resend {
    pub seq: u16,
    pub bytes: Bytes,
    pub dest: SocketAddr,
}

#[derive(Default)]
pub struct InFlightTable {
    entries: Mutex<HashMap<u16, InFlightEntry>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly-sent reliable-class datagram. Logs (rather than
    /// panics) if `seq` collides with an existing entry -- this should never
    /// happen in practice since sequence counters only wrap after the
    /// in-flight window has long since drained.
    pub fn insert(
        &self,
        seq: u16,
        bytes: Bytes,
        dest: SocketAddr,
        kind: InFlightKind,
        deadline: Duration,
        completion: Option<oneshot::Sender<Duration>>,
    ) {
        let now = Instant::now();
        let entry = InFlightEntry {
            bytes,
            dest,
            kind,
            first_send: now,
            last_send: now,
            retrans_count: 0,
            deadline,
            completion,
        };
        let mut table = self.entries.lock().expect("in-flight table mutex poisoned");
        if table.insert(seq, entry).is_some() {
            log::warn!("in-flight table already had an entry for seq {seq}, overwriting");
        }
    }

    /// Marks `seq` acknowledged: fires its completion signal, bumps the
    /// kind-appropriate ACK counter, and removes the entry.
    pub fn mark_acked(&self, seq: u16, metrics: &Metrics) {
        let mut table = self.entries.lock().expect("in-flight table mutex poisoned");
        if let Some(entry) = table.remove(&seq) {
            let rtt = entry.first_send.elapsed();
            match entry.kind {
                InFlightKind::Normal => bump!(metrics, reliable_acks_recv),
                InFlightKind::Registration => bump!(metrics, reg_acks_recv),
                InFlightKind::Deregistration => {}
            }
            if let Some(tx) = entry.completion {
                let _ = tx.send(rtt);
            }
            log::trace!("seq {seq} acked after {:?} ({} retransmits)", rtt, entry.retrans_count);
        }
    }

    /// Scans the table once: retires entries past their deadline and
    /// collects entries due for a 50 ms retransmit. Must be called on the
    /// `RETX_INTERVAL` cadence by the Retransmitter task.
    pub fn tick(&self, now: Instant, metrics: &Metrics) -> Vec<Resend> {
        let mut resends = Vec::new();
        let mut table = self.entries.lock().expect("in-flight table mutex poisoned");
        table.retain(|seq, entry| {
            if now.duration_since(entry.first_send) >= entry.deadline {
                bump!(metrics, lost_marked);
                log::warn!("seq {seq} exceeded its deadline unacknowledged, giving up");
                return false;
            }
            if now.duration_since(entry.last_send) >= RETX_INTERVAL {
                entry.last_send = now;
                entry.retrans_count += 1;
                bump!(metrics, retransmissions);
                resends.push(Resend {
                    seq: *seq,
                    bytes: entry.bytes.clone(),
                    dest: entry.dest,
                });
            }
            true
        });
        resends
    }
}
