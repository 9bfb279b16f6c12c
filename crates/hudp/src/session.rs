//! Per-peer receive session: reorder buffer and in-order delivery pump.

use crate::seq::{earliest_by_forward_distance, forward_distance, wrapping_next};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BufferedFrame {
    timestamp: u32,
    payload: Bytes,
    arrival: Instant,
}

/// A frame released to the application by [`Session::admit`] or
/// [`Session::pump_timeouts`], in delivery order.
pub struct Delivered {
    pub seq: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

struct SessionState {
    /// `None` until the first reliable frame arrives. The RELIABLE, REGISTER
    /// and DEREGISTER channels share one sequence counter on the sender side
    /// (so a bare ACK, which carries no channel tag, unambiguously matches
    /// one in-flight entry), which means a peer's first RELIABLE frame can
    /// legitimately start at a non-zero sequence number. The session adopts
    /// whatever it first sees as its baseline rather than assuming 0.
    expected: Option<u16>,
    buffer: HashMap<u16, BufferedFrame>,
    /// Set when the buffer first holds a frame that can't be delivered yet
    /// because `expected` hasn't arrived. Cleared whenever the buffer drains
    /// empty. Used to decide when a gap has aged past `skip_threshold`.
    stall_since: Option<Instant>,
}

/// Tracks one peer's reliable-channel delivery order.
pub struct Session {
    state: Mutex<SessionState>,
    max_buffered: usize,
    skip_threshold: Duration,
}

impl Session {
    pub fn new(max_buffered: usize, skip_threshold: Duration) -> Self {
        Self {
            state: Mutex::new(SessionState {
                expected: None,
                buffer: HashMap::new(),
                stall_since: None,
            }),
            max_buffered,
            skip_threshold,
        }
    }

    /// Admits a reliable-channel frame. The caller must still ACK the frame
    /// regardless of the returned vector: an ACK means "received", not
    /// "delivered in order".
    ///
    /// Returns frames now ready for in-order delivery, in order. Empty if
    /// `seq` was buffered behind a gap, was a stale duplicate, or the buffer
    /// was full.
    pub fn admit(&self, seq: u16, timestamp: u32, payload: Bytes, now: Instant) -> Vec<Delivered> {
        let mut state = self.state.lock().expect("session mutex poisoned");
        let expected = *state.expected.get_or_insert(seq);

        let distance = forward_distance(expected, seq);
        if distance == 0 {
            state.expected = Some(wrapping_next(expected));
            let mut delivered = vec![Delivered {
                seq,
                timestamp,
                payload,
            }];
            delivered.extend(Self::drain_contiguous(&mut state));
            if state.buffer.is_empty() {
                state.stall_since = None;
            }
            return delivered;
        }

        // A huge forward distance means `seq` is actually behind `expected`
        // (wrapped): already delivered, so this is a retransmitted duplicate.
        if (distance as usize) >= self.max_buffered {
            log::trace!("dropping stale/duplicate seq {seq}, expected {expected}");
            return Vec::new();
        }

        if state.buffer.len() >= self.max_buffered {
            log::warn!(
                "reorder buffer full ({} entries), dropping seq {seq}",
                self.max_buffered
            );
            return Vec::new();
        }

        if state.stall_since.is_none() {
            state.stall_since = Some(now);
        }
        state.buffer.entry(seq).or_insert(BufferedFrame {
            timestamp,
            payload,
            arrival: now,
        });
        Vec::new()
    }

    /// Called periodically; if the oldest gap has aged past `skip_threshold`,
    /// jumps `expected` forward to the earliest buffered sequence number and
    /// delivers everything contiguous from there.
    pub fn pump_timeouts(&self, now: Instant) -> Vec<Delivered> {
        let mut state = self.state.lock().expect("session mutex poisoned");

        let stalled_at = match state.stall_since {
            Some(t) => t,
            None => return Vec::new(),
        };
        if now.duration_since(stalled_at) < self.skip_threshold {
            return Vec::new();
        }

        let expected = state
            .expected
            .expect("stall_since is only set after the session has seen a first frame");
        let skip_to = match earliest_by_forward_distance(expected, state.buffer.keys().copied()) {
            Some(s) => s,
            None => {
                state.stall_since = None;
                return Vec::new();
            }
        };

        log::warn!(
            "skipping {} -> {} after stalling {:?}",
            expected,
            skip_to,
            now.duration_since(stalled_at)
        );
        state.expected = Some(skip_to);
        let delivered = Self::drain_contiguous(&mut state);
        state.stall_since = if state.buffer.is_empty() {
            None
        } else {
            Some(now)
        };
        delivered
    }

    fn drain_contiguous(state: &mut SessionState) -> Vec<Delivered> {
        let mut drained = Vec::new();
        loop {
            let expected = state
                .expected
                .expect("drain_contiguous is only called after expected is initialized");
            let Some(frame) = state.buffer.remove(&expected) else {
                break;
            };
            drained.push(Delivered {
                seq: expected,
                timestamp: frame.timestamp,
                payload: frame.payload,
            });
            state.expected = Some(wrapping_next(expected));
        }
        drained
    }

    #[cfg(test)]
    fn buffered_len(&self) -> usize {
        self.state.lock().expect("session mutex poisoned").buffer.len()
    }
}

/// One [`Session`] per peer address, created lazily on first reliable frame.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<SocketAddr, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(
        &self,
        peer: SocketAddr,
        max_buffered: usize,
        skip_threshold: Duration,
        seq: u16,
        timestamp: u32,
        payload: Bytes,
        now: Instant,
    ) -> Vec<Delivered> {
        self.sessions
            .entry(peer)
            .or_insert_with(|| Session::new(max_buffered, skip_threshold))
            .admit(seq, timestamp, payload, now)
    }

    /// Runs the skip-on-timeout pump across every known session, returning
    /// `(peer, delivered)` pairs for sessions that had something to release.
    pub fn pump_all(&self, now: Instant) -> Vec<(SocketAddr, Vec<Delivered>)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                let delivered = entry.value().pump_timeouts(now);
                if delivered.is_empty() {
                    None
                } else {
                    Some((*entry.key(), delivered))
                }
            })
            .collect()
    }

    pub fn remove(&self, peer: &SocketAddr) {
        self.sessions.remove(peer);
    }

    /// Drops every peer's session, used when an endpoint with no configured
    /// peer (receiver side) shuts down.
    pub fn clear(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: u8) -> Bytes {
        Bytes::copy_from_slice(&[tag])
    }

    #[test]
    fn in_order_frames_deliver_immediately() {
        let session = Session::new(16, Duration::from_millis(200));
        let now = Instant::now();

        let d0 = session.admit(0, 0, payload(0), now);
        assert_eq!(d0.len(), 1);
        assert_eq!(d0[0].seq, 0);

        let d1 = session.admit(1, 0, payload(1), now);
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].seq, 1);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn out_of_order_arrival_buffers_then_flushes_on_gap_fill() {
        let session = Session::new(16, Duration::from_millis(200));
        let now = Instant::now();

        // First frame establishes the baseline (seq 0) and delivers trivially.
        assert_eq!(session.admit(0, 0, payload(0), now).len(), 1);

        // seq 2 arrives before seq 1: buffered, nothing deliverable yet.
        let d2 = session.admit(2, 0, payload(2), now);
        assert!(d2.is_empty());
        assert_eq!(session.buffered_len(), 1);

        // seq 1 fills the gap: both 1 and 2 deliver in order.
        let d1 = session.admit(1, 0, payload(1), now);
        assert_eq!(d1.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn skip_on_timeout_advances_past_a_permanently_missing_frame() {
        let session = Session::new(16, Duration::from_millis(50));
        let t0 = Instant::now();

        // First frame establishes the baseline (seq 0) and delivers trivially.
        assert_eq!(session.admit(0, 0, payload(0), t0).len(), 1);

        // seq 2 arrives; seq 1 never will.
        assert!(session.admit(2, 0, payload(2), t0).is_empty());

        // Not yet stalled long enough: no skip.
        assert!(session.pump_timeouts(t0 + Duration::from_millis(10)).is_empty());

        // Past skip_threshold: jump straight to seq 2.
        let skipped = session.pump_timeouts(t0 + Duration::from_millis(60));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].seq, 2);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn stale_duplicate_outside_window_is_dropped_not_buffered() {
        let session = Session::new(4, Duration::from_millis(200));
        let now = Instant::now();

        session.admit(0, 0, payload(0), now);
        // expected is now 1; a far-future-looking seq that's actually a
        // wrapped-around duplicate (distance >= max_buffered) must be dropped.
        let huge_distance_seq = 1u16.wrapping_sub(10);
        let delivered = session.admit(huge_distance_seq, 0, payload(9), now);
        assert!(delivered.is_empty());
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn sequence_wraps_past_0xffff_without_losing_order() {
        let session = Session::new(16, Duration::from_millis(200));
        let now = Instant::now();

        assert_eq!(session.admit(0xFFFE, 0, payload(0xFE), now).len(), 1);
        assert_eq!(session.admit(0xFFFF, 0, payload(0xFF), now).len(), 1);
        assert_eq!(session.admit(0x0000, 0, payload(0x00), now).len(), 1);
        let d = session.admit(0x0001, 0, payload(0x01), now);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].seq, 0x0001);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn admission_window_caps_buffered_entries_below_max_buffered() {
        // max_buffered = 4 admits distances 1..=3 (3 distinct out-of-order
        // slots); the buffer can never actually reach max_buffered entries
        // through legitimate admission, since anything at distance >=
        // max_buffered is rejected by the window check before it would ever
        // compete for a buffer slot.
        let session = Session::new(4, Duration::from_millis(200));
        let now = Instant::now();

        assert_eq!(session.admit(0, 0, payload(0), now).len(), 1);
        assert!(session.admit(1 + 1, 0, payload(1), now).is_empty());
        assert!(session.admit(1 + 2, 0, payload(2), now).is_empty());
        assert_eq!(session.buffered_len(), 2);
        // distance 3 == max_buffered - 1, still admissible.
        assert!(session.admit(1 + 3, 0, payload(3), now).is_empty());
        assert_eq!(session.buffered_len(), 3);
    }

    #[test]
    fn distance_equal_to_max_buffered_is_rejected() {
        // max_buffered = 4: a seq exactly 4 ahead of expected must be
        // treated as outside the admission window, not let through.
        let session = Session::new(4, Duration::from_millis(200));
        let now = Instant::now();

        assert_eq!(session.admit(0, 0, payload(0), now).len(), 1);
        assert!(session.admit(4, 0, payload(4), now).is_empty());
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn session_table_clear_drops_every_peers_session() {
        let table = SessionTable::new();
        let now = Instant::now();
        let peer_a: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let peer_b: SocketAddr = "127.0.0.1:9002".parse().unwrap();

        table.admit(peer_a, 16, Duration::from_millis(200), 2, 0, payload(2), now);
        table.admit(peer_b, 16, Duration::from_millis(200), 2, 0, payload(2), now);

        table.clear();

        // A fresh admit after clear re-establishes a new session baseline,
        // so seq 2 now delivers immediately instead of buffering behind seq 0.
        let delivered = table.admit(peer_a, 16, Duration::from_millis(200), 2, 0, payload(2), now);
        assert_eq!(delivered.len(), 1);
    }
}
