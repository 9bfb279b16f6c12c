//! Non-decreasing counters exposed via [`Endpoint::metrics`](crate::Endpoint::metrics).

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($field:ident),* $(,)?) => {
        #[derive(Debug, Default)]
        pub struct Metrics {
            $(pub $field: AtomicU64),*
        }

        /// Immutable copy of the counters at a point in time.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct MetricsSnapshot {
            $(pub $field: u64),*
        }

        impl Metrics {
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed)),*
                }
            }
        }
    };
}

counters! {
    sent_reliable,
    sent_unreliable,
    recv_reliable,
    recv_unreliable,
    reliable_acks_recv,
    retransmissions,
    lost_marked,
    sent_reg,
    recv_reg,
    reg_acks_recv,
    registrations,
    invalid_packets,
}

/// Increments a named counter field on a `Metrics` instance by one.
macro_rules! bump {
    ($metrics:expr, $field:ident) => {
        $metrics.$field.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    };
}
pub(crate) use bump;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = Metrics::default();
        bump!(metrics, sent_reliable);
        bump!(metrics, sent_reliable);
        bump!(metrics, lost_marked);

        let snap = metrics.snapshot();
        assert_eq!(snap.sent_reliable, 2);
        assert_eq!(snap.lost_marked, 1);
        assert_eq!(snap.recv_reliable, 0);
    }
}
