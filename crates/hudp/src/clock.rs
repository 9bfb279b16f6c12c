//! Wall-clock timestamp helper for the wire protocol.
//!
//! Wire timestamps are sender wall-clock milliseconds truncated to the low 32
//! bits. They are opaque to the receiver: an ACK simply echoes back whatever
//! timestamp the original data frame carried. Internal bookkeeping
//! (retransmit ages, skip deadlines, RTT) uses `std::time::Instant` instead,
//! never this truncated value.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the Unix epoch,
/// truncated to the low 32 bits.
pub fn now_ms_truncated() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    millis as u32
}
