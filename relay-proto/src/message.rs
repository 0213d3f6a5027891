//! Message identifiers and sequence numbers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Generates strictly increasing 64-bit message ids.
///
/// The upper 32 bits carry Unix seconds (corrected by the server clock skew
/// learned during the handshake); the lower bits carry the sub-second
/// nanoseconds shifted left twice, so client ids always end in `0b00`.
/// If the clock stalls, the generator bumps past the previous id by 4 to
/// keep the low bits intact.
#[derive(Debug, Default)]
pub struct MsgIdGen {
    last: i64,
    time_offset: i32,
}

impl MsgIdGen {
    /// A generator with no clock correction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the server clock skew (seconds) from the handshake.
    pub fn set_time_offset(&mut self, offset: i32) {
        self.time_offset = offset;
    }

    /// The currently applied clock skew.
    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    /// The most recently issued id, or 0 if none yet.
    pub fn last(&self) -> i64 {
        self.last
    }

    /// Never issue an id at or below `id` again. Used when ids from another
    /// generator (the handshake's) have already gone out on this session.
    pub fn bump_past(&mut self, id: i64) {
        if id > self.last {
            self.last = id;
        }
    }

    /// Allocate the next message id.
    pub fn next(&mut self) -> i64 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = now.as_secs() as i64 + self.time_offset as i64;
        let mut id = (secs << 32) | ((now.subsec_nanos() as i64) << 2);
        if id <= self.last {
            id = self.last + 4;
        }
        self.last = id;
        id
    }
}

/// Per-session sequence counter.
///
/// Content-bearing messages get `2n + 1` and advance the counter; service
/// messages (acks, pongs) reuse `2n` without advancing it.
#[derive(Debug, Default)]
pub struct SeqGen {
    counter: i32,
}

impl SeqGen {
    /// A counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number.
    pub fn next(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq = self.counter * 2 + 1;
            self.counter += 1;
            seq
        } else {
            self.counter * 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing_with_zero_low_bits() {
        let mut gen = MsgIdGen::new();
        let mut prev = 0i64;
        for _ in 0..1000 {
            let id = gen.next();
            assert!(id > prev);
            assert_eq!(id & 0b11, 0);
            prev = id;
        }
    }

    #[test]
    fn clock_stall_bumps_by_four() {
        let mut gen = MsgIdGen::new();
        let first = gen.next();
        // Force the generator far into the future, then ask again: the next
        // id must clear the previous one by exactly 4.
        gen.last = first + (3600 << 32);
        let pinned = gen.last;
        let next = gen.next();
        assert_eq!(next, pinned + 4);
        assert_eq!(next & 0b11, 0);
    }

    #[test]
    fn seq_parity() {
        let mut seq = SeqGen::new();
        assert_eq!(seq.next(false), 0);
        assert_eq!(seq.next(true), 1);
        assert_eq!(seq.next(true), 3);
        assert_eq!(seq.next(false), 4);
        assert_eq!(seq.next(true), 5);
    }
}
