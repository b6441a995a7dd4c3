//! Wrap-aware arithmetic for packet identifier spaces.
//!
//! Sequence numbers (16-bit), RTP timestamps (32-bit), and FEC block
//! numbers (16-bit) all wrap. Comparisons are done in signed modular
//! arithmetic: `a < b` iff `(a - b)` interpreted as signed two's
//! complement is negative.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Signed distance between two sequence numbers.
pub fn seqnum_diff(a: u16, b: u16) -> i16 {
    // ---
    a.wrapping_sub(b) as i16
}

/// Returns `true` if seqnum `a` comes before `b`.
pub fn seqnum_lt(a: u16, b: u16) -> bool {
    // ---
    seqnum_diff(a, b) < 0
}

/// Returns `true` if seqnum `a` comes before or equals `b`.
pub fn seqnum_le(a: u16, b: u16) -> bool {
    // ---
    seqnum_diff(a, b) <= 0
}

/// Signed distance between two RTP timestamps.
pub fn timestamp_diff(a: u32, b: u32) -> i32 {
    // ---
    a.wrapping_sub(b) as i32
}

/// Returns `true` if timestamp `a` comes before `b`.
pub fn timestamp_lt(a: u32, b: u32) -> bool {
    // ---
    timestamp_diff(a, b) < 0
}

/// Returns `true` if timestamp `a` comes before or equals `b`.
pub fn timestamp_le(a: u32, b: u32) -> bool {
    // ---
    timestamp_diff(a, b) <= 0
}

/// Signed distance between two FEC block numbers.
pub fn blknum_diff(a: u16, b: u16) -> i16 {
    // ---
    a.wrapping_sub(b) as i16
}

/// Returns `true` if block number `a` comes before `b`.
pub fn blknum_lt(a: u16, b: u16) -> bool {
    // ---
    blknum_diff(a, b) < 0
}

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Current time as a 64-bit NTP timestamp.
///
/// Upper 32 bits are seconds since 1900, lower 32 bits are the
/// fractional second.
pub fn ntp_now() -> u64 {
    // ---
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);

    duration_to_ntp(now) + (NTP_UNIX_OFFSET_SECS << 32)
}

/// Converts a duration into NTP fixed-point representation.
pub fn duration_to_ntp(d: Duration) -> u64 {
    // ---
    let secs = d.as_secs();
    let frac = ((d.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_seqnum_ordering_plain() {
        // ---
        assert!(seqnum_lt(1, 2));
        assert!(!seqnum_lt(2, 1));
        assert!(seqnum_le(2, 2));
    }

    #[test]
    fn test_seqnum_ordering_across_wrap() {
        // ---
        // 65530 comes before 5 in wrapped sequence space.
        assert!(seqnum_lt(65530, 5));
        assert!(!seqnum_lt(5, 65530));
        assert_eq!(seqnum_diff(5, 65530), 11);
    }

    #[test]
    fn test_timestamp_ordering_across_wrap() {
        // ---
        let a = u32::MAX - 100;
        let b = 200u32;
        assert!(timestamp_lt(a, b));
        assert_eq!(timestamp_diff(b, a), 301);
    }

    #[test]
    fn test_blknum_ordering_across_wrap() {
        // ---
        assert!(blknum_lt(65535, 0));
        assert!(blknum_lt(65535, 1));
        assert!(!blknum_lt(1, 65535));
    }

    #[test]
    fn test_ntp_fraction() {
        // ---
        let half = duration_to_ntp(Duration::from_millis(500));
        // Half a second is half of the 32-bit fraction range.
        let frac = half & 0xFFFF_FFFF;
        let expect = 1u64 << 31;
        assert!((frac as i64 - expect as i64).unsigned_abs() < 1 << 12);
    }

    #[test]
    fn test_ntp_now_is_past_1970() {
        // ---
        let ntp = ntp_now();
        assert!((ntp >> 32) > NTP_UNIX_OFFSET_SECS);
    }
}
