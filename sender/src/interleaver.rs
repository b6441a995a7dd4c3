//! Packet interleaver: spreads adjacent packets apart in emission
//! order so a burst loss on the wire lands on non-adjacent positions,
//! which erasure codes handle far better.
//!
//! Packets are collected up to a fixed depth and released following a
//! stride permutation. The permutation is deterministic; both ends
//! need no agreement since the receiver reorders by sequence number
//! anyway.

use rtp_pcm_common::Packet;

/// Stride used to permute emission order within a window.
const STRIDE: usize = 7;

/// Deterministic stride-permutation interleaver.
pub struct Interleaver {
    // ---
    depth: usize,
    pending: Vec<Option<Packet>>,
    fill: usize,
}

impl Interleaver {
    // ---
    /// Creates an interleaver over windows of `depth` packets
    /// (typically one FEC block: K + R).
    pub fn new(depth: usize) -> Self {
        // ---
        Self {
            depth: depth.max(1),
            pending: Vec::new(),
            fill: 0,
        }
    }

    /// Feeds one packet; returns a full permuted window when ready.
    pub fn write(&mut self, packet: Packet) -> Vec<Packet> {
        // ---
        if self.pending.len() != self.depth {
            self.pending.resize_with(self.depth, || None);
        }

        self.pending[self.fill] = Some(packet);
        self.fill += 1;

        if self.fill < self.depth {
            return Vec::new();
        }

        self.release()
    }

    /// Emits whatever is buffered, permuted over the partial window.
    pub fn flush(&mut self) -> Vec<Packet> {
        // ---
        self.release()
    }

    fn release(&mut self) -> Vec<Packet> {
        // ---
        let n = self.fill;
        self.fill = 0;
        if n == 0 {
            return Vec::new();
        }

        // Stride must be coprime with the window for a full cycle;
        // fall back to sequential when it is not.
        let stride = if gcd(STRIDE, n) == 1 { STRIDE } else { 1 };

        let mut out = Vec::with_capacity(n);
        let mut at = 0;
        for _ in 0..n {
            if let Some(p) = self.pending[at].take() {
                out.push(p);
            }
            at = (at + stride) % n;
        }
        out
    }
}

fn gcd(a: usize, b: usize) -> usize {
    // ---
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
