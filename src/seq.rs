//! Extended sequence numbers: a 32-bit logical extension of the 16-bit RTP
//! sequence number across wraparounds.
//!
//! Grounded on `examples/original_source/rtp/rtp.h`'s `RTP_SEQ_MOD`
//! (`1 << 16`), `RTP_MAX_DROPOUT` (3000) and `RTP_MAX_MISORDER` (100)
//! constants, which the source uses to decide whether a new 16-bit seq
//! observed out of the expected range represents a cycle rollover, a huge
//! loss, or a misordered duplicate of an old packet.

/// Number of cycles is folded into the upper 16 bits; `RTP_SEQ_MOD` below.
const RTP_SEQ_MOD: u32 = 1 << 16;

/// Per RFC 3550 §A.1 / the original `rtp.h`: a gap larger than this many
/// sequence numbers is treated as a new cycle rather than ordinary loss.
pub const MAX_DROPOUT: u32 = 3000;

/// A gap smaller than this behind the expected sequence is treated as
/// reordering rather than a restart.
pub const MAX_MISORDER: u32 = 100;

/// A 32-bit extension of a 16-bit RTP sequence number.
///
/// Comparison (`lt`/`le`/`eq`/`gt`/`ge`) is a plain integer comparison once
/// extended: the tracking in [`Extender`] is what makes that meaningful
/// under wraparound, by choosing the cycle count such that all in-window
/// packets compare correctly within a 2^31 dropout window (spec.md §3,
/// §8 "Extended-seq comparison is a total order...").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtSeqNum(pub u32);

impl ExtSeqNum {
    pub const ZERO: ExtSeqNum = ExtSeqNum(0);

    pub fn rtp_seq(self) -> u16 {
        self.0 as u16
    }

    pub fn next(self) -> ExtSeqNum {
        ExtSeqNum(self.0.wrapping_add(1))
    }

    pub fn add(self, n: u32) -> ExtSeqNum {
        ExtSeqNum(self.0.wrapping_add(n))
    }

    /// Difference `self - other`, defined only when the two are within a
    /// 2^31 window of each other (modular comparisons are meaningless
    /// otherwise). Saturates rather than panicking so callers doing
    /// defensive logging never crash; see spec.md §7 "Internal" policy.
    pub fn sub(self, other: ExtSeqNum) -> i64 {
        self.0.wrapping_sub(other.0) as i32 as i64
    }

    pub fn lt(self, other: ExtSeqNum) -> bool {
        self.sub(other) < 0
    }

    pub fn le(self, other: ExtSeqNum) -> bool {
        self.sub(other) <= 0
    }

    pub fn gt(self, other: ExtSeqNum) -> bool {
        self.sub(other) > 0
    }

    pub fn ge(self, other: ExtSeqNum) -> bool {
        self.sub(other) >= 0
    }
}

impl std::fmt::Display for ExtSeqNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks the per-source 16-bit "cycle" counter needed to extend a raw RTP
/// seq into an [`ExtSeqNum`]. One instance per primary source (owned
/// exclusively by that source's [`crate::pcm::Pcm`] — spec.md §3
/// "Sequence-space windows are owned exclusively by one PCM").
#[derive(Debug, Clone)]
pub struct Extender {
    cycles: u32,
    initialized: bool,
    last_ext: ExtSeqNum,
}

impl Default for Extender {
    fn default() -> Self {
        Self {
            cycles: 0,
            initialized: false,
            last_ext: ExtSeqNum::ZERO,
        }
    }
}

impl Extender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extends `rtp_seq`, updating cycle tracking as a side effect.
    ///
    /// First packet seeds the window directly. Subsequent packets: a big
    /// forward jump (`> MAX_DROPOUT`) with the low 16 bits appearing to
    /// have wrapped is treated as a genuine cycle rollover; everything
    /// else resolves to whichever of `(cycles, cycles-1, cycles+1)`
    /// produces a result closest to the last extended value, which is
    /// exactly what keeps `lt`/`gt` meaningful across the boundary.
    pub fn extend(&mut self, rtp_seq: u16) -> ExtSeqNum {
        if !self.initialized {
            self.initialized = true;
            self.last_ext = ExtSeqNum(rtp_seq as u32);
            return self.last_ext;
        }

        let last_seq16 = self.last_ext.rtp_seq();
        let udelta = rtp_seq.wrapping_sub(last_seq16) as u32;

        let candidate = if udelta < MAX_DROPOUT {
            // Ordinary forward progress, possibly wrapping the low 16 bits.
            if (last_seq16 as u32) + udelta >= RTP_SEQ_MOD {
                self.cycles = self.cycles.wrapping_add(1);
            }
            ExtSeqNum(self.cycles.wrapping_mul(RTP_SEQ_MOD) + rtp_seq as u32)
        } else if udelta <= RTP_SEQ_MOD - MAX_MISORDER {
            // Large "forward" delta that's actually a big jump backward
            // (reordered/duplicate from before a cycle rollover we've
            // already accounted for).
            let cycles = if rtp_seq as u32 > last_seq16 as u32 {
                self.cycles.wrapping_sub(1)
            } else {
                self.cycles
            };
            ExtSeqNum(cycles.wrapping_mul(RTP_SEQ_MOD) + rtp_seq as u32)
        } else {
            // Small backward delta: ordinary misordering within the
            // current cycle.
            ExtSeqNum(self.cycles.wrapping_mul(RTP_SEQ_MOD) + rtp_seq as u32)
        };

        if candidate.gt(self.last_ext) {
            self.last_ext = candidate;
        }
        candidate
    }
}
