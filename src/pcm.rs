//! Packet Cache Manager: per-source ordered cache of received packets,
//! indexed by extended sequence number, with gap tracking.
//!
//! Grounded on spec.md §4.1 and, for the "gap wait deadline" aging
//! semantics, on the dataplane's gap-collection path referenced from
//! `examples/original_source/eva/vqec_gap_reporter.c`
//! (`vqec_dp_chan_get_gap_report`), which this crate folds into
//! [`Pcm::next_ready`]/[`Pcm::enumerate_gaps`] directly rather than
//! keeping a separate dataplane-to-controlplane RPC.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::Packet;
use crate::seq::ExtSeqNum;

/// One contiguous run of missing sequence numbers.
///
/// Canonical form per spec.md §3 "Gap list": ordered, pairwise disjoint,
/// strictly increasing starts. `extent` is the number of missing seqs
/// *after* `start_seq` (so the run covers `[start_seq, start_seq+extent]`
/// inclusive), matching the `{start_seq, extent}` C gap buffer layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub start_seq: ExtSeqNum,
    pub extent: u32,
}

impl Gap {
    pub fn len(&self) -> u32 {
        self.extent + 1
    }

    pub fn end(&self) -> ExtSeqNum {
        self.start_seq.add(self.extent)
    }

    fn contains(&self, seq: ExtSeqNum) -> bool {
        seq.ge(self.start_seq) && seq.le(self.end())
    }
}

#[derive(Clone, Copy, Debug)]
struct TrackedGap {
    gap: Gap,
    detected_at: Instant,
}

/// Outcome of [`Pcm::insert`], for callers that want to update
/// per-channel statistics (spec.md's duplicate/eviction counters).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Accepted into the cache.
    Inserted,
    /// Already below `head`: too late to matter.
    TooLate,
    /// Already present in the cache: first arrival wins.
    Duplicate,
}

/// Running counters a caller may want to fold into channel stats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PcmStats {
    pub duplicates: u64,
    pub too_late: u64,
    /// Entries evicted (present or not) because the cache grew past
    /// capacity; these are unrecoverable (spec.md §4.1).
    pub evicted_lost: u64,
    /// Entries that aged out of [`Pcm::next_ready`]'s gap-wait deadline
    /// without ever being filled.
    pub aged_out_lost: u64,
}

/// Per-primary-source ordered packet cache.
pub struct Pcm {
    capacity: u32,
    store: BTreeMap<ExtSeqNum, Packet>,
    /// Oldest live position. Meaningless until `initialized`.
    head: ExtSeqNum,
    /// Newest live position (inclusive). `tail >= head` once initialized.
    tail: ExtSeqNum,
    initialized: bool,
    gaps: Vec<TrackedGap>,
    gap_wait_deadline: Duration,
    /// Offset applied when converting an ext-seq's RTP seq into the wire
    /// `pid` sent to the (possibly just-changed) repair source, so that
    /// source sees its own sequence space (spec.md §4.1 `resequence`).
    session_rtp_seq_offset: i32,
    stats: PcmStats,
}

impl Pcm {
    pub fn new(capacity: u32, gap_wait_deadline: Duration) -> Self {
        Pcm {
            capacity: capacity.max(1),
            store: BTreeMap::new(),
            head: ExtSeqNum::ZERO,
            tail: ExtSeqNum::ZERO,
            initialized: false,
            gaps: Vec::new(),
            gap_wait_deadline,
            session_rtp_seq_offset: 0,
            stats: PcmStats::default(),
        }
    }

    pub fn stats(&self) -> PcmStats {
        self.stats
    }

    pub fn head(&self) -> Option<ExtSeqNum> {
        self.initialized.then_some(self.head)
    }

    pub fn tail(&self) -> Option<ExtSeqNum> {
        self.initialized.then_some(self.tail)
    }

    pub fn session_rtp_seq_offset(&self) -> i32 {
        self.session_rtp_seq_offset
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Inserts a received packet, maintaining head/tail/gap invariants.
    pub fn insert(&mut self, pkt: Packet, now: Instant) -> InsertOutcome {
        let seq = pkt.ext_seq();

        if !self.initialized {
            self.initialized = true;
            self.head = seq;
            self.tail = seq;
            self.store.insert(seq, pkt);
            return InsertOutcome::Inserted;
        }

        if seq.lt(self.head) {
            self.stats.too_late += 1;
            return InsertOutcome::TooLate;
        }

        if self.store.contains_key(&seq) {
            self.stats.duplicates += 1;
            return InsertOutcome::Duplicate;
        }

        if seq.gt(self.tail) {
            let gap_start = self.tail.next();
            if gap_start.lt(seq) {
                // missing positions are [gap_start, seq - 1] inclusive.
                let extent = (seq.sub(gap_start) - 1) as u32;
                log::debug!("gap detected: start={gap_start:?} extent={extent}");
                self.gaps.push(TrackedGap {
                    gap: Gap {
                        start_seq: gap_start,
                        extent,
                    },
                    detected_at: now,
                });
            }
            self.tail = seq;
        } else {
            // seq is within [head, tail]; it must fall inside (or exactly
            // close) some tracked gap. Split/shrink/remove that gap.
            self.fill_within_gaps(seq);
        }

        self.store.insert(seq, pkt);
        self.enforce_capacity(now);
        InsertOutcome::Inserted
    }

    fn fill_within_gaps(&mut self, seq: ExtSeqNum) {
        let mut new_gaps = Vec::with_capacity(self.gaps.len());
        for tg in self.gaps.drain(..) {
            if !tg.gap.contains(seq) {
                new_gaps.push(tg);
                continue;
            }
            // Split [start, end] around `seq`.
            if seq.gt(tg.gap.start_seq) {
                let left_extent = seq.sub(tg.gap.start_seq) as u32 - 1;
                new_gaps.push(TrackedGap {
                    gap: Gap {
                        start_seq: tg.gap.start_seq,
                        extent: left_extent,
                    },
                    detected_at: tg.detected_at,
                });
            }
            if seq.lt(tg.gap.end()) {
                let right_start = seq.next();
                let right_extent = tg.gap.end().sub(right_start) as u32;
                new_gaps.push(TrackedGap {
                    gap: Gap {
                        start_seq: right_start,
                        extent: right_extent,
                    },
                    detected_at: tg.detected_at,
                });
            }
        }
        new_gaps.sort_by_key(|g| g.gap.start_seq);
        self.gaps = new_gaps;
    }

    fn enforce_capacity(&mut self, now: Instant) {
        while self.tail.sub(self.head) as i64 + 1 > self.capacity as i64 {
            self.evict_head(now);
        }
    }

    fn evict_head(&mut self, now: Instant) {
        let evicted = self.head;
        self.store.remove(&evicted);
        self.remove_gap_head(evicted);
        self.stats.evicted_lost += 1;
        log::warn!("pcm at capacity {}, evicting {evicted:?}", self.capacity);
        self.head = evicted.next();
        let _ = now;
    }

    /// Removes `seq` from the front of whatever gap tracks it (used when
    /// `head` is force-advanced past a still-missing position).
    fn remove_gap_head(&mut self, seq: ExtSeqNum) {
        if let Some(idx) = self.gaps.iter().position(|g| g.gap.contains(seq)) {
            let tg = self.gaps[idx];
            if seq.eq(tg.gap.end()) {
                self.gaps.remove(idx);
            } else {
                self.gaps[idx] = TrackedGap {
                    gap: Gap {
                        start_seq: seq.next(),
                        extent: tg.gap.end().sub(seq.next()) as u32,
                    },
                    detected_at: tg.detected_at,
                };
            }
        }
    }

    /// Returns the next in-order packet if `head` is present, or skips
    /// forward over aged-out (permanently lost) positions, in which case
    /// it may still return `None` if it lands on a gap that hasn't aged
    /// out yet. This is what gives consumers strictly increasing
    /// ext-seq delivery (spec.md §5) while bounding how long a single
    /// missing packet can stall the stream.
    pub fn next_ready(&mut self, now: Instant) -> Option<Packet> {
        loop {
            if !self.initialized || self.head.gt(self.tail) {
                return None;
            }
            if let Some(pkt) = self.store.remove(&self.head) {
                self.head = self.head.next();
                return Some(pkt);
            }
            // head is a gap position.
            let idx = self.gaps.iter().position(|g| g.gap.contains(self.head))?;
            let age = now.saturating_duration_since(self.gaps[idx].detected_at);
            if age < self.gap_wait_deadline {
                return None;
            }
            self.stats.aged_out_lost += 1;
            log::debug!("gap at {:?} aged out after {:?}, giving up on it", self.head, age);
            self.remove_gap_head(self.head);
            self.head = self.head.next();
        }
    }

    /// Ordered gap list, truncated so the total number of *individual*
    /// missing sequence numbers doesn't exceed `limit`.
    pub fn enumerate_gaps(&self, limit: usize) -> Vec<Gap> {
        let mut out = Vec::new();
        let mut remaining = limit;
        for tg in &self.gaps {
            if remaining == 0 {
                break;
            }
            let len = tg.gap.len() as usize;
            if len <= remaining {
                out.push(tg.gap);
                remaining -= len;
            } else {
                out.push(Gap {
                    start_seq: tg.gap.start_seq,
                    extent: (remaining - 1) as u32,
                });
                remaining = 0;
            }
        }
        out
    }

    pub fn total_missing(&self) -> u64 {
        self.gaps.iter().map(|g| g.gap.len() as u64).sum()
    }

    /// Rebases the sequence space after the primary source changes (new
    /// SSRC / transport), per spec.md §4.1 `resequence`. Clears all cache
    /// state (the old source's ext-seq window is no longer meaningful)
    /// and records the offset future outgoing NACK `pid`s must subtract
    /// so the new source sees requests in its own space.
    pub fn resequence(&mut self, new_source_base_rtp_seq: u16) {
        let old_offset = self.session_rtp_seq_offset;
        let local_base = self.tail.rtp_seq() as i32;
        self.session_rtp_seq_offset = old_offset + (local_base - new_source_base_rtp_seq as i32);
        self.store.clear();
        self.gaps.clear();
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketFlags, PacketType};
    use bytes::Bytes;

    fn pkt(seq: u32) -> Packet {
        Packet::new(
            ExtSeqNum(seq),
            0,
            Instant::now(),
            PacketType::Primary,
            PacketFlags::empty(),
            Bytes::new(),
        )
    }

    #[test]
    fn simple_gap_100_101_103_104() {
        let now = Instant::now();
        let mut pcm = Pcm::new(1024, Duration::from_millis(20));
        for s in [100, 101, 103, 104] {
            pcm.insert(pkt(s), now);
        }
        let gaps = pcm.enumerate_gaps(100);
        assert_eq!(gaps, vec![Gap { start_seq: ExtSeqNum(102), extent: 0 }]);
    }

    #[test]
    fn compacted_gap_100_115() {
        let now = Instant::now();
        let mut pcm = Pcm::new(1024, Duration::from_millis(20));
        pcm.insert(pkt(100), now);
        pcm.insert(pkt(115), now);
        let gaps = pcm.enumerate_gaps(100);
        assert_eq!(gaps, vec![Gap { start_seq: ExtSeqNum(101), extent: 13 }]);
        assert_eq!(pcm.total_missing(), 14);
    }

    #[test]
    fn duplicate_first_wins() {
        let now = Instant::now();
        let mut pcm = Pcm::new(16, Duration::from_millis(20));
        assert_eq!(pcm.insert(pkt(1), now), InsertOutcome::Inserted);
        assert_eq!(pcm.insert(pkt(1), now), InsertOutcome::Duplicate);
        assert_eq!(pcm.stats().duplicates, 1);
    }

    #[test]
    fn too_late_below_head() {
        let now = Instant::now();
        let mut pcm = Pcm::new(16, Duration::from_millis(20));
        pcm.insert(pkt(10), now);
        pcm.next_ready(now); // advances head past 10
        assert_eq!(pcm.insert(pkt(10), now), InsertOutcome::TooLate);
    }

    #[test]
    fn out_of_order_repair_collapses_gap_partially() {
        let now = Instant::now();
        let mut pcm = Pcm::new(1024, Duration::from_millis(20));
        pcm.insert(pkt(100), now);
        pcm.insert(pkt(110), now);
        // gap is 101..=109. Fill 105 out of order.
        pcm.insert(pkt(105), now);
        let gaps = pcm.enumerate_gaps(100);
        assert_eq!(
            gaps,
            vec![
                Gap { start_seq: ExtSeqNum(101), extent: 3 },
                Gap { start_seq: ExtSeqNum(106), extent: 3 },
            ]
        );
    }

    #[test]
    fn capacity_eviction_advances_head_by_exactly_one() {
        let now = Instant::now();
        let mut pcm = Pcm::new(4, Duration::from_millis(20));
        for s in 0..4 {
            pcm.insert(pkt(s), now);
        }
        assert_eq!(pcm.head(), Some(ExtSeqNum(0)));
        pcm.insert(pkt(4), now);
        assert_eq!(pcm.head(), Some(ExtSeqNum(1)));
        assert_eq!(pcm.stats().evicted_lost, 1);
        // every other entry remains.
        assert_eq!(pcm.len(), 4);
    }

    #[test]
    fn next_ready_blocks_on_unaged_gap() {
        let now = Instant::now();
        let mut pcm = Pcm::new(16, Duration::from_millis(20));
        pcm.insert(pkt(0), now);
        pcm.insert(pkt(2), now);
        assert_eq!(pcm.next_ready(now).unwrap().ext_seq(), ExtSeqNum(0));
        // head is now 1, missing, gap just detected: not aged yet.
        assert!(pcm.next_ready(now).is_none());
    }

    #[test]
    fn next_ready_skips_aged_out_gap() {
        let now = Instant::now();
        let deadline = Duration::from_millis(20);
        let mut pcm = Pcm::new(16, deadline);
        pcm.insert(pkt(0), now);
        pcm.insert(pkt(2), now);
        pcm.next_ready(now).unwrap();
        let later = now + deadline + Duration::from_millis(1);
        let next = pcm.next_ready(later).unwrap();
        assert_eq!(next.ext_seq(), ExtSeqNum(2));
        assert_eq!(pcm.stats().aged_out_lost, 1);
    }

    #[test]
    fn strictly_increasing_delivery_order() {
        let now = Instant::now();
        let mut pcm = Pcm::new(64, Duration::from_millis(5));
        for s in [3, 1, 2, 0, 5, 4] {
            pcm.insert(pkt(s), now);
        }
        let mut last: Option<ExtSeqNum> = None;
        let mut delivered = 0;
        let deadline = now + Duration::from_millis(50);
        let mut t = now;
        while delivered < 6 && t <= deadline {
            if let Some(p) = pcm.next_ready(t) {
                if let Some(l) = last {
                    assert!(p.ext_seq().gt(l));
                }
                last = Some(p.ext_seq());
                delivered += 1;
            }
            t += Duration::from_millis(1);
        }
        assert_eq!(delivered, 6);
    }
}
