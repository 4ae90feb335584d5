//! Per-channel RTCP feedback scheduling: when to send the next compound
//! packet, and building it from the current gap list.
//!
//! `RTCP_MIN_TIME` (5 seconds, in `examples/original_source/rtp/rtcp.h`)
//! is the base interval; RFC 3550 §6.3.1 randomizes the actual interval
//! within `[0.5, 1.5]` of the base to avoid every receiver in a large
//! multicast group transmitting in lockstep, which this module does with
//! `rand` rather than reimplementing RFC 3550's full reconsideration
//! algorithm (no sender-count feedback loop here; see spec.md §4.2 for
//! why a fixed per-receiver schedule is sufficient for a unicast-repair
//! client).

use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;

use crate::gap_reporter::{self, GapReport};
use crate::pcm::Gap;
use crate::rtcp::member::MemberTable;
use crate::rtcp::{self, PayloadType, ReportBlock};
use crate::token_bucket::TokenBucket;

/// Base reporting interval, per `RTCP_MIN_TIME` (5_000_000us).
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);

/// A channel's RTCP feedback session: scheduling plus the last report
/// sent, for building the next one's report block deltas. Also tracks
/// the remote participant ([`MemberTable`]) seen on this transport.
pub struct Session {
    ssrc: u32,
    media_ssrc: u32,
    next_deadline: Instant,
    last_ext_highest_seq: Option<u32>,
    members: MemberTable,
}

impl Session {
    pub fn new(ssrc: u32, media_ssrc: u32, now: Instant) -> Self {
        let mut session = Session {
            ssrc,
            media_ssrc,
            next_deadline: now,
            last_ext_highest_seq: None,
            members: MemberTable::new(),
        };
        session.reschedule(now);
        session
    }

    /// Feeds one decoded message from an incoming compound packet into the
    /// member state machine; call once per [`rtcp::RawMessage`] (not once
    /// per packet), since BYE and a reporting PT can share a compound
    /// packet.
    pub fn note_incoming(&mut self, ssrc: u32, pt: PayloadType, now: Instant) {
        self.members.note_activity(ssrc, pt, now);
    }

    pub fn members(&self) -> &MemberTable {
        &self.members
    }

    fn reschedule(&mut self, now: Instant) {
        let jitter = rand::rng().random_range(0.5..1.5);
        let interval = MIN_INTERVAL.mul_f64(jitter);
        self.next_deadline = now + interval;
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    /// Builds and returns the next compound packet if due, advancing the
    /// schedule regardless of whether there was anything to report (an
    /// empty RR still needs to go out so the server's view of this
    /// receiver stays live).
    pub fn build_due_report(
        &mut self,
        now: Instant,
        ext_highest_seq: u32,
        gaps: &[Gap],
        max_fci: usize,
        policer: Option<&mut TokenBucket>,
        session_rtp_seq_offset: i32,
        recv_bw: u32,
    ) -> Option<(Bytes, GapReport)> {
        if !self.is_due(now) {
            return None;
        }
        self.reschedule(now);
        self.members.prune_timeouts(now);

        let report = gap_reporter::build_generic_nack(
            gaps,
            max_fci,
            policer,
            now,
            session_rtp_seq_offset,
        );

        let block = ReportBlock {
            ssrc: self.media_ssrc,
            fraction_lost: 0,
            cumulative_lost: 0,
            ext_highest_seq,
            jitter: 0,
            lsr: 0,
            dlsr: 0,
        };
        self.last_ext_highest_seq = Some(ext_highest_seq);

        let packet = rtcp::encode_compound_report(
            self.ssrc,
            &[block],
            self.media_ssrc,
            &report.fcis,
            recv_bw,
        )
        .expect("a non-empty report block always yields Some");
        Some((packet, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::ExtSeqNum;

    #[test]
    fn not_due_before_interval_elapses() {
        let now = Instant::now();
        let session = Session::new(1, 2, now);
        assert!(!session.is_due(now + Duration::from_secs(1)));
    }

    #[test]
    fn due_report_includes_gap_fcis_and_reschedules() {
        let now = Instant::now();
        let mut session = Session::new(1, 2, now);
        let due = session.next_deadline();
        let gaps = vec![Gap {
            start_seq: ExtSeqNum(10),
            extent: 0,
        }];
        let (packet, report) =
            session.build_due_report(due, 20, &gaps, 30, None, 0, 1_000_000).unwrap();
        assert_eq!(report.repairs_requested, 1);
        assert!(!packet.is_empty());
        assert!(session.next_deadline() > due);
    }

    #[test]
    fn incoming_activity_establishes_a_member() {
        let now = Instant::now();
        let mut session = Session::new(1, 2, now);
        session.note_incoming(99, PayloadType::ReceiverReport, now);
        session.note_incoming(99, PayloadType::ReceiverReport, now);
        assert_eq!(
            session.members().established_ssrcs().collect::<Vec<_>>(),
            vec![99]
        );
    }

    #[test]
    fn empty_gap_list_still_sends_rr_only() {
        let now = Instant::now();
        let mut session = Session::new(1, 2, now);
        let due = session.next_deadline();
        let (packet, report) = session.build_due_report(due, 5, &[], 30, None, 0, 1).unwrap();
        assert_eq!(report.repairs_requested, 0);
        assert!(!packet.is_empty());
    }

    #[test]
    fn due_report_carries_erri_app_block_with_recv_bw() {
        let now = Instant::now();
        let mut session = Session::new(1, 2, now);
        let due = session.next_deadline();
        let (packet, _) = session.build_due_report(due, 5, &[], 30, None, 0, 2_000_000).unwrap();
        let app = rtcp::iter(&packet)
            .map(|m| m.unwrap())
            .find(|m| m.pt == PayloadType::App)
            .expect("compound report should carry an app block");
        assert_eq!(rtcp::decode_erri_app(&app).unwrap(), 2_000_000);
    }
}
