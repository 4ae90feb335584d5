//! RTCP member state machine: `Unknown -> Probationary -> Established ->
//! (Leaving | Timedout)`, per spec.md §4.4. Only `Established` members
//! contribute to report generation.
//!
//! Grounded on `examples/original_source/rtp/rtcp.h`'s PT table (SR/RR at
//! 200/201, BYE at 203, plus the `EXP_RTCP_REPORT` band 192-199 that this
//! crate folds into [`super::PayloadType::Unknown`]): any recognized
//! payload type from a new SSRC is activity that starts probation; a BYE
//! moves a member straight to `Leaving`; silence for [`MEMBER_TIMEOUT`]
//! moves it to `Timedout`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::PayloadType;

/// Number of distinct RTCP intervals a member must be heard from before
/// being promoted out of probation. RFC 3550 doesn't name this for RTCP
/// membership directly (it's the SSRC-validation `MIN_SEQUENTIAL` idea
/// from §8.2 applied to the RTCP side); two keeps a single stray packet
/// from a spoofed or transient SSRC from being treated as a real member.
pub const PROBATION_COUNT: u32 = 2;

/// A member is dropped for inactivity after this long, per RFC 3550
/// §6.3.5 ("5 times the calculated interval"); `rtcp::session::MIN_INTERVAL`
/// is the calculated interval's floor here, so 5x that is the floor of
/// the timeout too.
pub const MEMBER_TIMEOUT: Duration = Duration::from_secs(5 * 5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberState {
    Unknown,
    Probationary,
    Established,
    Leaving,
    Timedout,
}

#[derive(Clone, Debug)]
struct MemberEntry {
    state: MemberState,
    reports_seen: u32,
    last_activity: Instant,
}

/// Table of remote participants seen on a channel's RTCP transport,
/// keyed by SSRC.
#[derive(Clone, Debug, Default)]
pub struct MemberTable {
    members: HashMap<u32, MemberEntry>,
}

impl MemberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity from `ssrc` carrying payload type `pt` at `now`,
    /// advancing its state. Call once per message in a received compound
    /// packet (not once per packet), since BYE and a reporting PT can
    /// share one compound packet.
    pub fn note_activity(&mut self, ssrc: u32, pt: PayloadType, now: Instant) {
        if pt == PayloadType::Bye {
            if let Some(entry) = self.members.get_mut(&ssrc) {
                log::debug!("ssrc {ssrc:08x} sent BYE, moving to Leaving");
                entry.state = MemberState::Leaving;
                entry.last_activity = now;
            }
            return;
        }
        let entry = self.members.entry(ssrc).or_insert_with(|| MemberEntry {
            state: MemberState::Unknown,
            reports_seen: 0,
            last_activity: now,
        });
        if matches!(entry.state, MemberState::Leaving | MemberState::Timedout) {
            // A member that reappears after leaving/timing out restarts
            // probation rather than being trusted immediately.
            entry.state = MemberState::Unknown;
            entry.reports_seen = 0;
        }
        entry.last_activity = now;
        entry.reports_seen += 1;
        entry.state = match entry.state {
            MemberState::Unknown if entry.reports_seen >= 1 => MemberState::Probationary,
            MemberState::Probationary if entry.reports_seen >= PROBATION_COUNT => {
                MemberState::Established
            }
            other => other,
        };
    }

    /// Moves any member silent for longer than [`MEMBER_TIMEOUT`] to
    /// `Timedout`. Should be called roughly once per RTCP interval.
    pub fn prune_timeouts(&mut self, now: Instant) {
        for (ssrc, entry) in self.members.iter_mut() {
            if entry.state != MemberState::Timedout
                && now.duration_since(entry.last_activity) >= MEMBER_TIMEOUT
            {
                log::debug!("ssrc {ssrc:08x} silent for {MEMBER_TIMEOUT:?}, timing out");
                entry.state = MemberState::Timedout;
            }
        }
    }

    pub fn state(&self, ssrc: u32) -> MemberState {
        self.members
            .get(&ssrc)
            .map(|e| e.state)
            .unwrap_or(MemberState::Unknown)
    }

    /// SSRCs currently `Established` — the only ones that should
    /// contribute to aggregate report generation (spec.md §4.4).
    pub fn established_ssrcs(&self) -> impl Iterator<Item = u32> + '_ {
        self.members
            .iter()
            .filter(|(_, e)| e.state == MemberState::Established)
            .map(|(&ssrc, _)| ssrc)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ssrc_starts_probationary_after_first_report() {
        let now = Instant::now();
        let mut table = MemberTable::new();
        table.note_activity(42, PayloadType::ReceiverReport, now);
        assert_eq!(table.state(42), MemberState::Probationary);
    }

    #[test]
    fn second_report_establishes_member() {
        let now = Instant::now();
        let mut table = MemberTable::new();
        table.note_activity(42, PayloadType::ReceiverReport, now);
        table.note_activity(42, PayloadType::ReceiverReport, now);
        assert_eq!(table.state(42), MemberState::Established);
        assert_eq!(table.established_ssrcs().collect::<Vec<_>>(), vec![42]);
    }

    #[test]
    fn bye_moves_established_member_to_leaving() {
        let now = Instant::now();
        let mut table = MemberTable::new();
        table.note_activity(42, PayloadType::ReceiverReport, now);
        table.note_activity(42, PayloadType::ReceiverReport, now);
        table.note_activity(42, PayloadType::Bye, now);
        assert_eq!(table.state(42), MemberState::Leaving);
    }

    #[test]
    fn bye_from_unknown_ssrc_is_a_no_op() {
        let now = Instant::now();
        let mut table = MemberTable::new();
        table.note_activity(99, PayloadType::Bye, now);
        assert_eq!(table.state(99), MemberState::Unknown);
        assert!(table.is_empty());
    }

    #[test]
    fn silence_past_timeout_marks_member_timed_out() {
        let now = Instant::now();
        let mut table = MemberTable::new();
        table.note_activity(42, PayloadType::ReceiverReport, now);
        table.note_activity(42, PayloadType::ReceiverReport, now);
        let later = now + MEMBER_TIMEOUT;
        table.prune_timeouts(later);
        assert_eq!(table.state(42), MemberState::Timedout);
    }

    #[test]
    fn reappearing_after_leaving_restarts_probation() {
        let now = Instant::now();
        let mut table = MemberTable::new();
        table.note_activity(42, PayloadType::ReceiverReport, now);
        table.note_activity(42, PayloadType::ReceiverReport, now);
        table.note_activity(42, PayloadType::Bye, now);
        table.note_activity(42, PayloadType::ReceiverReport, now);
        assert_eq!(table.state(42), MemberState::Probationary);
    }
}
