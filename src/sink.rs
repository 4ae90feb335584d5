//! Per-output-stream packet queue with blocking-read support.
//!
//! Grounded on `examples/original_source/eva/vqec-dp/outputshim/
//! vqec_dp_oshim_read_api.c::vqec_dp_oshim_read_tuner_read`: that function
//! copies already-ordered packets into caller iobufs, then (if more were
//! requested and a timeout was given) registers a "waiter" and blocks on
//! `pthread_cond_wait`/`pthread_cond_timedwait` until either enough
//! packets have arrived or the deadline passes. This module keeps the same
//! three-mode timeout (non-blocking / bounded / indefinite) and the same
//! "return whatever was collected by the deadline" behavior, but replaces
//! the C's per-thread pooled waiter object and global lock with a
//! `parking_lot::Condvar` owned by the sink itself.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;
use crate::packet::Packet;
use crate::ErrorInt;

/// How long [`Sink::read`] should wait for packets that aren't yet
/// available.
#[derive(Clone, Copy, Debug)]
pub enum ReadTimeout {
    /// Return immediately with whatever is already queued.
    NonBlocking,
    /// Block up to `Duration`, then return whatever was collected.
    After(Duration),
    /// Block until `max` packets are collected or the sink is closed.
    Indefinite,
}

/// Running counters a caller may want to fold into tuner/channel stats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Packets dropped because the queue was at capacity when they
    /// arrived, per spec.md §4.2 ("enqueue into a full queue drops the
    /// newest packet and increments `queue_drops`"), plus any still-queued
    /// packets discarded by [`Sink::flush`].
    pub queue_drops: u64,
}

fn hit_app(out: &[Packet]) -> bool {
    out.last()
        .is_some_and(|p| p.flags().contains(crate::packet::PacketFlags::APP))
}

struct SinkState {
    queue: VecDeque<Packet>,
    capacity: usize,
    /// Set once the upstream source/stream this sink fed from went away
    /// (spec.md §4.1's `resequence` and §6's tuner teardown both close
    /// their sink so any blocked reader wakes with an error instead of
    /// hanging forever).
    closed: Option<ErrorInt>,
    stats: SinkStats,
}

/// A bounded queue of ready-to-deliver packets, read by exactly one
/// logical consumer (a tuner) at a time but safe to share across threads.
pub struct Sink {
    state: Mutex<SinkState>,
    condvar: Condvar,
}

impl Sink {
    pub fn new(capacity: usize) -> Self {
        Sink {
            state: Mutex::new(SinkState {
                queue: VecDeque::with_capacity(capacity.min(64)),
                capacity: capacity.max(1),
                closed: None,
                stats: SinkStats::default(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Enqueues a packet for delivery. If the sink is at capacity, the
    /// *arriving* packet is the one dropped (the queue's existing
    /// contents are left untouched) and `queue_drops` is incremented, per
    /// spec.md §4.2 — this never blocks the producer.
    pub fn push(&self, pkt: Packet) {
        let mut state = self.state.lock();
        if state.queue.len() >= state.capacity {
            log::debug!("sink full at capacity {}, dropping arriving packet", state.capacity);
            state.stats.queue_drops += 1;
            return;
        }
        state.queue.push_back(pkt);
        self.condvar.notify_all();
    }

    /// Drops every queued packet, counting each as a `queue_drops`, per
    /// spec.md §4.2 ("`flush()` — drops all queued packets, updates
    /// queue-drop counters").
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.stats.queue_drops += state.queue.len() as u64;
        state.queue.clear();
    }

    pub fn stats(&self) -> SinkStats {
        self.state.lock().stats
    }

    /// Wakes every blocked reader with `reason` and marks the sink closed;
    /// further reads drain whatever remains queued, then fail.
    pub fn close(&self, reason: ErrorInt) {
        log::debug!("closing sink: {reason}");
        let mut state = self.state.lock();
        state.closed = Some(reason);
        self.condvar.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies whole datagrams out of the front of the queue, stopping at
    /// `max` or — per spec.md §4.2 ("A flagged APP packet causes an early
    /// return even if buffers remain") — the instant an APP-flagged
    /// packet (a TSRAP burst datagram) is copied out, whichever comes
    /// first.
    fn drain_into(state: &mut SinkState, out: &mut Vec<Packet>, max: usize) {
        while out.len() < max {
            match state.queue.pop_front() {
                Some(pkt) => {
                    let is_app = pkt.flags().contains(crate::packet::PacketFlags::APP);
                    out.push(pkt);
                    if is_app {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    fn finish(state: &SinkState, out: Vec<Packet>) -> Result<Vec<Packet>, crate::Error> {
        if out.is_empty() {
            if let Some(reason) = &state.closed {
                return Err(crate::Error(Box::new(reason.clone())));
            }
        }
        Ok(out)
    }

    /// Reads up to `max` packets, blocking per `timeout`. Returns whatever
    /// was collected by the time the call gives up; only returns `Err` if
    /// *nothing* was collected and the sink has since been closed.
    pub fn read(
        &self,
        max: usize,
        timeout: ReadTimeout,
        clock: &dyn Clock,
    ) -> Result<Vec<Packet>, crate::Error> {
        let mut out = Vec::with_capacity(max);
        let mut state = self.state.lock();
        Self::drain_into(&mut state, &mut out, max);

        if out.len() >= max || hit_app(&out) || matches!(timeout, ReadTimeout::NonBlocking) {
            return Self::finish(&state, out);
        }

        let deadline = match timeout {
            ReadTimeout::After(d) => Some(clock.now() + d),
            ReadTimeout::Indefinite => None,
            ReadTimeout::NonBlocking => unreachable!(),
        };

        loop {
            if state.closed.is_some() {
                break;
            }
            let timed_out = match deadline {
                None => {
                    self.condvar.wait(&mut state);
                    false
                }
                Some(d) => {
                    let now = clock.now();
                    if now >= d {
                        true
                    } else {
                        self.condvar.wait_for(&mut state, d - now).timed_out()
                    }
                }
            };
            Self::drain_into(&mut state, &mut out, max);
            if out.len() >= max || hit_app(&out) || timed_out {
                break;
            }
        }

        Self::finish(&state, out)
    }
}
