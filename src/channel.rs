//! Channel lifecycle: wires a descriptor's primary/repair/FEC0/FEC1
//! inputs through a [`crate::graph::Graph`] into one tuner's
//! [`crate::sink::Sink`], via a per-channel [`crate::pcm::Pcm`] that does
//! the actual reordering.
//!
//! Grounded on `examples/original_source/eva/vqec-dp/vqec_dp_graph.c`
//! (connect/rollback, covered by [`crate::graph`] directly) and
//! `examples/original_source/eva/vqec_dp_chan.c`-style dpchan semantics:
//! all four input streams feed one ordered cache, whose ready output
//! goes to a single "postrepair" (or, in fallback mode, "primary")
//! consumer — modeled here as a direct push into the tuner's sink rather
//! than a fifth [`crate::graph::StreamType`], since that hop is always
//! 1:1 and never participates in capability negotiation.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::SysConfig;
use crate::graph::{Graph, GraphId, GraphRegistry, InputStream, OutputStream, StreamType};
use crate::packet::{Packet, PacketFlags, PacketType};
use crate::pcm::Pcm;
use crate::rtcp::session::Session as RtcpSession;
use crate::rtp;
use crate::seq::Extender;
use crate::token_bucket::TokenBucket;
use crate::tsrap::{self, PidList, TS_PACKET_LEN, TS_PER_DATAGRAM};
use crate::tuner::{TunerId, TunerTable};
use crate::{bail, wrap, Error, ErrorInt};

/// The declarative, immutable-for-its-lifetime description of a tuned
/// channel, per spec.md §3 "Channel descriptor".
#[derive(Clone, Debug, Default)]
pub struct ChannelDescriptor {
    pub primary: Option<SocketAddrV4>,
    pub repair: Option<SocketAddrV4>,
    pub fec0: Option<SocketAddrV4>,
    pub fec1: Option<SocketAddrV4>,
    pub strip_rtp: bool,
    pub rcc_enable: bool,
    pub er_enable: bool,
    /// `(rate, burst, quantum)`; `None` falls back to
    /// [`SysConfig::default_er_policer`] with `quantum = 1`.
    pub er_policer: Option<(u32, u32, u32)>,
    pub max_recv_bw_er: u32,
    pub max_recv_bw_rcc: u32,
    /// Inputs wired directly to the output with no reordering/dpchan,
    /// per spec.md §4.6 "fallback" mode.
    pub fallback: bool,
    pub ssrc: u32,
    pub media_ssrc: u32,
}

/// Per-channel running counters, folded from [`crate::pcm::PcmStats`] and
/// the gap reporter's per-report output.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelStats {
    pub pcm: crate::pcm::PcmStats,
    pub repairs_requested: u64,
    pub repairs_policed: u64,
    pub suppressed_jumbo: u64,
    pub generic_nack_reports: u64,
    /// Feedback cycles suppressed because a unicast repair datagram
    /// arrived from an address other than the configured repair source,
    /// per spec.md §4.3 step 2 / §7 ("unicast source mismatch ... silently
    /// suppressed with a counter and a debug log").
    pub unicast_source_mismatches: u64,
}

/// The dpchan's mutable state: one ordered cache, its policer and RTCP
/// schedule, and the tuner sink ready packets are pushed to.
struct ChannelCore {
    pcm: Pcm,
    policer: Option<TokenBucket>,
    rtcp: RtcpSession,
    tuner_sink: Arc<crate::sink::Sink>,
    pidlist: PidList,
    next_rcc_seq: u32,
    stats: ChannelStats,
    /// Set while the most recently observed unicast repair datagram's
    /// source doesn't match `desc.repair`; cleared the moment a repair
    /// datagram from the right source arrives. ER feedback is suppressed
    /// while this is set (the channel otherwise keeps operating normally).
    repair_source_mismatch: bool,
}

impl ChannelCore {
    /// Inserts `pkt`, then drains every now-ready position into the
    /// tuner sink, preserving the strictly-increasing delivery order
    /// spec.md §5 requires.
    fn insert_and_drain(&mut self, pkt: Packet, now: Instant) {
        self.pcm.insert(pkt, now);
        while let Some(ready) = self.pcm.next_ready(now) {
            self.tuner_sink.push(ready);
        }
        self.stats.pcm = self.pcm.stats();
    }
}

/// A [`crate::graph::OutputStream`] that feeds one stream type's arrivals
/// into a channel's shared [`ChannelCore`].
struct DpchanInlet {
    ty: StreamType,
    core: Arc<Mutex<ChannelCore>>,
}

impl OutputStream for DpchanInlet {
    fn stream_type(&self) -> StreamType {
        self.ty
    }

    fn deliver(&self, pkt: Packet) {
        let now = pkt.arrival();
        self.core.lock().insert_and_drain(pkt, now);
    }
}

/// A socket-facing input stream: parses RTP, extends the sequence number
/// with the channel's shared [`Extender`], and forwards to whatever
/// output it's connected to. One instance per configured
/// [`StreamType`]; all four share the same `Extender` because repair and
/// FEC arrivals reference the primary stream's own sequence space.
struct UdpInputStream {
    ty: StreamType,
    packet_type: PacketType,
    extender: Arc<Mutex<Extender>>,
    output: Mutex<Option<Arc<dyn OutputStream>>>,
}

impl UdpInputStream {
    fn new(ty: StreamType, packet_type: PacketType, extender: Arc<Mutex<Extender>>) -> Self {
        UdpInputStream {
            ty,
            packet_type,
            extender,
            output: Mutex::new(None),
        }
    }

    /// Parses and forwards one arrived datagram. Matches spec.md §7's
    /// `ServiceShutdown`: receiving on a disconnected input drops the
    /// packet rather than erroring loudly.
    fn on_datagram(&self, data: &Bytes, now: Instant) -> Result<(), Error> {
        let output = self
            .output
            .lock()
            .clone()
            .ok_or_else(|| wrap!(ErrorInt::ServiceShutdown))?;
        let (header, payload) = rtp::parse(data)?;
        let ext_seq = self.extender.lock().extend(header.sequence_number);
        let pkt = Packet::new(
            ext_seq,
            header.timestamp,
            now,
            self.packet_type,
            PacketFlags::empty(),
            payload,
        );
        output.deliver(pkt);
        Ok(())
    }
}

/// Adapts a shared [`UdpInputStream`] to [`crate::graph::InputStream`]'s
/// `&mut self` connect/disconnect, while letting [`Channel`] keep its own
/// handle to push datagrams in.
struct BoxedInput(Arc<UdpInputStream>);

impl InputStream for BoxedInput {
    fn stream_type(&self) -> StreamType {
        self.0.ty
    }

    fn connect(&mut self, output: Arc<dyn OutputStream>) -> Result<(), Error> {
        *self.0.output.lock() = Some(output);
        Ok(())
    }

    fn disconnect(&mut self) {
        *self.0.output.lock() = None;
    }
}

/// A live, connected channel: one [`crate::graph::Graph`] wiring this
/// channel's configured inputs into its dpchan, feeding exactly one
/// tuner.
pub struct Channel {
    desc: ChannelDescriptor,
    core: Arc<Mutex<ChannelCore>>,
    inputs: HashMap<StreamType, Arc<UdpInputStream>>,
    graph_id: GraphId,
    tuner_id: TunerId,
}

impl Channel {
    /// Builds, wires and connects a channel for `tid`, per spec.md §4.6
    /// points 1-2. Rolls back (via [`Graph::connect`]) if any configured
    /// stream's connection fails.
    pub fn create(
        graphs: &GraphRegistry,
        tuners: &TunerTable,
        cfg: &SysConfig,
        desc: ChannelDescriptor,
        tid: TunerId,
        now: Instant,
    ) -> Result<Channel, Error> {
        let tuner_sink = tuners.sink_for(tid)?;

        let (rate, burst, quantum) = desc
            .er_policer
            .unwrap_or((cfg.default_er_policer.0, cfg.default_er_policer.1, 1));
        let policer = if desc.er_enable {
            Some(TokenBucket::new(rate, burst, quantum, now)?)
        } else {
            None
        };

        let core = Arc::new(Mutex::new(ChannelCore {
            pcm: Pcm::new(cfg.pcm_capacity, cfg.gap_wait_deadline),
            policer,
            rtcp: RtcpSession::new(desc.ssrc, desc.media_ssrc, now),
            tuner_sink,
            pidlist: PidList::new(),
            next_rcc_seq: 0,
            stats: ChannelStats::default(),
            repair_source_mismatch: false,
        }));

        let extender = Arc::new(Mutex::new(Extender::new()));
        let mut graph = Graph::new();
        let mut inputs = HashMap::new();

        let configured: [(StreamType, Option<SocketAddrV4>, PacketType); 4] = [
            (StreamType::Primary, desc.primary, PacketType::Primary),
            (StreamType::Repair, desc.repair, PacketType::Repair),
            (StreamType::Fec0, desc.fec0, PacketType::Fec),
            (StreamType::Fec1, desc.fec1, PacketType::Fec),
        ];

        for (ty, addr, packet_type) in configured {
            if addr.is_none() {
                continue;
            }
            let input = Arc::new(UdpInputStream::new(ty, packet_type, extender.clone()));
            graph.add_input(Box::new(BoxedInput(input.clone())));
            graph.add_output(Arc::new(DpchanInlet {
                ty,
                core: core.clone(),
            }));
            inputs.insert(ty, input);
        }

        let graph_id = graphs.create(graph);
        if let Err(e) = graphs.connect(graph_id) {
            log::warn!("channel graph connect failed, rolling back: {e}");
            graphs.destroy(graph_id);
            return Err(e);
        }

        Ok(Channel {
            desc,
            core,
            inputs,
            graph_id,
            tuner_id: tid,
        })
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.desc
    }

    pub fn tuner_id(&self) -> TunerId {
        self.tuner_id
    }

    pub fn stats(&self) -> ChannelStats {
        self.core.lock().stats
    }

    /// Feeds one arrived datagram for `ty` through RTP parse, sequence
    /// extension, PCM insertion and sink delivery.
    pub fn deliver_datagram(&self, ty: StreamType, data: &Bytes, now: Instant) -> Result<(), Error> {
        self.deliver_datagram_from(ty, None, data, now)
    }

    /// Same as [`Channel::deliver_datagram`], but also passes the
    /// datagram's sending address, so a unicast repair feed can be
    /// checked against the configured repair source per spec.md §4.3
    /// step 2 ("If unicast and configured source ≠ observed packetflow
    /// source, suppress").
    pub fn deliver_datagram_from(
        &self,
        ty: StreamType,
        from: Option<std::net::SocketAddr>,
        data: &Bytes,
        now: Instant,
    ) -> Result<(), Error> {
        let input = self
            .inputs
            .get(&ty)
            .ok_or_else(|| wrap!(ErrorInt::NoSuchStream))?;
        if ty == StreamType::Repair {
            self.note_repair_source(from);
        }
        input.on_datagram(data, now)
    }

    /// Updates `repair_source_mismatch`/`unicast_source_mismatches` for a
    /// repair datagram observed from `from`. A no-op for multicast repair
    /// sessions (source filtering is a unicast-only concern) or when the
    /// channel has no configured repair source at all.
    fn note_repair_source(&self, from: Option<std::net::SocketAddr>) {
        let Some(expected) = self.desc.repair else {
            return;
        };
        if expected.ip().is_multicast() {
            return;
        }
        let Some(from) = from else {
            return;
        };
        let mismatched = match from {
            std::net::SocketAddr::V4(addr) => *addr.ip() != *expected.ip(),
            std::net::SocketAddr::V6(_) => true,
        };
        let mut core = self.core.lock();
        if mismatched && !core.repair_source_mismatch {
            log::warn!("repair source mismatch: expected {expected}, got {from}");
            core.stats.unicast_source_mismatches += 1;
        }
        core.repair_source_mismatch = mismatched;
    }

    /// `repair_inject`/`primary_inject`: spec.md §4.6 point 3 describes
    /// sending an out-of-band keepalive back toward the source through
    /// the input-shim's bound socket. The socket itself belongs to the
    /// caller (see [`crate::socket`]); this only validates the stream is
    /// still wired, matching the input-shim shutdown check the original
    /// performs before a filter-socket send.
    pub fn inject(&self, ty: StreamType) -> Result<(), Error> {
        if self.inputs.contains_key(&ty) {
            Ok(())
        } else {
            bail!(ErrorInt::NoSuchStream);
        }
    }

    /// Builds the next due RTCP compound report, if any, folding its
    /// counters into this channel's stats.
    pub fn maybe_build_rtcp_report(&self, cfg: &SysConfig, now: Instant) -> Option<Bytes> {
        let mut core = self.core.lock();
        if !cfg.er_enable || !self.desc.er_enable {
            return None;
        }
        // Unicast source mismatch suppresses repair requests only; the RR
        // (and the channel's primary delivery) keeps operating normally,
        // per spec.md §7 ("the channel otherwise operates").
        let gaps = if core.repair_source_mismatch {
            Vec::new()
        } else {
            core.pcm.enumerate_gaps(cfg.fci_max.saturating_mul(17))
        };
        let ext_highest_seq = core.pcm.tail().map(|s| s.0).unwrap_or(0);
        let offset = core.pcm.session_rtp_seq_offset();
        let fci_max = cfg.fci_max;
        // Resolved max receive bandwidth carried in the report's "ERRI" APP
        // block: a repair admission that's currently suppressed (unicast
        // source mismatch) still has to report *something*, so it falls
        // back to 1 bps rather than omitting the block or claiming the
        // channel's full configured bandwidth.
        let recv_bw = if core.repair_source_mismatch {
            1
        } else if self.desc.rcc_enable && cfg.rcc_enable {
            self.desc.max_recv_bw_rcc
        } else {
            self.desc.max_recv_bw_er
        };
        let policer_ptr: Option<&mut TokenBucket> = core.policer.as_mut();
        // Work around the borrow checker: `build_due_report` needs both
        // `&core.pcm` (already read above) and `&mut core.policer`.
        let rtcp_session = &mut core.rtcp;
        let report = rtcp_session.build_due_report(
            now,
            ext_highest_seq,
            &gaps,
            fci_max,
            policer_ptr,
            offset,
            recv_bw,
        );
        let (packet, gap_report) = report?;
        core.stats.repairs_requested += gap_report.repairs_requested;
        core.stats.repairs_policed += gap_report.repairs_policed;
        if gap_report.suppressed_jumbo {
            core.stats.suppressed_jumbo += 1;
        }
        core.stats.generic_nack_reports += 1;
        Some(packet)
    }

    /// Splices a decoded TSRAP burst directly into the tuner sink ahead
    /// of the repair stream catching up, per spec.md §4.7/§4.6's RCC
    /// admission. Bypasses the PCM entirely: an RCC burst isn't part of
    /// the primary sequence space.
    pub fn splice_tsrap_burst(
        &self,
        tlv_bytes: &[u8],
        cfg: &SysConfig,
        now: Instant,
    ) -> Result<usize, Error> {
        if !self.desc.rcc_enable || !cfg.rcc_enable {
            bail!(ErrorInt::InvalidArgs {
                description: "rcc disabled for this channel".to_owned(),
            });
        }
        let items = tsrap::parse_tlv_stream(tlv_bytes)?;
        let mut core = self.core.lock();
        let ts_bytes = tsrap::decode_burst(&items, &mut core.pidlist, cfg.num_patpmt, cfg.app_paks_per_rcc)?;

        let datagram_bytes = TS_PACKET_LEN * TS_PER_DATAGRAM;
        let mut count = 0;
        for chunk in ts_bytes.chunks(datagram_bytes) {
            let seq = core.next_rcc_seq;
            core.next_rcc_seq += 1;
            let pkt = Packet::new(
                crate::seq::ExtSeqNum(seq),
                0,
                now,
                PacketType::Repair,
                PacketFlags::APP | PacketFlags::RAPID_CHANNEL_CHANGE,
                Bytes::copy_from_slice(chunk),
            );
            core.tuner_sink.push(pkt);
            count += 1;
        }
        Ok(count)
    }

    /// Tears down the graph (which disconnects every input, in turn
    /// dropping this channel's hold on the tuner sink) and destroys the
    /// tuner itself, per spec.md §4.6 point 4.
    pub fn destroy(self, graphs: &GraphRegistry, tuners: &TunerTable, tid: TunerId) {
        graphs.destroy(self.graph_id);
        tuners.destroy(tid);
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }
}
