//! RTCP compound packet parsing and encoding: just enough of RFC 3550 §6
//! and RFC 4585 §6.1/§6.2 to carry Receiver Reports and Generic NACK
//! feedback. SDES/BYE/APP/XR/RSI/PUBPORTS bodies are opaque here (see
//! [`PayloadType::Unknown`]) — this crate only ever originates RR +
//! Generic NACK and only ever needs to recognize, not fully decode,
//! everything else in a compound packet it receives.
//!
//! Grounded on `examples/original_source/rtp/rtcp.h`'s `rtcptype_`
//! header layout, `rtcp_type_t` payload-type values (200-209), and
//! `rtcp_rtpfb_generic_nack_t`'s `{pid, bitmask}` FCI layout. Byte-level
//! parsing style (manual `Buf`/slicing, `ParseError` on malformed input)
//! follows `src/client/rtp.rs`'s `StrictSequenceChecker`/`Packet::parse`.

pub mod member;
pub mod session;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::gap_reporter::GenericNackFci;
use crate::{bail, wrap, ErrorInt, ParseErrorKind};

pub const VERSION: u8 = 2;

/// RFC 4585 §6.2.1 FMT value selecting the Generic NACK feedback format
/// within an RTPFB packet.
pub const RTPFB_FMT_GENERIC_NACK: u8 = 1;

/// RTCP payload types, per `rtcp_type_t` (200-209). Anything in 192-199
/// (the legacy/experimental range carried over from pre-RFC5506
/// reduced-size RTCP deployments) or otherwise unrecognized decodes as
/// [`PayloadType::Unknown`] rather than an error: an unrecognized message
/// in a compound packet is skipped, not fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadType {
    SenderReport,
    ReceiverReport,
    SourceDescription,
    Bye,
    App,
    TransportFeedback,
    PayloadFeedback,
    ExtendedReport,
    ReceiverSummary,
    PortMapping,
    Unknown(u8),
}

impl PayloadType {
    fn from_u8(v: u8) -> PayloadType {
        match v {
            200 => PayloadType::SenderReport,
            201 => PayloadType::ReceiverReport,
            202 => PayloadType::SourceDescription,
            203 => PayloadType::Bye,
            204 => PayloadType::App,
            205 => PayloadType::TransportFeedback,
            206 => PayloadType::PayloadFeedback,
            207 => PayloadType::ExtendedReport,
            208 => PayloadType::ReceiverSummary,
            209 => PayloadType::PortMapping,
            other => PayloadType::Unknown(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            PayloadType::SenderReport => 200,
            PayloadType::ReceiverReport => 201,
            PayloadType::SourceDescription => 202,
            PayloadType::Bye => 203,
            PayloadType::App => 204,
            PayloadType::TransportFeedback => 205,
            PayloadType::PayloadFeedback => 206,
            PayloadType::ExtendedReport => 207,
            PayloadType::ReceiverSummary => 208,
            PayloadType::PortMapping => 209,
            PayloadType::Unknown(v) => v,
        }
    }
}

/// One message within a compound RTCP packet, still in wire form.
#[derive(Debug)]
pub struct RawMessage<'a> {
    pub padding: bool,
    /// 5-bit header field; `count` for most types, `fmt` for RTPFB/PSFB.
    pub count_or_fmt: u8,
    pub pt: PayloadType,
    /// Everything after the 4-byte common header (so callers that know
    /// their type's layout can index `ssrc`/body fields directly).
    pub body: &'a [u8],
}

impl<'a> RawMessage<'a> {
    /// The sender/media SSRC carried as the first word of body for every
    /// payload type this crate cares about (SR, RR, RTPFB, PSFB, APP).
    pub fn ssrc(&self) -> Option<u32> {
        (self.body.len() >= 4).then(|| u32::from_be_bytes(self.body[0..4].try_into().unwrap()))
    }
}

/// Iterates the messages of a compound RTCP packet.
pub struct Iter<'a> {
    data: &'a [u8],
}

pub fn iter(data: &[u8]) -> Iter<'_> {
    Iter { data }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<RawMessage<'a>, crate::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 4 {
            self.data = &[];
            return Some(Err(wrap!(ErrorInt::ParseError {
                kind: ParseErrorKind::Rtcp,
                description: "runt rtcp header".to_owned(),
            })));
        }
        let params = u16::from_be_bytes([self.data[0], self.data[1]]);
        let len_words = u16::from_be_bytes([self.data[2], self.data[3]]);
        let version = (params >> 14) as u8;
        let padding = (params >> 13) & 1 != 0;
        let count_or_fmt = ((params >> 8) & 0x1f) as u8;
        let pt = PayloadType::from_u8((params & 0xff) as u8);
        let total_len = (len_words as usize + 1) * 4;

        if version != VERSION {
            self.data = &[];
            return Some(Err(wrap!(ErrorInt::ParseError {
                kind: ParseErrorKind::Rtcp,
                description: format!("bad rtcp version {version}"),
            })));
        }
        if self.data.len() < total_len {
            self.data = &[];
            return Some(Err(wrap!(ErrorInt::ParseError {
                kind: ParseErrorKind::Rtcp,
                description: format!(
                    "rtcp message claims {total_len} bytes but only {} remain",
                    self.data.len()
                ),
            })));
        }
        let (this, rest) = self.data.split_at(total_len);
        self.data = rest;
        Some(Ok(RawMessage {
            padding,
            count_or_fmt,
            pt,
            body: &this[4..],
        }))
    }
}

/// One report block within a Receiver Report (RFC 3550 §6.4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32, // 24 bits significant
    pub ext_highest_seq: u32,
    pub jitter: u32,
    pub lsr: u32,
    pub dlsr: u32,
}

impl ReportBlock {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32(self.ssrc);
        out.put_u32((u32::from(self.fraction_lost) << 24) | (self.cumulative_lost & 0x00ff_ffff));
        out.put_u32(self.ext_highest_seq);
        out.put_u32(self.jitter);
        out.put_u32(self.lsr);
        out.put_u32(self.dlsr);
    }

    fn decode(body: &[u8]) -> Result<ReportBlock, crate::Error> {
        if body.len() < 24 {
            bail!(ErrorInt::ParseError {
                kind: ParseErrorKind::Rtcp,
                description: "runt rtcp report block".to_owned(),
            });
        }
        let mut b = body;
        let ssrc = b.get_u32();
        let loss_word = b.get_u32();
        let ext_highest_seq = b.get_u32();
        let jitter = b.get_u32();
        let lsr = b.get_u32();
        let dlsr = b.get_u32();
        Ok(ReportBlock {
            ssrc,
            fraction_lost: (loss_word >> 24) as u8,
            cumulative_lost: loss_word & 0x00ff_ffff,
            ext_highest_seq,
            jitter,
            lsr,
            dlsr,
        })
    }
}

/// Decodes a Receiver Report body (`ssrc` already consumed by the caller
/// via [`RawMessage::ssrc`]; `count` is the header's 5-bit count field).
pub fn decode_receiver_report(
    msg: &RawMessage<'_>,
) -> Result<(u32, Vec<ReportBlock>), crate::Error> {
    if msg.pt != PayloadType::ReceiverReport {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtcp,
            description: "not a receiver report".to_owned(),
        });
    }
    if msg.body.len() < 4 {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtcp,
            description: "runt receiver report".to_owned(),
        });
    }
    let ssrc = u32::from_be_bytes(msg.body[0..4].try_into().unwrap());
    let mut blocks = Vec::with_capacity(msg.count_or_fmt as usize);
    let mut rest = &msg.body[4..];
    for _ in 0..msg.count_or_fmt {
        blocks.push(ReportBlock::decode(rest)?);
        rest = &rest[24..];
    }
    Ok((ssrc, blocks))
}

/// Decodes an RTPFB Generic NACK message's sender/media SSRCs and FCIs.
pub fn decode_generic_nack(
    msg: &RawMessage<'_>,
) -> Result<(u32, u32, Vec<GenericNackFci>), crate::Error> {
    if msg.pt != PayloadType::TransportFeedback || msg.count_or_fmt != RTPFB_FMT_GENERIC_NACK {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtcp,
            description: "not a generic nack message".to_owned(),
        });
    }
    if msg.body.len() < 8 || (msg.body.len() - 8) % 4 != 0 {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtcp,
            description: "malformed generic nack body length".to_owned(),
        });
    }
    let mut b = msg.body;
    let sender_ssrc = b.get_u32();
    let media_ssrc = b.get_u32();
    let mut fcis = Vec::with_capacity(b.len() / 4);
    while b.has_remaining() {
        let pid = b.get_u16();
        let bitmask = b.get_u16();
        fcis.push(GenericNackFci { pid, bitmask });
    }
    Ok((sender_ssrc, media_ssrc, fcis))
}

fn write_header(out: &mut BytesMut, count_or_fmt: u8, pt: PayloadType, body_words: u16) {
    let params: u16 =
        ((VERSION as u16) << 14) | ((count_or_fmt as u16 & 0x1f) << 8) | pt.to_u8() as u16;
    out.put_u16(params);
    out.put_u16(body_words);
}

/// Encodes an empty Receiver Report (no report blocks), used as the
/// mandatory leading SR/RR when a channel has nothing substantive to
/// report yet (RFC 4585 §3's "compound packets MUST begin with SR/RR").
pub fn encode_empty_receiver_report(ssrc: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(8);
    write_header(&mut out, 0, PayloadType::ReceiverReport, 1);
    out.put_u32(ssrc);
    out.freeze()
}

pub fn encode_receiver_report(ssrc: u32, blocks: &[ReportBlock]) -> Bytes {
    let body_words = 1 + blocks.len() as u16 * 6;
    let mut out = BytesMut::with_capacity(4 + body_words as usize * 4);
    write_header(&mut out, blocks.len() as u8, PayloadType::ReceiverReport, body_words);
    out.put_u32(ssrc);
    for b in blocks {
        b.encode(&mut out);
    }
    out.freeze()
}

/// Encodes an RTPFB Generic NACK message (RFC 4585 §6.2.1).
pub fn encode_generic_nack(sender_ssrc: u32, media_ssrc: u32, fcis: &[GenericNackFci]) -> Bytes {
    let body_words = 2 + fcis.len() as u16;
    let mut out = BytesMut::with_capacity(4 + body_words as usize * 4);
    write_header(
        &mut out,
        RTPFB_FMT_GENERIC_NACK,
        PayloadType::TransportFeedback,
        body_words,
    );
    out.put_u32(sender_ssrc);
    out.put_u32(media_ssrc);
    for fci in fcis {
        out.put_u16(fci.pid);
        out.put_u16(fci.bitmask);
    }
    out.freeze()
}

const ERRI_NAME: [u8; 4] = *b"ERRI";

/// Encodes an RFC 3550 §6.7 APP message: SSRC, a 4-byte ASCII `name`,
/// then `data`, zero-padded out to a 32-bit boundary.
pub fn encode_app(ssrc: u32, name: [u8; 4], data: &[u8]) -> Bytes {
    let unpadded = 8 + data.len();
    let padded = (unpadded + 3) & !3;
    let body_words = (padded / 4) as u16;
    let mut out = BytesMut::with_capacity(4 + padded);
    write_header(&mut out, 0, PayloadType::App, body_words);
    out.put_u32(ssrc);
    out.put_slice(&name);
    out.put_slice(data);
    out.resize(4 + padded, 0);
    out.freeze()
}

/// Encodes the vendor "ERRI" APP block carrying `recv_bw`, the maximum
/// bandwidth (bps) the receiver is prepared to take for ER/RCC repair.
/// Grounded on `examples/original_source/eva/vqec_gap_reporter.c`'s
/// `vqec_dp_chan_gap_reporter_process`, which appends this APP block to
/// every compound report it sends (not just ones carrying a NACK).
pub fn encode_erri_app(ssrc: u32, recv_bw: u32) -> Bytes {
    encode_app(ssrc, ERRI_NAME, &recv_bw.to_be_bytes())
}

/// Decodes an "ERRI" APP message's `recv_bw` field.
pub fn decode_erri_app(msg: &RawMessage<'_>) -> Result<u32, crate::Error> {
    if msg.pt != PayloadType::App {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtcp,
            description: "not an app message".to_owned(),
        });
    }
    if msg.body.len() < 12 || &msg.body[4..8] != &ERRI_NAME[..] {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtcp,
            description: "not an erri app message".to_owned(),
        });
    }
    Ok(u32::from_be_bytes(msg.body[8..12].try_into().unwrap()))
}

/// Encodes a full compound packet: an RR (with `blocks`, possibly empty),
/// a Generic NACK message iff `fcis` is non-empty, then the "ERRI" APP
/// block carrying `recv_bw`. Returns `None` when there's nothing to say
/// (no report blocks and no FCIs), matching spec.md §4.2's "nothing to
/// report this interval" case — the APP block only ever rides along with
/// an RR, never alone.
pub fn encode_compound_report(
    ssrc: u32,
    blocks: &[ReportBlock],
    media_ssrc: u32,
    fcis: &[GenericNackFci],
    recv_bw: u32,
) -> Option<Bytes> {
    if blocks.is_empty() && fcis.is_empty() {
        return None;
    }
    let rr = if blocks.is_empty() {
        encode_empty_receiver_report(ssrc)
    } else {
        encode_receiver_report(ssrc, blocks)
    };
    let nack = (!fcis.is_empty()).then(|| encode_generic_nack(ssrc, media_ssrc, fcis));
    let app = encode_erri_app(ssrc, recv_bw);
    let mut out = BytesMut::with_capacity(
        rr.len() + nack.as_ref().map_or(0, Bytes::len) + app.len(),
    );
    out.extend_from_slice(&rr);
    if let Some(nack) = &nack {
        out.extend_from_slice(nack);
    }
    out.extend_from_slice(&app);
    Some(out.freeze())
}
