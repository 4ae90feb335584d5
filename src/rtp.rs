//! RTP header parsing for arriving primary/repair/FEC datagrams.
//!
//! Grounded on `src/client/rtp.rs`'s `StrictSequenceChecker::rtp`: parse
//! with [`rtp_rs::RtpReader`], pull the sequence number out of the raw
//! bytes directly (`rtp_rs::Seq`'s own arithmetic isn't what this crate
//! wants — [`crate::seq::Extender`] owns that), and turn the reader's
//! borrowed payload range into an offset/length pulled out of the
//! original `Bytes` so the payload stays zero-copy.
//!
//! Unlike the teacher, this module has no SSRC/seq continuity checking
//! of its own: that's `Pcm`'s job once the packet carries an
//! [`crate::seq::ExtSeqNum`]. This module only turns wire bytes into a
//! [`Header`] plus a payload, per spec.md §6 "RTP header: parsed,
//! validated, preserved unmodified; only the payload is cached."

use bytes::{Buf, Bytes};

use crate::{bail, wrap, ErrorInt, ParseErrorKind};

pub const VERSION: u8 = 2;

/// The fixed RTP header fields this crate needs, per
/// `examples/original_source/rtp/rtp.h`'s `rtptype_`/`rtpfasttype_`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Parses a raw RTP datagram into its header and payload.
///
/// `data` must contain exactly one RTP packet (the caller, e.g.
/// [`crate::socket`], is expected to have already stripped any
/// lower-layer framing). Returns [`ErrorInt::ParseError`] with
/// [`ParseErrorKind::Rtp`] on anything malformed: short header, wrong
/// version, extension/CSRC claiming more bytes than are present.
pub fn parse(data: &Bytes) -> Result<(Header, Bytes), crate::Error> {
    // `RtpReader::new` itself rejects anything not version 2.
    let reader = rtp_rs::RtpReader::new(&data[..]).map_err(|e| {
        wrap!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtp,
            description: format!("corrupt rtp header: {e:?}"),
        })
    })?;

    // `data[2..4]` is the sequence number field regardless of CSRC/ext
    // layout; reading it directly avoids rtp_rs's own `Seq` wrapper,
    // which doesn't offer the wraparound-aware comparisons this crate
    // needs (that's `ExtSeqNum`'s job, fed by `Extender` upstream).
    if data.len() < 4 {
        bail!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtp,
            description: "runt rtp header".to_owned(),
        });
    }
    let sequence_number = u16::from_be_bytes([data[2], data[3]]);

    let header = Header {
        marker: reader.mark(),
        payload_type: reader.payload_type(),
        sequence_number,
        timestamp: reader.timestamp(),
        ssrc: reader.ssrc(),
    };

    let payload_range = as_range(data, reader.payload()).ok_or_else(|| {
        wrap!(ErrorInt::ParseError {
            kind: ParseErrorKind::Rtp,
            description: "empty or out-of-bounds rtp payload".to_owned(),
        })
    })?;

    let mut payload = data.clone();
    payload.truncate(payload_range.end);
    payload.advance(payload_range.start);
    Ok((header, payload))
}

/// Recovers `inner`'s byte offsets within `outer`, the way
/// `src/client/rtp.rs`'s `crate::as_range` does for a reader's borrowed
/// sub-slice of the original buffer.
fn as_range(outer: &[u8], inner: &[u8]) -> Option<std::ops::Range<usize>> {
    let outer_start = outer.as_ptr() as usize;
    let inner_start = inner.as_ptr() as usize;
    if inner_start < outer_start {
        return None;
    }
    let start = inner_start - outer_start;
    let end = start + inner.len();
    (end <= outer.len()).then_some(start..end)
}
