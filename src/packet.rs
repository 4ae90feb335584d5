//! The owned packet object held by [`crate::pcm::Pcm`] and
//! [`crate::sink::Sink`].

use bytes::Bytes;
use pretty_hex::PrettyHex;
use std::sync::Arc;
use std::time::Instant;

use crate::seq::ExtSeqNum;

/// Which path a packet arrived on. Spec.md §3: "type ∈ {primary, repair,
/// fec, primary-resequenced}".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Primary,
    Repair,
    Fec,
    PrimaryResequenced,
}

bitflags::bitflags! {
    /// Per-packet flags, surfaced to the tuner read API as `buf_flags`
    /// (spec.md §6 "Tuner I/O").
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u8 {
        /// Carries a TSRAP APP burst payload rather than stream data.
        const APP = 0b01;
        /// Delivered as part of an RCC prefix (ahead of the repair stream
        /// catching up).
        const RAPID_CHANNEL_CHANGE = 0b10;
    }
}

/// An owned, refcounted RTP (or stripped-UDP) packet.
///
/// Refcounted because the same arriving datagram may be enqueued into
/// several sinks (spec.md §3 "Packet ... Refcounted because it may be
/// enqueued into several sinks").
#[derive(Clone)]
pub struct Packet(Arc<PacketInner>);

struct PacketInner {
    ext_seq: ExtSeqNum,
    rtp_timestamp: u32,
    arrival: Instant,
    ty: PacketType,
    flags: PacketFlags,
    payload: Bytes,
}

impl Packet {
    pub fn new(
        ext_seq: ExtSeqNum,
        rtp_timestamp: u32,
        arrival: Instant,
        ty: PacketType,
        flags: PacketFlags,
        payload: Bytes,
    ) -> Self {
        Packet(Arc::new(PacketInner {
            ext_seq,
            rtp_timestamp,
            arrival,
            ty,
            flags,
            payload,
        }))
    }

    pub fn ext_seq(&self) -> ExtSeqNum {
        self.0.ext_seq
    }

    pub fn rtp_timestamp(&self) -> u32 {
        self.0.rtp_timestamp
    }

    pub fn arrival(&self) -> Instant {
        self.0.arrival
    }

    pub fn packet_type(&self) -> PacketType {
        self.0.ty
    }

    pub fn flags(&self) -> PacketFlags {
        self.0.flags
    }

    pub fn payload(&self) -> &Bytes {
        &self.0.payload
    }

    pub fn len(&self) -> usize {
        self.0.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.payload.is_empty()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("ext_seq", &self.0.ext_seq)
            .field("rtp_timestamp", &self.0.rtp_timestamp)
            .field("ty", &self.0.ty)
            .field("flags", &self.0.flags)
            .field("payload", &self.0.payload.hex_dump())
            .finish()
    }
}
