// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client-side repair and rapid-channel-change core for RTP/UDP IPTV.
//!
//! This crate implements the hardest part of a Video Quality Experience
//! (VQE) client: tracking gaps in a primary multicast RTP stream,
//! requesting retransmission over RTCP feedback, joining a channel with a
//! server-supplied random-access-point burst for fast tune-in, and
//! stitching primary multicast, repair unicast and FEC recovery into a
//! single ordered output stream.
//!
//! The generic DNS/SRV resolver, SDP parser, STUN/NAT probing, and the
//! CLI/management surface are outside this crate's scope; see
//! [`collab`] for the narrow traits a caller implements to supply them.

pub mod channel;
pub mod clock;
pub mod collab;
pub mod config;
pub mod context;
pub mod gap_reporter;
pub mod graph;
pub mod idmap;
pub mod packet;
pub mod pcm;
pub mod rtcp;
pub mod rtp;
pub mod seq;
pub mod sink;
pub mod socket;
pub mod token_bucket;
pub mod tsrap;
pub mod tuner;

/// Error type returned by all fallible operations in this crate.
///
/// Like most errors in a large system, the common case is "log this and
/// move on"; [`Error`] is intentionally small (a single boxed pointer) so
/// that `Result<T, Error>` is cheap to return even from hot paths such as
/// [`pcm::Pcm::insert`].
#[derive(Clone)]
pub struct Error(Box<ErrorInt>);

impl Error {
    /// Returns the channel this error pertains to, if any.
    pub fn channel_ctx(&self) -> Option<&ChannelContext> {
        self.0.channel_ctx()
    }

    #[doc(hidden)]
    pub fn into_inner(self) -> ErrorInt {
        *self.0
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&*self.0)
    }
}

/// Context identifying which channel/graph an error happened on, when
/// applicable. Analogous to `retina`'s `ConnectionContext`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelContext {
    pub graph_id: Option<graph::GraphId>,
}

/// The full error taxonomy of spec.md §7, one variant per table row (plus
/// the per-kind breakdowns the table's "ParseError" and "Internal" rows
/// call for).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ErrorInt {
    #[error("invalid arguments: {description}")]
    InvalidArgs { description: String },

    #[error("no such tuner")]
    NoSuchTuner,

    #[error("no such stream")]
    NoSuchStream,

    #[error("no such source (sequence-space owner changed)")]
    NoSuchSource,

    #[error("no memory available ({pool} pool exhausted)")]
    NoMem { pool: &'static str },

    #[error("module has been shut down")]
    Shutdown,

    #[error("service shut down; packet dropped")]
    ServiceShutdown,

    #[error("graph connect failed: {description}")]
    GraphConnect {
        ctx: ChannelContext,
        description: String,
    },

    #[error("insufficient tokens in repair policer")]
    InsufficientTokens,

    #[error("parse error ({kind:?}): {description}")]
    ParseError {
        kind: ParseErrorKind,
        description: String,
    },

    #[error("internal error: {description}")]
    Internal {
        ctx: ChannelContext,
        description: String,
    },
}

impl ErrorInt {
    fn channel_ctx(&self) -> Option<&ChannelContext> {
        match self {
            ErrorInt::GraphConnect { ctx, .. } | ErrorInt::Internal { ctx, .. } => Some(ctx),
            _ => None,
        }
    }
}

/// Sub-kinds of [`ErrorInt::ParseError`], so callers/stats can bucket
/// malformed input by protocol the way spec.md §7 requires ("drop packet;
/// count per-kind").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    Rtp,
    Rtcp,
    Tlv,
}

/// Constructs an [`Error`] without returning it. Mirrors `retina`'s
/// `wrap!` macro (see `src/client/rtp.rs`).
macro_rules! wrap {
    ($e:expr) => {
        crate::Error(Box::new($e))
    };
}
pub(crate) use wrap;

/// Constructs an [`Error`] and returns it from the current function.
/// Mirrors `retina`'s `bail!` macro.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::wrap!($e))
    };
}
pub(crate) use bail;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_description() {
        let e = wrap!(ErrorInt::InvalidArgs {
            description: "count must be nonzero".to_owned()
        });
        assert!(e.to_string().contains("count must be nonzero"));
    }
}
