//! Ties a [`SysConfig`], [`GraphRegistry`], [`TunerTable`] and channel
//! registry into one explicit handle, per Design Note "Global mutable
//! state" in spec.md §9: the original C keeps these as process-wide
//! globals (`vqec_dp_graph.c`'s module-level graph table, the output
//! shim's tuner table); here a test harness builds as many independent
//! [`Context`]s as it needs without a process restart.

use std::time::Instant;

use bytes::Bytes;

use crate::channel::{Channel, ChannelDescriptor};
use crate::clock::Clock;
use crate::config::SysConfig;
use crate::graph::{GraphRegistry, StreamType};
use crate::idmap::{Handle, IdMap};
use crate::packet::Packet;
use crate::sink::ReadTimeout;
use crate::tuner::TunerTable;
use crate::{Error, ErrorInt};

pub type ChannelId = Handle<Channel>;

/// One independent instance of this crate's state: configuration plus
/// the graph/tuner/channel registries it owns.
pub struct Context {
    config: SysConfig,
    graphs: GraphRegistry,
    tuners: TunerTable,
    channels: parking_lot::Mutex<IdMap<Channel>>,
}

impl Context {
    pub fn new(config: SysConfig) -> Self {
        Context {
            config,
            graphs: GraphRegistry::new(),
            tuners: TunerTable::new(),
            channels: parking_lot::Mutex::new(IdMap::new()),
        }
    }

    pub fn config(&self) -> &SysConfig {
        &self.config
    }

    /// Creates a tuner and a channel wired to it, registering both under
    /// this context. Tears down the tuner if channel creation fails.
    pub fn create_channel(&self, desc: ChannelDescriptor, now: Instant) -> Result<ChannelId, Error> {
        let tid = self.tuners.create(self.config.sink_capacity);
        match Channel::create(&self.graphs, &self.tuners, &self.config, desc, tid, now) {
            Ok(channel) => Ok(self.channels.lock().insert(channel)),
            Err(e) => {
                self.tuners.destroy(tid);
                Err(e)
            }
        }
    }

    pub fn destroy_channel(&self, id: ChannelId) -> Result<(), Error> {
        let channel = self
            .channels
            .lock()
            .remove(id)
            .ok_or_else(|| crate::wrap!(ErrorInt::NoSuchTuner))?;
        let tid = channel.tuner_id();
        channel.destroy(&self.graphs, &self.tuners, tid);
        Ok(())
    }

    pub fn with_channel<R>(&self, id: ChannelId, f: impl FnOnce(&Channel) -> R) -> Result<R, Error> {
        let channels = self.channels.lock();
        let channel = channels.get(id).ok_or_else(|| {
            crate::wrap!(ErrorInt::InvalidArgs {
                description: "no such channel".to_owned(),
            })
        })?;
        Ok(f(channel))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn deliver_datagram(
        &self,
        id: ChannelId,
        ty: StreamType,
        data: &Bytes,
        now: Instant,
    ) -> Result<(), Error> {
        self.with_channel(id, |c| c.deliver_datagram(ty, data, now))?
    }

    /// Same as [`Context::deliver_datagram`], but also passes the
    /// datagram's sending address, so unicast repair traffic can be
    /// checked against the channel's configured repair source.
    pub fn deliver_datagram_from(
        &self,
        id: ChannelId,
        ty: StreamType,
        from: Option<std::net::SocketAddr>,
        data: &Bytes,
        now: Instant,
    ) -> Result<(), Error> {
        self.with_channel(id, |c| c.deliver_datagram_from(ty, from, data, now))?
    }

    pub fn maybe_build_rtcp_report(&self, id: ChannelId, now: Instant) -> Result<Option<Bytes>, Error> {
        self.with_channel(id, |c| c.maybe_build_rtcp_report(&self.config, now))
    }

    /// Reads up to `max` ready packets from `id`'s tuner, per
    /// [`TunerTable::read`].
    pub fn read_channel(
        &self,
        id: ChannelId,
        max: usize,
        timeout: ReadTimeout,
        clock: &dyn Clock,
    ) -> Result<Vec<Packet>, Error> {
        let tid = self.with_channel(id, |c| c.tuner_id())?;
        self.tuners.read(tid, max, timeout, &self.config, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn desc() -> ChannelDescriptor {
        ChannelDescriptor {
            primary: Some(SocketAddrV4::new(Ipv4Addr::new(239, 1, 1, 1), 5004)),
            ..Default::default()
        }
    }

    #[test]
    fn create_and_destroy_channel_round_trip() {
        let ctx = Context::new(SysConfig::default());
        let now = Instant::now();
        let id = ctx.create_channel(desc(), now).unwrap();
        assert_eq!(ctx.channel_count(), 1);
        ctx.destroy_channel(id).unwrap();
        assert_eq!(ctx.channel_count(), 0);
    }

    #[test]
    fn independent_contexts_do_not_share_state() {
        let a = Context::new(SysConfig::default());
        let b = Context::new(SysConfig::default());
        let now = Instant::now();
        a.create_channel(desc(), now).unwrap();
        assert_eq!(a.channel_count(), 1);
        assert_eq!(b.channel_count(), 0);
    }

    #[test]
    fn destroying_unknown_channel_is_an_error() {
        let ctx = Context::new(SysConfig::default());
        let stray_id = {
            let ctx2 = Context::new(SysConfig::default());
            ctx2.create_channel(desc(), Instant::now()).unwrap()
        };
        assert!(ctx.destroy_channel(stray_id).is_err());
    }

    #[test]
    fn deliver_and_read_round_trip_through_context() {
        let ctx = Context::new(SysConfig::default());
        let now = Instant::now();
        let id = ctx.create_channel(desc(), now).unwrap();

        let mut buf = vec![0x80u8, 96, 0, 100];
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0xAABBu32.to_be_bytes());
        buf.extend_from_slice(b"hi");
        ctx.deliver_datagram(id, StreamType::Primary, &Bytes::from(buf), now)
            .unwrap();

        let got = ctx
            .read_channel(id, 10, ReadTimeout::NonBlocking, &crate::clock::SystemClock)
            .unwrap();
        assert_eq!(got.len(), 1);
    }
}
