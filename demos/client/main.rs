// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tunes one channel from the command line, joining its primary
//! multicast feed, and prints every packet the tuner hands back. A
//! background thread feeds arrived datagrams into the channel; the main
//! task alternates blocking tuner reads with sending any due RTCP
//! feedback back toward the server.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use log::{info, warn};
use structopt::StructOpt;

use vqec_c::channel::ChannelDescriptor;
use vqec_c::clock::SystemClock;
use vqec_c::config::SysConfig;
use vqec_c::context::{ChannelId, Context};
use vqec_c::graph::StreamType;
use vqec_c::sink::ReadTimeout;
use vqec_c::socket::{McastRecvSocket, UnicastSocket};

#[derive(StructOpt)]
struct Opts {
    /// Multicast group carrying the channel's primary RTP feed.
    #[structopt(long)]
    primary_group: Ipv4Addr,

    /// Local interface to join `primary_group` on.
    #[structopt(long, default_value = "0.0.0.0")]
    iface: Ipv4Addr,

    /// UDP port the primary feed arrives on.
    #[structopt(long)]
    primary_port: u16,

    /// Unicast address to send RTCP feedback (Generic NACK/RR) toward.
    #[structopt(long)]
    rtcp_dst: Option<SocketAddrV4>,

    /// Number of packets to print before exiting; runs forever if unset.
    #[structopt(long)]
    count: Option<usize>,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn main() -> Result<()> {
    init_logging();
    let opts = Opts::from_args();

    let ctx = Arc::new(Context::new(SysConfig::default()));
    let desc = ChannelDescriptor {
        primary: Some(SocketAddrV4::new(opts.primary_group, opts.primary_port)),
        er_enable: opts.rtcp_dst.is_some(),
        ssrc: rand::random(),
        media_ssrc: 0,
        ..Default::default()
    };
    let channel_id = ctx
        .create_channel(desc, Instant::now())
        .context("creating channel")?;

    let recv_sock = McastRecvSocket::join(opts.primary_group, opts.iface, opts.primary_port)
        .context("joining primary multicast group")?;
    let rtcp_sock = opts
        .rtcp_dst
        .map(|_| UnicastSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
        .transpose()
        .context("binding rtcp socket")?;

    {
        let ctx = ctx.clone();
        std::thread::spawn(move || recv_loop(ctx, channel_id, recv_sock));
    }

    let mut printed = 0usize;
    loop {
        if let Some(limit) = opts.count {
            if printed >= limit {
                break;
            }
        }

        let now = Instant::now();
        if let (Some(dst), Some(sock)) = (opts.rtcp_dst, rtcp_sock.as_ref()) {
            match ctx.maybe_build_rtcp_report(channel_id, now) {
                Ok(Some(report)) => {
                    if let Err(e) = sock.send_to(&report, SocketAddr::V4(dst)) {
                        warn!("rtcp send failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("building rtcp report failed: {e}"),
            }
        }

        let packets = ctx.read_channel(
            channel_id,
            16,
            ReadTimeout::After(Duration::from_millis(200)),
            &SystemClock,
        );
        match packets {
            Ok(packets) => {
                for p in packets {
                    info!(
                        "seq={} ts={} len={} flags={:?}",
                        p.ext_seq(),
                        p.rtp_timestamp(),
                        p.len(),
                        p.flags()
                    );
                    printed += 1;
                }
            }
            Err(e) => {
                warn!("tuner read failed: {e}");
                break;
            }
        }
    }

    ctx.destroy_channel(channel_id).ok();
    Ok(())
}

fn recv_loop(ctx: Arc<Context>, channel_id: ChannelId, sock: McastRecvSocket) {
    let mut buf = vec![0u8; 2048];
    loop {
        match sock.try_recv(&mut buf) {
            Ok(Some((n, _from))) => {
                let data = bytes::Bytes::copy_from_slice(&buf[..n]);
                if let Err(e) =
                    ctx.deliver_datagram(channel_id, StreamType::Primary, &data, Instant::now())
                {
                    warn!("dropping datagram: {e}");
                }
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                warn!("recv failed, stopping receive loop: {e}");
                return;
            }
        }
    }
}
