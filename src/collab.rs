//! Narrow traits for the external collaborators spec.md §1/§6 name but
//! scopes out of this crate's core: the SDP parser, the DNS/SRV resolver,
//! and STUN/NAT probing. A real caller supplies production
//! implementations; this module ships only the trait boundary plus a
//! trivial in-memory double of each (under [`testing`]) so the
//! channel/graph code can be exercised without pulling in a real
//! resolver or socket.

use std::net::{IpAddr, SocketAddr};

/// A parsed channel description, covering the `a=`/`c=`/`m=` lines
/// spec.md §6 lists: `c=`, `m=audio|video|data/app`, `a=rtpmap`,
/// `a=fmtp`, `a=rtcp-fb`, `a=rtcp-rsize`, `a=source-filter`, and the
/// vendor `a=X-pc-codec`/`a=X-cap`/`a=X-cpar`/`a=ptime` attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SdpDescription {
    pub connection_addr: Option<IpAddr>,
    pub media_port: Option<u16>,
    pub payload_type: Option<u8>,
    pub rtcp_reduced_size: bool,
    /// `a=source-filter` unicast source restriction, if present.
    pub source_filter: Option<IpAddr>,
    /// Opaque vendor attributes (`a=X-*`), keyed by attribute name without
    /// the `X-` prefix; this crate never interprets their values itself.
    pub vendor_attrs: Vec<(String, String)>,
}

/// Parses SDP text describing a channel. A production implementation
/// wraps a real SDP parser; this crate only consumes the result.
pub trait SdpSource: Send + Sync {
    fn parse(&self, sdp: &str) -> Result<SdpDescription, crate::Error>;
}

/// One `_service._proto.domain` SRV answer (RFC 2782).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SrvRecord {
    pub addr: SocketAddr,
    pub priority: u16,
    pub weight: u16,
}

/// DNS/SRV lookups used to locate a channel's repair/RCC server.
pub trait SrvResolver: Send + Sync {
    fn lookup(&self, service: &str, proto: &str, domain: &str) -> Result<Vec<SrvRecord>, crate::Error>;
}

/// STUN-style NAT probing: given a local socket, returns the externally
/// visible mapping (or an error if none could be learned). Spec.md's
/// Non-goals exclude matching the original's NAT wire protocol, so this
/// trait only has the shape a caller's real STUN client would present.
pub trait NatProbe: Send + Sync {
    fn probe(&self, local: SocketAddr) -> Result<SocketAddr, crate::Error>;
}

/// Trivial in-memory collaborator doubles, useful for exercising the
/// channel/graph code in tests without a real resolver or socket.
pub mod testing {
    use super::*;
    use std::collections::HashMap;

    #[derive(Clone, Debug, Default)]
    pub struct StaticSdpSource(pub SdpDescription);

    impl SdpSource for StaticSdpSource {
        fn parse(&self, _sdp: &str) -> Result<SdpDescription, crate::Error> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct StaticSrvResolver(pub HashMap<String, Vec<SrvRecord>>);

    impl SrvResolver for StaticSrvResolver {
        fn lookup(
            &self,
            service: &str,
            proto: &str,
            domain: &str,
        ) -> Result<Vec<SrvRecord>, crate::Error> {
            let key = format!("_{service}._{proto}.{domain}");
            Ok(self.0.get(&key).cloned().unwrap_or_default())
        }
    }

    /// A NAT probe that reports the local address unchanged, as if no NAT
    /// were present.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NoopNatProbe;

    impl NatProbe for NoopNatProbe {
        fn probe(&self, local: SocketAddr) -> Result<SocketAddr, crate::Error> {
            Ok(local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn static_sdp_source_returns_configured_value() {
        let src = StaticSdpSource(SdpDescription {
            media_port: Some(5004),
            ..Default::default()
        });
        let desc = src.parse("v=0\r\n").unwrap();
        assert_eq!(desc.media_port, Some(5004));
    }

    #[test]
    fn static_srv_resolver_keys_by_service_proto_domain() {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "_rtp._udp.example.com".to_owned(),
            vec![SrvRecord {
                addr: "127.0.0.1:5004".parse().unwrap(),
                priority: 0,
                weight: 1,
            }],
        );
        let resolver = StaticSrvResolver(map);
        let records = resolver.lookup("rtp", "udp", "example.com").unwrap();
        assert_eq!(records.len(), 1);
        assert!(resolver.lookup("rtp", "udp", "nowhere").unwrap().is_empty());
    }

    #[test]
    fn noop_nat_probe_is_identity() {
        let probe = NoopNatProbe;
        let local: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        assert_eq!(probe.probe(local).unwrap(), local);
    }
}
