//! BSD-shaped address handling (spec §4.4, §6 "wire compatibility").
//!
//! `no-std-net`'s `SocketAddr` already has the fixed, family-tagged layout
//! the spec requires (`AddrFamily` plus a v4/v6 payload); we reuse it rather
//! than hand-rolling a `sockaddr` clone.

pub use no_std_net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Protocol family a socket was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &SocketAddr) -> Family {
        match addr {
            SocketAddr::V4(_) => Family::V4,
            SocketAddr::V6(_) => Family::V6,
        }
    }

    pub fn matches(&self, addr: &SocketAddr) -> bool {
        *self == Family::of(addr)
    }
}

/// True if `addr`'s IP is the unspecified ("wildcard") address, i.e. the
/// caller asked this layer to pick one for them (spec §4.4 step 4).
pub fn is_wildcard(addr: &SocketAddr) -> bool {
    addr.ip().is_unspecified()
}

/// True if `addr`'s IP is a multicast group address (spec §4.6 step 3:
/// multicast destinations force the multicast TTL/hop-limit).
pub fn is_multicast(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_multicast(),
        IpAddr::V6(ip) => ip.is_multicast(),
    }
}

/// Rebuild `addr` with a different port, keeping its IP and family.
pub fn with_port(addr: SocketAddr, port: u16) -> SocketAddr {
    match addr {
        SocketAddr::V4(a) => SocketAddr::V4(SocketAddrV4::new(*a.ip(), port)),
        SocketAddr::V6(a) => SocketAddr::V6(SocketAddrV6::new(*a.ip(), port, a.flowinfo(), a.scope_id())),
    }
}

/// The 4-tuple (or 2-tuple, for a half connection) a connection-table entry
/// is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
}

impl Tuple {
    pub fn half(local: SocketAddr) -> Self {
        Tuple {
            local,
            remote: None,
        }
    }

    pub fn full(local: SocketAddr, remote: SocketAddr) -> Self {
        Tuple {
            local,
            remote: Some(remote),
        }
    }

    /// Full match: both local and remote tuples are equal.
    pub fn is_full_match(&self, other: &Tuple) -> bool {
        self.local == other.local && self.remote == other.remote
    }

    /// Half match: local tuples equal, independent of remote.
    pub fn is_half_match(&self, other: &Tuple) -> bool {
        self.local == other.local
    }
}
