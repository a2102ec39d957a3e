//! Socket layer for a host-based embedded TCP/IP stack.
//!
//! A fixed-capacity socket table (spec §4.1 C1) serialized through one
//! global lock (spec §5), with per-socket wait objects (§4.2 C2), a receive
//! demultiplexer (§4.3 C3), BSD-style bind/connect/listen/accept/close
//! (§4.4/§4.5 C4/C5), data transfer (§4.6 C6), a `select`-style readiness
//! multiplexer (§4.7 C7) and a socket option interface (§4.8 C8).
//!
//! The blocking/select surface lives directly on [`SocketLayer`]; the
//! `embedded-nal` trait impls in `nal` layer a non-blocking `nb`-style API
//! on top of it for callers that want the ecosystem's standard embedded
//! network-stack interface instead.

mod addr;
mod bind;
mod config;
mod conn;
mod conn_table;
mod demux;
mod error;
mod layer;
mod nal;
mod opt;
mod pool;
mod select;
mod select_api;
mod transfer;
pub mod transport;
mod wait;

pub use addr::{Family, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, Tuple};
pub use config::Config;
pub use conn_table::{ConnId, Protocol};
pub use error::{Error, Result};
pub use layer::{BlockMode, CallFlags, ProtoHint, SocketLayer};
pub use opt::{Level, Name, Value};
pub use pool::{PoolStats, Proto, SockType, SocketHandle, State};
pub use select::Interest;
pub use select_api::Ready;
pub use transfer::Received;
pub use transport::{DatagramEngine, IpLayer, KeepAlive, StreamEngine, Transports};
