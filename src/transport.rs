//! Southbound collaborators (spec §1 "out of scope", §6 "Southbound
//! requirements"): the TCP engine, the UDP engine, and the IP layer. The
//! socket layer reaches all three only through the trait objects below;
//! none of segment retransmission, checksums, fragmentation or routing is
//! reimplemented here.

use crate::addr::SocketAddr;
use crate::conn_table::{ConnId, IpTxParams};
use crate::error::Result;

/// Keep-alive knobs the option interface (spec §4.8, level `TCP`) can set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepAlive {
    pub enabled: bool,
    pub idle_secs: u32,
    pub interval_secs: u32,
    pub count: u32,
}

/// The TCP engine's interface, as spec §6 lists it: conn get/free/is-used,
/// set-listen, tx-conn-req(-close), rx/tx app data, rx/tx timeout and
/// window cfg, Nagle, keep-alive, readiness predicates, accept signal.
pub trait StreamEngine: Send {
    /// Register engine-side state for a connection the network-connection
    /// table already allocated an id for (the table is the single id space,
    /// spec glossary "conn_id").
    fn alloc(&mut self, conn: ConnId);
    fn free(&mut self, conn: ConnId);

    /// Active open (spec §4.5 "Stream connect" step 3). Completion is
    /// reported asynchronously through the northbound
    /// [`crate::layer::SocketLayer::conn_signal_req`] callback, exactly as
    /// spec §6 describes it — this call only has to *issue* the request.
    fn tx_conn_req(&mut self, conn: ConnId, local: SocketAddr, remote: SocketAddr);

    /// Passive open (spec §4.5 "Listen").
    fn set_listen(&mut self, conn: ConnId, local: SocketAddr, backlog: usize);

    /// Request a FIN (spec §4.5 "Close").
    fn tx_conn_req_close(&mut self, conn: ConnId);

    fn set_rx_tx_window(&mut self, conn: ConnId, rx_window: usize, tx_window: usize);
    fn set_nagle(&mut self, conn: ConnId, enabled: bool);
    fn set_keepalive(&mut self, conn: ConnId, cfg: KeepAlive);

    /// Transmit application data (spec §4.6 "Stream send").
    fn tx_app_data(&mut self, conn: ConnId, data: &[u8], block: bool) -> Result<usize>;
    /// Receive application data (spec §4.6 "Stream receive"). `Ok(0))`
    /// with `rx_closed = true` signals `NET_CONN_CLOSE_RX`.
    fn rx_app_data(
        &mut self,
        conn: ConnId,
        buf: &mut [u8],
        peek: bool,
        block: bool,
    ) -> Result<(usize, bool)>;

    fn is_tx_ready(&self, conn: ConnId) -> bool;
    fn is_rx_available(&self, conn: ConnId) -> bool;

    /// Notify the engine that the connection has been handed to the app
    /// (spec §4.5 "Accept" step 5): it may now open its initial window.
    fn conn_app_accept_rdy_signal(&mut self, conn: ConnId);
}

/// The UDP engine's interface (spec §6): rx-app-data, tx-app-data-handler
/// for v4/v6.
pub trait DatagramEngine: Send {
    fn tx(
        &mut self,
        src: SocketAddr,
        dst: SocketAddr,
        data: &[u8],
        ip_tx: IpTxParams,
        block: bool,
    ) -> Result<usize>;
}

/// The IP layer's interface (spec §6): host-address enumeration,
/// source-address selection, wildcard/multicast predicates.
pub trait IpLayer: Send {
    /// Resolve the wildcard address on `if_nbr` (or the default interface if
    /// `None`) to a concrete host address (spec §4.4 step 4).
    fn default_host_addr(&self, if_nbr: Option<u8>, family: crate::addr::Family) -> Option<SocketAddr>;
    /// Is `addr` locally hosted on some interface? Returns the interface
    /// number if so (spec §4.4 step 4).
    fn locally_hosted(&self, addr: &SocketAddr) -> Option<u8>;
    /// Pick a source address for `dest` (spec §4.5 step 2, §4.6 step 3).
    fn select_source(&self, dest: &SocketAddr) -> Option<SocketAddr>;
}

/// The bundle of southbound collaborators a [`crate::layer::SocketLayer`]
/// is constructed with.
pub struct Transports {
    pub stream: Box<dyn StreamEngine>,
    pub datagram: Box<dyn DatagramEngine>,
    pub ip: Box<dyn IpLayer>,
}

/// An in-memory reference implementation of all three southbound traits,
/// sufficient to exercise the socket layer end to end in tests without a
/// real TCP/IP stack underneath (spec's scenarios in §8 assume *some*
/// transport moves bytes; this is the stand-in).
pub mod mock {
    use super::*;
    use crate::conn_table::IpTxParams;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct StreamConn {
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        tx: VecDeque<u8>,
        rx: VecDeque<u8>,
        listening: bool,
        backlog: usize,
        rx_window: usize,
        tx_window: usize,
        /// Set by [`LoopbackStreamEngine::close_rx`] to simulate a peer FIN:
        /// `rx_app_data` reports `rx_closed` once the buffered bytes drain.
        rx_closed: bool,
    }

    /// A loopback stream/datagram engine: data written to one conn id is
    /// visible for test assertions directly, and `connect_pair`/`accept_one`
    /// helpers let a test script the handshake callbacks a real TCP engine
    /// would otherwise drive asynchronously.
    #[derive(Default)]
    pub struct LoopbackStreamEngine {
        conns: HashMap<u32, StreamConn>,
    }

    impl LoopbackStreamEngine {
        pub fn new() -> Self {
            Self::default()
        }

        /// Test hook: directly deliver bytes into a connection's rx buffer,
        /// as if the peer had sent them.
        pub fn deliver(&mut self, conn: ConnId, data: &[u8]) {
            if let Some(c) = self.conns.get_mut(&conn.0) {
                c.rx.extend(data.iter().copied());
            }
        }

        /// Test hook: simulate a peer FIN. `rx_app_data` reports `rx_closed`
        /// once the buffered bytes (if any) have drained.
        pub fn close_rx(&mut self, conn: ConnId) {
            if let Some(c) = self.conns.get_mut(&conn.0) {
                c.rx_closed = true;
            }
        }
    }

    impl StreamEngine for LoopbackStreamEngine {
        fn alloc(&mut self, conn: ConnId) {
            self.conns.insert(conn.0, StreamConn::default());
        }

        fn free(&mut self, conn: ConnId) {
            self.conns.remove(&conn.0);
        }

        fn tx_conn_req(&mut self, conn: ConnId, local: SocketAddr, remote: SocketAddr) {
            if let Some(c) = self.conns.get_mut(&conn.0) {
                c.local = Some(local);
                c.remote = Some(remote);
            }
        }

        fn set_listen(&mut self, conn: ConnId, local: SocketAddr, backlog: usize) {
            if let Some(c) = self.conns.get_mut(&conn.0) {
                c.local = Some(local);
                c.listening = true;
                c.backlog = backlog;
            }
        }

        fn tx_conn_req_close(&mut self, conn: ConnId) {
            self.conns.remove(&conn.0);
        }

        fn set_rx_tx_window(&mut self, conn: ConnId, rx_window: usize, tx_window: usize) {
            if let Some(c) = self.conns.get_mut(&conn.0) {
                c.rx_window = rx_window;
                c.tx_window = tx_window;
            }
        }

        fn set_nagle(&mut self, _conn: ConnId, _enabled: bool) {}
        fn set_keepalive(&mut self, _conn: ConnId, _cfg: KeepAlive) {}

        fn tx_app_data(&mut self, conn: ConnId, data: &[u8], _block: bool) -> Result<usize> {
            let c = self
                .conns
                .get_mut(&conn.0)
                .ok_or(crate::error::Error::InvalidConn)?;
            c.tx.extend(data.iter().copied());
            Ok(data.len())
        }

        fn rx_app_data(
            &mut self,
            conn: ConnId,
            buf: &mut [u8],
            peek: bool,
            _block: bool,
        ) -> Result<(usize, bool)> {
            let c = self
                .conns
                .get_mut(&conn.0)
                .ok_or(crate::error::Error::InvalidConn)?;
            let n = c.rx.len().min(buf.len());
            for (i, slot) in buf.iter_mut().take(n).enumerate() {
                *slot = c.rx[i];
            }
            if !peek {
                c.rx.drain(..n);
            }
            let rx_closed = c.rx_closed && c.rx.is_empty();
            Ok((n, rx_closed))
        }

        fn is_tx_ready(&self, conn: ConnId) -> bool {
            self.conns.contains_key(&conn.0)
        }

        fn is_rx_available(&self, conn: ConnId) -> bool {
            self.conns.get(&conn.0).map(|c| !c.rx.is_empty()).unwrap_or(false)
        }

        fn conn_app_accept_rdy_signal(&mut self, _conn: ConnId) {}
    }

    #[derive(Default)]
    pub struct LoopbackDatagramEngine {
        pub sent: Vec<(SocketAddr, SocketAddr, Vec<u8>)>,
    }

    impl LoopbackDatagramEngine {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl DatagramEngine for LoopbackDatagramEngine {
        fn tx(
            &mut self,
            src: SocketAddr,
            dst: SocketAddr,
            data: &[u8],
            _ip_tx: IpTxParams,
            _block: bool,
        ) -> Result<usize> {
            self.sent.push((src, dst, data.to_vec()));
            Ok(data.len())
        }
    }

    pub struct LoopbackIpLayer {
        pub default_v4: SocketAddr,
        pub default_v6: SocketAddr,
    }

    impl Default for LoopbackIpLayer {
        fn default() -> Self {
            use crate::addr::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
            LoopbackIpLayer {
                default_v4: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0)),
                default_v6: SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::localhost(), 0, 0, 0)),
            }
        }
    }

    impl IpLayer for LoopbackIpLayer {
        fn default_host_addr(
            &self,
            _if_nbr: Option<u8>,
            family: crate::addr::Family,
        ) -> Option<SocketAddr> {
            Some(match family {
                crate::addr::Family::V4 => self.default_v4,
                crate::addr::Family::V6 => self.default_v6,
            })
        }

        fn locally_hosted(&self, _addr: &SocketAddr) -> Option<u8> {
            Some(0)
        }

        fn select_source(&self, dest: &SocketAddr) -> Option<SocketAddr> {
            Some(match dest {
                SocketAddr::V4(_) => self.default_v4,
                SocketAddr::V6(_) => self.default_v6,
            })
        }
    }

    pub fn transports() -> Transports {
        Transports {
            stream: Box::new(LoopbackStreamEngine::new()),
            datagram: Box::new(LoopbackDatagramEngine::new()),
            ip: Box::new(LoopbackIpLayer::default()),
        }
    }

    /// A handle onto the `LoopbackStreamEngine` backing a [`Transports`]
    /// bundle, so a test can call its `deliver`/`close_rx` hooks from
    /// outside the socket layer, the way a real TCP engine would post data
    /// and a FIN asynchronously from its own thread.
    #[derive(Clone, Default)]
    pub struct SharedStreamEngine(std::sync::Arc<std::sync::Mutex<LoopbackStreamEngine>>);

    impl SharedStreamEngine {
        pub fn deliver(&self, conn: ConnId, data: &[u8]) {
            self.0.lock().unwrap().deliver(conn, data);
        }

        pub fn close_rx(&self, conn: ConnId) {
            self.0.lock().unwrap().close_rx(conn);
        }
    }

    impl StreamEngine for SharedStreamEngine {
        fn alloc(&mut self, conn: ConnId) {
            self.0.lock().unwrap().alloc(conn)
        }
        fn free(&mut self, conn: ConnId) {
            self.0.lock().unwrap().free(conn)
        }
        fn tx_conn_req(&mut self, conn: ConnId, local: SocketAddr, remote: SocketAddr) {
            self.0.lock().unwrap().tx_conn_req(conn, local, remote)
        }
        fn set_listen(&mut self, conn: ConnId, local: SocketAddr, backlog: usize) {
            self.0.lock().unwrap().set_listen(conn, local, backlog)
        }
        fn tx_conn_req_close(&mut self, conn: ConnId) {
            self.0.lock().unwrap().tx_conn_req_close(conn)
        }
        fn set_rx_tx_window(&mut self, conn: ConnId, rx_window: usize, tx_window: usize) {
            self.0.lock().unwrap().set_rx_tx_window(conn, rx_window, tx_window)
        }
        fn set_nagle(&mut self, conn: ConnId, enabled: bool) {
            self.0.lock().unwrap().set_nagle(conn, enabled)
        }
        fn set_keepalive(&mut self, conn: ConnId, cfg: KeepAlive) {
            self.0.lock().unwrap().set_keepalive(conn, cfg)
        }
        fn tx_app_data(&mut self, conn: ConnId, data: &[u8], block: bool) -> Result<usize> {
            self.0.lock().unwrap().tx_app_data(conn, data, block)
        }
        fn rx_app_data(
            &mut self,
            conn: ConnId,
            buf: &mut [u8],
            peek: bool,
            block: bool,
        ) -> Result<(usize, bool)> {
            self.0.lock().unwrap().rx_app_data(conn, buf, peek, block)
        }
        fn is_tx_ready(&self, conn: ConnId) -> bool {
            self.0.lock().unwrap().is_tx_ready(conn)
        }
        fn is_rx_available(&self, conn: ConnId) -> bool {
            self.0.lock().unwrap().is_rx_available(conn)
        }
        fn conn_app_accept_rdy_signal(&mut self, conn: ConnId) {
            self.0.lock().unwrap().conn_app_accept_rdy_signal(conn)
        }
    }

    /// Like [`transports`], but returns a [`SharedStreamEngine`] handle
    /// alongside the bundle so a test can drive the stream engine's
    /// `deliver`/`close_rx` hooks directly.
    pub fn transports_with_shared_stream() -> (Transports, SharedStreamEngine) {
        let shared = SharedStreamEngine::default();
        let transports = Transports {
            stream: Box::new(shared.clone()),
            datagram: Box::new(LoopbackDatagramEngine::new()),
            ip: Box::new(LoopbackIpLayer::default()),
        };
        (transports, shared)
    }
}
