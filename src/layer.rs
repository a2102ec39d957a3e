//! The socket layer itself: global state, lock discipline, lifecycle, and
//! the northbound callbacks other stack layers invoke (spec §5, §6).

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::addr::{Family, SocketAddr};
use crate::conn_table::{ConnId, ConnTable, Protocol};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::{Flags, Pool, PoolStats, Proto, SockType, SocketHandle};
use crate::select::SelEvent;
use crate::transport::Transports;

/// `proto` argument to [`SocketLayer::open`] (spec §6 `open`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoHint {
    Udp,
    Tcp,
    Default,
}

/// Flags accepted by a single `rx`/`tx` call (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallFlags {
    pub peek: bool,
    pub no_block: bool,
}

/// `cfg_block` mode (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Default,
    Block,
    NoBlock,
}

/// Everything guarded by the global network lock (spec §5 `NET_LOCK`).
pub(crate) struct Inner {
    pub pool: Pool,
    pub conns: ConnTable,
    pub transports: Transports,
}

/// The socket layer: a fixed socket table plus the operations that read and
/// mutate it, all serialized through one global lock (spec §5).
pub struct SocketLayer {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) cfg: Config,
    port_cursor: Mutex<u16>,
    next_sel_id: std::sync::atomic::AtomicU64,
}

impl SocketLayer {
    pub fn new(transports: Transports) -> Self {
        Self::with_config(transports, Config::default())
    }

    pub fn with_config(transports: Transports, cfg: Config) -> Self {
        let seed = rand::thread_rng().gen_range(crate::config::EPHEMERAL_PORT_MIN..=crate::config::EPHEMERAL_PORT_MAX);
        SocketLayer {
            inner: Mutex::new(Inner {
                pool: Pool::new(),
                conns: ConnTable::new(),
                transports,
            }),
            cfg,
            port_cursor: Mutex::new(seed),
            next_sel_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub(crate) fn next_sel_id(&self) -> u64 {
        self.next_sel_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// `open(family, type, proto)` (spec §6, §4.4 "default-proto inference").
    pub fn open(
        &self,
        family: Family,
        sock_type: SockType,
        proto: ProtoHint,
    ) -> Result<SocketHandle> {
        let proto = match (sock_type, proto) {
            (_, ProtoHint::Udp) => Proto::Udp,
            (_, ProtoHint::Tcp) => Proto::Tcp,
            (SockType::Datagram, ProtoHint::Default) => Proto::Udp,
            (SockType::Stream, ProtoHint::Default) => Proto::Tcp,
        };
        if (sock_type == SockType::Datagram) != (proto == Proto::Udp) {
            return Err(Error::InvalidType);
        }
        let mut g = self.inner.lock().unwrap();
        let handle = g.pool.alloc(family, sock_type, proto, &self.cfg)?;
        log::debug!("open: {:?} {:?}/{:?} -> {:?}", family, sock_type, proto, handle);
        Ok(handle)
    }

    pub fn pool_stat_get(&self) -> PoolStats {
        self.inner.lock().unwrap().pool.stats()
    }

    pub fn pool_stat_reset_max_used(&self) {
        self.inner.lock().unwrap().pool.reset_max_used()
    }

    pub fn cfg_block(&self, handle: SocketHandle, mode: BlockMode) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        match mode {
            BlockMode::Block => rec.flags.remove(Flags::NO_BLOCK),
            BlockMode::NoBlock => rec.flags.insert(Flags::NO_BLOCK),
            BlockMode::Default => rec.flags.remove(Flags::NO_BLOCK),
        }
        Ok(())
    }

    pub fn block_get(&self, handle: SocketHandle) -> Result<bool> {
        let g = self.inner.lock().unwrap();
        Ok(g.pool.get(handle)?.flags.contains(Flags::NO_BLOCK))
    }

    pub fn cfg_if(&self, handle: SocketHandle, if_nbr: Option<u8>) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        g.pool.get_mut(handle)?.if_nbr = if_nbr;
        Ok(())
    }

    pub fn cfg_rx_q_size(&self, handle: SocketHandle, size: usize) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        rec.rx_q_size_cfgd = size;
        if let Some(conn) = rec.conn_id {
            let tx = rec.tx_q_size_cfgd;
            g.transports.stream.set_rx_tx_window(conn, size, tx);
        }
        Ok(())
    }

    pub fn cfg_tx_q_size(&self, handle: SocketHandle, size: usize) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        rec.tx_q_size_cfgd = size;
        if let Some(conn) = rec.conn_id {
            let rx = rec.rx_q_size_cfgd;
            g.transports.stream.set_rx_tx_window(conn, rx, size);
        }
        Ok(())
    }

    /// Per-listener fan-out cap (spec §3, §9: the source's
    /// `cfg_conn_child_q_size_set` returns failure on its success path; we
    /// do not replicate that bug, per spec §9's explicit instruction).
    pub fn cfg_conn_child_q_size_set(&self, handle: SocketHandle, max: usize) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        let listener = rec.listener.as_mut().ok_or(Error::InvalidType)?;
        listener.child_q_size_max = max;
        Ok(())
    }

    pub fn cfg_conn_child_q_size_get(&self, handle: SocketHandle) -> Result<usize> {
        let g = self.inner.lock().unwrap();
        let rec = g.pool.get(handle)?;
        Ok(rec.listener.as_ref().ok_or(Error::InvalidType)?.child_q_size_max)
    }

    pub fn cfg_secure(&self, handle: SocketHandle, on: bool) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        if rec.sock_type != SockType::Stream {
            return Err(Error::InvalidType);
        }
        if !matches!(rec.state, crate::pool::State::Closed | crate::pool::State::Bound) {
            return Err(Error::InvalidState);
        }
        rec.flags.set(Flags::SECURE, on);
        Ok(())
    }

    pub fn cfg_timeout_rxq_set(&self, handle: SocketHandle, timeout: Option<Duration>) -> Result<()> {
        self.inner.lock().unwrap().pool.get(handle)?.waits.rx_q.set_timeout(timeout);
        Ok(())
    }
    pub fn cfg_timeout_rxq_get_ms(&self, handle: SocketHandle) -> Result<Option<Duration>> {
        Ok(self.inner.lock().unwrap().pool.get(handle)?.waits.rx_q.timeout())
    }
    pub fn cfg_timeout_rxq_dflt(&self) -> Option<Duration> {
        self.cfg.timeout_rx_q
    }

    pub fn cfg_timeout_conn_req_set(&self, handle: SocketHandle, timeout: Option<Duration>) -> Result<()> {
        self.inner.lock().unwrap().pool.get(handle)?.waits.conn_req.set_timeout(timeout);
        Ok(())
    }
    pub fn cfg_timeout_conn_req_get_ms(&self, handle: SocketHandle) -> Result<Option<Duration>> {
        Ok(self.inner.lock().unwrap().pool.get(handle)?.waits.conn_req.timeout())
    }
    pub fn cfg_timeout_conn_req_dflt(&self) -> Option<Duration> {
        self.cfg.timeout_conn_req
    }

    pub fn cfg_timeout_conn_accept_set(&self, handle: SocketHandle, timeout: Option<Duration>) -> Result<()> {
        self.inner.lock().unwrap().pool.get(handle)?.waits.accept_q.set_timeout(timeout);
        Ok(())
    }
    pub fn cfg_timeout_conn_accept_get_ms(&self, handle: SocketHandle) -> Result<Option<Duration>> {
        Ok(self.inner.lock().unwrap().pool.get(handle)?.waits.accept_q.timeout())
    }
    pub fn cfg_timeout_conn_accept_dflt(&self) -> Option<Duration> {
        self.cfg.timeout_conn_accept
    }

    pub fn cfg_timeout_conn_close_set(&self, handle: SocketHandle, timeout: Option<Duration>) -> Result<()> {
        self.inner.lock().unwrap().pool.get(handle)?.waits.conn_close.set_timeout(timeout);
        Ok(())
    }
    pub fn cfg_timeout_conn_close_get_ms(&self, handle: SocketHandle) -> Result<Option<Duration>> {
        Ok(self.inner.lock().unwrap().pool.get(handle)?.waits.conn_close.timeout())
    }
    pub fn cfg_timeout_conn_close_dflt(&self) -> Option<Duration> {
        self.cfg.timeout_conn_close
    }

    pub fn is_conn(&self, handle: SocketHandle) -> Result<bool> {
        let g = self.inner.lock().unwrap();
        Ok(matches!(g.pool.get(handle)?.state, crate::pool::State::Conn))
    }

    pub fn get_conn_transport_id(&self, handle: SocketHandle) -> Result<Option<ConnId>> {
        Ok(self.inner.lock().unwrap().pool.get(handle)?.conn_id)
    }

    pub fn get_local_ip_addr(&self, handle: SocketHandle) -> Result<Option<SocketAddr>> {
        Ok(self.inner.lock().unwrap().pool.get(handle)?.local_addr)
    }

    /// Ephemeral port search (spec §4.4 step 3, §9 "Random-port search"):
    /// a bounded linear scan from a persistent, randomly seeded cursor.
    pub(crate) fn alloc_ephemeral_port(&self, conns: &ConnTable, family: Family, proto: Protocol) -> Result<u16> {
        use crate::config::{EPHEMERAL_PORT_MIN, EPHEMERAL_PORT_MAX};
        let span = (EPHEMERAL_PORT_MAX - EPHEMERAL_PORT_MIN) as u32 + 1;
        let mut cursor = self.port_cursor.lock().unwrap();
        for _ in 0..span {
            let port = *cursor;
            *cursor = if *cursor == EPHEMERAL_PORT_MAX {
                EPHEMERAL_PORT_MIN
            } else {
                *cursor + 1
            };
            if !conns.port_in_use(proto, family, port) {
                return Ok(port);
            }
        }
        Err(Error::PoolEmpty)
    }

    /// Post a select event to a socket's registered waiters, by handle
    /// (spec §4.7 "Per-event posting").
    pub(crate) fn post_sel(g: &Inner, handle: SocketHandle, event: SelEvent) {
        if let Ok(rec) = g.pool.get(handle) {
            crate::select::post_event(&rec.sel_list, event);
        }
    }
}
