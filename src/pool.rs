//! Socket record & pool (spec §3 data model, §4.1 C1).
//!
//! The teacher's `set.rs` already gives the shape worth keeping: a
//! fixed-capacity `heapless::Vec<Option<Socket>, N>` and a dense integer
//! [`SocketHandle`]. We generalize it from "one struct per protocol,
//! downcast through `AnySocket`" to a single record with a tagged body
//! (spec §9 "Tagged variants, not sub-types... model this as a tagged enum
//! at record level and dispatch by match").

use std::collections::VecDeque;

use crate::addr::{Family, SocketAddr};
use crate::conn_table::ConnId;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::wait::WaitSet;

/// A dense integer handle, stable for the life of the table entry (spec
/// glossary "sock_id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SocketHandle(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    Datagram,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Udp,
    Tcp,
}

bitflags::bitflags! {
    /// Socket flags (spec §3): `USED` is implied by the record's presence in
    /// the pool in this implementation, so it is tracked for parity with the
    /// spec's invariant list but never drives behavior on its own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const USED                    = 0b0000_0001;
        const NO_BLOCK                 = 0b0000_0010;
        const SECURE                   = 0b0000_0100;
        const SECURE_NEGO_IN_PROGRESS  = 0b0000_1000;
    }
}

/// The socket state machine (spec §3 diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Bound,
    Listen,
    ConnInProgress,
    ConnDone,
    Conn,
    CloseInProgress,
    ClosingDataAvail,
    ClosedFault,
}

/// One queued-but-not-yet-reaped connection on a listener (spec §3 "Listener
/// accept queue").
pub struct AcceptQueueEntry {
    pub conn_id: ConnId,
    pub is_ready: bool,
}

/// Listener-only state (spec §3).
pub struct Listener {
    pub accept_q: VecDeque<AcceptQueueEntry>,
    pub accept_q_size_max: usize,
    pub child_q_size_cur: usize,
    pub child_q_size_max: usize,
}

/// A single received datagram (spec §3 "Receive queue": "for datagrams each
/// buffer is one datagram and is removed atomically on receive").
pub struct DatagramPacket {
    pub from: SocketAddr,
    pub data: Vec<u8>,
}

/// The receive-queue model (spec §3 "Receive queue", §4.3 enqueue rules):
/// a packet FIFO for datagrams (level-triggered, one signal per packet,
/// `size_cur` tracked as the sum of queued payload lengths); for streams
/// the actual bytes live in the transport engine's own buffer (spec: "the
/// transport layer owns the actual byte-level copy and this layer only
/// signals availability"), so there is nothing to queue here.
pub enum RxQueue {
    Stream,
    Datagram(VecDeque<DatagramPacket>),
}

/// The fixed-identity socket record (spec §3).
pub struct SocketRecord {
    pub family: Family,
    pub sock_type: SockType,
    pub proto: Proto,
    pub state: State,
    pub flags: Flags,
    pub if_nbr: Option<u8>,
    pub conn_id: Option<ConnId>,
    pub parent_sock_id: Option<SocketHandle>,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub rx_q: RxQueue,
    pub rx_q_size_cfgd: usize,
    pub tx_q_size_cfgd: usize,
    pub tx_timeout: Option<std::time::Duration>,
    pub nagle: bool,
    pub keepalive: crate::transport::KeepAlive,
    pub listener: Option<Listener>,
    pub waits: WaitSet,
    pub sel_list: Vec<crate::select::SelObj>,
}

impl SocketRecord {
    fn new(family: Family, sock_type: SockType, proto: Proto, cfg: &Config) -> Self {
        let rx_q = match sock_type {
            SockType::Stream => RxQueue::Stream,
            SockType::Datagram => RxQueue::Datagram(VecDeque::new()),
        };
        SocketRecord {
            family,
            sock_type,
            proto,
            state: State::Closed,
            flags: Flags::USED,
            if_nbr: None,
            conn_id: None,
            parent_sock_id: None,
            local_addr: None,
            remote_addr: None,
            rx_q,
            rx_q_size_cfgd: cfg.rx_q_size_default,
            tx_q_size_cfgd: cfg.tx_q_size_default,
            tx_timeout: None,
            nagle: true,
            keepalive: crate::transport::KeepAlive::default(),
            listener: None,
            waits: WaitSet::new(cfg),
            sel_list: Vec::new(),
        }
    }

    pub fn is_listener(&self) -> bool {
        self.listener.is_some()
    }
}

/// The fixed-size socket table plus its free-list stack (spec §4.1).
pub struct Pool {
    slots: Vec<Option<SocketRecord>>,
    free_stack: Vec<u16>,
    stats: std::sync::Mutex<PoolStats>,
}

/// Pool statistics, mutated under their own short critical section,
/// disjoint from the global network lock (spec §4.1, §5, §6
/// `pool_stat_get`/`pool_stat_reset_max_used`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub used: usize,
    pub max_used: usize,
}

impl Pool {
    pub fn new() -> Self {
        let n = crate::config::MAX_SOCKETS;
        let mut free_stack = Vec::with_capacity(n);
        let mut slots = Vec::with_capacity(n);
        for i in (0..n).rev() {
            free_stack.push(i as u16);
            slots.push(None);
        }
        Pool {
            slots,
            free_stack,
            stats: std::sync::Mutex::new(PoolStats::default()),
        }
    }

    pub fn alloc(
        &mut self,
        family: Family,
        sock_type: SockType,
        proto: Proto,
        cfg: &Config,
    ) -> Result<SocketHandle> {
        let idx = self.free_stack.pop().ok_or(Error::PoolEmpty)?;
        let handle = SocketHandle(idx);
        self.slots[idx as usize] = Some(SocketRecord::new(family, sock_type, proto, cfg));
        let mut stats = self.stats.lock().unwrap();
        stats.used += 1;
        stats.max_used = stats.max_used.max(stats.used);
        Ok(handle)
    }

    pub fn get(&self, handle: SocketHandle) -> Result<&SocketRecord> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Error::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Result<&mut SocketRecord> {
        self.slots
            .get_mut(handle.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Error::InvalidHandle)
    }

    /// Return a record to the free stack (spec §3 "Lifecycle": "destroyed by
    /// `close` (returned to the free stack)"). Caller is responsible for
    /// having already aborted the socket's wait objects and freed any
    /// connection-table / transport resources.
    pub fn free(&mut self, handle: SocketHandle) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle.0 as usize)
            .ok_or(Error::InvalidHandle)?;
        if slot.take().is_none() {
            return Err(Error::InvalidHandle);
        }
        self.free_stack.push(handle.0);
        let mut stats = self.stats.lock().unwrap();
        stats.used -= 1;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketRecord> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().unwrap()
    }

    pub fn reset_max_used(&self) {
        let mut stats = self.stats.lock().unwrap();
        stats.max_used = stats.used;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_round_trips_through_the_free_stack() {
        let cfg = Config::default();
        let mut pool = Pool::new();
        let a = pool.alloc(Family::V4, SockType::Datagram, Proto::Udp, &cfg).unwrap();
        let b = pool.alloc(Family::V4, SockType::Stream, Proto::Tcp, &cfg).unwrap();
        assert_eq!(pool.iter().count(), 2);

        pool.free(a).unwrap();
        assert_eq!(pool.iter().count(), 1);
        assert!(pool.get(a).is_err());
        assert!(pool.get(b).is_ok());

        // The freed slot is reused by the next alloc (spec §4.1 free-list
        // stack), not a fresh one past the high-water mark.
        let c = pool.alloc(Family::V4, SockType::Datagram, Proto::Udp, &cfg).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn pool_stats_track_used_and_max_used() {
        let cfg = Config::default();
        let mut pool = Pool::new();
        let a = pool.alloc(Family::V4, SockType::Datagram, Proto::Udp, &cfg).unwrap();
        let b = pool.alloc(Family::V4, SockType::Datagram, Proto::Udp, &cfg).unwrap();
        assert_eq!(pool.stats(), PoolStats { used: 2, max_used: 2 });

        pool.free(a).unwrap();
        assert_eq!(pool.stats(), PoolStats { used: 1, max_used: 2 });

        pool.reset_max_used();
        assert_eq!(pool.stats(), PoolStats { used: 1, max_used: 1 });

        pool.free(b).unwrap();
        assert_eq!(pool.stats(), PoolStats { used: 0, max_used: 1 });
    }

    #[test]
    fn pool_empty_when_capacity_exhausted() {
        let cfg = Config::default();
        let mut pool = Pool::new();
        for _ in 0..crate::config::MAX_SOCKETS {
            pool.alloc(Family::V4, SockType::Datagram, Proto::Udp, &cfg).unwrap();
        }
        assert_eq!(
            pool.alloc(Family::V4, SockType::Datagram, Proto::Udp, &cfg),
            Err(Error::PoolEmpty)
        );
    }
}
