//! Data transfer (spec §4.6 C6): datagram rx/tx and stream rx/tx.
//!
//! Grounded in the teacher's `udp.rs` (`recv_slice`/`send_slice` atomic
//! single-datagram semantics) and `tcp.rs` (`recv`/`send` reading/writing
//! straight through to the underlying ring buffer).

use crate::addr::{self, SocketAddr};
use crate::error::{Error, Result};
use crate::layer::{CallFlags, SocketLayer};
use crate::pool::{RxQueue, SockType, SocketHandle, State};
use crate::wait::WaitOutcome;

/// The outcome of a successful receive (spec §8 testable property 9: a
/// short read due to an oversized datagram still returns what fit, with
/// `truncated` flagging the loss, rather than Rust's anti-pattern of
/// returning `Err` alongside already-written data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub truncated: bool,
    pub from: Option<SocketAddr>,
}

impl SocketLayer {
    /// `rx(sock, buf, flags)` / `rx_from(sock, buf, flags, &from_addr)`
    /// (spec §4.6).
    pub fn rx_data(&self, handle: SocketHandle, buf: &mut [u8], flags: CallFlags) -> Result<Received> {
        let sock_type = self.inner.lock().unwrap().pool.get(handle)?.sock_type;
        match sock_type {
            SockType::Datagram => self.rx_datagram_data(handle, buf, flags),
            SockType::Stream => self.rx_stream_data(handle, buf, flags),
        }
    }

    fn rx_datagram_data(&self, handle: SocketHandle, buf: &mut [u8], flags: CallFlags) -> Result<Received> {
        loop {
            let mut g = self.inner.lock().unwrap();
            let rec = g.pool.get(handle)?;
            let RxQueue::Datagram(q) = &rec.rx_q else {
                return Err(Error::InvalidType);
            };
            if let Some(packet) = q.front() {
                let n = packet.data.len().min(buf.len());
                buf[..n].copy_from_slice(&packet.data[..n]);
                let truncated = n < packet.data.len();
                let from = packet.from;
                if !flags.peek {
                    let rec = g.pool.get_mut(handle)?;
                    if let RxQueue::Datagram(q) = &mut rec.rx_q {
                        q.pop_front();
                    }
                }
                return Ok(Received { len: n, truncated, from: Some(from) });
            }
            if rec.state == State::ClosedFault {
                return Err(Error::ConnClosedFault);
            }
            if flags.no_block || rec.flags.contains(crate::pool::Flags::NO_BLOCK) {
                return Err(Error::WouldBlock);
            }
            let sem = rec.waits.rx_q.clone();
            drop(g);
            match sem.wait() {
                WaitOutcome::Signaled => continue,
                WaitOutcome::Timeout => return Err(Error::Timeout),
                WaitOutcome::Abort => return Err(Error::Abort),
            }
        }
    }

    fn rx_stream_data(&self, handle: SocketHandle, buf: &mut [u8], flags: CallFlags) -> Result<Received> {
        loop {
            let mut g = self.inner.lock().unwrap();
            let (state, conn_id, no_block) = {
                let rec = g.pool.get(handle)?;
                (rec.state, rec.conn_id, flags.no_block || rec.flags.contains(crate::pool::Flags::NO_BLOCK))
            };
            if !matches!(state, State::Conn | State::ConnDone | State::ClosingDataAvail) {
                return Err(Error::InvalidState);
            }
            let conn_id = conn_id.ok_or(Error::InvalidConn)?;
            let (n, rx_closed) = g.transports.stream.rx_app_data(conn_id, buf, flags.peek, !no_block)?;
            if n > 0 {
                return Ok(Received { len: n, truncated: false, from: None });
            }
            if rx_closed {
                // NET_CONN_CLOSE_RX (spec §4.6 "Stream receive"): the peer
                // closed their write side. A socket draining the tail of a
                // half-closed connection finishes here; one still fully
                // open just loses its read half.
                if state == State::ClosingDataAvail {
                    let was_no_block = g.pool.get(handle)?.flags.contains(crate::pool::Flags::NO_BLOCK);
                    drop(g);
                    if !was_no_block {
                        let _ = self.close(handle);
                    }
                } else {
                    g.pool.get_mut(handle)?.state = State::Closed;
                }
                return Ok(Received { len: 0, truncated: false, from: None });
            }
            if no_block {
                return Err(Error::WouldBlock);
            }
            let sem = g.pool.get(handle)?.waits.rx_q.clone();
            drop(g);
            match sem.wait() {
                WaitOutcome::Signaled => continue,
                WaitOutcome::Timeout => return Err(Error::Timeout),
                WaitOutcome::Abort => return Err(Error::Abort),
            }
        }
    }

    /// `tx(sock, buf, flags)` (spec §4.6): send to the socket's connected
    /// peer.
    pub fn tx_data(&self, handle: SocketHandle, data: &[u8], flags: CallFlags) -> Result<usize> {
        let remote = self.inner.lock().unwrap().pool.get(handle)?.remote_addr;
        let remote = remote.ok_or(Error::InvalidAddrSrc)?;
        self.tx_data_to(handle, data, remote, flags)
    }

    /// `tx_to(sock, buf, flags, &to_addr)` (spec §4.6): for datagrams, an
    /// explicit per-call destination; for streams, `to` must match the
    /// socket's already-connected remote (spec: stream send has no
    /// per-call destination).
    pub fn tx_data_to(
        &self,
        handle: SocketHandle,
        data: &[u8],
        to: SocketAddr,
        flags: CallFlags,
    ) -> Result<usize> {
        let sock_type = self.inner.lock().unwrap().pool.get(handle)?.sock_type;
        match sock_type {
            SockType::Datagram => self.tx_datagram_data(handle, data, to, flags),
            SockType::Stream => self.tx_stream_data(handle, data, to, flags),
        }
    }

    fn tx_datagram_data(
        &self,
        handle: SocketHandle,
        data: &[u8],
        to: SocketAddr,
        flags: CallFlags,
    ) -> Result<usize> {
        let mut g = self.inner.lock().unwrap();
        if data.len() > g.pool.get(handle)?.tx_q_size_cfgd {
            return Err(Error::InvalidArg);
        }

        // Step 2: an unbound (CLOSED) socket is bound ephemerally first, the
        // destination influencing source selection just like `connect`'s
        // own local-address resolution.
        if g.pool.get(handle)?.state == State::Closed {
            let src = g.transports.ip.select_source(&to).ok_or(Error::InvalidAddrSrc)?;
            drop(g);
            self.bind(handle, addr::with_port(src, 0), true)?;
            g = self.inner.lock().unwrap();
        }

        let rec = g.pool.get(handle)?;
        // Step 3: prefer the bound local; a wildcard still asks the IP layer
        // for a per-destination source.
        let local = match rec.local_addr {
            Some(l) if !addr::is_wildcard(&l) => l,
            Some(l) => {
                let src = g.transports.ip.select_source(&to).ok_or(Error::InvalidAddrSrc)?;
                addr::with_port(src, l.port())
            }
            None => return Err(Error::InvalidAddrSrc),
        };
        let mut ip_tx = rec
            .conn_id
            .and_then(|id| g.conns.get(id).ok())
            .map(|c| c.ip_tx)
            .unwrap_or_default();
        if addr::is_multicast(&to) && ip_tx.ttl_multicast != 0 {
            ip_tx.ttl = ip_tx.ttl_multicast;
        }
        let no_block = flags.no_block || rec.flags.contains(crate::pool::Flags::NO_BLOCK);
        let n = g.transports.datagram.tx(local, to, data, ip_tx, !no_block)?;
        // Step 6: zero bytes actually transmitted is a failure, not a
        // silent short write (zero is reserved for stream half-close).
        if n == 0 && !data.is_empty() {
            return Err(Error::Fail);
        }
        Ok(n)
    }

    fn tx_stream_data(
        &self,
        handle: SocketHandle,
        data: &[u8],
        to: SocketAddr,
        flags: CallFlags,
    ) -> Result<usize> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get(handle)?;
        if !matches!(rec.state, State::Conn | State::ConnDone) {
            return Err(Error::InvalidState);
        }
        if rec.remote_addr != Some(to) {
            return Err(Error::InvalidArg);
        }
        let conn_id = rec.conn_id.ok_or(Error::InvalidConn)?;
        let no_block = flags.no_block || rec.flags.contains(crate::pool::Flags::NO_BLOCK);
        g.transports.stream.tx_app_data(conn_id, data, !no_block)
    }
}

