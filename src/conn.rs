//! Connection handlers (spec §4.5 C5): datagram pseudo-connect, stream
//! connect/listen/accept/close, and the northbound callbacks the transport
//! and connection-table layers use to drive this layer's state machine.

use std::sync::MutexGuard;

use crate::addr::{self, Family, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, Tuple};
use crate::conn_table::{ConnId, Protocol};
use crate::error::{Error, Result};
use crate::layer::{Inner, SocketLayer};
use crate::pool::{AcceptQueueEntry, Flags, Listener, Proto, SockType, SocketHandle, State};
use crate::select::SelEvent;
use crate::wait::WaitOutcome;

impl SocketLayer {
    /// `conn(sock, addr)` (spec §4.5).
    pub fn connect(&self, handle: SocketHandle, remote: SocketAddr) -> Result<()> {
        let g = self.inner.lock().unwrap();
        let sock_type = g.pool.get(handle)?.sock_type;
        match sock_type {
            SockType::Datagram => self.connect_datagram(g, handle, remote),
            SockType::Stream => self.connect_stream(g, handle, remote),
        }
    }

    fn connect_datagram(
        &self,
        g: MutexGuard<'_, Inner>,
        handle: SocketHandle,
        remote: SocketAddr,
    ) -> Result<()> {
        let family = g.pool.get(handle)?.family;
        if !Family::of(&remote).eq(&family) {
            return Err(Error::InvalidArg);
        }
        if g.pool.get(handle)?.state == State::Closed {
            let wildcard = match family {
                Family::V4 => {
                    addr::with_port(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::unspecified(), 0)), 0)
                }
                Family::V6 => addr::with_port(
                    SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::unspecified(), 0, 0, 0)),
                    0,
                ),
            };
            drop(g);
            self.bind(handle, wildcard, true)?;
            let g = self.inner.lock().unwrap();
            return self.connect_datagram_bound(g, handle, remote);
        }
        self.connect_datagram_bound(g, handle, remote)
    }

    fn connect_datagram_bound(
        &self,
        mut g: MutexGuard<'_, Inner>,
        handle: SocketHandle,
        remote: SocketAddr,
    ) -> Result<()> {
        let conn_id = g.pool.get(handle)?.conn_id.ok_or(Error::InvalidConn)?;
        g.conns.set_remote(conn_id, remote, true)?;
        let rec = g.pool.get_mut(handle)?;
        rec.remote_addr = Some(remote);
        rec.state = State::Conn;
        Ok(())
    }

    fn connect_stream(
        &self,
        mut g: MutexGuard<'_, Inner>,
        handle: SocketHandle,
        remote: SocketAddr,
    ) -> Result<()> {
        let state = g.pool.get(handle)?.state;
        match state {
            State::ConnDone => {
                g.pool.get_mut(handle)?.state = State::Conn;
                return Ok(());
            }
            State::ConnInProgress => {
                // fall through to the wait below
            }
            State::Closed | State::Bound => {
                if state == State::Bound
                    && addr::is_wildcard(&g.pool.get(handle)?.local_addr.unwrap())
                {
                    return Err(Error::InvalidAddrSrc);
                }
                let local = match g.pool.get(handle)?.local_addr {
                    Some(l) if !addr::is_wildcard(&l) => l,
                    _ => {
                        let src = g.transports.ip.select_source(&remote).ok_or(Error::InvalidAddrSrc)?;
                        addr::with_port(src, 0)
                    }
                };
                let family = g.pool.get(handle)?.family;
                let existing = g.pool.get(handle)?.conn_id;
                let conn_id = match existing {
                    Some(id) => {
                        g.conns.set_local(id, local)?;
                        g.conns.set_remote(id, remote, true)?;
                        id
                    }
                    None => {
                        let id = g.conns.insert(family, Protocol::Tcp, Tuple::full(local, remote), handle)?;
                        g.transports.stream.alloc(id);
                        id
                    }
                };
                let (rx, tx) = {
                    let rec = g.pool.get(handle)?;
                    (rec.rx_q_size_cfgd, rec.tx_q_size_cfgd)
                };
                g.transports.stream.set_rx_tx_window(conn_id, rx, tx);
                g.transports.stream.tx_conn_req(conn_id, local, remote);
                let rec = g.pool.get_mut(handle)?;
                rec.conn_id = Some(conn_id);
                rec.local_addr = Some(local);
                rec.remote_addr = Some(remote);
                rec.state = State::ConnInProgress;
                log::debug!("connect: {:?} -> ConnInProgress ({:?})", handle, remote);

                if rec.flags.contains(Flags::NO_BLOCK) {
                    return Err(Error::OpInProgress);
                }
            }
            _ => return Err(Error::InvalidState),
        }

        // Wait for completion (spec §5 suspension point): release the
        // network lock, wait on the socket's own semaphore, then
        // re-acquire to read the outcome back out of the record. A
        // non-blocking socket polls instead of waiting, so a caller driving
        // `ConnInProgress` to completion (e.g. `embedded-nal`'s retry loop)
        // never suspends.
        let secure = g.pool.get(handle)?.flags.contains(Flags::SECURE);
        let no_block = g.pool.get(handle)?.flags.contains(Flags::NO_BLOCK);
        let sem = g.pool.get(handle)?.waits.conn_req.clone();
        drop(g);
        let outcome = if no_block {
            match sem.try_wait() {
                Some(o) => o,
                None => return Err(Error::OpInProgress),
            }
        } else {
            sem.wait()
        };

        let mut g = self.inner.lock().unwrap();
        match outcome {
            WaitOutcome::Signaled => {
                let rec = g.pool.get_mut(handle)?;
                if rec.state != State::ConnDone {
                    rec.state = State::Closed;
                    log::warn!("connect: {:?} handshake failed, back to Closed", handle);
                    return Err(Error::Fail);
                }
                rec.state = State::Conn;
                log::debug!("connect: {:?} -> Conn", handle);
                if secure {
                    // Stub handshake: no real TLS engine is in scope (spec §1
                    // out-of-scope "TLS/secure-session negotiation").
                    rec.flags.insert(Flags::SECURE_NEGO_IN_PROGRESS);
                    rec.flags.remove(Flags::SECURE_NEGO_IN_PROGRESS);
                }
                Ok(())
            }
            WaitOutcome::Timeout => Err(Error::Timeout),
            WaitOutcome::Abort => Err(Error::Abort),
        }
    }

    /// `listen(sock, backlog)` (spec §4.5).
    pub fn listen(&self, handle: SocketHandle, backlog: usize) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let (sock_type, cur_state, local, family, existing) = {
            let rec = g.pool.get(handle)?;
            (rec.sock_type, rec.state, rec.local_addr, rec.family, rec.conn_id)
        };
        if sock_type != SockType::Stream {
            return Err(Error::InvalidType);
        }
        if cur_state != State::Bound {
            return Err(Error::InvalidState);
        }
        let local = local.ok_or(Error::InvalidState)?;
        let conn_id = match existing {
            Some(id) => id,
            None => {
                let id = g.conns.insert(family, Protocol::Tcp, Tuple::half(local), handle)?;
                g.transports.stream.alloc(id);
                id
            }
        };
        let accept_q_max = backlog.min(self.cfg.accept_q_size_max_default);
        g.transports.stream.set_listen(conn_id, local, accept_q_max);
        let rec = g.pool.get_mut(handle)?;
        rec.conn_id = Some(conn_id);
        rec.listener = Some(Listener {
            accept_q: std::collections::VecDeque::new(),
            accept_q_size_max: accept_q_max,
            child_q_size_cur: 0,
            child_q_size_max: self.cfg.child_q_size_max_default,
        });
        rec.state = State::Listen;
        log::debug!("listen: {:?} on {:?}, backlog {}", handle, local, accept_q_max);
        Ok(())
    }

    /// `accept(sock, &addr, &addr_len)` (spec §4.5).
    pub fn accept(&self, handle: SocketHandle) -> Result<(SocketHandle, SocketAddr)> {
        let g = self.inner.lock().unwrap();
        {
            let rec = g.pool.get(handle)?;
            if rec.sock_type != SockType::Stream || rec.state != State::Listen {
                return Err(Error::InvalidState);
            }
            let listener = rec.listener.as_ref().unwrap();
            let has_ready = listener.accept_q.iter().any(|e| e.is_ready);
            if rec.flags.contains(Flags::NO_BLOCK) && !has_ready {
                return Err(Error::WouldBlock);
            }
        }
        let sem = g.pool.get(handle)?.waits.accept_q.clone();
        drop(g);
        let outcome = sem.wait();
        match outcome {
            WaitOutcome::Timeout => return Err(Error::Timeout),
            WaitOutcome::Abort => return Err(Error::Abort),
            WaitOutcome::Signaled => {}
        }

        let mut g = self.inner.lock().unwrap();
        let entry = {
            let rec = g.pool.get_mut(handle)?;
            let listener = rec.listener.as_mut().unwrap();
            let pos = listener
                .accept_q
                .iter()
                .position(|e| e.is_ready)
                .ok_or(Error::NotFound)?;
            listener.accept_q.remove(pos).unwrap()
        };

        let (family, proto, local) = {
            let rec = g.pool.get(handle)?;
            (rec.family, rec.proto, rec.local_addr)
        };
        let remote = g.conns.get(entry.conn_id)?.tuple.remote.ok_or(Error::InvalidConn)?;

        let child = g.pool.alloc(family, SockType::Stream, proto, &self.cfg)?;
        {
            let rec = g.pool.get_mut(child)?;
            rec.conn_id = Some(entry.conn_id);
            rec.parent_sock_id = Some(handle);
            rec.state = State::Conn;
            rec.local_addr = local;
            rec.remote_addr = Some(remote);
        }
        g.conns.set_app_id(entry.conn_id, child)?;
        g.pool.get_mut(handle)?.listener.as_mut().unwrap().child_q_size_cur += 1;
        g.transports.stream.conn_app_accept_rdy_signal(entry.conn_id);
        log::debug!("accept: {:?} -> child {:?} from {:?}", handle, child, remote);

        if g.pool.get(handle)?.flags.contains(Flags::SECURE) {
            // Stub secure accept: always succeeds (TLS is out of scope,
            // spec §1). A real engine failure would tear the child down via
            // `self.close(child)`.
        }

        Ok((child, remote))
    }

    /// `close(sock)` (spec §4.5).
    pub fn close(&self, handle: SocketHandle) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let (sock_type, state, no_block, secure) = {
            let rec = g.pool.get(handle)?;
            (
                rec.sock_type,
                rec.state,
                rec.flags.contains(Flags::NO_BLOCK),
                rec.flags.contains(Flags::SECURE),
            )
        };

        if sock_type == SockType::Datagram {
            complete_close(&mut g, handle);
            return Ok(());
        }

        match state {
            State::Bound | State::Closed => {
                complete_close(&mut g, handle);
                Ok(())
            }
            State::Listen | State::Conn | State::ConnInProgress | State::ConnDone => {
                if secure {
                    // Stub close_notify (spec §4.5: "If secure, emit a TLS
                    // close_notify before initiating teardown").
                }
                let conn_id = g.pool.get(handle)?.conn_id;
                if let Some(id) = conn_id {
                    g.transports.stream.tx_conn_req_close(id);
                }
                g.pool.get_mut(handle)?.state = State::CloseInProgress;

                if no_block {
                    complete_close(&mut g, handle);
                    return Ok(());
                }

                let sem = g.pool.get(handle)?.waits.conn_close.clone();
                drop(g);
                let outcome = sem.wait();
                let mut g = self.inner.lock().unwrap();
                match outcome {
                    WaitOutcome::Timeout => {
                        g.pool.get_mut(handle)?.state = State::ClosedFault;
                        log::warn!("close: {:?} timed out waiting for teardown, ClosedFault", handle);
                        Ok(())
                    }
                    WaitOutcome::Signaled | WaitOutcome::Abort => {
                        complete_close(&mut g, handle);
                        Ok(())
                    }
                }
            }
            State::CloseInProgress | State::ClosingDataAvail => {
                complete_close(&mut g, handle);
                Err(Error::OpInProgress)
            }
            State::ClosedFault => {
                complete_close(&mut g, handle);
                Ok(())
            }
        }
    }

    // ---- Northbound callbacks (spec §6) ----

    /// `close_from_conn(sock)`: mark CLOSED_FAULT without touching the
    /// connection (spec §6, §9: used while a secure handshake is in
    /// progress so the transport isn't freed underneath it).
    pub fn close_from_conn(&self, handle: SocketHandle) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        g.pool.get_mut(handle)?.state = State::ClosedFault;
        log::warn!("close_from_conn: {:?} -> ClosedFault", handle);
        Self::post_sel(&g, handle, SelEvent::ConnCloseAbort);
        let rec = g.pool.get(handle)?;
        rec.waits.rx_q.signal();
        rec.waits.conn_req.signal();
        rec.waits.accept_q.signal();
        rec.waits.conn_close.signal();
        Ok(())
    }

    /// `free_conn_from_sock(sock, conn)`: on connection teardown, if `conn`
    /// is still queued (not yet accepted) on a listener, drop it.
    pub fn free_conn_from_sock(&self, handle: SocketHandle, conn: ConnId) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        if let Some(listener) = rec.listener.as_mut() {
            listener.accept_q.retain(|e| e.conn_id != conn);
        }
        Ok(())
    }

    /// `conn_signal_req(sock)`: the stream engine reports the active open
    /// finished (`success` set by the caller based on whether the handshake
    /// completed).
    pub fn conn_signal_req(&self, handle: SocketHandle, success: bool) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        if success {
            rec.state = State::ConnDone;
        }
        Self::post_sel(&g, handle, SelEvent::ConnReqSignal);
        g.pool.get(handle)?.waits.conn_req.signal();
        Ok(())
    }

    /// `conn_child_add(sock, remote)`: the transport layer completed a
    /// 3-way handshake for a listener. This layer owns the connection
    /// table (spec §9 "conn_id namespace"), so it mints the new
    /// connection's id here — full (local, remote) tuple, rooted back to
    /// the listener via `app_id` per spec invariant 1 — and queues it as
    /// not-yet-ready; the caller gets the id back to key subsequent data
    /// delivery on before `accept` hands the connection its own socket.
    pub fn conn_child_add(&self, handle: SocketHandle, remote: SocketAddr) -> Result<ConnId> {
        let mut g = self.inner.lock().unwrap();
        let (family, local) = {
            let rec = g.pool.get(handle)?;
            (rec.family, rec.local_addr.ok_or(Error::InvalidState)?)
        };
        {
            let listener = g.pool.get(handle)?.listener.as_ref().ok_or(Error::InvalidType)?;
            if listener.accept_q.len() >= listener.accept_q_size_max {
                return Err(Error::NotAvail);
            }
        }
        let conn = g.conns.insert(family, Protocol::Tcp, Tuple::full(local, remote), handle)?;
        g.transports.stream.alloc(conn);
        let listener = g.pool.get_mut(handle)?.listener.as_mut().unwrap();
        listener.accept_q.push_back(AcceptQueueEntry {
            conn_id: conn,
            is_ready: false,
        });
        Ok(conn)
    }

    /// `conn_signal_accept(sock, conn)`: the handshake is now visible to the
    /// app (peer's ACK received); mark the entry ready and wake `accept`.
    pub fn conn_signal_accept(&self, handle: SocketHandle, conn: ConnId) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        let listener = rec.listener.as_mut().ok_or(Error::InvalidType)?;
        let entry = listener
            .accept_q
            .iter_mut()
            .find(|e| e.conn_id == conn)
            .ok_or(Error::NotFound)?;
        entry.is_ready = true;
        Self::post_sel(&g, handle, SelEvent::ConnAcceptSignal);
        g.pool.get(handle)?.waits.accept_q.signal();
        Ok(())
    }

    /// `conn_signal_close(sock, data_avail)`: the transport finished closing
    /// (or the peer half-closed with data still queued).
    pub fn conn_signal_close(&self, handle: SocketHandle, data_avail: bool) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let rec = g.pool.get_mut(handle)?;
        if data_avail && rec.state == State::Conn {
            rec.state = State::ClosingDataAvail;
        }
        Self::post_sel(&g, handle, SelEvent::ConnCloseSignal);
        g.pool.get(handle)?.waits.conn_close.signal();
        Ok(())
    }

    /// `app_post_rx(conn_app_id)`: readiness post from the stream engine
    /// (independent of this layer's own rx-queue signaling, which only
    /// applies to datagrams and to bytes this layer itself buffers).
    pub fn app_post_rx(&self, handle: SocketHandle) -> Result<()> {
        let g = self.inner.lock().unwrap();
        Self::post_sel(&g, handle, SelEvent::RxData);
        g.pool.get(handle)?.waits.rx_q.signal();
        Ok(())
    }

    /// `app_post_tx(conn_app_id)`: transmit readiness post.
    pub fn app_post_tx(&self, handle: SocketHandle) -> Result<()> {
        let g = self.inner.lock().unwrap();
        Self::post_sel(&g, handle, SelEvent::TxData);
        Ok(())
    }
}

/// The shared "complete locally" teardown every close path funnels into
/// (spec §5 resource policy): abort/clear wait objects, free the
/// connection-table entry and transport resource, drain a listener's
/// accept queue, fix up the parent's child count, and return the record to
/// the pool.
fn complete_close(g: &mut Inner, handle: SocketHandle) {
    let (conn_id, parent, is_tcp) = match g.pool.get(handle) {
        Ok(rec) => (rec.conn_id, rec.parent_sock_id, rec.proto == Proto::Tcp),
        Err(_) => return,
    };
    log::debug!("close: {:?} complete, freeing conn {:?}", handle, conn_id);

    if let Ok(rec) = g.pool.get_mut(handle) {
        rec.waits.teardown();
        // Wake any `select` still watching this handle (spec §4.7 event
        // table, `rx-abort`/`conn-req-abort` rows) before the record goes
        // back to the free stack out from under it.
        crate::select::post_event(&rec.sel_list, SelEvent::RxAbort);
        crate::select::post_event(&rec.sel_list, SelEvent::ConnReqAbort);
        if let Some(listener) = rec.listener.take() {
            for entry in listener.accept_q {
                if is_tcp {
                    g.transports.stream.free(entry.conn_id);
                }
                g.conns.free(entry.conn_id);
            }
        }
    }

    if let Some(id) = conn_id {
        if is_tcp {
            g.transports.stream.free(id);
        }
        g.conns.free(id);
    }

    if let Some(parent) = parent {
        if let Ok(prec) = g.pool.get_mut(parent) {
            if let Some(listener) = prec.listener.as_mut() {
                listener.child_q_size_cur = listener.child_q_size_cur.saturating_sub(1);
            }
        }
    }

    let _ = g.pool.free(handle);
}
