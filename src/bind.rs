//! Address validation & binding (spec §4.4 C4).

use crate::addr::{self, Family, SocketAddr, Tuple};
use crate::conn_table::{Match, Protocol};
use crate::error::{Error, Result};
use crate::layer::SocketLayer;
use crate::pool::{Proto, SockType, SocketHandle, State};

fn proto_of(p: Proto) -> Protocol {
    match p {
        Proto::Udp => Protocol::Udp,
        Proto::Tcp => Protocol::Tcp,
    }
}

impl SocketLayer {
    /// `bind(sock, local_addr, random_port?)` (spec §4.4).
    pub fn bind(&self, handle: SocketHandle, local: SocketAddr, random_port: bool) -> Result<()> {
        let mut g = self.inner.lock().unwrap();

        // Step 1: family/type gate based on current state.
        let (family, sock_type, proto, cur_state, if_nbr, conn_id, existing_remote) = {
            let rec = g.pool.get(handle)?;
            (
                rec.family,
                rec.sock_type,
                rec.proto,
                rec.state,
                rec.if_nbr,
                rec.conn_id,
                rec.remote_addr,
            )
        };
        let next_state = match (sock_type, cur_state) {
            (SockType::Datagram, State::Closed) => State::Bound,
            (SockType::Datagram, State::Bound) => State::Bound,
            (SockType::Datagram, State::Conn) => State::Conn,
            (SockType::Stream, State::Closed) => State::Bound,
            _ => return Err(Error::InvalidState),
        };

        // Step 2: validate address family.
        if !Family::of(&local).eq(&family) {
            return Err(Error::InvalidArg);
        }

        // Step 3: ephemeral port, if requested.
        let port = if random_port {
            self.alloc_ephemeral_port(&g.conns, family, proto_of(proto))?
        } else {
            local.port()
        };

        // Step 4: resolve the address.
        let resolved_ip = if addr::is_wildcard(&local) {
            g.transports
                .ip
                .default_host_addr(if_nbr, family)
                .ok_or(Error::InvalidAddrSrc)?
        } else {
            let found_if = g.transports.ip.locally_hosted(&local).ok_or(Error::InvalidAddrSrc)?;
            g.pool.get_mut(handle)?.if_nbr = Some(found_if);
            local
        };
        let final_local = addr::with_port(resolved_ip, port);
        let search_tuple = match existing_remote {
            Some(remote) if cur_state == State::Conn => Tuple::full(final_local, remote),
            _ => Tuple::half(final_local),
        };

        // Step 5 & 6: collision check + connection-table bookkeeping.
        match conn_id {
            Some(id) => {
                // Rebind: make sure we're not colliding with *someone else's*
                // connection at the new tuple.
                match g.conns.search(proto_of(proto), &search_tuple) {
                    Match::Full(other, _) if other != id => return Err(Error::AlreadyExists),
                    Match::Half(other, _) if other != id && search_tuple.remote.is_none() => {
                        return Err(Error::AlreadyExists)
                    }
                    _ => {}
                }
                g.conns.set_local(id, final_local)?;
            }
            None => match g.conns.search(proto_of(proto), &search_tuple) {
                Match::Full(_, rec) if rec.app_id == handle => {}
                Match::Full(_, _) => return Err(Error::AlreadyExists),
                Match::Half(_, _) if search_tuple.remote.is_none() => {
                    return Err(Error::AlreadyExists)
                }
                Match::Half(_, _) | Match::None => {
                    let id = g
                        .conns
                        .insert(family, proto_of(proto), search_tuple, handle)?;
                    g.pool.get_mut(handle)?.conn_id = Some(id);
                }
            },
        }

        let rec = g.pool.get_mut(handle)?;
        rec.local_addr = Some(final_local);
        rec.state = next_state;
        log::debug!("bind: {:?} -> {:?} ({:?})", handle, final_local, next_state);
        Ok(())
    }
}
