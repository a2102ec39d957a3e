//! The network-connection (demultiplexing) table.
//!
//! Spec §1 scopes this out as an external collaborator ("the network-
//! connection table: address/port tuple -> connection record lookup and
//! "conn ID" space"). It is reached only through the narrow interface spec
//! §6 lists under "Southbound requirements": get/free record, get/set
//! local/remote, get/set app id, search by tuple, port-in-use predicate.
//! We provide the reference implementation of that interface here so the
//! socket layer is runnable and testable end to end; a real stack would
//! swap this module out for its own table without the socket layer above
//! noticing, which is exactly why `bind`/`connect`/`listen` only ever touch
//! it through [`ConnTable`]'s methods.

use crate::addr::{Family, SocketAddr, Tuple};
use crate::error::{Error, Result};
use crate::pool::SocketHandle;

/// Opaque handle into the connection table (spec §3 `conn_id`, §9 "cyclic
/// references": index handles, not pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

/// IPv4-only transmit parameters a bound connection carries (spec §4.8,
/// level `IP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpTxParams {
    pub tos: u8,
    pub ttl: u8,
    pub ttl_multicast: u8,
}

pub struct ConnRecord {
    pub family: Family,
    pub proto: Protocol,
    pub tuple: Tuple,
    /// The socket that owns this connection (spec invariant: "conn_id...
    /// refers to a live connection-table entry whose `app_id` equals this
    /// `sock_id`").
    pub app_id: SocketHandle,
    pub ip_tx: IpTxParams,
}

/// The table itself: a dense map from [`ConnId`] to [`ConnRecord`], plus the
/// tuple search the spec's bind/rx paths require.
#[derive(Default)]
pub struct ConnTable {
    next_id: u32,
    entries: heapless::Vec<(ConnId, ConnRecord), { crate::config::MAX_CONNS }>,
}

/// Outcome of a tuple search (spec §4.4 step 5): which kind of match, if
/// any, was found, and against which connection.
pub enum Match<'a> {
    None,
    /// Exact local+remote match.
    Full(ConnId, &'a ConnRecord),
    /// Local-only match (a half-connection already bound to this local
    /// tuple).
    Half(ConnId, &'a ConnRecord),
}

impl ConnTable {
    pub fn new() -> Self {
        ConnTable {
            next_id: 0,
            entries: heapless::Vec::new(),
        }
    }

    pub fn insert(
        &mut self,
        family: Family,
        proto: Protocol,
        tuple: Tuple,
        app_id: SocketHandle,
    ) -> Result<ConnId> {
        let id = ConnId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries
            .push((
                id,
                ConnRecord {
                    family,
                    proto,
                    tuple,
                    app_id,
                    ip_tx: IpTxParams::default(),
                },
            ))
            .map_err(|_| Error::PoolEmpty)?;
        Ok(id)
    }

    pub fn get(&self, id: ConnId) -> Result<&ConnRecord> {
        self.entries
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, r)| r)
            .ok_or(Error::InvalidConn)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Result<&mut ConnRecord> {
        self.entries
            .iter_mut()
            .find(|(i, _)| *i == id)
            .map(|(_, r)| r)
            .ok_or(Error::InvalidConn)
    }

    pub fn free(&mut self, id: ConnId) {
        if let Some(pos) = self.entries.iter().position(|(i, _)| *i == id) {
            self.entries.swap_remove(pos);
        }
    }

    /// Search for a tuple match (spec §4.4 step 5 / §4.3 receive demux):
    /// full match preferred over half.
    pub fn search(&self, proto: Protocol, tuple: &Tuple) -> Match<'_> {
        let mut half: Option<(ConnId, &ConnRecord)> = None;
        for (id, rec) in self.entries.iter() {
            if rec.proto != proto {
                continue;
            }
            if rec.tuple.is_full_match(tuple) {
                return Match::Full(*id, rec);
            }
            if half.is_none() && rec.tuple.is_half_match(tuple) {
                half = Some((*id, rec));
            }
        }
        match half {
            Some((id, rec)) => Match::Half(id, rec),
            None => Match::None,
        }
    }

    /// Find the connection whose local tuple resolves a received packet,
    /// searching full match before half/wildcard (spec §4.3 C3).
    pub fn search_for_rx(&self, proto: Protocol, tuple: &Tuple) -> Option<(ConnId, SocketHandle)> {
        match self.search(proto, tuple) {
            Match::Full(id, rec) => Some((id, rec.app_id)),
            Match::Half(id, rec) => Some((id, rec.app_id)),
            Match::None => None,
        }
    }

    pub fn port_in_use(&self, proto: Protocol, family: Family, port: u16) -> bool {
        self.entries.iter().any(|(_, rec)| {
            rec.proto == proto && rec.family == family && rec.tuple.local.port() == port
        })
    }

    pub fn set_remote(&mut self, id: ConnId, remote: SocketAddr, overwrite: bool) -> Result<()> {
        let rec = self.get_mut(id)?;
        if rec.tuple.remote.is_none() || overwrite {
            rec.tuple.remote = Some(remote);
        }
        Ok(())
    }

    pub fn set_local(&mut self, id: ConnId, local: SocketAddr) -> Result<()> {
        self.get_mut(id)?.tuple.local = local;
        Ok(())
    }

    pub fn set_app_id(&mut self, id: ConnId, app_id: SocketHandle) -> Result<()> {
        self.get_mut(id)?.app_id = app_id;
        Ok(())
    }
}
