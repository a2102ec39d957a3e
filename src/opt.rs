//! Socket option interface (spec §4.8 C8).
//!
//! Options are tagged `level x name`; level `SOCK` touches fields on the
//! record itself, level `IP` routes into the connection record's transmit
//! parameters, and level `TCP` routes into the stream engine. `get`
//! returns the value; `set` takes one. A mismatched value type is
//! `Error::InvalidArg` (spec: "validates its value length against the
//! option's native type").

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Sock,
    Ip,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Name {
    // level SOCK
    RxQSize,
    TxQSize,
    RxTimeout,
    TxTimeout,
    KeepAlive,
    AcceptConn,
    Type,
    // level IP
    Tos,
    Ttl,
    TtlMulticast,
    // level TCP
    Nagle,
    KeepAliveCount,
    KeepAliveIdle,
    KeepAliveInterval,
}

/// The value carried by an option get/set call. `get` writes the actual
/// length back out (spec: "`get` returns the length actually written");
/// modeling the value as a typed enum makes that bookkeeping implicit
/// instead of a raw byte buffer + length pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Usize(usize),
    Bool(bool),
    U8(u8),
    U32(u32),
    Timeout(Option<Duration>),
    SockType(crate::pool::SockType),
}

impl crate::layer::SocketLayer {
    /// `opt_get(sock, level, name)` (spec §4.8).
    pub fn opt_get(&self, handle: crate::pool::SocketHandle, level: Level, name: Name) -> crate::error::Result<Value> {
        use crate::error::Error;
        let g = self.inner.lock().unwrap();
        let rec = g.pool.get(handle)?;
        match (level, name) {
            (Level::Sock, Name::RxQSize) => Ok(Value::Usize(rec.rx_q_size_cfgd)),
            (Level::Sock, Name::TxQSize) => Ok(Value::Usize(rec.tx_q_size_cfgd)),
            (Level::Sock, Name::RxTimeout) => Ok(Value::Timeout(rec.waits.rx_q.timeout())),
            (Level::Sock, Name::TxTimeout) => Ok(Value::Timeout(rec.tx_timeout)),
            (Level::Sock, Name::KeepAlive) => Ok(Value::Bool(rec.keepalive.enabled)),
            (Level::Sock, Name::AcceptConn) => Ok(Value::Bool(rec.is_listener())),
            (Level::Sock, Name::Type) => Ok(Value::SockType(rec.sock_type)),
            (Level::Ip, name) => {
                let conn = rec.conn_id.ok_or(Error::NotAvail)?;
                let ip_tx = g.conns.get(conn)?.ip_tx;
                match name {
                    Name::Tos => Ok(Value::U8(ip_tx.tos)),
                    Name::Ttl => Ok(Value::U8(ip_tx.ttl)),
                    Name::TtlMulticast => Ok(Value::U8(ip_tx.ttl_multicast)),
                    _ => Err(Error::InvalidArg),
                }
            }
            (Level::Tcp, name) => {
                if rec.sock_type != crate::pool::SockType::Stream {
                    return Err(Error::InvalidType);
                }
                match name {
                    Name::Nagle => Ok(Value::Bool(rec.nagle)),
                    Name::KeepAliveCount => Ok(Value::U32(rec.keepalive.count)),
                    Name::KeepAliveIdle => Ok(Value::U32(rec.keepalive.idle_secs)),
                    Name::KeepAliveInterval => Ok(Value::U32(rec.keepalive.interval_secs)),
                    _ => Err(Error::InvalidArg),
                }
            }
            _ => Err(Error::InvalidArg),
        }
    }

    /// `opt_set(sock, level, name, value)` (spec §4.8). A value of the
    /// wrong native type for `name` is `Error::InvalidArg`.
    pub fn opt_set(
        &self,
        handle: crate::pool::SocketHandle,
        level: Level,
        name: Name,
        value: Value,
    ) -> crate::error::Result<()> {
        use crate::error::Error;
        let mut g = self.inner.lock().unwrap();
        match (level, name, value) {
            (Level::Sock, Name::RxQSize, Value::Usize(n)) => {
                g.pool.get_mut(handle)?.rx_q_size_cfgd = n;
                Ok(())
            }
            (Level::Sock, Name::TxQSize, Value::Usize(n)) => {
                g.pool.get_mut(handle)?.tx_q_size_cfgd = n;
                Ok(())
            }
            (Level::Sock, Name::RxTimeout, Value::Timeout(t)) => {
                g.pool.get(handle)?.waits.rx_q.set_timeout(t);
                Ok(())
            }
            (Level::Sock, Name::TxTimeout, Value::Timeout(t)) => {
                g.pool.get_mut(handle)?.tx_timeout = t;
                Ok(())
            }
            (Level::Sock, Name::KeepAlive, Value::Bool(on)) => {
                let rec = g.pool.get_mut(handle)?;
                rec.keepalive.enabled = on;
                let (conn_id, ka) = (rec.conn_id, rec.keepalive);
                if let Some(id) = conn_id {
                    g.transports.stream.set_keepalive(id, ka);
                }
                Ok(())
            }
            (Level::Ip, name, value) => {
                let rec = g.pool.get(handle)?;
                let conn = rec.conn_id.ok_or(Error::NotAvail)?;
                let ip_tx = &mut g.conns.get_mut(conn)?.ip_tx;
                match (name, value) {
                    (Name::Tos, Value::U8(v)) => ip_tx.tos = v,
                    (Name::Ttl, Value::U8(v)) => ip_tx.ttl = v,
                    (Name::TtlMulticast, Value::U8(v)) => ip_tx.ttl_multicast = v,
                    _ => return Err(Error::InvalidArg),
                }
                Ok(())
            }
            (Level::Tcp, name, value) => {
                let rec = g.pool.get_mut(handle)?;
                if rec.sock_type != crate::pool::SockType::Stream {
                    return Err(Error::InvalidType);
                }
                match (name, value) {
                    (Name::Nagle, Value::Bool(on)) => {
                        rec.nagle = on;
                        let conn_id = rec.conn_id;
                        if let Some(id) = conn_id {
                            g.transports.stream.set_nagle(id, on);
                        }
                    }
                    (Name::KeepAliveCount, Value::U32(v)) => rec.keepalive.count = v,
                    (Name::KeepAliveIdle, Value::U32(v)) => rec.keepalive.idle_secs = v,
                    (Name::KeepAliveInterval, Value::U32(v)) => rec.keepalive.interval_secs = v,
                    _ => return Err(Error::InvalidArg),
                }
                Ok(())
            }
            _ => Err(Error::InvalidArg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::SocketLayer;
    use crate::pool::SockType;
    use crate::transport::mock;
    use crate::{Family, ProtoHint};

    /// Testable property: `opt_set(s, L, N, v)` followed by `opt_get(s, L, N)`
    /// returns `v`, for every supported `(L, N)`.
    #[test]
    fn set_then_get_round_trips() {
        let layer = SocketLayer::new(mock::transports());
        let s = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();

        layer.opt_set(s, Level::Sock, Name::RxQSize, Value::Usize(2048)).unwrap();
        assert_eq!(layer.opt_get(s, Level::Sock, Name::RxQSize).unwrap(), Value::Usize(2048));

        layer.opt_set(s, Level::Sock, Name::KeepAlive, Value::Bool(true)).unwrap();
        assert_eq!(layer.opt_get(s, Level::Sock, Name::KeepAlive).unwrap(), Value::Bool(true));

        layer.opt_set(s, Level::Tcp, Name::Nagle, Value::Bool(false)).unwrap();
        assert_eq!(layer.opt_get(s, Level::Tcp, Name::Nagle).unwrap(), Value::Bool(false));

        layer
            .opt_set(s, Level::Tcp, Name::KeepAliveIdle, Value::U32(30))
            .unwrap();
        assert_eq!(
            layer.opt_get(s, Level::Tcp, Name::KeepAliveIdle).unwrap(),
            Value::U32(30)
        );
    }

    /// A mismatched value type for a given name is `InvalidArg`, not a
    /// silent coercion (spec §4.8: "validates its value length against the
    /// option's native type").
    #[test]
    fn mismatched_value_type_is_rejected() {
        let layer = SocketLayer::new(mock::transports());
        let s = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();
        let err = layer.opt_set(s, Level::Sock, Name::RxQSize, Value::Bool(true)).unwrap_err();
        assert_eq!(err, crate::error::Error::InvalidArg);
    }

    /// Level `TCP` options are rejected on a datagram socket.
    #[test]
    fn tcp_level_option_rejected_on_datagram() {
        let layer = SocketLayer::new(mock::transports());
        let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
        let err = layer.opt_get(s, Level::Tcp, Name::Nagle).unwrap_err();
        assert_eq!(err, crate::error::Error::InvalidType);
    }
}
