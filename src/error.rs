//! Error kinds returned across the socket layer's application and
//! northbound/southbound interfaces (spec §7).

/// Every error this layer can produce, from argument validation up through
/// sticky connection faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("socket handle does not refer to a live socket")]
    InvalidHandle,
    #[error("operation is not valid for the socket's current state")]
    InvalidState,
    #[error("operation is not valid for the socket's type")]
    InvalidType,
    #[error("argument is malformed or out of range")]
    InvalidArg,
    #[error("resource is not available")]
    NotAvail,
    #[error("no matching entry was found")]
    NotFound,
    #[error("a conflicting entry already exists")]
    AlreadyExists,
    #[error("the socket pool has no free records")]
    PoolEmpty,
    #[error("the operation would block")]
    WouldBlock,
    #[error("the destination buffer was too small; data was truncated")]
    WouldOverflow,
    #[error("the operation timed out")]
    Timeout,
    #[error("the wait was aborted")]
    Abort,
    #[error("the wait object was deleted out from under the waiter")]
    ObjDel,
    #[error("no connection-table entry is associated with this socket")]
    InvalidConn,
    #[error("no usable source address exists for this destination")]
    InvalidAddrSrc,
    #[error("the connection has entered an irrecoverable fault state")]
    ConnClosedFault,
    #[error("the peer has closed the receive direction")]
    ConnCloseRx,
    #[error("the operation was accepted but has not completed yet")]
    OpInProgress,
    #[error("the operation exceeded its retry budget")]
    RetryMax,
    #[error("the owning interface's link is down")]
    IfLinkDown,
    #[error("no route to the next hop exists")]
    NextHop,
    #[error("a receive-path failure occurred")]
    Rx,
    #[error("a transmit-path failure occurred")]
    Tx,
    #[error("the operation failed")]
    Fail,
}

pub type Result<T> = core::result::Result<T, Error>;
