//! Readiness multiplexer support types (spec §4.7 C7).
//!
//! The scan/register/sleep/rescan algorithm itself lives in
//! [`crate::layer`] (it needs the whole pool); this module holds the small
//! pieces every watched socket carries: the read/write/except mask, the
//! registered wait object ([`SelObj`]), and the event -> mask table spec
//! §4.7 specifies for posting.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::wait::Semaphore;

bitflags::bitflags! {
    /// Which of read/write/except a `select` caller (or a [`SelObj`]
    /// registration) is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const ERR   = 0b100;
    }
}

/// One registration of a caller's wakeup semaphore against a socket's
/// `sel_list` (spec §3, §4.7 step 5).
pub struct SelObj {
    pub id: u64,
    pub mask: Interest,
    pub wake: Arc<Semaphore>,
    /// Set by `sel_abort` for this specific registration (spec §4.7 `sel_abort`
    /// / scenario S5): distinguishes "this socket was explicitly aborted"
    /// from "some other watched socket in the same call woke us".
    pub aborted: Arc<AtomicBool>,
}

/// The lifecycle/data events that can post a `select` wakeup (spec §4.7's
/// event/mask table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelEvent {
    RxData,
    RxAbort,
    TxData,
    ConnReqSignal,
    ConnAcceptSignal,
    ConnReqAbort,
    ConnCloseSignal,
    ConnCloseAbort,
}

impl SelEvent {
    pub fn mask(self) -> Interest {
        use SelEvent::*;
        match self {
            RxData => Interest::READ,
            RxAbort => Interest::READ | Interest::ERR,
            TxData => Interest::WRITE,
            ConnReqSignal | ConnAcceptSignal => Interest::READ | Interest::WRITE,
            ConnReqAbort | ConnCloseSignal | ConnCloseAbort => {
                Interest::READ | Interest::WRITE | Interest::ERR
            }
        }
    }
}

/// Post `event` to every [`SelObj`] registered in `sel_list` whose mask
/// intersects the event's mask (spec §4.7 "Per-event posting").
pub fn post_event(sel_list: &[SelObj], event: SelEvent) {
    let mask = event.mask();
    for obj in sel_list {
        if obj.mask.intersects(mask) {
            obj.wake.signal();
        }
    }
}
