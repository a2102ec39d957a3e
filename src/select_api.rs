//! `select`-style readiness multiplexing (spec §4.7 C7).
//!
//! The per-socket pieces ([`crate::select::SelObj`], the event/mask table,
//! `post_event`) live in [`crate::select`]; this is the scan/register/sleep
//! algorithm itself, which needs the whole pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::layer::{Inner, SocketLayer};
use crate::pool::{RxQueue, SockType, SocketHandle, State};
use crate::select::{Interest, SelObj};
use crate::wait::{Semaphore, WaitOutcome};

/// A `select` call's readiness result for one watched socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub handle: SocketHandle,
    pub interest: Interest,
}

fn readiness(g: &Inner, handle: SocketHandle, watch: Interest) -> Interest {
    let rec = match g.pool.get(handle) {
        Ok(rec) => rec,
        Err(_) => return Interest::ERR,
    };
    // spec §4.7 Exception row: a CLOSED_FAULT socket is reported readable,
    // writable, and exceptional, regardless of socket type.
    if rec.state == State::ClosedFault {
        return watch | Interest::ERR;
    }
    let mut ready = Interest::empty();
    match rec.sock_type {
        SockType::Datagram => {
            if watch.contains(Interest::READ) {
                let has_data = matches!(&rec.rx_q, RxQueue::Datagram(q) if !q.is_empty());
                if has_data {
                    ready.insert(Interest::READ);
                }
            }
            // spec §4.7: "Write, datagram: always ready".
            if watch.contains(Interest::WRITE) {
                ready.insert(Interest::WRITE);
            }
        }
        SockType::Stream => {
            if watch.contains(Interest::READ) {
                let readable = match rec.state {
                    State::Listen => rec
                        .listener
                        .as_ref()
                        .map(|l| l.accept_q.iter().any(|e| e.is_ready))
                        .unwrap_or(false),
                    State::Conn | State::ConnDone => rec
                        .conn_id
                        .map(|id| g.transports.stream.is_rx_available(id))
                        .unwrap_or(false),
                    State::ClosingDataAvail => true,
                    _ => false,
                };
                if readable {
                    ready.insert(Interest::READ);
                }
            }
            if watch.contains(Interest::WRITE) {
                let writable = match rec.state {
                    State::ConnDone => true,
                    State::Conn => rec
                        .conn_id
                        .map(|id| g.transports.stream.is_tx_ready(id))
                        .unwrap_or(false),
                    _ => false,
                };
                if writable {
                    ready.insert(Interest::WRITE);
                }
            }
        }
    }
    ready & (watch | Interest::ERR)
}

impl SocketLayer {
    /// `select(watch[], timeout)` (spec §4.7): immediate scan; if nothing is
    /// ready and `timeout != Some(0)`, register a wait object on every
    /// watched socket and block until one fires, is aborted, or times out.
    pub fn select(&self, watch: &[(SocketHandle, Interest)], timeout: Option<Duration>) -> Result<Vec<Ready>> {
        let scan = |g: &Inner| -> Vec<Ready> {
            watch
                .iter()
                .filter_map(|&(h, mask)| {
                    let r = readiness(g, h, mask);
                    if r.is_empty() {
                        None
                    } else {
                        Some(Ready { handle: h, interest: r })
                    }
                })
                .collect()
        };

        let g = self.inner.lock().unwrap();
        let hit = scan(&g);
        if !hit.is_empty() || timeout == Some(Duration::ZERO) {
            return Ok(hit);
        }

        let id = self.next_sel_id();
        let wake = Arc::new(Semaphore::new(timeout));
        let aborted: Vec<Arc<AtomicBool>> = watch.iter().map(|_| Arc::new(AtomicBool::new(false))).collect();
        let mut g = g;
        for (&(h, mask), flag) in watch.iter().zip(&aborted) {
            if let Ok(rec) = g.pool.get_mut(h) {
                rec.sel_list.push(SelObj { id, mask, wake: wake.clone(), aborted: flag.clone() });
            }
        }
        drop(g);

        let outcome = wake.wait();

        let mut g = self.inner.lock().unwrap();
        for &(h, _) in watch {
            if let Ok(rec) = g.pool.get_mut(h) {
                rec.sel_list.retain(|o| o.id != id);
            }
        }
        match outcome {
            WaitOutcome::Timeout => Ok(Vec::new()),
            WaitOutcome::Abort | WaitOutcome::Signaled => {
                let mut hit = scan(&g);
                // spec §4.7 event table: `sel-abort` wakes any registration
                // watching READ, WRITE, or ERR, but scenario S5 is explicit
                // that the aborted socket itself is reported only in the
                // exception set, never read/write.
                for (&(h, _mask), flag) in watch.iter().zip(&aborted) {
                    if !flag.load(Ordering::SeqCst) {
                        continue;
                    }
                    match hit.iter_mut().find(|r| r.handle == h) {
                        Some(r) => r.interest.insert(Interest::ERR),
                        None => hit.push(Ready { handle: h, interest: Interest::ERR }),
                    }
                }
                Ok(hit)
            }
        }
    }

    /// `sel_abort(sock)` (spec §4.7): wake every `select` a socket is
    /// currently registered in, as if its readiness changed, without
    /// actually changing it — a caller re-scans and may find nothing ready
    /// unless the socket was explicitly watched, in which case it is forced
    /// into the result with an abort-equivalent exception (scenario S5).
    pub fn sel_abort(&self, handle: SocketHandle) -> Result<()> {
        let g = self.inner.lock().unwrap();
        let rec = g.pool.get(handle)?;
        for obj in &rec.sel_list {
            obj.aborted.store(true, Ordering::SeqCst);
            obj.wake.abort();
        }
        Ok(())
    }
}
