//! Receive demultiplexer (spec §4.3 C3): the single northbound entry point
//! a southbound datagram engine or IP layer calls when a packet arrives.
//!
//! Grounded in the teacher's `tcp_listener.rs`/`udp_listener.rs` tuple
//! lookup (`get_recv`, matching an incoming packet's tuple against a
//! listener/endpoint entry), generalized to the shared [`crate::conn_table`]
//! tuple search.

use crate::addr::{SocketAddr, Tuple};
use crate::conn_table::Protocol;
use crate::error::Result;
use crate::layer::SocketLayer;
use crate::pool::{DatagramPacket, RxQueue};
use crate::select::SelEvent;

impl SocketLayer {
    /// A raw datagram arrived from the southbound datagram engine.
    /// Delivered strictly by-value: there is no backpressure signal to the
    /// network below this layer (spec §4.3 "Enqueue rules": over-capacity
    /// datagrams are dropped, not refused upstream).
    pub fn rx_datagram(&self, src: SocketAddr, dst: SocketAddr, data: &[u8]) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let tuple = Tuple::full(dst, src);
        let (_, handle) = match g.conns.search_for_rx(Protocol::Udp, &tuple) {
            Some(hit) => hit,
            None => {
                log::trace!("rx_datagram: no match for {:?} <- {:?}, dropping", dst, src);
                return Ok(());
            }
        };
        let rec = match g.pool.get_mut(handle) {
            Ok(rec) => rec,
            Err(_) => return Ok(()),
        };
        let RxQueue::Datagram(q) = &mut rec.rx_q else {
            return Ok(());
        };
        // Single-packet atomicity allowance (spec §4.3): a packet that
        // would itself not fit is still accepted if the queue is currently
        // empty, so a caller in steady state is never starved of a reply
        // strictly larger than the configured window.
        if q.iter().map(|p| p.data.len()).sum::<usize>() + data.len() > rec.rx_q_size_cfgd
            && !q.is_empty()
        {
            log::debug!("rx_datagram: {:?} rx queue full, dropping packet", handle);
            return Ok(());
        }
        q.push_back(DatagramPacket {
            from: src,
            data: data.to_vec(),
        });
        // Level-triggered: one signal per enqueued datagram (spec §4.3,
        // §9 "edge vs level").
        rec.waits.rx_q.signal();
        Self::post_sel(&g, handle, SelEvent::RxData);
        Ok(())
    }

    /// The stream engine reports application bytes are newly available on
    /// `conn`'s socket. Unlike datagrams, stream data lives in the engine's
    /// own buffer (spec §4.6 "Stream receive" reads straight out of it), so
    /// this only has to post readiness, edge-triggered (posting again while
    /// already-signaled data remains unread is a no-op duplicate wakeup,
    /// harmless for a semaphore).
    pub fn rx_stream_ready(&self, handle: crate::pool::SocketHandle) -> Result<()> {
        self.app_post_rx(handle)
    }
}
