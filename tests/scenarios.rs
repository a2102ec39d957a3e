//! End-to-end scenarios against the in-memory loopback transports
//! (`netstack_sockets::transport::mock`), one per seed scenario in the
//! socket layer's design notes (S1-S6) plus a few of its quantified
//! invariants.

use std::time::Duration;

use netstack_sockets::transport::mock;
use netstack_sockets::{
    BlockMode, CallFlags, Family, ProtoHint, SockType, SocketAddr, SocketAddrV4, SocketLayer,
};

fn v4(ip: [u8; 4], port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(ip.into(), port))
}

fn wildcard_v4(port: u16) -> SocketAddr {
    v4([0, 0, 0, 0], port)
}

/// S1: UDP echo — bind, peer sends a datagram, peek then read then
/// would-block on an empty queue.
#[test]
fn s1_udp_echo() {
    let layer = SocketLayer::new(mock::transports());
    let s1 = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    layer.bind(s1, wildcard_v4(7), false).unwrap();

    let peer = v4([10, 0, 0, 5], 9000);
    layer.rx_datagram(peer, v4([127, 0, 0, 1], 7), b"ping").unwrap();

    let mut buf = [0u8; 8];
    let r = layer
        .rx_data(s1, &mut buf, CallFlags { peek: true, no_block: false })
        .unwrap();
    assert_eq!(r.len, 4);
    assert_eq!(&buf[..4], b"ping");
    assert_eq!(r.from, Some(peer));

    let r = layer
        .rx_data(s1, &mut buf, CallFlags { peek: false, no_block: false })
        .unwrap();
    assert_eq!(r.len, 4);
    assert_eq!(r.from, Some(peer));

    let err = layer
        .rx_data(s1, &mut buf, CallFlags { peek: false, no_block: true })
        .unwrap_err();
    assert_eq!(err, netstack_sockets::Error::WouldBlock);
}

/// S2: TCP listener accept — bind/listen, simulate the transport completing
/// a handshake, accept, and check the listener's child count and the
/// child's peer address.
#[test]
fn s2_tcp_listener_accept() {
    let (transports, stream) = mock::transports_with_shared_stream();
    let layer = SocketLayer::new(transports);

    let l = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();
    layer.bind(l, wildcard_v4(80), false).unwrap();
    layer.listen(l, 3).unwrap();

    let peer = v4([192, 168, 1, 50], 54321);
    // The transport layer completes a 3-way handshake: queue the child
    // with the peer's address, then mark it ready once the peer's ACK is
    // seen.
    let conn = layer.conn_child_add(l, peer).unwrap();
    layer.conn_signal_accept(l, conn).unwrap();

    let (child, addr) = layer.accept(l).unwrap();
    assert_eq!(addr.port(), peer.port());
    assert_eq!(layer.cfg_conn_child_q_size_get(l).unwrap(), 8);
    assert!(layer.is_conn(child).unwrap());

    let _ = stream; // keep the shared engine handle alive for the test
}

/// S3: non-blocking connect — `conn` returns `OP_IN_PROGRESS` immediately;
/// `select` reports nothing ready until the handshake completes, then
/// reports the socket writable.
#[test]
fn s3_nonblocking_connect() {
    let (transports, _stream) = mock::transports_with_shared_stream();
    let layer = SocketLayer::new(transports);

    let s = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();
    layer.cfg_block(s, BlockMode::NoBlock).unwrap();

    let err = layer.connect(s, v4([8, 8, 8, 8], 443)).unwrap_err();
    assert_eq!(err, netstack_sockets::Error::OpInProgress);

    let ready = layer
        .select(&[(s, netstack_sockets::Interest::WRITE)], Some(Duration::ZERO))
        .unwrap();
    assert!(ready.is_empty());

    layer.conn_signal_req(s, true).unwrap();

    let ready = layer
        .select(&[(s, netstack_sockets::Interest::WRITE)], Some(Duration::from_millis(200)))
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].handle, s);
    assert!(ready[0].interest.contains(netstack_sockets::Interest::WRITE));
}

/// S4: short datagram read — an oversized datagram is truncated to the
/// caller's buffer and the excess discarded, not re-delivered.
#[test]
fn s4_short_datagram_read() {
    let layer = SocketLayer::new(mock::transports());
    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    layer.bind(s, wildcard_v4(9), false).unwrap();

    let data = vec![0xABu8; 1000];
    layer.rx_datagram(v4([1, 2, 3, 4], 1111), v4([127, 0, 0, 1], 9), &data).unwrap();

    let mut buf = [0u8; 512];
    let r = layer
        .rx_data(s, &mut buf, CallFlags { peek: false, no_block: false })
        .unwrap();
    assert_eq!(r.len, 512);
    assert!(r.truncated);

    let err = layer
        .rx_data(s, &mut buf, CallFlags { peek: false, no_block: true })
        .unwrap_err();
    assert_eq!(err, netstack_sockets::Error::WouldBlock);
}

/// S5: select abort — a socket explicitly aborted shows up in neither the
/// read nor write set, only the exception set.
#[test]
fn s5_select_abort() {
    let layer = std::sync::Arc::new(SocketLayer::new(mock::transports()));
    let s = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();
    layer.bind(s, wildcard_v4(0), true).unwrap();

    let l2 = layer.clone();
    let t = std::thread::spawn(move || {
        l2.select(
            &[(s, netstack_sockets::Interest::READ | netstack_sockets::Interest::WRITE)],
            None,
        )
    });

    std::thread::sleep(Duration::from_millis(50));
    layer.sel_abort(s).unwrap();

    let ready = t.join().unwrap().unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].handle, s);
    assert_eq!(ready[0].interest, netstack_sockets::Interest::ERR);
}

/// S6: orderly close of a stream with queued data — the peer sends bytes
/// then a FIN; the application drains what's buffered, then gets a
/// zero-length read signaling the connection is closed.
#[test]
fn s6_orderly_close_with_queued_data() {
    let (transports, stream) = mock::transports_with_shared_stream();
    let layer = SocketLayer::new(transports);

    let s = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();
    layer.cfg_block(s, BlockMode::NoBlock).unwrap();
    let err = layer.connect(s, v4([9, 9, 9, 9], 443)).unwrap_err();
    assert_eq!(err, netstack_sockets::Error::OpInProgress);
    layer.conn_signal_req(s, true).unwrap();
    layer.connect(s, v4([9, 9, 9, 9], 443)).unwrap();

    let conn = layer.get_conn_transport_id(s).unwrap().unwrap();
    stream.deliver(conn, &[0u8; 100]);
    stream.close_rx(conn);

    let mut buf = [0u8; 40];
    let r = layer.rx_data(s, &mut buf, CallFlags::default()).unwrap();
    assert_eq!(r.len, 40);
    let r = layer.rx_data(s, &mut buf, CallFlags::default()).unwrap();
    assert_eq!(r.len, 40);
    let r = layer.rx_data(s, &mut buf, CallFlags::default()).unwrap();
    assert_eq!(r.len, 20);
    let r = layer.rx_data(s, &mut buf, CallFlags::default()).unwrap();
    assert_eq!(r.len, 0);
}

/// Testable property 6: two binds of the same tuple by different sockets
/// -- one must fail with `ALREADY_EXISTS`.
#[test]
fn bind_collision_is_rejected() {
    let layer = SocketLayer::new(mock::transports());
    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    let t = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    layer.bind(s, wildcard_v4(4000), false).unwrap();
    let err = layer.bind(t, wildcard_v4(4000), false).unwrap_err();
    assert_eq!(err, netstack_sockets::Error::AlreadyExists);
}

/// Idempotence: `bind(s, A)` followed by `bind(s, A)` succeeds.
#[test]
fn bind_is_idempotent() {
    let layer = SocketLayer::new(mock::transports());
    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    layer.bind(s, wildcard_v4(4001), false).unwrap();
    layer.bind(s, wildcard_v4(4001), false).unwrap();
}

/// spec §4.6 "Datagram send" step 2: sending on an unbound (CLOSED) socket
/// implicitly binds it ephemerally first rather than failing.
#[test]
fn udp_send_implicitly_binds_unbound_socket() {
    let layer = SocketLayer::new(mock::transports());
    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();

    let n = layer
        .tx_data_to(s, b"hi", v4([127, 0, 0, 1], 9000), CallFlags::default())
        .unwrap();
    assert_eq!(n, 2);
    assert!(layer.get_local_ip_addr(s).unwrap().is_some());
}

/// spec §4.4 step 5: rebinding a connected socket onto a local tuple that
/// only half-matches another socket's binding is allowed once this socket
/// has a remote address (the two are distinguishable by the full tuple),
/// even though the same rebind with no remote would collide.
#[test]
fn rebind_half_match_allowed_when_remote_present() {
    let layer = SocketLayer::new(mock::transports());
    let other = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    layer.bind(other, wildcard_v4(5000), false).unwrap();

    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    layer.bind(s, wildcard_v4(6000), false).unwrap();
    layer.connect(s, v4([8, 8, 8, 8], 53)).unwrap();

    // Rebind onto the same local port `other` is already using; `s` is
    // connected, so the collision check sees a full tuple, not a bare half
    // match, and must let it through.
    layer.bind(s, wildcard_v4(5000), false).unwrap();
}

/// spec §4.7 Exception row: a CLOSED_FAULT socket is reported readable,
/// writable, and exceptional, regardless of what was actually watched.
#[test]
fn select_reports_closed_fault_on_all_three_sets() {
    let layer = SocketLayer::new(mock::transports());
    let s = layer.open(Family::V4, SockType::Stream, ProtoHint::Tcp).unwrap();
    layer.close_from_conn(s).unwrap();

    let ready = layer
        .select(
            &[(s, netstack_sockets::Interest::READ | netstack_sockets::Interest::WRITE)],
            Some(Duration::ZERO),
        )
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(
        ready[0].interest,
        netstack_sockets::Interest::READ | netstack_sockets::Interest::WRITE | netstack_sockets::Interest::ERR
    );
}

/// spec §4.7: "Write, datagram: always ready" — true even for an unbound
/// (CLOSED) datagram socket, unlike stream sockets.
#[test]
fn select_datagram_write_always_ready() {
    let layer = SocketLayer::new(mock::transports());
    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();

    let ready = layer
        .select(&[(s, netstack_sockets::Interest::WRITE)], Some(Duration::ZERO))
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].interest, netstack_sockets::Interest::WRITE);
}

/// Testable property 5: pool in-use count returns to its prior value after
/// an open/close round trip.
#[test]
fn pool_stats_round_trip() {
    let layer = SocketLayer::new(mock::transports());
    let before = layer.pool_stat_get().used;
    let s = layer.open(Family::V4, SockType::Datagram, ProtoHint::Udp).unwrap();
    assert_eq!(layer.pool_stat_get().used, before + 1);
    layer.close(s).unwrap();
    assert_eq!(layer.pool_stat_get().used, before);
}
