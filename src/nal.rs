//! `embedded-nal` trait impls (SPEC_FULL.md §4): the crate's non-blocking
//! public surface, layered on top of the blocking/`select` API the rest of
//! the crate builds (`src/conn.rs`, `src/transfer.rs`). Grounded directly in
//! the teacher's own dependency on `embedded-nal = "0.6"`.

use embedded_nal::{TcpClientStack, TcpFullStack, UdpClientStack, UdpFullStack};

use crate::addr::{Family, SocketAddr};
use crate::error::Error;
use crate::layer::{BlockMode, CallFlags, ProtoHint, SocketLayer};
use crate::pool::SockType;

impl TcpClientStack for SocketLayer {
    type TcpSocket = crate::pool::SocketHandle;
    type Error = Error;

    fn socket(&mut self) -> Result<Self::TcpSocket, Self::Error> {
        let h = self.open(Family::V4, SockType::Stream, ProtoHint::Tcp)?;
        self.cfg_block(h, BlockMode::NoBlock)?;
        Ok(h)
    }

    fn connect(
        &mut self,
        socket: &mut Self::TcpSocket,
        remote: SocketAddr,
    ) -> nb::Result<(), Self::Error> {
        match SocketLayer::connect(self, *socket, remote) {
            Ok(()) => Ok(()),
            Err(Error::OpInProgress) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn is_connected(&mut self, socket: &Self::TcpSocket) -> Result<bool, Self::Error> {
        self.is_conn(*socket)
    }

    fn send(&mut self, socket: &mut Self::TcpSocket, buffer: &[u8]) -> nb::Result<usize, Self::Error> {
        match self.tx_data(*socket, buffer, CallFlags { peek: false, no_block: true }) {
            Ok(n) => Ok(n),
            Err(Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn receive(
        &mut self,
        socket: &mut Self::TcpSocket,
        buffer: &mut [u8],
    ) -> nb::Result<usize, Self::Error> {
        match self.rx_data(*socket, buffer, CallFlags { peek: false, no_block: true }) {
            Ok(r) => Ok(r.len),
            Err(Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn close(&mut self, socket: Self::TcpSocket) -> Result<(), Self::Error> {
        self.cfg_block(socket, BlockMode::NoBlock)?;
        match SocketLayer::close(self, socket) {
            Ok(()) | Err(Error::OpInProgress) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl TcpFullStack for SocketLayer {
    fn bind(&mut self, socket: &mut Self::TcpSocket, port: u16) -> Result<(), Self::Error> {
        let local = crate::addr::with_port(
            SocketAddr::V4(crate::addr::SocketAddrV4::new(crate::addr::Ipv4Addr::unspecified(), 0)),
            port,
        );
        SocketLayer::bind(self, *socket, local, false)
    }

    fn listen(&mut self, socket: &mut Self::TcpSocket) -> Result<(), Self::Error> {
        SocketLayer::listen(self, *socket, 4)
    }

    fn accept(
        &mut self,
        socket: &mut Self::TcpSocket,
    ) -> nb::Result<(Self::TcpSocket, SocketAddr), Self::Error> {
        match SocketLayer::accept(self, *socket) {
            Ok((child, addr)) => {
                self.cfg_block(child, BlockMode::NoBlock)?;
                Ok((child, addr))
            }
            Err(Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}

impl UdpClientStack for SocketLayer {
    type UdpSocket = crate::pool::SocketHandle;
    type Error = Error;

    fn socket(&mut self) -> Result<Self::UdpSocket, Self::Error> {
        let h = self.open(Family::V4, SockType::Datagram, ProtoHint::Udp)?;
        self.cfg_block(h, BlockMode::NoBlock)?;
        Ok(h)
    }

    fn connect(&mut self, socket: &mut Self::UdpSocket, remote: SocketAddr) -> Result<(), Self::Error> {
        SocketLayer::connect(self, *socket, remote)
    }

    fn send(&mut self, socket: &mut Self::UdpSocket, buffer: &[u8]) -> nb::Result<(), Self::Error> {
        match self.tx_data(*socket, buffer, CallFlags { peek: false, no_block: true }) {
            Ok(_) => Ok(()),
            Err(Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn receive(
        &mut self,
        socket: &mut Self::UdpSocket,
        buffer: &mut [u8],
    ) -> nb::Result<(usize, SocketAddr), Self::Error> {
        match self.rx_data(*socket, buffer, CallFlags { peek: false, no_block: true }) {
            Ok(r) => Ok((r.len, r.from.unwrap_or(SocketAddr::V4(crate::addr::SocketAddrV4::new(crate::addr::Ipv4Addr::unspecified(), 0))))),
            Err(Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn close(&mut self, socket: Self::UdpSocket) -> Result<(), Self::Error> {
        SocketLayer::close(self, socket)
    }
}

impl UdpFullStack for SocketLayer {
    fn bind(&mut self, socket: &mut Self::UdpSocket, port: u16) -> Result<(), Self::Error> {
        let local = crate::addr::with_port(
            SocketAddr::V4(crate::addr::SocketAddrV4::new(crate::addr::Ipv4Addr::unspecified(), 0)),
            port,
        );
        SocketLayer::bind(self, *socket, local, false)
    }

    fn send_to(
        &mut self,
        socket: &mut Self::UdpSocket,
        remote: SocketAddr,
        buffer: &[u8],
    ) -> nb::Result<(), Self::Error> {
        match self.tx_data_to(*socket, buffer, remote, CallFlags { peek: false, no_block: true }) {
            Ok(_) => Ok(()),
            Err(Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}
