//! Link-local transport: one UDP socket joined to the multicast group. Every message is sent to
//! the group; receivers filter on the destination field.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Context;
use hopshare_core::wire::{encode_frame, MAX_FRAME_LEN};
use hopshare_core::Message;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

pub struct Transport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Transport {
    /// Join `group` on `port`. Address reuse lets several nodes share one host.
    pub fn join(group: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        {
            if let Err(e) = socket.set_reuse_port(true) {
                tracing::warn!(error = %e, "SO_REUSEPORT unavailable");
            }
        }
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;
        let std_sock: std::net::UdpSocket = socket.into();
        Ok(Self {
            socket: UdpSocket::from_std(std_sock)?,
            target: SocketAddr::V4(SocketAddrV4::new(group, port)),
        })
    }

    /// Plain socket sending to a fixed address.
    #[cfg(test)]
    pub fn with_socket(socket: UdpSocket, target: SocketAddr) -> Self {
        Self { socket, target }
    }

    pub async fn send(&self, msg: &Message) -> anyhow::Result<()> {
        let frame = encode_frame(msg).context("encode message")?;
        self.socket
            .send_to(&frame, self.target)
            .await
            .with_context(|| format!("send to {}", self.target))?;
        Ok(())
    }

    /// Receive one datagram into `buf`; returns its length.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (n, _) = self.socket.recv_from(buf).await?;
        Ok(n)
    }
}

/// Receive buffer large enough for any frame.
pub fn recv_buffer() -> Vec<u8> {
    vec![0u8; MAX_FRAME_LEN]
}
