//! Contains the [`Transport`] trait and the UDP implementation of it.
//!
//! Sends are fire-and-forget: a datagram that is lost, or addressed to
//! nobody, is never reported back to the sender.

use async_trait::async_trait;
use std::{
    io,
    net::{SocketAddr, SocketAddrV4},
};
use thiserror::Error as ThisError;
use tokio::net::UdpSocket;

/// Size of the buffer datagrams are received into
pub const RECV_BUFFER: usize = 65_536;

/// Moves datagrams between a router and its neighbors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The address the transport receives on.
    fn local_addr(&self) -> SocketAddrV4;

    /// Sends one datagram.
    async fn send_to(&self, datagram: &[u8], to: SocketAddrV4) -> Result<(), TransportError>;

    /// Waits for the next datagram.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// A transport backed by a UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local: SocketAddrV4,
}

impl UdpTransport {
    /// Binds a socket to `address`.
    pub async fn bind(address: SocketAddrV4) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| TransportError::Bind { address, source })?;
        // Binding port 0 picks a port; report the one actually used
        let local = match socket.local_addr() {
            Ok(SocketAddr::V4(local)) => local,
            _ => address,
        };
        Ok(Self { socket, local })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    async fn send_to(&self, datagram: &[u8], to: SocketAddrV4) -> Result<(), TransportError> {
        self.socket
            .send_to(datagram, to)
            .await
            .map_err(|source| TransportError::Send { to, source })?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; RECV_BUFFER];
        let (len, _) = self
            .socket
            .recv_from(&mut buffer)
            .await
            .map_err(TransportError::Receive)?;
        buffer.truncate(len);
        Ok(buffer)
    }
}

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("Could not bind {address}: {source}")]
    Bind {
        address: SocketAddrV4,
        source: io::Error,
    },
    #[error("Could not send to {to}: {source}")]
    Send { to: SocketAddrV4, source: io::Error },
    #[error("Could not receive: {0}")]
    Receive(io::Error),
    #[error("The transport is no longer attached to its network")]
    Detached,
}
