//! Transport Layer
//!
//! A transport moves whole messages, in order, between two endpoints and
//! reports when it fails or closes. Channels own one `Arc<dyn Transport>`
//! and drive it from two tasks on the dispatch thread: a reader looping on
//! [`Transport::receive`] and a writer draining the channel's flushed
//! frames into [`Transport::send`]. Send and receive must therefore be
//! usable concurrently through `&self`.

use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub mod memory;
pub mod tcp;

#[cfg(test)]
mod tests;

pub use memory::MemoryTransport;
pub use tcp::{TcpTransport, TcpTransportListener};

/// Ordered, message-oriented transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message
    async fn send(&self, message: Bytes) -> Result<()>;

    /// Send message with timeout
    async fn send_timeout(&self, message: Bytes, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.send(message))
            .await
            .map_err(|_| TransportError::timeout("send", millis(timeout)))?
    }

    /// Receive the next message; `TransportError::Closed` once the peer is gone
    async fn receive(&self) -> Result<Bytes>;

    /// Receive message with timeout
    async fn receive_timeout(&self, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| TransportError::timeout("receive", millis(timeout)))?
    }

    /// Close the transport; pending receives on both ends complete with `Closed`
    async fn close(&self) -> Result<()>;

    fn is_healthy(&self) -> bool;

    fn transport_info(&self) -> TransportInfo;
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// TCP stream with length-prefixed messages
    Tcp,
    /// In-process queue pair
    Memory,
}

impl TransportType {
    /// Value of the `TransportName` peer attribute
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Memory => "Loop",
        }
    }
}

/// Transport information for logging and peer naming
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub transport_type: TransportType,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
