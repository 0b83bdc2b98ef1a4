//! TCP Transport Implementation
//!
//! Each message is written as a 4-byte big-endian length followed by the
//! message bytes. The stream is split so the reader and writer tasks of a
//! channel never contend for the same lock.

use super::{Transport, TransportInfo, TransportType};
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info};

const LENGTH_PREFIX: usize = 4;

struct ReadSide {
    stream: OwnedReadHalf,
    /// Reused across messages; each frame is split off and frozen
    buffer: BytesMut,
}

struct WriteSide {
    stream: OwnedWriteHalf,
    buffer: BytesMut,
}

/// Connected TCP transport
pub struct TcpTransport {
    reader: Mutex<ReadSide>,
    writer: Mutex<WriteSide>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    max_message_size: usize,
    closed: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TcpTransport {
    /// Connect to a remote agent
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration, max_message_size: usize) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                TransportError::timeout(
                    format!("connect to {addr}"),
                    u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
                )
            })?
            .map_err(|e| TransportError::connection_with_source("Failed to connect", Some(addr), e))?;

        info!(peer = %addr, "TCP transport connected");
        Self::from_stream(stream, max_message_size)
    }

    /// Wrap an accepted or connected stream
    pub fn from_stream(stream: TcpStream, max_message_size: usize) -> Result<Self> {
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::network_with_source("Failed to set TCP_NODELAY", e))?;
        let local_addr = stream
            .local_addr()
            .map_err(|e| TransportError::network_with_source("Failed to read local address", e))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::network_with_source("Failed to read peer address", e))?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(ReadSide {
                stream: read_half,
                buffer: BytesMut::with_capacity(64 * 1024),
            }),
            writer: Mutex::new(WriteSide {
                stream: write_half,
                buffer: BytesMut::with_capacity(64 * 1024),
            }),
            local_addr,
            peer_addr,
            max_message_size,
            closed: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, message: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed("send on closed TCP transport"));
        }
        if message.len() > self.max_message_size {
            return Err(TransportError::framing(format!(
                "Message size {} exceeds maximum {}",
                message.len(),
                self.max_message_size
            )));
        }
        let len = u32::try_from(message.len())
            .map_err(|_| TransportError::framing("Message length does not fit the length prefix"))?;

        let mut side = self.writer.lock().await;
        let WriteSide { stream, buffer } = &mut *side;
        buffer.clear();
        buffer.extend_from_slice(&len.to_be_bytes());
        buffer.extend_from_slice(&message);

        stream
            .write_all(&buffer[..])
            .await
            .map_err(|e| TransportError::from_io("Failed to write message", e))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::from_io("Failed to flush TCP stream", e))?;

        let total = self
            .bytes_sent
            .fetch_add((LENGTH_PREFIX + message.len()) as u64, Ordering::Relaxed);
        debug!(
            peer = %self.peer_addr,
            bytes = message.len(),
            total_sent = total + (LENGTH_PREFIX + message.len()) as u64,
            "Sent message over TCP"
        );
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes> {
        let mut side = self.reader.lock().await;
        let ReadSide { stream, buffer } = &mut *side;

        let mut len_bytes = [0u8; LENGTH_PREFIX];
        stream
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| TransportError::from_io("Failed to read message length", e))?;

        let message_len = u32::from_be_bytes(len_bytes) as usize;
        if message_len > self.max_message_size {
            return Err(TransportError::framing(format!(
                "Message size {} exceeds maximum {}",
                message_len, self.max_message_size
            )));
        }

        buffer.clear();
        buffer.resize(message_len, 0);
        stream
            .read_exact(&mut buffer[..])
            .await
            .map_err(|e| TransportError::from_io("Failed to read message data", e))?;

        self.bytes_received
            .fetch_add((LENGTH_PREFIX + message_len) as u64, Ordering::Relaxed);
        debug!(peer = %self.peer_addr, bytes = message_len, "Received message over TCP");

        Ok(buffer.split_to(message_len).freeze())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut side = self.writer.lock().await;
        side.stream
            .shutdown()
            .await
            .map_err(|e| TransportError::from_io("Failed to shut down TCP stream", e))?;
        info!(peer = %self.peer_addr, "TCP transport closed");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            transport_type: TransportType::Tcp,
            local_address: Some(self.local_addr.to_string()),
            remote_address: Some(self.peer_addr.to_string()),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Accepts incoming channel connections
pub struct TcpTransportListener {
    listener: TcpListener,
    max_message_size: usize,
}

impl TcpTransportListener {
    pub async fn bind(addr: SocketAddr, max_message_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::network_with_source(format!("Failed to bind TCP listener on {addr}"), e))?;
        info!(address = %addr, "TCP listener bound");
        Ok(Self {
            listener,
            max_message_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::network_with_source("Failed to read listener address", e))
    }

    pub async fn accept(&self) -> Result<TcpTransport> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::network_with_source("Failed to accept connection", e))?;
        debug!(peer = %peer, "Accepted TCP connection");
        TcpTransport::from_stream(stream, self.max_message_size)
    }
}
