//! In-process transport pair
//!
//! Two endpoints joined by unbounded queues. Used for loopback channels
//! inside one process and to drive channel tests without sockets;
//! [`MemoryTransport::inject_failure`] simulates a broken connection.

use super::{Transport, TransportInfo, TransportType};
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

enum Delivery {
    Message(Bytes),
    Failure(String),
    Closed,
}

pub struct MemoryTransport {
    name: String,
    /// Into the peer's inbound queue; taken on close
    outbound: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    /// Into this endpoint's own inbound queue, for local close and failures
    loopback: mpsc::UnboundedSender<Delivery>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    closed: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl MemoryTransport {
    /// Connected pair of endpoints
    pub fn pair(name: &str) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self::endpoint(format!("{name}/a"), b_tx.clone(), a_tx.clone(), a_rx);
        let b = Self::endpoint(format!("{name}/b"), a_tx, b_tx, b_rx);
        (a, b)
    }

    fn endpoint(
        name: String,
        outbound: mpsc::UnboundedSender<Delivery>,
        loopback: mpsc::UnboundedSender<Delivery>,
        inbound: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            name,
            outbound: Mutex::new(Some(outbound)),
            loopback,
            inbound: tokio::sync::Mutex::new(inbound),
            closed: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Make this endpoint's next receive fail, after already queued messages
    pub fn inject_failure(&self, message: impl Into<String>) {
        let _ = self.loopback.send(Delivery::Failure(message.into()));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Bytes) -> Result<()> {
        let len = message.len() as u64;
        let guard = self.outbound.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| TransportError::closed(format!("{} is closed", self.name)))?;
        sender
            .send(Delivery::Message(message))
            .map_err(|_| TransportError::closed(format!("peer of {} is gone", self.name)))?;
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Delivery::Message(message)) => {
                self.bytes_received
                    .fetch_add(message.len() as u64, Ordering::Relaxed);
                Ok(message)
            }
            Some(Delivery::Failure(message)) => {
                debug!(transport = %self.name, %message, "Injected transport failure");
                Err(TransportError::network(message))
            }
            Some(Delivery::Closed) | None => {
                // Closed is sticky for every later receive
                let _ = self.loopback.send(Delivery::Closed);
                Err(TransportError::closed(format!("{} closed", self.name)))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(peer) = self.outbound.lock().take() {
            let _ = peer.send(Delivery::Closed);
        }
        let _ = self.loopback.send(Delivery::Closed);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            transport_type: TransportType::Memory,
            local_address: Some(self.name.clone()),
            remote_address: None,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(peer) = self.outbound.get_mut().take() {
            let _ = peer.send(Delivery::Closed);
        }
    }
}
