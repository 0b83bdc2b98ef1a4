//! UDP discovery driver
//!
//! The first agent on a host binds the well-known discovery port and acts
//! as master. Later agents fall back to an ephemeral port and run as
//! slaves. The master learns of them from their requests and relays its
//! announcements to them directly.
//!
//! ```text
//!   recv_from ──► Locator::handle_packet ──► PacketSink ──► send_to
//!   interval  ──► Locator::announce
//!   interval  ──► Locator::prune_stale
//! ```
//!
//! All three loops are tasks on the dispatch thread.

use super::locator::{Locator, PacketSink, PacketTarget};
use super::packet::DiscoveryPacket;
use crate::config::LocatorConfig;
use crate::error::{ChannelError, TransportError};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryRole {
    /// Owns the discovery port
    Master,
    /// Bound to an ephemeral port because another agent owns the discovery port
    Slave,
}

pub struct UdpDiscovery {
    socket: UdpSocket,
    role: DiscoveryRole,
    local_addr: SocketAddr,
    broadcast: SocketAddr,
    master: SocketAddr,
    stop: watch::Sender<bool>,
}

impl UdpDiscovery {
    /// Bind the discovery socket.
    ///
    /// Must be awaited on the dispatch thread so the socket is registered with
    /// the runtime that later drives it.
    pub async fn bind(config: &LocatorConfig) -> Result<Arc<Self>, TransportError> {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let (socket, role) = match UdpSocket::bind(SocketAddr::new(any, config.discovery_port)).await {
            Ok(socket) => (socket, DiscoveryRole::Master),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                info!(port = config.discovery_port, "Discovery port taken; running as slave");
                let socket = UdpSocket::bind(SocketAddr::new(any, 0))
                    .await
                    .map_err(|e| TransportError::network_with_source("Failed to bind ephemeral discovery socket", e))?;
                (socket, DiscoveryRole::Slave)
            }
            Err(e) => {
                return Err(TransportError::network_with_source(
                    format!("Failed to bind discovery port {}", config.discovery_port),
                    e,
                ))
            }
        };

        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::network_with_source("Failed to enable broadcast", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::network_with_source("Failed to get discovery address", e))?;
        let broadcast_ip: IpAddr = config.broadcast_address.parse().map_err(|e| {
            TransportError::network_with_source(format!("Invalid broadcast address {}", config.broadcast_address), e)
        })?;
        let (stop, _) = watch::channel(false);

        info!(addr = %local_addr, ?role, "Discovery socket bound");
        Ok(Arc::new(Self {
            socket,
            role,
            local_addr,
            broadcast: SocketAddr::new(broadcast_ip, config.discovery_port),
            master: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.discovery_port),
            stop,
        }))
    }

    pub fn role(&self) -> DiscoveryRole {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Become the locator's packet sink and start the receive, announce and prune loops
    pub fn start(self: &Arc<Self>, locator: &Locator, config: &LocatorConfig) -> Result<(), ChannelError> {
        locator.set_packet_sink(self.clone())?;
        let dispatcher = locator.dispatcher();
        dispatcher.spawn(receive_loop(self.clone(), locator.clone()))?;
        dispatcher.spawn(tick_loop(self.clone(), config.broadcast_interval(), {
            let locator = locator.clone();
            move || locator.announce().map(|_| ())
        }))?;
        dispatcher.spawn(tick_loop(self.clone(), config.prune_interval(), {
            let locator = locator.clone();
            move || locator.prune_stale().map(|_| ())
        }))?;

        if self.role == DiscoveryRole::Slave {
            // Learn the other agents sharing this host
            self.send_packet(&DiscoveryPacket::RequestSlaves, PacketTarget::To(self.master));
        }
        Ok(())
    }

    /// Stop all loops; the socket closes when the last task drops it
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

impl PacketSink for UdpDiscovery {
    fn send_packet(&self, packet: &DiscoveryPacket, target: PacketTarget) {
        let addr = match target {
            PacketTarget::Broadcast => self.broadcast,
            PacketTarget::To(addr) => addr,
        };
        if let Err(e) = self.socket.try_send_to(&packet.encode(), addr) {
            debug!(to = %addr, code = packet.code(), error = %e, "Discovery send failed");
        }
    }
}

impl std::fmt::Debug for UdpDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpDiscovery")
            .field("role", &self.role)
            .field("local_addr", &self.local_addr)
            .field("broadcast", &self.broadcast)
            .finish()
    }
}

async fn receive_loop(discovery: Arc<UdpDiscovery>, locator: Locator) {
    let mut stop = discovery.stop.subscribe();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !*stop.borrow() {
        tokio::select! {
            _ = stop.changed() => break,
            received = discovery.socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    if let Err(e) = locator.handle_packet(&buf[..len], from) {
                        warn!(error = %e, "Discovery packet not handled");
                    }
                }
                // ICMP port-unreachable surfaces as a reset on some platforms
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!(error = %e, "Discovery receive failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    debug!("Discovery receive loop stopped");
}

async fn tick_loop<F>(discovery: Arc<UdpDiscovery>, period: Duration, mut tick: F)
where
    F: FnMut() -> Result<(), ChannelError> + Send + 'static,
{
    let mut stop = discovery.stop.subscribe();
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    while !*stop.borrow() {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                if let Err(e) = tick() {
                    warn!(error = %e, "Discovery tick failed");
                }
            }
        }
    }
}
