//! Locator: the peer table, its listeners and discovery packet handling
//!
//! All mutation happens on the dispatch thread. Listener callbacks run
//! there too, after the table lock is released, so a listener may call
//! back into the locator.

use super::clock::{wall_clock_ms, Clock, SystemClock};
use super::packet::{DiscoveryPacket, SlaveEntry};
use super::peer::Peer;
use super::table::{PeerSource, PeerTable, Upsert};
use crate::config::LocatorConfig;
use crate::dispatch::Dispatcher;
use crate::error::ChannelError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Peer table change notifications
pub trait LocatorListener: Send + Sync {
    fn peer_added(&self, _peer: &Peer) {}

    fn peer_changed(&self, _peer: &Peer) {}

    fn peer_removed(&self, _id: &str) {}

    fn peer_heart_beat(&self, _id: &str) {}
}

/// Destination of an outgoing discovery packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTarget {
    Broadcast,
    To(SocketAddr),
}

/// Outgoing side of discovery, usually a UDP socket
pub trait PacketSink: Send + Sync {
    fn send_packet(&self, packet: &DiscoveryPacket, target: PacketTarget);
}

enum Notice {
    Added(Peer),
    Changed(Peer),
    Removed(String),
    HeartBeat(String),
}

struct LocatorState {
    table: PeerTable,
    listeners: Vec<Arc<dyn LocatorListener>>,
    slaves: HashMap<SocketAddr, u64>,
    sink: Option<Arc<dyn PacketSink>>,
}

struct LocatorInner {
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    retention_ms: u64,
    discovery_port: u16,
    state: Mutex<LocatorState>,
}

#[derive(Clone)]
pub struct Locator {
    inner: Arc<LocatorInner>,
}

impl Locator {
    pub fn new(dispatcher: Dispatcher, config: &LocatorConfig) -> Self {
        Self::with_clock(dispatcher, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(dispatcher: Dispatcher, config: &LocatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(LocatorInner {
                dispatcher,
                clock,
                retention_ms: config.retention_ms,
                discovery_port: config.discovery_port,
                state: Mutex::new(LocatorState {
                    table: PeerTable::new(),
                    listeners: Vec::new(),
                    slaves: HashMap::new(),
                    sink: None,
                }),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.inner.retention_ms)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.inner.state.lock().table.peers()
    }

    pub fn get_peer(&self, id: &str) -> Option<Peer> {
        self.inner.state.lock().table.get(id).cloned()
    }

    pub fn local_peers(&self) -> Vec<Peer> {
        self.inner.state.lock().table.local_peers()
    }

    /// Agents on ephemeral ports that registered with this one.
    ///
    /// Entry timestamps are wall-clock times of the last contact.
    pub fn slaves(&self) -> Vec<SlaveEntry> {
        let now = self.inner.clock.now_ms();
        let wall = wall_clock_ms();
        let mut slaves: Vec<SlaveEntry> = self
            .inner
            .state
            .lock()
            .slaves
            .iter()
            .map(|(addr, seen)| SlaveEntry {
                timestamp_ms: wall.saturating_sub(now.saturating_sub(*seen)),
                port: addr.port(),
                host: addr.ip().to_string(),
            })
            .collect();
        slaves.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        slaves
    }

    pub fn add_listener(&self, listener: Arc<dyn LocatorListener>) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        self.inner.state.lock().listeners.push(listener);
        Ok(())
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LocatorListener>) -> Result<bool, ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        let before = st.listeners.len();
        st.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        Ok(st.listeners.len() != before)
    }

    pub fn set_packet_sink(&self, sink: Arc<dyn PacketSink>) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        self.inner.state.lock().sink = Some(sink);
        Ok(())
    }

    /// Advertise a peer served by this process
    pub fn add_local_peer(&self, peer: Peer) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let packet = DiscoveryPacket::PeerInfo(peer.attributes().clone());
        self.upsert(peer, PeerSource::Local);
        self.send(&packet, PacketTarget::Broadcast);
        Ok(())
    }

    /// Register a peer that is known without discovery; it never expires
    pub fn add_manual_peer(&self, peer: Peer) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        self.upsert(peer, PeerSource::Manual);
        Ok(())
    }

    pub fn remove_peer(&self, id: &str) -> Result<Option<Peer>, ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let (removed, was_local) = {
            let mut st = self.inner.state.lock();
            let was_local = st.table.source(id) == Some(PeerSource::Local);
            (st.table.remove(id), was_local)
        };
        if removed.is_some() {
            if was_local {
                self.send(&DiscoveryPacket::PeersRemoved(vec![id.to_string()]), PacketTarget::Broadcast);
            }
            self.notify(vec![Notice::Removed(id.to_string())]);
        }
        Ok(removed)
    }

    /// Broadcast our presence and ask everyone else for theirs
    pub fn announce(&self) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let (locals, slaves) = {
            let st = self.inner.state.lock();
            (st.table.local_peers(), st.slaves.keys().copied().collect::<Vec<_>>())
        };
        let request = DiscoveryPacket::RequestInfo;
        self.send(&request, PacketTarget::Broadcast);
        for peer in &locals {
            let info = DiscoveryPacket::PeerInfo(peer.attributes().clone());
            self.send(&info, PacketTarget::Broadcast);
            for slave in &slaves {
                self.send(&info, PacketTarget::To(*slave));
            }
        }
        trace!(local_peers = locals.len(), slaves = slaves.len(), "Discovery announce");
        Ok(())
    }

    /// Expire discovered peers and slaves not heard from within the retention window
    pub fn prune_stale(&self) -> Result<Vec<String>, ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let now = self.inner.clock.now_ms();
        let retention = self.inner.retention_ms;
        let removed: Vec<String> = {
            let mut st = self.inner.state.lock();
            st.slaves.retain(|_, seen| now.saturating_sub(*seen) < retention);
            st.table
                .prune(now, retention)
                .into_iter()
                .map(|p| p.id().to_string())
                .collect()
        };
        for id in &removed {
            info!(peer = %id, retention_ms = retention, "Peer expired");
        }
        self.notify(removed.iter().cloned().map(Notice::Removed).collect());
        Ok(removed)
    }

    /// Apply one received discovery datagram.
    ///
    /// Malformed packets are logged and dropped; they never fail the caller.
    pub fn handle_packet(&self, data: &[u8], from: SocketAddr) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let packet = match DiscoveryPacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(from = %from, error = %e, "Dropping malformed discovery packet");
                return Ok(());
            }
        };
        trace!(from = %from, code = packet.code(), "Discovery packet");

        match packet {
            DiscoveryPacket::RequestInfo => {
                if from.port() != self.inner.discovery_port {
                    self.remember_slave(from);
                }
                for peer in self.local_peers() {
                    self.send(
                        &DiscoveryPacket::PeerInfo(peer.attributes().clone()),
                        PacketTarget::To(from),
                    );
                }
            }
            DiscoveryPacket::PeerInfo(attributes) => match Peer::from_attributes(attributes) {
                Ok(peer) => {
                    let is_local = self.inner.state.lock().table.source(peer.id()) == Some(PeerSource::Local);
                    if !is_local {
                        self.upsert(peer, PeerSource::Discovered);
                    }
                }
                Err(e) => warn!(from = %from, error = %e, "Dropping peer info"),
            },
            DiscoveryPacket::RequestSlaves => {
                self.send(&DiscoveryPacket::SlavesInfo(self.slaves()), PacketTarget::To(from));
            }
            DiscoveryPacket::SlavesInfo(entries) => {
                for entry in entries {
                    let Ok(ip) = entry.host.parse::<IpAddr>() else {
                        debug!(host = %entry.host, "Skipping slave with unparsable host");
                        continue;
                    };
                    let addr = SocketAddr::new(ip, entry.port);
                    self.remember_slave(addr);
                    self.send(&DiscoveryPacket::RequestInfo, PacketTarget::To(addr));
                }
            }
            DiscoveryPacket::PeersRemoved(ids) => {
                let mut removed = Vec::new();
                {
                    let mut st = self.inner.state.lock();
                    for id in ids {
                        if st.table.source(&id) == Some(PeerSource::Discovered) && st.table.remove(&id).is_some() {
                            removed.push(id);
                        }
                    }
                }
                self.notify(removed.into_iter().map(Notice::Removed).collect());
            }
        }
        Ok(())
    }

    fn remember_slave(&self, addr: SocketAddr) {
        let now = self.inner.clock.now_ms();
        if self.inner.state.lock().slaves.insert(addr, now).is_none() {
            debug!(slave = %addr, "Slave agent registered");
        }
    }

    fn upsert(&self, peer: Peer, source: PeerSource) {
        let now = self.inner.clock.now_ms();
        let outcome = self.inner.state.lock().table.upsert(peer.clone(), source, now);
        let notice = match outcome {
            Upsert::Added => {
                debug!(peer = %peer.id(), transport = %peer.transport_name(), "Peer added");
                Notice::Added(peer)
            }
            Upsert::Changed => {
                debug!(peer = %peer.id(), "Peer changed");
                Notice::Changed(peer)
            }
            Upsert::HeartBeat => Notice::HeartBeat(peer.id().to_string()),
        };
        self.notify(vec![notice]);
    }

    fn send(&self, packet: &DiscoveryPacket, target: PacketTarget) {
        let sink = self.inner.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.send_packet(packet, target);
        }
    }

    fn notify(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let listeners = self.inner.state.lock().listeners.clone();
        for notice in &notices {
            for listener in &listeners {
                match notice {
                    Notice::Added(peer) => listener.peer_added(peer),
                    Notice::Changed(peer) => listener.peer_changed(peer),
                    Notice::Removed(id) => listener.peer_removed(id),
                    Notice::HeartBeat(id) => listener.peer_heart_beat(id),
                }
            }
        }
    }
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Locator")
            .field("peers", &st.table.len())
            .field("slaves", &st.slaves.len())
            .field("retention_ms", &self.inner.retention_ms)
            .finish()
    }
}
