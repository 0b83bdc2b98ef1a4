//! Client view of a remote `Locator` service
//!
//! Mirrors the remote peer table from one `getPeers` snapshot plus the
//! event stream, and replays changes to local listeners with the same
//! contract as [`Locator`](super::Locator). When the channel closes every
//! mirrored peer is reported removed and the mirror is emptied.

use super::locator::LocatorListener;
use super::peer::Peer;
use super::service::{events, GET_PEERS_COMMAND};
use crate::channel::{Channel, ChannelListener, CommandResult, State, Token, LOCATOR_SERVICE};
use crate::error::ChannelError;
use crate::protocol::check_reply;
use codec::Value;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

struct ProxyState {
    peers: BTreeMap<String, Peer>,
    listeners: Vec<Arc<dyn LocatorListener>>,
    loaded: bool,
}

struct ProxyInner {
    channel: Channel,
    state: Mutex<ProxyState>,
}

enum Change {
    Added(Peer),
    Changed(Peer),
    Removed(String),
    HeartBeat(String),
}

#[derive(Clone)]
pub struct LocatorProxy {
    inner: Arc<ProxyInner>,
}

impl LocatorProxy {
    /// Start mirroring the `Locator` served by the other end of `channel`
    pub fn attach(channel: &Channel) -> Result<Self, ChannelError> {
        channel.dispatcher().check_dispatch_thread()?;
        if channel.state() != State::Open {
            return Err(ChannelError::NotConnected);
        }
        if !channel.remote_services().iter().any(|s| s == LOCATOR_SERVICE) {
            return Err(ChannelError::CommandNotRecognized {
                service: LOCATOR_SERVICE.to_string(),
                command: GET_PEERS_COMMAND.to_string(),
            });
        }

        let proxy = Self {
            inner: Arc::new(ProxyInner {
                channel: channel.clone(),
                state: Mutex::new(ProxyState {
                    peers: BTreeMap::new(),
                    listeners: Vec::new(),
                    loaded: false,
                }),
            }),
        };

        let weak = Arc::downgrade(&proxy.inner);
        channel.add_event_listener(
            LOCATOR_SERVICE,
            Arc::new(move |_channel: &Channel, name: &str, data: &[Value]| {
                if let Some(proxy) = Self::upgrade(&weak) {
                    proxy.handle_event(name, data);
                }
            }),
        )?;

        channel.add_channel_listener(Arc::new(CloseWatch(Arc::downgrade(&proxy.inner))))?;

        let weak = Arc::downgrade(&proxy.inner);
        channel.send_command(
            LOCATOR_SERVICE,
            GET_PEERS_COMMAND,
            &[],
            move |_token: &Token, result: CommandResult| {
                if let Some(proxy) = Self::upgrade(&weak) {
                    proxy.load(result);
                }
            },
        )?;
        Ok(proxy)
    }

    fn upgrade(weak: &Weak<ProxyInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// True once the initial `getPeers` snapshot has arrived
    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.inner.state.lock().peers.values().cloned().collect()
    }

    pub fn get_peer(&self, id: &str) -> Option<Peer> {
        self.inner.state.lock().peers.get(id).cloned()
    }

    pub fn add_listener(&self, listener: Arc<dyn LocatorListener>) -> Result<(), ChannelError> {
        self.inner.channel.dispatcher().check_dispatch_thread()?;
        self.inner.state.lock().listeners.push(listener);
        Ok(())
    }

    /// Callback fires once the snapshot and every earlier command are done
    pub fn sync<F>(&self, callback: F) -> Result<(), ChannelError>
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        self.inner.channel.sync(callback)
    }

    fn load(&self, result: CommandResult) {
        let data = match result.and_then(check_reply) {
            Ok(data) => data,
            Err(e) => {
                warn!(channel = %self.inner.channel.id(), error = %e, "getPeers failed");
                return;
            }
        };
        let snapshot = data.get(1).and_then(Value::as_list).unwrap_or_default();

        let mut changes = Vec::new();
        {
            let mut st = self.inner.state.lock();
            st.loaded = true;
            for value in snapshot {
                match Peer::from_value(value) {
                    Ok(peer) => changes.extend(upsert(&mut st.peers, peer)),
                    Err(e) => warn!(channel = %self.inner.channel.id(), error = %e, "Skipping remote peer"),
                }
            }
        }
        debug!(channel = %self.inner.channel.id(), peers = snapshot.len(), "Remote peer table loaded");
        self.notify(changes);
    }

    fn handle_event(&self, name: &str, data: &[Value]) {
        let first = data.first();
        let change = match name {
            events::PEER_ADDED | events::PEER_CHANGED => match first.map(Peer::from_value) {
                Some(Ok(peer)) => upsert(&mut self.inner.state.lock().peers, peer),
                Some(Err(e)) => {
                    warn!(channel = %self.inner.channel.id(), event = name, error = %e, "Bad locator event");
                    None
                }
                None => None,
            },
            events::PEER_REMOVED => first.and_then(Value::as_str).and_then(|id| {
                self.inner
                    .state
                    .lock()
                    .peers
                    .remove(id)
                    .map(|_| Change::Removed(id.to_string()))
            }),
            events::PEER_HEART_BEAT => first
                .and_then(Value::as_str)
                .filter(|id| self.inner.state.lock().peers.contains_key(*id))
                .map(|id| Change::HeartBeat(id.to_string())),
            other => {
                debug!(channel = %self.inner.channel.id(), event = other, "Unknown locator event");
                None
            }
        };
        self.notify(change.into_iter().collect());
    }

    fn forget_all(&self) {
        let removed: Vec<Change> = std::mem::take(&mut self.inner.state.lock().peers)
            .into_keys()
            .map(Change::Removed)
            .collect();
        debug!(channel = %self.inner.channel.id(), peers = removed.len(), "Remote peer table dropped");
        self.notify(removed);
    }

    fn notify(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        let listeners = self.inner.state.lock().listeners.clone();
        for change in &changes {
            for listener in &listeners {
                match change {
                    Change::Added(peer) => listener.peer_added(peer),
                    Change::Changed(peer) => listener.peer_changed(peer),
                    Change::Removed(id) => listener.peer_removed(id),
                    Change::HeartBeat(id) => listener.peer_heart_beat(id),
                }
            }
        }
    }
}

struct CloseWatch(Weak<ProxyInner>);

impl ChannelListener for CloseWatch {
    fn on_channel_closed(&self, _channel: &Channel, _error: Option<&ChannelError>) {
        if let Some(proxy) = LocatorProxy::upgrade(&self.0) {
            proxy.forget_all();
        }
    }
}

fn upsert(peers: &mut BTreeMap<String, Peer>, peer: Peer) -> Option<Change> {
    match peers.get(peer.id()) {
        Some(existing) if *existing == peer => None,
        Some(_) => {
            peers.insert(peer.id().to_string(), peer.clone());
            Some(Change::Changed(peer))
        }
        None => {
            peers.insert(peer.id().to_string(), peer.clone());
            Some(Change::Added(peer))
        }
    }
}
