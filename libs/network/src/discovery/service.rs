//! Local `Locator` service
//!
//! Answers `sync`, `getPeers` and `redirect` over every channel it is
//! registered on, and forwards peer table changes to open channels as
//! `peerAdded`, `peerChanged`, `peerRemoved` and `peerHeartBeat` events.

use super::locator::{Locator, LocatorListener};
use super::peer::Peer;
use crate::channel::{Channel, Responder, Service, State, LOCATOR_SERVICE, SYNC_COMMAND};
use crate::error::ChannelError;
use crate::protocol::{codes, ErrorReport};
use codec::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub const GET_PEERS_COMMAND: &str = "getPeers";
pub const REDIRECT_COMMAND: &str = "redirect";

pub mod events {
    pub const PEER_ADDED: &str = "peerAdded";
    pub const PEER_CHANGED: &str = "peerChanged";
    pub const PEER_REMOVED: &str = "peerRemoved";
    pub const PEER_HEART_BEAT: &str = "peerHeartBeat";
}

pub struct LocatorService {
    locator: Locator,
    channels: Mutex<Vec<Channel>>,
}

impl LocatorService {
    /// Create the service and subscribe it to the locator's table
    pub fn register(locator: Locator) -> Result<Arc<Self>, ChannelError> {
        let service = Arc::new(Self {
            locator: locator.clone(),
            channels: Mutex::new(Vec::new()),
        });
        locator.add_listener(service.clone())?;
        Ok(service)
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Channels currently receiving peer events
    pub fn open_channels(&self) -> usize {
        self.channels.lock().len()
    }

    fn broadcast(&self, event: &str, data: Value) {
        let channels = self.channels.lock().clone();
        let data = [data];
        for channel in channels {
            if channel.state() != State::Open {
                continue;
            }
            if let Err(e) = channel.send_event(LOCATOR_SERVICE, event, &data) {
                warn!(channel = %channel.id(), event, error = %e, "Failed to forward locator event");
            }
        }
    }
}

impl Service for LocatorService {
    fn name(&self) -> &str {
        LOCATOR_SERVICE
    }

    fn handle_command(&self, channel: &Channel, command: &str, _args: Vec<Value>, responder: Responder) {
        let sent = match command {
            SYNC_COMMAND => responder.reply(vec![Value::Null]),
            GET_PEERS_COMMAND => {
                let peers: Vec<Value> = self.locator.peers().iter().map(Peer::to_value).collect();
                responder.reply(vec![Value::Null, Value::from(peers)])
            }
            REDIRECT_COMMAND => responder.reply_error(ErrorReport::new(
                codes::UNSUPPORTED,
                "Redirect is not supported by this agent",
            )),
            _ => responder.not_recognized(),
        };
        if let Err(e) = sent {
            debug!(channel = %channel.id(), command, error = %e, "Locator reply not sent");
        }
    }

    fn on_channel_opened(&self, channel: &Channel) {
        self.channels.lock().push(channel.clone());
    }

    fn on_channel_closed(&self, channel: &Channel) {
        self.channels.lock().retain(|c| c.id() != channel.id());
    }
}

impl LocatorListener for LocatorService {
    fn peer_added(&self, peer: &Peer) {
        self.broadcast(events::PEER_ADDED, peer.to_value());
    }

    fn peer_changed(&self, peer: &Peer) {
        self.broadcast(events::PEER_CHANGED, peer.to_value());
    }

    fn peer_removed(&self, id: &str) {
        self.broadcast(events::PEER_REMOVED, Value::from(id));
    }

    fn peer_heart_beat(&self, id: &str) {
        self.broadcast(events::PEER_HEART_BEAT, Value::from(id));
    }
}
