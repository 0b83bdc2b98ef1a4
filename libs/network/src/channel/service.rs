//! Local services and inbound command replies

use super::{Channel, ChannelInner};
use crate::error::ChannelError;
use crate::protocol::{codes, ErrorReport, Frame};
use codec::{Serializable, Value};
use std::sync::Weak;
use tracing::warn;

/// Named capability served over a channel
pub trait Service: Send + Sync {
    /// Stable wire name, e.g. `Locator`
    fn name(&self) -> &str;

    /// Handle one inbound command. The responder must be used to reply;
    /// dropping it unanswered sends an error result to the caller.
    fn handle_command(&self, channel: &Channel, command: &str, args: Vec<Value>, responder: Responder);

    fn on_channel_opened(&self, _channel: &Channel) {}

    fn on_channel_closed(&self, _channel: &Channel) {}
}

/// Reply handle owning the token of one inbound command
pub struct Responder {
    channel: Weak<ChannelInner>,
    token: String,
    service: String,
    command: String,
    replied: bool,
}

impl Responder {
    pub(super) fn new(channel: Weak<ChannelInner>, token: String, service: String, command: String) -> Self {
        Self {
            channel,
            token,
            service,
            command,
            replied: false,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Intermediate progress data; the command stays outstanding
    pub fn progress(&self, data: Vec<Value>) -> Result<(), ChannelError> {
        self.post(Frame::Progress {
            token: self.token.clone(),
            data,
        })
    }

    /// Successful reply; by convention the first value is `null`
    pub fn reply(mut self, data: Vec<Value>) -> Result<(), ChannelError> {
        self.replied = true;
        self.post(Frame::Result {
            token: self.token.clone(),
            data,
        })
    }

    /// Failed reply carrying an error report as its only value
    pub fn reply_error(mut self, report: ErrorReport) -> Result<(), ChannelError> {
        self.replied = true;
        let report = report.with_service(self.service.clone());
        self.post(Frame::Result {
            token: self.token.clone(),
            data: vec![report.to_value()],
        })
    }

    /// Tell the caller this command does not exist
    pub fn not_recognized(mut self) -> Result<(), ChannelError> {
        self.replied = true;
        self.post(Frame::NotRecognized {
            token: self.token.clone(),
        })
    }

    fn post(&self, frame: Frame) -> Result<(), ChannelError> {
        match self.channel.upgrade() {
            Some(inner) => Channel::from_inner(inner).post_reply(frame),
            None => Err(ChannelError::NotConnected),
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.replied {
            return;
        }
        let Some(inner) = self.channel.upgrade() else {
            return;
        };
        warn!(
            token = %self.token,
            service = %self.service,
            command = %self.command,
            "Command handler dropped its responder without replying"
        );
        let report = ErrorReport::new(codes::OTHER, "Command handler did not reply")
            .with_service(self.service.clone());
        let frame = Frame::Result {
            token: self.token.clone(),
            data: vec![report.to_value()],
        };

        let channel = Channel::from_inner(inner);
        if channel.dispatcher().is_dispatch_thread() {
            // A closed channel has nobody left to answer
            let _ = channel.post_reply(frame);
        } else {
            let target = channel.clone();
            let _ = channel.dispatcher().invoke_later(move || {
                let _ = target.post_reply(frame);
            });
        }
    }
}
