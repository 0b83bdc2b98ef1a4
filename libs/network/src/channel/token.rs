//! Command correlation
//!
//! Every outbound command gets a [`Token`]. The token id travels in the
//! `C` frame and comes back in the matching `R`, `P` or `N` frame. The
//! listener registered with the command is consumed by its single terminal
//! outcome: a result, an error, or cancellation.

use super::{Channel, ChannelInner};
use crate::dispatch::Dispatcher;
use crate::error::{ChannelError, DispatchError};
use codec::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Outcome of a command: reply data or the reason it failed
pub type CommandResult = Result<Vec<Value>, ChannelError>;

/// Receives the outcome of one command
pub trait CommandListener: Send {
    /// Intermediate `P` frame; may be called any number of times before the result
    fn progress(&mut self, _token: &Token, _data: &[Value]) {}

    /// Terminal outcome, delivered exactly once
    fn result(self: Box<Self>, token: &Token, result: CommandResult);
}

impl<F> CommandListener for F
where
    F: FnOnce(&Token, CommandResult) + Send,
{
    fn result(self: Box<Self>, token: &Token, result: CommandResult) {
        (*self)(token, result)
    }
}

struct TokenInner {
    id: String,
    service: String,
    command: String,
    channel: Weak<ChannelInner>,
}

/// Handle to one outstanding command
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

impl Token {
    pub(super) fn new(id: String, service: &str, command: &str, channel: Weak<ChannelInner>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id,
                service: service.to_string(),
                command: command.to_string(),
                channel,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// Withdraw the command if it has not reached the transport yet.
    ///
    /// Returns `Ok(true)` when the frame was still queued; the listener then
    /// receives [`ChannelError::Cancelled`]. Returns `Ok(false)` once the
    /// frame was handed to the transport writer, in which case the reply is
    /// still delivered normally.
    pub fn cancel(&self) -> Result<bool, ChannelError> {
        match self.inner.channel.upgrade() {
            Some(inner) => Channel::from_inner(inner).cancel_token(self),
            None => Ok(false),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Token {}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.inner.id)
            .field("service", &self.inner.service)
            .field("command", &self.inner.command)
            .finish()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner.id)
    }
}

/// Listener half of [`CommandFuture`]
pub(super) struct FutureListener {
    sender: oneshot::Sender<CommandResult>,
}

impl CommandListener for FutureListener {
    fn result(self: Box<Self>, _token: &Token, result: CommandResult) {
        // The future may have been dropped by its caller
        let _ = self.sender.send(result);
    }
}

/// Command outcome as a future
pub struct CommandFuture {
    receiver: oneshot::Receiver<CommandResult>,
    dispatcher: Dispatcher,
}

impl CommandFuture {
    pub(super) fn pair(dispatcher: Dispatcher) -> (FutureListener, Self) {
        let (sender, receiver) = oneshot::channel();
        (FutureListener { sender }, Self { receiver, dispatcher })
    }

    /// Block the current thread until the outcome arrives.
    ///
    /// On the dispatch thread, or inside any async runtime, this returns
    /// [`DispatchError::WouldDeadlock`] instead of blocking.
    pub fn wait(self) -> CommandResult {
        if self.dispatcher.is_dispatch_thread() || tokio::runtime::Handle::try_current().is_ok() {
            return Err(DispatchError::WouldDeadlock.into());
        }
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_| Err(ChannelError::closed("command dropped without a result")))
    }
}

impl Future for CommandFuture {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| Err(ChannelError::closed("command dropped without a result")))
        })
    }
}
