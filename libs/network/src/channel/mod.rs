//! # Channels
//!
//! ## Purpose
//!
//! A channel is one protocol conversation over one transport. It owns the
//! outstanding token map, the outbound frame queue, the local services it
//! serves and the remote service names announced by the peer.
//!
//! ## State Machine
//!
//! ```text
//!            start()              remote Locator.Hello
//!  Opening ──────────► Opening ─────────────────────────► Open
//!     │                   │                                 │
//!     └─── close / transport error / hello timeout ─────────┴──► Closed
//! ```
//!
//! Transitions are monotonic and `Closed` is terminal. Entering `Closed`
//! resolves every outstanding token and sync barrier with the closing error
//! and notifies channel listeners exactly once.
//!
//! ## Threading
//!
//! Every mutating entry point must run on the channel's dispatch thread and
//! returns [`ChannelError::NotDispatchThread`] otherwise. The transport is
//! driven by a reader and a writer task hosted on that same thread. Outbound
//! frames wait in a local queue until a flush job hands them to the writer;
//! only frames still in that queue can be cancelled.

mod service;
mod token;

pub use service::{Responder, Service};
pub use token::{CommandFuture, CommandListener, CommandResult, Token};

use crate::config::ProtocolConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ChannelError, TransportError};
use crate::protocol::Frame;
use crate::transports::Transport;
use bytes::Bytes;
use codec::{DecodeOptions, EncodeOptions, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Service that carries the handshake and sync marker
pub const LOCATOR_SERVICE: &str = "Locator";
pub const HELLO_EVENT: &str = "Hello";
pub const SYNC_COMMAND: &str = "sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Opening,
    Open,
    Closed,
}

/// Channel lifecycle and flow-control notifications
pub trait ChannelListener: Send + Sync {
    fn on_channel_opened(&self, _channel: &Channel) {}

    /// `None` for a clean local close
    fn on_channel_closed(&self, _channel: &Channel, _error: Option<&ChannelError>) {}

    /// Remote peer reported its receive congestion (`F` frame)
    fn congestion_level(&self, _channel: &Channel, _level: i32) {}
}

/// Receives events a remote service broadcasts
pub trait EventListener: Send + Sync {
    fn event(&self, channel: &Channel, name: &str, data: &[Value]);
}

impl<F> EventListener for F
where
    F: Fn(&Channel, &str, &[Value]) + Send + Sync,
{
    fn event(&self, channel: &Channel, name: &str, data: &[Value]) {
        self(channel, name, data)
    }
}

type SyncCallback = Box<dyn FnOnce(Result<(), ChannelError>) + Send>;

struct Outbound {
    token: Option<String>,
    frame: Bytes,
}

struct Pending {
    seq: u64,
    token: Token,
    /// Lent out while a progress callback runs
    listener: Option<Box<dyn CommandListener>>,
}

impl Pending {
    fn resolve(self, result: CommandResult) {
        if let Some(listener) = self.listener {
            listener.result(&self.token, result);
        }
    }
}

struct SyncBarrier {
    marker: String,
    seq: u64,
    marker_result: Option<Result<(), ChannelError>>,
    callback: SyncCallback,
}

struct ChannelState {
    state: State,
    started: bool,
    next_token: u64,
    next_seq: u64,
    outbound: VecDeque<Outbound>,
    flush_scheduled: bool,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    pending: HashMap<String, Pending>,
    barriers: Vec<SyncBarrier>,
    services: BTreeMap<String, Arc<dyn Service>>,
    remote_services: Vec<String>,
    event_listeners: HashMap<String, Vec<Arc<dyn EventListener>>>,
    listeners: Vec<Arc<dyn ChannelListener>>,
    congested: bool,
}

pub(crate) struct ChannelInner {
    id: String,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    remote_peer_name: String,
    encode: EncodeOptions,
    decode: DecodeOptions,
    hello_timeout: Duration,
    outbound_soft_limit: usize,
    closed_signal: watch::Sender<bool>,
    state: Mutex<ChannelState>,
}

/// Cloneable handle to one channel
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// New channel in `Opening`; nothing is sent until [`Channel::start`]
    pub fn new(dispatcher: Dispatcher, transport: Arc<dyn Transport>, config: &ProtocolConfig) -> Self {
        let info = transport.transport_info();
        let remote_peer_name = info
            .remote_address
            .or(info.local_address)
            .unwrap_or_else(|| info.transport_type.name().to_string());
        let (closed_signal, _) = watch::channel(false);

        Self {
            inner: Arc::new(ChannelInner {
                id: uuid::Uuid::new_v4().to_string(),
                dispatcher,
                transport,
                remote_peer_name,
                encode: config.codec.encode_options(),
                decode: config.codec.decode_options(),
                hello_timeout: config.channel.hello_timeout(),
                outbound_soft_limit: config.channel.outbound_soft_limit,
                closed_signal,
                state: Mutex::new(ChannelState {
                    state: State::Opening,
                    started: false,
                    next_token: 1,
                    next_seq: 0,
                    outbound: VecDeque::new(),
                    flush_scheduled: false,
                    writer: None,
                    pending: HashMap::new(),
                    barriers: Vec::new(),
                    services: BTreeMap::new(),
                    remote_services: Vec::new(),
                    event_listeners: HashMap::new(),
                    listeners: Vec::new(),
                    congested: false,
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<ChannelInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn state(&self) -> State {
        self.inner.state.lock().state
    }

    /// Address or name of the other end, as reported by the transport
    pub fn remote_peer_name(&self) -> &str {
        &self.inner.remote_peer_name
    }

    /// Service names announced by the peer's `Hello`
    pub fn remote_services(&self) -> Vec<String> {
        self.inner.state.lock().remote_services.clone()
    }

    pub fn local_services(&self) -> Vec<String> {
        self.inner.state.lock().services.keys().cloned().collect()
    }

    pub fn add_service(&self, service: Arc<dyn Service>) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.started {
            return Err(ChannelError::protocol(
                "services must be registered before the channel starts",
            ));
        }
        st.services.insert(service.name().to_string(), service);
        Ok(())
    }

    pub fn add_channel_listener(&self, listener: Arc<dyn ChannelListener>) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.state == State::Closed {
            return Err(ChannelError::NotConnected);
        }
        st.listeners.push(listener);
        Ok(())
    }

    pub fn add_event_listener(&self, service: &str, listener: Arc<dyn EventListener>) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.state == State::Closed {
            return Err(ChannelError::NotConnected);
        }
        st.event_listeners
            .entry(service.to_string())
            .or_default()
            .push(listener);
        Ok(())
    }

    /// Start the transport tasks and announce local services with `Hello`
    pub fn start(&self) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let hello = {
            let mut st = self.inner.state.lock();
            if st.state == State::Closed {
                return Err(ChannelError::NotConnected);
            }
            if st.started {
                return Err(ChannelError::protocol("channel already started"));
            }
            st.started = true;
            st.writer = Some(writer_tx);
            let names: Vec<Value> = st.services.keys().map(|name| Value::from(name.as_str())).collect();
            Frame::Event {
                service: LOCATOR_SERVICE.to_string(),
                name: HELLO_EVENT.to_string(),
                data: vec![Value::from(names)],
            }
        };

        self.inner.dispatcher.spawn(writer_loop(self.clone(), writer_rx))?;
        self.inner.dispatcher.spawn(reader_loop(self.clone()))?;

        let weak = self.downgrade();
        self.inner
            .dispatcher
            .invoke_delayed(self.inner.hello_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    let channel = Channel::from_inner(inner);
                    if channel.state() == State::Opening {
                        channel.terminate(Some(ChannelError::protocol(
                            "remote peer did not send Hello in time",
                        )));
                    }
                }
            })?;

        info!(channel = %self.inner.id, peer = %self.inner.remote_peer_name, "Channel starting");
        self.enqueue(None, hello.encode(self.inner.encode));
        Ok(())
    }

    /// Send a command; the listener receives its single outcome
    pub fn send_command<L>(
        &self,
        service: &str,
        command: &str,
        args: &[Value],
        listener: L,
    ) -> Result<Token, ChannelError>
    where
        L: CommandListener + 'static,
    {
        self.send_boxed(service, command, args, Box::new(listener))
    }

    /// Send a command and get its outcome as a future
    pub fn call(&self, service: &str, command: &str, args: &[Value]) -> Result<(Token, CommandFuture), ChannelError> {
        let (listener, future) = CommandFuture::pair(self.inner.dispatcher.clone());
        let token = self.send_boxed(service, command, args, Box::new(listener))?;
        Ok((token, future))
    }

    fn send_boxed(
        &self,
        service: &str,
        command: &str,
        args: &[Value],
        listener: Box<dyn CommandListener>,
    ) -> Result<Token, ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.state != State::Open {
            return Err(ChannelError::NotConnected);
        }

        let id = st.next_token.to_string();
        st.next_token += 1;
        let seq = st.next_seq;
        st.next_seq += 1;

        let frame = Frame::Command {
            token: id.clone(),
            service: service.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
        }
        .encode(self.inner.encode);

        let token = Token::new(id.clone(), service, command, self.downgrade());
        st.pending.insert(
            id.clone(),
            Pending {
                seq,
                token: token.clone(),
                listener: Some(listener),
            },
        );
        trace!(channel = %self.inner.id, token = %id, service, command, "Command queued");
        self.enqueue_locked(&mut st, Some(id), frame);
        Ok(token)
    }

    /// Broadcast an event of a local service to the peer
    pub fn send_event(&self, service: &str, name: &str, data: &[Value]) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.state != State::Open {
            return Err(ChannelError::NotConnected);
        }
        let frame = Frame::Event {
            service: service.to_string(),
            name: name.to_string(),
            data: data.to_vec(),
        }
        .encode(self.inner.encode);
        self.enqueue_locked(&mut st, None, frame);
        Ok(())
    }

    /// Report our own receive congestion to the peer
    pub fn send_congestion_level(&self, level: i32) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.state != State::Open {
            return Err(ChannelError::NotConnected);
        }
        let frame = Frame::Flow { level }.encode(self.inner.encode);
        self.enqueue_locked(&mut st, None, frame);
        Ok(())
    }

    /// Run `callback` once every command sent so far has resolved.
    ///
    /// Sends `Locator.sync` as a marker; the callback fires after the
    /// marker's reply and after every earlier command's outcome.
    pub fn sync<F>(&self, callback: F) -> Result<(), ChannelError>
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        let weak = self.downgrade();
        let marker = self.send_command(
            LOCATOR_SERVICE,
            SYNC_COMMAND,
            &[],
            move |token: &Token, result: CommandResult| {
                if let Some(inner) = weak.upgrade() {
                    Channel::from_inner(inner).marker_resolved(token, result);
                }
            },
        )?;

        let mut st = self.inner.state.lock();
        // The barrier's position in send order is the marker's own
        let seq = st.pending.get(marker.id()).map_or(st.next_seq, |p| p.seq);
        st.barriers.push(SyncBarrier {
            marker: marker.id().to_string(),
            seq,
            marker_result: None,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Flush queued frames, then close. Outstanding tokens fail with `Closed`.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        {
            let mut st = self.inner.state.lock();
            if st.state == State::Closed {
                return Err(ChannelError::NotConnected);
            }
            drain_outbound(&mut st);
        }
        self.terminate(None);
        Ok(())
    }

    pub(crate) fn cancel_token(&self, token: &Token) -> Result<bool, ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let pending = {
            let mut st = self.inner.state.lock();
            let Some(index) = st
                .outbound
                .iter()
                .position(|o| o.token.as_deref() == Some(token.id()))
            else {
                return Ok(false);
            };
            st.outbound.remove(index);
            st.pending.remove(token.id())
        };

        debug!(channel = %self.inner.id, token = %token, "Command cancelled before transmission");
        if let Some(pending) = pending {
            pending.resolve(Err(ChannelError::Cancelled));
        }
        self.fire_ready_barriers();
        Ok(true)
    }

    /// Reply frames from a [`Responder`]
    pub(crate) fn post_reply(&self, frame: Frame) -> Result<(), ChannelError> {
        self.inner.dispatcher.check_dispatch_thread()?;
        let mut st = self.inner.state.lock();
        if st.state == State::Closed {
            return Err(ChannelError::NotConnected);
        }
        let bytes = frame.encode(self.inner.encode);
        self.enqueue_locked(&mut st, None, bytes);
        Ok(())
    }

    fn enqueue(&self, token: Option<String>, frame: Bytes) {
        let mut st = self.inner.state.lock();
        self.enqueue_locked(&mut st, token, frame);
    }

    fn enqueue_locked(&self, st: &mut ChannelState, token: Option<String>, frame: Bytes) {
        st.outbound.push_back(Outbound { token, frame });

        if st.outbound.len() > self.inner.outbound_soft_limit {
            if !st.congested {
                st.congested = true;
                warn!(
                    channel = %self.inner.id,
                    queued = st.outbound.len(),
                    "Outbound queue above soft limit"
                );
            }
        } else {
            st.congested = false;
        }

        if !st.flush_scheduled {
            st.flush_scheduled = true;
            let weak = self.downgrade();
            let scheduled = self.inner.dispatcher.invoke_later(move || {
                if let Some(inner) = weak.upgrade() {
                    Channel::from_inner(inner).flush();
                }
            });
            if scheduled.is_err() {
                st.flush_scheduled = false;
                warn!(channel = %self.inner.id, "Dispatcher stopped; outbound frames stay queued");
            }
        }
    }

    /// Hand every queued frame to the transport writer
    fn flush(&self) {
        let mut st = self.inner.state.lock();
        st.flush_scheduled = false;
        drain_outbound(&mut st);
    }

    fn handle_message(&self, message: Bytes) {
        let frame = match Frame::decode(message, self.inner.decode) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = %self.inner.id, error = %e, "Malformed frame");
                self.terminate(Some(e));
                return;
            }
        };

        match frame {
            Frame::Command {
                token,
                service,
                command,
                args,
            } => self.handle_command(token, service, command, args),
            Frame::Result { token, data } => self.complete(&token, Ok(data)),
            Frame::Progress { token, data } => self.handle_progress(&token, &data),
            Frame::NotRecognized { token } => {
                let error = {
                    let st = self.inner.state.lock();
                    st.pending.get(&token).map(|p| ChannelError::CommandNotRecognized {
                        service: p.token.service().to_string(),
                        command: p.token.command().to_string(),
                    })
                };
                match error {
                    Some(error) => self.complete(&token, Err(error)),
                    None => warn!(channel = %self.inner.id, %token, "N frame for unknown token"),
                }
            }
            Frame::Event {
                service,
                name,
                data,
            } => self.handle_event(&service, &name, data),
            Frame::Flow { level } => {
                let listeners = self.inner.state.lock().listeners.clone();
                for listener in listeners {
                    listener.congestion_level(self, level);
                }
            }
        }
    }

    fn handle_command(&self, token: String, service: String, command: String, args: Vec<Value>) {
        let handler = self.inner.state.lock().services.get(&service).cloned();
        let responder = Responder::new(self.downgrade(), token, service, command.clone());
        match handler {
            Some(handler) => handler.handle_command(self, &command, args, responder),
            None => {
                debug!(channel = %self.inner.id, service = %responder.service(), "Command for unknown service");
                let _ = responder.not_recognized();
            }
        }
    }

    fn handle_progress(&self, token: &str, data: &[Value]) {
        // The entry stays in `pending` so barriers still see it outstanding
        let lent = {
            let mut st = self.inner.state.lock();
            st.pending
                .get_mut(token)
                .and_then(|p| p.listener.take().map(|listener| (p.token.clone(), listener)))
        };
        let Some((handle, mut listener)) = lent else {
            warn!(channel = %self.inner.id, %token, "Progress for unknown token");
            return;
        };
        listener.progress(&handle, data);

        if let Some(pending) = self.inner.state.lock().pending.get_mut(token) {
            pending.listener = Some(listener);
            return;
        }
        // Closed from inside the callback
        let error = ChannelError::closed("channel closed while command was in progress");
        listener.result(&handle, Err(error));
    }

    fn handle_event(&self, service: &str, name: &str, data: Vec<Value>) {
        if service == LOCATOR_SERVICE && name == HELLO_EVENT {
            self.handle_hello(&data);
            return;
        }

        let listeners = self
            .inner
            .state
            .lock()
            .event_listeners
            .get(service)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() {
            debug!(channel = %self.inner.id, service, event = name, "Event without listeners");
        }
        for listener in listeners {
            listener.event(self, name, &data);
        }
    }

    fn handle_hello(&self, data: &[Value]) {
        let remote: Vec<String> = data
            .first()
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let (listeners, services) = {
            let mut st = self.inner.state.lock();
            if st.state != State::Opening {
                warn!(channel = %self.inner.id, "Duplicate Hello ignored");
                return;
            }
            st.state = State::Open;
            st.remote_services = remote;
            (
                st.listeners.clone(),
                st.services.values().cloned().collect::<Vec<_>>(),
            )
        };

        info!(
            channel = %self.inner.id,
            peer = %self.inner.remote_peer_name,
            services = ?self.remote_services(),
            "Channel open"
        );
        for service in services {
            service.on_channel_opened(self);
        }
        for listener in listeners {
            listener.on_channel_opened(self);
        }
    }

    /// Resolve one outstanding token and any barriers it was holding back
    fn complete(&self, token: &str, result: CommandResult) {
        let Some(pending) = self.inner.state.lock().pending.remove(token) else {
            warn!(channel = %self.inner.id, %token, "Reply for unknown token");
            return;
        };
        pending.resolve(result);
        self.fire_ready_barriers();
    }

    fn marker_resolved(&self, marker: &Token, result: CommandResult) {
        let outcome = match result {
            Ok(data) => match crate::protocol::reply_error(&data) {
                Some(report) => Err(report.into_error()),
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        let mut st = self.inner.state.lock();
        if let Some(barrier) = st.barriers.iter_mut().find(|b| b.marker == marker.id()) {
            barrier.marker_result = Some(outcome);
        }
    }

    fn fire_ready_barriers(&self) {
        let ready: Vec<SyncBarrier> = {
            let mut st = self.inner.state.lock();
            let oldest_pending = st.pending.values().map(|p| p.seq).min();
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut st.barriers)
                .into_iter()
                .partition(|b| b.marker_result.is_some() && oldest_pending.map_or(true, |seq| seq > b.seq));
            st.barriers = waiting;
            ready
        };
        for barrier in ready {
            let outcome = barrier.marker_result.unwrap_or(Ok(()));
            (barrier.callback)(outcome);
        }
    }

    /// Enter `Closed` once; resolve everything outstanding
    fn terminate(&self, error: Option<ChannelError>) {
        let (mut pending, barriers, listeners, services) = {
            let mut st = self.inner.state.lock();
            if st.state == State::Closed {
                return;
            }
            st.state = State::Closed;
            if error.is_some() {
                st.outbound.clear();
            }
            // Dropping the sender lets the writer drain, then close the transport
            st.writer = None;
            st.event_listeners.clear();
            (
                st.pending.drain().map(|(_, p)| p).collect::<Vec<_>>(),
                std::mem::take(&mut st.barriers),
                std::mem::take(&mut st.listeners),
                st.services.values().cloned().collect::<Vec<_>>(),
            )
        };
        self.inner.closed_signal.send_replace(true);

        match &error {
            Some(e) => warn!(channel = %self.inner.id, error = %e, outstanding = pending.len(), "Channel failed"),
            None => info!(channel = %self.inner.id, outstanding = pending.len(), "Channel closed"),
        }

        let reason = error
            .clone()
            .unwrap_or_else(|| ChannelError::closed("channel closed locally"));
        pending.sort_by_key(|p| p.seq);
        for p in pending {
            p.resolve(Err(reason.clone()));
        }
        for barrier in barriers {
            (barrier.callback)(Err(reason.clone()));
        }
        for service in services {
            service.on_channel_closed(self);
        }
        for listener in listeners {
            listener.on_channel_closed(self, error.as_ref());
        }
    }

    fn transport_failed(&self, error: TransportError) {
        if self.state() != State::Closed {
            self.terminate(Some(ChannelError::Transport(error)));
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.remote_peer_name)
            .field("state", &self.state())
            .finish()
    }
}

fn drain_outbound(st: &mut ChannelState) {
    let Some(writer) = st.writer.as_ref() else {
        return;
    };
    while let Some(out) = st.outbound.pop_front() {
        if writer.send(out.frame).is_err() {
            break;
        }
    }
}

async fn writer_loop(channel: Channel, mut frames: mpsc::UnboundedReceiver<Bytes>) {
    let transport = channel.inner.transport.clone();
    while let Some(frame) = frames.recv().await {
        if let Err(e) = transport.send(frame).await {
            channel.transport_failed(e);
            break;
        }
    }
    if let Err(e) = transport.close().await {
        debug!(channel = %channel.inner.id, error = %e, "Transport close failed");
    }
}

async fn reader_loop(channel: Channel) {
    let transport = channel.inner.transport.clone();
    let mut closed = channel.inner.closed_signal.subscribe();
    loop {
        if *closed.borrow() {
            break;
        }
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break;
                }
            }
            received = transport.receive() => match received {
                Ok(message) => channel.handle_message(message),
                Err(e) => {
                    channel.transport_failed(e);
                    break;
                }
            },
        }
    }
    debug!(channel = %channel.inner.id, "Reader stopped");
}
