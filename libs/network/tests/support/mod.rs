//! Shared fixtures: channel pairs, signalling listeners and test services
#![allow(dead_code)]

use codec::Value;
use crossbeam_channel::{unbounded, Receiver, Sender};
use network::channel::{Channel, ChannelListener, Responder, Service};
use network::protocol::{codes, ErrorReport};
use network::{ChannelError, Dispatcher, ProtocolConfig, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Forwards lifecycle transitions as messages
pub struct LifecycleProbe {
    opened: Sender<String>,
    closed: Sender<Option<String>>,
}

impl LifecycleProbe {
    pub fn new() -> (Arc<Self>, Receiver<String>, Receiver<Option<String>>) {
        let (opened, opened_rx) = unbounded();
        let (closed, closed_rx) = unbounded();
        (Arc::new(Self { opened, closed }), opened_rx, closed_rx)
    }
}

impl ChannelListener for LifecycleProbe {
    fn on_channel_opened(&self, channel: &Channel) {
        let _ = self.opened.send(channel.id().to_string());
    }

    fn on_channel_closed(&self, _channel: &Channel, error: Option<&ChannelError>) {
        let _ = self.closed.send(error.map(ToString::to_string));
    }
}

/// `Echo.echo` replies with its arguments; `Echo.fail` replies with an error report
pub struct Echo;

impl Service for Echo {
    fn name(&self) -> &str {
        "Echo"
    }

    fn handle_command(&self, _channel: &Channel, command: &str, args: Vec<Value>, responder: Responder) {
        let _ = match command {
            "echo" => {
                let mut data = vec![Value::Null];
                data.extend(args);
                responder.reply(data)
            }
            "fail" => responder.reply_error(ErrorReport::new(codes::INVALID_COMMAND, "refused")),
            "progress" => {
                let _ = responder.progress(vec![Value::from(50)]);
                responder.reply(vec![Value::Null])
            }
            "drop" => {
                drop(responder);
                Ok(())
            }
            _ => responder.not_recognized(),
        };
    }
}

/// `Slow.wait` replies after the given number of milliseconds
pub struct Slow;

impl Service for Slow {
    fn name(&self) -> &str {
        "Slow"
    }

    fn handle_command(&self, channel: &Channel, _command: &str, args: Vec<Value>, responder: Responder) {
        let delay = args.first().and_then(Value::as_i64).unwrap_or(50) as u64;
        let _ = channel.dispatcher().invoke_delayed(Duration::from_millis(delay), move || {
            let _ = responder.reply(vec![Value::Null]);
        });
    }
}

/// `Hold.wait` never replies while the service lives
#[derive(Default)]
pub struct Hold {
    held: Mutex<Vec<Responder>>,
}

impl Service for Hold {
    fn name(&self) -> &str {
        "Hold"
    }

    fn handle_command(&self, _channel: &Channel, _command: &str, _args: Vec<Value>, responder: Responder) {
        self.held.lock().push(responder);
    }
}

/// Two started channels joined by `a`/`b`, both open on return
pub fn open_pair(
    dispatcher: &Dispatcher,
    a: Arc<dyn Transport>,
    b: Arc<dyn Transport>,
    client_services: Vec<Arc<dyn Service>>,
    server_services: Vec<Arc<dyn Service>>,
) -> (Channel, Channel, Receiver<Option<String>>) {
    let config = ProtocolConfig::default();
    let (probe, opened, closed) = LifecycleProbe::new();
    let d = dispatcher.clone();
    let (client, server) = dispatcher
        .invoke_and_wait(move || {
            let client = Channel::new(d.clone(), a, &config);
            let server = Channel::new(d, b, &config);
            for service in client_services {
                client.add_service(service).unwrap();
            }
            for service in server_services {
                server.add_service(service).unwrap();
            }
            client.add_channel_listener(probe.clone()).unwrap();
            server.add_channel_listener(Arc::new(NoopListener)).unwrap();
            client.start().unwrap();
            server.start().unwrap();
            (client, server)
        })
        .unwrap();
    assert_eq!(opened.recv_timeout(WAIT).unwrap(), client.id());
    wait_until(|| server.state() == network::State::Open);
    (client, server, closed)
}

struct NoopListener;

impl ChannelListener for NoopListener {}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + WAIT;
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
