//! Locator service, proxy mirroring and UDP discovery between two agents

mod support;

use codec::Value;
use crossbeam_channel::{unbounded, Sender};
use network::channel::{CommandResult, Token};
use network::config::LocatorConfig;
use network::discovery::{keys, DiscoveryRole, Locator, LocatorListener, LocatorProxy, LocatorService, Peer, UdpDiscovery};
use network::protocol::{check_reply, codes};
use network::{ChannelError, Dispatcher, MemoryTransport};
use std::sync::Arc;
use support::*;

struct Forward(Sender<String>);

impl LocatorListener for Forward {
    fn peer_added(&self, peer: &Peer) {
        let _ = self.0.send(format!("added {}", peer.id()));
    }

    fn peer_changed(&self, peer: &Peer) {
        let _ = self.0.send(format!("changed {}", peer.id()));
    }

    fn peer_removed(&self, id: &str) {
        let _ = self.0.send(format!("removed {id}"));
    }
}

struct Agent {
    dispatcher: Dispatcher,
    locator: Locator,
}

fn agent(name: &str, config: &LocatorConfig) -> Agent {
    let dispatcher = Dispatcher::start(name).unwrap();
    let locator = Locator::new(dispatcher.clone(), config);
    Agent { dispatcher, locator }
}

mod locator_service {
    use super::*;

    fn served(agent: &Agent) -> (network::Channel, network::Channel) {
        let locator = agent.locator.clone();
        let service = agent
            .dispatcher
            .invoke_and_wait(move || LocatorService::register(locator).unwrap())
            .unwrap();
        let (a, b) = MemoryTransport::pair("locator");
        let (client, server, _closed) = open_pair(&agent.dispatcher, Arc::new(a), Arc::new(b), vec![], vec![service]);
        (client, server)
    }

    #[test_log::test]
    fn test_proxy_mirrors_remote_table() {
        let agent = agent("proxy", &LocatorConfig::default());
        let locator = agent.locator.clone();
        agent
            .dispatcher
            .invoke_and_wait(move || locator.add_manual_peer(Peer::tcp("10.1.1.1", 1534)).unwrap())
            .unwrap();
        let (client, _server) = served(&agent);

        let (tx, rx) = unbounded();
        let (synced_tx, synced_rx) = unbounded();
        let c = client.clone();
        let proxy = agent
            .dispatcher
            .invoke_and_wait(move || {
                let proxy = LocatorProxy::attach(&c).unwrap();
                proxy.add_listener(Arc::new(Forward(tx))).unwrap();
                proxy
                    .sync(move |result| {
                        let _ = synced_tx.send(result.is_ok());
                    })
                    .unwrap();
                proxy
            })
            .unwrap();

        assert!(synced_rx.recv_timeout(WAIT).unwrap());
        assert!(proxy.is_loaded());
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "added TCP:10.1.1.1:1534");
        assert_eq!(proxy.peers().len(), 1);

        let locator = agent.locator.clone();
        agent
            .dispatcher
            .invoke_and_wait(move || {
                locator
                    .add_manual_peer(Peer::tcp("10.1.1.1", 1534).with_attribute(keys::NAME, "bench"))
                    .unwrap();
                locator.add_manual_peer(Peer::tcp("10.1.1.2", 1534)).unwrap();
                locator.remove_peer("TCP:10.1.1.1:1534").unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "changed TCP:10.1.1.1:1534");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "added TCP:10.1.1.2:1534");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "removed TCP:10.1.1.1:1534");
        assert_eq!(proxy.peers().len(), 1);
        assert!(proxy.get_peer("TCP:10.1.1.2:1534").is_some());
    }

    #[test_log::test]
    fn test_proxy_forgets_peers_when_channel_closes() {
        let agent = agent("proxy-close", &LocatorConfig::default());
        let locator = agent.locator.clone();
        agent
            .dispatcher
            .invoke_and_wait(move || {
                locator.add_manual_peer(Peer::tcp("10.2.2.1", 1534)).unwrap();
                locator.add_manual_peer(Peer::tcp("10.2.2.2", 1534)).unwrap();
            })
            .unwrap();
        let (client, server) = served(&agent);

        let (tx, rx) = unbounded();
        let c = client.clone();
        let proxy = agent
            .dispatcher
            .invoke_and_wait(move || {
                let proxy = LocatorProxy::attach(&c).unwrap();
                proxy.add_listener(Arc::new(Forward(tx))).unwrap();
                proxy
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "added TCP:10.2.2.1:1534");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "added TCP:10.2.2.2:1534");

        agent
            .dispatcher
            .invoke_and_wait(move || server.close().unwrap())
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "removed TCP:10.2.2.1:1534");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "removed TCP:10.2.2.2:1534");
        assert!(proxy.peers().is_empty());
        assert_eq!(client.state(), network::State::Closed);
    }

    #[test_log::test]
    fn test_get_peers_reply_shape() {
        let agent = agent("get-peers", &LocatorConfig::default());
        let locator = agent.locator.clone();
        agent
            .dispatcher
            .invoke_and_wait(move || locator.add_manual_peer(Peer::tcp("h", 7)).unwrap())
            .unwrap();
        let (client, _server) = served(&agent);

        let c = client.clone();
        let (_token, future) = agent
            .dispatcher
            .invoke_and_wait(move || c.call("Locator", "getPeers", &[]))
            .unwrap()
            .unwrap();
        let data = check_reply(future.wait().unwrap()).unwrap();
        let peers = data[1].as_list().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].get(keys::ID).and_then(|v| v.as_str()), Some("TCP:h:7"));
        assert_eq!(peers[0].get(keys::PORT).and_then(|v| v.as_str()), Some("7"));
    }

    #[test_log::test]
    fn test_redirect_is_unsupported() {
        let agent = agent("redirect", &LocatorConfig::default());
        let (client, _server) = served(&agent);
        let (tx, rx) = unbounded();

        let c = client.clone();
        agent
            .dispatcher
            .invoke_and_wait(move || {
                c.send_command("Locator", "redirect", &[Value::from("TCP:h:1")], move |_t: &Token, r: CommandResult| {
                    let _ = tx.send(r.and_then(check_reply));
                })
                .unwrap();
            })
            .unwrap();

        match rx.recv_timeout(WAIT).unwrap() {
            Err(ChannelError::Remote { code, .. }) => assert_eq!(code, codes::UNSUPPORTED),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test_log::test]
    fn test_proxy_requires_remote_locator() {
        let dispatcher = Dispatcher::start("no-locator").unwrap();
        let (a, b) = MemoryTransport::pair("bare");
        let (client, _server, _closed) = open_pair(&dispatcher, Arc::new(a), Arc::new(b), vec![], vec![Arc::new(Echo)]);

        let outcome = dispatcher
            .invoke_and_wait(move || LocatorProxy::attach(&client).map(|_| ()))
            .unwrap();
        assert!(matches!(outcome, Err(ChannelError::CommandNotRecognized { .. })));
    }
}

mod udp {
    use super::*;

    fn free_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn start_discovery(agent: &Agent, config: &LocatorConfig, local: Peer, events: Sender<String>) -> DiscoveryRole {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let locator = agent.locator.clone();
        let config = config.clone();
        agent
            .dispatcher
            .spawn(async move {
                let discovery = UdpDiscovery::bind(&config).await.unwrap();
                locator.add_listener(Arc::new(Forward(events))).unwrap();
                locator.add_local_peer(local).unwrap();
                discovery.start(&locator, &config).unwrap();
                let _ = tx.send(discovery.role());
            })
            .unwrap();
        rx.recv_timeout(WAIT).unwrap()
    }

    #[test_log::test]
    fn test_master_and_slave_learn_each_other() {
        let config = LocatorConfig {
            discovery_port: free_port(),
            broadcast_address: "127.0.0.1".to_string(),
            broadcast_interval_ms: 100,
            ..LocatorConfig::default()
        };
        let master = agent("udp-master", &config);
        let slave = agent("udp-slave", &config);
        let (master_tx, master_rx) = unbounded();
        let (slave_tx, slave_rx) = unbounded();

        let role = start_discovery(&master, &config, Peer::tcp("127.0.0.1", 2000), master_tx);
        assert_eq!(role, DiscoveryRole::Master);
        let role = start_discovery(&slave, &config, Peer::tcp("127.0.0.1", 2001), slave_tx);
        assert_eq!(role, DiscoveryRole::Slave);

        let wait_for = |rx: &crossbeam_channel::Receiver<String>, wanted: &str| loop {
            let event = rx.recv_timeout(WAIT).unwrap();
            if event == wanted {
                break;
            }
        };
        wait_for(&master_rx, "added TCP:127.0.0.1:2001");
        wait_for(&slave_rx, "added TCP:127.0.0.1:2000");

        wait_until(|| master.locator.slaves().len() == 1);
        assert!(master.locator.get_peer("TCP:127.0.0.1:2001").is_some());
        assert!(slave.locator.get_peer("TCP:127.0.0.1:2000").is_some());
    }
}
