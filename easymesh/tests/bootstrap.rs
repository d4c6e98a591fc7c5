//! Whole peers joined over an in-memory network.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use easymesh::{Config, Peer, PeerError, PeerName, TransportError};
use easymesh_relay::MemoryNetwork;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn listening(nickname: &str, port: u16) -> Config {
    Config {
        address: "127.0.0.1".to_string(),
        port,
        key: b"kittens".to_vec(),
        ..Config::new(nickname)
    }
}

type Inbox = Arc<Mutex<Vec<(PeerName, Vec<u8>)>>>;

fn with_inbox(config: Config) -> (Config, Inbox, Inbox) {
    let unicasts = Inbox::default();
    let broadcasts = Inbox::default();
    let u = unicasts.clone();
    let b = broadcasts.clone();
    let config = config
        .with_on_message(move |_, src, msg| {
            u.lock().unwrap().push((src, msg.to_vec()));
            Ok(())
        })
        .with_on_broadcast(move |_, src, msg| {
            b.lock().unwrap().push((src, msg.to_vec()));
            Ok(())
        });
    (config, unicasts, broadcasts)
}

#[test]
fn empty_nickname_is_a_config_error() {
    init_tracing();
    let config = Config {
        address: "127.0.0.1".to_string(),
        port: 7000,
        initial_peers: vec![addr(7001)],
        ..Config::default()
    };
    let result = Peer::new(config, &MemoryNetwork::new());
    assert!(matches!(result, Err(PeerError::ConfigError { .. })));
}

#[test]
fn unreachable_initial_peers_each_report_an_error() {
    init_tracing();
    let network = MemoryNetwork::new();
    let config = Config {
        initial_peers: vec![addr(7101), addr(7102), addr(7103)],
        ..listening("lonely", 7100)
    };
    let (peer, errors) = Peer::new(config, &network).unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors
        .iter()
        .all(|e| matches!(e, TransportError::ConnectionFailed { .. })));

    // Still usable: a peer that shows up later can be reached.
    let (_late, _) = Peer::new(listening("late", 7101), &network).unwrap();
    assert!(peer.connect(&[addr(7101)]).is_empty());
    assert_eq!(peer.membership().len(), 2);
}

#[test]
fn partially_reachable_initial_peers() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (_a, _) = Peer::new(listening("a", 7200), &network).unwrap();
    let (_b, _) = Peer::new(listening("b", 7201), &network).unwrap();

    let config = Config {
        initial_peers: vec![addr(7200), addr(7299), addr(7201), addr(7298)],
        ..listening("c", 7202)
    };
    let (c, errors) = Peer::new(config, &network).unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(c.membership().len(), 3);
}

#[test]
fn unicast_handler_invoked_exactly_once() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (config, inbox, broadcasts) = with_inbox(listening("server", 7300));
    let (server, _) = Peer::new(config, &network).unwrap();

    let client_config = Config {
        initial_peers: vec![addr(7300)],
        ..listening("client", 7301)
    };
    let (client, errors) = Peer::new(client_config, &network).unwrap();
    assert!(errors.is_empty());

    client.send(server.name(), b"ping").unwrap();

    assert_eq!(
        *inbox.lock().unwrap(),
        vec![(client.name(), b"ping".to_vec())]
    );
    assert!(broadcasts.lock().unwrap().is_empty());
}

#[test]
fn no_handler_means_no_error() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (server, _) = Peer::new(listening("server", 7400), &network).unwrap();
    let config = Config {
        initial_peers: vec![addr(7400)],
        ..listening("client", 7401)
    };
    let (client, _) = Peer::new(config, &network).unwrap();

    assert!(client.send(server.name(), b"ping").is_ok());
    client.broadcast(b"hello");
}

#[test]
fn send_to_unknown_peer_fails() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (peer, _) = Peer::new(listening("alone", 7500), &network).unwrap();
    let stranger = PeerName::from_string_hash("stranger");
    assert_eq!(
        peer.send(stranger, b"hi"),
        Err(TransportError::UnknownPeer { name: stranger })
    );
}

#[test]
fn lookups_agree_with_membership() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (hub, _) = Peer::new(listening("hub", 7600), &network).unwrap();
    let mut spokes = Vec::new();
    for (i, nickname) in ["north", "south", "east"].iter().enumerate() {
        let config = Config {
            initial_peers: vec![addr(7600)],
            ..listening(nickname, 7601 + i as u16)
        };
        let (spoke, errors) = Peer::new(config, &network).unwrap();
        assert!(errors.is_empty());
        spokes.push(spoke);
    }

    let membership = hub.membership();
    assert_eq!(membership.len(), 4);
    for desc in membership.iter() {
        assert_eq!(hub.peer_name_from_nickname(&desc.nickname), Some(desc.name));
        assert_eq!(
            hub.nickname_from_peer_name(desc.name).as_deref(),
            Some(desc.nickname.as_str())
        );
    }
    assert_eq!(hub.peer_name_from_nickname("west"), None);
    assert_eq!(
        hub.nickname_from_peer_name(PeerName::from_string_hash("west")),
        None
    );
}

#[test]
fn duplicate_nicknames_resolve_to_first_match() {
    init_tracing();
    let network = MemoryNetwork::new();
    let first = Config {
        name: Some(PeerName::new(1)),
        ..listening("twin", 7700)
    };
    let second = Config {
        name: Some(PeerName::new(2)),
        initial_peers: vec![addr(7700)],
        ..listening("twin", 7701)
    };
    let (a, _) = Peer::new(first, &network).unwrap();
    let (_b, errors) = Peer::new(second, &network).unwrap();
    assert!(errors.is_empty());
    let expected = a.membership().iter().next().map(|d| d.name);
    assert_eq!(a.peer_name_from_nickname("twin"), expected);
}

#[test]
fn broadcast_reaches_every_peer_once() {
    init_tracing();
    let network = MemoryNetwork::new();
    // a - b - c - d
    let (config, _, inbox_a) = with_inbox(listening("a", 7800));
    let (a, _) = Peer::new(config, &network).unwrap();
    let mut inboxes = Vec::new();
    let mut peers = Vec::new();
    for i in 1..4u16 {
        let (config, _, inbox) = with_inbox(Config {
            initial_peers: vec![addr(7800 + i - 1)],
            ..listening(&format!("node-{}", i), 7800 + i)
        });
        let (peer, errors) = Peer::new(config, &network).unwrap();
        assert!(errors.is_empty());
        peers.push(peer);
        inboxes.push(inbox);
    }

    a.broadcast(b"status?");

    assert!(inbox_a.lock().unwrap().is_empty());
    for inbox in inboxes {
        assert_eq!(
            *inbox.lock().unwrap(),
            vec![(a.name(), b"status?".to_vec())]
        );
    }
}

#[test]
fn request_reply_over_caller_channel() {
    init_tracing();
    let network = MemoryNetwork::new();

    // The server answers every request by sending the reply back.
    let server_config = listening("server", 7900).with_on_message(|peer, src, msg| {
        let mut reply = b"re: ".to_vec();
        reply.extend_from_slice(msg);
        peer.send(src, &reply)?;
        Ok(())
    });
    let (server, _) = Peer::new(server_config, &network).unwrap();

    // The client's handler forwards replies into a channel the caller owns.
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let tx = Mutex::new(tx);
    let client_config = Config {
        initial_peers: vec![addr(7900)],
        ..listening("client", 7901)
    }
    .with_on_message(move |_, _, msg| {
        tx.lock().unwrap().send(msg.to_vec())?;
        Ok(())
    });
    let (client, errors) = Peer::new(client_config, &network).unwrap();
    assert!(errors.is_empty());

    client.send(server.name(), b"uptime").unwrap();
    let reply = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(reply, b"re: uptime");
}

#[test]
fn mismatched_keys_do_not_connect() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (_a, _) = Peer::new(listening("a", 8000), &network).unwrap();
    let config = Config {
        key: b"puppies".to_vec(),
        initial_peers: vec![addr(8000)],
        ..listening("b", 8001)
    };
    let (b, errors) = Peer::new(config, &network).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(b.membership().len(), 1);
}

#[test]
fn connection_limit_is_enforced() {
    init_tracing();
    let network = MemoryNetwork::new();
    let hub_config = Config {
        conn_limit: 1,
        ..listening("hub", 8100)
    };
    let (_hub, _) = Peer::new(hub_config, &network).unwrap();
    let first = Config {
        initial_peers: vec![addr(8100)],
        ..listening("first", 8101)
    };
    let second = Config {
        initial_peers: vec![addr(8100)],
        ..listening("second", 8102)
    };
    let (_first, errors) = Peer::new(first, &network).unwrap();
    assert!(errors.is_empty());
    let (_second, errors) = Peer::new(second, &network).unwrap();
    assert_eq!(errors.len(), 1);
}

#[test]
fn dropped_peer_leaves_the_mesh() {
    init_tracing();
    let network = MemoryNetwork::new();
    let (a, _) = Peer::new(listening("a", 8200), &network).unwrap();
    let config = Config {
        initial_peers: vec![addr(8200)],
        ..listening("b", 8201)
    };
    let (b, _) = Peer::new(config, &network).unwrap();
    let a_name = a.name();
    assert_eq!(b.nickname_from_peer_name(a_name).as_deref(), Some("a"));

    // Clones share the transport; the peer leaves once the last one goes.
    let a_clone = a.clone();
    drop(a);
    assert_eq!(b.membership().len(), 2);
    drop(a_clone);
    assert_eq!(b.membership().len(), 1);
    assert!(b.send(a_name, b"hello?").is_err());
}
