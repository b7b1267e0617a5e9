//! Peer groups running against each other over the in-memory transport.

use std::{collections::HashSet, time::Duration};

use assert_matches::assert_matches;
use bitsquare_net_memory::{MemoryConnection, MemoryNetwork, MemoryNode, SentMessage};
use bitsquare_net_messages::{
    AuthenticationMessage, AuthenticationRejection, AuthenticationRequest, DataBroadcast,
    GetPeersRequest, MaintenanceMessage, NetworkMessage, PeerExchangeMessage,
};
use bitsquare_net_peers::{
    AuthenticationError, DelayRange, PeerGroup, PeerGroupConfig, PeerGroupError, PeerGroupEvent,
    PeerGroupHandle,
};
use bitsquare_net_primitives::{Address, ReportedPeer, unix_millis};
use bitsquare_net_transport::{NetworkEvent, NetworkNode};
use bytes::Bytes;
use tokio::sync::broadcast::error::TryRecvError;

fn addr(port: u16) -> Address {
    Address::new("localhost", port)
}

fn config(seed: u64) -> PeerGroupConfig {
    PeerGroupConfig::default().with_rng_seed(seed)
}

fn start(network: &MemoryNetwork, port: u16, config: PeerGroupConfig) -> PeerGroupHandle {
    PeerGroup::spawn(network.add_node(addr(port)), config)
}

/// Long enough for handshakes and delayed broadcasts to finish, short of any
/// periodic round.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

fn sent_where(
    network: &MemoryNetwork,
    from: u16,
    predicate: impl Fn(&NetworkMessage) -> bool,
) -> Vec<SentMessage> {
    network
        .sent_messages(&addr(from))
        .into_iter()
        .filter(|sent| predicate(&sent.message))
        .collect()
}

fn is_request(message: &NetworkMessage) -> bool {
    matches!(
        message,
        NetworkMessage::Authentication(AuthenticationMessage::Request(_))
    )
}

fn is_rejection(message: &NetworkMessage) -> bool {
    matches!(
        message,
        NetworkMessage::Authentication(AuthenticationMessage::Rejection(_))
    )
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<PeerGroupEvent>) -> Vec<PeerGroupEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

fn reported_batch(count: u16) -> HashSet<ReportedPeer> {
    let now = unix_millis();
    (0..count)
        .map(|i| ReportedPeer::new(Address::new("10.0.0.1", 10_000 + i), now))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_to_seed_and_exchange_peers() {
    let network = MemoryNetwork::new();
    let seed = start(&network, 8000, config(1));
    let node = start(&network, 8001, config(2));

    node.authenticate_to_seed_node(addr(8000), HashSet::from([addr(8000)]))
        .unwrap();
    settle().await;

    assert_eq!(node.authenticated_peers().await.unwrap(), vec![addr(8000)]);
    assert_eq!(seed.authenticated_peers().await.unwrap(), vec![addr(8001)]);
    assert!(!node.is_in_authentication_process(addr(8000)).await.unwrap());

    // One exchange round plus its stagger.
    tokio::time::sleep(Duration::from_secs(4 * 60 + 10)).await;
    let requests = sent_where(&network, 8001, |m| {
        matches!(
            m,
            NetworkMessage::PeerExchange(PeerExchangeMessage::GetPeersRequest(_))
        )
    });
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|sent| sent.to == addr(8000)));
    let responses = sent_where(&network, 8000, |m| {
        matches!(
            m,
            NetworkMessage::PeerExchange(PeerExchangeMessage::GetPeersResponse(_))
        )
    });
    assert!(!responses.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_falls_back_to_next_seed() {
    let network = MemoryNetwork::new();
    let _offline = network.add_node(addr(8000));
    network.set_online(&addr(8000), false);
    let _seed = start(&network, 8002, config(1));
    let node = start(&network, 8001, config(2));

    node.authenticate_to_seed_node(addr(8000), HashSet::from([addr(8000), addr(8002)]))
        .unwrap();
    settle().await;

    assert_eq!(node.authenticated_peers().await.unwrap(), vec![addr(8002)]);
    let status = node.status().await.unwrap();
    assert_eq!(status.remaining_seed_nodes, 0);
    assert_eq!(status.handshakes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_discovers_reported_peers_through_seed() {
    let network = MemoryNetwork::new();
    let seeds = HashSet::from([addr(8000)]);
    let seed = start(&network, 8000, config(1));
    let first = start(&network, 8001, config(2));
    let second = start(&network, 8002, config(3));

    first
        .authenticate_to_seed_node(addr(8000), seeds.clone())
        .unwrap();
    settle().await;
    second.authenticate_to_seed_node(addr(8000), seeds).unwrap();
    settle().await;

    assert_eq!(
        second.authenticated_peers().await.unwrap(),
        vec![addr(8000), addr(8001)]
    );
    assert_eq!(
        first.authenticated_peers().await.unwrap(),
        vec![addr(8000), addr(8002)]
    );
    assert_eq!(
        seed.authenticated_peers().await.unwrap(),
        vec![addr(8001), addr(8002)]
    );
    // Authenticated peers never linger in the reported pool.
    assert!(second.reported_peers().await.unwrap().is_empty());

    // Seeds are left out of the shared snapshot.
    let snapshot = second.authenticated_and_reported_peers().await.unwrap();
    let addresses: HashSet<_> = snapshot.into_iter().map(|p| p.address).collect();
    assert_eq!(addresses, HashSet::from([addr(8001)]));
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_direct_authentication_converges() {
    let network = MemoryNetwork::new();
    let a = start(&network, 8001, config(1));
    let b = start(&network, 8002, config(2));

    let (from_a, from_b) = tokio::join!(
        a.authenticate_to_direct_message_peer(addr(8002)),
        b.authenticate_to_direct_message_peer(addr(8001)),
    );
    assert_matches!(from_a, Ok(_));
    assert_matches!(from_b, Ok(_));
    settle().await;

    assert_eq!(a.authenticated_peers().await.unwrap(), vec![addr(8002)]);
    assert_eq!(b.authenticated_peers().await.unwrap(), vec![addr(8001)]);

    let rejections = sent_where(&network, 8001, is_rejection).len()
        + sent_where(&network, 8002, is_rejection).len();
    assert_eq!(rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_direct_authentication_shortcuts() {
    let network = MemoryNetwork::new();
    let a = start(&network, 8001, config(1));
    let _b = start(&network, 8002, config(2));

    assert_matches!(
        a.authenticate_to_direct_message_peer(addr(8001)).await,
        Err(AuthenticationError::OwnAddress)
    );

    let first = a.authenticate_to_direct_message_peer(addr(8002)).await.unwrap();
    let again = a.authenticate_to_direct_message_peer(addr(8002)).await.unwrap();
    assert_eq!(first, again);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_skips_sender_and_departed_peers() {
    let network = MemoryNetwork::new();
    let seeds = HashSet::from([addr(8000)]);
    let seed = start(&network, 8000, config(1));
    let mut nodes = Vec::new();
    for port in 8001..=8003 {
        let node = start(&network, port, config(u64::from(port)));
        node.authenticate_to_seed_node(addr(8000), seeds.clone())
            .unwrap();
        nodes.push(node);
    }
    settle().await;
    assert_eq!(seed.authenticated_peers().await.unwrap().len(), 3);

    let is_data = |m: &NetworkMessage| matches!(m, NetworkMessage::Data(_));
    let payload = DataBroadcast::new(Bytes::from_static(b"offer"));

    network.clear_sent_messages(&addr(8000));
    seed.broadcast(payload.clone(), Some(addr(8001))).unwrap();
    settle().await;
    let recipients: HashSet<_> = sent_where(&network, 8000, is_data)
        .into_iter()
        .map(|sent| sent.to)
        .collect();
    assert_eq!(recipients, HashSet::from([addr(8002), addr(8003)]));

    // Going offline between scheduling and sending drops the peer from the fan-out.
    network.clear_sent_messages(&addr(8000));
    network.set_online(&addr(8002), false);
    seed.broadcast(payload, None).unwrap();
    settle().await;
    let recipients: HashSet<_> = sent_where(&network, 8000, is_data)
        .into_iter()
        .map(|sent| sent.to)
        .collect();
    assert_eq!(recipients, HashSet::from([addr(8001), addr(8003)]));
    assert!(!seed.authenticated_peers().await.unwrap().contains(&addr(8002)));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_peer_report_closes_connection() {
    let network = MemoryNetwork::new();
    let group = start(
        &network,
        8000,
        config(1).with_max_reported_peers(3000),
    );
    let mut events = group.subscribe();
    let raw = network.add_node(addr(8001));
    let mut raw_events = raw.subscribe();

    let request = AuthenticationRequest {
        sender_address: addr(8001),
        requester_nonce: 7,
        reported_peers: reported_batch(5000),
    };
    raw.send_to_address(&addr(8000), request.into()).await.unwrap();
    settle().await;

    let status = group.status().await.unwrap();
    assert_eq!(status.reported, 0);
    assert_eq!(status.authenticated, 0);
    assert_eq!(status.handshakes, 0);
    assert!(drain_events(&mut events).iter().any(|event| matches!(
        event,
        PeerGroupEvent::HostileBatch { size: 5000, .. }
    )));

    let mut closed = false;
    while let Ok(event) = raw_events.try_recv() {
        closed |= matches!(event, NetworkEvent::Disconnected { .. });
    }
    assert!(closed);
}

#[tokio::test(start_paused = true)]
async fn test_peer_report_at_limit_is_purged_to_capacity() {
    let network = MemoryNetwork::new();
    let group = start(
        &network,
        8000,
        config(1).with_max_reported_peers(3000),
    );
    let raw = network.add_node(addr(8001));

    let request = AuthenticationRequest {
        sender_address: addr(8001),
        requester_nonce: 7,
        reported_peers: reported_batch(3054),
    };
    raw.send_to_address(&addr(8000), request.into()).await.unwrap();
    settle().await;

    let status = group.status().await.unwrap();
    assert_eq!(status.reported, 3000);
    assert_eq!(status.authenticated, 1);
}

/// Answer the next authentication request `raw` receives with a rejection.
async fn reject_next_request(
    raw: &MemoryNode,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<NetworkEvent<MemoryConnection>>,
) {
    while let Some(event) = events.recv().await {
        if let NetworkEvent::Message {
            message: NetworkMessage::Authentication(AuthenticationMessage::Request(_)),
            connection,
        } = event
        {
            let rejection = AuthenticationRejection {
                sender_address: raw.local_address(),
            };
            raw.send_to_connection(&connection, rejection.into())
                .await
                .unwrap();
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_authentication() {
    let network = MemoryNetwork::new();
    let group = start(&network, 8000, config(1));
    let raw = network.add_node(addr(8001));
    let mut raw_events = raw.subscribe();

    let (result, ()) = tokio::join!(
        group.authenticate_to_direct_message_peer(addr(8001)),
        reject_next_request(&raw, &mut raw_events),
    );
    assert_matches!(result, Err(AuthenticationError::Rejected));
    assert!(group.authenticated_peers().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_authentication_times_out() {
    let network = MemoryNetwork::new();
    let group = start(
        &network,
        8000,
        config(1).with_handshake_timeout(Duration::from_secs(15)),
    );
    let _silent = network.add_node(addr(8001));

    let pending = tokio::spawn({
        let group = group.clone();
        async move { group.authenticate_to_direct_message_peer(addr(8001)).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(group.is_in_authentication_process(addr(8001)).await.unwrap());

    let result = pending.await.unwrap();
    assert_matches!(result, Err(AuthenticationError::Timeout(t)) if t == Duration::from_secs(15));
    assert!(!group.is_in_authentication_process(addr(8001)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_idle_peers_are_pinged() {
    let network = MemoryNetwork::new();
    let quiet = |seed| config(seed).with_exchange_interval(DelayRange::from_secs(3600, 3600));
    let seed = start(&network, 8000, quiet(1));
    let node = start(&network, 8001, quiet(2));
    node.authenticate_to_seed_node(addr(8000), HashSet::from([addr(8000)]))
        .unwrap();
    settle().await;

    // One maintenance round plus its stagger. Whichever side pings first
    // refreshes the connection, so the other side may skip its own ping.
    tokio::time::sleep(Duration::from_secs(7 * 60 + 10)).await;
    let is_ping = |m: &NetworkMessage| {
        matches!(m, NetworkMessage::Maintenance(MaintenanceMessage::Ping(_)))
    };
    let is_pong = |m: &NetworkMessage| {
        matches!(m, NetworkMessage::Maintenance(MaintenanceMessage::Pong(_)))
    };
    let pings =
        sent_where(&network, 8000, is_ping).len() + sent_where(&network, 8001, is_ping).len();
    let pongs =
        sent_where(&network, 8000, is_pong).len() + sent_where(&network, 8001, is_pong).len();
    assert!(pings > 0);
    assert_eq!(pings, pongs);
    assert_eq!(node.authenticated_peers().await.unwrap(), vec![addr(8000)]);
    assert_eq!(seed.authenticated_peers().await.unwrap(), vec![addr(8001)]);
}

#[tokio::test(start_paused = true)]
async fn test_direct_peer_evicts_passive_connection() {
    let network = MemoryNetwork::new();
    let _seed = start(&network, 8000, config(1));
    let _direct = start(&network, 8002, config(2));
    let node = start(&network, 8001, config(3).with_max_connections_low_priority(1));
    let mut events = node.subscribe();

    node.authenticate_to_seed_node(addr(8000), HashSet::from([addr(8000)]))
        .unwrap();
    settle().await;
    node.authenticate_to_direct_message_peer(addr(8002))
        .await
        .unwrap();
    settle().await;

    assert_eq!(node.authenticated_peers().await.unwrap(), vec![addr(8002)]);
    assert!(drain_events(&mut events).iter().any(|event| matches!(
        event,
        PeerGroupEvent::PeerRemoved { address } if *address == addr(8000)
    )));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_sessions() {
    let network = MemoryNetwork::new();
    let seed = start(&network, 8000, config(1));
    let node = start(&network, 8001, config(2));
    node.authenticate_to_seed_node(addr(8000), HashSet::from([addr(8000)]))
        .unwrap();
    settle().await;

    node.shutdown().await.unwrap();
    settle().await;

    assert!(seed.authenticated_peers().await.unwrap().is_empty());
    assert_eq!(
        node.authenticated_peers().await,
        Err(PeerGroupError::ServiceStopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_direct_authentication_joins_handshake_in_flight() {
    let network = MemoryNetwork::new();
    let a = start(&network, 8001, config(1));
    let _b = start(&network, 8002, config(2));

    let (first, second) = tokio::join!(
        a.authenticate_to_direct_message_peer(addr(8002)),
        a.authenticate_to_direct_message_peer(addr(8002)),
    );
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(sent_where(&network, 8001, is_request).len(), 1);

    // Callers joining an unanswered handshake share its timeout.
    let _silent = network.add_node(addr(8003));
    let (first, second) = tokio::join!(
        a.authenticate_to_direct_message_peer(addr(8003)),
        a.authenticate_to_direct_message_peer(addr(8003)),
    );
    assert_matches!(first, Err(AuthenticationError::Timeout(_)));
    assert_matches!(second, Err(AuthenticationError::Timeout(_)));
    let to_silent = sent_where(&network, 8001, is_request)
        .into_iter()
        .filter(|sent| sent.to == addr(8003))
        .count();
    assert_eq!(to_silent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_from_authenticated_address_is_rejected() {
    let network = MemoryNetwork::new();
    let group = start(&network, 8000, config(1));
    let raw = network.add_node(addr(8001));
    let request = || AuthenticationRequest {
        sender_address: addr(8001),
        requester_nonce: 7,
        reported_peers: HashSet::new(),
    };

    raw.send_to_address(&addr(8000), request().into()).await.unwrap();
    settle().await;
    assert_eq!(group.authenticated_peers().await.unwrap(), vec![addr(8001)]);
    assert!(sent_where(&network, 8000, is_rejection).is_empty());

    raw.send_to_address(&addr(8000), request().into()).await.unwrap();
    settle().await;
    assert_eq!(sent_where(&network, 8000, is_rejection).len(), 1);
    assert_eq!(group.authenticated_peers().await.unwrap(), vec![addr(8001)]);
    assert!(!group.is_in_authentication_process(addr(8001)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_sessions_are_evicted_down_to_low_threshold() {
    let network = MemoryNetwork::new();
    let group = start(&network, 8000, config(1).with_max_connections_low_priority(1));
    let mut events = group.subscribe();

    let mut peers = Vec::new();
    for port in 8001..=8010 {
        let peer = start(&network, port, config(u64::from(port)));
        // The session may already be evicted when the caller hears back.
        let _ = peer.authenticate_to_direct_message_peer(addr(8000)).await;
        peers.push(peer);
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(group.authenticated_peers().await.unwrap().len(), 1);
    let removed = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, PeerGroupEvent::PeerRemoved { .. }))
        .count();
    assert_eq!(removed, 9);
}

#[tokio::test(start_paused = true)]
async fn test_failed_exchange_reply_spares_claimed_sender() {
    let network = MemoryNetwork::new();
    let group = start(&network, 8000, config(1));
    let honest = start(&network, 8002, config(2));
    honest
        .authenticate_to_direct_message_peer(addr(8000))
        .await
        .unwrap();

    let raw = network.add_node(addr(8001));
    let auth = AuthenticationRequest {
        sender_address: addr(8001),
        requester_nonce: 7,
        reported_peers: HashSet::new(),
    };
    raw.send_to_address(&addr(8000), auth.into()).await.unwrap();
    settle().await;
    assert_eq!(
        group.authenticated_peers().await.unwrap(),
        vec![addr(8001), addr(8002)]
    );

    // Claim to be the honest peer, then vanish before the reply goes out.
    let spoofed = GetPeersRequest {
        sender_address: addr(8002),
        reported_peers: HashSet::new(),
    };
    raw.send_to_address(&addr(8000), spoofed.into()).await.unwrap();
    network.set_online(&addr(8001), false);
    settle().await;

    assert_eq!(group.authenticated_peers().await.unwrap(), vec![addr(8002)]);
    assert_eq!(honest.authenticated_peers().await.unwrap(), vec![addr(8000)]);
}

#[tokio::test(start_paused = true)]
async fn test_direct_authentication_after_shutdown_reports_stopped_service() {
    let network = MemoryNetwork::new();
    let group = start(&network, 8000, config(1));
    let _peer = start(&network, 8001, config(2));

    let (stopped, authenticated) = tokio::join!(
        group.shutdown(),
        group.authenticate_to_direct_message_peer(addr(8001)),
    );
    stopped.unwrap();
    assert_matches!(authenticated, Err(AuthenticationError::ServiceStopped));
    assert_matches!(
        group.authenticate_to_direct_message_peer(addr(8001)).await,
        Err(AuthenticationError::ServiceStopped)
    );
}
