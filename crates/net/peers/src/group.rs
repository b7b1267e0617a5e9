//! The overlay coordinator.
//!
//! A [`PeerGroup`] owns the authenticated-peer table, the reported-peer pool
//! and every in-flight handshake. It runs as a single task: commands from
//! handles, transport events, completed sends and expired timers are all
//! handled one at a time on that task, so none of the tables need locking.

use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

use bitsquare_net_messages::{
    AuthenticationChallenge, AuthenticationMessage, AuthenticationRejection,
    AuthenticationRequest, DataBroadcast, GetPeersRequest, GetPeersResponse, MaintenanceMessage,
    NetworkMessage, PeerExchangeMessage, Ping, Pong,
};
use bitsquare_net_primitives::{
    Address, ConnectionId, ConnectionPriority, ReportedPeer, unix_millis,
};
use bitsquare_net_transport::{
    Connection, DisconnectReason, NetworkEvent, NetworkNode, SendFuture, TransportResult,
};
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::{
    AuthenticationError, AuthenticationHandshake, AuthenticationPurpose, AuthenticationResult,
    CollisionResolution, ConnectionLimits, ConnectionSnapshot, DelayRange, EventEmitter, HandshakeId,
    HandshakeWaiter, MaintenanceManager, PeerExchangeManager, PeerGroupConfig, PeerGroupHandle,
    PeerView, PongCheck, ReportedPeers,
    handle::Command,
    metrics::PeerGroupMetrics,
    resolve_collision,
    scheduler::{RepeatingTask, Scheduler, Timer},
    select_eviction_candidate,
};

/// An authenticated session: the connection and the address it was
/// authenticated as.
#[derive(Debug, Clone)]
pub struct Peer<C> {
    pub connection: C,
    pub address: Address,
}

/// Summary of a peer group's tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerGroupStatus {
    pub local_address: Address,
    pub authenticated: usize,
    pub reported: usize,
    pub handshakes: usize,
    pub remaining_seed_nodes: usize,
}

/// The tables only the group writes. Periodic managers read them through
/// [`PeerView`].
struct PeerTables<C> {
    local_address: Address,
    authenticated: HashMap<Address, Peer<C>>,
    reported: ReportedPeers,
    seed_nodes: HashSet<Address>,
}

impl<C: Connection> PeerTables<C> {
    /// Merge a batch, skipping own, seed and authenticated addresses, then purge
    /// down to `max`. Returns how many entries were added and purged.
    fn merge_reported<R: Rng + ?Sized>(
        &mut self,
        batch: HashSet<ReportedPeer>,
        max: usize,
        rng: &mut R,
    ) -> (usize, usize) {
        let Self {
            local_address,
            authenticated,
            reported,
            seed_nodes,
        } = self;
        let outcome = reported.merge(batch, |address| {
            *address == *local_address
                || seed_nodes.contains(address)
                || authenticated.contains_key(address)
        });
        let purged = reported.purge(max, rng);
        trace!(
            added = outcome.added,
            updated = outcome.updated,
            excluded = outcome.excluded,
            purged,
            total = reported.len(),
            "merged reported peers"
        );
        (outcome.added, purged)
    }
}

impl<C: Connection> PeerView for PeerTables<C> {
    fn local_address(&self) -> &Address {
        &self.local_address
    }

    fn authenticated_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.authenticated.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn authenticated_and_reported_peers(&self) -> HashSet<ReportedPeer> {
        let now = unix_millis();
        let mut all: HashSet<ReportedPeer> = self.reported.iter().cloned().collect();
        all.extend(
            self.authenticated
                .keys()
                .filter(|address| !self.seed_nodes.contains(*address))
                .map(|address| ReportedPeer::new(address.clone(), now)),
        );
        all
    }

    fn last_activity(&self, peer: &Address) -> Option<Instant> {
        self.authenticated
            .get(peer)
            .map(|peer| peer.connection.last_activity())
    }
}

/// What an outgoing message was for, so its completion can be routed.
#[derive(Debug, Clone, Copy)]
enum SendPurpose {
    AuthenticationRequest(HandshakeId),
    AuthenticationChallenge(HandshakeId),
    AuthenticationRejection,
    Broadcast,
    GetPeersRequest,
    GetPeersResponse,
    Ping,
    Pong,
}

/// Asynchronous work finishing back on the group's task.
enum Completion<C> {
    Sent {
        peer: Address,
        purpose: SendPurpose,
        result: TransportResult<C>,
    },
    Evicted,
    Closed,
}

/// How an outbound handshake ended, from the bootstrap loop's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapStep {
    Authenticated,
    Failed,
    /// Replaced by the peer's own request after a collision.
    Superseded,
}

/// Overlay coordinator service.
pub struct PeerGroup<N: NetworkNode> {
    config: PeerGroupConfig,
    limits: ConnectionLimits,
    network: N,
    tables: PeerTables<N::Connection>,
    handshakes: HashMap<Address, AuthenticationHandshake<N::Connection>>,
    remaining_seed_nodes: Vec<Address>,
    bootstrapping: bool,
    exchange: PeerExchangeManager,
    maintenance: MaintenanceManager,
    scheduler: Scheduler,
    pending: FuturesUnordered<BoxFuture<'static, Completion<N::Connection>>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    network_rx: mpsc::UnboundedReceiver<NetworkEvent<N::Connection>>,
    events: EventEmitter,
    metrics: PeerGroupMetrics,
    rng: StdRng,
    next_handshake_id: u64,
}

impl<N: NetworkNode> PeerGroup<N> {
    /// Create a group on top of `network`.
    ///
    /// Subscribes to the transport immediately, so nothing delivered before
    /// [`run`](Self::run) is polled gets lost.
    pub fn new(network: N, config: PeerGroupConfig) -> (Self, PeerGroupHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let network_rx = network.subscribe();
        let events = EventEmitter::default();
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let group = Self {
            limits: config.connection_limits(),
            tables: PeerTables {
                local_address: network.local_address(),
                authenticated: HashMap::new(),
                reported: ReportedPeers::new(),
                seed_nodes: HashSet::new(),
            },
            handshakes: HashMap::new(),
            remaining_seed_nodes: Vec::new(),
            bootstrapping: false,
            exchange: PeerExchangeManager::new(config.exchange_interval, config.exchange_stagger),
            maintenance: MaintenanceManager::new(
                config.maintenance_interval,
                config.ping_stagger,
                config.inactivity_before_ping,
            ),
            scheduler: Scheduler::default(),
            pending: FuturesUnordered::new(),
            command_rx,
            network_rx,
            events: events.clone(),
            metrics: PeerGroupMetrics::default(),
            rng,
            next_handshake_id: 0,
            network,
            config,
        };
        (group, PeerGroupHandle::new(command_tx, events))
    }

    /// Create a group and run it on a new tokio task.
    pub fn spawn(network: N, config: PeerGroupConfig) -> PeerGroupHandle {
        let (group, handle) = Self::new(network, config);
        tokio::spawn(group.into_task());
        handle
    }

    /// Run the event loop until shut down or every handle is dropped.
    pub async fn run(mut self) {
        self.start();
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown { response }) => {
                        self.shut_down().await;
                        let _ = response.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("all peer group handles dropped");
                        self.shut_down().await;
                        break;
                    }
                },
                event = self.network_rx.recv() => match event {
                    Some(event) => self.on_network_event(event),
                    None => {
                        warn!("transport event stream closed");
                        self.shut_down().await;
                        break;
                    }
                },
                Some(completion) = self.pending.next() => self.on_completion(completion),
                Some(timer) = self.scheduler.next() => self.on_timer(timer),
            }
        }
        debug!(local = %self.tables.local_address, "peer group stopped");
    }

    /// Convert self into a spawnable future.
    pub async fn into_task(self) {
        self.run().await;
    }

    fn start(&mut self) {
        let exchange = self.exchange.next_round_delay(&mut self.rng);
        self.scheduler.schedule(exchange, Timer::ExchangeRound);
        let maintenance = self.maintenance.next_round_delay(&mut self.rng);
        self.scheduler
            .schedule(maintenance, Timer::MaintenanceRound);
        debug!(local = %self.tables.local_address, "peer group started");
    }

    async fn shut_down(&mut self) {
        info!(
            authenticated = self.tables.authenticated.len(),
            handshakes = self.handshakes.len(),
            "shutting down peer group"
        );
        self.scheduler.clear();
        for (_, handshake) in self.handshakes.drain() {
            handshake.cancel();
        }
        let closing: Vec<_> = self
            .tables
            .authenticated
            .drain()
            .map(|(_, peer)| peer.connection.shut_down())
            .collect();
        futures::future::join_all(closing).await;
        self.pending.clear();
        self.metrics.set_table_sizes(0, self.tables.reported.len());
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::AuthenticateToSeedNode { first, seed_nodes } => {
                self.authenticate_to_seed_node(first, seed_nodes)
            }
            Command::AuthenticateToDirectMessagePeer { peer, response } => {
                self.authenticate_to_direct_message_peer(peer, response)
            }
            Command::Broadcast { message, sender } => self.broadcast(message, sender.as_ref()),
            Command::AuthenticatedPeers { response } => {
                let _ = response.send(self.tables.authenticated_addresses());
            }
            Command::ReportedPeers { response } => {
                let _ = response.send(self.tables.reported.iter().cloned().collect());
            }
            Command::AuthenticatedAndReportedPeers { response } => {
                let _ = response.send(self.tables.authenticated_and_reported_peers());
            }
            Command::IsInAuthenticationProcess { peer, response } => {
                let _ = response.send(self.handshakes.contains_key(&peer));
            }
            Command::Status { response } => {
                let _ = response.send(self.status());
            }
            // intercepted by `run`
            Command::Shutdown { response } => {
                let _ = response.send(());
            }
        }
    }

    fn status(&self) -> PeerGroupStatus {
        PeerGroupStatus {
            local_address: self.tables.local_address.clone(),
            authenticated: self.tables.authenticated.len(),
            reported: self.tables.reported.len(),
            handshakes: self.handshakes.len(),
            remaining_seed_nodes: self.remaining_seed_nodes.len(),
        }
    }

    // ---- bootstrap ----

    fn authenticate_to_seed_node(&mut self, first: Address, seed_nodes: HashSet<Address>) {
        let local = self.tables.local_address.clone();
        for seed in &seed_nodes {
            self.tables.reported.remove(seed);
        }
        self.remaining_seed_nodes = seed_nodes
            .iter()
            .filter(|seed| **seed != first && **seed != local)
            .cloned()
            .collect();
        self.tables.seed_nodes = seed_nodes;
        self.bootstrapping = true;
        info!(%first, remaining = self.remaining_seed_nodes.len(), "bootstrapping from seed nodes");

        if first == local {
            self.authenticate_to_remaining_seed_node();
        } else {
            self.authenticate_to_first_seed_node(first);
        }
    }

    fn authenticate_to_first_seed_node(&mut self, peer: Address) {
        if self.max_connections_for_authentication_reached() {
            return;
        }
        if !self.authenticate(peer, AuthenticationPurpose::FirstSeedNode, None) {
            self.authenticate_to_remaining_seed_node();
        }
    }

    fn authenticate_to_remaining_seed_node(&mut self) {
        if self.max_connections_for_authentication_reached() {
            return;
        }
        if let Some(seed) = self.take_random_seed_node() {
            if !self.authenticate(seed, AuthenticationPurpose::SeedNode, None) {
                self.authenticate_to_remaining_seed_node();
            }
        } else if !self.tables.reported.is_empty() {
            self.authenticate_to_remaining_reported_peer();
        } else {
            debug!("no seed nodes or reported peers left");
            self.schedule_bootstrap_retry(self.config.no_candidate_backoff);
        }
    }

    fn authenticate_to_remaining_reported_peer(&mut self) {
        if self.max_connections_for_authentication_reached() {
            return;
        }
        if !self.tables.reported.is_empty() {
            let handshakes = &self.handshakes;
            let candidate = self
                .tables
                .reported
                .take_random(&mut self.rng, |address| handshakes.contains_key(address));
            match candidate {
                Some(candidate) => {
                    let purpose = AuthenticationPurpose::ReportedPeer;
                    if !self.authenticate(candidate.address, purpose, None) {
                        self.schedule_bootstrap_retry(self.config.no_candidate_backoff);
                    }
                }
                None => {
                    debug!("every reported peer is mid-handshake");
                    self.schedule_bootstrap_retry(self.config.no_candidate_backoff);
                }
            }
        } else if !self.remaining_seed_nodes.is_empty() {
            self.authenticate_to_remaining_seed_node();
        } else {
            debug!("reported peers and seed nodes exhausted");
            self.schedule_bootstrap_retry(self.config.exhausted_backoff);
        }
    }

    fn continue_bootstrap(&mut self, purpose: AuthenticationPurpose, step: BootstrapStep) {
        match (purpose, step) {
            (AuthenticationPurpose::DirectMessage, _) => {}
            (AuthenticationPurpose::FirstSeedNode, BootstrapStep::Failed) => {
                match self.take_random_seed_node() {
                    Some(next) => self.authenticate_to_first_seed_node(next),
                    None => self.authenticate_to_remaining_reported_peer(),
                }
            }
            (AuthenticationPurpose::FirstSeedNode | AuthenticationPurpose::SeedNode, _) => {
                self.authenticate_to_remaining_seed_node()
            }
            (AuthenticationPurpose::ReportedPeer, _) => {
                self.authenticate_to_remaining_reported_peer()
            }
        }
    }

    /// Stops at the low threshold; a re-check keeps the loop alive for when
    /// peers drop out again.
    fn max_connections_for_authentication_reached(&mut self) -> bool {
        let reached = self.tables.authenticated.len() >= self.limits.low;
        if reached {
            debug!(
                authenticated = self.tables.authenticated.len(),
                "connection target reached"
            );
            self.schedule_bootstrap_retry(self.config.exhausted_backoff);
        }
        reached
    }

    fn schedule_bootstrap_retry(&mut self, backoff: DelayRange) {
        if self.bootstrapping && !self.scheduler.is_scheduled(RepeatingTask::Bootstrap) {
            let delay = backoff.sample(&mut self.rng);
            trace!(?delay, "scheduling bootstrap retry");
            self.scheduler.schedule(delay, Timer::BootstrapRetry);
        }
    }

    fn take_random_seed_node(&mut self) -> Option<Address> {
        let seed = self.remaining_seed_nodes.choose(&mut self.rng)?.clone();
        self.remaining_seed_nodes.retain(|s| *s != seed);
        Some(seed)
    }

    // ---- outbound authentication ----

    fn authenticate_to_direct_message_peer(&mut self, peer: Address, response: HandshakeWaiter) {
        if peer == self.tables.local_address {
            let _ = response.send(Err(AuthenticationError::OwnAddress));
            return;
        }
        if let Some(existing) = self.tables.authenticated.get(&peer) {
            warn!(%peer, "direct message peer already authenticated");
            let _ = response.send(Ok(existing.connection.id()));
            return;
        }
        if let Some(handshake) = self.handshakes.get_mut(&peer) {
            debug!(%peer, id = %handshake.id(), "joining handshake already in flight");
            handshake.add_waiter(response);
            return;
        }
        self.authenticate(peer, AuthenticationPurpose::DirectMessage, Some(response));
    }

    /// Start an outbound handshake. Returns false if `peer` is ourselves,
    /// already authenticated or already mid-handshake.
    fn authenticate(
        &mut self,
        peer: Address,
        purpose: AuthenticationPurpose,
        waiter: Option<HandshakeWaiter>,
    ) -> bool {
        if peer == self.tables.local_address
            || self.tables.authenticated.contains_key(&peer)
            || self.handshakes.contains_key(&peer)
        {
            warn!(%peer, ?purpose, "authentication already established or in progress");
            return false;
        }

        let id = self.next_handshake_id();
        let nonce = self.rng.random();
        let (mut handshake, request) = AuthenticationHandshake::request_authentication(
            id,
            self.tables.local_address.clone(),
            peer.clone(),
            nonce,
            purpose,
            self.tables.authenticated_and_reported_peers(),
        );
        if let Some(waiter) = waiter {
            handshake.add_waiter(waiter);
        }
        self.handshakes.insert(peer.clone(), handshake);
        self.metrics.handshakes_started.increment(1);
        debug!(%peer, %id, ?purpose, "requesting authentication");

        let send = self.network.send_to_address(&peer, request.into());
        self.track_send(peer.clone(), SendPurpose::AuthenticationRequest(id), send);
        self.scheduler
            .schedule(self.config.handshake_timeout, Timer::HandshakeTimeout { peer, id });
        true
    }

    fn next_handshake_id(&mut self) -> HandshakeId {
        self.next_handshake_id += 1;
        HandshakeId(self.next_handshake_id)
    }

    /// Remove the handshake with `peer` if it is still the one with `id`.
    fn take_handshake(
        &mut self,
        peer: &Address,
        id: HandshakeId,
    ) -> Option<AuthenticationHandshake<N::Connection>> {
        if self.handshakes.get(peer).is_some_and(|h| h.id() == id) {
            self.handshakes.remove(peer)
        } else {
            None
        }
    }

    /// Settle a handshake already taken out of the map.
    fn finish_handshake(
        &mut self,
        handshake: AuthenticationHandshake<N::Connection>,
        outcome: AuthenticationResult<N::Connection>,
    ) {
        let peer = handshake.peer().clone();
        let purpose = handshake.purpose();
        // `AuthRequest` only shields an inbound handshake while it runs.
        if let Some(inbound) = handshake.connection() {
            inbound.set_priority(ConnectionPriority::Passive);
        }
        let step = match outcome {
            Ok(connection) => {
                self.metrics.handshakes_succeeded.increment(1);
                let id = connection.id();
                // Waiters on a responder were moved over from a direct-message
                // request that lost a collision.
                let direct = purpose == Some(AuthenticationPurpose::DirectMessage)
                    || (purpose.is_none() && handshake.has_waiters());
                if direct {
                    connection.set_priority(ConnectionPriority::Active);
                }
                self.add_authenticated_peer(connection, peer.clone());
                handshake.complete(Ok(id));
                BootstrapStep::Authenticated
            }
            Err(error) => {
                self.metrics.handshakes_failed.increment(1);
                info!(%peer, id = %handshake.id(), %error, "authentication failed");
                handshake.complete(Err(error));
                self.remove_peer(&peer);
                BootstrapStep::Failed
            }
        };
        if let Some(purpose) = purpose {
            self.continue_bootstrap(purpose, step);
        }
    }

    // ---- inbound authentication ----

    fn process_authentication_request(
        &mut self,
        request: AuthenticationRequest,
        connection: N::Connection,
    ) {
        let peer = request.sender_address.clone();
        connection.set_peer_address(peer.clone());

        if peer == self.tables.local_address {
            warn!(connection = %connection.id(), "authentication request carries our own address");
            return;
        }
        if self.tables.authenticated.contains_key(&peer) {
            info!(%peer, "already authenticated; rejecting request");
            self.reject(peer, &connection);
            return;
        }

        match self.handshakes.get(&peer).map(|h| h.is_initiator()) {
            None => {
                connection.set_priority(ConnectionPriority::AuthRequest);
                self.respond(request, connection, Vec::new());
            }
            Some(false) => {
                debug!(%peer, "duplicate request while responding; rejecting");
                self.reject(peer, &connection);
            }
            Some(true) => {
                self.metrics.collisions.increment(1);
                match resolve_collision(&self.tables.local_address, &peer) {
                    CollisionResolution::KeepOwn => {
                        info!(%peer, "simultaneous authentication; keeping own request");
                        self.reject(peer, &connection);
                    }
                    CollisionResolution::AcceptRemote => {
                        info!(%peer, "simultaneous authentication; accepting peer's request");
                        let Some(mut own) = self.handshakes.remove(&peer) else {
                            return;
                        };
                        let purpose = own.purpose();
                        let waiters = own.take_waiters();
                        own.cancel();
                        connection.set_priority(ConnectionPriority::AuthRequest);
                        self.respond(request, connection, waiters);
                        if let Some(purpose) = purpose {
                            self.continue_bootstrap(purpose, BootstrapStep::Superseded);
                        }
                    }
                }
            }
        }
    }

    /// Answer `request` with a challenge. `waiters` carries callers of a
    /// handshake this one replaces.
    fn respond(
        &mut self,
        request: AuthenticationRequest,
        connection: N::Connection,
        waiters: Vec<HandshakeWaiter>,
    ) {
        let peer = request.sender_address.clone();
        let id = self.next_handshake_id();
        let nonce = self.rng.random();
        let (mut handshake, challenge) = AuthenticationHandshake::respond_to_authentication_request(
            id,
            self.tables.local_address.clone(),
            &request,
            nonce,
            connection.clone(),
            self.tables.authenticated_and_reported_peers(),
        );
        handshake.extend_waiters(waiters);

        let size = request.reported_peers.len();
        if !self.add_to_reported_peers(request.reported_peers, &connection) {
            self.metrics.handshakes_failed.increment(1);
            handshake.complete(Err(AuthenticationError::TooManyReportedPeers(size)));
            return;
        }

        debug!(%peer, %id, "responding to authentication request");
        self.handshakes.insert(peer.clone(), handshake);
        let send = self
            .network
            .send_to_connection(&connection, challenge.into());
        self.track_send(peer.clone(), SendPurpose::AuthenticationChallenge(id), send);
        self.scheduler
            .schedule(self.config.handshake_timeout, Timer::HandshakeTimeout { peer, id });
    }

    fn reject(&mut self, peer: Address, connection: &N::Connection) {
        self.metrics.rejections_sent.increment(1);
        let rejection = AuthenticationRejection {
            sender_address: self.tables.local_address.clone(),
        };
        let send = self
            .network
            .send_to_connection(connection, rejection.into());
        self.track_send(peer, SendPurpose::AuthenticationRejection, send);
    }

    fn process_authentication_challenge(
        &mut self,
        challenge: AuthenticationChallenge,
        connection: N::Connection,
    ) {
        let peer = challenge.sender_address.clone();
        let verification = match self.handshakes.get(&peer) {
            Some(handshake) if handshake.is_initiator() => handshake.verify_challenge(&challenge),
            Some(_) => {
                warn!(%peer, "challenge for a handshake we did not initiate");
                return;
            }
            None => {
                warn!(%peer, connection = %connection.id(), "unexpected authentication challenge");
                return;
            }
        };
        let Some(handshake) = self.handshakes.remove(&peer) else {
            return;
        };

        if let Err(error) = verification {
            warn!(%peer, %error, "invalid authentication challenge");
            self.finish_handshake(handshake, Err(error));
            return;
        }

        let size = challenge.reported_peers.len();
        if !self.add_to_reported_peers(challenge.reported_peers, &connection) {
            self.finish_handshake(
                handshake,
                Err(AuthenticationError::TooManyReportedPeers(size)),
            );
            return;
        }
        self.finish_handshake(handshake, Ok(connection));
    }

    /// Only our own outbound handshake is cancelled: after a lost collision the
    /// rejection targets our superseded request, not the inbound handshake that
    /// replaced it.
    fn process_authentication_rejection(&mut self, rejection: AuthenticationRejection) {
        let peer = rejection.sender_address;
        match self.handshakes.get(&peer).map(|h| h.is_initiator()) {
            Some(true) => {
                if let Some(handshake) = self.handshakes.remove(&peer) {
                    self.finish_handshake(handshake, Err(AuthenticationError::Rejected));
                }
            }
            Some(false) => debug!(%peer, "ignoring rejection of a superseded request"),
            None => debug!(%peer, "ignoring rejection without a handshake"),
        }
    }

    // ---- peer tables ----

    fn add_authenticated_peer(&mut self, connection: N::Connection, peer: Address) {
        connection.set_peer_address(peer.clone());
        connection.set_authenticated();
        self.tables.reported.remove(&peer);

        let id = connection.id();
        self.tables.authenticated.insert(
            peer.clone(),
            Peer {
                connection,
                address: peer.clone(),
            },
        );
        info!(
            %peer,
            connection = %id,
            authenticated = self.tables.authenticated.len(),
            "peer authenticated"
        );
        self.metrics
            .set_table_sizes(self.tables.authenticated.len(), self.tables.reported.len());
        self.events.peer_authenticated(peer, id);

        if !self.check_if_connected_peers_exceeds() {
            self.log_authenticated_peers();
        }
    }

    /// Forget `peer` entirely: its handshake, its reported entry and its
    /// authenticated session.
    fn remove_peer(&mut self, peer: &Address) {
        self.maintenance.forget(peer);
        let reported_removed = self.tables.reported.remove(peer).is_some();
        if let Some(handshake) = self.handshakes.remove(peer) {
            self.finish_handshake(handshake, Err(AuthenticationError::PeerRemoved));
        }
        if self.tables.authenticated.remove(peer).is_some() {
            info!(%peer, authenticated = self.tables.authenticated.len(), "peer removed");
            self.events.peer_removed(peer.clone());
            self.log_authenticated_peers();
        }
        if reported_removed {
            self.events.reported_peers_changed(self.tables.reported.len());
        }
        self.metrics
            .set_table_sizes(self.tables.authenticated.len(), self.tables.reported.len());
    }

    /// Merge a peer report received on `connection`. Returns false, and closes
    /// the connection, when the batch is over the flooding limit.
    fn add_to_reported_peers(
        &mut self,
        batch: HashSet<ReportedPeer>,
        connection: &N::Connection,
    ) -> bool {
        let size = batch.len();
        let limit = self.config.max_reported_batch();
        if size > limit {
            let peer = connection.peer_address();
            warn!(?peer, size, limit, "peer report exceeds limit; closing connection");
            self.metrics.hostile_batches.increment(1);
            self.events.hostile_batch(connection.id(), peer, size);
            let closing = connection.shut_down();
            self.pending.push(
                async move {
                    closing.await;
                    Completion::Closed
                }
                .boxed(),
            );
            return false;
        }

        let (added, purged) =
            self.tables
                .merge_reported(batch, self.config.max_reported_peers, &mut self.rng);
        if added > 0 || purged > 0 {
            self.events
                .reported_peers_changed(self.tables.reported.len());
            self.metrics
                .set_table_sizes(self.tables.authenticated.len(), self.tables.reported.len());
        }
        true
    }

    /// Evict one connection if the authenticated count is over the low
    /// threshold. Returns whether an eviction started.
    fn check_if_connected_peers_exceeds(&mut self) -> bool {
        let authenticated = self.tables.authenticated.len();
        if authenticated <= self.limits.low {
            return false;
        }

        let connections = self.network.all_connections();
        let snapshots: Vec<_> = connections.iter().map(ConnectionSnapshot::of).collect();
        let Some(victim) = select_eviction_candidate(authenticated, &snapshots, &self.limits)
        else {
            debug!(authenticated, "over connection limit but nothing is evictable");
            return false;
        };
        let Some(connection) = connections.into_iter().find(|c| c.id() == victim) else {
            return false;
        };

        info!(
            connection = %victim,
            peer = ?connection.peer_address(),
            priority = %connection.priority(),
            authenticated,
            "evicting connection"
        );
        self.metrics.evictions.increment(1);
        let closing = connection.shut_down();
        self.pending.push(
            async move {
                closing.await;
                Completion::Evicted
            }
            .boxed(),
        );
        true
    }

    fn log_authenticated_peers(&self) {
        debug!(
            local = %self.tables.local_address,
            peers = ?self.tables.authenticated_addresses(),
            "authenticated peers"
        );
    }

    // ---- broadcast ----

    fn broadcast(&mut self, message: DataBroadcast, sender: Option<&Address>) {
        let targets: Vec<(Address, ConnectionId)> = self
            .tables
            .authenticated
            .iter()
            .filter(|(address, _)| Some(*address) != sender)
            .map(|(address, peer)| (address.clone(), peer.connection.id()))
            .collect();
        debug!(peers = targets.len(), ?sender, "broadcasting message");

        for (peer, connection) in targets {
            let delay = self.config.broadcast_delay.sample(&mut self.rng);
            self.scheduler.schedule(
                delay,
                Timer::BroadcastSend {
                    peer,
                    connection,
                    message: message.clone(),
                },
            );
        }
    }

    /// Send a delayed broadcast if `peer` is still authenticated on the same
    /// connection.
    fn broadcast_send(&mut self, peer: Address, connection: ConnectionId, message: DataBroadcast) {
        let Some(target) = self
            .tables
            .authenticated
            .get(&peer)
            .filter(|p| p.connection.id() == connection)
        else {
            trace!(%peer, "peer gone before broadcast send");
            return;
        };
        self.metrics.broadcast_sends.increment(1);
        let send = self
            .network
            .send_to_connection(&target.connection, message.into());
        self.track_send(peer, SendPurpose::Broadcast, send);
    }

    // ---- peer exchange ----

    fn exchange_round(&mut self) {
        for action in self.exchange.plan_round(&self.tables, &mut self.rng) {
            self.scheduler
                .schedule(action.delay, Timer::ExchangeRequest { peer: action.to });
        }
        let next = self.exchange.next_round_delay(&mut self.rng);
        self.scheduler.schedule(next, Timer::ExchangeRound);
    }

    fn exchange_request(&mut self, peer: Address) {
        let Some(target) = self.tables.authenticated.get(&peer) else {
            trace!(%peer, "peer gone before exchange request");
            return;
        };
        let request = self.exchange.build_request(&self.tables);
        self.metrics.exchange_requests.increment(1);
        let send = self
            .network
            .send_to_connection(&target.connection, request.into());
        self.track_send(peer, SendPurpose::GetPeersRequest, send);
    }

    fn on_get_peers_request(&mut self, request: GetPeersRequest, connection: N::Connection) {
        let claimed = request.sender_address.clone();
        let (response, reported) = self.exchange.on_request(request, &self.tables);
        if !self.add_to_reported_peers(reported, &connection) {
            return;
        }
        // A failed reply removes whoever is behind the connection, never the
        // address the request claims.
        let Some(peer) = connection.peer_address() else {
            debug!(
                %claimed,
                connection = %connection.id(),
                "peer request from unidentified connection"
            );
            return;
        };
        if peer != claimed {
            debug!(%peer, %claimed, "peer request names another sender");
        }
        let send = self
            .network
            .send_to_connection(&connection, response.into());
        self.track_send(peer, SendPurpose::GetPeersResponse, send);
    }

    fn on_get_peers_response(&mut self, response: GetPeersResponse, connection: N::Connection) {
        let reported = self.exchange.on_response(response);
        self.add_to_reported_peers(reported, &connection);
    }

    // ---- maintenance ----

    fn maintenance_round(&mut self) {
        let now = tokio::time::Instant::now().into_std();
        for action in self
            .maintenance
            .plan_round(&self.tables, now, &mut self.rng)
        {
            self.scheduler
                .schedule(action.delay, Timer::Ping { peer: action.to });
        }
        let next = self.maintenance.next_round_delay(&mut self.rng);
        self.scheduler.schedule(next, Timer::MaintenanceRound);
    }

    fn ping(&mut self, peer: Address) {
        let Some(target) = self.tables.authenticated.get(&peer) else {
            return;
        };
        let ping = self.maintenance.build_ping(&peer, &mut self.rng);
        trace!(%peer, nonce = ping.nonce, "pinging idle peer");
        let send = self
            .network
            .send_to_connection(&target.connection, ping.into());
        self.track_send(peer, SendPurpose::Ping, send);
    }

    fn on_ping(&mut self, ping: Ping, connection: N::Connection) {
        let Some(peer) = connection.peer_address() else {
            debug!(connection = %connection.id(), "ping from unidentified connection");
            return;
        };
        let pong = self.maintenance.on_ping(ping);
        let send = self.network.send_to_connection(&connection, pong.into());
        self.track_send(peer, SendPurpose::Pong, send);
    }

    fn on_pong(&mut self, pong: Pong, connection: N::Connection) {
        let Some(peer) = connection.peer_address() else {
            return;
        };
        match self.maintenance.on_pong(&peer, pong) {
            PongCheck::Matched => trace!(%peer, "pong received"),
            PongCheck::Mismatch { .. } => self.remove_peer(&peer),
            PongCheck::Unsolicited => debug!(%peer, "unsolicited pong"),
        }
    }

    // ---- event dispatch ----

    fn track_send(&mut self, peer: Address, purpose: SendPurpose, send: SendFuture<N::Connection>) {
        self.pending.push(
            async move {
                Completion::Sent {
                    peer,
                    purpose,
                    result: send.await,
                }
            }
            .boxed(),
        );
    }

    fn on_network_event(&mut self, event: NetworkEvent<N::Connection>) {
        match event {
            NetworkEvent::Message {
                message,
                connection,
            } => self.on_message(message, connection),
            NetworkEvent::Connected(connection) => {
                trace!(connection = %connection.id(), "connection opened");
            }
            NetworkEvent::Disconnected {
                connection,
                reason,
                peer_address,
            } => self.on_disconnect(connection, reason, peer_address),
            NetworkEvent::Error { connection, error } => {
                debug!(connection = %connection.id(), %error, "transport error");
            }
        }
    }

    fn on_message(&mut self, message: NetworkMessage, connection: N::Connection) {
        trace!(kind = message.kind(), connection = %connection.id(), "message received");
        match message {
            NetworkMessage::Authentication(AuthenticationMessage::Request(request)) => {
                self.process_authentication_request(request, connection)
            }
            NetworkMessage::Authentication(AuthenticationMessage::Challenge(challenge)) => {
                self.process_authentication_challenge(challenge, connection)
            }
            NetworkMessage::Authentication(AuthenticationMessage::Rejection(rejection)) => {
                self.process_authentication_rejection(rejection)
            }
            NetworkMessage::PeerExchange(PeerExchangeMessage::GetPeersRequest(request)) => {
                self.on_get_peers_request(request, connection)
            }
            NetworkMessage::PeerExchange(PeerExchangeMessage::GetPeersResponse(response)) => {
                self.on_get_peers_response(response, connection)
            }
            NetworkMessage::Maintenance(MaintenanceMessage::Ping(ping)) => {
                self.on_ping(ping, connection)
            }
            NetworkMessage::Maintenance(MaintenanceMessage::Pong(pong)) => {
                self.on_pong(pong, connection)
            }
            // Application payloads are consumed by the layers above.
            NetworkMessage::Data(_) => {}
        }
    }

    fn on_disconnect(
        &mut self,
        connection: N::Connection,
        reason: DisconnectReason,
        peer_address: Option<Address>,
    ) {
        let Some(peer) = peer_address.or_else(|| connection.peer_address()) else {
            trace!(connection = %connection.id(), %reason, "unidentified connection closed");
            return;
        };
        let replaced = self
            .tables
            .authenticated
            .get(&peer)
            .is_some_and(|p| p.connection.id() != connection.id());
        if replaced {
            debug!(%peer, connection = %connection.id(), "stale connection closed");
            return;
        }
        debug!(%peer, connection = %connection.id(), %reason, "connection closed");
        self.remove_peer(&peer);
    }

    fn on_completion(&mut self, completion: Completion<N::Connection>) {
        match completion {
            Completion::Sent {
                peer,
                purpose,
                result,
            } => self.on_send_completed(peer, purpose, result),
            Completion::Evicted => {
                let delay = self.config.eviction_recheck_delay.sample(&mut self.rng);
                self.scheduler.schedule(delay, Timer::EvictionCheck);
            }
            Completion::Closed => {}
        }
    }

    fn on_send_completed(
        &mut self,
        peer: Address,
        purpose: SendPurpose,
        result: TransportResult<N::Connection>,
    ) {
        match (purpose, result) {
            (SendPurpose::AuthenticationRequest(_), Ok(_)) => {
                trace!(%peer, "authentication request delivered");
            }
            (SendPurpose::AuthenticationRequest(id), Err(error)) => {
                if let Some(handshake) = self.take_handshake(&peer, id) {
                    self.finish_handshake(handshake, Err(error.into()));
                }
            }
            (SendPurpose::AuthenticationChallenge(id), result) => {
                if let Some(handshake) = self.take_handshake(&peer, id) {
                    self.finish_handshake(handshake, result.map_err(Into::into));
                }
            }
            (SendPurpose::AuthenticationRejection, Err(error)) => {
                debug!(%peer, %error, "failed to deliver rejection");
            }
            (_, Ok(_)) => trace!(%peer, ?purpose, "message delivered"),
            (purpose, Err(error)) => {
                info!(%peer, ?purpose, %error, "send failed; removing peer");
                self.remove_peer(&peer);
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::BootstrapRetry => self.authenticate_to_remaining_reported_peer(),
            Timer::HandshakeTimeout { peer, id } => {
                if let Some(handshake) = self.take_handshake(&peer, id) {
                    self.finish_handshake(
                        handshake,
                        Err(AuthenticationError::Timeout(self.config.handshake_timeout)),
                    );
                }
            }
            Timer::ExchangeRound => self.exchange_round(),
            Timer::ExchangeRequest { peer } => self.exchange_request(peer),
            Timer::MaintenanceRound => self.maintenance_round(),
            Timer::Ping { peer } => self.ping(peer),
            Timer::BroadcastSend {
                peer,
                connection,
                message,
            } => self.broadcast_send(peer, connection, message),
            Timer::EvictionCheck => {
                self.check_if_connected_peers_exceeds();
            }
        }
    }
}
