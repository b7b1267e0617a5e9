//! Periodic peer-list gossip between authenticated peers.

use std::{collections::HashSet, time::Duration};

use bitsquare_net_messages::{GetPeersRequest, GetPeersResponse};
use bitsquare_net_primitives::{Address, ReportedPeer};
use rand::Rng;
use tracing::{debug, trace};

use crate::{DelayRange, PeerView};

/// A peer list request to send after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeAction {
    pub to: Address,
    pub delay: Duration,
}

/// Plans exchange rounds and builds the messages for them.
///
/// It never sends or merges anything itself: send failures and received
/// snapshots go back to the group, which owns the tables.
#[derive(Debug, Clone)]
pub struct PeerExchangeManager {
    interval: DelayRange,
    stagger: DelayRange,
}

impl PeerExchangeManager {
    pub fn new(interval: DelayRange, stagger: DelayRange) -> Self {
        Self { interval, stagger }
    }

    /// Delay until the next round.
    pub fn next_round_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.interval.sample(rng)
    }

    /// One request per authenticated peer, each with its own stagger.
    pub fn plan_round<R: Rng + ?Sized>(
        &self,
        view: &impl PeerView,
        rng: &mut R,
    ) -> Vec<ExchangeAction> {
        let actions: Vec<_> = view
            .authenticated_addresses()
            .into_iter()
            .map(|to| ExchangeAction {
                to,
                delay: self.stagger.sample(rng),
            })
            .collect();
        debug!(peers = actions.len(), "planned peer exchange round");
        actions
    }

    pub fn build_request(&self, view: &impl PeerView) -> GetPeersRequest {
        GetPeersRequest {
            sender_address: view.local_address().clone(),
            reported_peers: view.authenticated_and_reported_peers(),
        }
    }

    /// Answer a request. Returns the response and the requester's peers to merge.
    pub fn on_request(
        &self,
        request: GetPeersRequest,
        view: &impl PeerView,
    ) -> (GetPeersResponse, HashSet<ReportedPeer>) {
        trace!(
            from = %request.sender_address,
            count = request.reported_peers.len(),
            "received peer list request"
        );
        let response = GetPeersResponse {
            reported_peers: view.authenticated_and_reported_peers(),
        };
        (response, request.reported_peers)
    }

    /// Peers to merge from a response.
    pub fn on_response(&self, response: GetPeersResponse) -> HashSet<ReportedPeer> {
        trace!(count = response.reported_peers.len(), "received peer list response");
        response.reported_peers
    }
}
