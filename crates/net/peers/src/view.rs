use std::{collections::HashSet, time::Instant};

use bitsquare_net_primitives::{Address, ReportedPeer};

/// Read-only access to the peer tables.
///
/// Periodic managers plan their work against this view and hand actions back
/// to the group, which stays the only writer of the tables.
pub trait PeerView {
    fn local_address(&self) -> &Address;

    fn authenticated_addresses(&self) -> Vec<Address>;

    /// Reported peers plus authenticated non-seed peers stamped with the
    /// current time.
    fn authenticated_and_reported_peers(&self) -> HashSet<ReportedPeer>;

    /// Last activity on the connection of an authenticated peer.
    fn last_activity(&self, peer: &Address) -> Option<Instant>;
}

#[cfg(test)]
pub(crate) mod test_view {
    use std::collections::HashMap;

    use super::*;

    /// Fixed tables for exercising managers without a running group.
    #[derive(Debug)]
    pub(crate) struct StaticView {
        pub(crate) local: Address,
        pub(crate) authenticated: HashMap<Address, Instant>,
        pub(crate) reported: HashSet<ReportedPeer>,
    }

    impl Default for StaticView {
        fn default() -> Self {
            Self {
                local: Address::new("local", 0),
                authenticated: HashMap::new(),
                reported: HashSet::new(),
            }
        }
    }

    impl PeerView for StaticView {
        fn local_address(&self) -> &Address {
            &self.local
        }

        fn authenticated_addresses(&self) -> Vec<Address> {
            let mut addresses: Vec<_> = self.authenticated.keys().cloned().collect();
            addresses.sort();
            addresses
        }

        fn authenticated_and_reported_peers(&self) -> HashSet<ReportedPeer> {
            let mut all = self.reported.clone();
            all.extend(
                self.authenticated
                    .keys()
                    .map(|a| ReportedPeer::new(a.clone(), 0)),
            );
            all
        }

        fn last_activity(&self, peer: &Address) -> Option<Instant> {
            self.authenticated.get(peer).copied()
        }
    }
}
