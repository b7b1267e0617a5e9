use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use bitsquare_net_primitives::{Address, ConnectionId, ConnectionPriority};
use bitsquare_net_transport::{Connection, DisconnectReason};
use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::network::Hub;

/// One end of an in-memory connection.
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    local: Address,
    remote: Address,
    peer_address: Mutex<Option<Address>>,
    authenticated: AtomicBool,
    priority: Mutex<ConnectionPriority>,
    last_activity: Mutex<Instant>,
    open: AtomicBool,
    hub: Weak<Mutex<Hub>>,
}

impl MemoryConnection {
    pub(crate) fn new(
        id: ConnectionId,
        local: Address,
        remote: Address,
        peer_address: Option<Address>,
        hub: Weak<Mutex<Hub>>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                local,
                remote,
                peer_address: Mutex::new(peer_address),
                authenticated: AtomicBool::new(false),
                priority: Mutex::new(ConnectionPriority::default()),
                last_activity: Mutex::new(now()),
                open: AtomicBool::new(true),
                hub,
            }),
        }
    }

    /// Address of the node owning this end.
    pub fn local(&self) -> &Address {
        &self.inner.local
    }

    /// Transport-level address of the other end, known regardless of handshakes.
    pub fn remote(&self) -> &Address {
        &self.inner.remote
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) -> bool {
        self.inner.open.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn touch(&self) {
        *self.inner.last_activity.lock() = now();
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.inner.id)
            .field("local", &self.inner.local)
            .field("remote", &self.inner.remote)
            .field("peer_address", &*self.inner.peer_address.lock())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn peer_address(&self) -> Option<Address> {
        self.inner.peer_address.lock().clone()
    }

    fn set_peer_address(&self, address: Address) {
        *self.inner.peer_address.lock() = Some(address);
    }

    fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::Acquire)
    }

    fn set_authenticated(&self) {
        self.inner.authenticated.store(true, Ordering::Release);
    }

    fn priority(&self) -> ConnectionPriority {
        *self.inner.priority.lock()
    }

    fn set_priority(&self, priority: ConnectionPriority) {
        *self.inner.priority.lock() = priority;
    }

    fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    fn shut_down(&self) -> BoxFuture<'static, ()> {
        if let Some(hub) = self.inner.hub.upgrade() {
            hub.lock().close(self, DisconnectReason::Shutdown);
        }
        futures::future::ready(()).boxed()
    }
}

/// Follows tokio's clock so paused-time tests see consistent activity stamps.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
