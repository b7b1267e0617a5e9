//! Every timer of a peer group lives on one delay queue polled by its event loop.

use std::{collections::HashMap, time::Duration};

use bitsquare_net_messages::DataBroadcast;
use bitsquare_net_primitives::{Address, ConnectionId};
use futures::StreamExt;
use tokio_util::time::{DelayQueue, delay_queue::Key};

use crate::HandshakeId;

#[derive(Debug, Clone)]
pub(crate) enum Timer {
    /// Try the next bootstrap candidate.
    BootstrapRetry,
    HandshakeTimeout {
        peer: Address,
        id: HandshakeId,
    },
    ExchangeRound,
    ExchangeRequest {
        peer: Address,
    },
    MaintenanceRound,
    Ping {
        peer: Address,
    },
    BroadcastSend {
        peer: Address,
        connection: ConnectionId,
        message: DataBroadcast,
    },
    EvictionCheck,
}

/// Timers of which at most one instance is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RepeatingTask {
    Bootstrap,
    Exchange,
    Maintenance,
}

impl Timer {
    fn repeating(&self) -> Option<RepeatingTask> {
        match self {
            Self::BootstrapRetry => Some(RepeatingTask::Bootstrap),
            Self::ExchangeRound => Some(RepeatingTask::Exchange),
            Self::MaintenanceRound => Some(RepeatingTask::Maintenance),
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct Scheduler {
    queue: DelayQueue<Timer>,
    repeating: HashMap<RepeatingTask, Key>,
}

impl Scheduler {
    /// Fire `timer` after `delay`. A repeating task replaces its pending instance.
    pub(crate) fn schedule(&mut self, delay: Duration, timer: Timer) {
        match timer.repeating() {
            Some(task) => {
                self.cancel(task);
                let key = self.queue.insert(timer, delay);
                self.repeating.insert(task, key);
            }
            None => {
                self.queue.insert(timer, delay);
            }
        }
    }

    pub(crate) fn is_scheduled(&self, task: RepeatingTask) -> bool {
        self.repeating.contains_key(&task)
    }

    pub(crate) fn cancel(&mut self, task: RepeatingTask) {
        if let Some(key) = self.repeating.remove(&task) {
            self.queue.try_remove(&key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.repeating.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Next expired timer. Resolves to `None` right away when nothing is queued.
    pub(crate) async fn next(&mut self) -> Option<Timer> {
        let timer = self.queue.next().await?.into_inner();
        if let Some(task) = timer.repeating() {
            self.repeating.remove(&task);
        }
        Some(timer)
    }
}
