//! Cancellable transaction-event subscription

use crate::ledger::tx::TxResult;
use futures::stream::{BoxStream, StreamExt};

type Closer = Box<dyn FnOnce() + Send>;

/// A live stream of committed transactions on one shard
///
/// The close hook runs exactly once: on the first call to
/// [`TxSubscription::unsubscribe`] or on drop, whichever comes first.
pub struct TxSubscription {
    events: BoxStream<'static, TxResult>,
    closer: Option<Closer>,
}

impl TxSubscription {
    /// Wrap an event stream and the hook that tears it down
    pub fn new<F>(events: BoxStream<'static, TxResult>, closer: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        TxSubscription {
            events,
            closer: Some(Box::new(closer)),
        }
    }

    /// Next committed transaction, or None once closed or exhausted
    pub async fn next_event(&mut self) -> Option<TxResult> {
        if self.closer.is_none() {
            return None;
        }
        self.events.next().await
    }

    /// Close the subscription; returns false if it was already closed
    pub fn unsubscribe(&mut self) -> bool {
        match self.closer.take() {
            Some(close) => {
                close();
                true
            }
            None => false,
        }
    }

    /// Whether the subscription is still open
    pub fn is_active(&self) -> bool {
        self.closer.is_some()
    }
}

impl Drop for TxSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
