use krpc_encoding::{KRPCError, Response, TransactionId};
use std::{
    collections::HashMap,
    net::SocketAddrV4,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::oneshot;

/// What an in-flight transaction resolves to when a matching datagram
/// arrives. Timeouts are not a result; they happen to the waiter.
#[derive(Debug)]
pub enum TransactionResult {
    Response(Response),
    Error(KRPCError),
}

/// Collection of in-flight transactions awaiting a response.
///
/// Each live transaction owns a one-shot completion slot. Completion and
/// abandonment both take the entry out of the map, so exactly one side
/// ever touches the slot.
#[derive(Clone, Default)]
pub struct ActiveTransactions {
    inner: Arc<Mutex<HashMap<TransactionId, PendingTransaction>>>,
}

struct PendingTransaction {
    #[allow(dead_code)]
    endpoint: SocketAddrV4,
    slot: oneshot::Sender<TransactionResult>,
}

impl ActiveTransactions {
    pub fn new() -> ActiveTransactions {
        ActiveTransactions::default()
    }

    /// Picks a transaction id not currently in flight, registers a slot
    /// for it, and returns the receiving half.
    pub fn claim(
        &self,
        endpoint: SocketAddrV4,
    ) -> (TransactionId, oneshot::Receiver<TransactionResult>) {
        let mut transactions = self.lock();

        let transaction_id = loop {
            let candidate = rand::random::<TransactionId>();
            if !transactions.contains_key(&candidate) {
                break candidate;
            }
        };

        let (slot, receiver) = oneshot::channel();
        transactions.insert(transaction_id, PendingTransaction { endpoint, slot });
        (transaction_id, receiver)
    }

    /// Routes an inbound reply to its waiter. Returns false for orphans,
    /// replies whose transaction already completed or never existed.
    pub fn complete(&self, transaction_id: TransactionId, result: TransactionResult) -> bool {
        match self.lock().remove(&transaction_id) {
            Some(pending) => pending.slot.send(result).is_ok(),
            None => false,
        }
    }

    /// Forgets a transaction without completing it, after an encoding
    /// failure or a timed-out wait.
    pub fn abandon(&self, transaction_id: TransactionId) {
        self.lock().remove(&transaction_id);
    }

    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.lock().contains_key(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransactionId, PendingTransaction>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
