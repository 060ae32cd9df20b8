//! Access to the transactional key-value service that holds the leases.
//!
//! The lease logic only needs linearizable reads and a conditional
//! transaction. Those are captured by the [`KvStore`] trait so the
//! server can run against etcd in production and against [`MemoryKv`] in
//! tests or single-node setups.

use async_trait::async_trait;

use crate::error::Result;

mod memory;
pub use memory::MemoryKv;

#[cfg(feature = "etcd")]
mod etcd;
#[cfg(feature = "etcd")]
pub use etcd::EtcdKv;

/// A condition checked atomically at the start of a [`Txn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// Holds when the key does not exist.
    KeyMissing(String),
    /// Holds when the key exists and has exactly this value.
    ValueEquals(String, String),
}

/// A write applied by a [`Txn`] branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put(String, String),
    Delete(String),
}

/// A conditional transaction: if every comparison holds, `then` is applied,
/// otherwise nothing is written. The evaluation and the writes are atomic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compare: Vec<Compare>,
    pub then: Vec<Op>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: impl IntoIterator<Item = Compare>) -> Self {
        self.compare.extend(compare);
        self
    }

    pub fn and_then(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.then.extend(ops);
        self
    }
}

/// Outcome of [`KvStore::txn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnResponse {
    /// True if all comparisons held and the `then` branch was applied.
    pub succeeded: bool,
}

/// A linearizable key-value service with conditional transactions.
///
/// Every failure to talk to the service is reported as
/// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable). Implementations
/// must not retry writes on their own.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug + 'static {
    /// Reads a single key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Reads every key starting with `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Runs a conditional transaction.
    async fn txn(&self, txn: Txn) -> Result<TxnResponse>;
}
