use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{Compare, KvStore, Op, Txn, TxnResponse};
use crate::error::{Error, Result};

/// An in-process [`KvStore`].
///
/// All operations are serialized by one mutex, which makes them linearizable.
/// Useful for single-node deployments and for tests, which can also simulate
/// an outage with [`set_available`](Self::set_available) or a slow network
/// with [`set_latency`](Self::set_latency).
#[derive(Debug)]
pub struct MemoryKv {
    data: Mutex<BTreeMap<String, String>>,
    available: AtomicBool,
    latency_micros: AtomicU64,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            latency_micros: AtomicU64::new(0),
        }
    }

    /// When false, every operation fails with [`Error::StoreUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delays every operation by `latency` before it touches the data.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_micros
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    /// Writes a key directly, bypassing availability and latency.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    /// Returns a copy of the whole keyspace.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn round_trip(&self) -> Result<()> {
        let latency = self.latency_micros.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_micros(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn holds(data: &BTreeMap<String, String>, compare: &Compare) -> bool {
    match compare {
        Compare::KeyMissing(key) => !data.contains_key(key),
        Compare::ValueEquals(key, value) => data.get(key) == Some(value),
    }
}

fn apply(data: &mut BTreeMap<String, String>, ops: Vec<Op>) {
    for op in ops {
        match op {
            Op::Put(key, value) => {
                data.insert(key, value);
            }
            Op::Delete(key) => {
                data.remove(&key);
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.round_trip().await?;
        Ok(self.lock().get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.round_trip().await?;
        let data = self.lock();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        self.round_trip().await?;
        let mut data = self.lock();
        let succeeded = txn.compare.iter().all(|compare| holds(&data, compare));
        if succeeded {
            apply(&mut data, txn.then);
        }
        Ok(TxnResponse { succeeded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_prefix_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        kv.insert("dhcp::leases::b", "10.0.0.3");
        kv.insert("dhcp::leases::a", "10.0.0.2");
        kv.insert("dhcp::leasez", "x");
        kv.insert("dhcp::addresses::10.0.0.2", "a");

        let listed = kv.get_prefix("dhcp::leases::").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ("dhcp::leases::a".to_string(), "10.0.0.2".to_string()),
                ("dhcp::leases::b".to_string(), "10.0.0.3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_txn_writes_only_when_comparisons_hold() {
        let kv = MemoryKv::new();
        let create = || {
            Txn::new()
                .when([Compare::KeyMissing("k".to_string())])
                .and_then([
                    Op::Put("k".to_string(), "first".to_string()),
                    Op::Put("other".to_string(), "written".to_string()),
                ])
        };

        assert!(kv.txn(create()).await.unwrap().succeeded);
        kv.insert("other", "kept");
        assert!(!kv.txn(create()).await.unwrap().succeeded);
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("first"));
        assert_eq!(kv.get("other").await.unwrap().as_deref(), Some("kept"));

        let delete = Txn::new()
            .when([Compare::ValueEquals("k".to_string(), "first".to_string())])
            .and_then([Op::Delete("k".to_string())]);
        assert!(kv.txn(delete).await.unwrap().succeeded);
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let kv = MemoryKv::new();
        kv.set_available(false);

        assert!(matches!(
            kv.get("k").await,
            Err(Error::StoreUnavailable(_))
        ));
        assert!(matches!(
            kv.txn(Txn::new()).await,
            Err(Error::StoreUnavailable(_))
        ));

        kv.set_available(true);
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
