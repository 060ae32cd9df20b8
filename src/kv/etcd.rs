use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, CompareOp, ConnectOptions, GetOptions, KvClient, TxnOp};

use super::{Compare, KvStore, Op, Txn, TxnResponse};
use crate::error::{Error, Result};

/// A [`KvStore`] backed by an etcd v3 cluster.
#[derive(Clone)]
pub struct EtcdKv {
    kv: KvClient,
}

impl std::fmt::Debug for EtcdKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdKv").finish_non_exhaustive()
    }
}

fn unavailable(error: etcd_client::Error) -> Error {
    Error::StoreUnavailable(format!("etcd: {}", error))
}

fn compare(compare: Compare) -> etcd_client::Compare {
    match compare {
        // A key that was never created (or was deleted) has create revision 0.
        Compare::KeyMissing(key) => etcd_client::Compare::create_revision(key, CompareOp::Equal, 0),
        Compare::ValueEquals(key, value) => {
            etcd_client::Compare::value(key, CompareOp::Equal, value)
        }
    }
}

fn txn_op(op: Op) -> TxnOp {
    match op {
        Op::Put(key, value) => TxnOp::put(key, value, None),
        Op::Delete(key) => TxnOp::delete(key, None),
    }
}

impl EtcdKv {
    /// Connects to the given endpoints.
    pub async fn connect(endpoints: &[String], dial_timeout: Duration) -> Result<Self> {
        let options = ConnectOptions::new().with_connect_timeout(dial_timeout);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(unavailable)?;
        Ok(Self {
            kv: client.kv_client(),
        })
    }
}

#[async_trait]
impl KvStore for EtcdKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut kv = self.kv.clone();
        let response = kv.get(key, None).await.map_err(unavailable)?;
        match response.kvs().first() {
            Some(entry) => Ok(Some(entry.value_str().map_err(unavailable)?.to_string())),
            None => Ok(None),
        }
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut kv = self.kv.clone();
        let response = kv
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(unavailable)?;

        response
            .kvs()
            .iter()
            .map(|entry| {
                Ok((
                    entry.key_str().map_err(unavailable)?.to_string(),
                    entry.value_str().map_err(unavailable)?.to_string(),
                ))
            })
            .collect()
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let request = etcd_client::Txn::new()
            .when(txn.compare.into_iter().map(compare).collect::<Vec<_>>())
            .and_then(txn.then.into_iter().map(txn_op).collect::<Vec<_>>());

        let mut kv = self.kv.clone();
        let response = kv.txn(request).await.map_err(unavailable)?;
        Ok(TxnResponse {
            succeeded: response.succeeded(),
        })
    }
}
