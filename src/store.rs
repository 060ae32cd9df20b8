//! Lease records in the shared key-value store.
//!
//! Each lease is stored twice:
//!
//! - `<lease prefix><client id>` → dotted-decimal address, the authoritative
//!   record scanned at startup;
//! - `<address prefix><address>` → client id, the address claim.
//!
//! Both keys are created by one conditional transaction that only fires if
//! neither exists. Concurrent allocations, whether from tasks of this process
//! or from other replicas, therefore cannot hand one client two addresses or
//! one address to two clients. The store, not any in-memory state, decides
//! who wins.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::kv::{Compare, KvStore, Op, Txn};

/// Default namespace for lease records. Must stay stable across restarts.
pub const DEFAULT_LEASE_PREFIX: &str = "dhcp::leases::";

/// Default namespace for address claims.
pub const DEFAULT_ADDRESS_PREFIX: &str = "dhcp::addresses::";

/// A lease as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub client_id: String,
    pub ip_address: Ipv4Addr,
}

/// Lease operations on top of a [`KvStore`].
///
/// Failures to reach the store are returned as-is and never retried here:
/// a blind retry of a write whose acknowledgement was lost could apply it
/// twice. [`allocate`](Self::allocate) is safe to retry at a higher level.
#[derive(Debug, Clone)]
pub struct LeaseStore {
    kv: Arc<dyn KvStore>,
    lease_prefix: String,
    address_prefix: String,
}

impl LeaseStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            lease_prefix: DEFAULT_LEASE_PREFIX.to_string(),
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
        }
    }

    /// Uses custom namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a prefix is empty or one prefix
    /// contains the other, which would mix claims into the lease scan.
    pub fn with_prefixes(
        kv: Arc<dyn KvStore>,
        lease_prefix: impl Into<String>,
        address_prefix: impl Into<String>,
    ) -> Result<Self> {
        let lease_prefix = lease_prefix.into();
        let address_prefix = address_prefix.into();

        if lease_prefix.is_empty() || address_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "key prefixes must not be empty".to_string(),
            ));
        }
        if lease_prefix.starts_with(&address_prefix) || address_prefix.starts_with(&lease_prefix)
        {
            return Err(Error::InvalidConfig(format!(
                "key prefixes '{}' and '{}' overlap",
                lease_prefix, address_prefix
            )));
        }

        Ok(Self {
            kv,
            lease_prefix,
            address_prefix,
        })
    }

    pub fn lease_prefix(&self) -> &str {
        &self.lease_prefix
    }

    fn lease_key(&self, client_id: &str) -> String {
        format!("{}{}", self.lease_prefix, client_id)
    }

    fn address_key(&self, ip: &str) -> String {
        format!("{}{}", self.address_prefix, ip)
    }

    /// Lists every lease under the lease prefix.
    ///
    /// Records whose value is not an IPv4 address are skipped with a warning.
    pub async fn list_leases(&self) -> Result<Vec<Lease>> {
        let entries = self.kv.get_prefix(&self.lease_prefix).await?;

        let mut leases = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(client_id) = key.strip_prefix(&self.lease_prefix) else {
                continue;
            };
            match value.parse::<Ipv4Addr>() {
                Ok(ip_address) => leases.push(Lease {
                    client_id: client_id.to_string(),
                    ip_address,
                }),
                Err(_) => warn!("Skipping lease {} with unparsable address '{}'", key, value),
            }
        }

        Ok(leases)
    }

    /// Returns the address currently leased to `client_id`, if any.
    pub async fn lease(&self, client_id: &str) -> Result<Option<Ipv4Addr>> {
        let Some(value) = self.kv.get(&self.lease_key(client_id)).await? else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|_| Error::CorruptLease {
                key: self.lease_key(client_id),
                value,
            })
    }

    /// Records `client_id` → `ip` if neither the client nor the address
    /// holds a lease yet.
    ///
    /// The conditional write is followed by a read of the client's record:
    ///
    /// - it holds `ip`: success, whether this call or an earlier identical
    ///   one wrote it;
    /// - it holds another address: [`Error::Mismatch`];
    /// - it is absent: the address was claimed by another client,
    ///   [`Error::AlreadyAllocated`].
    pub async fn allocate(&self, client_id: &str, ip: Ipv4Addr) -> Result<()> {
        let lease_key = self.lease_key(client_id);
        let wanted = ip.to_string();
        let address_key = self.address_key(&wanted);

        let txn = Txn::new()
            .when([
                Compare::KeyMissing(lease_key.clone()),
                Compare::KeyMissing(address_key.clone()),
            ])
            .and_then([
                Op::Put(lease_key.clone(), wanted.clone()),
                Op::Put(address_key, client_id.to_string()),
            ]);
        let response = self.kv.txn(txn).await?;

        match self.kv.get(&lease_key).await? {
            Some(stored) if stored == wanted => {
                if !response.succeeded {
                    debug!("Lease {} -> {} already recorded", client_id, ip);
                }
                Ok(())
            }
            Some(stored) => Err(Error::Mismatch {
                client: client_id.to_string(),
                stored,
                wanted: ip,
            }),
            None => Err(Error::AlreadyAllocated {
                client: client_id.to_string(),
                ip,
            }),
        }
    }

    /// Deletes the lease of `client_id` and returns the freed address.
    ///
    /// The read and the delete are separate round trips; the delete only
    /// fires if the record still holds the value that was read.
    pub async fn release(&self, client_id: &str) -> Result<Ipv4Addr> {
        let lease_key = self.lease_key(client_id);
        let stored = self
            .kv
            .get(&lease_key)
            .await?
            .ok_or_else(|| Error::NotFound(client_id.to_string()))?;

        let txn = Txn::new()
            .when([Compare::ValueEquals(lease_key.clone(), stored.clone())])
            .and_then([
                Op::Delete(lease_key.clone()),
                Op::Delete(self.address_key(&stored)),
            ]);
        if !self.kv.txn(txn).await?.succeeded {
            return Err(Error::NotFound(client_id.to_string()));
        }

        stored.parse().map_err(|_| Error::CorruptLease {
            key: lease_key,
            value: stored,
        })
    }
}
