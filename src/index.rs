//! Local reverse lookup from leased address to client.
//!
//! This is a cache over the lease store for reporting only; allocation
//! decisions never consult it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Leased address (dotted-decimal) → client identifier.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    entries: Mutex<HashMap<String, String>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, ip: Ipv4Addr, client_id: &str) {
        self.lock().insert(ip.to_string(), client_id.to_string());
    }

    pub fn delete(&self, ip: Ipv4Addr) {
        self.lock().remove(&ip.to_string());
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<String> {
        self.lock().get(&ip.to_string()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
