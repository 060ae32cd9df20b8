//! The pool of free IPv4 addresses inside the served network.
//!
//! Addresses are kept in a doubly-linked list ordered by numeric value,
//! backed by a slot vector, plus a hash index from address to slot. This
//! gives O(1) [`contains`](AddressPool::contains) and
//! [`remove`](AddressPool::remove), which run on every DISCOVER, REQUEST and
//! RELEASE, while [`add`](AddressPool::add) walks the list to keep it sorted.
//! Releases are rare compared to lookups, and a sorted pool means the server
//! always offers the lowest free address.
//!
//! # Thread Safety
//!
//! The list and index live behind a single [`Mutex`] that is only held for
//! the in-memory mutation, never across an `.await`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// Shortest prefix length accepted by [`AddressPool::from_cidr`].
///
/// A /8 already enumerates ~16.7 million addresses; anything wider would
/// exhaust memory before the server could start.
const MIN_PREFIX_LEN: u8 = 8;

#[derive(Debug, Clone, Copy)]
struct Node {
    addr: Ipv4Addr,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Slots {
    nodes: Vec<Node>,
    vacant: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<Ipv4Addr, usize>,
}

impl Slots {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            ..Default::default()
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.vacant.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn push_back(&mut self, addr: Ipv4Addr) {
        let slot = self.alloc(Node {
            addr,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(addr, slot);
    }

    fn insert_before(&mut self, before: usize, addr: Ipv4Addr) {
        let prev = self.nodes[before].prev;
        let slot = self.alloc(Node {
            addr,
            prev,
            next: Some(before),
        });
        self.nodes[before].prev = Some(slot);
        match prev {
            Some(prev) => self.nodes[prev].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.index.insert(addr, slot);
    }

    fn unlink(&mut self, addr: Ipv4Addr) {
        let Some(slot) = self.index.remove(&addr) else {
            return;
        };
        let Node { prev, next, .. } = self.nodes[slot];
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
        self.vacant.push(slot);
    }

    fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.head, |&slot| self.nodes[slot].next)
    }
}

/// Free addresses of one network, ascending.
#[derive(Debug)]
pub struct AddressPool {
    network: Ipv4Net,
    slots: Mutex<Slots>,
}

impl AddressPool {
    /// Builds a pool holding every host address of `cidr`.
    ///
    /// All addresses of the block are enumerated in ascending order, then
    /// the first (network) and last (broadcast) address are removed. The
    /// host bits of `cidr` are ignored, so `10.0.0.7/24` serves `10.0.0.0/24`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCidr`] if `cidr` does not parse or its prefix
    /// is shorter than /8.
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let network: Ipv4Net = cidr.trim().parse().map_err(|error| Error::InvalidCidr {
            cidr: cidr.to_string(),
            reason: format!("{}", error),
        })?;

        if network.prefix_len() < MIN_PREFIX_LEN {
            return Err(Error::InvalidCidr {
                cidr: cidr.to_string(),
                reason: format!("prefix must be at least /{}", MIN_PREFIX_LEN),
            });
        }

        let first = u32::from(network.network());
        let last = u32::from(network.broadcast());
        let mut slots = Slots::with_capacity((last - first) as usize + 1);
        for ip_num in first..=last {
            slots.push_back(Ipv4Addr::from(ip_num));
        }

        slots.unlink(network.network());
        slots.unlink(network.broadcast());

        Ok(Self {
            network: network.trunc(),
            slots: Mutex::new(slots),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The network this pool serves.
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Returns true if `ip` is currently free.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.lock().index.contains_key(&ip)
    }

    /// Removes `ip` from the pool. Removing an absent address is a no-op,
    /// since concurrent handlers may race to remove the same address.
    pub fn remove(&self, ip: Ipv4Addr) {
        self.lock().unlink(ip);
    }

    /// Returns `ip` to the pool, keeping the pool sorted.
    ///
    /// `Ipv4Addr` is `Copy`, so the pool always owns its own value and a
    /// caller reusing its variable cannot alias a stored address. Adding an
    /// address that is already free is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if `ip` is not a host address of the
    /// served network (this includes the network and broadcast addresses).
    pub fn add(&self, ip: Ipv4Addr) -> Result<()> {
        if !self.network.contains(&ip)
            || ip == self.network.network()
            || ip == self.network.broadcast()
        {
            return Err(Error::OutOfRange(ip));
        }

        let mut slots = self.lock();
        if slots.index.contains_key(&ip) {
            return Ok(());
        }

        let successor = slots.slots().find(|&slot| slots.nodes[slot].addr > ip);
        match successor {
            Some(slot) => slots.insert_before(slot, ip),
            None => slots.push_back(ip),
        }

        Ok(())
    }

    /// Returns the lowest free address without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolEmpty`] if no address is free.
    pub fn first(&self) -> Result<Ipv4Addr> {
        let slots = self.lock();
        slots
            .head
            .map(|slot| slots.nodes[slot].addr)
            .ok_or(Error::PoolEmpty)
    }

    /// Number of free addresses.
    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the free addresses in pool order.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        let slots = self.lock();
        slots.slots().map(|slot| slots.nodes[slot].addr).collect()
    }
}
