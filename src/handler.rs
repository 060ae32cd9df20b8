//! DHCP message handling on top of the address pool and the lease store.
//!
//! [`ProtocolHandler::serve`] turns one inbound packet into at most one
//! reply. Every failure resolves to "no reply": the error is returned so the
//! caller can log it, and the client retries on its own schedule. No NAK is
//! ever sent.
//!
//! # Message Flow
//!
//! ```text
//! DISCOVER ──► pool.first() ─────────────────────────────► OFFER
//! REQUEST  ──► pool.contains ─► store.allocate ─► pool.remove ─► ACK
//! RELEASE  ──► store.release ─► pool.add ─► index.delete        (no reply)
//! DECLINE  ──► same as RELEASE                                  (no reply)
//! ```
//!
//! DISCOVER never writes to the store, so two clients may be offered the
//! same address. Only the REQUEST that wins the store transaction gets it.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::index::ReverseIndex;
use crate::options::{MessageType, Options};
use crate::packet::{BOOTREQUEST, DhcpPacket};
use crate::pool::AddressPool;
use crate::store::LeaseStore;

/// Immutable settings of a [`ProtocolHandler`].
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Sent as the server identifier. Never leased.
    pub server_ip: Ipv4Addr,
    pub cidr: String,
    pub lease_duration: Duration,
    /// Budget for handling one message, measured from its arrival.
    pub handle_timeout: Duration,
    /// Options offered to clients, filtered by their parameter request list.
    pub options: Options,
}

impl HandlerConfig {
    fn lease_seconds(&self) -> u32 {
        u32::try_from(self.lease_duration.as_secs()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug)]
pub struct ProtocolHandler {
    config: HandlerConfig,
    pool: AddressPool,
    index: ReverseIndex,
    store: LeaseStore,
}

impl ProtocolHandler {
    /// Builds the pool from the configured CIDR and reconciles it with the
    /// store before any message is served: every leased address and the
    /// server's own address are removed, and the reverse index is seeded
    /// from the same listing.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidCidr`] on a bad network, or with the
    /// store's error if the initial listing fails.
    pub async fn new(store: LeaseStore, config: HandlerConfig) -> Result<Self> {
        let pool = AddressPool::from_cidr(&config.cidr)?;
        pool.remove(config.server_ip);

        let index = ReverseIndex::new();
        let leases = store.list_leases().await?;
        for lease in &leases {
            if !pool.network().contains(&lease.ip_address) {
                warn!(
                    "Lease {} -> {} is outside {}",
                    lease.client_id,
                    lease.ip_address,
                    pool.network()
                );
            }
            pool.remove(lease.ip_address);
            index.put(lease.ip_address, &lease.client_id);
        }

        info!(
            "Reconciled {} leases under '{}': {} of {} addresses free",
            leases.len(),
            store.lease_prefix(),
            pool.len(),
            pool.network()
        );

        Ok(Self {
            config,
            pool,
            index,
            store,
        })
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    pub fn index(&self) -> &ReverseIndex {
        &self.index
    }

    pub fn store(&self) -> &LeaseStore {
        &self.store
    }

    /// Handles one client message and returns the reply to send, if any.
    ///
    /// The processing deadline starts when this is called. BOOTP packets
    /// (no message type), INFORM and server-originated types are ignored.
    /// A packet without a hardware address is rejected, since the address is
    /// the client's lease key.
    pub async fn serve(&self, packet: &DhcpPacket) -> Result<Option<DhcpPacket>> {
        let deadline = Instant::now() + self.config.handle_timeout;

        if packet.op != BOOTREQUEST {
            return Err(Error::InvalidPacket("Expected BOOTREQUEST".to_string()));
        }

        let mac = packet.format_mac();
        if mac.is_empty() {
            return Err(Error::InvalidPacket(format!(
                "No client hardware address (htype {}, hlen {})",
                packet.htype, packet.hlen
            )));
        }

        let Some(message_type) = packet.message_type() else {
            debug!("Ignoring BOOTP packet from {}", mac);
            return Ok(None);
        };

        match message_type {
            MessageType::Discover => self.handle_discover(packet, &mac).map(Some),
            MessageType::Request => self.handle_request(packet, &mac, deadline).await,
            MessageType::Release | MessageType::Decline => {
                let ip = self.release_ip(&mac, deadline).await?;
                info!("{} {} from {}", message_type, ip, mac);
                Ok(None)
            }
            _ => {
                debug!("Ignoring {} from {}", message_type, mac);
                Ok(None)
            }
        }
    }

    fn handle_discover(&self, packet: &DhcpPacket, mac: &str) -> Result<DhcpPacket> {
        let offered_ip = self.pool.first()?;

        let offer = DhcpPacket::create_reply(
            packet,
            MessageType::Offer,
            offered_ip,
            self.config.server_ip,
            Some(self.config.lease_seconds()),
            self.config
                .options
                .select_order_or_all(packet.parameter_request_list()),
        );

        info!("OFFER {} to {}", offered_ip, mac);

        Ok(offer)
    }

    async fn handle_request(
        &self,
        packet: &DhcpPacket,
        mac: &str,
        deadline: Instant,
    ) -> Result<Option<DhcpPacket>> {
        if let Some(server_id) = packet.server_identifier()
            && server_id != self.config.server_ip
        {
            debug!("REQUEST from {} is for different server {}", mac, server_id);
            return Ok(None);
        }

        let requested_ip = match packet.requested_ip() {
            Some(ip) => ip,
            None if packet.ciaddr != Ipv4Addr::UNSPECIFIED => packet.ciaddr,
            None => {
                return Err(Error::InvalidPacket(format!(
                    "REQUEST from {} names no address",
                    mac
                )));
            }
        };

        self.allocate_ip(mac, requested_ip, deadline).await?;

        let ack = DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            requested_ip,
            self.config.server_ip,
            Some(self.config.lease_seconds()),
            self.config
                .options
                .select_order_or_all(packet.parameter_request_list()),
        );

        info!(
            "ACK {} to {} (lease: {} seconds)",
            requested_ip,
            mac,
            self.config.lease_seconds()
        );

        Ok(Some(ack))
    }

    /// Leases `ip` to `client_id`.
    ///
    /// The address must be free in the local pool. The store then decides:
    /// on success the address leaves the pool and enters the index. An
    /// address another client already claimed in the store is dropped from
    /// the local pool as well, so it is not offered again.
    pub async fn allocate_ip(
        &self,
        client_id: &str,
        ip: Ipv4Addr,
        deadline: Instant,
    ) -> Result<()> {
        if !self.pool.contains(ip) {
            return Err(Error::NotAvailable(ip));
        }

        match before(deadline, self.store.allocate(client_id, ip)).await {
            Ok(()) => {}
            Err(error @ Error::AlreadyAllocated { .. }) => {
                debug!("{} is leased elsewhere, dropping it from the pool", ip);
                self.pool.remove(ip);
                return Err(error);
            }
            Err(error) => return Err(error),
        }

        self.pool.remove(ip);
        self.index.put(ip, client_id);

        Ok(())
    }

    /// Ends the lease of `client_id` and returns the freed address.
    ///
    /// The lease is deleted from the store first. If the freed address cannot
    /// go back to the pool the store and the pool disagree; this is logged as
    /// an inconsistency and [`Error::OutOfRange`] is returned, with the lease
    /// already gone.
    ///
    /// A store outage leaves the outcome unknown: the delete may have
    /// committed, in which case the pool and index stay stale until restart.
    pub async fn release_ip(&self, client_id: &str, deadline: Instant) -> Result<Ipv4Addr> {
        let ip = match before(deadline, self.store.release(client_id)).await {
            Ok(ip) => ip,
            Err(error) if error.is_store_outage() => {
                warn!(
                    "Release for {} may have committed without updating the pool and index: {}",
                    client_id, error
                );
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        self.index.delete(ip);

        if ip == self.config.server_ip {
            warn!("{} held the server address {}, not returning it to the pool", client_id, ip);
            return Ok(ip);
        }

        if let Err(error) = self.pool.add(ip) {
            error!(
                "Lease inconsistency: released {} for {} but it cannot rejoin the pool: {}",
                ip, client_id, error
            );
            return Err(error);
        }

        Ok(ip)
    }
}

/// Runs a store operation against the message deadline.
async fn before<T>(deadline: Instant, operation: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout_at(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::StoreUnavailable(
            "deadline exceeded waiting for the lease store".to_string(),
        )),
    }
}
