//! UDP front end: receives DHCP packets on port 67 and sends the handler's
//! replies back to the client or relay.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{error, info, warn};

use crate::config::{Config, StoreConfig};
use crate::error::{Error, Result};
use crate::handler::ProtocolHandler;
use crate::kv::{KvStore, MemoryKv};
use crate::packet::DhcpPacket;
use crate::store::LeaseStore;

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// Opens the configured key-value store and wraps it in a [`LeaseStore`].
pub async fn open_store(config: &Config) -> Result<LeaseStore> {
    let kv: Arc<dyn KvStore> = match &config.store {
        StoreConfig::Memory => {
            warn!("Using the in-memory lease store: leases are not shared and are lost on exit");
            Arc::new(MemoryKv::new())
        }
        #[cfg(feature = "etcd")]
        StoreConfig::Etcd {
            endpoints,
            dial_timeout_millis,
        } => {
            info!("Connecting to etcd at {}", endpoints.join(", "));
            Arc::new(
                crate::kv::EtcdKv::connect(
                    endpoints,
                    std::time::Duration::from_millis(*dial_timeout_millis),
                )
                .await?,
            )
        }
        #[cfg(not(feature = "etcd"))]
        StoreConfig::Etcd { .. } => {
            return Err(Error::InvalidConfig(
                "etcd store configured but this build lacks the `etcd` feature".to_string(),
            ));
        }
    };

    LeaseStore::with_prefixes(kv, &config.key_prefix, &config.address_prefix)
}

pub struct DhcpServer {
    handler: Arc<ProtocolHandler>,
    socket: Arc<UdpSocket>,
}

impl DhcpServer {
    pub async fn new(config: Config) -> Result<Self> {
        let store = open_store(&config).await?;
        let handler = ProtocolHandler::new(store, config.handler_config()?).await?;

        let socket = Self::create_socket()?;

        info!(
            "DHCP server starting on {}:{}",
            config.server_ip, DHCP_SERVER_PORT
        );
        info!(
            "Serving {} ({} addresses free, lease {} seconds)",
            handler.pool().network(),
            handler.pool().len(),
            config.lease_duration_seconds
        );

        Ok(Self::with_socket(handler, socket))
    }

    /// Serves `handler` on an already bound socket.
    pub fn with_socket(handler: ProtocolHandler, socket: UdpSocket) -> Self {
        Self {
            handler: Arc::new(handler),
            socket: Arc::new(socket),
        }
    }

    fn create_socket() -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    pub async fn run(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("DHCP server ready and listening");

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = buffer[..size].to_vec();
                    let handler = PacketHandler {
                        handler: Arc::clone(&self.handler),
                        socket: Arc::clone(&self.socket),
                    };

                    tokio::spawn(async move {
                        if let Err(error) = handler.handle_packet(&data, source).await {
                            log_failure(&error, source);
                        }
                    });
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }

    pub fn handler(&self) -> &ProtocolHandler {
        &self.handler
    }
}

/// Store outages and pool inconsistencies need an operator; everything else
/// is a client-side race or a malformed packet.
fn needs_operator(error: &Error) -> bool {
    error.is_store_outage() || matches!(error, Error::OutOfRange(_))
}

fn log_failure(error: &Error, source: SocketAddr) {
    if needs_operator(error) {
        error!("Error handling packet from {}: {}", source, error);
    } else {
        warn!("Error handling packet from {}: {}", source, error);
    }
}

struct PacketHandler {
    handler: Arc<ProtocolHandler>,
    socket: Arc<UdpSocket>,
}

impl PacketHandler {
    async fn handle_packet(&self, data: &[u8], source: SocketAddr) -> Result<()> {
        let packet = DhcpPacket::parse(data)?;

        if let Some(message_type) = packet.message_type() {
            info!("{} from {} ({})", message_type, packet.format_mac(), source);
        }

        if let Some(reply) = self.handler.serve(&packet).await? {
            self.send_reply(&reply, &packet).await?;
        }

        Ok(())
    }

    async fn send_reply(&self, reply: &DhcpPacket, request: &DhcpPacket) -> Result<()> {
        let encoded = reply.encode();
        self.socket
            .send_to(&encoded, reply_destination(request))
            .await?;
        Ok(())
    }
}

/// Where a reply goes (RFC 2131 §4.1): to the relay if the request was
/// relayed, to the client's address if it has one and did not ask for
/// broadcast, otherwise to the limited broadcast address.
fn reply_destination(request: &DhcpPacket) -> SocketAddr {
    if request.giaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(std::net::IpAddr::V4(request.giaddr), DHCP_SERVER_PORT)
    } else if request.is_broadcast() || request.ciaddr == Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
    } else {
        SocketAddr::new(std::net::IpAddr::V4(request.ciaddr), DHCP_CLIENT_PORT)
    }
}
