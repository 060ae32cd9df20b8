//! DHCP packet parsing and encoding per RFC 2131.
//!
//! A DHCP packet consists of a fixed 236-byte header followed by a 4-byte
//! magic cookie and variable-length options.
//!
//! # Packet Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{MessageType, OptionCode, Options, OverloadFlag, encode_option};

/// DHCP magic cookie that identifies DHCP packets (vs BOOTP).
const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_CHADDR_OFFSET: usize = 28;
const DHCP_CHADDR_SIZE: usize = 16;
const DHCP_SNAME_OFFSET: usize = DHCP_CHADDR_OFFSET + DHCP_CHADDR_SIZE;
const DHCP_SNAME_SIZE: usize = 64;
const DHCP_FILE_OFFSET: usize = DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE;
const DHCP_FILE_SIZE: usize = 128;
const DHCP_MAGIC_COOKIE_OFFSET: usize = DHCP_FILE_OFFSET + DHCP_FILE_SIZE;

/// Size of the fixed header portion including magic cookie.
const DHCP_FIXED_HEADER_SIZE: usize = DHCP_MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Minimum DHCP packet size, for compatibility with BOOTP relay agents.
const DHCP_MIN_PACKET_SIZE: usize = 300;

/// 576 bytes is the minimum datagram size every host must accept (RFC 791).
const DHCP_ENCODE_CAPACITY: usize = 576;

/// Maximum hop count before dropping the packet (RFC 2131 §4.1).
const MAX_HOPS: u8 = 16;

const BROADCAST_FLAG: u16 = 0x8000;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet.
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet.
pub const HLEN_ETHERNET: u8 = 6;

/// A parsed DHCP packet, either a client request or a server reply.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// [`BOOTREQUEST`] or [`BOOTREPLY`].
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID chosen by the client, echoed in replies.
    pub xid: u32,
    pub secs: u16,
    /// Bit 15 is the broadcast flag.
    pub flags: u16,
    /// Client IP address, set by clients that already hold an address.
    pub ciaddr: Ipv4Addr,
    /// "Your" IP address, the address being assigned.
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    /// Relay agent address.
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Options,
}

impl DhcpPacket {
    /// Parses a DHCP packet from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if:
    /// - Packet is shorter than 240 bytes (fixed header + magic cookie)
    /// - Magic cookie is invalid
    /// - Hop count exceeds 16
    /// - Hardware length does not match Ethernet
    /// - Options are truncated
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_FIXED_HEADER_SIZE
            )));
        }

        if data[DHCP_MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE] != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "Hop count {} exceeds maximum {}",
                hops, MAX_HOPS
            )));
        }

        if htype == HTYPE_ETHERNET && hlen != HLEN_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "Invalid hlen {} for Ethernet (expected {})",
                hlen, HLEN_ETHERNET
            )));
        }

        let ipv4_at = |offset: usize| {
            Ipv4Addr::new(
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            )
        };

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[DHCP_CHADDR_OFFSET..DHCP_SNAME_OFFSET]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[DHCP_SNAME_OFFSET..DHCP_FILE_OFFSET]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[DHCP_FILE_OFFSET..DHCP_MAGIC_COOKIE_OFFSET]);

        let mut options = Options::new();
        Self::parse_options(&data[DHCP_FIXED_HEADER_SIZE..], &mut options)?;

        let overload = match options.get(OptionCode::OptionOverload) {
            Some([flag]) => OverloadFlag::try_from(*flag).ok(),
            _ => None,
        };
        if let Some(flag) = overload {
            if matches!(flag, OverloadFlag::File | OverloadFlag::Both) {
                Self::parse_options(&file, &mut options)?;
            }
            if matches!(flag, OverloadFlag::Sname | OverloadFlag::Both) {
                Self::parse_options(&sname, &mut options)?;
            }
        }

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: ipv4_at(12),
            yiaddr: ipv4_at(16),
            siaddr: ipv4_at(20),
            giaddr: ipv4_at(24),
            chaddr,
            sname,
            file,
            options,
        })
    }

    fn parse_options(data: &[u8], options: &mut Options) -> Result<()> {
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            }

            let length = data[index + 1] as usize;

            if index + 2 + length > data.len() {
                return Err(Error::InvalidPacket("Option data truncated".to_string()));
            }

            options.append(code, &data[index + 2..index + 2 + length]);
            index += 2 + length;
        }

        Ok(())
    }

    /// Encodes the packet for transmission.
    ///
    /// The message type option is written first, the others in code order.
    /// The result is padded to at least 300 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DHCP_ENCODE_CAPACITY);

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());

        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);

        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        let message_type = OptionCode::MessageType as u8;
        if let Some(data) = self.options.get(message_type) {
            encode_option(&mut packet, message_type, data);
        }
        for (code, data) in self.options.iter() {
            if code != message_type {
                encode_option(&mut packet, code, data);
            }
        }

        packet.push(OptionCode::End as u8);

        if packet.len() < DHCP_MIN_PACKET_SIZE {
            packet.resize(DHCP_MIN_PACKET_SIZE, 0);
        }

        packet
    }

    /// The DHCP message type (Option 53). `None` for BOOTP packets.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.message_type()
    }

    /// The requested IP address (Option 50).
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.ipv4(OptionCode::RequestedIpAddress)
    }

    /// The server identifier (Option 54), naming the server whose offer a
    /// REQUEST accepts.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.ipv4(OptionCode::ServerIdentifier)
    }

    /// The parameter request list (Option 55).
    pub fn parameter_request_list(&self) -> Option<&[u8]> {
        self.options.get(OptionCode::ParameterRequestList)
    }

    /// The lease time (Option 51) in seconds.
    pub fn lease_time(&self) -> Option<u32> {
        self.options.u32(OptionCode::LeaseTime)
    }

    /// Formats the client hardware address as lowercase, colon-separated
    /// hex, e.g. `00:28:f8:d0:90:35`. This string identifies the client in
    /// the lease store.
    pub fn format_mac(&self) -> String {
        use std::fmt::Write;
        let len = (self.hlen as usize).min(self.chaddr.len());
        let mut result = String::with_capacity(len * 3);
        for (index, byte) in self.chaddr[..len].iter().enumerate() {
            if index > 0 {
                result.push(':');
            }
            let _ = write!(result, "{:02x}", byte);
        }
        result
    }

    /// Returns true if the broadcast flag is set.
    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }

    /// Creates a reply to `request`.
    ///
    /// Copies `xid`, `flags`, `giaddr`, `chaddr`, `htype` and `hlen` from the
    /// request, sets `yiaddr` to `your_ip`, and adds the message type,
    /// server identifier and (if given) lease time options ahead of
    /// `options`, which are encoded in the order given.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        lease_seconds: Option<u32>,
        options: Vec<(u8, &[u8])>,
    ) -> Self {
        let mut reply_options = Options::new();
        reply_options.insert(OptionCode::MessageType, [message_type as u8]);
        reply_options.insert_ipv4(OptionCode::ServerIdentifier, server_ip);
        if let Some(lease_seconds) = lease_seconds {
            reply_options.insert_u32(OptionCode::LeaseTime, lease_seconds);
        }
        for (code, data) in options {
            reply_options.insert(code, data);
        }

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: reply_options,
        }
    }

    /// Creates a client request, mostly for tests and tooling.
    pub fn request(message_type: MessageType, mac: [u8; 6], xid: u32) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);
        let mut options = Options::new();
        options.insert(OptionCode::MessageType, [message_type as u8]);

        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid,
            secs: 0,
            flags: BROADCAST_FLAG,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options,
        }
    }
}
