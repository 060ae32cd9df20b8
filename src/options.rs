//! DHCP options as defined in RFC 2132.
//!
//! Options are kept as raw `code → bytes` pairs. The handler only interprets
//! the handful it acts on (message type, requested address, server
//! identifier, parameter request list); everything it sends back is passed
//! through from the configured option set.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions
//! - RFC 3396: Encoding Long Options in DHCPv4

use std::net::Ipv4Addr;

/// Maximum payload of a single encoded option (1-byte length field).
const MAX_OPTION_LEN: usize = 255;

/// DHCP option codes used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation).
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Domain name (RFC 2132 §3.17).
    DomainName = 15,
    /// Broadcast address (RFC 2132 §5.3).
    BroadcastAddress = 28,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// Option overload (RFC 2132 §9.3).
    OptionOverload = 52,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Parameter request list (RFC 2132 §9.8).
    ParameterRequestList = 55,
    /// End of options marker.
    End = 255,
}

impl From<OptionCode> for u8 {
    fn from(code: OptionCode) -> Self {
        code as u8
    }
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// Option overload flags (Option 52) as defined in RFC 2132 §9.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadFlag {
    /// The `file` field contains options.
    File = 1,
    /// The `sname` field contains options.
    Sname = 2,
    /// Both `file` and `sname` fields contain options.
    Both = 3,
}

impl TryFrom<u8> for OverloadFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::File),
            2 => Ok(Self::Sname),
            3 => Ok(Self::Both),
            other => Err(other),
        }
    }
}

/// A set of DHCP options, one entry per code, kept in insertion order.
///
/// Replies are encoded in this order, so options echoed for a parameter
/// request list reach the wire in the order the client listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(Vec<(u8, Vec<u8>)>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, code: u8) -> Option<usize> {
        self.0.iter().position(|(existing, _)| *existing == code)
    }

    /// Sets an option, replacing any previous value in place.
    pub fn insert(&mut self, code: impl Into<u8>, data: impl Into<Vec<u8>>) {
        let code = code.into();
        let data = data.into();
        match self.position(code) {
            Some(index) => self.0[index].1 = data,
            None => self.0.push((code, data)),
        }
    }

    /// Appends to an option. Repeated instances of one option in a packet
    /// are concatenated (RFC 3396).
    pub fn append(&mut self, code: u8, data: &[u8]) {
        match self.position(code) {
            Some(index) => self.0[index].1.extend_from_slice(data),
            None => self.0.push((code, data.to_vec())),
        }
    }

    pub fn insert_ipv4(&mut self, code: OptionCode, ip: Ipv4Addr) {
        self.insert(code, ip.octets());
    }

    pub fn insert_ipv4_list(&mut self, code: OptionCode, ips: &[Ipv4Addr]) {
        self.insert(code, ips.iter().flat_map(|ip| ip.octets()).collect::<Vec<_>>());
    }

    pub fn insert_u32(&mut self, code: OptionCode, value: u32) {
        self.insert(code, value.to_be_bytes());
    }

    pub fn get(&self, code: impl Into<u8>) -> Option<&[u8]> {
        let index = self.position(code.into())?;
        Some(self.0[index].1.as_slice())
    }

    pub fn remove(&mut self, code: impl Into<u8>) -> Option<Vec<u8>> {
        let index = self.position(code.into())?;
        Some(self.0.remove(index).1)
    }

    /// Reads an option holding exactly one IPv4 address.
    pub fn ipv4(&self, code: OptionCode) -> Option<Ipv4Addr> {
        let data: [u8; 4] = self.get(code)?.try_into().ok()?;
        Some(Ipv4Addr::from(data))
    }

    /// Reads an option holding a big-endian u32.
    pub fn u32(&self, code: OptionCode) -> Option<u32> {
        let data: [u8; 4] = self.get(code)?.try_into().ok()?;
        Some(u32::from_be_bytes(data))
    }

    /// The DHCP message type (Option 53), if present and known.
    pub fn message_type(&self) -> Option<MessageType> {
        match self.get(OptionCode::MessageType)? {
            [value] => MessageType::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates options in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.0.iter().map(|(code, data)| (*code, data.as_slice()))
    }

    /// Picks the options a client asked for.
    ///
    /// Without a parameter request list every option is returned in
    /// insertion order. With one, the options appear in the order the client
    /// listed them; codes this set does not hold, and repeated codes, are
    /// skipped.
    pub fn select_order_or_all(&self, order: Option<&[u8]>) -> Vec<(u8, &[u8])> {
        let Some(order) = order else {
            return self.iter().collect();
        };

        let mut selected: Vec<(u8, &[u8])> = Vec::with_capacity(order.len());
        for &code in order {
            if selected.iter().any(|(seen, _)| *seen == code) {
                continue;
            }
            if let Some(data) = self.get(code) {
                selected.push((code, data));
            }
        }
        selected
    }
}

/// Encodes one option in TLV form, splitting values longer than 255 bytes
/// into consecutive instances (RFC 3396).
pub fn encode_option(buffer: &mut Vec<u8>, code: u8, data: &[u8]) {
    if data.is_empty() {
        buffer.push(code);
        buffer.push(0);
        return;
    }
    for chunk in data.chunks(MAX_OPTION_LEN) {
        buffer.push(code);
        buffer.push(chunk.len() as u8);
        buffer.extend_from_slice(chunk);
    }
}
