//! DHCP message decoding and encoding per RFC 2131.
//!
//! A message is a fixed 236-byte BOOTP header, the 4-byte magic cookie and
//! a list of options. The server never uses the `sname`/`file` areas: they
//! are skipped on decode and zero-filled on encode.
//!
//! ```text
//! offset  size  field
//!      0     1  op      (1 = BOOTREQUEST, 2 = BOOTREPLY)
//!      1     1  htype
//!      2     1  hlen
//!      3     1  hops
//!      4     4  xid
//!      8     2  secs
//!     10     2  flags   (bit 15 = broadcast)
//!     12     4  ciaddr
//!     16     4  yiaddr
//!     20     4  siaddr
//!     24     4  giaddr
//!     28    16  chaddr
//!     44    64  sname
//!    108   128  file
//!    236     4  magic cookie 99.130.83.99
//!    240     -  options
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OptionCode};

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const CHADDR_OFFSET: usize = 28;
const CHADDR_SIZE: usize = 16;
const MAGIC_COOKIE_OFFSET: usize = 236;
const OPTIONS_OFFSET: usize = MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Replies are padded to 300 bytes for BOOTP relay compatibility.
const DHCP_MIN_PACKET_SIZE: usize = 300;

/// Relay loops are cut off past this hop count.
const MAX_HOPS: u8 = 16;

const BROADCAST_FLAG: u16 = 0x8000;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

/// Ethernet hardware address of a client.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A decoded DHCP message, either a client request or a server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID chosen by the client and echoed in replies.
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    /// Client address, set by clients that already hold a lease.
    pub ciaddr: Ipv4Addr,
    /// "Your" address: the address handed to the client.
    pub yiaddr: Ipv4Addr,
    /// Server address.
    pub siaddr: Ipv4Addr,
    /// Relay agent address. Relays are not supported; kept for echoing.
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; CHADDR_SIZE],
    pub options: Vec<DhcpOption>,
}

fn read_addr(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

impl DhcpPacket {
    /// Decodes a message from raw datagram bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the datagram is shorter than the
    /// fixed header, the magic cookie is wrong, the hop count exceeds 16, an
    /// Ethernet client reports a hardware length other than 6, or the options
    /// are truncated or malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < OPTIONS_OFFSET {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                OPTIONS_OFFSET
            )));
        }

        if data[MAGIC_COOKIE_OFFSET..OPTIONS_OFFSET] != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let (op, htype, hlen, hops) = (data[0], data[1], data[2], data[3]);

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

        let mut chaddr = [0u8; CHADDR_SIZE];
        chaddr.copy_from_slice(&data[CHADDR_OFFSET..CHADDR_OFFSET + CHADDR_SIZE]);

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: read_addr(data, 12),
            yiaddr: read_addr(data, 16),
            siaddr: read_addr(data, 20),
            giaddr: read_addr(data, 24),
            chaddr,
            options: Self::parse_options(&data[OPTIONS_OFFSET..])?,
        })
    }

    fn parse_options(mut data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();

        while let Some((&code, rest)) = data.split_first() {
            if code == OptionCode::Pad as u8 {
                data = rest;
                continue;
            }
            if code == OptionCode::End as u8 {
                break;
            }

            let Some((&length, rest)) = rest.split_first() else {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            };
            let length = length as usize;
            if rest.len() < length {
                return Err(Error::InvalidPacket("Option data truncated".to_string()));
            }

            let (value, rest) = rest.split_at(length);
            options.push(DhcpOption::parse(code, value)?);
            data = rest;
        }

        Ok(options)
    }

    /// Encodes the message for transmission, padded to at least 300 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(576);

        packet.extend_from_slice(&[self.op, self.htype, self.hlen, self.hops]);
        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());
        for address in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            packet.extend_from_slice(&address.octets());
        }
        packet.extend_from_slice(&self.chaddr);
        packet.resize(MAGIC_COOKIE_OFFSET, 0);
        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &self.options {
            option.encode_into(&mut packet);
        }
        packet.push(OptionCode::End as u8);

        if packet.len() < DHCP_MIN_PACKET_SIZE {
            packet.resize(DHCP_MIN_PACKET_SIZE, 0);
        }
        packet
    }

    /// Returns the DHCP message type (Option 53), if any.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::MessageType(message_type) => Some(*message_type),
            _ => None,
        })
    }

    /// Returns the requested IP address (Option 50), if any.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::RequestedIpAddress(address) => Some(*address),
            _ => None,
        })
    }

    /// Returns the server identifier (Option 54), if any.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::ServerIdentifier(address) => Some(*address),
            _ => None,
        })
    }

    /// Returns the client hostname (Option 12), if any.
    pub fn hostname(&self) -> Option<&str> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::Hostname(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Returns the parameter request list (Option 55), empty when absent.
    pub fn parameter_request_list(&self) -> &[u8] {
        self.options
            .iter()
            .find_map(|option| match option {
                DhcpOption::ParameterRequestList(codes) => Some(codes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Returns the lease time (Option 51), if any.
    pub fn lease_time(&self) -> Option<u32> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::LeaseTime(seconds) => Some(*seconds),
            _ => None,
        })
    }

    /// The client's Ethernet address (first six bytes of `chaddr`).
    pub fn client_mac(&self) -> MacAddr {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&self.chaddr[..6]);
        MacAddr(bytes)
    }

    /// Returns true if the broadcast flag (bit 15) is set.
    pub fn is_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a BOOTREQUEST with the broadcast flag set and the given options.
    pub(crate) fn request_bytes(mac: [u8; 6], xid: u32, options: &[DhcpOption]) -> Vec<u8> {
        let mut packet = vec![0u8; OPTIONS_OFFSET];
        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[10..12].copy_from_slice(&BROADCAST_FLAG.to_be_bytes());
        packet[CHADDR_OFFSET..CHADDR_OFFSET + 6].copy_from_slice(&mac);
        packet[MAGIC_COOKIE_OFFSET..OPTIONS_OFFSET].copy_from_slice(&DHCP_MAGIC_COOKIE);
        for option in options {
            option.encode_into(&mut packet);
        }
        packet.push(OptionCode::End as u8);
        packet
    }

    #[test]
    fn test_parse_request() {
        let data = request_bytes(
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            0x12345678,
            &[
                DhcpOption::MessageType(MessageType::Request),
                DhcpOption::RequestedIpAddress(Ipv4Addr::new(10, 0, 0, 12)),
                DhcpOption::Hostname("laptop".to_string()),
                DhcpOption::ParameterRequestList(vec![1, 3, 6]),
            ],
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        assert_eq!(packet.op, BOOTREQUEST);
        assert_eq!(packet.xid, 0x12345678);
        assert!(packet.is_broadcast());
        assert_eq!(packet.message_type(), Some(MessageType::Request));
        assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(10, 0, 0, 12)));
        assert_eq!(packet.hostname(), Some("laptop"));
        assert_eq!(packet.parameter_request_list(), &[1, 3, 6]);
        assert_eq!(packet.client_mac().to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_missing_options_defaults() {
        let data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        let packet = DhcpPacket::parse(&data).unwrap();
        assert!(packet.message_type().is_none());
        assert!(packet.requested_ip().is_none());
        assert!(packet.hostname().is_none());
        assert!(packet.parameter_request_list().is_empty());
    }

    #[test]
    fn test_encode_layout() {
        let packet = DhcpPacket {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: 0xDEADBEEF,
            secs: 0,
            flags: BROADCAST_FLAG,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::new(10, 0, 0, 12),
            siaddr: Ipv4Addr::new(10, 0, 0, 1),
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            options: vec![DhcpOption::MessageType(MessageType::Offer)],
        };

        let encoded = packet.encode();
        assert_eq!(encoded.len(), DHCP_MIN_PACKET_SIZE);
        assert_eq!(encoded[0], BOOTREPLY);
        assert_eq!(&encoded[4..8], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&encoded[10..12], &BROADCAST_FLAG.to_be_bytes());
        assert_eq!(&encoded[16..20], &[10, 0, 0, 12]);
        assert_eq!(&encoded[20..24], &[10, 0, 0, 1]);
        assert_eq!(&encoded[28..34], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(&encoded[236..240], &DHCP_MAGIC_COOKIE);
        assert_eq!(&encoded[240..244], &[53, 1, 2, 255]);

        assert_eq!(DhcpPacket::parse(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_invalid_packets() {
        assert!(DhcpPacket::parse(&[0u8; 100]).is_err());
        assert!(DhcpPacket::parse(&[0u8; 239]).is_err());

        let bad_cookie = [0u8; 300];
        assert!(DhcpPacket::parse(&bad_cookie).is_err());
    }

    #[test]
    fn test_hlen_validation() {
        let mut data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        data[2] = 7;
        assert!(DhcpPacket::parse(&data).is_err());
        data[2] = HLEN_ETHERNET;
        assert!(DhcpPacket::parse(&data).is_ok());
    }

    #[test]
    fn test_hops_limit() {
        let mut data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        data[3] = 17;
        assert!(DhcpPacket::parse(&data).is_err());
        data[3] = 16;
        assert!(DhcpPacket::parse(&data).is_ok());
    }

    #[test]
    fn test_pad_options_skipped() {
        let mut data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        data.truncate(OPTIONS_OFFSET);
        data.extend_from_slice(&[0, 0, 0, 53, 1, 1, 255]);
        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_truncated_options_rejected() {
        let mut data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        data.truncate(OPTIONS_OFFSET);
        data.push(OptionCode::LeaseTime as u8);
        assert!(DhcpPacket::parse(&data).is_err());

        data.extend_from_slice(&[4, 0, 0]);
        assert!(DhcpPacket::parse(&data).is_err());
    }

    #[test]
    fn test_options_without_end_marker() {
        let mut data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        data.truncate(OPTIONS_OFFSET);
        data.extend_from_slice(&[53, 1, 3]);
        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.message_type(), Some(MessageType::Request));
    }

    #[test]
    fn test_unicast_flag() {
        let mut data = request_bytes([1, 2, 3, 4, 5, 6], 1, &[]);
        data[10..12].copy_from_slice(&[0, 0]);
        assert!(!DhcpPacket::parse(&data).unwrap().is_broadcast());
    }
}
