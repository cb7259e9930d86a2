//! DHCP options (RFC 2132) used by the lease negotiation.
//!
//! Each option is a code byte, a length byte and `length` bytes of data.
//! Only the options the server reads from requests or writes into replies
//! are modelled; everything else decodes to [`DhcpOption::Unknown`] and is
//! ignored by the handler.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Options have a 1-byte length field, so at most 63 IPv4 addresses fit.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

/// Option codes understood by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DnsServer = 6,
    Hostname = 12,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            12 => Ok(Self::Hostname),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            55 => Ok(Self::ParameterRequestList),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with an address offer.
    Offer = 2,
    /// Client request for the offered (or a previously held) address.
    Request = 3,
    /// Client indicates the address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client gives up its address.
    Release = 7,
    /// Client asks for configuration without an address.
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

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// A decoded DHCP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router addresses (Option 3).
    Router(Vec<Ipv4Addr>),
    /// Domain name server addresses (Option 6).
    DnsServer(Vec<Ipv4Addr>),
    /// Client hostname (Option 12).
    Hostname(String),
    /// Address the client asks for (Option 50).
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Address of the answering server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Ordered option codes the client wants in the reply (Option 55).
    ParameterRequestList(Vec<u8>),
    /// Any other option, kept raw.
    Unknown(u8, Vec<u8>),
}

fn single_address(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("Invalid {} length: {}", what, data.len())))?;
    Ok(Ipv4Addr::from(octets))
}

fn address_list(data: &[u8], what: &str) -> Result<Vec<Ipv4Addr>> {
    if data.is_empty() || !data.len().is_multiple_of(4) {
        return Err(Error::InvalidPacket(format!(
            "Invalid {} length: {}",
            what,
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

fn seconds(data: &[u8], what: &str) -> Result<u32> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("Invalid {} length: {}", what, data.len())))?;
    Ok(u32::from_be_bytes(bytes))
}

fn push_tlv(out: &mut Vec<u8>, code: u8, data: &[u8]) {
    let len = data.len().min(u8::MAX as usize);
    out.push(code);
    out.push(len as u8);
    out.extend_from_slice(&data[..len]);
}

fn addresses_to_bytes(addresses: &[Ipv4Addr]) -> Vec<u8> {
    addresses
        .iter()
        .take(MAX_ADDRESSES_PER_OPTION)
        .flat_map(|address| address.octets())
        .collect()
}

impl DhcpOption {
    /// Returns the RFC 2132 option code for this option.
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::Hostname(_) => OptionCode::Hostname as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Decodes one option from its code and data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] when the data length does not fit the
    /// option (a subnet mask must be 4 bytes, router lists a non-empty
    /// multiple of 4, and so on) or the message type value is unknown.
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        let option = match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Self::SubnetMask(single_address(data, "subnet mask")?),
            Ok(OptionCode::Router) => Self::Router(address_list(data, "router")?),
            Ok(OptionCode::DnsServer) => Self::DnsServer(address_list(data, "DNS server")?),
            Ok(OptionCode::Hostname) => Self::Hostname(String::from_utf8_lossy(data).into_owned()),
            Ok(OptionCode::RequestedIpAddress) => {
                Self::RequestedIpAddress(single_address(data, "requested IP address")?)
            }
            Ok(OptionCode::LeaseTime) => Self::LeaseTime(seconds(data, "lease time")?),
            Ok(OptionCode::MessageType) => {
                let [value] = data else {
                    return Err(Error::InvalidPacket(
                        "Invalid message type length".to_string(),
                    ));
                };
                let message_type = MessageType::try_from(*value).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                Self::MessageType(message_type)
            }
            Ok(OptionCode::ServerIdentifier) => {
                Self::ServerIdentifier(single_address(data, "server identifier")?)
            }
            Ok(OptionCode::ParameterRequestList) => Self::ParameterRequestList(data.to_vec()),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => {
                return Err(Error::InvalidPacket(
                    "Pad/End carry no data".to_string(),
                ));
            }
            Err(unknown) => Self::Unknown(unknown, data.to_vec()),
        };
        Ok(option)
    }

    /// Appends the option in code/length/data form.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let code = self.code();
        match self {
            Self::SubnetMask(address)
            | Self::RequestedIpAddress(address)
            | Self::ServerIdentifier(address) => push_tlv(out, code, &address.octets()),
            Self::Router(addresses) | Self::DnsServer(addresses) => {
                push_tlv(out, code, &addresses_to_bytes(addresses))
            }
            Self::Hostname(name) => push_tlv(out, code, name.as_bytes()),
            Self::LeaseTime(time) => push_tlv(out, code, &time.to_be_bytes()),
            Self::MessageType(message_type) => push_tlv(out, code, &[*message_type as u8]),
            Self::ParameterRequestList(codes) => push_tlv(out, code, codes),
            Self::Unknown(_, data) => push_tlv(out, code, data),
        }
    }

    /// Encodes the option to a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}
