//! Reply accumulation.
//!
//! The protocol handler records what a reply should contain as it goes and
//! assembles the packet once at the end. Entries are kept in the order they
//! were added and folded at assembly: a later entry for the same header field
//! or option code replaces the earlier one, while an option keeps the position
//! of its first insertion.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREPLY, DhcpPacket};

/// Longest hardware address that fits in `chaddr`.
const MAX_HARDWARE_LENGTH: u8 = 16;

/// Header-level attributes of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyField {
    MessageType(MessageType),
    /// `yiaddr`: the address assigned to the client.
    YourAddress(Ipv4Addr),
    /// `siaddr`: the answering server.
    ServerAddress(Ipv4Addr),
}

/// Accumulates the contents of a reply.
pub trait ReplyBuilder {
    fn set_message_type(&mut self, message_type: MessageType);

    fn add_field(&mut self, field: ReplyField);

    fn add_option(&mut self, option: DhcpOption);

    /// Assembles the reply, copying the transaction and client identifiers
    /// from `request`.
    ///
    /// # Errors
    ///
    /// [`Error::ReplyAssemblyFailed`] if no message type was set or the
    /// request's hardware length does not fit `chaddr`.
    fn finish(self, request: &DhcpPacket) -> Result<DhcpPacket>
    where
        Self: Sized;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Field(ReplyField),
    Option(DhcpOption),
}

/// [`ReplyBuilder`] backed by an ordered list of entries.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    entries: Vec<Entry>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplyBuilder for ResponseBuilder {
    fn set_message_type(&mut self, message_type: MessageType) {
        self.add_field(ReplyField::MessageType(message_type));
    }

    fn add_field(&mut self, field: ReplyField) {
        self.entries.push(Entry::Field(field));
    }

    fn add_option(&mut self, option: DhcpOption) {
        self.entries.push(Entry::Option(option));
    }

    fn finish(self, request: &DhcpPacket) -> Result<DhcpPacket> {
        let mut message_type = None;
        let mut yiaddr = Ipv4Addr::UNSPECIFIED;
        let mut siaddr = Ipv4Addr::UNSPECIFIED;
        let mut options: Vec<DhcpOption> = Vec::new();

        for entry in self.entries {
            match entry {
                Entry::Field(ReplyField::MessageType(value))
                | Entry::Option(DhcpOption::MessageType(value)) => message_type = Some(value),
                Entry::Field(ReplyField::YourAddress(address)) => yiaddr = address,
                Entry::Field(ReplyField::ServerAddress(address)) => siaddr = address,
                Entry::Option(option) => {
                    match options.iter_mut().find(|slot| slot.code() == option.code()) {
                        Some(slot) => *slot = option,
                        None => options.push(option),
                    }
                }
            }
        }

        let message_type = message_type
            .ok_or_else(|| Error::ReplyAssemblyFailed("no message type set".to_string()))?;

        if request.hlen > MAX_HARDWARE_LENGTH {
            return Err(Error::ReplyAssemblyFailed(format!(
                "hardware length {} exceeds {}",
                request.hlen, MAX_HARDWARE_LENGTH
            )));
        }

        options.insert(0, DhcpOption::MessageType(message_type));

        Ok(DhcpPacket {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: request.ciaddr,
            yiaddr,
            siaddr,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options,
        })
    }
}
