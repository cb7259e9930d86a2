//! DHCP message handling.
//!
//! [`DhcpHandler`] reacts to one decoded request at a time: it consults or
//! mutates the [`LeaseStore`], fills a [`ReplyBuilder`], and returns the reply
//! to send, if any. Lease errors never escape: a failed REQUEST becomes a NAK,
//! a failed DISCOVER or RELEASE is logged and answered with silence.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Config, sanitize_hostname};
use crate::lease::LeaseStore;
use crate::options::{DhcpOption, MessageType, OptionCode};
use crate::packet::{BOOTREQUEST, DhcpPacket, MacAddr};
use crate::reply::{ReplyBuilder, ReplyField, ResponseBuilder};

pub struct DhcpHandler<S> {
    server_ip: Ipv4Addr,
    routers: Vec<Ipv4Addr>,
    name_servers: Vec<Ipv4Addr>,
    store: Arc<S>,
}

impl<S: LeaseStore> DhcpHandler<S> {
    pub fn new(config: &Config, store: Arc<S>) -> Self {
        Self {
            server_ip: config.server_ip,
            routers: config.effective_routers(),
            name_servers: config.effective_name_servers(),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Processes one request and returns the reply to send, if any.
    pub async fn handle(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let mac = packet.client_mac();

        if packet.op != BOOTREQUEST {
            debug!("Ignoring non-request op {} from {}", packet.op, mac);
            return None;
        }

        let Some(message_type) = packet.message_type() else {
            warn!("Message without type from {}", mac);
            return None;
        };
        debug!("{} from {} (xid {:#010x})", message_type, mac, packet.xid);

        let hostname = packet
            .hostname()
            .and_then(sanitize_hostname)
            .unwrap_or_default();

        let mut builder = ResponseBuilder::new();
        builder.add_field(ReplyField::ServerAddress(self.server_ip));

        let reply = match message_type {
            MessageType::Discover => self.on_discover(mac, &hostname, &mut builder).await,
            MessageType::Request => self.on_request(packet, mac, &hostname, &mut builder).await,
            MessageType::Release => {
                self.on_release(packet, mac, &hostname).await;
                false
            }
            MessageType::Inform => {
                builder.set_message_type(MessageType::Ack);
                info!("INFORM response to {}", mac);
                true
            }
            MessageType::Decline => {
                debug!("Ignoring DECLINE from {}", mac);
                false
            }
            other => {
                warn!("Ignoring {} message from {}", other, mac);
                false
            }
        };

        if !reply {
            return None;
        }

        self.attach_requested_options(packet, mac, &mut builder).await;

        match builder.finish(packet) {
            Ok(reply) => Some(reply),
            Err(error) => {
                warn!("Dropping reply to {}: {}", mac, error);
                None
            }
        }
    }

    async fn on_discover(
        &self,
        mac: MacAddr,
        hostname: &str,
        builder: &mut impl ReplyBuilder,
    ) -> bool {
        match self.store.make_offer(mac, hostname).await {
            Ok(address) => {
                builder.set_message_type(MessageType::Offer);
                builder.add_field(ReplyField::YourAddress(address));
                info!("OFFER {} to {}", address, mac);
                true
            }
            Err(error) => {
                warn!("Cannot offer an address to {}: {}", mac, error);
                false
            }
        }
    }

    /// Always produces a reply: ACK on success, NAK otherwise.
    async fn on_request(
        &self,
        packet: &DhcpPacket,
        mac: MacAddr,
        hostname: &str,
        builder: &mut impl ReplyBuilder,
    ) -> bool {
        let requested = packet
            .requested_ip()
            .or_else(|| (!packet.ciaddr.is_unspecified()).then_some(packet.ciaddr));

        let Some(address) = requested else {
            builder.set_message_type(MessageType::Nak);
            warn!("NAK to {}: no address in REQUEST", mac);
            return true;
        };

        match self.store.acquire(address, mac, hostname).await {
            Ok(record) => {
                builder.set_message_type(MessageType::Ack);
                builder.add_field(ReplyField::YourAddress(address));
                info!("ACK {} to {} (expires {})", address, mac, record.expires_at);
            }
            Err(error) => {
                builder.set_message_type(MessageType::Nak);
                warn!("NAK to {}: {}", mac, error);
            }
        }
        true
    }

    async fn on_release(&self, packet: &DhcpPacket, mac: MacAddr, hostname: &str) {
        match self.store.release(packet.ciaddr, mac, hostname).await {
            Ok(()) => info!("RELEASE {} from {}", packet.ciaddr, mac),
            Err(error) => warn!("RELEASE from {} rejected: {}", mac, error),
        }
    }

    /// Answers the client's parameter request list (Option 55) in order.
    async fn attach_requested_options(
        &self,
        packet: &DhcpPacket,
        mac: MacAddr,
        builder: &mut impl ReplyBuilder,
    ) {
        for &code in packet.parameter_request_list() {
            let option = match OptionCode::try_from(code) {
                Ok(OptionCode::SubnetMask) => DhcpOption::SubnetMask(self.store.subnet_mask()),
                Ok(OptionCode::Router) => DhcpOption::Router(self.routers.clone()),
                Ok(OptionCode::DnsServer) => DhcpOption::DnsServer(self.name_servers.clone()),
                Ok(OptionCode::LeaseTime) => {
                    DhcpOption::LeaseTime(lease_seconds(self.store.lease_time_for(mac).await))
                }
                Ok(OptionCode::ServerIdentifier) => DhcpOption::ServerIdentifier(self.server_ip),
                _ => continue,
            };
            builder.add_option(option);
        }
    }
}

/// Whole seconds for Option 51, rounded up so a lease with a fraction of a
/// second left is not advertised as 0.
fn lease_seconds(lease_time: Duration) -> u32 {
    let seconds = lease_time.as_secs() + u64::from(lease_time.subsec_nanos() > 0);
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::lease::{LeaseRecord, Leases};
    use crate::packet::BOOTREPLY;
    use crate::packet::tests::request_bytes;

    const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn test_config() -> Config {
        Config {
            server_ip: SERVER_IP,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            range_from: Ipv4Addr::new(10, 0, 0, 10),
            range_to: Ipv4Addr::new(10, 0, 0, 20),
            routers: vec![Ipv4Addr::new(10, 0, 0, 254)],
            name_servers: vec![Ipv4Addr::new(1, 1, 1, 1)],
            lease_duration_seconds: 600,
            ..Default::default()
        }
    }

    fn create_handler() -> DhcpHandler<Leases> {
        let config = test_config();
        let leases = Arc::new(Leases::new(&config).unwrap());
        DhcpHandler::new(&config, leases)
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn create_packet(
        message_type: MessageType,
        client: MacAddr,
        mut options: Vec<DhcpOption>,
    ) -> DhcpPacket {
        options.insert(0, DhcpOption::MessageType(message_type));
        DhcpPacket::parse(&request_bytes(client.0, 0x12345678, &options)).unwrap()
    }

    fn create_packet_with_ciaddr(
        message_type: MessageType,
        client: MacAddr,
        ciaddr: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> DhcpPacket {
        let mut packet = create_packet(message_type, client, options);
        packet.ciaddr = ciaddr;
        packet
    }

    #[tokio::test]
    async fn test_discover_offers_without_leasing() {
        let handler = create_handler();
        let range = test_config().address_range().unwrap();

        let discover = create_packet(MessageType::Discover, mac(1), vec![]);
        let offer = handler.handle(&discover).await.unwrap();

        assert_eq!(offer.op, BOOTREPLY);
        assert_eq!(offer.xid, 0x12345678);
        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.siaddr, SERVER_IP);
        assert!(range.contains(offer.yiaddr));
        assert!(handler.store().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_requested_options_follow_list_order() {
        let handler = create_handler();
        let discover = create_packet(
            MessageType::Discover,
            mac(1),
            vec![DhcpOption::ParameterRequestList(vec![54, 3, 99, 1, 6, 51, 15])],
        );

        let offer = handler.handle(&discover).await.unwrap();
        assert_eq!(
            offer.options,
            vec![
                DhcpOption::MessageType(MessageType::Offer),
                DhcpOption::ServerIdentifier(SERVER_IP),
                DhcpOption::Router(vec![Ipv4Addr::new(10, 0, 0, 254)]),
                DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)),
                DhcpOption::DnsServer(vec![Ipv4Addr::new(1, 1, 1, 1)]),
                DhcpOption::LeaseTime(600),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_parameter_list_means_no_extra_options() {
        let handler = create_handler();
        let discover = create_packet(MessageType::Discover, mac(1), vec![]);
        let offer = handler.handle(&discover).await.unwrap();
        assert_eq!(offer.options, vec![DhcpOption::MessageType(MessageType::Offer)]);
    }

    #[tokio::test]
    async fn test_default_routers_and_name_servers() {
        let config = Config {
            routers: vec![],
            name_servers: vec![],
            ..test_config()
        };
        let handler = DhcpHandler::new(&config, Arc::new(Leases::new(&config).unwrap()));
        let discover = create_packet(
            MessageType::Discover,
            mac(1),
            vec![DhcpOption::ParameterRequestList(vec![3, 6])],
        );

        let offer = handler.handle(&discover).await.unwrap();
        assert!(offer.options.contains(&DhcpOption::Router(vec![SERVER_IP])));
        assert!(offer.options.contains(&DhcpOption::DnsServer(vec![SERVER_IP])));
    }

    #[tokio::test]
    async fn test_request_acks_and_leases() {
        let handler = create_handler();
        let address = Ipv4Addr::new(10, 0, 0, 12);
        let request = create_packet(
            MessageType::Request,
            mac(1),
            vec![
                DhcpOption::RequestedIpAddress(address),
                DhcpOption::Hostname("my laptop!".to_string()),
                DhcpOption::ParameterRequestList(vec![51]),
            ],
        );

        let ack = handler.handle(&request).await.unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, address);
        match ack.lease_time() {
            Some(seconds) => assert!((590..=600).contains(&seconds)),
            None => panic!("lease time missing"),
        }

        let record = handler.store().get_lease_by_ip(address).await.unwrap();
        assert_eq!(record.client, mac(1));
        assert_eq!(record.hostname, "mylaptop");
    }

    #[tokio::test]
    async fn test_request_falls_back_to_ciaddr() {
        let handler = create_handler();
        let address = Ipv4Addr::new(10, 0, 0, 13);
        let request = create_packet_with_ciaddr(MessageType::Request, mac(1), address, vec![]);

        let ack = handler.handle(&request).await.unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, address);
    }

    #[tokio::test]
    async fn test_request_without_address_naks() {
        let handler = create_handler();
        let request = create_packet(MessageType::Request, mac(1), vec![]);

        let nak = handler.handle(&request).await.unwrap();
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
        assert_eq!(nak.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(handler.store().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_request_naks() {
        let handler = create_handler();
        let address = Ipv4Addr::new(10, 0, 0, 12);
        let owner = handler.store().acquire(address, mac(1), "").await.unwrap();

        let request = create_packet(
            MessageType::Request,
            mac(2),
            vec![
                DhcpOption::RequestedIpAddress(address),
                DhcpOption::ParameterRequestList(vec![54]),
            ],
        );

        let nak = handler.handle(&request).await.unwrap();
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
        assert_eq!(nak.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.server_identifier(), Some(SERVER_IP));
        assert_eq!(handler.store().get_lease_by_ip(address).await, Some(owner));
    }

    #[tokio::test]
    async fn test_release_never_replies() {
        let handler = create_handler();
        let address = Ipv4Addr::new(10, 0, 0, 12);
        handler.store().acquire(address, mac(1), "").await.unwrap();

        let foreign = create_packet_with_ciaddr(MessageType::Release, mac(2), address, vec![]);
        assert!(handler.handle(&foreign).await.is_none());
        assert!(handler.store().get_lease_by_ip(address).await.is_some());

        let release = create_packet_with_ciaddr(MessageType::Release, mac(1), address, vec![]);
        assert!(handler.handle(&release).await.is_none());
        assert!(handler.store().get_lease_by_ip(address).await.is_none());
    }

    #[tokio::test]
    async fn test_inform_acks_without_leasing() {
        let handler = create_handler();
        let inform = create_packet_with_ciaddr(
            MessageType::Inform,
            mac(1),
            Ipv4Addr::new(10, 0, 0, 50),
            vec![DhcpOption::ParameterRequestList(vec![1, 3])],
        );

        let ack = handler.handle(&inform).await.unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(ack.siaddr, SERVER_IP);
        assert_eq!(ack.options.len(), 3);
        assert!(handler.store().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_silent_message_types() {
        let handler = create_handler();

        for message_type in [
            MessageType::Decline,
            MessageType::Offer,
            MessageType::Ack,
            MessageType::Nak,
        ] {
            let packet = create_packet(message_type, mac(1), vec![]);
            assert!(handler.handle(&packet).await.is_none());
        }

        let untyped = DhcpPacket::parse(&request_bytes(mac(1).0, 1, &[])).unwrap();
        assert!(handler.handle(&untyped).await.is_none());
    }

    #[tokio::test]
    async fn test_bootreply_ignored() {
        let handler = create_handler();
        let mut packet = create_packet(MessageType::Discover, mac(1), vec![]);
        packet.op = BOOTREPLY;
        assert!(handler.handle(&packet).await.is_none());
    }

    #[tokio::test]
    async fn test_discover_without_free_address() {
        let config = Config {
            range_from: Ipv4Addr::new(10, 0, 0, 10),
            range_to: Ipv4Addr::new(10, 0, 0, 10),
            ..test_config()
        };
        let handler = DhcpHandler::new(&config, Arc::new(Leases::new(&config).unwrap()));
        handler
            .store()
            .acquire(Ipv4Addr::new(10, 0, 0, 10), mac(1), "")
            .await
            .unwrap();

        let discover = create_packet(MessageType::Discover, mac(2), vec![]);
        assert!(handler.handle(&discover).await.is_none());
    }

    #[test]
    fn test_lease_seconds_rounds_up() {
        assert_eq!(lease_seconds(Duration::from_secs(600)), 600);
        assert_eq!(lease_seconds(Duration::from_millis(400)), 1);
        assert_eq!(lease_seconds(Duration::from_millis(1001)), 2);
        assert_eq!(lease_seconds(Duration::ZERO), 0);
        assert_eq!(lease_seconds(Duration::from_secs(u64::from(u32::MAX) + 1)), u32::MAX);
    }

    #[tokio::test]
    async fn test_short_remaining_lease_not_advertised_as_zero() {
        let config = Config {
            lease_duration_seconds: 1,
            ..test_config()
        };
        let handler = DhcpHandler::new(&config, Arc::new(Leases::new(&config).unwrap()));
        let address = Ipv4Addr::new(10, 0, 0, 12);
        handler.store().acquire(address, mac(1), "").await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;

        let discover = create_packet(
            MessageType::Discover,
            mac(1),
            vec![DhcpOption::ParameterRequestList(vec![51])],
        );
        let offer = handler.handle(&discover).await.unwrap();
        assert_eq!(offer.yiaddr, address);
        assert_eq!(offer.lease_time(), Some(1));
    }

    /// A store that rejects everything, to drive the handler's failure paths.
    struct RejectingStore;

    impl LeaseStore for RejectingStore {
        fn subnet_mask(&self) -> Ipv4Addr {
            Ipv4Addr::new(255, 0, 0, 0)
        }

        async fn lease_time_for(&self, _client: MacAddr) -> Duration {
            Duration::from_secs(u64::from(u32::MAX) + 10)
        }

        async fn make_offer(&self, _client: MacAddr, _hostname: &str) -> Result<Ipv4Addr> {
            Err(Error::OfferUnavailable)
        }

        async fn acquire(
            &self,
            address: Ipv4Addr,
            _client: MacAddr,
            _hostname: &str,
        ) -> Result<LeaseRecord> {
            Err(Error::AllocationConflict {
                address,
                owner: MacAddr::new([0; 6]),
            })
        }

        async fn release(&self, address: Ipv4Addr, client: MacAddr, _hostname: &str) -> Result<()> {
            Err(Error::NotLeased { address, client })
        }
    }

    #[tokio::test]
    async fn test_alternate_store() {
        let handler = DhcpHandler::new(&test_config(), Arc::new(RejectingStore));

        let discover = create_packet(MessageType::Discover, mac(1), vec![]);
        assert!(handler.handle(&discover).await.is_none());

        let request = create_packet(
            MessageType::Request,
            mac(1),
            vec![
                DhcpOption::RequestedIpAddress(Ipv4Addr::new(10, 0, 0, 12)),
                DhcpOption::ParameterRequestList(vec![1, 51]),
            ],
        );
        let nak = handler.handle(&request).await.unwrap();
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
        assert!(nak.options.contains(&DhcpOption::SubnetMask(Ipv4Addr::new(255, 0, 0, 0))));
        assert_eq!(nak.lease_time(), Some(u32::MAX));

        let release = create_packet_with_ciaddr(
            MessageType::Release,
            mac(1),
            Ipv4Addr::new(10, 0, 0, 12),
            vec![],
        );
        assert!(handler.handle(&release).await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_hardware_length_dropped() {
        let handler = create_handler();
        let mut inform = create_packet(MessageType::Inform, mac(1), vec![]);
        inform.htype = 6;
        inform.hlen = 32;
        assert!(handler.handle(&inform).await.is_none());
    }
}
