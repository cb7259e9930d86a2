use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::DhcpHandler;
use crate::lease::LeaseStore;
use crate::packet::DhcpPacket;

const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// UDP front end: receives datagrams and hands each one to the handler on
/// its own task.
pub struct DhcpServer<S> {
    handler: Arc<DhcpHandler<S>>,
    socket: Arc<UdpSocket>,
}

impl<S: LeaseStore + 'static> DhcpServer<S> {
    pub fn new(config: &Config, store: Arc<S>) -> Result<Self> {
        let socket = Arc::new(Self::create_socket(config)?);

        info!(
            "DHCP server {} leasing {} - {} for {} seconds",
            config.server_ip, config.range_from, config.range_to, config.lease_duration_seconds
        );

        Ok(Self {
            handler: Arc::new(DhcpHandler::new(config, store)),
            socket,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
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

        if let Some(interface) = &config.interface {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            {
                socket.bind_device(Some(interface.as_bytes())).map_err(|error| {
                    Error::Socket(format!("Failed to bind to device {}: {}", interface, error))
                })?;
            }
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            {
                warn!(
                    "interface ({}) is only supported on Linux and will be ignored",
                    interface
                );
            }
        }

        let bind_addr = config.listen_address;
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

        info!("DHCP server ready and listening on {}", self.socket.local_addr()?);

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = buffer[..size].to_vec();
                    let handler = Arc::clone(&self.handler);
                    let socket = Arc::clone(&self.socket);

                    tokio::spawn(async move {
                        if let Err(error) = serve_datagram(&handler, &socket, &data, source).await {
                            warn!("Error handling packet from {}: {}", source, error);
                        }
                    });
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }
}

async fn serve_datagram<S: LeaseStore>(
    handler: &DhcpHandler<S>,
    socket: &UdpSocket,
    data: &[u8],
    source: SocketAddr,
) -> Result<()> {
    if let Some((reply, destination)) = process_datagram(handler, data, source).await? {
        socket.send_to(&reply, destination).await?;
    }
    Ok(())
}

/// Decodes one datagram and returns the encoded reply and where to send it.
async fn process_datagram<S: LeaseStore>(
    handler: &DhcpHandler<S>,
    data: &[u8],
    source: SocketAddr,
) -> Result<Option<(Vec<u8>, SocketAddrV4)>> {
    let request = DhcpPacket::parse(data)?;

    let Some(reply) = handler.handle(&request).await else {
        debug!("No reply for {} from {}", request.client_mac(), source);
        return Ok(None);
    };

    Ok(Some((reply.encode(), reply_destination(&request))))
}

/// Clients without an address (or asking for broadcast) cannot receive
/// unicast yet.
fn reply_destination(request: &DhcpPacket) -> SocketAddrV4 {
    if request.is_broadcast() || request.ciaddr.is_unspecified() {
        SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT)
    } else {
        SocketAddrV4::new(request.ciaddr, DHCP_CLIENT_PORT)
    }
}
