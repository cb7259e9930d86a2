use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::address::AddressRange;
use crate::error::{Error, Result};
use crate::interface::interface_ipv4;

const MAX_HOSTNAME_LENGTH: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    /// Lower bound of the lease range, compared octet by octet.
    pub range_from: Ipv4Addr,
    /// Upper bound of the lease range, compared octet by octet.
    pub range_to: Ipv4Addr,
    /// Defaults to `server_ip` when empty.
    pub routers: Vec<Ipv4Addr>,
    /// Defaults to `server_ip` when empty.
    pub name_servers: Vec<Ipv4Addr>,
    pub lease_duration_seconds: u32,
    /// Random candidates tried by an offer before scanning the range.
    pub max_offer_attempts: u32,
    pub listen_address: SocketAddrV4,
    /// Network device to bind to (e.g. "br0"). Linux only. When set,
    /// [`Config::resolve_interface`] takes `server_ip` and `subnet_mask`
    /// from the device.
    pub interface: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            range_from: Ipv4Addr::new(192, 168, 1, 100),
            range_to: Ipv4Addr::new(192, 168, 1, 200),
            routers: Vec::new(),
            name_servers: Vec::new(),
            lease_duration_seconds: 600,
            max_offer_attempts: 64,
            listen_address: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 67),
            interface: None,
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let range = self.address_range()?;

        if range.contains(self.server_ip) {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the lease range".to_string(),
            ));
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.max_offer_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_offer_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The lease range, or an error if an octet of `range_from` exceeds the
    /// same octet of `range_to`.
    pub fn address_range(&self) -> Result<AddressRange> {
        AddressRange::new(self.range_from, self.range_to).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "every octet of range_from ({}) must be less than or equal to range_to ({})",
                self.range_from, self.range_to
            ))
        })
    }

    /// Replaces `server_ip` and `subnet_mask` with the IPv4 address of the
    /// configured interface. Does nothing if no interface is set.
    pub fn resolve_interface(&mut self) -> Result<()> {
        let Some(interface) = &self.interface else {
            return Ok(());
        };

        let (address, netmask) = interface_ipv4(interface)?;
        info!("Serving as {} ({}) on {}", address, netmask, interface);
        self.server_ip = address;
        self.subnet_mask = netmask;
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.lease_duration_seconds))
    }

    pub fn effective_routers(&self) -> Vec<Ipv4Addr> {
        if self.routers.is_empty() {
            vec![self.server_ip]
        } else {
            self.routers.clone()
        }
    }

    pub fn effective_name_servers(&self) -> Vec<Ipv4Addr> {
        if self.name_servers.is_empty() {
            vec![self.server_ip]
        } else {
            self.name_servers.clone()
        }
    }
}

/// Strips a client-supplied hostname down to ASCII alphanumerics, `-` and `.`,
/// at most 63 characters. Returns `None` if nothing is left.
pub fn sanitize_hostname(hostname: &str) -> Option<String> {
    let sanitized: String = hostname
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
        .take(MAX_HOSTNAME_LENGTH)
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}
