use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcpdora::{Config, DhcpServer, Leases, Result};

#[derive(Parser)]
#[command(name = "dhcpdora")]
#[command(author, version, about = "An in-memory DHCPv4 lease server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// First address of the lease range (overrides the config file)
    #[arg(long)]
    range_from: Option<Ipv4Addr>,

    /// Last address of the lease range (overrides the config file)
    #[arg(long)]
    range_to: Option<Ipv4Addr>,

    /// Comma-separated router addresses
    #[arg(long, value_delimiter = ',')]
    routers: Option<Vec<Ipv4Addr>>,

    /// Comma-separated name server addresses
    #[arg(long, value_delimiter = ',')]
    name_servers: Option<Vec<Ipv4Addr>>,

    /// Address and port to listen on
    #[arg(long)]
    listen: Option<SocketAddrV4>,

    /// Network device to bind to; its IPv4 address becomes the server
    /// address (Linux only)
    #[arg(short, long)]
    interface: Option<String>,

    /// Server address (overrides the config file and the interface address)
    #[arg(long)]
    server_ip: Option<Ipv4Addr>,

    /// Subnet mask handed to clients (overrides the config file and the
    /// interface mask)
    #[arg(long)]
    subnet_mask: Option<Ipv4Addr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(range_from) = self.range_from {
            config.range_from = range_from;
        }
        if let Some(range_to) = self.range_to {
            config.range_to = range_to;
        }
        if let Some(routers) = &self.routers {
            config.routers = routers.clone();
        }
        if let Some(name_servers) = &self.name_servers {
            config.name_servers = name_servers.clone();
        }
        if let Some(listen) = self.listen {
            config.listen_address = listen;
        }
        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }

        config.resolve_interface()?;

        if let Some(server_ip) = self.server_ip {
            config.server_ip = server_ip;
        }
        if let Some(subnet_mask) = self.subnet_mask {
            config.subnet_mask = subnet_mask;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut config = Config::load_or_create(&cli.config)?;
    cli.apply_overrides(&mut config)?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let leases = Arc::new(Leases::new(&config)?);
            let server = DhcpServer::new(&config, leases)?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_overrides() {
        let cli = Cli::try_parse_from([
            "dhcpdora",
            "--server-ip",
            "10.0.0.1",
            "--subnet-mask",
            "255.255.0.0",
            "--range-from",
            "10.0.0.10",
            "--range-to",
            "10.0.0.20",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.server_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.subnet_mask, Ipv4Addr::new(255, 255, 0, 0));
        assert!(config.validate().is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_interface_sets_server_address() {
        let cli = Cli::try_parse_from([
            "dhcpdora",
            "--interface",
            "lo",
            "--range-from",
            "127.0.0.10",
            "--range-to",
            "127.0.0.20",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.server_ip, Ipv4Addr::LOCALHOST);
        assert_eq!(config.subnet_mask, Ipv4Addr::new(255, 0, 0, 0));
        assert!(config.validate().is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_explicit_server_ip_beats_interface() {
        let cli = Cli::try_parse_from(["dhcpdora", "-i", "lo", "--server-ip", "127.0.0.2"])
            .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.server_ip, Ipv4Addr::new(127, 0, 0, 2));
        assert_eq!(config.subnet_mask, Ipv4Addr::new(255, 0, 0, 0));
    }

    #[test]
    fn test_unknown_interface_rejected() {
        let cli = Cli::try_parse_from(["dhcpdora", "--interface", "nosuchdev0"]).unwrap();
        let mut config = Config::default();
        assert!(cli.apply_overrides(&mut config).is_err());
    }
}
