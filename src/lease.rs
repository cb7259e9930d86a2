//! Lease bookkeeping.
//!
//! [`LeaseStore`] is the contract the protocol handler negotiates against:
//! offering a candidate address, acquiring (or renewing) it, releasing it,
//! and reporting how long a client's lease runs. [`Leases`] is the in-memory
//! implementation.
//!
//! # Thread Safety
//!
//! [`Leases`] keeps both indexes in one [`RwLock`]. `acquire` and `release`
//! hold the write lock across the whole check-then-mutate, so two clients
//! racing for the same address cannot both win. `make_offer` and
//! `lease_time_for` hold the read lock while they look.

use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::address::{AddressRange, random_address};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// A binding between an address and the client holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub address: Ipv4Addr,
    pub client: MacAddr,
    /// Sanitized hostname the client reported, empty if none.
    pub hostname: String,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    /// Returns true if the lease has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Storage contract used by the protocol handler.
pub trait LeaseStore: Send + Sync {
    /// Subnet mask handed to clients (Option 1).
    fn subnet_mask(&self) -> Ipv4Addr;

    /// Remaining time of the client's lease, or the default lease duration
    /// if the client holds no unexpired lease.
    fn lease_time_for(&self, client: MacAddr) -> impl Future<Output = Duration> + Send;

    /// Picks an address to offer to `client` without reserving it.
    ///
    /// A client that already has a record is offered that address again.
    fn make_offer(
        &self,
        client: MacAddr,
        hostname: &str,
    ) -> impl Future<Output = Result<Ipv4Addr>> + Send;

    /// Leases `address` to `client`, or renews the lease if it already holds it.
    ///
    /// # Errors
    ///
    /// [`Error::AllocationConflict`] if another client holds an unexpired
    /// lease on `address`.
    fn acquire(
        &self,
        address: Ipv4Addr,
        client: MacAddr,
        hostname: &str,
    ) -> impl Future<Output = Result<LeaseRecord>> + Send;

    /// Ends the client's lease on `address`.
    ///
    /// # Errors
    ///
    /// [`Error::NotLeased`] if `address` is not leased to `client`.
    fn release(
        &self,
        address: Ipv4Addr,
        client: MacAddr,
        hostname: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Default)]
struct LeaseTable {
    by_address: HashMap<Ipv4Addr, LeaseRecord>,
    /// Reverse lookup: client → address.
    by_client: HashMap<MacAddr, Ipv4Addr>,
}

impl LeaseTable {
    fn is_free(&self, address: Ipv4Addr, now: DateTime<Utc>) -> bool {
        self.by_address
            .get(&address)
            .is_none_or(|record| record.is_expired_at(now))
    }

    /// Bounded random search, then an ascending scan of the whole range.
    fn find_free(
        &self,
        range: &AddressRange,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Option<Ipv4Addr> {
        let mut rng = rand::thread_rng();
        (0..attempts)
            .map(|_| random_address(range.low(), range.high(), &mut rng))
            .find(|candidate| self.is_free(*candidate, now))
            .or_else(|| range.iter().find(|candidate| self.is_free(*candidate, now)))
    }
}

/// In-memory lease store.
///
/// # Example
///
/// ```no_run
/// use dhcpdora::{Config, LeaseStore, Leases, MacAddr};
///
/// # async fn example() -> dhcpdora::Result<()> {
/// let leases = Leases::new(&Config::default())?;
/// let client = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
///
/// let offered = leases.make_offer(client, "laptop").await?;
/// let record = leases.acquire(offered, client, "laptop").await?;
/// assert_eq!(record.address, offered);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Leases {
    table: RwLock<LeaseTable>,
    range: AddressRange,
    subnet_mask: Ipv4Addr,
    lease_duration: Duration,
    lease_term: TimeDelta,
    max_offer_attempts: u32,
}

impl Leases {
    /// Creates an empty store for the configured range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configured range is inverted.
    pub fn new(config: &Config) -> Result<Self> {
        let lease_duration = config.lease_duration();
        let lease_term = TimeDelta::from_std(lease_duration).map_err(|_| {
            Error::InvalidConfig(format!("lease duration {:?} is too long", lease_duration))
        })?;

        Ok(Self {
            table: RwLock::new(LeaseTable::default()),
            range: config.address_range()?,
            subnet_mask: config.subnet_mask,
            lease_duration,
            lease_term,
            max_offer_attempts: config.max_offer_attempts,
        })
    }

    /// Returns the record held by a client, if any.
    pub async fn get_lease(&self, client: MacAddr) -> Option<LeaseRecord> {
        let table = self.table.read().await;
        table
            .by_client
            .get(&client)
            .and_then(|address| table.by_address.get(address).cloned())
    }

    /// Returns the record for an address, if any.
    pub async fn get_lease_by_ip(&self, address: Ipv4Addr) -> Option<LeaseRecord> {
        let table = self.table.read().await;
        table.by_address.get(&address).cloned()
    }

    /// Returns all records (including expired ones).
    pub async fn list_leases(&self) -> Vec<LeaseRecord> {
        let table = self.table.read().await;
        table.by_address.values().cloned().collect()
    }

    /// Returns the count of non-expired leases.
    pub async fn active_lease_count(&self) -> usize {
        let table = self.table.read().await;
        table
            .by_address
            .values()
            .filter(|record| !record.is_expired())
            .count()
    }
}

impl LeaseStore for Leases {
    fn subnet_mask(&self) -> Ipv4Addr {
        self.subnet_mask
    }

    async fn lease_time_for(&self, client: MacAddr) -> Duration {
        let table = self.table.read().await;
        match table
            .by_client
            .get(&client)
            .and_then(|address| table.by_address.get(address))
        {
            Some(record) if !record.is_expired() => record.remaining(),
            _ => self.lease_duration,
        }
    }

    async fn make_offer(&self, client: MacAddr, _hostname: &str) -> Result<Ipv4Addr> {
        let table = self.table.read().await;

        if let Some(&address) = table.by_client.get(&client) {
            return Ok(address);
        }

        table
            .find_free(&self.range, self.max_offer_attempts, Utc::now())
            .ok_or(Error::OfferUnavailable)
    }

    async fn acquire(
        &self,
        address: Ipv4Addr,
        client: MacAddr,
        hostname: &str,
    ) -> Result<LeaseRecord> {
        let mut table = self.table.write().await;
        let now = Utc::now();

        if let Some(existing) = table.by_address.get(&address)
            && existing.client != client
            && !existing.is_expired_at(now)
        {
            return Err(Error::AllocationConflict {
                address,
                owner: existing.client,
            });
        }

        // An expired record of another client is taken over.
        if let Some(previous) = table.by_address.remove(&address)
            && previous.client != client
        {
            table.by_client.remove(&previous.client);
        }

        if let Some(old_address) = table.by_client.insert(client, address)
            && old_address != address
        {
            table.by_address.remove(&old_address);
        }

        let record = LeaseRecord {
            address,
            client,
            hostname: hostname.to_string(),
            expires_at: now + self.lease_term,
        };
        table.by_address.insert(address, record.clone());

        Ok(record)
    }

    async fn release(&self, address: Ipv4Addr, client: MacAddr, _hostname: &str) -> Result<()> {
        let mut table = self.table.write().await;

        let owned = table
            .by_address
            .get(&address)
            .is_some_and(|record| record.client == client);
        if !owned {
            return Err(Error::NotLeased { address, client });
        }

        table.by_address.remove(&address);
        table.by_client.remove(&client);
        Ok(())
    }
}
