//! Candidate address generation within a per-octet range.
//!
//! The lease range is not a contiguous span of 32-bit integers: each octet
//! of `low` and `high` bounds the same octet of every candidate independently.
//! `10.0.1.10 - 10.0.2.20` therefore covers `10.0.1.10 ..= 10.0.1.20` and
//! `10.0.2.10 ..= 10.0.2.20`, not `10.0.1.21`.

use std::net::Ipv4Addr;

use rand::RngCore;

/// An inclusive per-octet address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    low: [u8; 4],
    high: [u8; 4],
}

impl AddressRange {
    /// Creates a range, or `None` if any octet of `low` exceeds the same
    /// octet of `high`.
    pub fn new(low: Ipv4Addr, high: Ipv4Addr) -> Option<Self> {
        let low = low.octets();
        let high = high.octets();
        if low.iter().zip(high.iter()).any(|(lo, hi)| lo > hi) {
            return None;
        }
        Some(Self { low, high })
    }

    pub fn low(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.low)
    }

    pub fn high(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.high)
    }

    /// Returns true if every octet of `address` lies within its bounds.
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        address
            .octets()
            .iter()
            .enumerate()
            .all(|(index, octet)| (self.low[index]..=self.high[index]).contains(octet))
    }

    /// Number of addresses covered by the range.
    pub fn size(&self) -> u64 {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(lo, hi)| u64::from(hi - lo) + 1)
            .product()
    }

    /// Iterates every address in the range in ascending order.
    pub fn iter(&self) -> AddressIter {
        AddressIter {
            range: *self,
            next: Some(self.low),
        }
    }
}

/// Ascending iterator over an [`AddressRange`].
#[derive(Debug, Clone)]
pub struct AddressIter {
    range: AddressRange,
    next: Option<[u8; 4]>,
}

impl Iterator for AddressIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        let current = self.next?;

        let mut following = current;
        let mut carried = true;
        for index in (0..4).rev() {
            if following[index] < self.range.high[index] {
                following[index] += 1;
                carried = false;
                break;
            }
            following[index] = self.range.low[index];
        }
        self.next = if carried { None } else { Some(following) };

        Some(Ipv4Addr::from(current))
    }
}

/// Generates a pseudo-random address between `low` and `high`.
///
/// Octets where `low` and `high` agree are copied; the others are
/// `random_byte % (high - low) + low`. The modulo means the `high` octet
/// itself is never produced and lower values are slightly favoured.
pub fn random_address<R: RngCore + ?Sized>(
    low: Ipv4Addr,
    high: Ipv4Addr,
    rng: &mut R,
) -> Ipv4Addr {
    let low = low.octets();
    let high = high.octets();

    let mut random = [0u8; 4];
    rng.fill_bytes(&mut random);

    let mut octets = [0u8; 4];
    for index in 0..4 {
        octets[index] = if low[index] == high[index] {
            low[index]
        } else {
            let span = high[index].wrapping_sub(low[index]);
            (random[index] % span).wrapping_add(low[index])
        };
    }

    Ipv4Addr::from(octets)
}
