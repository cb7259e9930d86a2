//! IPv4 address lookup for a named network device.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Returns the IPv4 address and subnet mask assigned to `name`.
///
/// # Errors
///
/// [`Error::InterfaceNotFound`] if the device does not exist or has no IPv4
/// address. On platforms other than Linux every lookup fails.
#[cfg(target_os = "linux")]
pub fn interface_ipv4(name: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    use std::os::fd::AsRawFd;

    use socket2::{Domain, Socket, Type};

    let not_found = || Error::InterfaceNotFound {
        name: name.to_string(),
    };

    // IFNAMSIZ includes the trailing NUL.
    if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.as_bytes().contains(&0) {
        return Err(not_found());
    }

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    let fd = socket.as_raw_fd();

    let read_address = |request| -> Result<Ipv4Addr> {
        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        for (slot, byte) in ifr.ifr_name.iter_mut().zip(name.bytes()) {
            *slot = byte as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, request, &mut ifr as *mut libc::ifreq) };
        if ret < 0 {
            return Err(not_found());
        }

        let addr = unsafe {
            std::ptr::read_unaligned(
                &ifr.ifr_ifru.ifru_addr as *const libc::sockaddr as *const libc::sockaddr_in,
            )
        };
        Ok(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
    };

    let address = read_address(libc::SIOCGIFADDR)?;
    let netmask = read_address(libc::SIOCGIFNETMASK)?;
    Ok((address, netmask))
}

#[cfg(not(target_os = "linux"))]
pub fn interface_ipv4(name: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    Err(Error::InterfaceNotFound {
        name: name.to_string(),
    })
}
