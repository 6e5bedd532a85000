//! Network interface enumeration via sysfs
//!
//! The kernel exposes every link under /sys/class/net with its name,
//! interface index and hardware address. That is all the negotiator
//! needs, with no netlink dependency.

use crate::error::{DhcpError, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// One platform network link, immutable for a boot attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface name (eth0, enp3s0, ...)
    pub name: String,
    /// Kernel interface index
    pub index: u32,
    /// Hardware address, lowercase colon-separated
    pub mac: String,
}

impl Link {
    /// Hardware address as raw bytes, for DHCP chaddr and PXE
    /// config-file probing
    pub fn mac_bytes(&self) -> Result<[u8; 6]> {
        parse_mac(&self.mac).ok_or_else(|| DhcpError::InvalidMac {
            link: self.name.clone(),
            mac: self.mac.clone(),
        })
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.mac)
    }
}

fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let mut bytes = [0u8; 6];
    let mut count = 0;
    for part in mac.split(':') {
        if count == 6 || part.len() != 2 {
            return None;
        }
        bytes[count] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    if count == 6 {
        Some(bytes)
    } else {
        None
    }
}

/// Enumerate all network links on the machine
pub fn links() -> Result<Vec<Link>> {
    links_from(Path::new("/sys/class/net"))
}

fn links_from(sys_net: &Path) -> Result<Vec<Link>> {
    let entries = fs::read_dir(sys_net).map_err(DhcpError::LinkList)?;
    let mut links = Vec::new();

    for entry in entries {
        let entry = entry.map_err(DhcpError::LinkList)?;
        let name = entry.file_name().to_string_lossy().to_string();

        let mac = match fs::read_to_string(entry.path().join("address")) {
            Ok(addr) => addr.trim().to_lowercase(),
            Err(_) => {
                debug!(link = %name, "no address file, skipping");
                continue;
            }
        };
        if parse_mac(&mac).is_none() {
            debug!(link = %name, mac = %mac, "unparseable hardware address, skipping");
            continue;
        }

        let index = fs::read_to_string(entry.path().join("ifindex"))
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);

        links.push(Link { name, index, mac });
    }

    // Deterministic order for logs and tests
    links.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(links)
}
