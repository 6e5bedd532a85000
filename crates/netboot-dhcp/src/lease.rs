//! Lease variants and their operations
//!
//! A lease is the outcome of one successful negotiation. The v4
//! variant carries an assigned address; the v6 variant only points at
//! a boot file URL (address configuration arrives via RA). Applying a
//! lease mutates the interface with ip(8), the same way the rest of
//! the boot environment manages links.

use crate::error::{DhcpError, Result};
use crate::link::Link;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

/// Network configuration negotiated for one interface
#[derive(Debug, Clone)]
pub enum Lease {
    V4(Lease4),
    V6(Lease6),
}

/// DHCPv4 lease: assigned address plus boot parameters
#[derive(Debug, Clone)]
pub struct Lease4 {
    pub link: Link,
    pub ip: Ipv4Addr,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    /// Next-server (siaddr or server identifier)
    pub server_ip: Option<Ipv4Addr>,
    /// Bootfile name (option 67)
    pub boot_file: Option<String>,
    pub lease_time: Option<u32>,
}

/// DHCPv6 lease: boot URL only, no address of its own
#[derive(Debug, Clone)]
pub struct Lease6 {
    pub link: Link,
    /// OPT_BOOTFILE_URL (option 59)
    pub boot_url: Option<String>,
}

impl Lease {
    /// The interface this lease was negotiated on
    pub fn link(&self) -> &Link {
        match self {
            Lease::V4(l) => &l.link,
            Lease::V6(l) => &l.link,
        }
    }

    /// Assigned IPv4 address, when the variant has one
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            Lease::V4(l) => Some(l.ip),
            Lease::V6(_) => None,
        }
    }

    /// Apply the negotiated configuration to the interface
    pub async fn configure(&self) -> Result<()> {
        match self {
            Lease::V4(l) => l.configure().await,
            Lease::V6(l) => l.configure().await,
        }
    }

    /// Where the boot configuration for this lease lives
    pub fn boot_uri(&self) -> Result<Url> {
        match self {
            Lease::V4(l) => l.boot_uri(),
            Lease::V6(l) => l.boot_uri(),
        }
    }
}

impl std::fmt::Display for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lease::V4(l) => write!(f, "DHCPv4 lease {} on {}", l.ip, l.link),
            Lease::V6(l) => write!(f, "DHCPv6 lease on {}", l.link),
        }
    }
}

impl Lease4 {
    /// Flush, address, up, default route
    pub async fn configure(&self) -> Result<()> {
        let prefix = self
            .subnet_mask
            .map(|m| u32::from(m).count_ones())
            .unwrap_or(24);
        let addr = format!("{}/{}", self.ip, prefix);

        run_ip(&self.link, &["addr", "flush", "dev", &self.link.name]).await?;
        run_ip(
            &self.link,
            &["addr", "add", &addr, "dev", &self.link.name],
        )
        .await?;
        run_ip(&self.link, &["link", "set", &self.link.name, "up"]).await?;

        if let Some(router) = self.routers.first() {
            let via = router.to_string();
            run_ip(
                &self.link,
                &[
                    "route", "replace", "default", "via", &via, "dev", &self.link.name,
                ],
            )
            .await?;
        }

        info!(link = %self.link.name, addr = %addr, "configured interface from lease");
        Ok(())
    }

    /// Boot URI per the v4 lease: an absolute URL in the bootfile
    /// name wins, otherwise tftp://{next-server}/{bootfile}
    pub fn boot_uri(&self) -> Result<Url> {
        let boot_file = self.boot_file.as_deref().ok_or_else(|| {
            DhcpError::NoBootFile {
                link: self.link.name.clone(),
            }
        })?;

        if boot_file.contains("://") {
            return Url::parse(boot_file).map_err(|e| DhcpError::InvalidBootUri {
                uri: boot_file.to_string(),
                detail: e.to_string(),
            });
        }

        let server = self.server_ip.ok_or_else(|| DhcpError::InvalidBootUri {
            uri: boot_file.to_string(),
            detail: "no next-server address in lease".to_string(),
        })?;

        let uri = format!("tftp://{}/{}", server, boot_file.trim_start_matches('/'));
        Url::parse(&uri).map_err(|e| DhcpError::InvalidBootUri {
            uri,
            detail: e.to_string(),
        })
    }
}

impl Lease6 {
    /// v6 address configuration comes from RA; just bring the link up
    pub async fn configure(&self) -> Result<()> {
        run_ip(&self.link, &["link", "set", &self.link.name, "up"]).await
    }

    pub fn boot_uri(&self) -> Result<Url> {
        let boot_url = self.boot_url.as_deref().ok_or_else(|| {
            DhcpError::NoBootFile {
                link: self.link.name.clone(),
            }
        })?;
        Url::parse(boot_url).map_err(|e| DhcpError::InvalidBootUri {
            uri: boot_url.to_string(),
            detail: e.to_string(),
        })
    }
}

async fn run_ip(link: &Link, args: &[&str]) -> Result<()> {
    debug!(link = %link.name, args = ?args, "ip");
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| DhcpError::ConfigureFailed {
            link: link.name.clone(),
            detail: format!("failed to run ip: {}", e),
        })?;

    if !output.status.success() {
        return Err(DhcpError::ConfigureFailed {
            link: link.name.clone(),
            detail: format!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_link() -> Link {
        Link {
            name: "eth0".to_string(),
            index: 2,
            mac: "52:54:00:12:34:56".to_string(),
        }
    }

    fn v4_lease() -> Lease4 {
        Lease4 {
            link: test_link(),
            ip: Ipv4Addr::new(192, 168, 0, 10),
            subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            routers: vec![Ipv4Addr::new(192, 168, 0, 1)],
            server_ip: Some(Ipv4Addr::new(192, 168, 0, 2)),
            boot_file: Some("pxelinux.0".to_string()),
            lease_time: Some(3600),
        }
    }

    #[test]
    fn test_boot_uri_tftp_from_bootfile() {
        let uri = v4_lease().boot_uri().unwrap();
        assert_eq!(uri.scheme(), "tftp");
        assert_eq!(uri.host_str(), Some("192.168.0.2"));
        assert_eq!(uri.path(), "/pxelinux.0");
    }

    #[test]
    fn test_boot_uri_absolute_url_wins() {
        let mut lease = v4_lease();
        lease.boot_file = Some("http://boot.example.com/bios/pxelinux.0".to_string());
        let uri = lease.boot_uri().unwrap();
        assert_eq!(uri.scheme(), "http");
        assert_eq!(uri.host_str(), Some("boot.example.com"));
        assert_eq!(uri.path(), "/bios/pxelinux.0");
    }

    #[test]
    fn test_boot_uri_requires_boot_file() {
        let mut lease = v4_lease();
        lease.boot_file = None;
        assert!(matches!(
            lease.boot_uri(),
            Err(DhcpError::NoBootFile { .. })
        ));
    }

    #[test]
    fn test_boot_uri_requires_server_for_relative_file() {
        let mut lease = v4_lease();
        lease.server_ip = None;
        assert!(matches!(
            lease.boot_uri(),
            Err(DhcpError::InvalidBootUri { .. })
        ));
    }

    #[test]
    fn test_v6_boot_uri() {
        let lease = Lease6 {
            link: test_link(),
            boot_url: Some("http://[2001:db8::1]/boot/netboot.cfg".to_string()),
        };
        let uri = lease.boot_uri().unwrap();
        assert_eq!(uri.scheme(), "http");

        let empty = Lease6 {
            link: test_link(),
            boot_url: None,
        };
        assert!(matches!(
            empty.boot_uri(),
            Err(DhcpError::NoBootFile { .. })
        ));
    }

    #[test]
    fn test_lease_ipv4_accessor() {
        let lease = Lease::V4(v4_lease());
        assert_eq!(lease.ipv4(), Some(Ipv4Addr::new(192, 168, 0, 10)));
        assert_eq!(lease.link().name, "eth0");

        let lease6 = Lease::V6(Lease6 {
            link: test_link(),
            boot_url: None,
        });
        assert_eq!(lease6.ipv4(), None);
    }

    #[test]
    fn test_display() {
        let lease = Lease::V4(v4_lease());
        let s = lease.to_string();
        assert!(s.contains("192.168.0.10"));
        assert!(s.contains("eth0"));
    }
}
