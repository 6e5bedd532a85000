//! Error types for interface enumeration and lease negotiation

use thiserror::Error;

/// Error type for DHCP client operations
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Failed to enumerate platform network interfaces
    #[error("failed to enumerate network interfaces: {0}")]
    LinkList(#[source] std::io::Error),

    /// Interface has a malformed or missing hardware address
    #[error("invalid MAC address on {link}: {mac}")]
    InvalidMac { link: String, mac: String },

    /// Failed to open or configure the negotiation socket
    #[error("failed to open DHCP socket on {link}: {source}")]
    SocketSetup {
        link: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket send/receive error during negotiation
    #[error("DHCP I/O error on {link}: {source}")]
    Io {
        link: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse or encode a DHCP message
    #[error("DHCP codec error: {0}")]
    Codec(String),

    /// Server answered our REQUEST with a NAK
    #[error("DHCP server declined the lease on {link}")]
    Nacked { link: String },

    /// One negotiation round ran out of time
    #[error("DHCP negotiation on {link} timed out after {tries} tries")]
    Timeout { link: String, tries: u32 },

    /// The shared racing scope was cancelled (another lease won)
    #[error("negotiation on {link} cancelled")]
    Cancelled { link: String },

    /// Failed to apply the lease configuration to the interface
    #[error("failed to configure {link}: {detail}")]
    ConfigureFailed { link: String, detail: String },

    /// The lease does not reference a bootable resource
    #[error("lease on {link} carries no boot file")]
    NoBootFile { link: String },

    /// Cannot build a boot URI from the lease contents
    #[error("invalid boot URI {uri:?}: {detail}")]
    InvalidBootUri { uri: String, detail: String },
}

/// Result type for DHCP client operations
pub type Result<T> = std::result::Result<T, DhcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DhcpError::Timeout {
            link: "eth0".to_string(),
            tries: 3,
        };
        assert_eq!(
            err.to_string(),
            "DHCP negotiation on eth0 timed out after 3 tries"
        );

        let err = DhcpError::NoBootFile {
            link: "eth1".to_string(),
        };
        assert_eq!(err.to_string(), "lease on eth1 carries no boot file");
    }
}
