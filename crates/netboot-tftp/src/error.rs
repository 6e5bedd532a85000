//! Error types for TFTP transfers

use std::net::SocketAddr;
use thiserror::Error;

/// Error type for TFTP client operations
#[derive(Debug, Error)]
pub enum TftpError {
    /// Failed to bind the local socket
    #[error("failed to bind TFTP socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Socket send/receive error
    #[error("TFTP socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed packet received
    #[error("invalid TFTP packet: {0}")]
    InvalidPacket(String),

    /// Server replied with a TFTP ERROR packet
    #[error("TFTP error from {server}: {code}: {message}")]
    Remote {
        server: SocketAddr,
        code: u16,
        message: String,
    },

    /// No reply from the server within the retransmit budget
    #[error("TFTP transfer to {server} timed out after {retries} retries")]
    TimedOut { server: SocketAddr, retries: u32 },

    /// Server sent a block we cannot reconcile with the transfer state
    #[error("unexpected TFTP block {got} (expected {expected})")]
    UnexpectedBlock { expected: u16, got: u16 },
}

/// Result type for TFTP client operations
pub type Result<T> = std::result::Result<T, TftpError>;
