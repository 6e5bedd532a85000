//! Minimal async TFTP client
//!
//! Implements just enough of RFC 1350 (plus RFC 2347/2348 option
//! negotiation for block size) to pull PXE configs, kernels and
//! initrds from a boot server. Read-only; there is no write path.

pub mod client;
pub mod error;
pub mod packet;

pub use client::{fetch, TftpClient};
pub use error::{Result, TftpError};
