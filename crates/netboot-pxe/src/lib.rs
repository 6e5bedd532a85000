//! PXELINUX-style boot config resolution
//!
//! Resolves a boot URI from a DHCP lease into a parsed boot
//! configuration and executes the chosen entry: config discovery
//! under `pxelinux.cfg/`, a syslinux parser subset, and image
//! download over TFTP or HTTP before handing off to kexec.

pub mod config;
pub mod entry;
pub mod error;
pub mod fetch;

pub use config::Config;
pub use entry::BootEntry;
pub use error::{PxeError, Result};
pub use fetch::{DefaultFetcher, Fetcher};
