//! Interface enumeration and concurrent DHCP lease negotiation
//!
//! This crate turns a set of network links into a stream of lease
//! results: each candidate interface negotiates independently (DHCPv4
//! DISCOVER/REQUEST and a stateless DHCPv6 boot-URL exchange), and
//! outcomes arrive in completion order on one channel. A shared watch
//! channel cancels outstanding negotiations once a lease is accepted.

pub mod client;
pub mod error;
pub mod lease;
pub mod link;

pub use client::{send_requests, LeaseResult, Protocols};
pub use error::{DhcpError, Result};
pub use lease::{Lease, Lease4, Lease6};
pub use link::{links, Link};
