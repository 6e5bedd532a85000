//! Netboot orchestration
//!
//! Fans DHCP negotiation out over every matching interface, takes the
//! first usable lease, and runs the boot pipeline on it. A lease whose
//! pipeline fails is abandoned and the race resumes with whatever the
//! other interfaces still produce, all under one overall deadline.

use crate::boot;
use netboot_dhcp::client::{send_requests, LeaseResult, Protocols};
use netboot_dhcp::{links, Lease, Link};
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Per-attempt DHCP timeout
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);
/// Attempts per interface and protocol
const DHCP_TRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum NetbootError {
    #[error("invalid interface pattern: {0}")]
    BadPattern(#[from] regex::Error),

    #[error("failed to enumerate network interfaces: {0}")]
    Platform(#[from] netboot_dhcp::DhcpError),

    #[error("timed out waiting for a bootable lease")]
    DeadlineExceeded,

    #[error("no interface produced a bootable lease")]
    NothingBootable,
}

/// Compile the anchored full-match matcher for interface names
fn interface_matcher(pattern: &str) -> Result<Regex, NetbootError> {
    Ok(Regex::new(&format!("^(?:{})$", pattern))?)
}

/// Keep the links whose name fully matches `pattern`
pub fn filter_links(all: Vec<Link>, pattern: &str) -> Result<Vec<Link>, NetbootError> {
    let re = interface_matcher(pattern)?;
    Ok(all.into_iter().filter(|l| re.is_match(&l.name)).collect())
}

/// Negotiate, resolve and boot. Only returns on failure or after a
/// successful dry run; a live boot transfers control away.
pub async fn netboot(pattern: &str, dry_run: bool) -> Result<(), NetbootError> {
    // A bad pattern is a configuration error; reject it before
    // touching the platform
    interface_matcher(pattern)?;

    let selected = filter_links(links()?, pattern)?;
    info!(
        pattern = %pattern,
        interfaces = selected.len(),
        "starting DHCP negotiation"
    );

    let deadline = Instant::now() + DHCP_TIMEOUT * DHCP_TRIES;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let results = send_requests(
        selected,
        DHCP_TIMEOUT,
        DHCP_TRIES,
        Protocols::default(),
        cancel_rx,
    );

    run_race(results, cancel_tx, deadline, |lease| {
        boot::boot_lease(lease, dry_run)
    })
    .await
}

/// Consume negotiation results until one boots, the channel drains, or
/// the deadline passes.
///
/// The deadline also bounds the pipeline run on an accepted lease and
/// any resumption after a failed one; accepting a lease does not
/// disarm it.
async fn run_race<F, Fut>(
    mut results: mpsc::Receiver<LeaseResult>,
    cancel: watch::Sender<bool>,
    deadline: Instant,
    mut boot_fn: F,
) -> Result<(), NetbootError>
where
    F: FnMut(Lease) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        let outcome = tokio::select! {
            _ = time::sleep_until(deadline) => {
                return Err(NetbootError::DeadlineExceeded);
            }
            outcome = results.recv() => outcome,
        };

        let LeaseResult { link, result } = match outcome {
            Some(r) => r,
            None => return Err(NetbootError::NothingBootable),
        };

        let lease = match result {
            Ok(lease) => lease,
            Err(e) => {
                debug!(link = %link, error = %e, "negotiation failed");
                continue;
            }
        };

        // First usable lease wins; stop the other negotiations
        let _ = cancel.send(true);
        info!(link = %link, "accepted lease");

        // The pipeline runs under the same deadline as the race, so a
        // hung fetch cannot keep us from failing at the bound
        let booted = tokio::select! {
            _ = time::sleep_until(deadline) => {
                return Err(NetbootError::DeadlineExceeded);
            }
            booted = boot_fn(lease) => booted,
        };

        match booted {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(link = %link, error = %e, "boot failed, waiting for other leases");
            }
        }
    }
}
