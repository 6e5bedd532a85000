//! netboot: PXE-style network boot client
//!
//! Races DHCP negotiations across the selected interfaces, resolves a
//! PXELINUX config from the first usable lease, and kexecs into the
//! default boot entry.

mod boot;
mod netboot;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Regex the interface name must fully match
    #[arg(default_value = "eth0")]
    interface: String,

    /// Resolve and download the boot entry but do not kexec
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = netboot::netboot(&args.interface, args.dry_run).await {
        error!(error = %e, "netboot failed");
        return Err(e.into());
    }

    Ok(())
}
