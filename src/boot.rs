//! Boot pipeline for one accepted lease
//!
//! Configure the interface, derive the PXE working directory from the
//! lease's boot URI, find and parse the config, then run (or, in dry
//! mode, describe) the default entry.

use anyhow::{Context, Result};
use netboot_dhcp::Lease;
use netboot_pxe::{BootEntry, Config, DefaultFetcher, Fetcher};
use tracing::info;
use url::Url;

/// Run the full boot pipeline on one lease. Returns normally only in
/// dry-run mode; a live boot hands control to the new kernel.
pub async fn boot_lease(lease: Lease, dry_run: bool) -> Result<()> {
    info!(lease = %lease, "booting from lease");

    lease
        .configure()
        .await
        .with_context(|| format!("configuring {}", lease.link()))?;

    let uri = lease.boot_uri().context("resolving boot URI")?;
    let wd = working_directory(&uri)?;
    info!(boot_uri = %uri, working_dir = %wd, "resolved boot location");

    let fetcher = DefaultFetcher::new();
    let mut config = Config::new(wd);
    config
        .find_config_file(&fetcher, &lease.link().mac, lease.ipv4())
        .await
        .context("locating PXE config")?;

    let entry = config.default_boot_entry()?;
    info!(entry = %entry, "selected default entry");

    run_entry(entry, &fetcher, dry_run).await
}

/// Run (or, in dry mode, only describe) one boot entry. The dry path
/// must never reach the control-transferring execute call.
async fn run_entry(entry: &BootEntry, fetcher: &dyn Fetcher, dry_run: bool) -> Result<()> {
    if dry_run {
        entry.execution_info();
        return Ok(());
    }

    match entry.execute(fetcher).await {
        Ok(never) => match never {},
        Err(e) => Err(e).with_context(|| format!("executing entry {}", entry.name)),
    }
}

/// Directory containing the boot file, used to resolve relative paths
/// in the PXE config
fn working_directory(boot_uri: &Url) -> Result<Url> {
    boot_uri
        .join(".")
        .with_context(|| format!("deriving working directory from {}", boot_uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use netboot_pxe::PxeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher that counts requests and refuses them all
    struct CountingFetcher {
        fetches: AtomicUsize,
    }

    impl CountingFetcher {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, url: &Url) -> netboot_pxe::Result<Bytes> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Err(PxeError::UnsupportedScheme(url.scheme().to_string()))
        }
    }

    fn entry() -> BootEntry {
        BootEntry {
            name: "install".to_string(),
            kernel: Url::parse("tftp://192.168.0.2/boot/vmlinuz").unwrap(),
            initrd: None,
            cmdline: "console=ttyS0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_downloads_or_executes() {
        let fetcher = CountingFetcher::new();
        let result = run_entry(&entry(), &fetcher, true).await;

        assert!(result.is_ok());
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_run_reaches_the_execute_path() {
        let fetcher = CountingFetcher::new();
        let result = run_entry(&entry(), &fetcher, false).await;

        // The kernel download is the first step of execute; its
        // failure surfaces as the pipeline error
        assert!(result.is_err());
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_working_directory_strips_filename() {
        let uri = Url::parse("tftp://192.168.0.2/boot/bios/pxelinux.0").unwrap();
        assert_eq!(
            working_directory(&uri).unwrap().as_str(),
            "tftp://192.168.0.2/boot/bios/"
        );
    }

    #[test]
    fn test_working_directory_of_root_file() {
        let uri = Url::parse("tftp://192.168.0.2/pxelinux.0").unwrap();
        assert_eq!(
            working_directory(&uri).unwrap().as_str(),
            "tftp://192.168.0.2/"
        );
    }

    #[test]
    fn test_working_directory_http() {
        let uri = Url::parse("http://boot.example.com/dir/sub/boot.cfg").unwrap();
        assert_eq!(
            working_directory(&uri).unwrap().as_str(),
            "http://boot.example.com/dir/sub/"
        );
    }
}
