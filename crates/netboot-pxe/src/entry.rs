//! Boot entry execution
//!
//! A [`BootEntry`] is one bootable label from a PXE config: kernel,
//! optional initrd, and command line, all resolved to absolute URLs.
//! Executing it downloads the images to a staging directory, loads
//! them with kexec and transfers control.

use crate::error::{PxeError, Result};
use crate::fetch::Fetcher;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;
use url::Url;

/// One bootable label from a PXE config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub name: String,
    pub kernel: Url,
    pub initrd: Option<Url>,
    pub cmdline: String,
}

impl BootEntry {
    /// Log what booting this entry would do, without doing it
    pub fn execution_info(&self) {
        info!(entry = %self.name, kernel = %self.kernel, "would kexec");
        if let Some(ref initrd) = self.initrd {
            info!(entry = %self.name, initrd = %initrd, "would load initrd");
        }
        info!(entry = %self.name, cmdline = %self.cmdline, "would append");
    }

    /// Download the entry's images and kexec into them.
    ///
    /// On success control never returns to this kernel, so the only
    /// value this can produce is an error.
    pub async fn execute(&self, fetcher: &dyn Fetcher) -> Result<Infallible> {
        let staging = tempfile::tempdir()?;

        let kernel_path = self
            .download(fetcher, &self.kernel, staging.path().join("kernel"))
            .await?;
        let initrd_path = match self.initrd {
            Some(ref initrd) => Some(
                self.download(fetcher, initrd, staging.path().join("initrd"))
                    .await?,
            ),
            None => None,
        };

        netboot_kexec::check_prerequisites().await?;
        netboot_kexec::load(&kernel_path, initrd_path.as_deref(), &self.cmdline).await?;
        Ok(netboot_kexec::execute().await?)
    }

    async fn download(
        &self,
        fetcher: &dyn Fetcher,
        url: &Url,
        dest: PathBuf,
    ) -> Result<PathBuf> {
        info!(entry = %self.name, url = %url, dest = %dest.display(), "downloading");
        let body = fetcher.fetch(url).await?;
        fs::write(&dest, &body).await?;
        Ok(dest)
    }
}

impl fmt::Display for BootEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: kernel={}", self.name, self.kernel)?;
        if let Some(ref initrd) = self.initrd {
            write!(f, " initrd={}", initrd)?;
        }
        if !self.cmdline.is_empty() {
            write!(f, " cmdline={:?}", self.cmdline)?;
        }
        Ok(())
    }
}
