//! Kexec wrapper for handing control to a downloaded kernel
//!
//! Shells out to kexec-tools: `kexec -l` stages the kernel and initrd,
//! `kexec -e` jumps into them. Executing never returns to this kernel
//! on success, so [`execute`] can only produce an error.

pub mod error;

pub use error::{KexecError, Result};

use std::convert::Infallible;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

/// Whether a kexec binary is on PATH
pub async fn is_available() -> bool {
    Command::new("which")
        .arg("kexec")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Verify kexec can be used on this kernel.
///
/// `kexec_load_disabled` is a one-way toggle; we try to clear it but
/// that only works if nothing set it since boot.
pub async fn check_prerequisites() -> Result<()> {
    if !is_available().await {
        return Err(KexecError::NotAvailable);
    }

    match tokio::fs::read_to_string("/proc/sys/kernel/kexec_load_disabled").await {
        Ok(content) if content.trim() == "1" => {
            warn!("kexec_load_disabled=1, attempting to clear");
            if tokio::fs::write("/proc/sys/kernel/kexec_load_disabled", "0")
                .await
                .is_err()
            {
                return Err(KexecError::Disabled);
            }
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(_) => {
            warn!("could not read kexec_load_disabled, kexec may be unsupported");
            Ok(())
        }
    }
}

/// Stage a kernel (and optional initrd) for execution
pub async fn load(kernel: &Path, initrd: Option<&Path>, cmdline: &str) -> Result<()> {
    info!(
        kernel = %kernel.display(),
        initrd = ?initrd.map(Path::display),
        cmdline = %cmdline,
        "loading kernel with kexec"
    );

    let mut cmd = Command::new("kexec");
    cmd.arg("-l").arg(kernel);
    if let Some(initrd) = initrd {
        cmd.arg("--initrd").arg(initrd);
    }
    cmd.arg("--append").arg(cmdline);

    let output = cmd.output().await.map_err(|source| KexecError::Spawn {
        command: "kexec -l",
        source,
    })?;

    if !output.status.success() {
        return Err(KexecError::LoadFailed {
            kernel: kernel.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!("kernel loaded");
    Ok(())
}

/// Jump into the staged kernel. Does not return on success.
pub async fn execute() -> Result<Infallible> {
    // Flush dirty pages; the new kernel won't do it for us
    let _ = Command::new("sync").output().await;

    info!("executing staged kernel");
    let output = Command::new("kexec")
        .arg("-e")
        .output()
        .await
        .map_err(|source| KexecError::Spawn {
            command: "kexec -e",
            source,
        })?;

    // Reaching this point means the jump did not happen
    Err(KexecError::ExecReturned {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_is_available_does_not_panic() {
        let _ = is_available().await;
    }
}
