//! Error types for PXE config resolution

use thiserror::Error;

/// Error type for PXE operations
#[derive(Debug, Error)]
pub enum PxeError {
    /// URL scheme we cannot fetch from
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Malformed or unresolvable URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP fetch failed
    #[error("HTTP fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// TFTP fetch failed
    #[error("TFTP fetch failed: {0}")]
    Tftp(#[from] netboot_tftp::TftpError),

    /// No config file found under any of the probed names
    #[error("no PXE config file found under {dir}")]
    ConfigNotFound { dir: String },

    /// Config file could not be parsed
    #[error("failed to parse PXE config: {0}")]
    Parse(String),

    /// The default entry points at a label that does not exist
    #[error("default entry {0:?} not present in config")]
    NoDefaultEntry(String),

    /// The config names no default entry at all
    #[error("config declares no default entry")]
    MissingDefault,

    /// Local I/O while staging downloaded images
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Handing the entry to kexec failed
    #[error(transparent)]
    Kexec(#[from] netboot_kexec::KexecError),
}

/// Result type for PXE operations
pub type Result<T> = std::result::Result<T, PxeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PxeError::NoDefaultEntry("install".to_string());
        assert_eq!(err.to_string(), "default entry \"install\" not present in config");

        let err = PxeError::ConfigNotFound {
            dir: "tftp://10.0.0.1/pxelinux.cfg/".to_string(),
        };
        assert!(err.to_string().contains("pxelinux.cfg"));
    }
}
