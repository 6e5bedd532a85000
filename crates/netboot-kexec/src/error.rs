use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KexecError {
    #[error("kexec binary not found in PATH")]
    NotAvailable,

    #[error("kexec is disabled (kexec_load_disabled=1)")]
    Disabled,

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: &'static str,
        source: std::io::Error,
    },

    #[error("kexec load of {kernel} failed: {stderr}")]
    LoadFailed { kernel: PathBuf, stderr: String },

    #[error("kexec exec returned (exit code {code:?}): {stderr}")]
    ExecReturned { code: Option<i32>, stderr: String },
}

pub type Result<T> = std::result::Result<T, KexecError>;
