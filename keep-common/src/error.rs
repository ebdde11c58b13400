//! The error taxonomy shared by every tier of the stack.
//!
//! Variants are grouped by *kind*, not by which crate raised them, so that a
//! CLI edge can map any error to one of the three documented exit codes
//! without needing to know which internal component failed.

use std::path::PathBuf;

pub type KeepResult<T> = Result<T, KeepError>;

#[derive(thiserror::Error, Debug)]
pub enum KeepError {
    /// Bundle or runtime spec failed validation (missing bundle, unsupported
    /// namespace, malformed config.json, ...).
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// A mount/unmount/pivot_root/clone/sethostname syscall failed.
    #[error("system call failed: {0}")]
    Syscall(String),

    /// The handshake channel saw something other than the expected token.
    #[error("ipc error: {0}")]
    Ipc(String),

    /// A lifecycle transition was attempted from an invalid status (e.g.
    /// `start` on a container that was never `created`).
    #[error("container {id} is {status}, cannot {action}")]
    LifecycleViolation {
        id: String,
        status: String,
        action: String,
    },

    /// The runtime subprocess (or its CLI invocation) failed or reported
    /// that the container does not exist.
    #[error("runtime invocation failed: {0}")]
    RuntimeInvocation(String),

    /// `process.args[0]` could not be resolved on `PATH` inside the
    /// container. Carries the exit code (127) a CLI edge should propagate.
    #[error("failed to retrieve executable path for '{0}': not found in $PATH")]
    ExecutableNotFound(String),

    /// Failed to dial or listen on a Unix socket.
    #[error("transport error on {path}: {source}")]
    Transport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl KeepError {
    /// Maps this error to the process exit code documented in spec §6.
    ///
    /// 127 distinguishes "your program does not exist" from the generic
    /// 125 ("you asked for the impossible"). Manager-internal failures use
    /// 126; that code is assigned by the manager CLI itself, not here.
    pub fn exit_code(&self) -> i32 {
        match self {
            KeepError::ExecutableNotFound(_) => 127,
            _ => 125,
        }
    }
}
