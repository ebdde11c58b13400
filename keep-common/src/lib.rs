//! Shared code for the keep container stack: runtime, shim, and manager.
//!
//! This crate carries only what all three tiers need: the error type, the
//! on-disk root-directory layout, and a logging bootstrap. It deliberately
//! does not know about OCI spec types (see `keep-spec`) or the IPC wire
//! format (see `keep-ipc`).

pub mod error;
pub mod layout;
pub mod logging;

pub use error::{KeepError, KeepResult};

/// Sentinel line on the stdin FIFO (spec §4.4, §9): the documented wart
/// that stands in for actually closing the pipe. Shared between `keep-shim`
/// (which breaks its forward loop on this line) and `keep-manager`'s
/// attach path (which writes it once the user's own stdin reaches EOF).
pub const STDIN_EOF_SENTINEL: &str = "THIS_IS_NOT_HOW_WE_SHOULD_CLOSE_A_PIPE";
