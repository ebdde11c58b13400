//! `kill` (spec §4.3 "Kill"): requires `created` or `running`; no status
//! change here — the next `/proc` refresh promotes to `stopped`.

use std::path::Path;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use oci_spec::runtime::ContainerState;

use keep_common::{KeepError, KeepResult};
use keep_spec::state::StateStore;

pub fn kill(root: &Path, id: &str, sig: Signal) -> KeepResult<()> {
    let (_store, on_disk) = StateStore::load(root, id)?;

    match on_disk.status() {
        ContainerState::Created | ContainerState::Running => {}
        other => {
            return Err(KeepError::LifecycleViolation {
                id: id.to_string(),
                status: other.to_string(),
                action: "kill".to_string(),
            })
        }
    }

    let pid = on_disk
        .pid()
        .ok_or_else(|| KeepError::Other(format!("container '{id}' has no recorded pid")))?;

    signal::kill(Pid::from_raw(pid), sig)
        .map_err(|e| KeepError::Syscall(format!("kill({pid}, {sig}) failed: {e}")))?;

    tracing::info!(id, pid, %sig, "sent signal");
    Ok(())
}
