//! Container supervision (spec §4.4 "Supervision", §9 "Subreaper + wait4").
//!
//! After the runtime's `create` returns, the shim reads the container PID
//! from the OCI-written PID file and blocks on `wait4`. This must run on a
//! plain OS thread: a work-stealing async executor offers no guarantee
//! that the thread which issued `wait4` is the one that receives `SIGCHLD`,
//! so the wait is spawned with `std::thread::spawn`, not `tokio::spawn`,
//! and its result handed back to async code over a channel.

use std::path::Path;
use std::sync::Mutex;
use std::sync::Arc;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::sync::oneshot;

use keep_common::{KeepError, KeepResult};

use crate::state::ProcessStatus;

pub fn read_pid_file(path: &Path) -> KeepResult<i32> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| KeepError::Syscall(format!("reading pid file {}: {e}", path.display())))?;
    contents
        .trim()
        .parse()
        .map_err(|e| KeepError::Other(format!("malformed pid file {}: {e}", path.display())))
}

/// Spawns the blocking `wait4` on a dedicated OS thread and returns a
/// future that resolves once the container has exited.
pub fn spawn_wait(
    pid: i32,
    status: Arc<Mutex<ProcessStatus>>,
) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("keep-shim-wait4".into())
        .spawn(move || {
            let result = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::empty()));
            let mut guard = status.lock().unwrap();
            guard.pid = Some(pid);
            guard.exited = true;
            match result {
                Ok(WaitStatus::Exited(_, code)) => {
                    guard.exit_status = Some(code);
                    guard.wait_status = Some(code);
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    guard.exit_status = Some(128 + sig as i32);
                    guard.wait_status = Some(sig as i32);
                }
                Ok(other) => {
                    tracing::warn!(?other, "unexpected wait status");
                }
                Err(e) => {
                    tracing::warn!("wait4 failed: {e}");
                }
            }
            drop(guard);
            let _ = tx.send(());
        })
        .expect("failed to spawn wait4 thread");
    rx
}

/// Runs the optional exit command (spec §4.4 "Supervision" / §6 "Shim CLI
/// surface"): failures are logged-only (spec §6 "Propagation policy").
pub fn run_exit_command(command: &Path, args: &[String]) {
    match std::process::Command::new(command).args(args).status() {
        Ok(status) if !status.success() => {
            tracing::warn!(?status, "exit command exited non-zero");
        }
        Err(e) => {
            tracing::warn!("failed to run exit command {}: {e}", command.display());
        }
        _ => {}
    }
}
