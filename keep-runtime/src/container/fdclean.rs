//! CLOEXEC cleanup via `/proc/self/fd` enumeration (spec §4.3 step 13,
//! §5 "File descriptors inherited across the final container `exec`").
//!
//! Unlike the teacher's jailer (`close_inherited_fds_raw`, which closes fds
//! outright via `close_range` before a privileged re-exec), the container
//! init still needs its handshake socket open a little longer, so it marks
//! fds CLOEXEC instead of closing them immediately — they're dropped for
//! free at the final `execve` into the entrypoint.

use std::fs;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::Pid;

use keep_common::{KeepError, KeepResult};

/// Sets `FD_CLOEXEC` on every open fd `>= 3`, skipping any already marked.
pub fn mark_cloexec_from_fd3() -> KeepResult<()> {
    let entries = fs::read_dir("/proc/self/fd")
        .map_err(|e| KeepError::Syscall(format!("failed to enumerate /proc/self/fd: {e}")))?;

    for entry in entries.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Ok(fd) = name.parse::<i32>() else { continue };
        if fd < 3 {
            continue;
        }
        if let Ok(flags) = fcntl(fd, FcntlArg::F_GETFD) {
            let mut flags = FdFlag::from_bits_truncate(flags);
            if !flags.contains(FdFlag::FD_CLOEXEC) {
                flags.insert(FdFlag::FD_CLOEXEC);
                let _ = fcntl(fd, FcntlArg::F_SETFD(flags));
            }
        }
    }
    Ok(())
}

pub fn self_pid() -> Pid {
    nix::unistd::getpid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_without_error_on_a_live_process() {
        mark_cloexec_from_fd3().unwrap();
    }
}
