//! Daemonization and sync handshake (spec §4.4 "Daemonization & sync").
//!
//! The shim forks itself. The parent blocks on a sync pipe — a FIFO at
//! `<basedir>/sync-pipe` — for either the token `OK` or an error message,
//! then prints the control-socket path (or relays the error) and exits.
//! The child installs itself as a child subreaper and continues as the
//! daemon; it writes `OK` to the pipe only after the container is created
//! and the HTTP server is listening.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd::{fork, mkfifo, setsid, ForkResult};

use keep_common::{KeepError, KeepResult};

pub enum Role {
    /// The parent waits for the child's readiness signal, then exits.
    Parent,
    /// The child is now the daemon and should continue running the shim.
    Daemon,
}

/// Forks and, in the parent, blocks until the child reports readiness.
///
/// Returns `Role::Parent` after having already printed the control socket
/// path (or relayed an error and set the process up to exit non-zero) —
/// the caller should exit immediately. Returns `Role::Daemon` in the child,
/// which should call [`install_subreaper`] and then [`report_ready`] or
/// [`report_error`] once initialization concludes.
pub fn daemonize(sync_pipe: &Path, control_socket: &Path) -> KeepResult<Role> {
    if !sync_pipe.exists() {
        mkfifo(sync_pipe, Mode::from_bits_truncate(0o600))
            .map_err(|e| KeepError::Syscall(format!("mkfifo {}: {e}", sync_pipe.display())))?;
    }

    match unsafe { fork() }.map_err(|e| KeepError::Syscall(format!("fork: {e}")))? {
        ForkResult::Parent { .. } => {
            let file = std::fs::File::open(sync_pipe)?;
            let mut line = String::new();
            BufReader::new(file).read_line(&mut line)?;
            let line = line.trim_end();
            if line == "OK" {
                println!("{}", control_socket.display());
                Ok(Role::Parent)
            } else {
                eprintln!("{line}");
                Err(KeepError::Other(line.to_string()))
            }
        }
        ForkResult::Child => {
            // Detach from the invoking terminal/session so signals sent to
            // the parent's process group don't reach the daemon.
            let _ = setsid();
            Ok(Role::Daemon)
        }
    }
}

/// `PR_SET_CHILD_SUBREAPER` (spec §4.4 "Subreaper"): orphaned descendants
/// of the container are reparented to this process instead of PID 1.
pub fn install_subreaper() -> KeepResult<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(KeepError::Syscall(format!(
            "prctl(PR_SET_CHILD_SUBREAPER): {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

pub fn report_ready(sync_pipe: &Path) -> KeepResult<()> {
    write_sync_pipe(sync_pipe, "OK")
}

pub fn report_error(sync_pipe: &Path, message: &str) -> KeepResult<()> {
    write_sync_pipe(sync_pipe, message)
}

fn write_sync_pipe(sync_pipe: &Path, line: &str) -> KeepResult<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(sync_pipe)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_pipe_roundtrips_the_ready_token() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = dir.path().join("sync-pipe");
        mkfifo(&pipe, Mode::from_bits_truncate(0o600)).unwrap();

        let reader = {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                let file = std::fs::File::open(&pipe).unwrap();
                let mut line = String::new();
                BufReader::new(file).read_line(&mut line).unwrap();
                line.trim_end().to_string()
            })
        };

        // Give the reader a moment to block on open() before we write.
        std::thread::sleep(std::time::Duration::from_millis(20));
        report_ready(&pipe).unwrap();

        assert_eq!(reader.join().unwrap(), "OK");
    }

    #[test]
    fn sync_pipe_roundtrips_an_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = dir.path().join("sync-pipe");
        mkfifo(&pipe, Mode::from_bits_truncate(0o600)).unwrap();

        let reader = {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                let file = std::fs::File::open(&pipe).unwrap();
                let mut line = String::new();
                BufReader::new(file).read_line(&mut line).unwrap();
                line.trim_end().to_string()
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        report_error(&pipe, "bundle invalid").unwrap();

        assert_eq!(reader.join().unwrap(), "bundle invalid");
    }
}
