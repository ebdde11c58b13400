//! Terminal mode (spec §4.4 "Console/PTY mode"): the shim listens on
//! `console.sock`, passes it to the runtime as `--console-socket`, accepts
//! one connection, receives the PTY master fd over `SCM_RIGHTS`, and
//! splices it bidirectionally against the stdin/stdout FIFOs. No log file
//! is written in this mode — a PTY interleaves both streams with no way to
//! attribute a byte to stdout or stderr.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::thread;

use keep_common::{KeepError, KeepResult};
use keep_ipc::recv_fd;

use crate::stdio::Fifos;

pub fn listen(console_sock: &Path) -> KeepResult<UnixListener> {
    keep_ipc::bind(console_sock)
}

/// Accepts the runtime's single connection and returns the PTY master fd.
pub fn accept_master(listener: &UnixListener) -> KeepResult<OwnedFd> {
    let (conn, _) = listener
        .accept()
        .map_err(|e| KeepError::Ipc(format!("accepting console connection: {e}")))?;
    recv_fd(&conn)
}

/// Splices the PTY master against the stdin/stdout FIFOs on dedicated
/// threads. Blocks until both directions reach EOF.
pub fn splice(master: OwnedFd, fifos: &Fifos) -> KeepResult<()> {
    let stdin_fifo = Fifos::open_rdwr(&fifos.stdin)?;
    let stdout_fifo = Fifos::open_rdwr(&fifos.stdout)?;
    let master_fd = master.as_raw_fd();

    let to_master = thread::Builder::new()
        .name("keep-shim-pty-in".into())
        .spawn(move || pump(stdin_fifo.as_raw_fd(), master_fd))
        .expect("failed to spawn pty input thread");

    let from_master = thread::Builder::new()
        .name("keep-shim-pty-out".into())
        .spawn(move || pump(master_fd, stdout_fifo.as_raw_fd()))
        .expect("failed to spawn pty output thread");

    let _ = from_master.join();
    let _ = to_master.join();
    // `master` (and its fifo `File`s) are dropped here, after both pump
    // threads — which hold raw copies of the fds, not the owned handles —
    // have finished using them.
    drop(master);
    Ok(())
}

/// Plain `read(2)`/`write(2)` on raw fds: the FIFOs and the PTY master are
/// handed across threads as bare ints precisely so none of them needs an
/// owning wrapper with its own opinion about when to close.
fn pump(from: RawFd, to: RawFd) {
    let mut buf = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(from, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        let n = n as usize;
        let mut written = 0;
        while written < n {
            let w = unsafe {
                libc::write(
                    to,
                    buf[written..n].as_ptr() as *const libc::c_void,
                    n - written,
                )
            };
            if w <= 0 {
                return;
            }
            written += w as usize;
        }
    }
}
