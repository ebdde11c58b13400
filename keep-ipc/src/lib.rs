//! The runtime's handshake channel: a tiny framed protocol over Unix stream
//! sockets used purely as ordered synchronization tokens between the host
//! and container roles of a single `create` invocation (spec §4.2, §9 —
//! "Handshake tokens as a tiny protocol, not RPC").
//!
//! Every token is a fixed ASCII message; `await_message` reads exactly
//! `expected.len()` bytes and rejects anything but an exact match, which is
//! what gives the bring-up its happens-before guarantees (spec §5).

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use keep_common::{KeepError, KeepResult};

/// The kernel's `sun_path` limit, including the terminating NUL.
const MAX_SOCKET_PATH_LEN: usize = 108;

/// Sum-typed handshake vocabulary (spec §9: "should be a sum-typed
/// `HandshakeMessage` enum with explicit ordering between the host and
/// container state machines").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    ContainerBooted,
    ContainerBeforePivot,
    ContainerWaitStart,
    StartContainer,
    Ok,
    Error(String),
}

impl HandshakeMessage {
    fn as_wire(&self) -> String {
        match self {
            HandshakeMessage::ContainerBooted => "container-booted".to_string(),
            HandshakeMessage::ContainerBeforePivot => "container-before-pivot".to_string(),
            HandshakeMessage::ContainerWaitStart => "container-wait-start".to_string(),
            HandshakeMessage::StartContainer => "start-container".to_string(),
            HandshakeMessage::Ok => "ok".to_string(),
            HandshakeMessage::Error(msg) => msg.clone(),
        }
    }
}

/// Validates a candidate Unix socket path per spec §4.2: non-empty, within
/// the kernel's 108-byte `sun_path` limit, and (when `must_exist`) present
/// on disk.
pub fn validate_socket_path(path: &Path, must_exist: bool) -> KeepResult<()> {
    let s = path
        .to_str()
        .ok_or_else(|| KeepError::Ipc(format!("socket path {path:?} is not valid UTF-8")))?;
    if s.is_empty() {
        return Err(KeepError::Ipc("socket path must not be empty".into()));
    }
    if s.len() >= MAX_SOCKET_PATH_LEN {
        return Err(KeepError::Ipc(format!(
            "socket path '{s}' is {} bytes, exceeds the {MAX_SOCKET_PATH_LEN}-byte sun_path limit",
            s.len()
        )));
    }
    if must_exist && !path.exists() {
        return Err(KeepError::Ipc(format!("socket path '{s}' does not exist")));
    }
    Ok(())
}

/// Binds a listening Unix socket at `path`, removing a stale socket file
/// first (sockets from a prior, crashed bring-up leave one behind).
pub fn bind(path: &Path) -> KeepResult<UnixListener> {
    validate_socket_path(path, false)?;
    let _ = std::fs::remove_file(path);
    UnixListener::bind(path).map_err(|source| KeepError::Transport {
        path: path.to_path_buf(),
        source,
    })
}

pub fn connect(path: &Path) -> KeepResult<UnixStream> {
    validate_socket_path(path, true)?;
    UnixStream::connect(path).map_err(|source| KeepError::Transport {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads exactly `expected`'s length worth of bytes and fails unless the
/// bytes match exactly. Any mismatch aborts the caller's bring-up.
pub fn await_message(conn: &mut UnixStream, expected: &HandshakeMessage) -> KeepResult<()> {
    let wire = expected.as_wire();
    let mut buf = vec![0u8; wire.len()];
    conn.read_exact(&mut buf)
        .map_err(|e| KeepError::Ipc(format!("short read awaiting '{wire}': {e}")))?;
    let got = String::from_utf8_lossy(&buf);
    if got != wire {
        return Err(KeepError::Ipc(format!(
            "received unexpected message: expected '{wire}', got '{got}'"
        )));
    }
    Ok(())
}

/// Like [`await_message`], but accepts any of several possible messages and
/// returns which one arrived (used by the host's error path: a `kill`/error
/// string is itself a valid, if unwelcome, response).
pub fn await_one_of(conn: &mut UnixStream, max_len: usize) -> KeepResult<String> {
    let mut buf = vec![0u8; max_len];
    let n = conn
        .read(&mut buf)
        .map_err(|e| KeepError::Ipc(format!("read failed: {e}")))?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

pub fn send_message(conn: &mut UnixStream, msg: &HandshakeMessage) -> KeepResult<()> {
    let wire = msg.as_wire();
    conn.write_all(wire.as_bytes())
        .map_err(|e| KeepError::Ipc(format!("failed to send '{wire}': {e}")))
}

/// Sends an open file descriptor (the PTY master) over `conn` via
/// `SCM_RIGHTS`, on the console socket the caller supplied (spec §4.2).
pub fn send_fd(conn: &UnixStream, fd: RawFd) -> KeepResult<()> {
    use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
    use std::io::IoSlice;

    let payload = [0u8; 1];
    let iov = [IoSlice::new(&payload)];
    let fds = [fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(conn.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| KeepError::Ipc(format!("failed to send fd via SCM_RIGHTS: {e}")))?;
    Ok(())
}

/// Receives a single file descriptor sent with [`send_fd`].
pub fn recv_fd(conn: &UnixStream) -> KeepResult<OwnedFd> {
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, UnixAddr};
    use std::io::IoSliceMut;

    let mut buf = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<UnixAddr>(
        conn.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_space),
        MsgFlags::empty(),
    )
    .map_err(|e| KeepError::Ipc(format!("failed to receive fd via SCM_RIGHTS: {e}")))?;

    for cmsg in msg.cmsgs().map_err(|e| KeepError::Ipc(e.to_string()))? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
    Err(KeepError::Ipc("no fd received via SCM_RIGHTS".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as StdUnixStream;

    #[test]
    fn rejects_oversized_socket_path() {
        let long = "/tmp/".to_string() + &"x".repeat(120) + ".sock";
        let err = validate_socket_path(Path::new(&long), false).unwrap_err();
        assert!(matches!(err, KeepError::Ipc(_)));
    }

    #[test]
    fn handshake_roundtrips_over_a_real_socket() {
        let (mut a, mut b) = StdUnixStream::pair().unwrap();
        send_message(&mut a, &HandshakeMessage::ContainerBooted).unwrap();
        await_message(&mut b, &HandshakeMessage::ContainerBooted).unwrap();
    }

    #[test]
    fn mismatched_message_is_rejected() {
        let (mut a, mut b) = StdUnixStream::pair().unwrap();
        send_message(&mut a, &HandshakeMessage::ContainerBooted).unwrap();
        let err = await_message(&mut b, &HandshakeMessage::ContainerBeforePivot).unwrap_err();
        assert!(matches!(err, KeepError::Ipc(_)));
    }

    #[test]
    fn fd_passing_roundtrips() {
        let (a, b) = StdUnixStream::pair().unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let f = std::fs::File::open(tmp.path()).unwrap();
        send_fd(&a, f.as_raw_fd()).unwrap();
        let received = recv_fd(&b).unwrap();
        assert!(received.as_raw_fd() >= 0);
    }
}
