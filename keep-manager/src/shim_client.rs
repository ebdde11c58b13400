//! A small HTTP-over-Unix client in front of `keep-shim`'s control API
//! (spec §4.5 "Client facade to the shim", §6 "Shim HTTP API").
//!
//! No hyper client wiring here: `hyper-util` only appears server-side in
//! this stack (the shim's own control server); a one-shot manager CLI
//! invocation exchanging a handful of requests is squarely in the "tiny
//! protocol, not RPC" territory `keep-ipc` already established for the
//! runtime handshake, so the request/response framing is hand-rolled
//! directly over the socket instead of pulling in a client-side HTTP stack.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keep_common::{KeepError, KeepResult};

pub struct ShimClient {
    sock: PathBuf,
}

struct HttpResponse {
    status: u16,
    body: Vec<u8>,
}

impl ShimClient {
    pub fn new(sock: PathBuf) -> Self {
        Self { sock }
    }

    fn request(&self, method: &str, path: &str, form_body: Option<&str>) -> KeepResult<HttpResponse> {
        keep_ipc::validate_socket_path(&self.sock, true)?;
        let mut conn = UnixStream::connect(&self.sock)
            .map_err(|e| KeepError::Transport { path: self.sock.clone(), source: e })?;
        conn.set_read_timeout(Some(Duration::from_secs(30))).ok();

        let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
        if let Some(body) = form_body {
            request.push_str("Content-Type: application/x-www-form-urlencoded\r\n");
            request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            request.push_str(body);
        } else {
            request.push_str("\r\n");
        }

        conn.write_all(request.as_bytes())
            .map_err(|e| KeepError::Ipc(format!("failed to write request: {e}")))?;
        conn.shutdown(std::net::Shutdown::Write).ok();

        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).map_err(|e| KeepError::Ipc(format!("failed to read response: {e}")))?;
        parse_response(&raw)
    }

    pub fn get_state(&self) -> KeepResult<serde_json::Value> {
        let resp = self.request("GET", "/", None)?;
        ensure_ok(&resp)?;
        serde_json::from_slice(&resp.body).map_err(KeepError::from)
    }

    pub fn start_container(&self) -> KeepResult<()> {
        let resp = self.request("POST", "/", Some("cmd=start"))?;
        ensure_ok(&resp)
    }

    /// SIGTERM, wait ~1s, escalate to SIGKILL if the container hasn't
    /// reached `stopped` (spec §4.5, §5 "fixed one-second post-SIGTERM
    /// wait before escalating").
    pub fn stop_container(&self) -> KeepResult<()> {
        self.request("POST", "/", Some("cmd=kill&signal=15"))?;
        std::thread::sleep(Duration::from_secs(1));

        let status = self
            .get_state()
            .ok()
            .and_then(|v| v.pointer("/state/status").and_then(|s| s.as_str()).map(str::to_string))
            .unwrap_or_default();
        if status != "stopped" {
            self.request("POST", "/", Some("cmd=kill&signal=9"))?;
        }
        Ok(())
    }

    pub fn delete_container(&self) -> KeepResult<()> {
        let resp = self.request("POST", "/", Some("cmd=delete"))?;
        ensure_deleted(&resp)
    }

    /// Delete + cleanup + `DELETE /`: tears the shim itself down (spec
    /// §4.5, §6).
    pub fn terminate(&self) -> KeepResult<()> {
        let _ = self.delete_container();
        let resp = self.request("DELETE", "/", None)?;
        ensure_ok(&resp)
    }

    /// Reads the shim's framed log file, optionally prefixing each line
    /// with its timestamp (spec §4.5, SUPPLEMENTED FEATURES "timestamp
    /// prefixing").
    pub fn copy_logs(&self, with_timestamps: bool, out: &mut dyn Write) -> KeepResult<()> {
        let resp = self.request("GET", "/logs", None)?;
        ensure_ok(&resp)?;
        for line in resp.body.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            let value: serde_json::Value = serde_json::from_slice(line).map_err(KeepError::from)?;
            let message = value.get("m").and_then(|v| v.as_str()).unwrap_or_default();
            if with_timestamps {
                let ts = value.get("t").and_then(|v| v.as_str()).unwrap_or_default();
                let _ = writeln!(out, "{ts} {message}");
            } else {
                let _ = writeln!(out, "{message}");
            }
        }
        Ok(())
    }

    /// Opens the container's stdio FIFOs and pumps them against the
    /// process's own stdin/stdout/stderr (spec §4.5 "Attach opens the
    /// three stdio FIFOs ... otherwise two goroutine-equivalents pump
    /// stdout/stderr"); in TTY mode the caller's terminal is switched to
    /// raw mode first.
    pub fn attach(
        &self,
        fifo_dir: &Path,
        want_stdin: bool,
        want_stdout: bool,
        want_stderr: bool,
        tty: bool,
    ) -> KeepResult<()> {
        let _raw_guard = if tty { Some(RawModeGuard::enable()?) } else { None };

        let mut handles: Vec<std::thread::JoinHandle<()>> = Vec::new();
        if want_stdout {
            let fifo = open_fifo_rdwr(&fifo_dir.join("1"))?;
            handles.push(std::thread::spawn(move || pump(fifo, std::io::stdout())));
        }
        if want_stderr {
            let fifo = open_fifo_rdwr(&fifo_dir.join("2"))?;
            handles.push(std::thread::spawn(move || pump(fifo, std::io::stderr())));
        }
        if want_stdin {
            let fifo = open_fifo_rdwr(&fifo_dir.join("0"))?;
            handles.push(std::thread::spawn(move || forward_stdin(fifo)));
        }
        for h in handles {
            let _ = h.join();
        }
        Ok(())
    }
}

fn open_fifo_rdwr(path: &Path) -> KeepResult<std::fs::File> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| KeepError::Syscall(format!("open {} O_RDWR: {e}", path.display())))
}

fn pump<R: Read, W: Write>(mut from: R, mut to: W) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if to.write_all(&buf[..n]).is_err() {
            return;
        }
        let _ = to.flush();
    }
}

fn forward_stdin(mut fifo: std::fs::File) {
    let mut line = String::new();
    loop {
        line.clear();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => {
                let _ = writeln!(fifo, "{}", keep_common::STDIN_EOF_SENTINEL);
                return;
            }
            Ok(_) => {
                if write!(fifo, "{line}").is_err() {
                    return;
                }
            }
        }
    }
}

/// Switches the controlling terminal to raw mode for the lifetime of the
/// guard, restoring the original settings on drop.
struct RawModeGuard {
    original: nix::sys::termios::Termios,
}

impl RawModeGuard {
    fn enable() -> KeepResult<Self> {
        use nix::sys::termios::{tcgetattr, tcsetattr, SetArg};
        use std::os::fd::AsFd;

        let stdin = std::io::stdin();
        let original = tcgetattr(stdin.as_fd()).map_err(|e| KeepError::Syscall(format!("tcgetattr: {e}")))?;
        let mut raw = original.clone();
        nix::sys::termios::cfmakeraw(&mut raw);
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)
            .map_err(|e| KeepError::Syscall(format!("tcsetattr: {e}")))?;
        Ok(Self { original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        use nix::sys::termios::{tcsetattr, SetArg};
        use std::os::fd::AsFd;
        let _ = tcsetattr(std::io::stdin().as_fd(), SetArg::TCSANOW, &self.original);
    }
}

fn parse_response(raw: &[u8]) -> KeepResult<HttpResponse> {
    let header_end = find_subslice(raw, b"\r\n\r\n")
        .ok_or_else(|| KeepError::Ipc("malformed HTTP response: no header terminator".into()))?;
    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");

    let status_line = lines.next().ok_or_else(|| KeepError::Ipc("empty HTTP response".into()))?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| KeepError::Ipc(format!("malformed status line: '{status_line}'")))?;

    let body = raw[header_end + 4..].to_vec();
    Ok(HttpResponse { status, body })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn ensure_ok(resp: &HttpResponse) -> KeepResult<()> {
    if resp.status == 200 {
        return Ok(());
    }
    Err(KeepError::RuntimeInvocation(format!(
        "shim returned {}: {}",
        resp.status,
        String::from_utf8_lossy(&resp.body).trim()
    )))
}

fn ensure_deleted(resp: &HttpResponse) -> KeepResult<()> {
    if resp.status == 204 {
        return Ok(());
    }
    Err(KeepError::RuntimeInvocation(format!(
        "shim returned {}: {}",
        resp.status,
        String::from_utf8_lossy(&resp.body).trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_body() {
        let raw = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\r\n{\"a\":1}";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"{\"a\":1}");
    }

    #[test]
    fn ensure_ok_rejects_non_200() {
        let resp = HttpResponse { status: 400, body: b"bad\n".to_vec() };
        let err = ensure_ok(&resp).unwrap_err();
        assert!(matches!(err, KeepError::RuntimeInvocation(_)));
    }

    #[test]
    fn ensure_deleted_accepts_204_only() {
        assert!(ensure_deleted(&HttpResponse { status: 204, body: vec![] }).is_ok());
        assert!(ensure_deleted(&HttpResponse { status: 200, body: vec![] }).is_err());
    }
}
