//! Stdio plumbing (spec §4.4 "Stdio plumbing"): three FIFOs named `0`, `1`,
//! `2`, kept open `O_RDWR`; stdout/stderr fan out to both the JSON-framed
//! log file and the matching FIFO; stdin scans the FIFO and forwards to
//! the runtime's stdin pipe, ended by the documented EOF sentinel.
//!
//! The runtime's `create` subprocess is spawned here directly (not through
//! `RuntimeClient`) because its piped stdout/stderr stay open long after
//! that subprocess itself exits — the container process, reparented to
//! this shim, holds its own duplicate of the same pipe write end (spec
//! §4.3 step 5, "inherit stdio"). `Command::output()` would block waiting
//! for that pipe to reach EOF, which only happens when the container
//! itself exits; `spawn()` plus a plain `wait()` on the exit status avoids
//! that.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use keep_common::layout::ContainerLayout;
use keep_common::{KeepError, KeepResult};

use crate::log::{LogWriter, Stream};

pub use keep_common::STDIN_EOF_SENTINEL;

pub struct Fifos {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl Fifos {
    /// Uses `stdio_dir` when the CLI override (`--stdio-dir`) is set,
    /// otherwise the container's own directory in `layout`.
    pub fn create(layout: &ContainerLayout, stdio_dir: Option<&Path>) -> KeepResult<Self> {
        let dir = match stdio_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.to_path_buf()
            }
            None => {
                layout.prepare()?;
                layout.root().to_path_buf()
            }
        };
        let fifos = Self {
            stdin: dir.join("0"),
            stdout: dir.join("1"),
            stderr: dir.join("2"),
        };
        for path in [&fifos.stdin, &fifos.stdout, &fifos.stderr] {
            if !path.exists() {
                mkfifo(path, Mode::from_bits_truncate(0o620))
                    .map_err(|e| KeepError::Syscall(format!("mkfifo {}: {e}", path.display())))?;
            }
        }
        Ok(fifos)
    }

    /// Opens a FIFO `O_RDWR`: spec §4.4 notes this is deliberate — it gives
    /// non-blocking semantics without either end blocking on the other's
    /// absence (a read-only open would block until a writer appears).
    pub fn open_rdwr(path: &Path) -> KeepResult<std::fs::File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| KeepError::Syscall(format!("open {} O_RDWR: {e}", path.display())))
    }
}

pub fn spawn_create(binary: &str, args: &[String]) -> KeepResult<Child> {
    Command::new(binary)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| KeepError::RuntimeInvocation(format!("failed to spawn runtime create: {e}")))
}

pub struct LogStreamThreads {
    stdout: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
    stdin: Option<JoinHandle<()>>,
}

impl LogStreamThreads {
    pub fn spawn(
        stdout: ChildStdout,
        stderr: ChildStderr,
        stdin: Option<ChildStdin>,
        fifos: &Fifos,
        log: Arc<LogWriter>,
    ) -> KeepResult<Self> {
        let stdout_fifo = Fifos::open_rdwr(&fifos.stdout)?;
        let stderr_fifo = Fifos::open_rdwr(&fifos.stderr)?;
        let stdin_fifo = Fifos::open_rdwr(&fifos.stdin)?;

        let log_out = log.clone();
        let out_thread = thread::Builder::new()
            .name("keep-shim-stdout".into())
            .spawn(move || fan_out(stdout, stdout_fifo, Stream::Stdout, log_out))
            .map_err(|e| KeepError::Other(e.to_string()))?;

        let log_err = log.clone();
        let err_thread = thread::Builder::new()
            .name("keep-shim-stderr".into())
            .spawn(move || fan_out(stderr, stderr_fifo, Stream::Stderr, log_err))
            .map_err(|e| KeepError::Other(e.to_string()))?;

        let stdin_thread = stdin.map(|runtime_stdin| {
            thread::Builder::new()
                .name("keep-shim-stdin".into())
                .spawn(move || forward_stdin(stdin_fifo, runtime_stdin))
                .expect("failed to spawn stdin forwarder")
        });

        Ok(Self {
            stdout: Some(out_thread),
            stderr: Some(err_thread),
            stdin: stdin_thread,
        })
    }

    pub fn join(mut self) {
        if let Some(h) = self.stdout.take() {
            let _ = h.join();
        }
        if let Some(h) = self.stderr.take() {
            let _ = h.join();
        }
        if let Some(h) = self.stdin.take() {
            let _ = h.join();
        }
    }
}

fn fan_out<R: std::io::Read>(
    source: R,
    mut fifo: std::fs::File,
    stream: Stream,
    log: Arc<LogWriter>,
) {
    let reader = BufReader::new(source);
    for line in reader.lines().map_while(Result::ok) {
        log.append(stream.clone(), &line);
        let _ = writeln!(fifo, "{line}");
    }
}

fn forward_stdin(fifo: std::fs::File, mut runtime_stdin: ChildStdin) {
    let reader = BufReader::new(fifo);
    for line in reader.lines().map_while(Result::ok) {
        if line == STDIN_EOF_SENTINEL {
            break;
        }
        if writeln!(runtime_stdin, "{line}").is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn create_makes_three_fifos_in_the_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ContainerLayout::new(dir.path(), "unused");
        let stdio_dir = dir.path().join("stdio");

        let fifos = Fifos::create(&layout, Some(&stdio_dir)).unwrap();

        for path in [&fifos.stdin, &fifos.stdout, &fifos.stderr] {
            let meta = std::fs::metadata(path).unwrap();
            assert!(meta.file_type().is_fifo());
        }
        assert_eq!(fifos.stdin, stdio_dir.join("0"));
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ContainerLayout::new(dir.path(), "c1");

        Fifos::create(&layout, None).unwrap();
        // Re-running against an already-populated directory must not fail.
        Fifos::create(&layout, None).unwrap();
    }
}
