//! Per-container daemonized supervisor (spec §4.4, §6 "Shim CLI surface").
//!
//! Forks itself, reports readiness over a sync pipe, invokes the runtime's
//! `create`, owns the container's stdio (FIFOs or a PTY), reaps the
//! container with a pinned-thread `wait4`, and exposes the control API
//! documented in [`http`].

mod cli;
mod daemon;
mod http;
mod log;
mod pty_console;
mod runtime_client;
mod state;
mod stdio;
mod supervise;

use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;
use nix::unistd::dup2;

use keep_common::layout::{default_root, ContainerLayout};
use keep_common::logging::{self, LogFormat};
use keep_common::{KeepError, KeepResult};

use cli::ShimArgs;
use log::LogWriter;
use runtime_client::RuntimeClient;
use state::ProcessStatus;

fn main() {
    let args = ShimArgs::parse();
    let root = args
        .root
        .clone()
        .unwrap_or_else(|| default_root("keep-shim"));
    let layout = ContainerLayout::new(&root, &args.container_id);

    if let Err(e) = layout.prepare() {
        eprintln!("failed to prepare container directory: {e}");
        std::process::exit(125);
    }

    let role = match daemon::daemonize(&layout.sync_pipe(), &layout.shim_sock()) {
        Ok(role) => role,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(125);
        }
    };
    match role {
        daemon::Role::Parent => return,
        daemon::Role::Daemon => {}
    }

    // From here on we are the daemon: no controlling terminal, so relay our
    // own diagnostics to the shim log file instead of a now-meaningless
    // stdout/stderr.
    redirect_stdio_to_log(&layout.shim_log());
    let _log_guard = logging::init(args.debug, LogFormat::Json, None);

    if let Err(e) = daemon::install_subreaper() {
        report_and_exit(&layout, &e);
    }

    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    if let Err(e) = runtime.block_on(run(args, layout.clone())) {
        report_and_exit(&layout, &e);
    }
}

fn report_and_exit(layout: &ContainerLayout, e: &KeepError) -> ! {
    let _ = daemon::report_error(&layout.sync_pipe(), &e.to_string());
    std::process::exit(e.exit_code());
}

fn redirect_stdio_to_log(path: &Path) {
    if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let fd = file.as_raw_fd();
        let _ = dup2(fd, 1);
        let _ = dup2(fd, 2);
        std::mem::forget(file);
    }
}

async fn run(args: ShimArgs, layout: ContainerLayout) -> KeepResult<()> {
    let runtime_log = layout.runtime_log();
    let client = RuntimeClient::new(
        args.runtime.clone(),
        Some(layout.root().parent().unwrap_or(layout.root()).to_path_buf()),
        runtime_log,
        args.debug,
    );

    let config_path = args.bundle.join("config.json");
    let spec = oci_spec::runtime::Spec::load(&config_path)
        .map_err(|e| KeepError::InvalidBundle(format!("failed to load {}: {e}", config_path.display())))?;
    let terminal = spec
        .process()
        .as_ref()
        .and_then(|p| *p.terminal())
        .unwrap_or(false);

    let fifos = stdio::Fifos::create(&layout, args.stdio_dir.as_deref())?;
    let container_pid_file = layout.container_pid_file();
    let console_sock = layout.console_sock();

    let console_listener = if terminal {
        Some(pty_console::listen(&console_sock)?)
    } else {
        None
    };

    let create_args = client.create_args(
        &args.bundle,
        &container_pid_file,
        if terminal { Some(console_sock.as_path()) } else { None },
        &args.container_id,
    );
    let mut create_child = stdio::spawn_create(client.binary(), &create_args)?;
    let create_stdout = create_child.stdout.take().expect("piped stdout");
    let create_stderr = create_child.stderr.take().expect("piped stderr");
    let create_stdin = create_child.stdin.take();

    let container_log = args
        .container_log_file
        .clone()
        .unwrap_or_else(|| layout.container_log());

    if terminal {
        drain_and_discard(create_stdout);
        drain_and_discard(create_stderr);
        let listener = console_listener.expect("console listener only bound in terminal mode");
        let master = pty_console::accept_master(&listener)?;
        let splice_fifos = fifos;
        std::thread::Builder::new()
            .name("keep-shim-pty-splice".into())
            .spawn(move || {
                let _ = pty_console::splice(master, &splice_fifos);
            })
            .expect("failed to spawn pty splice thread");
    } else {
        let log_writer = Arc::new(LogWriter::open(&container_log)?);
        stdio::LogStreamThreads::spawn(create_stdout, create_stderr, create_stdin, &fifos, log_writer)?;
    }

    let wait_result = tokio::task::spawn_blocking(move || create_child.wait())
        .await
        .map_err(|e| KeepError::Other(format!("create subprocess join failed: {e}")))?
        .map_err(KeepError::from)?;
    if !wait_result.success() {
        return Err(KeepError::RuntimeInvocation(format!(
            "runtime create exited with {wait_result}"
        )));
    }

    client.start(&args.container_id)?;

    let pid = supervise::read_pid_file(&container_pid_file)?;
    let status = Arc::new(Mutex::new(ProcessStatus {
        pid: Some(pid),
        ..Default::default()
    }));
    let exited = supervise::spawn_wait(pid, status.clone());

    let shared = Arc::new(http::Shared {
        id: args.container_id.clone(),
        runtime_name: args.runtime.clone(),
        client,
        log_path: container_log,
        basedir: layout.root().to_path_buf(),
        status: status.clone(),
        shutdown: tokio::sync::Notify::new(),
    });

    let shim_sock = layout.shim_sock();
    let _ = std::fs::remove_file(&shim_sock);
    let listener = tokio::net::UnixListener::bind(&shim_sock)
        .map_err(|e| KeepError::Transport { path: shim_sock.clone(), source: e })?;

    let ready = Arc::new(tokio::sync::Notify::new());
    let server_ready = ready.clone();
    let server_state = shared.clone();
    let server = tokio::spawn(async move { http::serve(listener, server_state, server_ready).await });

    ready.notified().await;
    daemon::report_ready(&layout.sync_pipe())?;

    tokio::select! {
        _ = exited => {
            tracing::info!(id = %args.container_id, "container exited, reaping");
        }
        result = server => {
            if let Ok(Err(e)) = result {
                tracing::warn!("control server error: {e}");
            }
        }
    }

    if let Some(exit_command) = &args.exit_command {
        supervise::run_exit_command(exit_command, &args.exit_command_arg);
    }

    shared.shutdown.notify_one();
    http::terminate(&shared);
    Ok(())
}

fn drain_and_discard<R: std::io::Read + Send + 'static>(mut source: R) {
    std::thread::Builder::new()
        .name("keep-shim-drain".into())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            while let Ok(n) = source.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        })
        .expect("failed to spawn drain thread");
}
