//! Host-side `create` (spec §4.3 "Create protocol, host side", 14 steps).

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::sched::{clone, CloneFlags};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use keep_common::{KeepError, KeepResult};
use keep_ipc::HandshakeMessage;
use keep_spec::state::StateStore;
use keep_spec::{RuntimeState, Spec};

use crate::hooks;
use crate::namespaces;
use crate::uidmap;

/// Stack reserved for the cloned child before it execve's; large enough
/// for glibc's clone trampoline plus whatever runs before the execve call.
const CLONE_STACK_SIZE: usize = 1024 * 1024;

pub struct CreateArgs {
    pub id: String,
    pub bundle: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub console_socket: Option<PathBuf>,
    pub no_pivot: bool,
}

pub fn create(root: &Path, args: CreateArgs, self_exe: &Path) -> KeepResult<()> {
    // Step 1: materialize the container directory; fails if it exists.
    let (store, mut on_disk) = StateStore::new(root, &args.id, &args.bundle)?;
    let layout = store.layout().clone();
    let spec = on_disk.load_spec()?;

    let result = create_inner(root, &args, self_exe, &store, &mut on_disk, &spec, &layout);
    if let Err(e) = &result {
        tracing::error!(id = %args.id, error = %e, "create failed, tearing down");
        let _ = store.destroy();
    }
    result
}

fn create_inner(
    root: &Path,
    args: &CreateArgs,
    self_exe: &Path,
    store: &StateStore,
    on_disk: &mut keep_spec::state::OnDiskState,
    spec: &Spec,
    layout: &keep_common::layout::ContainerLayout,
) -> KeepResult<()> {
    // Step 2: bind the init handshake socket.
    let init_listener = keep_ipc::bind(&layout.init_sock())?;

    // Step 3: compute the clone-flag union from the spec's namespace set.
    let flags = namespaces::clone_flags_for(spec);
    let wants_userns = namespaces::wants_user_namespace(spec);

    // Step 5 (terminal setup happens before the clone so the slave fd can
    // be inherited by the child).
    let terminal = spec.process().as_ref().and_then(|p| *p.terminal()).unwrap_or(false);
    let pty = if terminal {
        Some(nix::pty::openpty(None, None).map_err(|e| KeepError::Syscall(format!("openpty: {e}")))?)
    } else {
        None
    };

    // Step 4: spawn the child with the computed clone flags, the binary
    // re-executed with the `container` subcommand.
    let container_argv = build_container_argv(self_exe, root, args);
    let mut stack = vec![0u8; CLONE_STACK_SIZE];
    let pty_slave_fd = pty.as_ref().map(|p| p.slave.as_raw_fd());

    let child_flags = flags | CloneFlags::CLONE_NEWNS;
    let pid = unsafe {
        clone(
            Box::new(move || child_entry(&container_argv, pty_slave_fd)),
            &mut stack,
            child_flags,
            Some(nix::sys::signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| KeepError::Syscall(format!("clone failed: {e}")))?;

    // Step 5 (cont'd): send the PTY master over the console socket, or do
    // nothing for the inherit-stdio path.
    if let (Some(pty), Some(console_path)) = (&pty, &args.console_socket) {
        let conn = keep_ipc::connect(console_path)?;
        keep_ipc::send_fd(&conn, pty.master.as_raw_fd())?;
    }

    // Step 6: populate uid/gid maps.
    if wants_userns {
        if let Some(linux) = spec.linux() {
            let uid_mappings = linux.uid_mappings().clone().unwrap_or_default();
            let gid_mappings = linux.gid_mappings().clone().unwrap_or_default();
            if nix::unistd::geteuid().is_root() {
                uidmap::apply_directly(pid.as_raw(), &uid_mappings, &gid_mappings)?;
            } else {
                uidmap::apply_via_helpers(pid.as_raw(), &uid_mappings, &gid_mappings)?;
            }
        }
    }

    // Step 7: await container-booted, then close/unlink init.sock.
    let (mut init_conn, _) = init_listener
        .accept()
        .map_err(|e| KeepError::Transport { path: layout.init_sock(), source: e })?;
    keep_ipc::await_message(&mut init_conn, &HandshakeMessage::ContainerBooted)?;
    drop(init_conn);
    drop(init_listener);
    let _ = std::fs::remove_file(layout.init_sock());

    // Step 8-9: dial ipc.sock, await container-before-pivot.
    let ipc_listener = keep_ipc::bind(&layout.ipc_sock())?;
    let (mut ipc_conn, _) = ipc_listener
        .accept()
        .map_err(|e| KeepError::Transport { path: layout.ipc_sock(), source: e })?;
    keep_ipc::await_message(&mut ipc_conn, &HandshakeMessage::ContainerBeforePivot)?;

    // Step 10: record the child's PID.
    store.set_pid(on_disk, pid.as_raw())?;
    if let Some(pid_file) = &args.pid_file {
        std::fs::write(pid_file, pid.as_raw().to_string())?;
    }

    // Step 11: CreateRuntime hooks, fatal on failure.
    let state_for_hooks = snapshot_state(on_disk);
    hooks::run_fatal(spec.hooks().as_ref().and_then(|h| h.create_runtime().as_ref()), &state_for_hooks)?;

    // Step 12-13: ok, then await container-wait-start.
    keep_ipc::send_message(&mut ipc_conn, &HandshakeMessage::Ok)?;
    keep_ipc::await_message(&mut ipc_conn, &HandshakeMessage::ContainerWaitStart)?;

    // Step 14: persist created.
    store.save_as_created(on_disk)?;
    tracing::info!(id = %args.id, pid = pid.as_raw(), "container created");
    Ok(())
}

fn snapshot_state(on_disk: &keep_spec::state::OnDiskState) -> RuntimeState {
    on_disk.state.clone()
}

fn build_container_argv(self_exe: &Path, root: &Path, args: &CreateArgs) -> Vec<String> {
    let mut argv = vec![
        self_exe.to_string_lossy().to_string(),
        "container-init".to_string(),
        "--root".to_string(),
        root.to_string_lossy().to_string(),
        "--bundle".to_string(),
        args.bundle.to_string_lossy().to_string(),
    ];
    if args.no_pivot {
        argv.push("--no-pivot".to_string());
    }
    argv.push(args.id.clone());
    argv
}

/// Runs inside the freshly cloned child: put the PTY slave on the standard
/// fds if one was allocated, then execve the same binary with the
/// `container-init` argv built above. Must not allocate or touch anything
/// that assumes a multi-threaded runtime — the clone(2) child shares the
/// parent's address space until execve replaces it.
fn child_entry(argv: &[String], pty_slave_fd: Option<std::os::fd::RawFd>) -> isize {
    if let Some(slave) = pty_slave_fd {
        for fd in 0..3 {
            let _ = nix::unistd::dup2(slave, fd);
        }
    }

    let c_argv: Vec<std::ffi::CString> = argv
        .iter()
        .map(|s| std::ffi::CString::new(s.as_str()).unwrap())
        .collect();
    match nix::unistd::execv(c_argv[0].as_c_str(), &c_argv) {
        Ok(_) => 0,
        Err(_) => 127,
    }
}

/// Kept for the `delete`/`kill` paths, which need to signal the container
/// init without re-deriving a `Pid` constructor everywhere.
pub fn pid_of(raw: i32) -> Pid {
    Pid::from_raw(raw)
}

pub fn default_signal() -> Signal {
    Signal::SIGTERM
}
