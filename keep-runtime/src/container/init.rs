//! Container-side bring-up (spec §4.3 "Create protocol, container side",
//! 17 steps). Runs inside the namespaces the host's `clone(2)` call already
//! created; this module never forks, it only transforms the current
//! process before the final `execve` into the entrypoint.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::mount::{mount, MsFlags};
use nix::unistd::Pid;

use keep_common::{KeepError, KeepResult};
use keep_ipc::HandshakeMessage;
use keep_spec::Spec;

use crate::container::fdclean;
use crate::container::mounts::{flags_for, rootfs_path, DEFAULT_DEVICES};
use crate::hooks;
use crate::namespaces::wants_user_namespace;

/// Set on re-exec once the container process has given the host a chance
/// to populate uid/gid maps (spec §4.3 container-side step 1).
const USERNS_MAPPED_ENV: &str = "KEEP_USERNS_MAPPED";
const USERNS_MAP_WAIT: Duration = Duration::from_millis(50);

pub struct InitArgs {
    pub root: PathBuf,
    pub bundle: PathBuf,
    pub no_pivot: bool,
    pub id: String,
}

pub fn run(args: InitArgs) -> KeepResult<()> {
    let spec = Spec::load(args.bundle.join("config.json"))
        .map_err(|e| KeepError::InvalidBundle(e.to_string()))?;

    // Step 1: let the host finish populating uid/gid maps before we act as
    // the mapped identity.
    if wants_user_namespace(&spec) && std::env::var(USERNS_MAPPED_ENV).is_err() {
        std::thread::sleep(USERNS_MAP_WAIT);
        reexec_with_marker(&args)?;
        unreachable!("execve replaces the process image on success");
    }

    let layout = keep_common::layout::ContainerLayout::new(&args.root, &args.id);

    // Step 2: announce booted, then drop the init connection.
    {
        let mut init_conn = keep_ipc::connect(&layout.init_sock())?;
        keep_ipc::send_message(&mut init_conn, &HandshakeMessage::ContainerBooted)?;
    }

    // Step 3: bind ipc.sock, accept the host's first connection.
    let ipc_listener = keep_ipc::bind(&layout.ipc_sock())?;
    let (mut conn, _) = ipc_listener
        .accept()
        .map_err(|e| KeepError::Transport { path: layout.ipc_sock(), source: e })?;

    let rootfs = rootfs_path(&spec, &args.bundle)?;

    // Step 4: stop mount propagation to the host.
    let propagation_flags = if args.no_pivot {
        MsFlags::MS_SLAVE | MsFlags::MS_REC
    } else {
        MsFlags::MS_PRIVATE | MsFlags::MS_REC
    };
    mount_or_fail(None, Path::new("/"), None, propagation_flags, None)?;

    // Step 5: bind rootfs onto itself, required before pivot_root.
    if !args.no_pivot {
        mount_or_fail(
            Some(&rootfs),
            &rootfs,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None,
        )?;
    }

    // Step 6: spec mounts.
    if let Some(spec_mounts) = spec.mounts() {
        for m in spec_mounts {
            let dest = rootfs.join(m.destination().strip_prefix("/").unwrap_or(m.destination()));
            std::fs::create_dir_all(&dest).ok();
            let (flags, data) = flags_for(m);
            let source = m.source().as_deref().unwrap_or_else(|| Path::new("none"));
            let fstype = m.typ().as_deref();
            match mount(Some(source), &dest, fstype, flags, data.as_deref()) {
                Ok(()) => {}
                Err(nix::errno::Errno::EPERM) => {
                    tracing::warn!(dest = %dest.display(), "mount denied (EPERM), continuing rootless");
                }
                Err(e) => {
                    return Err(KeepError::Syscall(format!(
                        "mount {} failed: {e}",
                        dest.display()
                    )))
                }
            }
        }
    }

    // Step 7: default devices.
    for dev in DEFAULT_DEVICES {
        let host_path = Path::new("/dev").join(dev);
        let container_path = rootfs.join("dev").join(dev);
        if !host_path.exists() {
            continue;
        }
        std::fs::File::create(&container_path).ok();
        if let Err(e) = mount(
            Some(&host_path),
            &container_path,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        ) {
            tracing::warn!(device = dev, error = %e, "failed to bind-mount default device");
        }
    }

    // Step 8: /dev/fd and stdio symlinks.
    let dev_dir = rootfs.join("dev");
    let _ = std::os::unix::fs::symlink("/proc/self/fd", dev_dir.join("fd"));
    let _ = std::os::unix::fs::symlink("/proc/self/fd/0", dev_dir.join("stdin"));
    let _ = std::os::unix::fs::symlink("/proc/self/fd/1", dev_dir.join("stdout"));
    let _ = std::os::unix::fs::symlink("/proc/self/fd/2", dev_dir.join("stderr"));

    // Step 9: handshake around CreateContainer hooks.
    keep_ipc::send_message(&mut conn, &HandshakeMessage::ContainerBeforePivot)?;
    keep_ipc::await_message(&mut conn, &HandshakeMessage::Ok)?;

    // Step 10: CreateContainer hooks, logged only.
    let placeholder_state = placeholder_state(&args.id, &args.bundle);
    hooks::run_logged(
        spec.hooks().as_ref().and_then(|h| h.create_container().as_ref()),
        &placeholder_state,
    );

    // Step 11: change root.
    if args.no_pivot {
        nix::unistd::chroot(&rootfs)
            .map_err(|e| KeepError::Syscall(format!("chroot failed: {e}")))?;
        std::env::set_current_dir("/")?;
    } else {
        do_pivot_root(&rootfs)?;
    }

    // Step 12: cwd and hostname.
    let cwd = spec
        .process()
        .as_ref()
        .map(|p| p.cwd().clone())
        .unwrap_or_else(|| PathBuf::from("/"));
    std::env::set_current_dir(&cwd)?;
    if let Some(hostname) = spec.hostname() {
        nix::unistd::sethostname(hostname)
            .map_err(|e| KeepError::Syscall(format!("sethostname failed: {e}")))?;
    }

    // Step 13: CLOEXEC cleanup ahead of the final exec.
    fdclean::mark_cloexec_from_fd3()?;

    // Step 14: signal ready-to-start, then drop this connection.
    keep_ipc::send_message(&mut conn, &HandshakeMessage::ContainerWaitStart)?;
    drop(conn);

    // Step 15: accept the start signal on a fresh connection.
    let (mut start_conn, _) = ipc_listener
        .accept()
        .map_err(|e| KeepError::Transport { path: layout.ipc_sock(), source: e })?;
    keep_ipc::await_message(&mut start_conn, &HandshakeMessage::StartContainer)?;

    // Step 16: StartContainer hooks, logged only.
    hooks::run_logged(
        spec.hooks().as_ref().and_then(|h| h.start_container().as_ref()),
        &placeholder_state,
    );

    // Step 17: resolve argv[0] on PATH, exec or report failure.
    let process = spec
        .process()
        .as_ref()
        .ok_or_else(|| KeepError::InvalidBundle("spec has no process".into()))?;
    let argv = process.args().clone().unwrap_or_default();
    let Some(prog) = argv.first() else {
        return Err(KeepError::InvalidBundle("process.args is empty".into()));
    };

    match resolve_on_path(prog) {
        None => {
            let msg = format!("failed to retrieve executable path for '{prog}'");
            let _ = keep_ipc::send_message(
                &mut start_conn,
                &HandshakeMessage::Error(msg.clone()),
            );
            Err(KeepError::ExecutableNotFound(prog.clone()))
        }
        Some(resolved) => {
            keep_ipc::send_message(&mut start_conn, &HandshakeMessage::Ok)?;
            drop(start_conn);
            drop(ipc_listener);
            exec_entrypoint(&resolved, &argv, process.env().as_deref())
        }
    }
}

fn mount_or_fail(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> KeepResult<()> {
    mount(source, target, fstype, flags, data)
        .map_err(|e| KeepError::Syscall(format!("mount {} failed: {e}", target.display())))
}

fn do_pivot_root(rootfs: &Path) -> KeepResult<()> {
    let put_old = rootfs.join(".pivot_root");
    std::fs::create_dir_all(&put_old)?;
    nix::unistd::pivot_root(rootfs, &put_old)
        .map_err(|e| KeepError::Syscall(format!("pivot_root failed: {e}")))?;
    std::env::set_current_dir("/")?;
    let put_old_after = Path::new("/").join(".pivot_root");
    nix::mount::umount2(&put_old_after, nix::mount::MntFlags::MNT_DETACH)
        .map_err(|e| KeepError::Syscall(format!("umount2 of old root failed: {e}")))?;
    std::fs::remove_dir(&put_old_after).ok();
    Ok(())
}

fn resolve_on_path(prog: &str) -> Option<PathBuf> {
    if prog.contains('/') {
        let p = PathBuf::from(prog);
        return p.exists().then_some(p);
    }
    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':') {
        let candidate = Path::new(dir).join(prog);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn exec_entrypoint(resolved: &Path, argv: &[String], env: Option<&[String]>) -> KeepResult<()> {
    let c_path = CString::new(resolved.as_os_str().as_bytes())
        .map_err(|e| KeepError::Other(e.to_string()))?;
    let c_argv: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_str()).unwrap())
        .collect();
    let c_env: Vec<CString> = env
        .unwrap_or(&[])
        .iter()
        .map(|e| CString::new(e.as_str()).unwrap())
        .collect();

    nix::unistd::execve(&c_path, &c_argv, &c_env)
        .map_err(|e| KeepError::Syscall(format!("execve failed: {e}")))?;
    unreachable!("execve replaces the process image on success")
}

fn reexec_with_marker(args: &InitArgs) -> KeepResult<()> {
    let self_exe = std::fs::read_link("/proc/self/exe")
        .map_err(|e| KeepError::Syscall(format!("readlink /proc/self/exe: {e}")))?;
    let c_path = CString::new(self_exe.as_os_str().as_bytes()).unwrap();

    let mut argv: Vec<CString> = std::env::args().map(|a| CString::new(a).unwrap()).collect();
    if argv.is_empty() {
        argv.push(c_path.clone());
    }

    std::env::set_var(USERNS_MAPPED_ENV, "1");
    let env: Vec<CString> = std::env::vars()
        .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
        .collect();

    nix::unistd::execve(&c_path, &argv, &env)
        .map_err(|e| KeepError::Syscall(format!("re-exec after userns map wait failed: {e}")))?;
    Ok(())
}

fn placeholder_state(id: &str, bundle: &Path) -> keep_spec::RuntimeState {
    oci_spec::runtime::StateBuilder::default()
        .version("1.0.2")
        .id(id)
        .status(oci_spec::runtime::ContainerState::Creating)
        .bundle(bundle.to_string_lossy().to_string())
        .pid(Pid::this().as_raw())
        .build()
        .expect("all required State fields are set above")
}
