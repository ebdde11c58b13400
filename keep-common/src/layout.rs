//! On-disk root-directory layout, shared by the runtime, shim, and manager.
//!
//! Mirrors the teacher's `SharedGuestLayout`/`SharedContainerLayout` builder
//! pattern (path-joining structs with a `prepare()` to create directories),
//! generalized from a host/guest pair to a single runtime root.

use std::env;
use std::path::{Path, PathBuf};

/// Root directory resolution, per spec §6:
/// `XDG_RUNTIME_DIR` (non-root) selects `<XDG>/<prog>`, otherwise `/run/<prog>`;
/// `<PROG>_ROOT_DIR` always overrides.
pub fn default_root(prog: &str) -> PathBuf {
    let env_override = format!("{}_ROOT_DIR", prog.to_uppercase().replace('-', "_"));
    if let Ok(dir) = env::var(&env_override) {
        return PathBuf::from(dir);
    }

    let is_root = nix_euid_is_root();
    if !is_root {
        if let Ok(xdg) = env::var("XDG_RUNTIME_DIR") {
            return Path::new(&xdg).join(prog);
        }
    }
    PathBuf::from("/run").join(prog)
}

#[cfg(unix)]
fn nix_euid_is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn nix_euid_is_root() -> bool {
    false
}

/// Layout for a single container: `<root>/<id>/`.
#[derive(Clone, Debug)]
pub struct ContainerLayout {
    root: PathBuf,
}

impl ContainerLayout {
    pub fn new(runtime_root: impl AsRef<Path>, id: &str) -> Self {
        Self {
            root: runtime_root.as_ref().join(id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn init_sock(&self) -> PathBuf {
        self.root.join("init.sock")
    }

    pub fn ipc_sock(&self) -> PathBuf {
        self.root.join("ipc.sock")
    }

    pub fn shim_sock(&self) -> PathBuf {
        self.root.join("shim.sock")
    }

    pub fn console_sock(&self) -> PathBuf {
        self.root.join("console.sock")
    }

    pub fn slirp_sock(&self) -> PathBuf {
        self.root.join("slirp4netns.sock")
    }

    pub fn container_pid_file(&self) -> PathBuf {
        self.root.join("container.pid")
    }

    pub fn shim_pid_file(&self) -> PathBuf {
        self.root.join("shim.pid")
    }

    pub fn slirp_pid_file(&self) -> PathBuf {
        self.root.join("slirp4netns.pid")
    }

    pub fn runtime_log(&self) -> PathBuf {
        self.root.join("runtime.log")
    }

    pub fn container_log(&self) -> PathBuf {
        self.root.join("container.log")
    }

    pub fn shim_log(&self) -> PathBuf {
        self.root.join("shim.log")
    }

    pub fn sync_pipe(&self) -> PathBuf {
        self.root.join("sync-pipe")
    }

    /// Path to one of the three stdio FIFOs (`0`, `1`, `2`).
    pub fn stdio_fifo(&self, fd: u8) -> PathBuf {
        self.root.join(fd.to_string())
    }

    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

/// Layout for the manager's container bundle tree:
/// `<root>/containers/<id>/{rootfs,data,work}` plus `config.json`.
#[derive(Clone, Debug)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(manager_root: impl AsRef<Path>, id: &str) -> Self {
        Self {
            root: manager_root.as_ref().join("containers").join(id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join("rootfs")
    }

    pub fn upper_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.rootfs_dir())?;
        std::fs::create_dir_all(self.upper_dir())?;
        std::fs::create_dir_all(self.work_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_layout_paths() {
        let layout = ContainerLayout::new("/run/keep", "c1");
        assert_eq!(layout.root().to_str().unwrap(), "/run/keep/c1");
        assert_eq!(
            layout.state_file().to_str().unwrap(),
            "/run/keep/c1/state.json"
        );
        assert_eq!(
            layout.stdio_fifo(1).to_str().unwrap(),
            "/run/keep/c1/1"
        );
    }

    #[test]
    fn bundle_layout_paths() {
        let layout = BundleLayout::new("/home/user/.keep", "abc123");
        assert_eq!(
            layout.root().to_str().unwrap(),
            "/home/user/.keep/containers/abc123"
        );
        assert_eq!(
            layout.rootfs_dir().to_str().unwrap(),
            "/home/user/.keep/containers/abc123/rootfs"
        );
    }

    #[test]
    fn root_dir_override_wins() {
        // SAFETY: test-only, single-threaded env mutation.
        unsafe {
            env::set_var("KEEP_ROOT_DIR", "/tmp/keep-override");
        }
        assert_eq!(default_root("keep"), PathBuf::from("/tmp/keep-override"));
        unsafe {
            env::remove_var("KEEP_ROOT_DIR");
        }
    }
}
