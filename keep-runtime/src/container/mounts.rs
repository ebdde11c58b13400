//! Mount flag computation and the default device set (spec §4.3 steps 4-8).

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use oci_spec::runtime::{Mount, Spec};

use keep_common::{KeepError, KeepResult};

/// Bind-mounted from the host into the rootfs verbatim (spec §4.3 step 7).
pub const DEFAULT_DEVICES: &[&str] = &["null", "zero", "full", "random", "urandom", "tty"];

pub fn rootfs_path(spec: &Spec, bundle: &Path) -> KeepResult<PathBuf> {
    let root = spec
        .root()
        .as_ref()
        .ok_or_else(|| KeepError::InvalidBundle("spec has no root".into()))?;
    let path = root.path().clone();
    Ok(if path.is_absolute() { path } else { bundle.join(path) })
}

/// Computes the mount flags for a single spec mount entry: base
/// `NOEXEC|NOSUID|NODEV`, promoting `rbind`/`bind` options, then
/// per-destination overrides (spec §4.3 step 6).
pub fn flags_for(mount: &Mount) -> (MsFlags, Option<String>) {
    let mut flags = MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    let mut data_opts: Vec<String> = Vec::new();

    if let Some(options) = mount.options() {
        for opt in options {
            match opt.as_str() {
                "rbind" => flags |= MsFlags::MS_BIND | MsFlags::MS_REC,
                "bind" => flags |= MsFlags::MS_BIND,
                "ro" => flags |= MsFlags::MS_RDONLY,
                _ => data_opts.push(opt.clone()),
            }
        }
    }

    match mount.destination().to_str() {
        Some("/dev") | Some("/run") => {
            flags |= MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME;
            data_opts.push("mode=755".into());
            data_opts.push("size=65536k".into());
        }
        Some("/dev/pts") => {
            flags &= !MsFlags::MS_NODEV;
            data_opts.push("newinstance".into());
            data_opts.push("ptmxmode=0666".into());
            data_opts.push("mode=0620".into());
        }
        Some("/dev/shm") => {
            data_opts.push("mode=1777".into());
            data_opts.push("size=65536k".into());
        }
        Some("/sys") | Some("/sys/fs/cgroup") => {
            flags |= MsFlags::MS_RDONLY;
        }
        _ => {}
    }

    let data = if data_opts.is_empty() {
        None
    } else {
        Some(data_opts.join(","))
    };
    (flags, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::MountBuilder;

    fn mount_at(dest: &str, options: Vec<&str>) -> Mount {
        MountBuilder::default()
            .destination(dest)
            .source("src")
            .options(options.into_iter().map(String::from).collect::<Vec<_>>())
            .build()
            .unwrap()
    }

    #[test]
    fn dev_gets_tmpfs_sizing() {
        let (flags, data) = flags_for(&mount_at("/dev", vec!["nosuid", "strictatime"]));
        assert!(flags.contains(MsFlags::MS_STRICTATIME));
        assert!(data.unwrap().contains("mode=755"));
    }

    #[test]
    fn dev_pts_clears_nodev() {
        let (flags, _) = flags_for(&mount_at("/dev/pts", vec![]));
        assert!(!flags.contains(MsFlags::MS_NODEV));
    }

    #[test]
    fn rbind_promotes_to_bind_and_rec() {
        let (flags, _) = flags_for(&mount_at("/mnt/data", vec!["rbind"]));
        assert!(flags.contains(MsFlags::MS_BIND));
        assert!(flags.contains(MsFlags::MS_REC));
    }

    #[test]
    fn sys_is_read_only() {
        let (flags, _) = flags_for(&mount_at("/sys", vec![]));
        assert!(flags.contains(MsFlags::MS_RDONLY));
    }
}
