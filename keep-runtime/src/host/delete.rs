//! `delete` (spec §4.3 "Delete"): unmounts rootfs mountpoints in reverse
//! order with `MNT_DETACH`, unmounts default device binds, removes the
//! state dir, runs `Poststop` hooks.

use std::path::Path;

use nix::mount::{umount2, MntFlags};
use oci_spec::runtime::ContainerState;

use keep_common::{KeepError, KeepResult};
use keep_spec::state::StateStore;

use crate::container::mounts::{rootfs_path, DEFAULT_DEVICES};
use crate::hooks;

pub fn delete(root: &Path, id: &str, force: bool) -> KeepResult<()> {
    let loaded = StateStore::load(root, id);

    let (store, on_disk) = match loaded {
        Ok(pair) => pair,
        Err(e) if force => {
            tracing::warn!(id, error = %e, "force-delete of an unloadable container");
            let layout = keep_common::layout::ContainerLayout::new(root, id);
            let _ = std::fs::remove_dir_all(layout.root());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if on_disk.status() != ContainerState::Stopped && !force {
        return Err(KeepError::LifecycleViolation {
            id: id.to_string(),
            status: on_disk.status().to_string(),
            action: "delete".to_string(),
        });
    }

    if let Ok(spec) = on_disk.load_spec() {
        if let Ok(bundle) = std::fs::canonicalize(on_disk.state.bundle()) {
            if let Ok(rootfs) = rootfs_path(&spec, &bundle) {
                unmount_all(&spec, &rootfs);
            }
        }
        hooks::run_fatal(
            spec.hooks().as_ref().and_then(|h| h.poststop().as_ref()),
            &on_disk.state,
        )?;
    }

    store.destroy()?;
    tracing::info!(id, "container deleted");
    Ok(())
}

fn unmount_all(spec: &oci_spec::runtime::Spec, rootfs: &std::path::Path) {
    if let Some(mounts) = spec.mounts() {
        for m in mounts.iter().rev() {
            let target = rootfs.join(m.destination().strip_prefix("/").unwrap_or(m.destination()));
            let _ = umount2(&target, MntFlags::MNT_DETACH);
        }
    }
    for dev in DEFAULT_DEVICES.iter().rev() {
        let target = rootfs.join("dev").join(dev);
        let _ = umount2(&target, MntFlags::MNT_DETACH);
    }
}
