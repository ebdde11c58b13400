//! Overlay filesystem assembly (spec §4.5 "Bundle assembly"). Ported from
//! the teacher's `boxlite::rootfs::operations` module: shells out to
//! `mount`/`umount`/`fuse-overlayfs` rather than linking an FFI overlay
//! library, and walks whiteout markers by hand after layer extraction.

use std::path::{Path, PathBuf};
use std::process::Command;

use keep_common::{KeepError, KeepResult};

/// True when `fuse-overlayfs` is on `PATH` and the process is unprivileged
/// (spec §4.5: "If fuse-overlayfs is available and the process is
/// unprivileged, use it; otherwise use the kernel overlay mount").
pub fn should_use_fuse_overlayfs() -> bool {
    if nix::unistd::geteuid().is_root() {
        return false;
    }
    Command::new("which")
        .arg("fuse-overlayfs")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Mounts an overlay merging `lower_dirs` (bottom to top) at `target_dir`,
/// picking kernel overlayfs or `fuse-overlayfs` per [`should_use_fuse_overlayfs`].
pub fn mount_overlay(
    lower_dirs: &[PathBuf],
    upper_dir: &Path,
    work_dir: &Path,
    target_dir: &Path,
) -> KeepResult<()> {
    if lower_dirs.is_empty() {
        return Err(KeepError::InvalidBundle("cannot mount overlay with no lower directories".into()));
    }

    let lowerdir = lower_dirs
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(":");
    let options = format!("lowerdir={lowerdir},upperdir={},workdir={}", upper_dir.display(), work_dir.display());

    let output = if should_use_fuse_overlayfs() {
        tracing::debug!(options = %options, "mounting overlay via fuse-overlayfs");
        Command::new("fuse-overlayfs")
            .args(["-o", &options, &target_dir.to_string_lossy()])
            .output()
    } else {
        tracing::debug!(options = %options, "mounting overlay via kernel overlayfs");
        Command::new("mount")
            .args(["-t", "overlay", "overlay", "-o", &options, &target_dir.to_string_lossy()])
            .output()
    }
    .map_err(|e| KeepError::Syscall(format!("failed to execute overlay mount: {e}")))?;

    if !output.status.success() {
        return Err(KeepError::Syscall(format!(
            "overlay mount failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

pub fn unmount_overlay(target_dir: &Path) -> KeepResult<()> {
    let output = Command::new("umount")
        .arg(target_dir)
        .output()
        .map_err(|e| KeepError::Syscall(format!("failed to execute umount for {}: {e}", target_dir.display())))?;

    if !output.status.success() {
        return Err(KeepError::Syscall(format!(
            "umount of {} failed: {}",
            target_dir.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Processes OCI whiteout markers after layer extraction: `.wh.name`
/// deletes `name`, `.wh..wh..opq` marks an opaque directory (extraction
/// order already shadowed the lower layers; only the marker is removed).
pub fn process_whiteouts(dir: &Path) -> KeepResult<()> {
    let entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| KeepError::Syscall(format!("failed to read directory {}: {e}", dir.display())))?
        .filter_map(|e| e.ok())
        .collect();

    for entry in entries {
        let path = entry.path();
        let filename = entry.file_name();
        let filename = filename.to_string_lossy();

        if let Some(target_name) = filename.strip_prefix(".wh.") {
            if target_name == ".wh..opq" {
                let _ = std::fs::remove_file(&path);
            } else {
                let target_path = dir.join(target_name);
                if target_path.is_dir() {
                    let _ = std::fs::remove_dir_all(&target_path);
                } else if target_path.exists() {
                    let _ = std::fs::remove_file(&target_path);
                }
                let _ = std::fs::remove_file(&path);
            }
        } else if path.is_dir() {
            process_whiteouts(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_whiteouts_removes_target_file_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "content").unwrap();
        std::fs::write(dir.path().join(".wh.file.txt"), "").unwrap();

        process_whiteouts(dir.path()).unwrap();

        assert!(!dir.path().join("file.txt").exists());
        assert!(!dir.path().join(".wh.file.txt").exists());
    }

    #[test]
    fn process_whiteouts_removes_opaque_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".wh..wh..opq"), "").unwrap();

        process_whiteouts(dir.path()).unwrap();

        assert!(!dir.path().join(".wh..wh..opq").exists());
    }

    #[test]
    fn mount_overlay_rejects_empty_lowerdir() {
        let dir = tempfile::tempdir().unwrap();
        let err = mount_overlay(&[], &dir.path().join("up"), &dir.path().join("work"), &dir.path().join("merged"))
            .unwrap_err();
        assert!(matches!(err, KeepError::InvalidBundle(_)));
    }
}
