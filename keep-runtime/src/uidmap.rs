//! User-namespace ID mapping (spec §4.3 step 6).
//!
//! Unprivileged callers cannot write `/proc/<pid>/{uid,gid}_map` directly
//! (beyond a single identity entry), so the spec delegates to the external,
//! setuid `newuidmap`/`newgidmap` helpers — their installation policy is an
//! explicit Non-goal (spec §1). The privileged path writes the maps
//! in-process once the child exists, no external helper needed.

use std::process::Command;

use oci_spec::runtime::LinuxIdMapping;

use keep_common::{KeepError, KeepResult};

fn mapping_args(pid: i32, mappings: &[LinuxIdMapping]) -> Vec<String> {
    let mut args = vec![pid.to_string()];
    for m in mappings {
        args.push(m.container_id().to_string());
        args.push(m.host_id().to_string());
        args.push(m.size().to_string());
    }
    args
}

fn run_map_helper(helper: &str, pid: i32, mappings: &[LinuxIdMapping]) -> KeepResult<()> {
    if mappings.is_empty() {
        return Ok(());
    }
    let args = mapping_args(pid, mappings);
    let output = Command::new(helper)
        .args(&args)
        .output()
        .map_err(|e| KeepError::Syscall(format!("failed to run {helper}: {e}")))?;
    if !output.status.success() {
        return Err(KeepError::Syscall(format!(
            "{helper} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Populates the child's uid/gid maps via `newuidmap`/`newgidmap` (the
/// unprivileged path, spec §4.3 step 6).
pub fn apply_via_helpers(
    pid: i32,
    uid_mappings: &[LinuxIdMapping],
    gid_mappings: &[LinuxIdMapping],
) -> KeepResult<()> {
    run_map_helper("newuidmap", pid, uid_mappings)?;
    run_map_helper("newgidmap", pid, gid_mappings)?;
    Ok(())
}

/// Populates the child's uid/gid maps directly (the privileged path): the
/// caller already has CAP_SETUID/CAP_SETGID in the host namespace so it can
/// write `/proc/<pid>/{uid,gid}_map` without a setuid helper.
pub fn apply_directly(
    pid: i32,
    uid_mappings: &[LinuxIdMapping],
    gid_mappings: &[LinuxIdMapping],
) -> KeepResult<()> {
    write_map(pid, "uid_map", uid_mappings)?;
    // setgroups must be denied before gid_map can be written without
    // CAP_SETGID in the *target* namespace.
    let _ = std::fs::write(format!("/proc/{pid}/setgroups"), b"deny");
    write_map(pid, "gid_map", gid_mappings)?;
    Ok(())
}

fn write_map(pid: i32, file: &str, mappings: &[LinuxIdMapping]) -> KeepResult<()> {
    if mappings.is_empty() {
        return Ok(());
    }
    let body = mappings
        .iter()
        .map(|m| format!("{} {} {}", m.container_id(), m.host_id(), m.size()))
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(format!("/proc/{pid}/{file}"), body)
        .map_err(|e| KeepError::Syscall(format!("failed to write {file} for pid {pid}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::LinuxIdMappingBuilder;

    #[test]
    fn mapping_args_interleaves_triples() {
        let mappings = vec![LinuxIdMappingBuilder::default()
            .container_id(0u32)
            .host_id(1000u32)
            .size(1u32)
            .build()
            .unwrap()];
        let args = mapping_args(42, &mappings);
        assert_eq!(args, vec!["42", "0", "1000", "1"]);
    }
}
