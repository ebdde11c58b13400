//! OCI hook execution (spec §4.3 "Hook execution").
//!
//! Each hook is an external command; the current state document is written
//! to its stdin as JSON. `CreateRuntime`, `Prestart`, and `Poststop` are
//! fatal on failure; `CreateContainer` and `StartContainer` are logged only
//! — this asymmetry is load-bearing (spec §9 "Hook result handling
//! asymmetry") and must not be collapsed into one helper that always
//! propagates or always swallows.

use std::io::Write;
use std::process::{Command, Stdio};

use oci_spec::runtime::Hook;

use keep_common::{KeepError, KeepResult};
use keep_spec::RuntimeState;

fn run_one(hook: &Hook, state: &RuntimeState) -> KeepResult<()> {
    let state_json = serde_json::to_vec(state)?;

    let mut cmd = Command::new(hook.path());
    if let Some(args) = hook.args() {
        if args.len() > 1 {
            cmd.args(&args[1..]);
        }
    }
    if let Some(env) = hook.env() {
        for kv in env {
            if let Some((k, v)) = kv.split_once('=') {
                cmd.env(k, v);
            }
        }
    }

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| KeepError::Syscall(format!("failed to spawn hook '{}': {e}", hook.path().display())))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&state_json);
    }

    let output = child
        .wait_with_output()
        .map_err(|e| KeepError::Syscall(format!("failed to wait for hook '{}': {e}", hook.path().display())))?;

    if !output.status.success() {
        return Err(KeepError::Syscall(format!(
            "hook '{}' exited with {}: {}",
            hook.path().display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Runs a hook list to completion, returning the first error. Used for the
/// fatal-on-fail phases.
pub fn run_fatal(hooks: Option<&Vec<Hook>>, state: &RuntimeState) -> KeepResult<()> {
    let Some(hooks) = hooks else { return Ok(()) };
    for hook in hooks {
        run_one(hook, state)?;
    }
    Ok(())
}

/// Runs a hook list but only logs failures. Used for `CreateContainer` and
/// `StartContainer`, which the OCI spec requires to be best-effort.
pub fn run_logged(hooks: Option<&Vec<Hook>>, state: &RuntimeState) {
    let Some(hooks) = hooks else { return };
    for hook in hooks {
        if let Err(e) = run_one(hook, state) {
            tracing::warn!(hook = %hook.path().display(), error = %e, "hook failed, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::{ContainerState, HookBuilder, StateBuilder};

    fn dummy_state() -> RuntimeState {
        StateBuilder::default()
            .version("1.0.2")
            .id("c1")
            .status(ContainerState::Creating)
            .bundle("/tmp/bundle")
            .build()
            .unwrap()
    }

    #[test]
    fn fatal_hook_failure_propagates() {
        let hook = HookBuilder::default()
            .path("/bin/false")
            .build()
            .unwrap();
        let err = run_fatal(Some(&vec![hook]), &dummy_state()).unwrap_err();
        assert!(matches!(err, KeepError::Syscall(_)));
    }

    #[test]
    fn logged_hook_failure_does_not_propagate() {
        let hook = HookBuilder::default()
            .path("/bin/false")
            .build()
            .unwrap();
        run_logged(Some(&vec![hook]), &dummy_state());
    }
}
