//! Shells out to the runtime binary (spec §4.4 "Runtime shelling
//! convention"): every invocation passes `--log <file> --log-format json`
//! plus `--debug` in debug mode; on non-zero exit, the error message is
//! built from stderr plus the most recent `level="error"` line of the
//! runtime's own JSON log (skipping a bare "exit status 1").

use std::path::{Path, PathBuf};
use std::process::Command;

use keep_common::{KeepError, KeepResult};

pub struct RuntimeClient {
    binary: String,
    root: Option<PathBuf>,
    log_file: PathBuf,
    debug: bool,
}

impl RuntimeClient {
    pub fn new(binary: String, root: Option<PathBuf>, log_file: PathBuf, debug: bool) -> Self {
        Self { binary, root, log_file, debug }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(root) = &self.root {
            args.push("--root".into());
            args.push(root.to_string_lossy().into_owned());
        }
        args.push("--log".into());
        args.push(self.log_file.to_string_lossy().into_owned());
        args.push("--log-format".into());
        args.push("json".into());
        if self.debug {
            args.push("--debug".into());
        }
        args
    }

    fn invoke(&self, sub_args: &[String]) -> KeepResult<String> {
        let mut args = self.base_args();
        args.extend_from_slice(sub_args);

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|e| KeepError::RuntimeInvocation(format!("failed to spawn runtime: {e}")))?;

        if !output.status.success() {
            return Err(KeepError::RuntimeInvocation(self.build_error(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn build_error(&self, stderr: &[u8]) -> String {
        let stderr_text = String::from_utf8_lossy(stderr).trim().to_string();
        if let Some(last_error) = self.last_json_log_error() {
            return last_error;
        }
        if stderr_text.is_empty() {
            "runtime invocation failed".to_string()
        } else {
            stderr_text
        }
    }

    /// Parses the last two lines of the runtime's JSON log and returns the
    /// most recent `level="error"` message, unless it is the uninformative
    /// "exit status 1".
    fn last_json_log_error(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.log_file).ok()?;
        let last_lines: Vec<&str> = contents.lines().rev().take(2).collect();
        for line in last_lines {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                if value.get("level").and_then(|v| v.as_str()) == Some("error") {
                    let msg = value.get("message").or_else(|| value.get("fields"))
                        .and_then(|v| v.as_str())
                        .unwrap_or(line)
                        .to_string();
                    if msg != "exit status 1" {
                        return Some(msg);
                    }
                }
            }
        }
        None
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Builds the full argv (base flags plus `create`'s own) for spawning
    /// the runtime directly. The shim's bring-up path uses this with
    /// `stdio::spawn_create` instead of `invoke`/`output()`, because the
    /// container's inherited stdio keeps the runtime's piped stdout/stderr
    /// open long after the `create` subprocess itself exits.
    pub fn create_args(
        &self,
        bundle: &Path,
        pid_file: &Path,
        console_socket: Option<&Path>,
        id: &str,
    ) -> Vec<String> {
        let mut args = self.base_args();
        args.push("create".to_string());
        args.push("--bundle".to_string());
        args.push(bundle.to_string_lossy().into_owned());
        args.push("--pid-file".to_string());
        args.push(pid_file.to_string_lossy().into_owned());
        if let Some(console) = console_socket {
            args.push("--console-socket".to_string());
            args.push(console.to_string_lossy().into_owned());
        }
        args.push(id.to_string());
        args
    }

    pub fn start(&self, id: &str) -> KeepResult<()> {
        self.invoke(&["start".to_string(), id.to_string()])?;
        Ok(())
    }

    pub fn kill(&self, id: &str, signal: &str) -> KeepResult<()> {
        self.invoke(&["kill".to_string(), id.to_string(), signal.to_string()])?;
        Ok(())
    }

    pub fn delete(&self, id: &str, force: bool) -> KeepResult<()> {
        let mut args = vec!["delete".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(id.to_string());
        self.invoke(&args)?;
        Ok(())
    }

    pub fn state(&self, id: &str) -> KeepResult<serde_json::Value> {
        let out = self.invoke(&["state".to_string(), id.to_string()])?;
        serde_json::from_str(&out).map_err(KeepError::from)
    }
}
