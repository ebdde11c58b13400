//! The on-disk state store (spec §4.1): `New`, `Load` (with the `/proc`
//! zombie-refresh self-heal), and the single-field mutators that each
//! rewrite `state.json` in full.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use oci_spec::runtime::{ContainerState, Spec, State, StateBuilder};
use serde::{Deserialize, Serialize};

use keep_common::layout::ContainerLayout;
use keep_common::{KeepError, KeepResult};

/// Re-exported so callers don't need to depend on `oci-spec` directly just
/// to name a status.
pub type ContainerStatus = ContainerState;

/// `state.json`: the OCI `State` document plus the extensions spec §4.1
/// calls for (creation time, and — for the manager/shim's own bookkeeping —
/// start/finish timestamps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDiskState {
    #[serde(flatten)]
    pub state: State,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl OnDiskState {
    pub fn status(&self) -> ContainerStatus {
        *self.state.status()
    }

    pub fn pid(&self) -> Option<i32> {
        *self.state.pid()
    }

    /// Reloads `config.json` from the recorded bundle path. Spec §3 notes
    /// the spec is immutable after load, so re-reading it per call is
    /// simpler than threading an owned copy through every caller.
    pub fn load_spec(&self) -> KeepResult<Spec> {
        let config_path = Path::new(self.state.bundle()).join("config.json");
        Spec::load(&config_path)
            .map_err(|e| KeepError::InvalidBundle(format!("failed to load {}: {e}", config_path.display())))
    }
}

/// Owns a container's `<root>/<id>/` directory and the single-writer
/// discipline over its `state.json`.
pub struct StateStore {
    layout: ContainerLayout,
}

impl StateStore {
    /// spec §4.1 `New`: fails if the container directory already exists,
    /// resolves the bundle to an absolute path, loads (and validates)
    /// `config.json`, and writes an initial `creating` state.
    pub fn new(
        root: impl AsRef<Path>,
        id: &str,
        bundle: impl AsRef<Path>,
    ) -> KeepResult<(Self, OnDiskState)> {
        let layout = ContainerLayout::new(root.as_ref(), id);
        if layout.root().exists() {
            return Err(KeepError::InvalidBundle(format!(
                "container '{id}' already exists"
            )));
        }

        let bundle_abs = fs::canonicalize(bundle.as_ref()).map_err(|e| {
            KeepError::InvalidBundle(format!(
                "bundle '{}' not found: {e}",
                bundle.as_ref().display()
            ))
        })?;
        let config_path = bundle_abs.join("config.json");
        Spec::load(&config_path).map_err(|e| {
            KeepError::InvalidBundle(format!("failed to load {}: {e}", config_path.display()))
        })?;

        layout.prepare()?;

        let state = StateBuilder::default()
            .version("1.0.2")
            .id(id)
            .status(ContainerState::Creating)
            .bundle(bundle_abs.to_string_lossy().to_string())
            .build()
            .map_err(|e| KeepError::Other(e.to_string()))?;

        let on_disk = OnDiskState {
            state,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let store = StateStore { layout };
        store.persist(&on_disk)?;
        Ok((store, on_disk))
    }

    /// spec §4.1 `Load`: loads `state.json`, then refreshes status by
    /// inspecting `/proc/<pid>/stat`.
    pub fn load(root: impl AsRef<Path>, id: &str) -> KeepResult<(Self, OnDiskState)> {
        let layout = ContainerLayout::new(root.as_ref(), id);
        let raw = fs::read_to_string(layout.state_file()).map_err(|e| {
            KeepError::RuntimeInvocation(format!("container '{id}' does not exist: {e}"))
        })?;
        let mut on_disk: OnDiskState = serde_json::from_str(&raw)?;

        let store = StateStore { layout };
        store.refresh_status(&mut on_disk)?;
        Ok((store, on_disk))
    }

    /// Promotes status to `stopped` when the recorded PID is gone or a
    /// zombie, persisting the change so the self-heal is visible to the
    /// next reader too.
    fn refresh_status(&self, on_disk: &mut OnDiskState) -> KeepResult<()> {
        if on_disk.status() == ContainerState::Stopped {
            return Ok(());
        }
        let Some(pid) = on_disk.pid() else {
            return Ok(());
        };

        let dead = match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => is_zombie_stat(&stat),
        };

        if dead {
            on_disk.state.set_status(ContainerState::Stopped);
            on_disk.finished_at = Some(Utc::now());
            self.persist(on_disk)?;
        }
        Ok(())
    }

    pub fn update_status(&self, on_disk: &mut OnDiskState, status: ContainerStatus) -> KeepResult<()> {
        on_disk.state.set_status(status);
        self.persist(on_disk)
    }

    pub fn set_pid(&self, on_disk: &mut OnDiskState, pid: i32) -> KeepResult<()> {
        on_disk.state.set_pid(Some(pid));
        self.persist(on_disk)
    }

    pub fn save_as_created(&self, on_disk: &mut OnDiskState) -> KeepResult<()> {
        on_disk.state.set_status(ContainerState::Created);
        self.persist(on_disk)
    }

    pub fn mark_started(&self, on_disk: &mut OnDiskState) -> KeepResult<()> {
        on_disk.state.set_status(ContainerState::Running);
        on_disk.started_at = Some(Utc::now());
        self.persist(on_disk)
    }

    /// spec §4.1 `Destroy`: removes the whole `<root>/<id>/` tree.
    pub fn destroy(&self) -> KeepResult<()> {
        if self.layout.root().exists() {
            fs::remove_dir_all(self.layout.root())?;
        }
        Ok(())
    }

    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    fn persist(&self, on_disk: &OnDiskState) -> KeepResult<()> {
        let json = serde_json::to_vec_pretty(on_disk)?;
        fs::write(self.layout.state_file(), json)?;
        Ok(())
    }
}

/// `/proc/<pid>/stat`'s second field (`comm`) is parenthesized and may
/// itself contain spaces or parens, so the third field is found relative to
/// the *last* `)` rather than by naive whitespace splitting.
fn is_zombie_stat(stat: &str) -> bool {
    match stat.rfind(')') {
        Some(idx) => stat[idx + 1..]
            .trim_start()
            .split_whitespace()
            .next()
            == Some("Z"),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_minimal_bundle(dir: &Path) {
        fs::create_dir_all(dir.join("rootfs")).unwrap();
        fs::write(
            dir.join("config.json"),
            r#"{
                "ociVersion": "1.0.2",
                "process": {"terminal": false, "cwd": "/", "args": ["/bin/true"]},
                "root": {"path": "rootfs"}
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn new_rejects_existing_directory() {
        let root = TempDir::new().unwrap();
        let bundle = TempDir::new().unwrap();
        write_minimal_bundle(bundle.path());

        let (_store, _state) = StateStore::new(root.path(), "c1", bundle.path()).unwrap();
        let err = StateStore::new(root.path(), "c1", bundle.path()).unwrap_err();
        assert!(matches!(err, KeepError::InvalidBundle(_)));
    }

    #[test]
    fn new_writes_creating_status() {
        let root = TempDir::new().unwrap();
        let bundle = TempDir::new().unwrap();
        write_minimal_bundle(bundle.path());

        let (_store, state) = StateStore::new(root.path(), "c1", bundle.path()).unwrap();
        assert_eq!(state.status(), ContainerState::Creating);

        let (_store2, reloaded) = StateStore::load(root.path(), "c1").unwrap();
        assert_eq!(reloaded.status(), ContainerState::Creating);
    }

    #[test]
    fn load_self_heals_when_pid_is_gone() {
        let root = TempDir::new().unwrap();
        let bundle = TempDir::new().unwrap();
        write_minimal_bundle(bundle.path());

        let (store, mut state) = StateStore::new(root.path(), "c2", bundle.path()).unwrap();
        store.update_status(&mut state, ContainerState::Running).unwrap();
        // A PID this large cannot be a real process on any Linux host.
        store.set_pid(&mut state, 2_000_000_000).unwrap();

        let (_store3, reloaded) = StateStore::load(root.path(), "c2").unwrap();
        assert_eq!(reloaded.status(), ContainerState::Stopped);
    }

    #[test]
    fn destroy_removes_the_directory() {
        let root = TempDir::new().unwrap();
        let bundle = TempDir::new().unwrap();
        write_minimal_bundle(bundle.path());

        let (store, _state) = StateStore::new(root.path(), "c3", bundle.path()).unwrap();
        assert!(store.layout().root().exists());
        store.destroy().unwrap();
        assert!(!store.layout().root().exists());
    }

    #[test]
    fn zombie_stat_parsing_handles_parens_in_comm() {
        assert!(is_zombie_stat("123 (bad (name)) Z 1 123 123"));
        assert!(!is_zombie_stat("123 (ok) S 1 123 123"));
    }
}
