//! The "Shim record" (spec §3): one per manager-owned container — runtime
//! name, the shim's own root directory (so the manager can rebuild its
//! socket/pid paths via `ContainerLayout`), and the final state captured
//! once the shim has been torn down and can no longer answer `GetState`.

use std::path::Path;

use keep_common::layout::BundleLayout;
use keep_common::KeepResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimRecord {
    pub id: String,
    pub runtime_name: String,
    /// Root directory the shim was launched with (`keep-shim --root`); the
    /// manager derives the shim's socket/pid/log paths from this via
    /// `ContainerLayout::new(shim_root, id)` rather than storing them
    /// redundantly.
    pub shim_root: std::path::PathBuf,
    /// The image name the bundle's overlay was assembled from, so
    /// `restart` can re-run `Create` without needing it passed again.
    pub image_name: String,
    /// Whether the manager deletes the bundle once the container has
    /// exited and the shim has terminated. `restart` forces this off
    /// before re-creating (spec §4.5 "Restart").
    #[serde(default)]
    pub remove_on_exit: bool,
    /// Non-empty once the container has exited and the shim process itself
    /// has terminated — answers state queries after the shim is gone.
    #[serde(default)]
    pub final_state: Option<serde_json::Value>,
}

impl ShimRecord {
    fn record_path(bundle: &BundleLayout) -> std::path::PathBuf {
        bundle.root().join("shim.json")
    }

    pub fn save(&self, bundle: &BundleLayout) -> KeepResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(Self::record_path(bundle), json)?;
        Ok(())
    }

    pub fn load(bundle: &BundleLayout) -> KeepResult<Self> {
        let raw = std::fs::read_to_string(Self::record_path(bundle))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn capture_final_state(&mut self, bundle: &BundleLayout, state: serde_json::Value) -> KeepResult<()> {
        self.final_state = Some(state);
        self.save(bundle)
    }

    pub fn exists(bundle: &BundleLayout) -> bool {
        Self::record_path(bundle).exists()
    }
}

/// Lists the container IDs the manager currently has bundles for.
pub fn list_ids(manager_root: &Path) -> KeepResult<Vec<String>> {
    let containers_dir = manager_root.join("containers");
    let mut ids = Vec::new();
    let Ok(entries) = std::fs::read_dir(&containers_dir) else {
        return Ok(ids);
    };
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrips_through_disk() {
        let root = tempfile::tempdir().unwrap();
        let bundle = BundleLayout::new(root.path(), "c1");
        bundle.prepare().unwrap();

        let record = ShimRecord {
            id: "c1".to_string(),
            runtime_name: "keep-runtime".to_string(),
            shim_root: "/run/keep-shim".into(),
            image_name: "test/image:latest".to_string(),
            remove_on_exit: false,
            final_state: None,
        };
        record.save(&bundle).unwrap();

        let loaded = ShimRecord::load(&bundle).unwrap();
        assert_eq!(loaded.id, "c1");
        assert!(loaded.final_state.is_none());
    }

    #[test]
    fn list_ids_enumerates_bundle_directories() {
        let root = tempfile::tempdir().unwrap();
        BundleLayout::new(root.path(), "a").prepare().unwrap();
        BundleLayout::new(root.path(), "b").prepare().unwrap();

        let ids = list_ids(root.path()).unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
