//! The "Image & Layer view" (spec §3): a collaborator surface the manager
//! consumes but does not author. OCI image registry download/untar and the
//! local image catalog are explicitly out of scope (spec §1); this module
//! only reads an already-resolved local directory:
//!
//! ```text
//! <image_dir>/config.json   OCI image configuration
//! <image_dir>/layers/<n>/   one directory per layer, named so that
//!                           lexicographic order is bottom-to-top
//! ```

use std::path::{Path, PathBuf};

use oci_spec::image::ImageConfiguration;

use keep_common::{KeepError, KeepResult};

pub struct ImageView {
    pub name: String,
    pub config: ImageConfiguration,
    /// Bottom-to-top layer directories, as laid out on disk.
    pub layers: Vec<PathBuf>,
}

impl ImageView {
    pub fn open(name: &str, image_dir: &Path) -> KeepResult<Self> {
        let config_path = image_dir.join("config.json");
        let config_json = std::fs::read_to_string(&config_path).map_err(|e| {
            KeepError::InvalidBundle(format!("failed to read {}: {e}", config_path.display()))
        })?;
        let config: ImageConfiguration = serde_json::from_str(&config_json).map_err(|e| {
            KeepError::InvalidBundle(format!("failed to parse {}: {e}", config_path.display()))
        })?;

        let layers_dir = image_dir.join("layers");
        let mut layers: Vec<PathBuf> = std::fs::read_dir(&layers_dir)
            .map_err(|e| KeepError::InvalidBundle(format!("failed to read {}: {e}", layers_dir.display())))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        layers.sort();
        if layers.is_empty() {
            return Err(KeepError::InvalidBundle(format!(
                "image '{name}' has no layers under {}",
                layers_dir.display()
            )));
        }

        Ok(Self { name: name.to_string(), config, layers })
    }

    /// Overlay lowerdir order (spec §4.5 "highest layer leftmost").
    pub fn lowerdir_layers(&self) -> Vec<PathBuf> {
        self.layers.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(dir: &Path) {
        std::fs::write(dir.join("config.json"), r#"{"config":{"Cmd":["/bin/sh"]}}"#).unwrap();
        std::fs::create_dir_all(dir.join("layers").join("0")).unwrap();
        std::fs::create_dir_all(dir.join("layers").join("1")).unwrap();
    }

    #[test]
    fn opens_layers_in_order_and_reverses_for_lowerdir() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path());

        let view = ImageView::open("test/image:latest", dir.path()).unwrap();
        assert_eq!(view.layers.len(), 2);
        assert!(view.layers[0].ends_with("0"));
        assert!(view.layers[1].ends_with("1"));

        let lowerdir = view.lowerdir_layers();
        assert!(lowerdir[0].ends_with("1"));
        assert!(lowerdir[1].ends_with("0"));
    }

    #[test]
    fn rejects_an_image_with_no_layers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"config":{}}"#).unwrap();
        std::fs::create_dir_all(dir.path().join("layers")).unwrap();

        let err = ImageView::open("empty", dir.path()).unwrap_err();
        assert!(matches!(err, KeepError::InvalidBundle(_)));
    }
}
