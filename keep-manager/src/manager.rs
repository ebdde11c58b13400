//! The `Manager` (spec §4.5): bundle assembly from an `ImageView`, spawning
//! `keep-shim`, and the per-container operations exposed through
//! [`crate::shim_client`].
//!
//! Grounded on `keep-runtime::host::create`'s 14-step structure for the
//! shape of "assemble, then tear down on failure", and on
//! `keep-runtime::spec_cmd`'s builder-based OCI spec synthesis, generalized
//! here to overlay an image's config onto a default spec instead of writing
//! a fixed default.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use oci_spec::runtime::{
    HookBuilder, LinuxBuilder, LinuxNamespaceBuilder, LinuxNamespaceType, MountBuilder,
    ProcessBuilder, RootBuilder, Spec, SpecBuilder,
};

use keep_common::layout::BundleLayout;
use keep_common::{KeepError, KeepResult};

use crate::container_config::ContainerConfig;
use crate::image::ImageView;
use crate::overlay;
use crate::record::ShimRecord;
use crate::shim_client::ShimClient;

const DEFAULT_NAMESPACES: &[LinuxNamespaceType] = &[
    LinuxNamespaceType::Pid,
    LinuxNamespaceType::Network,
    LinuxNamespaceType::Ipc,
    LinuxNamespaceType::Uts,
    LinuxNamespaceType::Mount,
];

pub struct CreateOptions {
    pub image_name: String,
    pub image_dir: PathBuf,
    pub command_override: Option<Vec<String>>,
    pub env_override: Vec<(String, String)>,
    pub hostname_override: Option<String>,
    pub remove_on_exit: bool,
    pub shim_root: PathBuf,
    pub runtime_binary: String,
    pub exit_command: Option<PathBuf>,
    pub exit_command_args: Vec<String>,
}

pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub status: String,
}

pub struct Manager {
    /// Root directory under which bundles live: `<root>/containers/<id>/...`.
    root: PathBuf,
    self_exe: PathBuf,
}

impl Manager {
    pub fn new(root: PathBuf, self_exe: PathBuf) -> Self {
        Self { root, self_exe }
    }

    fn bundle(&self, id: &str) -> BundleLayout {
        BundleLayout::new(&self.root, id)
    }

    fn client_for(&self, id: &str) -> KeepResult<(ShimClient, ShimRecord)> {
        let bundle = self.bundle(id);
        let record = ShimRecord::load(&bundle)?;
        let layout = keep_common::layout::ContainerLayout::new(&record.shim_root, id);
        Ok((ShimClient::new(layout.shim_sock()), record))
    }

    /// Assembles the bundle (overlay rootfs, synthesized `config.json`),
    /// spawns `keep-shim`, and persists the shim record.
    pub fn create(&self, id: &str, opts: CreateOptions) -> KeepResult<()> {
        let bundle = self.bundle(id);
        if bundle.root().exists() {
            return Err(KeepError::InvalidBundle(format!("container '{id}' already exists")));
        }
        bundle.prepare()?;

        let result = self.create_inner(id, &bundle, &opts);
        if result.is_err() {
            tracing::error!(id, "create failed, tearing down bundle");
            let _ = overlay::unmount_overlay(&bundle.rootfs_dir());
            let _ = std::fs::remove_dir_all(bundle.root());
        }
        result
    }

    fn create_inner(&self, id: &str, bundle: &BundleLayout, opts: &CreateOptions) -> KeepResult<()> {
        let image = ImageView::open(&opts.image_name, &opts.image_dir)?;
        let mut config = ContainerConfig::from_oci_config(&image.config)?;
        if let Some(cmd) = &opts.command_override {
            config.apply_command_override(cmd.clone());
        }
        config.merge_env(opts.env_override.clone());

        overlay::mount_overlay(&image.lowerdir_layers(), &bundle.upper_dir(), &bundle.work_dir(), &bundle.rootfs_dir())?;
        overlay::process_whiteouts(&bundle.rootfs_dir())?;

        let hostname = opts.hostname_override.clone().unwrap_or_else(|| id.to_string());
        let spec = synthesize_spec(&config, &hostname, &self.self_exe)?;
        spec.save(bundle.config_file())
            .map_err(|e| KeepError::Other(format!("failed to write {}: {e}", bundle.config_file().display())))?;

        // The OCI spec has no room for exposed-port metadata; the network-setup
        // hook reads this sidecar file instead of re-deriving it from the image.
        let ports_json = serde_json::json!({
            "tcp": config.tcp_ports(),
            "udp": config.udp_ports(),
        });
        std::fs::write(bundle.root().join("exposed-ports.json"), serde_json::to_vec(&ports_json)?)?;

        self.spawn_shim(id, bundle, opts)
    }

    fn spawn_shim(&self, id: &str, bundle: &BundleLayout, opts: &CreateOptions) -> KeepResult<()> {
        std::fs::create_dir_all(&opts.shim_root)?;

        let mut cmd = Command::new("keep-shim");
        cmd.arg("--bundle")
            .arg(bundle.root())
            .arg("--container-id")
            .arg(id)
            .arg("--runtime")
            .arg(&opts.runtime_binary)
            .arg("--root")
            .arg(&opts.shim_root);
        if let Some(exit_cmd) = &opts.exit_command {
            cmd.arg("--exit-command").arg(exit_cmd);
            for arg in &opts.exit_command_args {
                cmd.arg("--exit-command-arg").arg(arg);
            }
        }

        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| KeepError::RuntimeInvocation(format!("failed to spawn keep-shim: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| KeepError::Ipc("shim stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let _socket_path = lines
            .next()
            .transpose()
            .map_err(KeepError::Io)?
            .ok_or_else(|| KeepError::Ipc("shim exited before printing its control socket".into()))?;

        let record = ShimRecord {
            id: id.to_string(),
            runtime_name: opts.runtime_binary.clone(),
            shim_root: opts.shim_root.clone(),
            image_name: opts.image_name.clone(),
            remove_on_exit: opts.remove_on_exit,
            final_state: None,
        };
        record.save(bundle)
    }

    pub fn start(&self, id: &str) -> KeepResult<()> {
        let (client, _) = self.client_for(id)?;
        client.start_container()
    }

    pub fn stop(&self, id: &str) -> KeepResult<()> {
        let (client, _) = self.client_for(id)?;
        client.stop_container()
    }

    pub fn delete(&self, id: &str) -> KeepResult<()> {
        let bundle = self.bundle(id);
        let (client, _) = self.client_for(id)?;
        client.terminate()?;
        overlay::unmount_overlay(&bundle.rootfs_dir())?;
        std::fs::remove_dir_all(bundle.root())?;
        Ok(())
    }

    pub fn state(&self, id: &str) -> KeepResult<serde_json::Value> {
        let (client, record) = self.client_for(id)?;
        client.get_state().or_else(|_| {
            record
                .final_state
                .clone()
                .ok_or_else(|| KeepError::LifecycleViolation {
                    id: id.to_string(),
                    status: "unknown".into(),
                    action: "state".into(),
                })
        })
    }

    pub fn list(&self) -> KeepResult<Vec<ContainerSummary>> {
        let mut out = Vec::new();
        for id in crate::record::list_ids(&self.root)? {
            let (client, record) = match self.client_for(&id) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let status = client
                .get_state()
                .ok()
                .and_then(|v| v.pointer("/status").and_then(|s| s.as_str()).map(str::to_string))
                .or_else(|| {
                    record
                        .final_state
                        .as_ref()
                        .and_then(|v| v.pointer("/status").and_then(|s| s.as_str()).map(str::to_string))
                })
                .unwrap_or_else(|| "unknown".to_string());
            out.push(ContainerSummary { id, image: record.image_name, status });
        }
        Ok(out)
    }

    /// StopContainer (remove-on-exit forced off) + fresh Create (spec
    /// §4.5 "Restart").
    pub fn restart(&self, id: &str) -> KeepResult<()> {
        let bundle = self.bundle(id);
        let mut record = ShimRecord::load(&bundle)?;
        record.remove_on_exit = false;
        record.save(&bundle)?;

        let (client, _) = self.client_for(id)?;
        let _ = client.stop_container();
        let _ = client.terminate();
        overlay::unmount_overlay(&bundle.rootfs_dir())?;

        let opts = CreateOptions {
            image_name: record.image_name.clone(),
            image_dir: bundle.root().join("image"),
            command_override: None,
            env_override: Vec::new(),
            hostname_override: None,
            remove_on_exit: false,
            shim_root: record.shim_root.clone(),
            runtime_binary: record.runtime_name.clone(),
            exit_command: None,
            exit_command_args: Vec::new(),
        };
        std::fs::remove_dir_all(bundle.root())?;
        self.create(id, opts)
    }
}

fn synthesize_spec(config: &ContainerConfig, hostname: &str, self_exe: &Path) -> KeepResult<Spec> {
    let namespaces = DEFAULT_NAMESPACES
        .iter()
        .map(|typ| LinuxNamespaceBuilder::default().typ(*typ).build().unwrap())
        .collect::<Vec<_>>();

    let network_hook = HookBuilder::default()
        .path(self_exe)
        .args(vec![
            self_exe.to_string_lossy().to_string(),
            "hook".to_string(),
            "network-setup".to_string(),
        ])
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let linux = LinuxBuilder::default()
        .namespaces(namespaces)
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let process = ProcessBuilder::default()
        .terminal(false)
        .cwd(config.working_dir.clone())
        .args(config.cmd.clone())
        .env(config.env.clone())
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let root = RootBuilder::default()
        .path("rootfs")
        .readonly(false)
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let mounts = vec![
        MountBuilder::default()
            .destination("/proc")
            .source("proc")
            .typ("proc")
            .build()
            .map_err(|e| KeepError::Other(e.to_string()))?,
    ];

    let hooks = oci_spec::runtime::HooksBuilder::default()
        .create_runtime(vec![network_hook])
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    SpecBuilder::default()
        .version("1.0.2")
        .process(process)
        .root(root)
        .hostname(hostname)
        .mounts(mounts)
        .linux(linux)
        .hooks(hooks)
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_spec_merges_config_into_process() {
        let config = ContainerConfig {
            cmd: vec!["/bin/echo".into(), "hi".into()],
            exposed_ports: vec![],
            env: vec!["PATH=/bin".into()],
            working_dir: "/app".into(),
        };
        let spec = synthesize_spec(&config, "c1", Path::new("/usr/bin/keepctl")).unwrap();
        let process = spec.process().as_ref().unwrap();
        assert_eq!(process.args().as_ref().unwrap(), &vec!["/bin/echo".to_string(), "hi".to_string()]);
        assert_eq!(process.cwd(), &PathBuf::from("/app"));
        assert_eq!(spec.hostname().as_deref(), Some("c1"));
        let hooks = spec.hooks().as_ref().unwrap();
        assert_eq!(hooks.create_runtime().as_ref().unwrap().len(), 1);
    }

    #[test]
    fn create_rejects_an_existing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(dir.path().to_path_buf(), PathBuf::from("/usr/bin/keepctl"));
        let bundle = manager.bundle("dup");
        bundle.prepare().unwrap();

        let opts = CreateOptions {
            image_name: "x".into(),
            image_dir: dir.path().join("image"),
            command_override: None,
            env_override: Vec::new(),
            hostname_override: None,
            remove_on_exit: false,
            shim_root: dir.path().join("shim"),
            runtime_binary: "keep-runtime".into(),
            exit_command: None,
            exit_command_args: Vec::new(),
        };
        let err = manager.create("dup", opts).unwrap_err();
        assert!(matches!(err, KeepError::InvalidBundle(_)));
    }
}
