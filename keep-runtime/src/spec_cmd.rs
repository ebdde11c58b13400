//! `spec [--bundle <path>] [--rootless]`: writes a default `config.json`
//! (SPEC_FULL.md supplemented feature, grounded in the `yacr spec`
//! subcommand of the original source and `runtime-tools`' generator).

use std::path::Path;

use oci_spec::runtime::{
    LinuxBuilder, LinuxIdMappingBuilder, LinuxNamespaceBuilder, LinuxNamespaceType, MountBuilder,
    ProcessBuilder, RootBuilder, Spec, SpecBuilder,
};

use keep_common::{KeepError, KeepResult};

const DEFAULT_NAMESPACES: &[LinuxNamespaceType] = &[
    LinuxNamespaceType::Pid,
    LinuxNamespaceType::Network,
    LinuxNamespaceType::Ipc,
    LinuxNamespaceType::Uts,
    LinuxNamespaceType::Mount,
];

pub fn write_default(bundle: &Path, rootless: bool) -> KeepResult<()> {
    let spec = default_spec(rootless)?;
    std::fs::create_dir_all(bundle)?;
    std::fs::create_dir_all(bundle.join("rootfs"))?;
    let config_path = bundle.join("config.json");
    spec.save(&config_path)
        .map_err(|e| KeepError::Other(format!("failed to write {}: {e}", config_path.display())))?;
    Ok(())
}

fn default_spec(rootless: bool) -> KeepResult<Spec> {
    let mut namespace_types = DEFAULT_NAMESPACES.to_vec();
    if rootless {
        namespace_types.push(LinuxNamespaceType::User);
    }
    let namespaces = namespace_types
        .into_iter()
        .map(|typ| LinuxNamespaceBuilder::default().typ(typ).build().unwrap())
        .collect::<Vec<_>>();

    let mut linux_builder = LinuxBuilder::default();
    linux_builder = linux_builder.namespaces(namespaces);
    if rootless {
        let uid = nix::unistd::geteuid().as_raw();
        let gid = nix::unistd::getegid().as_raw();
        let uid_map = LinuxIdMappingBuilder::default()
            .container_id(0u32)
            .host_id(uid)
            .size(1u32)
            .build()
            .map_err(|e| KeepError::Other(e.to_string()))?;
        let gid_map = LinuxIdMappingBuilder::default()
            .container_id(0u32)
            .host_id(gid)
            .size(1u32)
            .build()
            .map_err(|e| KeepError::Other(e.to_string()))?;
        linux_builder = linux_builder.uid_mappings(vec![uid_map]).gid_mappings(vec![gid_map]);
    }
    let linux = linux_builder
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let process = ProcessBuilder::default()
        .terminal(true)
        .cwd("/")
        .args(vec!["sh".to_string()])
        .env(vec![
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            "TERM=xterm".to_string(),
        ])
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let root = RootBuilder::default()
        .path("rootfs")
        .readonly(false)
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))?;

    let mounts = default_mounts();

    SpecBuilder::default()
        .version("1.0.2")
        .process(process)
        .root(root)
        .hostname("keep")
        .mounts(mounts)
        .linux(linux)
        .build()
        .map_err(|e| KeepError::Other(e.to_string()))
}

fn default_mounts() -> Vec<oci_spec::runtime::Mount> {
    let entries: &[(&str, &str, &str, &[&str])] = &[
        ("/proc", "proc", "proc", &[]),
        (
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        (
            "/dev/pts",
            "devpts",
            "devpts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"],
        ),
        ("/dev/shm", "shm", "tmpfs", &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"]),
        ("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        ("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
        ("/sys/fs/cgroup", "cgroup", "cgroup", &["nosuid", "noexec", "nodev", "relatime", "ro"]),
    ];

    entries
        .iter()
        .map(|(dest, source, typ, opts)| {
            MountBuilder::default()
                .destination(*dest)
                .source(*source)
                .typ(*typ)
                .options(opts.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .build()
                .unwrap()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_a_loadable_config() {
        let bundle = TempDir::new().unwrap();
        write_default(bundle.path(), false).unwrap();
        let spec = Spec::load(bundle.path().join("config.json")).unwrap();
        assert_eq!(spec.hostname().as_deref(), Some("keep"));
    }

    #[test]
    fn rootless_adds_user_namespace_and_mappings() {
        let bundle = TempDir::new().unwrap();
        write_default(bundle.path(), true).unwrap();
        let spec = Spec::load(bundle.path().join("config.json")).unwrap();
        let linux = spec.linux().as_ref().unwrap();
        assert!(linux
            .namespaces()
            .as_ref()
            .unwrap()
            .iter()
            .any(|n| *n.typ() == LinuxNamespaceType::User));
        assert!(linux.uid_mappings().is_some());
    }
}
