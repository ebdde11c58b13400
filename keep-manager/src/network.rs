//! The network-setup hook (spec §4.5 "Network setup hook"): a `CreateRuntime`
//! hook that re-invokes the manager binary itself as
//! `keepctl hook network-setup`, running inside the container's freshly
//! created network namespace. It brings up `slirp4netns` and programs any
//! published ports over its control socket.
//!
//! Grounded on the teacher's approach to exposed ports
//! (`boxlite::images::config`, reused here via [`crate::container_config`])
//! and on `boxlite`'s pattern of shelling out to a namespace-scoped helper
//! rather than linking a netns library.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use keep_common::{KeepError, KeepResult};
use rand::Rng;

/// A single `host:guest` port forward to program into slirp4netns.
#[derive(Debug, Clone)]
pub struct PortForward {
    pub protocol: &'static str,
    pub host_addr: String,
    pub host_port: u16,
    pub guest_port: u16,
}

/// Picks a random high port for "publish all exposed ports" mode, mirroring
/// Docker's `-P` ephemeral range.
pub fn random_host_port() -> u16 {
    rand::rng().random_range(32768..=60999)
}

pub fn resolve_forwards(exposed_tcp: &[u16], exposed_udp: &[u16], publish_all: bool) -> Vec<PortForward> {
    let mut forwards = Vec::new();
    if !publish_all {
        return forwards;
    }
    for &port in exposed_tcp {
        forwards.push(PortForward {
            protocol: "tcp",
            host_addr: "0.0.0.0".to_string(),
            host_port: random_host_port(),
            guest_port: port,
        });
    }
    for &port in exposed_udp {
        forwards.push(PortForward {
            protocol: "udp",
            host_addr: "0.0.0.0".to_string(),
            host_port: random_host_port(),
            guest_port: port,
        });
    }
    forwards
}

/// Spawns `slirp4netns` attached to `netns_pid`'s network namespace and
/// writes its PID to `pid_file`. The caller is expected to already be
/// running inside (or have entered) that namespace's mount context for
/// `rootfs` when [`write_resolv_conf`] is called.
pub fn spawn_slirp4netns(netns_pid: u32, api_sock: &Path, pid_file: &Path) -> KeepResult<Child> {
    let child = Command::new("slirp4netns")
        .args([
            "--configure",
            "--mtu=65520",
            "--disable-host-loopback",
            "--api-socket",
            &api_sock.to_string_lossy(),
            &netns_pid.to_string(),
            "tap0",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| KeepError::Syscall(format!("failed to spawn slirp4netns: {e}")))?;

    std::fs::write(pid_file, child.id().to_string())?;
    Ok(child)
}

/// Writes `/etc/resolv.conf` inside the container rootfs pointing at
/// slirp4netns's built-in resolver (spec §4.5: "nameserver 10.0.2.3").
pub fn write_resolv_conf(rootfs: &Path) -> KeepResult<()> {
    let path = rootfs.join("etc/resolv.conf");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, "nameserver 10.0.2.3\n")?;
    Ok(())
}

/// Waits for the API socket to appear, then issues one `add_hostfwd`
/// request per forward.
pub fn program_hostfwds(api_sock: &Path, forwards: &[PortForward]) -> KeepResult<()> {
    if forwards.is_empty() {
        return Ok(());
    }
    for attempt in 0..50 {
        if api_sock.exists() {
            break;
        }
        if attempt == 49 {
            return Err(KeepError::Syscall(format!(
                "slirp4netns API socket {} never appeared",
                api_sock.display()
            )));
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    for fwd in forwards {
        add_hostfwd(api_sock, fwd)?;
    }
    Ok(())
}

fn add_hostfwd(api_sock: &Path, fwd: &PortForward) -> KeepResult<()> {
    let request = serde_json::json!({
        "execute": "add_hostfwd",
        "arguments": {
            "proto": fwd.protocol,
            "host_addr": fwd.host_addr,
            "host_port": fwd.host_port,
            "guest_port": fwd.guest_port,
        }
    });

    let mut conn = UnixStream::connect(api_sock)
        .map_err(|e| KeepError::Transport { path: api_sock.to_path_buf(), source: e })?;
    conn.write_all(request.to_string().as_bytes())
        .map_err(|e| KeepError::Ipc(format!("failed to write add_hostfwd request: {e}")))?;

    let mut response = String::new();
    conn.read_to_string(&mut response)
        .map_err(|e| KeepError::Ipc(format!("failed to read add_hostfwd response: {e}")))?;

    let parsed: serde_json::Value = serde_json::from_str(&response)
        .map_err(|e| KeepError::Ipc(format!("malformed slirp4netns response '{response}': {e}")))?;
    if let Some(err) = parsed.get("error") {
        return Err(KeepError::Ipc(format!("slirp4netns rejected add_hostfwd: {err}")));
    }
    Ok(())
}

/// Entry point for `keepctl hook network-setup`, run by the runtime as the
/// bundle's `CreateRuntime` hook. `netns_pid` is read from the hook's
/// stdin state payload (`pid` field, per the OCI runtime spec) by the
/// caller; this function only drives slirp4netns once that PID is known.
pub fn run_hook(netns_pid: u32, rootfs: &Path, sock_dir: &Path, forwards: &[PortForward]) -> KeepResult<()> {
    std::fs::create_dir_all(sock_dir)?;
    let api_sock = sock_dir.join("slirp4netns.sock");
    let pid_file = sock_dir.join("slirp4netns.pid");

    let _child = spawn_slirp4netns(netns_pid, &api_sock, &pid_file)?;
    write_resolv_conf(rootfs)?;
    program_hostfwds(&api_sock, forwards)?;
    Ok(())
}

pub fn slirp_pid_file(sock_dir: &Path) -> PathBuf {
    sock_dir.join("slirp4netns.pid")
}

/// Reads the `exposed-ports.json` sidecar `Manager::create` leaves next to
/// `config.json`, since the OCI spec itself has no field for it.
pub fn load_exposed_ports(bundle_root: &Path) -> KeepResult<(Vec<u16>, Vec<u16>)> {
    let path = bundle_root.join("exposed-ports.json");
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| KeepError::InvalidBundle(format!("failed to read {}: {e}", path.display())))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let tcp = value
        .get("tcp")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|p| p.as_u64().map(|n| n as u16)).collect())
        .unwrap_or_default();
    let udp = value
        .get("udp")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|p| p.as_u64().map(|n| n as u16)).collect())
        .unwrap_or_default();
    Ok((tcp, udp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_forwards_empty_unless_publish_all() {
        assert!(resolve_forwards(&[80], &[53], false).is_empty());
    }

    #[test]
    fn resolve_forwards_picks_one_entry_per_port() {
        let forwards = resolve_forwards(&[80, 443], &[53], true);
        assert_eq!(forwards.len(), 3);
        assert_eq!(forwards[0].protocol, "tcp");
        assert_eq!(forwards[2].protocol, "udp");
    }

    #[test]
    fn write_resolv_conf_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write_resolv_conf(dir.path()).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("etc/resolv.conf")).unwrap();
        assert_eq!(contents, "nameserver 10.0.2.3\n");
    }

    #[test]
    fn program_hostfwds_times_out_when_socket_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let forwards = resolve_forwards(&[80], &[], true);
        let err = program_hostfwds(&dir.path().join("never.sock"), &forwards).unwrap_err();
        assert!(matches!(err, KeepError::Syscall(_)));
    }
}
