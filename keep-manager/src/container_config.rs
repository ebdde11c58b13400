//! Container configuration extracted from an OCI image config (spec §4.5
//! "Synthesize the OCI spec ... overlay the image config").
//!
//! Ported from the teacher's `boxlite::images::config::ContainerConfig`
//! verbatim in behavior, retargeted to `KeepError`.

use std::collections::HashMap;

use keep_common::{KeepError, KeepResult};

#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// The image's ENTRYPOINT, kept separate from `cmd` so a command
    /// override can be appended to it instead of replacing it outright
    /// (spec §4.5: `Args = [entrypoint-override or image.entrypoint] +
    /// [user command or image.cmd]` — entrypoint is never optional absent
    /// an `--entrypoint-override` flag, which this CLI doesn't have).
    pub entrypoint: Vec<String>,
    /// ENTRYPOINT + CMD from the image config, or ENTRYPOINT + a user
    /// override once one has been applied. This is what feeds
    /// `ProcessBuilder::args()`.
    pub cmd: Vec<String>,
    /// `"<port>/<proto>"` entries from the image's EXPOSE directives.
    pub exposed_ports: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
}

impl ContainerConfig {
    /// Applies a user command override by appending it to the image
    /// entrypoint rather than discarding the entrypoint wholesale.
    pub fn apply_command_override(&mut self, command: Vec<String>) {
        self.cmd = self.entrypoint.clone();
        self.cmd.extend(command);
    }

    /// "port/proto" -> (port, proto), defaulting the protocol to tcp.
    pub fn parse_exposed_port(port_spec: &str) -> Option<(u16, &str)> {
        let mut parts = port_spec.split('/');
        let port: u16 = parts.next()?.parse().ok()?;
        let protocol = parts.next().unwrap_or("tcp");
        Some((port, protocol))
    }

    pub fn tcp_ports(&self) -> Vec<u16> {
        self.exposed_ports
            .iter()
            .filter_map(|spec| Self::parse_exposed_port(spec))
            .filter(|(_, proto)| *proto == "tcp")
            .map(|(port, _)| port)
            .collect()
    }

    pub fn udp_ports(&self) -> Vec<u16> {
        self.exposed_ports
            .iter()
            .filter_map(|spec| Self::parse_exposed_port(spec))
            .filter(|(_, proto)| *proto == "udp")
            .map(|(port, _)| port)
            .collect()
    }

    /// User-provided env vars override image env vars with the same key;
    /// result is sorted for a deterministic `config.json`.
    pub fn merge_env(&mut self, user_env: Vec<(String, String)>) {
        let mut env_map: HashMap<String, String> = HashMap::new();
        for entry in &self.env {
            if let Some(pos) = entry.find('=') {
                env_map.insert(entry[..pos].to_string(), entry[pos + 1..].to_string());
            }
        }
        for (key, value) in user_env {
            env_map.insert(key, value);
        }
        let mut env_vec: Vec<String> = env_map.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        env_vec.sort();
        self.env = env_vec;
    }

    pub fn from_oci_config(image_config: &oci_spec::image::ImageConfiguration) -> KeepResult<Self> {
        let config = image_config
            .config()
            .as_ref()
            .ok_or_else(|| KeepError::InvalidBundle("image config missing 'config' object".into()))?;

        let entrypoint: Vec<String> = config
            .entrypoint()
            .as_ref()
            .map(|ep| ep.iter().cloned().collect())
            .unwrap_or_default();

        let mut cmd = entrypoint.clone();
        if let Some(c) = config.cmd().as_ref() {
            cmd.extend(c.iter().cloned());
        }
        if cmd.is_empty() {
            cmd = vec!["/bin/sh".to_string()];
        }

        let env = config.env().clone().unwrap_or_default();
        let working_dir = config
            .working_dir()
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "/".to_string());
        let exposed_ports = config.exposed_ports().clone().unwrap_or_default();

        Ok(ContainerConfig { entrypoint, cmd, env, working_dir, exposed_ports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("8080/tcp", Some((8080, "tcp")))]
    #[case("53/udp", Some((53, "udp")))]
    #[case("8080", Some((8080, "tcp")))]
    #[case("bogus", None)]
    fn parses_port_and_protocol(#[case] spec: &str, #[case] expected: Option<(u16, &str)>) {
        assert_eq!(ContainerConfig::parse_exposed_port(spec), expected);
    }

    #[test]
    fn filters_tcp_and_udp_ports() {
        let config = ContainerConfig {
            exposed_ports: vec!["8080/tcp".into(), "443/tcp".into(), "53/udp".into()],
            ..Default::default()
        };
        assert_eq!(config.tcp_ports(), vec![8080, 443]);
        assert_eq!(config.udp_ports(), vec![53]);
    }

    #[test]
    fn command_override_is_appended_to_entrypoint_not_replacing_it() {
        let mut config = ContainerConfig {
            entrypoint: vec!["/bin/entrypoint.sh".into()],
            cmd: vec!["/bin/entrypoint.sh".into(), "default-arg".into()],
            ..Default::default()
        };
        config.apply_command_override(vec!["custom-arg".into()]);
        assert_eq!(config.cmd, vec!["/bin/entrypoint.sh".to_string(), "custom-arg".to_string()]);
    }

    #[test]
    fn merge_env_overrides_by_key_and_sorts() {
        let mut config = ContainerConfig {
            env: vec!["PATH=/bin".into(), "HOME=/root".into()],
            ..Default::default()
        };
        config.merge_env(vec![("HOME".to_string(), "/home/u".to_string())]);
        assert_eq!(config.env, vec!["HOME=/home/u".to_string(), "PATH=/bin".to_string()]);
    }
}
