//! Environment configuration
//!
//! Environments are TOML files under `environments/<name>.toml`. Unknown
//! keys are collected as non-fatal warnings instead of being rejected.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConvoyError, ConvoyResult};
use crate::transport::ConnectMethod;

/// Per-component override values, sent to every agent during setup.
pub type Overrides = BTreeMap<String, BTreeMap<String, String>>;

/// On-disk environment schema.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_connect_method")]
    pub connect_method: ConnectMethod,

    /// Account the agents must run as. Defaults to the invoking user.
    #[serde(default)]
    pub service_user: Option<String>,

    /// How the remote repository is kept current.
    #[serde(default = "default_update_method")]
    pub update_method: String,

    /// Remote location of the source repository.
    #[serde(default = "default_target_directory")]
    pub target_directory: String,

    /// Remote base directory the provisioned runtime lives under.
    #[serde(default = "default_deployment_base")]
    pub deployment_base: String,

    /// Interpreter used to start agents before the runtime is provisioned.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Runtime version provisioned on the hosts.
    #[serde(default = "default_version")]
    pub version: String,

    /// Provision the runtime in development mode.
    #[serde(default)]
    pub develop: bool,

    #[serde(default, rename = "host")]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub overrides: Overrides,
}

/// One declared host.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub fqdn: String,
    #[serde(default)]
    pub ignore: bool,
}

fn default_connect_method() -> ConnectMethod {
    ConnectMethod::Ssh
}

fn default_update_method() -> String {
    "rsync".to_string()
}

fn default_target_directory() -> String {
    "~/deployment".to_string()
}

fn default_deployment_base() -> String {
    "~/deployment".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Load an environment file and collect unknown-key warnings.
pub fn load_with_warnings(path: &Path) -> ConvoyResult<(EnvironmentConfig, Vec<String>)> {
    let content = fs::read_to_string(path)?;

    let mut unknown: Vec<String> = Vec::new();
    let deserializer = toml::de::Deserializer::new(&content);

    let config: EnvironmentConfig = serde_ignored::deserialize(deserializer, |key| {
        unknown.push(key.to_string());
    })
    .map_err(|e| {
        ConvoyError::Configuration(format!(
            "invalid environment file {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok((config, unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_env(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_minimal_environment_uses_defaults() {
        let file = write_env(
            r#"
            [[host]]
            fqdn = "web1.example.com"
            "#,
        );
        let (config, warnings) = load_with_warnings(file.path()).unwrap();
        assert_eq!(config.connect_method, ConnectMethod::Ssh);
        assert_eq!(config.update_method, "rsync");
        assert_eq!(config.interpreter, "python3");
        assert!(!config.develop);
        assert_eq!(config.hosts.len(), 1);
        assert!(!config.hosts[0].ignore);
        assert!(warnings.is_empty());
    }

    #[test]
    fn load_full_environment() {
        let file = write_env(
            r#"
            connect_method = "vagrant"
            service_user = "deploy"
            target_directory = "/srv/repo"
            deployment_base = "/srv/base"

            [[host]]
            fqdn = "web1.example.com"

            [[host]]
            fqdn = "db1.example.com"
            ignore = true

            [overrides.frontend]
            port = "8080"
            "#,
        );
        let (config, _) = load_with_warnings(file.path()).unwrap();
        assert_eq!(config.connect_method, ConnectMethod::Vagrant);
        assert_eq!(config.service_user.as_deref(), Some("deploy"));
        assert_eq!(config.hosts[1].fqdn, "db1.example.com");
        assert!(config.hosts[1].ignore);
        assert_eq!(config.overrides["frontend"]["port"], "8080");
    }

    #[test]
    fn load_preserves_host_declaration_order() {
        let file = write_env(
            r#"
            [[host]]
            fqdn = "c.example.com"
            [[host]]
            fqdn = "a.example.com"
            [[host]]
            fqdn = "b.example.com"
            "#,
        );
        let (config, _) = load_with_warnings(file.path()).unwrap();
        let fqdns: Vec<&str> = config.hosts.iter().map(|h| h.fqdn.as_str()).collect();
        assert_eq!(
            fqdns,
            vec!["c.example.com", "a.example.com", "b.example.com"]
        );
    }

    #[test]
    fn unknown_keys_are_warnings_not_errors() {
        let file = write_env(
            r#"
            connection_method = "ssh"

            [[host]]
            fqdn = "web1.example.com"
            "#,
        );
        let (_, warnings) = load_with_warnings(file.path()).unwrap();
        assert_eq!(warnings, vec!["connection_method".to_string()]);
    }

    #[test]
    fn invalid_connect_method_is_a_configuration_error() {
        let file = write_env(r#"connect_method = "telnet""#);
        let err = load_with_warnings(file.path()).unwrap_err();
        assert!(matches!(err, ConvoyError::Configuration(_)));
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let file = write_env("[[host");
        let err = load_with_warnings(file.path()).unwrap_err();
        assert!(matches!(err, ConvoyError::Configuration(_)));
    }
}
