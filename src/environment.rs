//! Deployment environments
//!
//! An environment is the scalar settings shared by a deployment run plus
//! its declared hosts, in file order. Host order is load-order-stable: the
//! first non-ignored host doubles as the reference host that supplies the
//! deployment plan.

use std::fs;
use std::path::Path;

use crate::config::{self, Overrides};
use crate::error::{ConvoyError, ConvoyResult};
use crate::host::Host;
use crate::transport::ConnectMethod;

/// Settings shared by every host of an environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub name: String,
    pub platform: Option<String>,
    pub timeout: Option<u64>,
    pub connect_method: ConnectMethod,
    pub service_user: String,
    pub update_method: String,
    pub target_directory: String,
    pub deployment_base: String,
    pub interpreter: String,
    pub version: String,
    pub develop: bool,
    pub overrides: Overrides,
}

/// A loaded environment: settings plus the ordered host set.
#[derive(Debug)]
pub struct Environment {
    pub settings: Settings,
    pub hosts: Vec<Host>,
}

impl Environment {
    /// Load `<search>/<name>.toml`. Returns the environment and any
    /// unknown-key warnings from the file.
    pub fn load(
        name: &str,
        search: &Path,
        platform: Option<String>,
        timeout: Option<u64>,
    ) -> ConvoyResult<(Self, Vec<String>)> {
        let path = search.join(format!("{}.toml", name));
        if !path.is_file() {
            return Err(ConvoyError::MissingEnvironment {
                name: name.to_string(),
                search: search.to_path_buf(),
                known: known_environments(search),
            });
        }

        let (file, warnings) = config::load_with_warnings(&path)?;

        let hosts = file
            .hosts
            .iter()
            .map(|host| Host::new(host.fqdn.clone(), host.ignore))
            .collect();

        let settings = Settings {
            name: name.to_string(),
            platform,
            timeout,
            connect_method: file.connect_method,
            service_user: file.service_user.unwrap_or_else(current_user),
            update_method: file.update_method,
            target_directory: file.target_directory,
            deployment_base: file.deployment_base,
            interpreter: file.interpreter,
            version: file.version,
            develop: file.develop,
            overrides: file.overrides,
        };

        Ok((Self { settings, hosts }, warnings))
    }

    /// Overlay secret values from `<search>/<name>.secrets.toml`, when the
    /// file exists. Secrets win over plain overrides.
    pub fn load_secrets(&mut self, search: &Path) -> ConvoyResult<()> {
        let path = search.join(format!("{}.secrets.toml", self.settings.name));
        if !path.is_file() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        let secrets: Overrides = toml::from_str(&content).map_err(|e| {
            ConvoyError::Configuration(format!("invalid secrets file {}: {}", path.display(), e))
        })?;
        for (component, values) in secrets {
            self.settings
                .overrides
                .entry(component)
                .or_default()
                .extend(values);
        }
        Ok(())
    }

    /// Index of the reference host: the first host that is not ignored.
    pub fn reference_host_index(&self) -> Option<usize> {
        self.hosts.iter().position(|host| !host.ignore)
    }

    /// Look a host up by short name or fqdn, as plan entries use either.
    pub fn host_index(&self, name: &str) -> Option<usize> {
        self.hosts
            .iter()
            .position(|host| host.name == name || host.fqdn == name)
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn known_environments(search: &Path) -> Vec<String> {
    let mut known: Vec<String> = fs::read_dir(search)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                        return None;
                    }
                    let stem = path.file_stem()?.to_str()?;
                    if stem.ends_with(".secrets") {
                        return None;
                    }
                    Some(stem.to_string())
                })
                .collect()
        })
        .unwrap_or_default();
    known.sort();
    known
}
