//! Configuration management
//!
//! This module handles loading and validating configuration from TOML files and
//! turning it into the settings a `PowerController` runs with.

use crate::models::{Credentials, RouterEndpoint, SshCredential, SshTarget};
use crate::parser::ListingLayout;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Name the switch is shown under
    #[serde(default = "default_name")]
    pub name: String,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Router used for powering on
    pub router: RouterConfig,

    /// SSH access used for powering off
    #[serde(default)]
    pub ssh: SshConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    /// Base URL of the router, e.g. `http://router.example.net`
    pub domain: String,

    /// Port of the router's admin web interface, replacing the port in `domain`
    #[serde(default)]
    pub wol_port: Option<u16>,

    pub username: String,
    pub password: String,

    /// Device name as shown in the router's Wake-on-LAN list
    pub target_name: String,

    /// Row layout of the Wake-on-LAN list
    #[serde(default)]
    pub layout: ListingLayout,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SshConfig {
    /// Defaults to the host of `router.domain`
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Defaults to `router.username`
    #[serde(default)]
    pub username: Option<String>,

    /// Defaults to `router.password`
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,

    #[serde(default)]
    pub key_passphrase: Option<String>,

    #[serde(default)]
    pub use_agent: bool,

    #[serde(default = "default_shutdown_command")]
    pub command: String,

    /// Seconds allowed for the whole power-off
    #[serde(default = "default_ssh_timeout")]
    pub timeout: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_ssh_port(),
            username: None,
            password: None,
            key_file: None,
            key_passphrase: None,
            use_agent: false,
            command: default_shutdown_command(),
            timeout: default_ssh_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "Computer".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_shutdown_command() -> String {
    "shutdown /s /t 0".to_string()
}

fn default_ssh_timeout() -> u64 {
    15
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `path`, or from the first file found in the
    /// standard locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = vec![
            PathBuf::from("powerctl.toml"),
            PathBuf::from("/etc/powerctl/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/powerctl/config.toml"))
                .unwrap_or_default(),
        ];

        // Try to find config file
        for path in &config_paths {
            if path.is_file() {
                return Self::from_file(path);
            }
        }

        bail!(
            "No config file found (looked in: {})",
            config_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate a TOML document
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.router.target_name.trim().is_empty() {
            bail!("router.target_name must not be empty");
        }
        if self.router.username.is_empty() {
            bail!("router.username must not be empty");
        }
        if self.http.timeout == 0 || self.http.connect_timeout == 0 {
            bail!("http timeouts must be at least one second");
        }
        if self.ssh.timeout == 0 {
            bail!("ssh.timeout must be at least one second");
        }
        if self.ssh.command.trim().is_empty() {
            bail!("ssh.command must not be empty");
        }
        self.endpoint()?;
        self.ssh_target()?;
        Ok(())
    }

    pub fn endpoint(&self) -> Result<RouterEndpoint> {
        if self.router.domain.trim().is_empty() {
            bail!("router.domain must not be empty");
        }
        RouterEndpoint::new(self.router.domain.trim(), self.router.wol_port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.router.username.clone(),
            password: self.router.password.clone(),
        }
    }

    /// SSH target, filling unset fields from the router settings
    pub fn ssh_target(&self) -> Result<SshTarget> {
        let host = match &self.ssh.host {
            Some(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => Url::parse(self.router.domain.trim())
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .context("ssh.host is not set and router.domain has no host")?,
        };

        let credential = if let Some(key) = &self.ssh.key_file {
            SshCredential::Key {
                private_key: key.clone(),
                passphrase: self.ssh.key_passphrase.clone(),
            }
        } else if self.ssh.use_agent {
            SshCredential::Agent
        } else {
            SshCredential::Password(
                self.ssh
                    .password
                    .clone()
                    .unwrap_or_else(|| self.router.password.clone()),
            )
        };

        Ok(SshTarget {
            host,
            port: self.ssh.port,
            username: self
                .ssh
                .username
                .clone()
                .unwrap_or_else(|| self.router.username.clone()),
            credential,
        })
    }
}
