//! Configuration management.
//!
//! The coordinator consults the adapter enable flags here; a disabled
//! adapter is never instantiated. Settings come from an optional config
//! file in the platform config directory, overridden by environment
//! variables under the `HIFI` prefix (`HIFI_ADAPTERS__HQP=true`,
//! `HIFI_SHUTDOWN_GRACE_SECS=10`, ...).

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub adapters: AdapterFlags,

    /// Named DSP engine instances.
    #[serde(default)]
    pub hqp: Vec<HqpInstanceConfig>,

    /// Zone-to-DSP-instance links.
    #[serde(default)]
    pub links: Vec<ZoneLinkConfig>,

    #[serde(default)]
    pub lms: Option<LmsConfig>,

    /// Shutdown grace timeout for adapter ACKs, in seconds.
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// DSP poll cycle, in seconds.
    #[serde(default = "default_poll_secs")]
    pub hqp_poll_secs: u64,
}

fn default_grace_secs() -> u64 {
    5
}

fn default_poll_secs() -> u64 {
    3
}

/// Which adapters the coordinator instantiates.
#[derive(Debug, Deserialize)]
pub struct AdapterFlags {
    #[serde(default)]
    pub roon: bool,
    #[serde(default)]
    pub lms: bool,
    #[serde(default)]
    pub upnp: bool,
    #[serde(default)]
    pub openhome: bool,
    #[serde(default = "default_true")]
    pub hqp: bool,
}

impl Default for AdapterFlags {
    fn default() -> Self {
        Self {
            roon: false,
            lms: false,
            upnp: false,
            openhome: false,
            hqp: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct HqpInstanceConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_hqp_port")]
    pub port: u16,
}

fn default_hqp_port() -> u16 {
    4321
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneLinkConfig {
    pub zone_id: String,
    pub instance: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LmsConfig {
    pub host: String,
    #[serde(default = "default_lms_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_lms_port() -> u16 {
    9000
}

impl Config {
    /// HTTP basic auth credentials for an adapter's artwork URLs.
    pub fn basic_auth_for(&self, prefix: &str) -> Option<(String, String)> {
        match prefix {
            "lms" => {
                let lms = self.lms.as_ref()?;
                Some((lms.username.clone()?, lms.password.clone()?))
            }
            _ => None,
        }
    }
}

/// Config directory (env override, then platform default).
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HIFI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/hifi-bridge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("hifi-bridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/hifi-bridge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("hifi-bridge");
        }
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let config = ::config::Config::builder()
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy())
                .required(false),
        )
        // HIFI_ADAPTERS__HQP=true, HIFI_HQP_POLL_SECS=5, ...
        .add_source(
            ::config::Environment::with_prefix("HIFI")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_only_hqp() {
        let config = Config::default();
        assert!(config.adapters.hqp);
        assert!(!config.adapters.roon);
        assert!(!config.adapters.lms);
        assert_eq!(config.shutdown_grace_secs, 5);
    }

    #[test]
    fn parses_full_file() {
        let raw = r#"
            shutdown_grace_secs = 10

            [adapters]
            hqp = true
            lms = true

            [[hqp]]
            name = "main"
            host = "10.0.0.5"

            [[hqp]]
            name = "desk"
            host = "10.0.0.6"
            port = 14321

            [[links]]
            zone_id = "roon:abc"
            instance = "main"

            [lms]
            host = "10.0.0.7"
            username = "knob"
            password = "secret"
        "#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, raw).unwrap();

        let parsed: Config = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(parsed.hqp.len(), 2);
        assert_eq!(parsed.hqp[0].port, 4321);
        assert_eq!(parsed.hqp[1].port, 14321);
        assert_eq!(parsed.links[0].instance, "main");
        assert!(parsed.adapters.lms);
        assert_eq!(
            parsed.basic_auth_for("lms"),
            Some(("knob".to_string(), "secret".to_string()))
        );
        assert_eq!(parsed.basic_auth_for("roon"), None);
        assert_eq!(parsed.shutdown_grace_secs, 10);
    }
}
