//! Configuration model for key-module hosts and the OpenSSL backend.

use crate::error::{KeymodError, KeymodResult};
use crate::module::VersionFlags;
use directories_next::UserDirs;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ecryptfs/keymod.toml";
pub const CONFIG_PATH_ENV: &str = "KEYMOD_CONFIG";
const HOME_ENV: &str = "KEYMOD_HOME";

/// Host-side knobs: which protocol capabilities the mount tool advertises.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HostCfg {
    /// Capability bitmask handed to `*_subgraph_transition` calls.
    #[serde(default = "default_versioning")]
    pub versioning: u32,

    /// Override for the invoking user's home directory.
    #[serde(default)]
    pub home_dir: Option<String>,
}

fn default_versioning() -> u32 {
    (VersionFlags::PASSPHRASE | VersionFlags::PUBKEY).bits()
}

impl Default for HostCfg {
    fn default() -> Self {
        Self {
            versioning: default_versioning(),
            home_dir: None,
        }
    }
}

/// Which parameter-node table the OpenSSL module exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeSet {
    /// `keyformat` / `keyfile` / `passwd|passfile|passenv|passfd|passstdin|defaultpass`.
    #[default]
    Legacy,
    /// `keysource` / `keyfile` / `passwd_specification_method` / `passwd|passwd_file|passwd_fd`.
    Revised,
}

/// RSA key parameters and graph flavour for the OpenSSL module.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpensslCfg {
    #[serde(default = "default_key_bits")]
    pub key_bits: u32,

    #[serde(default = "default_public_exponent")]
    pub public_exponent: u32,

    #[serde(default)]
    pub node_set: NodeSet,

    /// Suggested key file; defaults to `<home>/.ecryptfs/pki/openssl/key.pem`.
    #[serde(default)]
    pub key_path: Option<String>,
}

fn default_key_bits() -> u32 {
    1024
}

fn default_public_exponent() -> u32 {
    65537
}

impl Default for OpensslCfg {
    fn default() -> Self {
        Self {
            key_bits: default_key_bits(),
            public_exponent: default_public_exponent(),
            node_set: NodeSet::default(),
            key_path: None,
        }
    }
}

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct KeymodConfig {
    #[serde(default)]
    pub host: HostCfg,

    #[serde(default)]
    pub openssl: OpensslCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl KeymodConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Path named by `KEYMOD_CONFIG`, or the system default.
    pub fn resolve_path() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load `path` when it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> KeymodResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }
        debug!(
            "no configuration at {}; using built-in defaults",
            target.display()
        );
        Ok(Self {
            path: target.to_path_buf(),
            format: format_for(target),
            ..Self::default()
        })
    }

    /// Read a config file from disk, detect format, and reject invalid values.
    pub fn load<P: AsRef<Path>>(path: P) -> KeymodResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| KeymodError::key_file(path, err))?;
        let format = format_for(path);
        let mut cfg = match format {
            ConfigFormat::Toml => toml::from_str::<Self>(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str::<Self>(&contents)?,
        };
        cfg.path = path.to_path_buf();
        cfg.format = format;

        let issues = cfg.validate();
        if let Some(first) = issues.first() {
            return Err(KeymodError::Configuration(format!(
                "{}: {first}",
                path.display()
            )));
        }

        info!("loaded key module configuration from {}", path.display());
        Ok(cfg)
    }

    /// Perform a validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.openssl.key_bits < 512 {
            issues.push("openssl.key_bits must be at least 512".to_string());
        }
        if self.openssl.key_bits > 16384 {
            issues.push("openssl.key_bits must not exceed 16384".to_string());
        }
        if self.openssl.public_exponent < 3 || self.openssl.public_exponent % 2 == 0 {
            issues.push("openssl.public_exponent must be an odd number >= 3".to_string());
        }
        if let Some(key_path) = &self.openssl.key_path {
            if !Path::new(key_path).is_absolute() {
                issues.push(format!("openssl.key_path must be absolute: {key_path}"));
            }
        }
        if let Some(home) = &self.host.home_dir {
            if !Path::new(home).is_absolute() {
                issues.push(format!("host.home_dir must be absolute: {home}"));
            }
        }
        if !self.versioning().contains(VersionFlags::PUBKEY) {
            issues.push(
                "host.versioning lacks the public-key bit; key modules will be unavailable"
                    .to_string(),
            );
        }

        issues
    }

    /// Capability flags the host advertises to key modules.
    pub fn versioning(&self) -> VersionFlags {
        VersionFlags::from_bits(self.host.versioning)
    }

    /// Home directory of the invoking user, honouring config and `KEYMOD_HOME` overrides.
    pub fn home_dir(&self) -> KeymodResult<PathBuf> {
        if let Some(home) = &self.host.home_dir {
            return Ok(PathBuf::from(home));
        }
        if let Ok(home) = env::var(HOME_ENV) {
            if !home.is_empty() {
                return Ok(PathBuf::from(home));
            }
        }
        UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or_else(|| {
                KeymodError::Configuration(
                    "unable to determine the home directory of the current user".into(),
                )
            })
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> KeymodResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload).map_err(|err| KeymodError::key_file(&self.path, err))?;
        Ok(())
    }
}

fn format_for(path: &Path) -> ConfigFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            ConfigFormat::Yaml
        }
        _ => ConfigFormat::Toml,
    }
}
