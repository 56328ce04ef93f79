use crate::resolver::ContextResolver;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Library-wide configuration, loadable from TOML. Every field has a
/// default so an absent file or a partial one works.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrustConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub tpm: TpmConfig,

    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Context-resolver settings: cache lifetime, the pinned allow-list, and
/// the URLs to pre-warm at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// URL to lowercase hex SHA-256 of the only acceptable document.
    #[serde(default)]
    pub allow_list: HashMap<String, String>,

    /// Resolved eagerly by `prewarm` so synchronous consumers never wait
    /// on the network.
    #[serde(default)]
    pub prewarm: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            allow_list: HashMap::new(),
            prewarm: Vec::new(),
        }
    }
}

fn default_ttl_hours() -> i64 {
    ContextResolver::DEFAULT_TTL_HOURS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpmTransportKind {
    /// The kernel character device (`/dev/tpmrm0`, `/dev/tpm0`).
    Device,
    /// The reference simulator's TCP interface.
    Simulator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpmConfig {
    #[serde(default = "default_tpm_transport")]
    pub transport: TpmTransportKind,

    #[serde(default = "default_simulator_host")]
    pub simulator_host: String,

    #[serde(default = "default_simulator_port")]
    pub simulator_port: u16,
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self {
            transport: default_tpm_transport(),
            simulator_host: default_simulator_host(),
            simulator_port: default_simulator_port(),
        }
    }
}

impl TpmConfig {
    /// Opens the configured transport and returns a device with the core
    /// command set registered.
    pub fn connect(&self) -> Result<crate::tpm::TpmDevice, crate::tpm::TpmError> {
        use crate::tpm::{TcpSimulatorTransport, TpmDevice, Transport};
        let transport: Box<dyn Transport> = match self.transport {
            TpmTransportKind::Simulator => Box::new(TcpSimulatorTransport::connect(
                &self.simulator_host,
                self.simulator_port,
            )?),
            TpmTransportKind::Device => {
                #[cfg(target_os = "linux")]
                {
                    Box::new(crate::tpm::DeviceTransport::open()?)
                }
                #[cfg(not(target_os = "linux"))]
                {
                    return Err(crate::tpm::TransportError {
                        code: 0,
                        message: "no character-device transport on this platform".into(),
                    }
                    .into());
                }
            }
        };
        Ok(TpmDevice::with_transport(transport))
    }
}

fn default_tpm_transport() -> TpmTransportKind {
    if cfg!(target_os = "linux") {
        TpmTransportKind::Device
    } else {
        TpmTransportKind::Simulator
    }
}

fn default_simulator_host() -> String {
    crate::tpm::TcpSimulatorTransport::DEFAULT_HOST.to_string()
}

fn default_simulator_port() -> u16 {
    crate::tpm::TcpSimulatorTransport::DEFAULT_COMMAND_PORT
}

/// Test-harness probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Environment variable consulted by the CI probe. One knob, one
    /// place.
    #[serde(default = "default_ci_env_var")]
    pub ci_env_var: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ci_env_var: default_ci_env_var(),
        }
    }
}

fn default_ci_env_var() -> String {
    "CI".to_string()
}

impl TrustConfig {
    /// `~/.veritrust/config.toml`, or a relative fallback when no home
    /// directory is known.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".veritrust").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".veritrust/config.toml"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config at {}", path.display()))
    }

    /// Loads the default path, falling back to defaults when the file
    /// does not exist.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("writing config to {}", path.display()))
    }

    /// A resolver wired from this configuration.
    pub fn build_resolver(&self) -> ContextResolver {
        ContextResolver::with_ttl(
            self.resolver.allow_list.clone(),
            Duration::hours(self.resolver.ttl_hours),
        )
    }
}
