use std::env;

use serde::Deserialize;

/// Top-level wapb.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct WapbConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// One listener is bound per entry.
    #[serde(default = "default_hostnames")]
    pub hostnames: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Seconds between expired-record sweeps; 0 disables the sweeper.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub pretty_json: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

/// Client side: where `push`, `pull` and `upload` talk to.
#[derive(Debug, Deserialize, Default)]
pub struct RemoteConfig {
    pub url: Option<String>,
}

// ── Default value functions ──────────────────────────

fn default_port() -> u16 {
    7473
}

fn default_hostnames() -> Vec<String> {
    vec!["0.0.0.0".to_string(), "::".to_string()]
}

fn default_data_dir() -> String {
    "wapd".to_string()
}

fn default_storage() -> StorageBackend {
    StorageBackend::Sled
}

fn default_shutdown_grace() -> u64 {
    2
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hostnames: default_hostnames(),
            data_dir: default_data_dir(),
            storage: default_storage(),
            shutdown_grace_secs: default_shutdown_grace(),
            sweep_interval_secs: default_sweep_interval(),
            static_dir: None,
            pretty_json: false,
        }
    }
}

/// Value of `--storage`: a data directory, or `:MEMORY:` for the in-memory
/// backend.
pub const MEMORY_STORAGE: &str = ":MEMORY:";

impl WapbConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!(path, error = %e, "failed to parse config, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // WAPB_PORT
        if let Some(val) = lookup("WAPB_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid WAPB_PORT"),
            }
        }

        // WAPB_DATA_DIR
        if let Some(val) = lookup("WAPB_DATA_DIR") {
            if !val.is_empty() {
                self.server.data_dir = val;
            }
        }

        // WAPB_STORAGE
        if let Some(val) = lookup("WAPB_STORAGE") {
            match val.to_lowercase().as_str() {
                "sled" => self.server.storage = StorageBackend::Sled,
                "memory" => self.server.storage = StorageBackend::Memory,
                other => tracing::warn!(value = other, "unknown WAPB_STORAGE value"),
            }
        }
    }

    /// Apply `serve` flags, which win over everything else.
    pub fn apply_cli(&mut self, port: Option<u16>, storage: Option<&str>, static_dir: Option<String>) {
        if let Some(port) = port {
            self.server.port = port;
        }
        match storage {
            Some(MEMORY_STORAGE) => self.server.storage = StorageBackend::Memory,
            Some(dir) => {
                self.server.storage = StorageBackend::Sled;
                self.server.data_dir = dir.to_string();
            }
            None => {}
        }
        if static_dir.is_some() {
            self.server.static_dir = static_dir;
        }
    }
}
