//! Load config from file and environment.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hopshare_core::config::{DEFAULT_HELLO_EVERY, DEFAULT_PROBE_INTERVAL};
use hopshare_core::fragment::DEFAULT_CHUNK_SIZE;
use hopshare_core::liveness::DEFAULT_MAX_STRIKES;
use hopshare_core::ProtocolConfig;

/// Daemon configuration. File: ~/.config/hopshare/config.toml or /etc/hopshare/config.toml.
/// Env overrides: HOPSHARE_GROUP, HOPSHARE_PORT, HOPSHARE_PROBE_INTERVAL_SECS,
/// HOPSHARE_MAX_STRIKES, HOPSHARE_CHUNK_SIZE, HOPSHARE_HELLO_EVERY, HOPSHARE_DOWNLOAD_DIR,
/// HOPSHARE_NODE_ID.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Multicast group (default 239.255.42.99).
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,
    /// UDP port shared by every node (default 6789).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_max_strikes")]
    pub max_strikes: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Keepalive cycles between full Hello broadcasts; 0 disables them.
    #[serde(default = "default_hello_every")]
    pub hello_every: u64,
    /// Where finished downloads are written (default: current directory).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Fixed node id; a random one is generated when unset.
    #[serde(default)]
    pub node_id: Option<String>,
}

fn default_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 42, 99)
}
fn default_port() -> u16 {
    6789
}
fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL.as_secs()
}
fn default_max_strikes() -> u32 {
    DEFAULT_MAX_STRIKES
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_hello_every() -> u64 {
    DEFAULT_HELLO_EVERY
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            probe_interval_secs: default_probe_interval_secs(),
            max_strikes: default_max_strikes(),
            chunk_size: default_chunk_size(),
            hello_every: default_hello_every(),
            download_dir: default_download_dir(),
            node_id: None,
        }
    }
}

impl Config {
    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            probe_interval: Duration::from_secs(self.probe_interval_secs.max(1)),
            max_strikes: self.max_strikes,
            chunk_size: self.chunk_size,
            hello_every: self.hello_every,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn parse_into<T: std::str::FromStr>(raw: Option<String>, slot: &mut T) {
    if let Some(v) = raw.and_then(|s| s.parse::<T>().ok()) {
        *slot = v;
    }
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    parse_into(var("HOPSHARE_GROUP"), &mut c.group);
    parse_into(var("HOPSHARE_PORT"), &mut c.port);
    parse_into(var("HOPSHARE_PROBE_INTERVAL_SECS"), &mut c.probe_interval_secs);
    parse_into(var("HOPSHARE_MAX_STRIKES"), &mut c.max_strikes);
    parse_into(var("HOPSHARE_CHUNK_SIZE"), &mut c.chunk_size);
    parse_into(var("HOPSHARE_HELLO_EVERY"), &mut c.hello_every);
    if let Some(dir) = var("HOPSHARE_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(dir);
    }
    if let Some(id) = var("HOPSHARE_NODE_ID").filter(|s| !s.is_empty()) {
        c.node_id = Some(id);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/hopshare/config.toml"));
    }
    out.push(PathBuf::from("/etc/hopshare/config.toml"));
    out
}

/// First existing file wins; an unreadable or invalid one yields `None` (defaults) with a warning.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let path = paths.iter().find(|p| p.exists())?;
    match read_file(path) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
            None
        }
    }
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    use anyhow::Context;
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config")
}
