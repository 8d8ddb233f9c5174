use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

pub const BASE_CONFIG_FILE: &str = "/etc/xfrd/xfrd.yaml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding TSIG key files (see `key::KeyFile`).
    pub tsig_folder: String,
    /// Directory the driver writes `<zone>.zone` text files into.
    pub zone_output_dir: String,
    /// One entry per zone this instance keeps transferred.
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn config_file_path() -> String {
        std::env::var("XFRD_CONFIG").unwrap_or_else(|_| BASE_CONFIG_FILE.into())
    }

    pub fn tsig_path(&self) -> &Path {
        Path::new(&self.tsig_folder)
    }

    pub fn zone_output_path(&self, zone: &str) -> PathBuf {
        Path::new(&self.zone_output_dir).join(format!("{zone}.zone"))
    }
}

impl TryFrom<&[u8]> for Config {
    type Error = crate::error::Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(value)?)
    }
}

/// A zone this instance keeps in sync with one or more masters, tried in
/// order until one succeeds (spec.md §4.2 exit codes / §7 propagation).
#[derive(Debug, Deserialize, Clone)]
pub struct ZoneConfig {
    pub name: String,
    pub masters: Vec<MasterConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MasterConfig {
    pub address: SocketAddr,
    /// Name of a TSIG key loaded from `tsig_folder`, if the master requires
    /// signed transfers.
    #[serde(default)]
    pub tsig_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LogConfig {
    #[serde(deserialize_with = "de_level_filter", default = "default_level")]
    pub level: log::LevelFilter,
    #[serde(default)]
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: log::LevelFilter::Info,
            color: false,
        }
    }
}

fn default_level() -> log::LevelFilter {
    log::LevelFilter::Info
}

fn de_level_filter<'de, D>(deserializer: D) -> std::result::Result<log::LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: LevelFilter = Deserialize::deserialize(deserializer)?;
    match s {
        LevelFilter::Off => Ok(log::LevelFilter::Off),
        LevelFilter::Error => Ok(log::LevelFilter::Error),
        LevelFilter::Warn => Ok(log::LevelFilter::Warn),
        LevelFilter::Info => Ok(log::LevelFilter::Info),
        LevelFilter::Debug => Ok(log::LevelFilter::Debug),
        LevelFilter::Trace => Ok(log::LevelFilter::Trace),
    }
}

#[derive(Deserialize)]
enum LevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
