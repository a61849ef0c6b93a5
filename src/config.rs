//! Process configuration, read once at startup from `INNKEEP_*` variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::model::RoomId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub draft_ttl: Duration,
    pub reap_interval: Duration,
    /// JSON room catalog to seed on startup.
    pub rooms_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            draft_ttl: Duration::from_secs(86_400),
            reap_interval: Duration::from_secs(60),
            rooms_file: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Rooms { path: PathBuf, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: invalid value {value:?}"),
            ConfigError::Rooms { path, reason } => {
                write!(f, "room catalog {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables take their default;
    /// set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parse_u64 = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid { var, value }),
            }
        };

        let metrics_port = match lookup("INNKEEP_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "INNKEEP_METRICS_PORT",
                value,
            })?),
        };

        Ok(Self {
            data_dir: lookup("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port,
            compact_threshold: parse_u64("INNKEEP_COMPACT_THRESHOLD", defaults.compact_threshold)?,
            draft_ttl: Duration::from_secs(parse_u64(
                "INNKEEP_DRAFT_TTL_SECS",
                defaults.draft_ttl.as_secs(),
            )?),
            reap_interval: Duration::from_secs(
                parse_u64("INNKEEP_REAP_INTERVAL_SECS", defaults.reap_interval.as_secs())?.max(1),
            ),
            rooms_file: lookup("INNKEEP_ROOMS_FILE").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}

/// One entry of the room catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomSeed {
    pub id: RoomId,
    pub name: String,
}

/// Read a JSON array of `{"id": .., "name": ..}` objects.
pub fn load_rooms(path: &Path) -> Result<Vec<RoomSeed>, ConfigError> {
    let rooms_err = |reason: String| ConfigError::Rooms {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| rooms_err(e.to_string()))?;
    parse_rooms(&raw).map_err(rooms_err)
}

fn parse_rooms(raw: &str) -> Result<Vec<RoomSeed>, String> {
    let rooms: Vec<RoomSeed> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let mut ids: Vec<_> = rooms.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
        return Err(format!("duplicate room id {}", w[0]));
    }
    Ok(rooms)
}
