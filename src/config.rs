use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use env_logger::Builder;
use log::{LevelFilter, info};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, YtsmError};

pub const DEFAULT_MAX_VIDEOS_PER_CHANNEL: usize = 150;
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 15;

pub struct AppPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub settings_path: PathBuf,
    pub pid_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            YtsmError::Settings("could not determine home directory".to_string())
        })?;
        Ok(Self::from_base(home.join(".ytsm")))
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            db_path: base.join("ytsm.db"),
            settings_path: base.join("settings.json"),
            pid_file: base.join("ytsm.pid"),
            base_dir: base,
        }
    }
}

/// Logs to stderr at `level` unless `RUST_LOG` says otherwise.
pub fn init_logger(level: LevelFilter) {
    let _ = Builder::new().filter_level(level).parse_default_env().try_init();
}

/// Knobs for the bulk feed fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestSettings {
    pub threads: usize,
    pub max_passes: usize,
    pub sleep_pass_secs: u64,
    pub connection_max_tries: usize,
    pub timeout_secs: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            threads: 10,
            max_passes: 5,
            sleep_pass_secs: 2,
            connection_max_tries: 10,
            timeout_secs: 60,
        }
    }
}

impl RequestSettings {
    pub fn sleep_pass(&self) -> Duration {
        Duration::from_secs(self.sleep_pass_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub max_videos_per_channel: usize,
    pub update_interval_minutes: u64,
    pub request: RequestSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_videos_per_channel: DEFAULT_MAX_VIDEOS_PER_CHANNEL,
            update_interval_minutes: DEFAULT_UPDATE_INTERVAL_MINUTES,
            request: RequestSettings::default(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`, writing the defaults there first if the
    /// file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no settings at {}, writing defaults", path.display());
                let settings = Settings::default();
                settings.save(path)?;
                return Ok(settings);
            }
            Err(e) => return Err(YtsmError::Io(e)),
        };

        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| YtsmError::Settings(format!("broken settings file {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| YtsmError::Settings(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn restore(path: &Path) -> Result<Self> {
        let settings = Settings::default();
        settings.save(path)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_videos_per_channel == 0 {
            return Err(YtsmError::Settings(
                "max_videos_per_channel must be at least 1".to_string(),
            ));
        }
        if self.request.threads == 0 {
            return Err(YtsmError::Settings("request.threads must be at least 1".to_string()));
        }
        if self.update_interval_minutes == 0 {
            return Err(YtsmError::Settings(
                "update_interval_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
