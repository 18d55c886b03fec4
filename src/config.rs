use crate::collectors::apps::default_app_dirs;
use crate::collectors::system::SourcePaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub interval_secs: u64,
    #[serde(default = "default_gpu_probe_timeout_ms")]
    pub gpu_probe_timeout_ms: u64,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub stress: StressConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
    #[serde(default)]
    pub app_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatteryConfig {
    #[serde(default = "default_battery_enabled")]
    pub enabled: bool,
    #[serde(default = "default_battery_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub power_supply_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StressConfig {
    #[serde(default)]
    pub max_cores: usize,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sys_root: default_sys_root(),
            proc_root: default_proc_root(),
            app_dirs: Vec::new(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            enabled: default_battery_enabled(),
            poll_interval_secs: default_battery_poll_interval_secs(),
            power_supply_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9110".to_string(),
            interval_secs: 10,
            gpu_probe_timeout_ms: default_gpu_probe_timeout_ms(),
            sources: SourcesConfig::default(),
            battery: BatteryConfig::default(),
            stress: StressConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs должно быть >= 1".to_string(),
            ));
        }
        if !(1..=60_000).contains(&self.gpu_probe_timeout_ms) {
            return Err(ConfigError::Validation(
                "gpu_probe_timeout_ms должно быть в диапазоне 1..60000".to_string(),
            ));
        }
        if self.battery.poll_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "battery.poll_interval_secs должно быть >= 1".to_string(),
            ));
        }
        if self.stress.max_cores > 4096 {
            return Err(ConfigError::Validation(
                "stress.max_cores должно быть <= 4096".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }

    pub fn gpu_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.gpu_probe_timeout_ms)
    }

    pub fn source_paths(&self) -> SourcePaths {
        SourcePaths {
            sys_root: self.sources.sys_root.clone(),
            proc_root: self.sources.proc_root.clone(),
            app_dirs: if self.sources.app_dirs.is_empty() {
                default_app_dirs()
            } else {
                self.sources.app_dirs.clone()
            },
        }
    }

    pub fn power_supply_dir(&self) -> PathBuf {
        self.battery
            .power_supply_dir
            .clone()
            .unwrap_or_else(|| self.sources.sys_root.join("class/power_supply"))
    }

    pub fn stress_core_limit(&self, logical_cpus: usize) -> usize {
        if self.stress.max_cores == 0 {
            logical_cpus.max(1)
        } else {
            self.stress.max_cores
        }
    }
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

const fn default_gpu_probe_timeout_ms() -> u64 {
    3000
}

const fn default_battery_enabled() -> bool {
    true
}

const fn default_battery_poll_interval_secs() -> u64 {
    5
}
