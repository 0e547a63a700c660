use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BUILTIN_CONVERTER_CONFIG: &str = include_str!("data/converter_config.json");
pub const CONFIG_PATH_ENV: &str = "CK2_EU3_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "configuration.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConverterConfig {
    pub ck2_path: PathBuf,
    pub eu3_path: PathBuf,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub log_file: PathBuf,
    pub province_mappings: PathBuf,
    pub country_mappings: PathBuf,
    pub blocked_nations: PathBuf,
    /// Hard ceiling on playable nations in the destination engine.
    pub max_nations: usize,
    pub baseline: BaselineConfig,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ck2_path: PathBuf::new(),
            eu3_path: PathBuf::new(),
            input_file: PathBuf::from("input.ck2"),
            output_file: PathBuf::from("output.eu3"),
            log_file: PathBuf::from("log.txt"),
            province_mappings: PathBuf::from("province_mappings.txt"),
            country_mappings: PathBuf::from("country_mappings.txt"),
            blocked_nations: PathBuf::from("blocked_nations.txt"),
            max_nations: 600,
            baseline: BaselineConfig::default(),
        }
    }
}

/// Values used whenever the source world has nothing to say about a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaselineConfig {
    pub government: String,
    pub technology_group: String,
    pub culture: String,
    pub religion: String,
    pub min_base_tax: f64,
    pub rest_of_world_base_tax: f64,
    pub prestige_scale: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            government: "feudal_monarchy".to_string(),
            technology_group: "western".to_string(),
            culture: String::new(),
            religion: String::new(),
            min_base_tax: 1.0,
            rest_of_world_base_tax: 1.0,
            prestige_scale: 0.01,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse converter config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read converter config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no {game} path was specified in the configuration; a valid path must be specified")]
    MissingInstallPath { game: &'static str },
    #[error("the {game} path {path:?} is invalid; a valid path must be specified")]
    InvalidInstallPath { game: &'static str, path: PathBuf },
}

impl ConverterConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_CONVERTER_CONFIG)
            .expect("builtin converter config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ConverterConfig::from_json_str(&contents)?;
        Ok(config)
    }

    /// Resolve the active configuration: an explicit path wins, then
    /// `CK2_EU3_CONFIG_PATH`, then `configuration.json` in the working
    /// directory, then the builtin defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Self::from_file(Path::new(trimmed));
            }
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }
        Ok(Self::builtin())
    }

    pub fn validate_install_paths(&self) -> Result<(), ConfigError> {
        check_install_path("Crusader Kings 2", &self.ck2_path)?;
        check_install_path("Europa Universalis 3", &self.eu3_path)
    }

    pub fn ck2_traits_file(&self) -> PathBuf {
        self.ck2_path.join("common").join("traits").join("00_traits.txt")
    }

    pub fn ck2_dynasties_file(&self) -> PathBuf {
        self.ck2_path.join("common").join("dynasties.txt")
    }

    pub fn eu3_countries_file(&self) -> PathBuf {
        self.eu3_path.join("common").join("countries.txt")
    }

    pub fn eu3_country_history_dir(&self) -> PathBuf {
        self.eu3_path.join("history").join("countries")
    }

    pub fn eu3_province_history_dir(&self) -> PathBuf {
        self.eu3_path.join("history").join("provinces")
    }
}

fn check_install_path(game: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::MissingInstallPath { game });
    }
    if !path.is_dir() {
        return Err(ConfigError::InvalidInstallPath {
            game,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
