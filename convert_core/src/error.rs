use std::{io, path::PathBuf};

use save_runtime::ParseError;
use thiserror::Error;

use crate::{config::ConfigError, country_map::CountryOverflow, pipeline::Stage};

/// Process exit status for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Any fatal failure not covered by a more specific code.
pub const EXIT_FATAL: u8 = 1;
/// Missing or invalid game installation path.
pub const EXIT_CONFIGURATION: u8 = 2;
/// More CK2 realms than free EU3 nation slots.
pub const EXIT_COUNTRY_OVERFLOW: u8 = 3;

/// Malformed content in one of the converter's own mapping files.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingFileError {
    #[error("'{key} = {value}' is not a province id")]
    InvalidRegionId { key: String, value: String },
    #[error("country link #{link} names no eu3 tag")]
    LinkWithoutTag { link: usize },
    #[error("country link #{link} names more than one eu3 tag")]
    AmbiguousTag { link: usize },
}

/// Failure to transcribe a game's files into a world.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("save is missing the '{section}' section")]
    MissingSection { section: &'static str },
    #[error("failed to list {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid mapping file {path:?}: {source}")]
    MappingFile {
        path: PathBuf,
        #[source]
        source: MappingFileError,
    },
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    CountryOverflow(#[from] CountryOverflow),
    #[error("stage {requested:?} cannot run while the pipeline is at {current:?}")]
    StageOrder { requested: Stage, current: Stage },
    #[error("could not write output {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ConvertError::Configuration(
                ConfigError::MissingInstallPath { .. } | ConfigError::InvalidInstallPath { .. },
            ) => EXIT_CONFIGURATION,
            ConvertError::CountryOverflow(_) => EXIT_COUNTRY_OVERFLOW,
            _ => EXIT_FATAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_failure_class() {
        let config = ConvertError::from(ConfigError::MissingInstallPath { game: "CK2" });
        let overflow = ConvertError::from(CountryOverflow {
            requested: 3,
            available: 2,
            overflow: 1,
        });
        let order = ConvertError::StageOrder {
            requested: Stage::ProvincesConverted,
            current: Stage::Ready,
        };

        assert_eq!(config.exit_code(), EXIT_CONFIGURATION);
        assert_eq!(overflow.exit_code(), EXIT_COUNTRY_OVERFLOW);
        assert_eq!(order.exit_code(), EXIT_FATAL);
        assert_ne!(EXIT_FATAL, EXIT_SUCCESS);
    }

    #[test]
    fn unreadable_config_file_is_generic_failure() {
        let err = ConvertError::from(ConfigError::ReadFailed {
            path: PathBuf::from("configuration.json"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        });
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }
}
