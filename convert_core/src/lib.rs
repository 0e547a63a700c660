//! Core of the CK2 to EU3 save converter.
//!
//! A conversion reads a finished Crusader Kings II save together with the
//! game's trait and dynasty definitions, maps CK2 provinces and realms onto
//! EU3 provinces and country tags, and writes an Europa Universalis III
//! starting save. [`run`] drives the whole thing from a [`ConverterConfig`].

pub mod config;
pub mod country_map;
pub mod dest_world;
pub mod error;
pub mod ids;
pub mod logging;
pub mod pipeline;
pub mod region_map;
pub mod report;
pub mod slots;
pub mod source_world;

pub use config::{BaselineConfig, ConfigError, ConverterConfig};
pub use country_map::{assign, CountryMapping, CountryOverflow, CountryRule, ExplicitRules};
pub use dest_world::{DestinationWorld, ProvinceStatus};
pub use error::{
    ConvertError, MappingFileError, WorldError, EXIT_CONFIGURATION, EXIT_COUNTRY_OVERFLOW,
    EXIT_FATAL, EXIT_SUCCESS,
};
pub use ids::{CharacterId, DestRegionId, NationTag, SourceRegionId, TitleId};
pub use logging::init_logging;
pub use pipeline::{run, serialize, Pipeline, Stage};
pub use region_map::{CoverageIssue, RegionMapping, Severity};
pub use report::ConversionReport;
pub use slots::{NationSlotArena, SlotFlags};
pub use source_world::SourceWorld;
