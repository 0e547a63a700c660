//! Conversion stages and the top-level driver.
//!
//! The stages run in a fixed order: countries, provinces, rest of world,
//! advisors, serialization. [`Pipeline`] tracks the last completed stage and
//! refuses to run a stage out of turn, leaving the destination world untouched.

use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use rayon::prelude::*;
use save_runtime::{parse_file, write_document};
use tracing::{debug, error, info, warn};

use crate::{
    config::{BaselineConfig, ConverterConfig},
    country_map::{self, read_blocked_nations, CountryMapping, ExplicitRules},
    dest_world::{Advisor, DestinationWorld, Monarch, ProvinceStatus},
    error::ConvertError,
    ids::{CharacterId, DestRegionId, NationTag, SourceRegionId},
    region_map::{CoverageIssue, RegionMapping},
    report::ConversionReport,
    slots::NationSlotArena,
    source_world::{CouncilJob, PoliticalEntity, SourceProvince, SourceWorld},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ready,
    CountriesConverted,
    ProvincesConverted,
    RestOfWorldSetUp,
    AdvisorsConverted,
    Serialized,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Ready => Some(Stage::CountriesConverted),
            Stage::CountriesConverted => Some(Stage::ProvincesConverted),
            Stage::ProvincesConverted => Some(Stage::RestOfWorldSetUp),
            Stage::RestOfWorldSetUp => Some(Stage::AdvisorsConverted),
            Stage::AdvisorsConverted => Some(Stage::Serialized),
            Stage::Serialized => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ready => "ready",
            Stage::CountriesConverted => "countries",
            Stage::ProvincesConverted => "provinces",
            Stage::RestOfWorldSetUp => "rest_of_world",
            Stage::AdvisorsConverted => "advisors",
            Stage::Serialized => "serialized",
        }
    }
}

const MIN_MONARCH_SKILL: i32 = 3;
const MAX_MONARCH_SKILL: i32 = 8;
const MIN_ADVISOR_SKILL: i32 = 1;
const MAX_ADVISOR_SKILL: i32 = 6;

/// EU3 government for a CK2 holder government.
pub fn government_for(ck2_government: &str) -> Option<&'static str> {
    match ck2_government {
        "feudal_government" => Some("feudal_monarchy"),
        "merchant_republic_government" => Some("merchant_republic"),
        "theocracy_government" => Some("theocracy"),
        "tribal_government" => Some("tribal_despotism"),
        _ => None,
    }
}

pub fn advisor_type_for(job: CouncilJob) -> &'static str {
    match job {
        CouncilJob::Chancellor => "diplomat",
        CouncilJob::Marshal => "army_reformer",
        CouncilJob::Treasurer => "treasurer",
        CouncilJob::Spymaster => "spymaster",
        CouncilJob::Spiritual => "theologian",
    }
}

fn monarch_skill(attribute: i32) -> u8 {
    (attribute / 2).clamp(MIN_MONARCH_SKILL, MAX_MONARCH_SKILL) as u8
}

fn advisor_skill(attribute: i32) -> u8 {
    (attribute / 3).clamp(MIN_ADVISOR_SKILL, MAX_ADVISOR_SKILL) as u8
}

/// Result of aggregating the CK2 contributors of one EU3 province.
#[derive(Debug, Clone, PartialEq)]
struct ProvinceOutcome {
    id: DestRegionId,
    missing: Vec<SourceRegionId>,
    converted: Option<ConvertedProvince>,
}

#[derive(Debug, Clone, PartialEq)]
struct ConvertedProvince {
    primary: SourceRegionId,
    owner: Option<NationTag>,
    culture: Option<String>,
    religion: Option<String>,
    base_tax: f64,
}

/// The most developed contributor decides ownership and population; ties go
/// to the lowest CK2 id. Base tax sums each contributor's development split
/// evenly across the EU3 provinces it feeds.
fn aggregate_province(
    id: DestRegionId,
    source: &SourceWorld,
    regions: &RegionMapping,
    countries: &CountryMapping,
    baseline: &BaselineConfig,
) -> ProvinceOutcome {
    let mut missing = Vec::new();
    let mut contributors: Vec<&SourceProvince> = Vec::new();
    for src in regions.sources_of(id) {
        match source.region(src) {
            Some(province) => contributors.push(province),
            None => missing.push(src),
        }
    }

    let primary = contributors
        .iter()
        .copied()
        .max_by(|a, b| a.development.cmp(&b.development).then(b.id.cmp(&a.id)));
    let converted = primary.map(|primary| {
        let base_tax: f64 = contributors
            .iter()
            .map(|province| {
                let split = regions
                    .destinations_of(province.id)
                    .map_or(1, |destinations| destinations.len().max(1));
                f64::from(province.development) / split as f64
            })
            .sum();
        ConvertedProvince {
            primary: primary.id,
            owner: source
                .realm_of(primary.id)
                .and_then(|realm| countries.get(realm))
                .cloned(),
            culture: primary.culture.clone(),
            religion: primary.religion.clone(),
            base_tax: base_tax.max(baseline.min_base_tax),
        }
    });

    ProvinceOutcome {
        id,
        missing,
        converted,
    }
}

pub struct Pipeline<'a> {
    source: &'a SourceWorld,
    regions: &'a RegionMapping,
    countries: &'a CountryMapping,
    baseline: &'a BaselineConfig,
    world: DestinationWorld,
    stage: Stage,
    report: ConversionReport,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a SourceWorld,
        regions: &'a RegionMapping,
        countries: &'a CountryMapping,
        baseline: &'a BaselineConfig,
        world: DestinationWorld,
    ) -> Self {
        let report = ConversionReport {
            realms: source.independent_entities().len(),
            ..ConversionReport::default()
        };
        Self {
            source,
            regions,
            countries,
            baseline,
            world,
            stage: Stage::Ready,
            report,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn world(&self) -> &DestinationWorld {
        &self.world
    }

    pub fn report(&self) -> &ConversionReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut ConversionReport {
        &mut self.report
    }

    pub fn into_parts(self) -> (DestinationWorld, ConversionReport) {
        (self.world, self.report)
    }

    fn begin(&self, requested: Stage) -> Result<(), ConvertError> {
        if self.stage.next() == Some(requested) {
            Ok(())
        } else {
            Err(ConvertError::StageOrder {
                requested,
                current: self.stage,
            })
        }
    }

    fn finish(&mut self, stage: Stage) {
        self.stage = stage;
        info!(
            target: "ck2_to_eu3::pipeline",
            stage = stage.as_str(),
            "stage.completed"
        );
    }

    /// Create or overwrite one EU3 country per mapped tag.
    pub fn convert_countries(&mut self) -> Result<(), ConvertError> {
        self.begin(Stage::CountriesConverted)?;
        let (source, countries) = (self.source, self.countries);
        self.world.set_date(source.date());

        for tag in countries.tags() {
            let realm = countries
                .titles_for(tag)
                .filter_map(|title| source.entity(title))
                .max_by(|a, b| {
                    a.region_count()
                        .cmp(&b.region_count())
                        .then(b.id.cmp(&a.id))
                });
            let Some(realm) = realm else {
                continue;
            };
            self.convert_country(tag, realm);
            self.report.countries_converted += 1;
        }

        if let Some(player) = source
            .player_realm()
            .and_then(|realm| countries.get(realm))
        {
            self.world.set_player(player.clone());
            self.report.player = Some(player.to_string());
        }

        self.finish(Stage::CountriesConverted);
        Ok(())
    }

    fn convert_country(&mut self, tag: &NationTag, realm: &PoliticalEntity) {
        let source = self.source;
        let baseline = self.baseline;
        let name = source.title(&realm.id).map(|title| title.display_name());
        let holder = source.character(realm.holder);
        if holder.is_none() {
            warn!(
                target: "ck2_to_eu3::pipeline",
                %tag,
                realm = %realm.id,
                holder = %realm.holder,
                "country.holder_missing"
            );
        }

        let country = self.world.upsert_country(tag);
        country.source = Some(realm.id.clone());
        if name.is_some() {
            country.name = name;
        }
        if country.technology_group.is_none() && !baseline.technology_group.is_empty() {
            country.technology_group = Some(baseline.technology_group.clone());
        }
        let Some(holder) = holder else {
            if country.government.is_none() {
                country.government = Some(baseline.government.clone());
            }
            return;
        };

        let government = holder
            .government
            .as_deref()
            .and_then(government_for)
            .unwrap_or(baseline.government.as_str());
        country.government = Some(government.to_string());
        if let Some(culture) = source
            .culture_of(holder)
            .or_else(|| non_empty(&baseline.culture))
        {
            country.primary_culture = Some(culture);
        }
        if let Some(religion) = source
            .religion_of(holder)
            .or_else(|| non_empty(&baseline.religion))
        {
            country.religion = Some(religion);
        }
        country.treasury = holder.wealth;
        country.prestige = holder.prestige * baseline.prestige_scale;

        let skills = source.effective_attributes(holder);
        country.monarch = Some(Monarch {
            name: source.full_name(holder),
            dynasty: holder
                .dynasty
                .and_then(|id| source.dynasty(id))
                .map(|dynasty| dynasty.name.clone())
                .filter(|name| !name.is_empty()),
            adm: monarch_skill(skills.stewardship),
            dip: monarch_skill(skills.diplomacy),
            mil: monarch_skill(skills.martial),
        });
        debug!(
            target: "ck2_to_eu3::pipeline",
            %tag,
            realm = %realm.id,
            "country.converted"
        );
    }

    /// Fill every EU3 province with CK2 contributors. Aggregation runs in
    /// parallel; results are applied in ascending province id.
    pub fn convert_provinces(&mut self) -> Result<(), ConvertError> {
        self.begin(Stage::ProvincesConverted)?;

        let targets: Vec<DestRegionId> = self
            .world
            .provinces()
            .keys()
            .copied()
            .filter(|id| self.regions.has_sources(*id))
            .collect();
        let (source, regions, countries, baseline) =
            (self.source, self.regions, self.countries, self.baseline);
        let mut outcomes: Vec<ProvinceOutcome> = targets
            .par_iter()
            .map(|id| aggregate_province(*id, source, regions, countries, baseline))
            .collect();
        outcomes.sort_by_key(|outcome| outcome.id);

        for outcome in outcomes {
            for src in &outcome.missing {
                warn!(
                    target: "ck2_to_eu3::pipeline",
                    province = %outcome.id,
                    source_province = %src,
                    "province.contributor_missing"
                );
            }
            let Some(converted) = outcome.converted else {
                warn!(
                    target: "ck2_to_eu3::pipeline",
                    province = %outcome.id,
                    "province.pending=no_live_contributor"
                );
                continue;
            };
            let Some(province) = self.world.province_mut(outcome.id) else {
                continue;
            };
            province.owner = converted.owner.clone();
            province.controller = converted.owner.clone();
            province.cores = converted.owner.into_iter().collect();
            if converted.culture.is_some() {
                province.culture = converted.culture;
            }
            if converted.religion.is_some() {
                province.religion = converted.religion;
            }
            province.base_tax = converted.base_tax;
            province.status = ProvinceStatus::Converted;
            debug!(
                target: "ck2_to_eu3::pipeline",
                province = %outcome.id,
                primary = %converted.primary,
                "province.converted"
            );
            self.report.provinces_converted += 1;
        }

        self.assign_capitals();
        self.finish(Stage::ProvincesConverted);
        Ok(())
    }

    /// A converted country whose capital it no longer owns moves it to its
    /// lowest owned province.
    fn assign_capitals(&mut self) {
        let mut first_owned: BTreeMap<NationTag, DestRegionId> = BTreeMap::new();
        for province in self.world.provinces().values() {
            if let Some(owner) = &province.owner {
                first_owned.entry(owner.clone()).or_insert(province.id);
            }
        }
        let converted: Vec<NationTag> = self
            .world
            .countries()
            .values()
            .filter(|country| country.source.is_some())
            .map(|country| country.tag.clone())
            .collect();
        for tag in converted {
            let keeps_capital = self
                .world
                .country(&tag)
                .and_then(|country| country.capital)
                .and_then(|capital| self.world.province(capital))
                .is_some_and(|province| province.owner.as_ref() == Some(&tag));
            if keeps_capital {
                continue;
            }
            let capital = first_owned.get(&tag).copied();
            if let Some(country) = self.world.country_mut(&tag) {
                country.capital = capital;
            }
        }
    }

    /// Reset every province without a live CK2 counterpart to uncolonized.
    pub fn setup_rest_of_world(&mut self) -> Result<(), ConvertError> {
        self.begin(Stage::RestOfWorldSetUp)?;
        let base_tax = self.baseline.rest_of_world_base_tax;
        let mut reset = 0usize;
        for province in self.world.provinces_mut() {
            if province.status == ProvinceStatus::Converted {
                continue;
            }
            province.owner = None;
            province.controller = None;
            province.cores.clear();
            province.base_tax = base_tax;
            province.status = ProvinceStatus::RestOfWorld;
            reset += 1;
        }
        self.report.provinces_rest_of_world = reset;
        debug!(
            target: "ck2_to_eu3::pipeline",
            provinces = reset,
            "rest_of_world.reset"
        );
        self.finish(Stage::RestOfWorldSetUp);
        Ok(())
    }

    /// Turn council members of converted realms into advisors.
    pub fn convert_advisors(&mut self) -> Result<(), ConvertError> {
        self.begin(Stage::AdvisorsConverted)?;
        let source = self.source;
        let converted_holders: HashSet<CharacterId> = source
            .independent_entities()
            .iter()
            .filter(|entity| self.countries.get(&entity.id).is_some())
            .map(|entity| entity.holder)
            .collect();

        for character in source.advisors() {
            let (Some(employer), Some(job)) = (character.employer, character.job) else {
                continue;
            };
            if !converted_holders.contains(&employer) {
                continue;
            }
            let location = character
                .location
                .and_then(|loc| self.regions.destinations_of(loc))
                .and_then(|destinations| destinations.first().copied());
            let Some(location) = location else {
                warn!(
                    target: "ck2_to_eu3::pipeline",
                    character = %character.id,
                    location = ?character.location,
                    "advisor.dropped=unmapped_location"
                );
                self.report.advisors_dropped += 1;
                continue;
            };

            let skills = source.effective_attributes(character);
            let attribute = match job {
                CouncilJob::Chancellor => skills.diplomacy,
                CouncilJob::Marshal => skills.martial,
                CouncilJob::Treasurer => skills.stewardship,
                CouncilJob::Spymaster => skills.intrigue,
                CouncilJob::Spiritual => skills.learning,
            };
            let country = self
                .world
                .province(location)
                .and_then(|province| province.owner.clone());
            self.world.push_advisor(Advisor {
                id: character.id.0,
                name: source.full_name(character),
                kind: advisor_type_for(job),
                skill: advisor_skill(attribute),
                location,
                country,
                date: source.date().to_string(),
            });
            self.report.advisors_placed += 1;
        }

        self.finish(Stage::AdvisorsConverted);
        Ok(())
    }

    /// Write the finished world to `path`. Any I/O failure aborts the run.
    pub fn write_output(&mut self, path: &Path) -> Result<(), ConvertError> {
        self.begin(Stage::Serialized)?;
        let io_error = |source| ConvertError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_error)?;
        let mut out = BufWriter::new(file);
        serialize(&self.world, &mut out).map_err(io_error)?;
        out.flush().map_err(io_error)?;
        self.finish(Stage::Serialized);
        Ok(())
    }
}

pub fn serialize<W: Write>(world: &DestinationWorld, out: &mut W) -> io::Result<()> {
    write_document(&world.to_tree(), out)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn log_coverage(issues: &[CoverageIssue]) {
    for issue in issues {
        match issue {
            CoverageIssue::Missing(region) => error!(
                target: "ck2_to_eu3::region_map",
                province = %region,
                "coverage.missing"
            ),
            CoverageIssue::Unmapped(region) => warn!(
                target: "ck2_to_eu3::region_map",
                province = %region,
                "coverage.unmapped"
            ),
        }
    }
}

fn mapping_file<T>(
    path: &Path,
    read: impl FnOnce(&save_runtime::Node) -> Result<T, crate::error::MappingFileError>,
) -> Result<T, ConvertError> {
    let tree = parse_file(path)?;
    read(&tree).map_err(|source| ConvertError::MappingFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Run a whole conversion from the configured inputs to the output file.
pub fn run(config: &ConverterConfig) -> Result<ConversionReport, ConvertError> {
    config.validate_install_paths()?;
    info!(
        target: "ck2_to_eu3::pipeline",
        save = %config.input_file.display(),
        ck2 = %config.ck2_path.display(),
        eu3 = %config.eu3_path.display(),
        "conversion.started"
    );

    let traits = parse_file(&config.ck2_traits_file())?;
    let dynasties = parse_file(&config.ck2_dynasties_file())?;
    let save = parse_file(&config.input_file)?;
    let source = SourceWorld::from_trees(&traits, &dynasties, &save)?;
    info!(
        target: "ck2_to_eu3::pipeline",
        date = source.date(),
        provinces = source.regions().len(),
        realms = source.independent_entities().len(),
        "source.loaded"
    );

    let regions = mapping_file(&config.province_mappings, RegionMapping::from_tree)?;
    let coverage = regions.validate_coverage(source.regions().keys().copied());
    log_coverage(&coverage);

    let world = DestinationWorld::load(config)?;
    let rules = mapping_file(&config.country_mappings, ExplicitRules::from_tree)?;
    let blocked = read_blocked_nations(&parse_file(&config.blocked_nations)?);

    let mut arena = NationSlotArena::new(world.universe().iter().cloned(), config.max_nations);
    for tag in world.existing_tags() {
        arena.reserve(tag);
    }
    for tag in &blocked {
        if !arena.block(tag) {
            debug!(
                target: "ck2_to_eu3::pipeline",
                %tag,
                "blocked_nation.unknown_tag"
            );
        }
    }
    let countries = country_map::assign(source.independent_entities(), &mut arena, &rules)?;

    let mut pipeline = Pipeline::new(&source, &regions, &countries, &config.baseline, world);
    pipeline.report_mut().record_coverage(&coverage);
    pipeline.convert_countries()?;
    pipeline.convert_provinces()?;
    pipeline.setup_rest_of_world()?;
    pipeline.convert_advisors()?;
    pipeline.write_output(&config.output_file)?;

    let (_, report) = pipeline.into_parts();
    report.log();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TitleId;
    use save_runtime::parse_str;

    const SAVE: &str = "
        date = \"1200.1.1\"
        player = { id = 10 }
        character = {
            10 = { birth_name = Harold dynasty = 1 attributes = { 10 12 16 4 3 } government = feudal_government wealth = 150 prestige = 400 }
            11 = { birth_name = William attributes = { 4 4 4 4 4 } government = tribal_government culture = norman religion = catholic }
            20 = { birth_name = Stigand employer = 10 job_title = job_chancellor location = 2 attributes = { 9 0 0 0 0 } }
            21 = { birth_name = Odo employer = 11 job_title = job_marshal location = 3 }
        }
        title = {
            k_england = { holder = 10 }
            c_london = { holder = 10 liege = k_england }
            c_kent = { holder = 10 liege = k_england }
            d_normandy = { holder = 11 }
            c_rouen = { holder = 11 liege = d_normandy }
        }
        provinces = {
            1 = { name = London title = c_london culture = saxon religion = catholic b_a = { type = city } b_b = { type = castle } b_c = { type = temple } }
            2 = { name = Kent title = c_kent culture = kentish religion = catholic b_a = { type = castle } }
            3 = { name = Rouen title = c_rouen culture = norman religion = catholic b_a = { type = castle } b_b = { type = city } }
        }
    ";

    const MAPPING: &str = "
        link = { ck2 = 1 eu3 = 10 }
        link = { ck2 = 2 eu3 = 10 eu3 = 11 }
        link = { ck2 = 3 }
        link = { ck2 = 9 eu3 = 13 }
    ";

    /// Two one-county kingdoms of equal development. Province 5 lies in
    /// Wales, province 7 in Cornwall.
    const TIED_SAVE: &str = "
        date = \"1200.1.1\"
        character = {
            30 = { birth_name = Gruffydd culture = welsh religion = catholic government = feudal_government }
            31 = { birth_name = Cador culture = cornish religion = catholic government = tribal_government }
        }
        title = {
            k_wales = { holder = 30 }
            c_gwynedd = { holder = 30 liege = k_wales }
            k_cornwall = { holder = 31 }
            c_kernow = { holder = 31 liege = k_cornwall }
        }
        provinces = {
            5 = { name = Gwynedd title = c_gwynedd culture = welsh religion = catholic b_a = { type = city } }
            7 = { name = Kernow title = c_kernow culture = cornish religion = catholic b_a = { type = city } }
        }
    ";

    fn tied_fixture(rules: &str) -> Fixture {
        fixture_from(
            TIED_SAVE,
            "link = { ck2 = 7 ck2 = 5 eu3 = 1 }",
            rules,
            vec![history("1 - Dumnonia.txt", "culture = english base_tax = 3")],
        )
    }

    struct Fixture {
        source: SourceWorld,
        regions: RegionMapping,
        countries: CountryMapping,
        baseline: BaselineConfig,
        world: DestinationWorld,
    }

    fn history(name: &str, text: &str) -> (String, save_runtime::Node) {
        (name.to_string(), parse_str(text).expect("history"))
    }

    fn fixture() -> Fixture {
        fixture_from(
            SAVE,
            MAPPING,
            "",
            vec![
                history("10 - Middlesex.txt", "culture = english base_tax = 4"),
                history("11 - Kent.txt", "culture = english"),
                history(
                    "12 - Orkney.txt",
                    "owner = NOR controller = NOR add_core = NOR culture = norse religion = catholic base_tax = 2",
                ),
                history("13 - Nowhere.txt", "owner = NOR culture = norse"),
            ],
        )
    }

    fn fixture_from(
        save: &str,
        mapping: &str,
        rules: &str,
        province_histories: Vec<(String, save_runtime::Node)>,
    ) -> Fixture {
        let dynasties = parse_str("1 = { name = Godwin culture = saxon religion = catholic }")
            .expect("dynasties");
        let source = SourceWorld::from_trees(
            &save_runtime::Node::root(Vec::new()),
            &dynasties,
            &parse_str(save).expect("save"),
        )
        .expect("source");
        let regions = RegionMapping::from_tree(&parse_str(mapping).expect("mapping"))
            .expect("regions");
        let world = DestinationWorld::from_trees(
            &parse_str("AAA = x BBB = y CCC = z").expect("countries"),
            &[],
            &province_histories,
        );
        let rules = ExplicitRules::from_tree(&parse_str(rules).expect("rules")).expect("rules");
        let mut arena = NationSlotArena::new(world.universe().iter().cloned(), 600);
        let countries = country_map::assign(source.independent_entities(), &mut arena, &rules)
            .expect("assign");
        Fixture {
            source,
            regions,
            countries,
            baseline: BaselineConfig::default(),
            world,
        }
    }

    fn run_all(pipeline: &mut Pipeline<'_>) {
        pipeline.convert_countries().expect("countries");
        pipeline.convert_provinces().expect("provinces");
        pipeline.setup_rest_of_world().expect("rest of world");
        pipeline.convert_advisors().expect("advisors");
    }

    fn tag(raw: &str) -> NationTag {
        NationTag::new(raw)
    }

    #[test]
    fn stages_refuse_to_run_out_of_order() {
        let fx = fixture();
        let mut pipeline =
            Pipeline::new(&fx.source, &fx.regions, &fx.countries, &fx.baseline, fx.world.clone());

        let err = pipeline.convert_provinces().unwrap_err();
        assert!(matches!(
            err,
            ConvertError::StageOrder {
                requested: Stage::ProvincesConverted,
                current: Stage::Ready
            }
        ));
        assert_eq!(pipeline.stage(), Stage::Ready);
        assert_eq!(
            pipeline.world().province(DestRegionId(12)).and_then(|p| p.owner.clone()),
            Some(tag("NOR"))
        );

        pipeline.convert_countries().expect("countries");
        assert!(pipeline.convert_countries().is_err());
        assert!(pipeline.convert_advisors().is_err());
        assert_eq!(pipeline.stage(), Stage::CountriesConverted);
    }

    #[test]
    fn countries_take_holder_attributes() {
        let fx = fixture();
        let mut pipeline =
            Pipeline::new(&fx.source, &fx.regions, &fx.countries, &fx.baseline, fx.world.clone());
        pipeline.convert_countries().expect("countries");
        let world = pipeline.world();

        let england = world.country(&tag("AAA")).expect("england");
        assert_eq!(england.name.as_deref(), Some("England"));
        assert_eq!(england.government.as_deref(), Some("feudal_monarchy"));
        assert_eq!(england.primary_culture.as_deref(), Some("saxon"));
        assert_eq!(england.treasury, 150.0);
        assert!((england.prestige - 4.0).abs() < 1e-9);
        let monarch = england.monarch.as_ref().expect("monarch");
        assert_eq!(monarch.name, "Harold Godwin");
        assert_eq!((monarch.adm, monarch.dip, monarch.mil), (8, 5, 6));

        let normandy = world.country(&tag("BBB")).expect("normandy");
        assert_eq!(normandy.government.as_deref(), Some("tribal_despotism"));
        let william = normandy.monarch.as_ref().expect("monarch");
        assert_eq!((william.adm, william.dip, william.mil), (3, 3, 3));

        assert_eq!(world.player(), Some(&tag("AAA")));
        assert!(world.country(&tag("CCC")).is_none());
    }

    #[test]
    fn mapped_unmapped_and_orphaned_provinces() {
        let fx = fixture();
        let mut pipeline =
            Pipeline::new(&fx.source, &fx.regions, &fx.countries, &fx.baseline, fx.world.clone());
        run_all(&mut pipeline);
        let world = pipeline.world();

        let middlesex = world.province(DestRegionId(10)).expect("10");
        assert_eq!(middlesex.status, ProvinceStatus::Converted);
        assert_eq!(middlesex.owner, Some(tag("AAA")));
        assert_eq!(middlesex.controller, Some(tag("AAA")));
        assert_eq!(middlesex.culture.as_deref(), Some("saxon"));
        assert!((middlesex.base_tax - 3.5).abs() < 1e-9);

        let kent = world.province(DestRegionId(11)).expect("11");
        assert_eq!(kent.culture.as_deref(), Some("kentish"));
        assert_eq!(kent.base_tax, 1.0);

        for id in [12, 13] {
            let province = world.province(DestRegionId(id)).expect("rest of world");
            assert_eq!(province.status, ProvinceStatus::RestOfWorld);
            assert!(province.owner.is_none());
            assert!(province.controller.is_none());
            assert!(province.cores.is_empty());
            assert_eq!(province.culture.as_deref(), Some("norse"));
            assert_eq!(province.base_tax, 1.0);
        }

        assert_eq!(
            world.country(&tag("AAA")).and_then(|c| c.capital),
            Some(DestRegionId(10))
        );
        assert_eq!(world.country(&tag("BBB")).and_then(|c| c.capital), None);
    }

    #[test]
    fn advisors_land_in_lowest_mapped_province() {
        let fx = fixture();
        let mut pipeline =
            Pipeline::new(&fx.source, &fx.regions, &fx.countries, &fx.baseline, fx.world.clone());
        run_all(&mut pipeline);

        let advisors = pipeline.world().advisors();
        assert_eq!(advisors.len(), 1);
        let stigand = &advisors[0];
        assert_eq!(stigand.name, "Stigand");
        assert_eq!(stigand.kind, "diplomat");
        assert_eq!(stigand.skill, 3);
        assert_eq!(stigand.location, DestRegionId(10));
        assert_eq!(stigand.country, Some(tag("AAA")));

        let report = pipeline.report();
        assert_eq!(report.advisors_placed, 1);
        assert_eq!(report.advisors_dropped, 1);
        assert_eq!(report.provinces_converted, 2);
        assert_eq!(report.provinces_rest_of_world, 2);
        assert_eq!(report.countries_converted, 2);
    }

    #[test]
    fn serialized_output_reparses() {
        let fx = fixture();
        let mut pipeline =
            Pipeline::new(&fx.source, &fx.regions, &fx.countries, &fx.baseline, fx.world.clone());
        run_all(&mut pipeline);

        let mut buffer = Vec::new();
        serialize(pipeline.world(), &mut buffer).expect("serialize");
        let text = String::from_utf8(buffer).expect("utf8");
        insta::assert_snapshot!(text, @r#"
date="1200.1.1"
player="AAA"
AAA=
{
	name="England"
	government=feudal_monarchy
	primary_culture=saxon
	religion=catholic
	technology_group=western
	capital=10
	treasury=150.000
	prestige=4.000
	monarch=
	{
		name="Harold Godwin"
		dynasty="Godwin"
		ADM=8
		DIP=5
		MIL=6
	}
}
BBB=
{
	name="Normandy"
	government=tribal_despotism
	primary_culture=norman
	religion=catholic
	technology_group=western
	treasury=0.000
	prestige=0.000
	monarch=
	{
		name="William"
		ADM=3
		DIP=3
		MIL=3
	}
}
-10=
{
	name="Middlesex"
	owner=AAA
	controller=AAA
	core=AAA
	culture=saxon
	religion=catholic
	base_tax=3.500
}
-11=
{
	name="Kent"
	owner=AAA
	controller=AAA
	core=AAA
	culture=kentish
	religion=catholic
	base_tax=1.000
}
-12=
{
	name="Orkney"
	culture=norse
	religion=catholic
	base_tax=1.000
}
-13=
{
	name="Nowhere"
	culture=norse
	base_tax=1.000
}
advisor=
{
	id=20
	name="Stigand"
	type=diplomat
	skill=3
	location=10
	country=AAA
	date="1200.1.1"
}
"#);

        let tree = parse_str(&text).expect("reparse");
        assert_eq!(tree.get_scalar("player"), Some("AAA"));
        assert_eq!(
            tree.get("AAA")
                .and_then(|c| c.get("monarch"))
                .and_then(|m| m.get_scalar("name")),
            Some("Harold Godwin")
        );
    }

    #[test]
    fn aggregation_prefers_development_then_lowest_id() {
        let fx = fixture();
        let outcome = aggregate_province(
            DestRegionId(10),
            &fx.source,
            &fx.regions,
            &fx.countries,
            &fx.baseline,
        );
        let converted = outcome.converted.expect("converted");
        assert_eq!(converted.primary, SourceRegionId(1));
        assert!(outcome.missing.is_empty());

        let orphan = aggregate_province(
            DestRegionId(13),
            &fx.source,
            &fx.regions,
            &fx.countries,
            &fx.baseline,
        );
        assert_eq!(orphan.missing, vec![SourceRegionId(9)]);
        assert!(orphan.converted.is_none());
    }

    #[test]
    fn equal_development_falls_back_to_lowest_province_id() {
        let fx = tied_fixture("");
        assert_eq!(fx.countries.get(&TitleId::new("k_cornwall")), Some(&tag("AAA")));
        assert_eq!(fx.countries.get(&TitleId::new("k_wales")), Some(&tag("BBB")));

        let outcome = aggregate_province(
            DestRegionId(1),
            &fx.source,
            &fx.regions,
            &fx.countries,
            &fx.baseline,
        );
        let converted = outcome.converted.expect("converted");
        assert_eq!(converted.primary, SourceRegionId(5));
        assert_eq!(converted.culture.as_deref(), Some("welsh"));
        assert_eq!(converted.owner, Some(tag("BBB")));
        assert!((converted.base_tax - 2.0).abs() < 1e-9);
    }

    #[test]
    fn collapsed_realms_of_equal_size_take_lowest_title() {
        let fx = tied_fixture("link = { ck2 = k_wales ck2 = k_cornwall eu3 = AAA }");
        assert_eq!(
            fx.countries.titles_for(&tag("AAA")).count(),
            2,
            "both kingdoms collapse into one tag"
        );

        let mut pipeline =
            Pipeline::new(&fx.source, &fx.regions, &fx.countries, &fx.baseline, fx.world.clone());
        pipeline.convert_countries().expect("countries");
        let country = pipeline.world().country(&tag("AAA")).expect("collapsed country");
        assert_eq!(country.source, Some(TitleId::new("k_cornwall")));
        assert_eq!(country.name.as_deref(), Some("Cornwall"));
        assert_eq!(country.government.as_deref(), Some("tribal_despotism"));
        assert_eq!(
            country.monarch.as_ref().map(|monarch| monarch.name.as_str()),
            Some("Cador")
        );
        assert_eq!(pipeline.report().countries_converted, 1);
    }

    #[test]
    fn government_table_and_skill_clamps() {
        assert_eq!(government_for("merchant_republic_government"), Some("merchant_republic"));
        assert_eq!(government_for("nomadic_government"), None);
        assert_eq!(monarch_skill(30), 8);
        assert_eq!(monarch_skill(-4), 3);
        assert_eq!(advisor_skill(0), 1);
        assert_eq!(advisor_skill(40), 6);
    }
}
