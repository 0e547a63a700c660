//! EU3 world state: the tag universe, the countries and provinces read from
//! the install's history, and whatever the conversion stages write into it.
//!
//! Reading the install and writing the final save are the only places that
//! touch attribute trees; everything in between goes through typed records.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use save_runtime::{parse_file, Node};
use tracing::{debug, warn};

use crate::{
    config::ConverterConfig,
    error::WorldError,
    ids::{DestRegionId, NationTag, TitleId},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Monarch {
    pub name: String,
    pub dynasty: Option<String>,
    pub adm: u8,
    pub dip: u8,
    pub mil: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationCountry {
    pub tag: NationTag,
    pub name: Option<String>,
    pub government: Option<String>,
    pub primary_culture: Option<String>,
    pub religion: Option<String>,
    pub technology_group: Option<String>,
    pub capital: Option<DestRegionId>,
    pub treasury: f64,
    pub prestige: f64,
    pub monarch: Option<Monarch>,
    /// Declared in the install's country history.
    pub existing: bool,
    /// CK2 realm this country was converted from.
    pub source: Option<TitleId>,
}

impl DestinationCountry {
    pub fn new(tag: NationTag) -> Self {
        Self {
            tag,
            name: None,
            government: None,
            primary_culture: None,
            religion: None,
            technology_group: None,
            capital: None,
            treasury: 0.0,
            prestige: 0.0,
            monarch: None,
            existing: false,
            source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvinceStatus {
    /// Loaded from history, not yet touched by a stage.
    #[default]
    Pending,
    /// Filled from one or more CK2 provinces.
    Converted,
    /// No CK2 counterpart; reset to uncolonized.
    RestOfWorld,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationProvince {
    pub id: DestRegionId,
    pub name: String,
    pub owner: Option<NationTag>,
    pub controller: Option<NationTag>,
    pub cores: BTreeSet<NationTag>,
    pub culture: Option<String>,
    pub religion: Option<String>,
    pub base_tax: f64,
    pub trade_goods: Option<String>,
    pub status: ProvinceStatus,
}

impl DestinationProvince {
    pub fn new(id: DestRegionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: None,
            controller: None,
            cores: BTreeSet::new(),
            culture: None,
            religion: None,
            base_tax: 0.0,
            trade_goods: None,
            status: ProvinceStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Advisor {
    pub id: u32,
    pub name: String,
    pub kind: &'static str,
    pub skill: u8,
    pub location: DestRegionId,
    pub country: Option<NationTag>,
    pub date: String,
}

#[derive(Debug, Clone, Default)]
pub struct DestinationWorld {
    date: String,
    player: Option<NationTag>,
    universe: Vec<NationTag>,
    countries: BTreeMap<NationTag, DestinationCountry>,
    provinces: BTreeMap<DestRegionId, DestinationProvince>,
    advisors: Vec<Advisor>,
}

impl DestinationWorld {
    /// Read `common/countries.txt` and both history directories of the EU3
    /// install named by the configuration.
    pub fn load(config: &ConverterConfig) -> Result<Self, WorldError> {
        let countries = parse_file(&config.eu3_countries_file())?;
        let histories = read_history_dir(&config.eu3_country_history_dir())?;
        let provinces = read_history_dir(&config.eu3_province_history_dir())?;
        Ok(Self::from_trees(&countries, &histories, &provinces))
    }

    /// Build the world from already parsed files. History entries are
    /// `(file name, tree)` pairs, file names in `ID - Name.txt` form.
    pub fn from_trees(
        countries: &Node,
        country_histories: &[(String, Node)],
        province_histories: &[(String, Node)],
    ) -> Self {
        let mut world = Self {
            universe: read_universe(countries),
            ..Self::default()
        };
        for (file_name, tree) in country_histories {
            let Some((tag, name)) = split_history_name(file_name) else {
                continue;
            };
            if tree.get("capital").is_none() {
                continue;
            }
            let tag = NationTag::new(tag);
            let mut country = DestinationCountry::new(tag.clone());
            country.existing = true;
            country.name = name.map(str::to_string);
            country.government = owned(tree.get_scalar("government"));
            country.primary_culture = owned(tree.get_scalar("primary_culture"));
            country.religion = owned(tree.get_scalar("religion"));
            country.technology_group = owned(tree.get_scalar("technology_group"));
            country.capital = tree.get_u32("capital").map(DestRegionId);
            world.countries.insert(tag, country);
        }
        for (file_name, tree) in province_histories {
            let Some((raw_id, name)) = split_history_name(file_name) else {
                continue;
            };
            let Ok(id) = raw_id.parse::<u32>() else {
                warn!(
                    target: "ck2_to_eu3::dest_world",
                    file = %file_name,
                    "province_history.skipped=non_numeric_id"
                );
                continue;
            };
            let id = DestRegionId(id);
            let mut province = DestinationProvince::new(id, name.unwrap_or_default());
            province.owner = tree.get_scalar("owner").map(NationTag::new);
            province.controller = tree.get_scalar("controller").map(NationTag::new);
            province.cores = tree
                .get_all("add_core")
                .filter_map(Node::as_scalar)
                .map(NationTag::new)
                .collect();
            province.culture = owned(tree.get_scalar("culture"));
            province.religion = owned(tree.get_scalar("religion"));
            province.base_tax = tree.get_f64("base_tax").unwrap_or(0.0);
            province.trade_goods = owned(tree.get_scalar("trade_goods"));
            world.provinces.insert(id, province);
        }
        debug!(
            target: "ck2_to_eu3::dest_world",
            universe = world.universe.len(),
            existing_countries = world.countries.len(),
            provinces = world.provinces.len(),
            "dest_world.loaded"
        );
        world
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn set_date(&mut self, date: impl Into<String>) {
        self.date = date.into();
    }

    pub fn player(&self) -> Option<&NationTag> {
        self.player.as_ref()
    }

    pub fn set_player(&mut self, tag: NationTag) {
        self.player = Some(tag);
    }

    /// Every tag the engine knows, in `countries.txt` order.
    pub fn universe(&self) -> &[NationTag] {
        &self.universe
    }

    /// Tags that already exist as countries before conversion.
    pub fn existing_tags(&self) -> impl Iterator<Item = &NationTag> + '_ {
        self.countries
            .values()
            .filter(|country| country.existing)
            .map(|country| &country.tag)
    }

    pub fn countries(&self) -> &BTreeMap<NationTag, DestinationCountry> {
        &self.countries
    }

    pub fn country(&self, tag: &NationTag) -> Option<&DestinationCountry> {
        self.countries.get(tag)
    }

    pub fn country_mut(&mut self, tag: &NationTag) -> Option<&mut DestinationCountry> {
        self.countries.get_mut(tag)
    }

    /// The country for `tag`, created empty if it does not exist yet.
    pub fn upsert_country(&mut self, tag: &NationTag) -> &mut DestinationCountry {
        self.countries
            .entry(tag.clone())
            .or_insert_with(|| DestinationCountry::new(tag.clone()))
    }

    pub fn provinces(&self) -> &BTreeMap<DestRegionId, DestinationProvince> {
        &self.provinces
    }

    pub fn province(&self, id: DestRegionId) -> Option<&DestinationProvince> {
        self.provinces.get(&id)
    }

    pub fn province_mut(&mut self, id: DestRegionId) -> Option<&mut DestinationProvince> {
        self.provinces.get_mut(&id)
    }

    pub fn provinces_mut(&mut self) -> impl Iterator<Item = &mut DestinationProvince> + '_ {
        self.provinces.values_mut()
    }

    pub fn advisors(&self) -> &[Advisor] {
        &self.advisors
    }

    pub fn push_advisor(&mut self, advisor: Advisor) {
        self.advisors.push(advisor);
    }

    /// Save representation: date and player, then one block per country,
    /// one `-<id>` block per province and one `advisor` block per advisor.
    pub fn to_tree(&self) -> Node {
        let mut root = Node::root(Vec::new());
        root.push(Node::quoted("date", &self.date));
        if let Some(player) = &self.player {
            root.push(Node::quoted("player", player.as_str()));
        }
        for country in self.countries.values() {
            root.push(country_node(country));
        }
        for province in self.provinces.values() {
            root.push(province_node(province));
        }
        for advisor in &self.advisors {
            root.push(advisor_node(advisor));
        }
        root
    }
}

fn country_node(country: &DestinationCountry) -> Node {
    let mut node = Node::block(country.tag.as_str(), Vec::new());
    if let Some(name) = &country.name {
        node.push(Node::quoted("name", name));
    }
    push_opt(&mut node, "government", country.government.as_deref());
    push_opt(&mut node, "primary_culture", country.primary_culture.as_deref());
    push_opt(&mut node, "religion", country.religion.as_deref());
    push_opt(&mut node, "technology_group", country.technology_group.as_deref());
    if let Some(capital) = country.capital {
        node.push(Node::scalar("capital", capital.to_string()));
    }
    node.push(Node::scalar("treasury", format_amount(country.treasury)));
    node.push(Node::scalar("prestige", format_amount(country.prestige)));
    if let Some(monarch) = &country.monarch {
        let mut block = Node::block("monarch", Vec::new());
        block.push(Node::quoted("name", &monarch.name));
        if let Some(dynasty) = &monarch.dynasty {
            block.push(Node::quoted("dynasty", dynasty));
        }
        block.push(Node::scalar("ADM", monarch.adm.to_string()));
        block.push(Node::scalar("DIP", monarch.dip.to_string()));
        block.push(Node::scalar("MIL", monarch.mil.to_string()));
        node.push(block);
    }
    node
}

fn province_node(province: &DestinationProvince) -> Node {
    let mut node = Node::block(format!("-{}", province.id), Vec::new());
    node.push(Node::quoted("name", &province.name));
    push_opt(&mut node, "owner", province.owner.as_ref().map(NationTag::as_str));
    push_opt(
        &mut node,
        "controller",
        province.controller.as_ref().map(NationTag::as_str),
    );
    for core in &province.cores {
        node.push(Node::scalar("core", core.as_str()));
    }
    push_opt(&mut node, "culture", province.culture.as_deref());
    push_opt(&mut node, "religion", province.religion.as_deref());
    node.push(Node::scalar("base_tax", format_amount(province.base_tax)));
    push_opt(&mut node, "trade_goods", province.trade_goods.as_deref());
    node
}

fn advisor_node(advisor: &Advisor) -> Node {
    let mut node = Node::block("advisor", Vec::new());
    node.push(Node::scalar("id", advisor.id.to_string()));
    node.push(Node::quoted("name", &advisor.name));
    node.push(Node::scalar("type", advisor.kind));
    node.push(Node::scalar("skill", advisor.skill.to_string()));
    node.push(Node::scalar("location", advisor.location.to_string()));
    push_opt(&mut node, "country", advisor.country.as_ref().map(NationTag::as_str));
    node.push(Node::quoted("date", &advisor.date));
    node
}

fn push_opt(node: &mut Node, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        node.push(Node::scalar(key, value));
    }
}

fn format_amount(value: f64) -> String {
    format!("{value:.3}")
}

fn read_universe(countries: &Node) -> Vec<NationTag> {
    countries
        .children()
        .iter()
        .filter(|node| !node.is_bare())
        .map(|node| NationTag::new(&node.key))
        .collect()
}

/// Parse every `.txt` file of a history directory, sorted by file name.
fn read_history_dir(dir: &Path) -> Result<Vec<(String, Node)>, WorldError> {
    let entries = fs::read_dir(dir).map_err(|source| WorldError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let file_name = file_name.to_string();
        files.push((file_name, parse_file(&path)?));
    }
    Ok(files)
}

/// `"SWE - Sweden.txt"` -> `("SWE", Some("Sweden"))`; `"12.txt"` -> `("12", None)`.
fn split_history_name(file_name: &str) -> Option<(&str, Option<&str>)> {
    let stem = file_name.strip_suffix(".txt").unwrap_or(file_name).trim();
    if stem.is_empty() {
        return None;
    }
    match stem.split_once('-') {
        Some((id, name)) => {
            let name = name.trim();
            Some((id.trim(), (!name.is_empty()).then_some(name)))
        }
        None => Some((stem, None)),
    }
}

fn owned(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use save_runtime::{parse_str, to_text};

    fn history(name: &str, text: &str) -> (String, Node) {
        (name.to_string(), parse_str(text).expect("parse"))
    }

    fn world() -> DestinationWorld {
        let countries = parse_str(
            "SWE = \"countries/Sweden.txt\"
             ENG = \"countries/England.txt\"
             fra = \"countries/France.txt\"",
        )
        .expect("countries");
        DestinationWorld::from_trees(
            &countries,
            &[
                history(
                    "SWE - Sweden.txt",
                    "government = feudal_monarchy primary_culture = swedish religion = catholic technology_group = western capital = 1",
                ),
                history("ENG - England.txt", "government = feudal_monarchy"),
            ],
            &[
                history(
                    "1 - Uppland.txt",
                    "owner = SWE controller = SWE add_core = SWE add_core = DAN culture = swedish religion = catholic base_tax = 5 trade_goods = grain",
                ),
                history("12 - Nowhere.txt", "culture = sami religion = shamanism"),
                history("notes.txt", "owner = XXX"),
            ],
        )
    }

    #[test]
    fn universe_keeps_file_order_and_normalizes_tags() {
        let world = world();
        let tags: Vec<_> = world.universe().iter().map(NationTag::as_str).collect();
        assert_eq!(tags, vec!["SWE", "ENG", "FRA"]);
    }

    #[test]
    fn only_histories_with_a_capital_are_existing_countries() {
        let world = world();
        let existing: Vec<_> = world.existing_tags().map(NationTag::as_str).collect();
        assert_eq!(existing, vec!["SWE"]);
        let sweden = world.country(&NationTag::new("SWE")).expect("sweden");
        assert_eq!(sweden.name.as_deref(), Some("Sweden"));
        assert_eq!(sweden.capital, Some(DestRegionId(1)));
    }

    #[test]
    fn province_history_is_transcribed() {
        let world = world();
        let uppland = world.province(DestRegionId(1)).expect("uppland");
        assert_eq!(uppland.name, "Uppland");
        assert_eq!(uppland.owner, Some(NationTag::new("SWE")));
        assert_eq!(uppland.cores.len(), 2);
        assert_eq!(uppland.base_tax, 5.0);
        assert_eq!(uppland.status, ProvinceStatus::Pending);

        assert!(world.province(DestRegionId(12)).is_some());
        assert_eq!(world.provinces().len(), 2);
    }

    #[test]
    fn history_file_names_split_on_dash() {
        assert_eq!(split_history_name("SWE - Sweden.txt"), Some(("SWE", Some("Sweden"))));
        assert_eq!(split_history_name("12.txt"), Some(("12", None)));
        assert_eq!(split_history_name(".txt"), None);
    }

    #[test]
    fn serialized_world_lists_countries_provinces_and_advisors() {
        let mut world = world();
        world.set_date("1399.10.14");
        world.set_player(NationTag::new("SWE"));
        world.upsert_country(&NationTag::new("ENG")).monarch = Some(Monarch {
            name: "Harold Godwin".to_string(),
            dynasty: Some("Godwin".to_string()),
            adm: 5,
            dip: 6,
            mil: 4,
        });
        world.push_advisor(Advisor {
            id: 20,
            name: "Stigand".to_string(),
            kind: "diplomat",
            skill: 3,
            location: DestRegionId(1),
            country: Some(NationTag::new("SWE")),
            date: "1399.10.14".to_string(),
        });

        let tree = world.to_tree();
        assert_eq!(tree.get_scalar("date"), Some("1399.10.14"));
        let eng = tree.get("ENG").expect("ENG block");
        assert_eq!(eng.get("monarch").and_then(|m| m.get_scalar("ADM")), Some("5"));
        let uppland = tree.get("-1").expect("province block");
        assert_eq!(uppland.get_all("core").count(), 2);
        assert_eq!(tree.get_all("advisor").count(), 1);

        let reparsed = parse_str(&to_text(&tree)).expect("reparse");
        assert_eq!(reparsed.get_scalar("player"), Some("SWE"));
        assert_eq!(
            reparsed.get("-12").and_then(|p| p.get_scalar("culture")),
            Some("sami")
        );
    }
}
