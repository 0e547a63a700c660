//! CK2 world snapshot built from the traits file, the dynasty definitions and
//! a save game.
//!
//! All attribute-tree traversal for the CK2 side lives in this module. The
//! resulting [`SourceWorld`] is immutable and exposes the query surface the
//! mapping engines and conversion stages rely on.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
};

use save_runtime::Node;
use tracing::{debug, warn};

use crate::{
    error::WorldError,
    ids::{CharacterId, DynastyId, SourceRegionId, TitleId},
};

/// The five CK2 character attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes {
    pub diplomacy: i32,
    pub martial: i32,
    pub stewardship: i32,
    pub intrigue: i32,
    pub learning: i32,
}

impl Attributes {
    fn from_list(node: &Node) -> Self {
        let values: Vec<i32> = node
            .leaves()
            .map(|raw| raw.trim().parse().unwrap_or(0))
            .collect();
        let at = |idx: usize| values.get(idx).copied().unwrap_or(0);
        Self {
            diplomacy: at(0),
            martial: at(1),
            stewardship: at(2),
            intrigue: at(3),
            learning: at(4),
        }
    }

    fn from_modifiers(node: &Node) -> Self {
        let read = |key: &str| -> i32 {
            node.get_scalar(key)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0)
        };
        Self {
            diplomacy: read("diplomacy"),
            martial: read("martial"),
            stewardship: read("stewardship"),
            intrigue: read("intrigue"),
            learning: read("learning"),
        }
    }

    fn add(self, other: Attributes) -> Self {
        Self {
            diplomacy: self.diplomacy + other.diplomacy,
            martial: self.martial + other.martial,
            stewardship: self.stewardship + other.stewardship,
            intrigue: self.intrigue + other.intrigue,
            learning: self.learning + other.learning,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trait {
    /// 1-based position in `00_traits.txt`; saves refer to traits by it.
    pub id: u32,
    pub name: String,
    pub modifiers: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dynasty {
    pub id: DynastyId,
    pub name: String,
    pub culture: Option<String>,
    pub religion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouncilJob {
    Chancellor,
    Marshal,
    Treasurer,
    Spymaster,
    Spiritual,
}

impl CouncilJob {
    pub fn from_job_title(raw: &str) -> Option<Self> {
        match raw {
            "job_chancellor" => Some(CouncilJob::Chancellor),
            "job_marshal" => Some(CouncilJob::Marshal),
            "job_treasurer" => Some(CouncilJob::Treasurer),
            "job_spymaster" => Some(CouncilJob::Spymaster),
            "job_spiritual" => Some(CouncilJob::Spiritual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub id: CharacterId,
    pub birth_name: String,
    pub dynasty: Option<DynastyId>,
    pub culture: Option<String>,
    pub religion: Option<String>,
    pub government: Option<String>,
    pub attributes: Attributes,
    pub traits: Vec<u32>,
    pub wealth: f64,
    pub prestige: f64,
    pub alive: bool,
    pub employer: Option<CharacterId>,
    pub job: Option<CouncilJob>,
    pub location: Option<SourceRegionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TitleRank {
    Barony,
    County,
    Duchy,
    Kingdom,
    Empire,
}

impl TitleRank {
    pub fn from_title_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('_')?;
        match prefix {
            "b" => Some(TitleRank::Barony),
            "c" => Some(TitleRank::County),
            "d" => Some(TitleRank::Duchy),
            "k" => Some(TitleRank::Kingdom),
            "e" => Some(TitleRank::Empire),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub id: TitleId,
    pub rank: TitleRank,
    pub holder: Option<CharacterId>,
    pub liege: Option<TitleId>,
    pub name: Option<String>,
}

impl Title {
    /// Explicit name if the save carries one, otherwise derived from the key
    /// (`k_holy_roman` becomes `Holy Roman`).
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let base = self
            .id
            .as_str()
            .split_once('_')
            .map(|(_, rest)| rest)
            .unwrap_or(self.id.as_str());
        base.split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceProvince {
    pub id: SourceRegionId,
    pub name: String,
    pub culture: Option<String>,
    pub religion: Option<String>,
    pub county: Option<TitleId>,
    /// Number of built holdings; the weight used when several CK2 provinces
    /// feed one EU3 province.
    pub development: u32,
}

/// An independent CK2 realm, the unit mapped onto an EU3 country.
#[derive(Debug, Clone, PartialEq)]
pub struct PoliticalEntity {
    pub id: TitleId,
    pub rank: TitleRank,
    pub holder: CharacterId,
    /// Other independent titles of the same holder folded into this realm.
    pub merged_titles: Vec<TitleId>,
    pub regions: BTreeSet<SourceRegionId>,
}

impl PoliticalEntity {
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceWorld {
    date: String,
    player: Option<CharacterId>,
    traits: BTreeMap<u32, Trait>,
    dynasties: BTreeMap<DynastyId, Dynasty>,
    characters: BTreeMap<CharacterId, Character>,
    titles: BTreeMap<TitleId, Title>,
    provinces: BTreeMap<SourceRegionId, SourceProvince>,
    entities: Vec<PoliticalEntity>,
    realm_of: BTreeMap<SourceRegionId, TitleId>,
}

impl SourceWorld {
    /// Transcribe the three CK2 inputs into a world. A save lacking the
    /// character, title or province sections is rejected; individual malformed
    /// records are skipped with a warning.
    pub fn from_trees(traits: &Node, dynasties: &Node, save: &Node) -> Result<Self, WorldError> {
        let characters_node = save
            .get("character")
            .ok_or(WorldError::MissingSection { section: "character" })?;
        let titles_node = save
            .get("title")
            .ok_or(WorldError::MissingSection { section: "title" })?;
        let provinces_node = save
            .get("provinces")
            .ok_or(WorldError::MissingSection { section: "provinces" })?;

        let mut world = SourceWorld {
            date: save.get_scalar("date").unwrap_or_default().to_string(),
            player: save
                .get("player")
                .and_then(|player| player.get_u32("id"))
                .map(CharacterId),
            traits: read_traits(traits),
            dynasties: read_dynasties(dynasties),
            ..SourceWorld::default()
        };
        if let Some(save_dynasties) = save.get("dynasties") {
            world.dynasties.extend(read_dynasties(save_dynasties));
        }
        world.characters = read_characters(characters_node);
        world.titles = read_titles(titles_node);
        world.provinces = read_provinces(provinces_node);
        world.resolve_realms();

        debug!(
            target: "ck2_to_eu3::source_world",
            traits = world.traits.len(),
            dynasties = world.dynasties.len(),
            characters = world.characters.len(),
            titles = world.titles.len(),
            provinces = world.provinces.len(),
            realms = world.entities.len(),
            "source_world.loaded"
        );
        Ok(world)
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn regions(&self) -> &BTreeMap<SourceRegionId, SourceProvince> {
        &self.provinces
    }

    pub fn region(&self, id: SourceRegionId) -> Option<&SourceProvince> {
        self.provinces.get(&id)
    }

    /// Independent realms in title-id order.
    pub fn independent_entities(&self) -> &[PoliticalEntity] {
        &self.entities
    }

    pub fn entity(&self, id: &TitleId) -> Option<&PoliticalEntity> {
        self.entities.iter().find(|entity| &entity.id == id)
    }

    /// Realm (primary independent title) a province belongs to.
    pub fn realm_of(&self, region: SourceRegionId) -> Option<&TitleId> {
        self.realm_of.get(&region)
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    pub fn dynasty(&self, id: DynastyId) -> Option<&Dynasty> {
        self.dynasties.get(&id)
    }

    pub fn title(&self, id: &TitleId) -> Option<&Title> {
        self.titles.get(id)
    }

    pub fn trait_by_id(&self, id: u32) -> Option<&Trait> {
        self.traits.get(&id)
    }

    /// Base attributes plus every known trait modifier.
    pub fn effective_attributes(&self, character: &Character) -> Attributes {
        character
            .traits
            .iter()
            .filter_map(|id| self.traits.get(id))
            .fold(character.attributes, |acc, t| acc.add(t.modifiers))
    }

    /// `"<birth name> <dynasty name>"`, or the birth name alone.
    pub fn full_name(&self, character: &Character) -> String {
        match character.dynasty.and_then(|id| self.dynasties.get(&id)) {
            Some(dynasty) if !dynasty.name.is_empty() => {
                format!("{} {}", character.birth_name, dynasty.name)
            }
            _ => character.birth_name.clone(),
        }
    }

    /// Culture of a character, falling back to the dynasty's.
    pub fn culture_of(&self, character: &Character) -> Option<String> {
        character.culture.clone().or_else(|| {
            character
                .dynasty
                .and_then(|id| self.dynasties.get(&id))
                .and_then(|dynasty| dynasty.culture.clone())
        })
    }

    pub fn religion_of(&self, character: &Character) -> Option<String> {
        character.religion.clone().or_else(|| {
            character
                .dynasty
                .and_then(|id| self.dynasties.get(&id))
                .and_then(|dynasty| dynasty.religion.clone())
        })
    }

    /// Living council members, in character-id order.
    pub fn advisors(&self) -> impl Iterator<Item = &Character> + '_ {
        self.characters
            .values()
            .filter(|character| character.alive && character.job.is_some())
            .filter(|character| character.employer.is_some())
    }

    /// Realm held by the player character, if any.
    pub fn player_realm(&self) -> Option<&TitleId> {
        let player = self.player?;
        self.entities
            .iter()
            .find(|entity| entity.holder == player)
            .map(|entity| &entity.id)
    }

    fn resolve_realms(&mut self) {
        let mut candidates: Vec<&Title> = self
            .titles
            .values()
            .filter(|title| title.holder.is_some() && title.liege.is_none())
            .filter(|title| title.rank > TitleRank::Barony)
            .collect();
        candidates.sort_by_key(|title| (title.holder, Reverse(title.rank), title.id.clone()));

        let mut primary_of: HashMap<TitleId, TitleId> = HashMap::new();
        let mut entities: Vec<PoliticalEntity> = Vec::new();
        let mut entity_by_holder: HashMap<CharacterId, usize> = HashMap::new();
        for title in candidates {
            let Some(holder) = title.holder else { continue };
            match entity_by_holder.get(&holder) {
                Some(&idx) => {
                    let primary = entities[idx].id.clone();
                    entities[idx].merged_titles.push(title.id.clone());
                    primary_of.insert(title.id.clone(), primary);
                }
                None => {
                    entity_by_holder.insert(holder, entities.len());
                    primary_of.insert(title.id.clone(), title.id.clone());
                    entities.push(PoliticalEntity {
                        id: title.id.clone(),
                        rank: title.rank,
                        holder,
                        merged_titles: Vec::new(),
                        regions: BTreeSet::new(),
                    });
                }
            }
        }

        let mut realm_of = BTreeMap::new();
        for province in self.provinces.values() {
            let Some(county) = &province.county else {
                continue;
            };
            let Some(top) = self.top_liege(county) else {
                continue;
            };
            if let Some(primary) = primary_of.get(&top) {
                realm_of.insert(province.id, primary.clone());
            }
        }
        for (region, realm) in &realm_of {
            if let Some(entity) = entities.iter_mut().find(|entity| &entity.id == realm) {
                entity.regions.insert(*region);
            }
        }
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        self.entities = entities;
        self.realm_of = realm_of;
    }

    /// Follow the liege chain of a title to its top. Unknown lieges end the
    /// chain at the last known title; a cycle is reported and yields `None`.
    fn top_liege(&self, start: &TitleId) -> Option<TitleId> {
        let mut current = self.titles.get(start)?;
        let mut seen: HashSet<&TitleId> = HashSet::new();
        seen.insert(&current.id);
        while let Some(liege) = &current.liege {
            let Some(next) = self.titles.get(liege) else {
                break;
            };
            if !seen.insert(&next.id) {
                warn!(
                    target: "ck2_to_eu3::source_world",
                    title = %start,
                    "title.liege_cycle"
                );
                return None;
            }
            current = next;
        }
        Some(current.id.clone())
    }
}

fn read_traits(root: &Node) -> BTreeMap<u32, Trait> {
    root.children()
        .iter()
        .filter(|node| !node.is_bare() && node.as_scalar().is_none())
        .enumerate()
        .map(|(idx, node)| {
            let id = idx as u32 + 1;
            (
                id,
                Trait {
                    id,
                    name: node.key.clone(),
                    modifiers: Attributes::from_modifiers(node),
                },
            )
        })
        .collect()
}

fn read_dynasties(root: &Node) -> BTreeMap<DynastyId, Dynasty> {
    let mut dynasties = BTreeMap::new();
    for node in root.children() {
        let Some(id) = parse_id(node, "dynasty") else {
            continue;
        };
        dynasties.insert(
            DynastyId(id),
            Dynasty {
                id: DynastyId(id),
                name: node.get_scalar("name").unwrap_or_default().to_string(),
                culture: owned(node.get_scalar("culture")),
                religion: owned(node.get_scalar("religion")),
            },
        );
    }
    dynasties
}

fn read_characters(root: &Node) -> BTreeMap<CharacterId, Character> {
    let mut characters = BTreeMap::new();
    for node in root.children() {
        let Some(id) = parse_id(node, "character") else {
            continue;
        };
        let character = Character {
            id: CharacterId(id),
            birth_name: node.get_scalar("birth_name").unwrap_or_default().to_string(),
            dynasty: node.get_u32("dynasty").map(DynastyId),
            culture: owned(node.get_scalar("culture")),
            religion: owned(node.get_scalar("religion")),
            government: owned(node.get_scalar("government")),
            attributes: node
                .get("attributes")
                .map(Attributes::from_list)
                .unwrap_or_default(),
            traits: node
                .get("traits")
                .map(|list| list.leaves().filter_map(|raw| raw.parse().ok()).collect())
                .unwrap_or_default(),
            wealth: node.get_f64("wealth").unwrap_or(0.0),
            prestige: node.get_f64("prestige").unwrap_or(0.0),
            alive: node.get("death_date").is_none(),
            employer: node.get_u32("employer").map(CharacterId),
            job: node
                .get_scalar("job_title")
                .and_then(CouncilJob::from_job_title),
            location: node.get_u32("location").map(SourceRegionId),
        };
        characters.insert(character.id, character);
    }
    characters
}

fn read_titles(root: &Node) -> BTreeMap<TitleId, Title> {
    let mut titles = BTreeMap::new();
    for node in root.children() {
        let Some(rank) = TitleRank::from_title_id(&node.key) else {
            warn!(
                target: "ck2_to_eu3::source_world",
                key = %node.key,
                "title.skipped=unknown_rank"
            );
            continue;
        };
        let liege = match node.get("liege") {
            Some(liege) => liege
                .as_scalar()
                .or_else(|| liege.get_scalar("title"))
                .map(TitleId::new),
            None => None,
        };
        let id = TitleId::new(node.key.clone());
        titles.insert(
            id.clone(),
            Title {
                id,
                rank,
                holder: node.get_u32("holder").map(CharacterId),
                liege,
                name: owned(node.get_scalar("name")),
            },
        );
    }
    titles
}

fn read_provinces(root: &Node) -> BTreeMap<SourceRegionId, SourceProvince> {
    let mut provinces = BTreeMap::new();
    for node in root.children() {
        let Some(id) = parse_id(node, "province") else {
            continue;
        };
        let development = node
            .children()
            .iter()
            .filter(|child| child.key.starts_with("b_"))
            .filter(|holding| holding.get_scalar("type").is_some())
            .count() as u32;
        provinces.insert(
            SourceRegionId(id),
            SourceProvince {
                id: SourceRegionId(id),
                name: node.get_scalar("name").unwrap_or_default().to_string(),
                culture: owned(node.get_scalar("culture")),
                religion: owned(node.get_scalar("religion")),
                county: node.get_scalar("title").map(TitleId::new),
                development,
            },
        );
    }
    provinces
}

fn parse_id(node: &Node, kind: &'static str) -> Option<u32> {
    match node.key.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(
                target: "ck2_to_eu3::source_world",
                kind,
                key = %node.key,
                "record.skipped=non_numeric_id"
            );
            None
        }
    }
}

fn owned(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
