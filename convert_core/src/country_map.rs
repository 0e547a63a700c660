//! Assignment of CK2 realms to EU3 country tags.
//!
//! Explicit `link` rules are applied first and may target any tag in the
//! universe, blocked or reserved ones included. Every other realm then takes
//! the next free slot, larger realms first. If the free slots cannot hold all
//! remaining realms nothing is committed.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
};

use save_runtime::Node;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    error::MappingFileError,
    ids::{NationTag, TitleId},
    slots::NationSlotArena,
    source_world::PoliticalEntity,
};

/// One `link = { ck2 = .. eu3 = .. }` entry. Several titles in one link
/// collapse into the same country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryRule {
    pub link: usize,
    pub titles: Vec<TitleId>,
    pub tag: NationTag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplicitRules {
    rules: Vec<CountryRule>,
}

impl ExplicitRules {
    pub fn new(rules: Vec<CountryRule>) -> Self {
        Self { rules }
    }

    pub fn from_tree(tree: &Node) -> Result<Self, MappingFileError> {
        let mut rules = Vec::new();
        for (link, node) in tree.get_all("link").enumerate() {
            let titles: Vec<TitleId> = node
                .get_all("ck2")
                .filter_map(Node::as_scalar)
                .map(TitleId::new)
                .collect();
            let mut tags = node.get_all("eu3").filter_map(Node::as_scalar);
            let tag = tags.next().ok_or(MappingFileError::LinkWithoutTag { link })?;
            if tags.next().is_some() {
                return Err(MappingFileError::AmbiguousTag { link });
            }
            if titles.is_empty() {
                warn!(
                    target: "ck2_to_eu3::country_map",
                    link,
                    tag,
                    "country_mapping.link_ignored=no_title"
                );
                continue;
            }
            rules.push(CountryRule {
                link,
                titles,
                tag: NationTag::new(tag),
            });
        }
        Ok(Self { rules })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CountryRule> + '_ {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Tags listed in the blocked-nations file: bare tokens at the top level or
/// inside `blocked = { .. }` blocks.
pub fn read_blocked_nations(tree: &Node) -> Vec<NationTag> {
    let mut tags: Vec<NationTag> = tree.leaves().map(NationTag::new).collect();
    for block in tree.get_all("blocked") {
        tags.extend(block.leaves().map(NationTag::new));
    }
    tags
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryMapping {
    assignments: BTreeMap<TitleId, NationTag>,
}

impl CountryMapping {
    pub fn get(&self, title: &TitleId) -> Option<&NationTag> {
        self.assignments.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TitleId, &NationTag)> + '_ {
        self.assignments.iter()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Realms bound to a tag, in title order.
    pub fn titles_for<'a>(&'a self, tag: &'a NationTag) -> impl Iterator<Item = &'a TitleId> + 'a {
        self.assignments
            .iter()
            .filter(move |(_, assigned)| *assigned == tag)
            .map(|(title, _)| title)
    }

    /// Distinct tags in use, in tag order.
    pub fn tags(&self) -> Vec<&NationTag> {
        let mut tags: Vec<_> = self.assignments.values().collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "too many CK2 nations: {requested} realms need a new EU3 slot but only {available} are free ({overflow} left over)"
)]
pub struct CountryOverflow {
    pub requested: usize,
    pub available: usize,
    pub overflow: usize,
}

/// Bind every realm to a tag. The arena is only updated on success.
pub fn assign(
    entities: &[PoliticalEntity],
    arena: &mut NationSlotArena,
    rules: &ExplicitRules,
) -> Result<CountryMapping, CountryOverflow> {
    let mut working = arena.clone();
    let mut mapping = CountryMapping::default();
    let live: HashMap<&TitleId, &PoliticalEntity> =
        entities.iter().map(|entity| (&entity.id, entity)).collect();

    for rule in rules.iter() {
        if !working.contains(&rule.tag) {
            warn!(
                target: "ck2_to_eu3::country_map",
                link = rule.link,
                tag = %rule.tag,
                "country_mapping.rule_ignored=unknown_tag"
            );
            continue;
        }
        for title in &rule.titles {
            if !live.contains_key(title) {
                debug!(
                    target: "ck2_to_eu3::country_map",
                    link = rule.link,
                    %title,
                    "country_mapping.rule_skipped=not_independent"
                );
                continue;
            }
            if let Some(existing) = mapping.assignments.get(title) {
                warn!(
                    target: "ck2_to_eu3::country_map",
                    link = rule.link,
                    %title,
                    kept = %existing,
                    ignored = %rule.tag,
                    "country_mapping.rule_ignored=duplicate_title"
                );
                continue;
            }
            working.consume(&rule.tag);
            mapping.assignments.insert(title.clone(), rule.tag.clone());
            debug!(
                target: "ck2_to_eu3::country_map",
                %title,
                tag = %rule.tag,
                "country_mapping.explicit"
            );
        }
    }

    let mut remaining: Vec<&PoliticalEntity> = entities
        .iter()
        .filter(|entity| !mapping.assignments.contains_key(&entity.id))
        .collect();
    remaining.sort_by_key(|entity| (Reverse(entity.region_count()), entity.id.clone()));
    remaining.dedup_by(|a, b| a.id == b.id);

    let available = working.available();
    if remaining.len() > available {
        return Err(CountryOverflow {
            requested: remaining.len(),
            available,
            overflow: remaining.len() - available,
        });
    }

    for entity in remaining {
        let Some(tag) = working.allocate() else {
            // available() was checked above; the arena cannot run dry here.
            break;
        };
        mapping.assignments.insert(entity.id.clone(), tag);
    }

    info!(
        target: "ck2_to_eu3::country_map",
        realms = entities.len(),
        assigned = mapping.len(),
        explicit_rules = rules.len(),
        free_slots_left = working.available(),
        "country_mapping.completed"
    );
    *arena = working;
    Ok(mapping)
}
