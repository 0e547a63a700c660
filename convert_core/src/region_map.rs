//! Province correspondence between the CK2 and EU3 maps.
//!
//! The mapping file is a list of `link = { ck2 = .. eu3 = .. }` groups. Every
//! source id in a group maps to every destination id in the same group. A
//! source id listed in several groups accumulates the union of their
//! destinations, so coverage never depends on group order.

use std::collections::{BTreeMap, BTreeSet};

use save_runtime::Node;
use tracing::warn;

use crate::{
    error::MappingFileError,
    ids::{DestRegionId, SourceRegionId},
};

pub type ForwardMap = BTreeMap<SourceRegionId, BTreeSet<DestRegionId>>;
pub type InverseMap = BTreeMap<DestRegionId, BTreeSet<SourceRegionId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Result of comparing the forward table against the live source provinces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoverageIssue {
    /// Live province absent from the mapping file entirely.
    Missing(SourceRegionId),
    /// Province listed in the mapping file without any EU3 counterpart.
    Unmapped(SourceRegionId),
}

impl CoverageIssue {
    pub fn severity(&self) -> Severity {
        match self {
            CoverageIssue::Missing(_) => Severity::Error,
            CoverageIssue::Unmapped(_) => Severity::Warning,
        }
    }

    pub fn region(&self) -> SourceRegionId {
        match self {
            CoverageIssue::Missing(id) | CoverageIssue::Unmapped(id) => *id,
        }
    }
}

/// Forward and inverse province tables, immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionMapping {
    forward: ForwardMap,
    inverse: InverseMap,
}

impl RegionMapping {
    pub fn from_tree(tree: &Node) -> Result<Self, MappingFileError> {
        Ok(Self::from_forward(build(tree)?))
    }

    pub fn from_forward(forward: ForwardMap) -> Self {
        let inverse = invert(&forward);
        Self { forward, inverse }
    }

    pub fn forward(&self) -> &ForwardMap {
        &self.forward
    }

    pub fn inverse(&self) -> &InverseMap {
        &self.inverse
    }

    /// EU3 provinces fed by a CK2 province; `None` when the province is not in
    /// the mapping file at all.
    pub fn destinations_of(&self, source: SourceRegionId) -> Option<&BTreeSet<DestRegionId>> {
        self.forward.get(&source)
    }

    /// CK2 provinces feeding an EU3 province; empty when nothing maps to it.
    pub fn sources_of(&self, dest: DestRegionId) -> impl Iterator<Item = SourceRegionId> + '_ {
        self.inverse.get(&dest).into_iter().flatten().copied()
    }

    pub fn has_sources(&self, dest: DestRegionId) -> bool {
        self.inverse.get(&dest).is_some_and(|sources| !sources.is_empty())
    }

    pub fn validate_coverage<I>(&self, live: I) -> Vec<CoverageIssue>
    where
        I: IntoIterator<Item = SourceRegionId>,
    {
        validate_coverage(&self.forward, live)
    }
}

pub fn build(tree: &Node) -> Result<ForwardMap, MappingFileError> {
    let mut forward = ForwardMap::new();
    for (index, link) in tree.get_all("link").enumerate() {
        let sources = link
            .get_all("ck2")
            .map(|node| parse_region(node).map(SourceRegionId))
            .collect::<Result<Vec<_>, _>>()?;
        let destinations = link
            .get_all("eu3")
            .map(|node| parse_region(node).map(DestRegionId))
            .collect::<Result<BTreeSet<_>, _>>()?;

        if sources.is_empty() {
            warn!(
                target: "ck2_to_eu3::region_map",
                link = index,
                destinations = destinations.len(),
                "province_mapping.link_ignored=no_source"
            );
            continue;
        }

        for source in sources {
            forward
                .entry(source)
                .or_default()
                .extend(destinations.iter().copied());
        }
    }
    Ok(forward)
}

pub fn invert(forward: &ForwardMap) -> InverseMap {
    let mut inverse = InverseMap::new();
    for (source, destinations) in forward {
        for dest in destinations {
            inverse.entry(*dest).or_default().insert(*source);
        }
    }
    inverse
}

/// Report every live province missing from the forward keys (error) or
/// present with an empty destination set (warning). Output is sorted by region.
pub fn validate_coverage<I>(forward: &ForwardMap, live: I) -> Vec<CoverageIssue>
where
    I: IntoIterator<Item = SourceRegionId>,
{
    let mut issues: Vec<CoverageIssue> = live
        .into_iter()
        .filter_map(|region| match forward.get(&region) {
            None => Some(CoverageIssue::Missing(region)),
            Some(destinations) if destinations.is_empty() => {
                Some(CoverageIssue::Unmapped(region))
            }
            Some(_) => None,
        })
        .collect();
    issues.sort_by_key(|issue| (issue.region(), *issue));
    issues.dedup();
    issues
}

fn parse_region(node: &Node) -> Result<u32, MappingFileError> {
    let raw = node.as_scalar().unwrap_or_default();
    raw.trim()
        .parse()
        .map_err(|_| MappingFileError::InvalidRegionId {
            key: node.key.clone(),
            value: raw.to_string(),
        })
}
