use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use ucal_core::errors::{ErrorInfo, UcalError};

/// Semantic grouping dimensions understood by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Noise environment (`last_noise`).
    Noise,
    /// Sample group.
    Groups,
    /// Sample name.
    Samples,
    /// Absorption edge.
    Edges,
    /// Scan type.
    Scantype,
    /// Proposal identifier.
    Proposal,
    /// Run uid.
    Uid,
    /// Start date of the beamtime.
    BeamtimeStart,
}

impl Dimension {
    /// Dimensions used by a full hierarchical breakdown, outermost first.
    pub const HIERARCHY: [Dimension; 4] = [
        Dimension::Noise,
        Dimension::Groups,
        Dimension::Samples,
        Dimension::Edges,
    ];

    /// Parses a dimension from its CLI/config spelling.
    pub fn parse(name: &str) -> Result<Self, UcalError> {
        let dim = match name.trim().to_ascii_lowercase().as_str() {
            "noise" => Dimension::Noise,
            "group" | "groups" => Dimension::Groups,
            "sample" | "samples" => Dimension::Samples,
            "edge" | "edges" => Dimension::Edges,
            "scantype" => Dimension::Scantype,
            "proposal" => Dimension::Proposal,
            "uid" => Dimension::Uid,
            "beamtime_start" | "beamtime" => Dimension::BeamtimeStart,
            other => {
                return Err(UcalError::Config(
                    ErrorInfo::new("keymap.dimension", "unknown catalog dimension")
                        .with_context("dimension", other)
                        .with_hint("expected one of noise, groups, samples, edges, scantype"),
                ))
            }
        };
        Ok(dim)
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Noise => "noise",
            Dimension::Groups => "groups",
            Dimension::Samples => "samples",
            Dimension::Edges => "edges",
            Dimension::Scantype => "scantype",
            Dimension::Proposal => "proposal",
            Dimension::Uid => "uid",
            Dimension::BeamtimeStart => "beamtime_start",
        };
        f.write_str(name)
    }
}

/// Maps grouping dimensions to dotted paths inside a run's start document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMap {
    paths: BTreeMap<Dimension, String>,
}

impl KeyMap {
    /// Key map for catalogs written with the flat metadata layout.
    pub fn current() -> Self {
        Self::from_pairs([
            (Dimension::Samples, "sample_name"),
            (Dimension::Groups, "group_name"),
            (Dimension::Edges, "edge"),
            (Dimension::Noise, "last_noise"),
            (Dimension::Scantype, "scantype"),
            (Dimension::Proposal, "proposal"),
            (Dimension::Uid, "uid"),
            (Dimension::BeamtimeStart, "beamtime_start"),
        ])
    }

    /// Key map for older catalogs that nest sample and group metadata.
    pub fn legacy() -> Self {
        let mut map = Self::current();
        map.set(Dimension::Samples, "sample_args.sample_name.value");
        map.set(Dimension::Groups, "group_md.name");
        map
    }

    /// Resolves a named preset.
    pub fn preset(name: &str) -> Result<Self, UcalError> {
        match name {
            "current" | "default" => Ok(Self::current()),
            "legacy" => Ok(Self::legacy()),
            other => Err(UcalError::Config(
                ErrorInfo::new("keymap.preset", "unknown key map preset")
                    .with_context("preset", other),
            )),
        }
    }

    fn from_pairs<const N: usize>(pairs: [(Dimension, &str); N]) -> Self {
        Self {
            paths: pairs
                .into_iter()
                .map(|(dim, path)| (dim, path.to_string()))
                .collect(),
        }
    }

    /// Overrides the path for one dimension.
    pub fn set(&mut self, dimension: Dimension, path: impl Into<String>) {
        self.paths.insert(dimension, path.into());
    }

    /// Returns a copy with `overrides` applied on top of this map.
    pub fn merged(&self, overrides: &BTreeMap<Dimension, String>) -> Self {
        let mut merged = self.clone();
        for (dim, path) in overrides {
            merged.set(*dim, path.clone());
        }
        merged
    }

    /// Dotted metadata path for a dimension.
    pub fn path(&self, dimension: Dimension) -> Result<&str, UcalError> {
        self.paths.get(&dimension).map(String::as_str).ok_or_else(|| {
            UcalError::Config(
                ErrorInfo::new("keymap.missing", "dimension has no metadata path")
                    .with_context("dimension", dimension.to_string()),
            )
        })
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::current()
    }
}

/// Key map as written in configuration: a preset name or explicit overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyMapSpec {
    /// Named preset (`current`, `legacy`).
    Preset(String),
    /// Explicit dimension paths layered over the current preset.
    Explicit(BTreeMap<Dimension, String>),
}

impl KeyMapSpec {
    /// Resolves the configured form into a concrete key map.
    pub fn resolve(&self) -> Result<KeyMap, UcalError> {
        match self {
            KeyMapSpec::Preset(name) => KeyMap::preset(name),
            KeyMapSpec::Explicit(overrides) => Ok(KeyMap::current().merged(overrides)),
        }
    }
}

impl Default for KeyMapSpec {
    fn default() -> Self {
        KeyMapSpec::Preset("current".to_string())
    }
}
