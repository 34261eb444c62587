/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of versioned asset handled by the asset and collection services.
/// Passed explicitly wherever a handler serves both models and worlds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Model,
    World,
}

impl AssetKind {
    /// Plural path segment, e.g. `models`
    pub fn plural(&self) -> &'static str {
        match self {
            AssetKind::Model => "models",
            AssetKind::World => "worlds",
        }
    }

    /// Path parameter that carries the asset name in the route table
    pub fn name_param(&self) -> &'static str {
        match self {
            AssetKind::Model => "model",
            AssetKind::World => "world",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AssetKind::Model => "Model",
            AssetKind::World => "World",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetKind::Model => "model",
            AssetKind::World => "world",
        })
    }
}

/// Sort direction requested with `?order=`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("invalid order '{}', expected asc or desc", other)),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        })
    }
}

/// Access level checked against the permission collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Read,
    Write,
}
