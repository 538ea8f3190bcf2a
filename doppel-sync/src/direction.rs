// SPDX-License-Identifier: AGPL-3.0-or-later
//! Direction policies
//!
//! A policy maps every difference category to the side that should be
//! written. `Equal`, `Conflict` and `TraversalError` are not configurable;
//! the resolver handles them the same way under every policy.

use doppel_compare::{CompareFilesResult, SyncDirection};
use doppel_core::{DoppelError, DoppelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Categories a policy has to decide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionCategory {
    LeftOnly,
    RightOnly,
    LeftNewer,
    RightNewer,
    Different,
}

impl DirectionCategory {
    pub const ALL: [DirectionCategory; 5] = [
        DirectionCategory::LeftOnly,
        DirectionCategory::RightOnly,
        DirectionCategory::LeftNewer,
        DirectionCategory::RightNewer,
        DirectionCategory::Different,
    ];

    pub fn of(category: CompareFilesResult) -> Option<Self> {
        match category {
            CompareFilesResult::LeftOnly => Some(DirectionCategory::LeftOnly),
            CompareFilesResult::RightOnly => Some(DirectionCategory::RightOnly),
            CompareFilesResult::LeftNewer => Some(DirectionCategory::LeftNewer),
            CompareFilesResult::RightNewer => Some(DirectionCategory::RightNewer),
            CompareFilesResult::Different => Some(DirectionCategory::Different),
            CompareFilesResult::Equal | CompareFilesResult::Conflict | CompareFilesResult::TraversalError => None,
        }
    }
}

impl fmt::Display for DirectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectionCategory::LeftOnly => "left_only",
            DirectionCategory::RightOnly => "right_only",
            DirectionCategory::LeftNewer => "left_newer",
            DirectionCategory::RightNewer => "right_newer",
            DirectionCategory::Different => "different",
        })
    }
}

/// What to do with one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionRule {
    /// Write the left side.
    Left,
    /// Write the right side.
    Right,
    None,
    /// Leave the decision to the user.
    Conflict,
}

impl From<SyncDirection> for DirectionRule {
    fn from(direction: SyncDirection) -> Self {
        match direction {
            SyncDirection::Left => DirectionRule::Left,
            SyncDirection::Right => DirectionRule::Right,
            SyncDirection::None => DirectionRule::None,
        }
    }
}

/// Explicit table for [`DirectionConfig::Custom`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomDirections(pub BTreeMap<DirectionCategory, DirectionRule>);

/// Configured sync variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum DirectionConfig {
    /// Make the right side an exact copy of the left.
    Mirror,
    /// Copy new and newer items to the right; never delete.
    Update,
    /// Propagate whichever side is newer.
    TwoWay,
    Custom { directions: CustomDirections },
}

impl DirectionConfig {
    /// Expand into a full table. Fails if a custom table misses a category.
    pub fn directions(&self) -> DoppelResult<DirectionSet> {
        use DirectionRule::{Conflict, Left, None, Right};
        let table = match self {
            DirectionConfig::Mirror => [Right, Right, Right, Right, Right],
            DirectionConfig::Update => [Right, None, Right, None, Right],
            DirectionConfig::TwoWay => [Right, Left, Right, Left, Conflict],
            DirectionConfig::Custom { directions } => {
                let missing: Vec<String> = DirectionCategory::ALL
                    .iter()
                    .filter(|c| !directions.0.contains_key(*c))
                    .map(|c| c.to_string())
                    .collect();
                if !missing.is_empty() {
                    return Err(DoppelError::Config(format!(
                        "custom directions do not cover: {}",
                        missing.join(", ")
                    )));
                }
                DirectionCategory::ALL.map(|c| directions.0[&c])
            }
        };
        Ok(DirectionSet { table })
    }
}

/// Complete category table, indexed in [`DirectionCategory::ALL`] order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionSet {
    table: [DirectionRule; 5],
}

impl DirectionSet {
    pub fn rule(&self, category: DirectionCategory) -> DirectionRule {
        self.table[category as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        let mirror = DirectionConfig::Mirror.directions().unwrap();
        assert!(DirectionCategory::ALL.iter().all(|&c| mirror.rule(c) == DirectionRule::Right));

        let two_way = DirectionConfig::TwoWay.directions().unwrap();
        assert_eq!(two_way.rule(DirectionCategory::RightOnly), DirectionRule::Left);
        assert_eq!(two_way.rule(DirectionCategory::LeftNewer), DirectionRule::Right);
        assert_eq!(two_way.rule(DirectionCategory::Different), DirectionRule::Conflict);

        let update = DirectionConfig::Update.directions().unwrap();
        assert_eq!(update.rule(DirectionCategory::RightOnly), DirectionRule::None);
    }

    #[test]
    fn test_custom_must_cover_every_category() {
        let mut table = BTreeMap::new();
        table.insert(DirectionCategory::LeftOnly, DirectionRule::Right);
        table.insert(DirectionCategory::RightOnly, DirectionRule::None);
        let partial = DirectionConfig::Custom {
            directions: CustomDirections(table.clone()),
        };
        let err = partial.directions().unwrap_err();
        assert!(matches!(&err, DoppelError::Config(m) if m.contains("left_newer") && m.contains("different")));

        table.insert(DirectionCategory::LeftNewer, DirectionRule::Right);
        table.insert(DirectionCategory::RightNewer, DirectionRule::Left);
        table.insert(DirectionCategory::Different, DirectionRule::Conflict);
        let full = DirectionConfig::Custom {
            directions: CustomDirections(table),
        }
        .directions()
        .unwrap();
        assert_eq!(full.rule(DirectionCategory::RightNewer), DirectionRule::Left);
        assert_eq!(full.rule(DirectionCategory::RightOnly), DirectionRule::None);
    }

    #[test]
    fn test_config_from_toml() {
        let config: DirectionConfig = toml::from_str("variant = \"two_way\"\n").unwrap();
        assert_eq!(config, DirectionConfig::TwoWay);

        let config: DirectionConfig = toml::from_str(
            "variant = \"custom\"\n[directions]\nleft_only = \"right\"\nright_only = \"left\"\nleft_newer = \"right\"\nright_newer = \"none\"\ndifferent = \"conflict\"\n",
        )
        .unwrap();
        let set = config.directions().unwrap();
        assert_eq!(set.rule(DirectionCategory::RightNewer), DirectionRule::None);
    }
}
