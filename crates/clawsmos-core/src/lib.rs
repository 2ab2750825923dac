//! Core domain model for Clawsmos: canonical bounty records and snapshots.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod query;

pub use query::{query, stats, total_count, BountyFilters, EcosystemStats, STATUS_ALL};

pub const CRATE_NAME: &str = "clawsmos-core";

/// Fixed set of skill categories a bounty can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillCategory {
    Coding,
    Writing,
    Design,
    Research,
    Marketing,
    Other,
}

impl SkillCategory {
    pub const ALL: [SkillCategory; 6] = [
        SkillCategory::Coding,
        SkillCategory::Writing,
        SkillCategory::Design,
        SkillCategory::Research,
        SkillCategory::Marketing,
        SkillCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SkillCategory::Coding => "coding",
            SkillCategory::Writing => "writing",
            SkillCategory::Design => "design",
            SkillCategory::Research => "research",
            SkillCategory::Marketing => "marketing",
            SkillCategory::Other => "other",
        }
    }

    /// Case-insensitive lookup of a category name; `None` for anything outside the fixed set.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|skill| skill.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified bounty shape every source is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalBounty {
    /// `<ecosystem slug>-<source local id>`.
    pub id: String,
    pub title: String,
    pub description: String,
    pub reward: f64,
    pub skill: SkillCategory,
    pub claim_url: String,
    pub status: String,
    pub ecosystem: String,
    pub created_at: Option<String>,
    pub tags: Vec<String>,
}

/// Complete, internally consistent view across all sources as of one refresh cycle.
///
/// A snapshot is never mutated after construction; refreshes build a fresh one
/// and swap it in whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub ecosystems: BTreeMap<String, Vec<CanonicalBounty>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// The never-populated snapshot held at process start.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(
        ecosystems: BTreeMap<String, Vec<CanonicalBounty>>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            ecosystems,
            last_updated: Some(last_updated),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.last_updated.is_some()
    }

    pub fn total_count(&self) -> usize {
        total_count(&self.ecosystems)
    }

    pub fn ecosystem_names(&self) -> Vec<String> {
        self.ecosystems.keys().cloned().collect()
    }
}
