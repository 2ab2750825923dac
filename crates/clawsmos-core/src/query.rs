//! Filtering and per-ecosystem aggregation over a committed snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CanonicalBounty, Snapshot};

/// Status filter value that disables status matching.
pub const STATUS_ALL: &str = "all";

/// Independently optional filters; all present filters must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BountyFilters {
    pub min_reward: Option<f64>,
    pub max_reward: Option<f64>,
    pub skill: Option<String>,
    pub search: Option<String>,
    pub ecosystem: Option<String>,
    pub status: Option<String>,
}

impl BountyFilters {
    /// Reads a raw reward bound; anything that is not a number means "no bound".
    pub fn parse_reward_bound(raw: Option<&str>) -> Option<f64> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| !v.is_nan())
    }

    fn min(&self) -> f64 {
        self.min_reward.unwrap_or(0.0)
    }

    fn max(&self) -> f64 {
        self.max_reward.unwrap_or(f64::INFINITY)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn matches(bounty: &CanonicalBounty, filters: &BountyFilters, search_lower: Option<&str>) -> bool {
    if bounty.reward < filters.min() || bounty.reward > filters.max() {
        return false;
    }
    if let Some(skill) = non_empty(&filters.skill) {
        if bounty.skill.as_str() != skill {
            return false;
        }
    }
    if let Some(status) = non_empty(&filters.status) {
        if status != STATUS_ALL && bounty.status != status {
            return false;
        }
    }
    if let Some(needle) = search_lower {
        if !bounty.title.to_lowercase().contains(needle)
            && !bounty.description.to_lowercase().contains(needle)
        {
            return false;
        }
    }
    true
}

/// Applies `filters` to every ecosystem in the snapshot.
///
/// Ecosystems rejected by the `ecosystem` filter are dropped from the result;
/// every other ecosystem is present even when none of its bounties pass.
pub fn query(snapshot: &Snapshot, filters: &BountyFilters) -> BTreeMap<String, Vec<CanonicalBounty>> {
    let search_lower = non_empty(&filters.search).map(str::to_lowercase);
    let ecosystem_lower = non_empty(&filters.ecosystem).map(str::to_lowercase);

    snapshot
        .ecosystems
        .iter()
        .filter(|(name, _)| {
            ecosystem_lower
                .as_deref()
                .map_or(true, |wanted| name.to_lowercase() == wanted)
        })
        .map(|(name, bounties)| {
            let kept = bounties
                .iter()
                .filter(|b| matches(b, filters, search_lower.as_deref()))
                .cloned()
                .collect::<Vec<_>>();
            (name.clone(), kept)
        })
        .collect()
}

pub fn total_count(mapping: &BTreeMap<String, Vec<CanonicalBounty>>) -> usize {
    mapping.values().map(Vec::len).sum()
}

/// Summary row for one ecosystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcosystemStats {
    pub name: String,
    pub bounty_count: usize,
    pub total_reward: f64,
    pub avg_reward: f64,
    pub skill_breakdown: BTreeMap<String, usize>,
    pub last_updated: Option<DateTime<Utc>>,
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn stats(snapshot: &Snapshot) -> Vec<EcosystemStats> {
    snapshot
        .ecosystems
        .iter()
        .map(|(name, bounties)| {
            let total: f64 = bounties.iter().map(|b| b.reward).sum();
            let mut skill_breakdown = BTreeMap::<String, usize>::new();
            for bounty in bounties {
                *skill_breakdown
                    .entry(bounty.skill.as_str().to_string())
                    .or_default() += 1;
            }
            let avg_reward = if bounties.is_empty() {
                0.0
            } else {
                round_cents(total / bounties.len() as f64)
            };
            EcosystemStats {
                name: name.clone(),
                bounty_count: bounties.len(),
                total_reward: round_cents(total),
                avg_reward,
                skill_breakdown,
                last_updated: snapshot.last_updated,
            }
        })
        .collect()
}
