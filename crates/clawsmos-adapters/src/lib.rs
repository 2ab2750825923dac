//! Source adapter contract + the closed set of ecosystem adapters.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clawsmos_core::{CanonicalBounty, SkillCategory};
use clawsmos_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

pub mod text;

pub use text::{classify, extract_reward, truncate_text, DESCRIPTION_LIMIT};

pub const CRATE_NAME: &str = "clawsmos-adapters";

/// Which payload dialect a source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterKind {
    #[serde(rename = "owockibot")]
    Owockibot,
    #[serde(rename = "clawtasks")]
    ClawTasks,
    #[serde(rename = "clawhunt")]
    ClawHunt,
    #[serde(rename = "4claw")]
    FourClaw,
    #[serde(rename = "mock-demo")]
    MockDemo,
}

/// Configuration of one ecosystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Human-readable ecosystem name; also the snapshot key.
    pub name: String,
    /// Prefix for canonical ids.
    pub slug: String,
    pub kind: AdapterKind,
    #[serde(default)]
    pub url: Option<String>,
    pub claim_url_base: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fetch timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("no endpoint configured for {0}")]
    MissingEndpoint(String),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// One external source: network fetch plus a pure, defensive transform.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn ecosystem(&self) -> &str;

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<JsonValue, AdapterError>;

    fn transform(&self, payload: &JsonValue) -> Result<Vec<CanonicalBounty>, AdapterError>;
}

#[derive(Debug, Clone, Copy)]
enum ClaimTemplate {
    /// `<base>#<id>`
    Fragment,
    /// `<base>/bounties/<id>`
    BountyPath,
    /// `<base>/boards/job/<id>`
    JobBoardPath,
    /// `<base>` as-is
    Base,
}

impl ClaimTemplate {
    fn render(self, base: &str, id: &str) -> String {
        match self {
            ClaimTemplate::Fragment => format!("{base}#{id}"),
            ClaimTemplate::BountyPath => format!("{base}/bounties/{id}"),
            ClaimTemplate::JobBoardPath => format!("{base}/boards/job/{id}"),
            ClaimTemplate::Base => base.to_string(),
        }
    }
}

/// Where each canonical field lives in a source's raw records.
#[derive(Debug, Clone, Copy)]
struct PayloadLayout {
    /// Accept `{"bounties": [...]}` as well as a bare array.
    accepts_wrapper: bool,
    /// Tried in order; the first present, non-zero value wins.
    reward_fields: &'static [&'static str],
    reward_from_text: bool,
    skill_field: Option<&'static str>,
    description_field: &'static str,
    created_at_fields: &'static [&'static str],
    /// `None` means the source has no status and every record is open.
    status_field: Option<&'static str>,
    claim: ClaimTemplate,
}

impl AdapterKind {
    fn layout(self) -> PayloadLayout {
        match self {
            AdapterKind::Owockibot => PayloadLayout {
                accepts_wrapper: false,
                reward_fields: &["reward_usdc"],
                reward_from_text: false,
                skill_field: None,
                description_field: "description",
                created_at_fields: &["created_at"],
                status_field: Some("status"),
                claim: ClaimTemplate::Fragment,
            },
            AdapterKind::ClawTasks => PayloadLayout {
                accepts_wrapper: true,
                reward_fields: &["amount"],
                reward_from_text: false,
                skill_field: None,
                description_field: "description",
                created_at_fields: &["created_at"],
                status_field: Some("status"),
                claim: ClaimTemplate::BountyPath,
            },
            AdapterKind::ClawHunt => PayloadLayout {
                accepts_wrapper: true,
                reward_fields: &["reward", "amount"],
                reward_from_text: false,
                skill_field: Some("skill"),
                description_field: "description",
                created_at_fields: &["created_at", "createdAt"],
                status_field: Some("status"),
                claim: ClaimTemplate::BountyPath,
            },
            AdapterKind::FourClaw => PayloadLayout {
                accepts_wrapper: false,
                reward_fields: &[],
                reward_from_text: true,
                skill_field: None,
                description_field: "content",
                created_at_fields: &["created_at"],
                status_field: None,
                claim: ClaimTemplate::JobBoardPath,
            },
            AdapterKind::MockDemo => PayloadLayout {
                accepts_wrapper: false,
                reward_fields: &["reward"],
                reward_from_text: false,
                skill_field: Some("skill"),
                description_field: "description",
                created_at_fields: &["created_at"],
                status_field: Some("status"),
                claim: ClaimTemplate::Base,
            },
        }
    }
}

fn json_text(record: &JsonValue, key: &str) -> Option<String> {
    match record.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(number_text(n)),
        _ => None,
    }
}

/// Integral floats print without a fractional part (`1.0` reads as `1`).
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

/// Whether a reward field holds something worth reading. Absent, null,
/// zero, empty and `false` values fall through to the next field.
fn reward_present(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn reward_value(value: &JsonValue) -> f64 {
    match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => text::parse_leading_number(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Reads the first present reward field; an unreadable value counts as 0
/// rather than falling back to a later field.
fn json_reward(record: &JsonValue, fields: &[&str]) -> f64 {
    fields
        .iter()
        .filter_map(|field| record.get(*field))
        .find(|value| reward_present(value))
        .map(reward_value)
        .unwrap_or(0.0)
}

fn json_string_vec(record: &JsonValue, key: &str) -> Vec<String> {
    record
        .get(key)
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Adapter for one configured ecosystem, dispatching on its [`AdapterKind`].
#[derive(Debug, Clone)]
pub struct EcosystemAdapter {
    descriptor: SourceDescriptor,
}

impl EcosystemAdapter {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn records<'a>(&self, layout: &PayloadLayout, payload: &'a JsonValue) -> Result<&'a [JsonValue], AdapterError> {
        if let Some(arr) = payload.as_array() {
            return Ok(arr);
        }
        if layout.accepts_wrapper {
            if let Some(inner) = payload.get("bounties") {
                return inner.as_array().map(Vec::as_slice).ok_or_else(|| {
                    AdapterError::Payload(format!(
                        "{}: `bounties` is not an array",
                        self.descriptor.name
                    ))
                });
            }
        }
        Err(AdapterError::Payload(format!(
            "{}: expected a JSON array of bounties",
            self.descriptor.name
        )))
    }

    fn normalize(&self, layout: &PayloadLayout, record: &JsonValue) -> CanonicalBounty {
        let local_id = json_text(record, "id").unwrap_or_else(|| "unknown".to_string());
        let title = json_text(record, "title").unwrap_or_default();
        let raw_description = json_text(record, layout.description_field).unwrap_or_default();
        let free_text = format!("{title} {raw_description}");

        let reward = if layout.reward_from_text {
            extract_reward(&free_text)
        } else {
            json_reward(record, layout.reward_fields)
        };

        let skill = layout
            .skill_field
            .and_then(|field| json_text(record, field))
            .and_then(|s| SkillCategory::parse(&s))
            .unwrap_or_else(|| classify(&free_text));

        let status = layout
            .status_field
            .and_then(|field| json_text(record, field))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "open".to_string());

        let created_at = layout
            .created_at_fields
            .iter()
            .find_map(|field| json_text(record, field));

        CanonicalBounty {
            id: format!("{}-{local_id}", self.descriptor.slug),
            title,
            description: truncate_text(&raw_description, DESCRIPTION_LIMIT),
            reward: non_negative(reward),
            skill,
            claim_url: layout.claim.render(&self.descriptor.claim_url_base, &local_id),
            status,
            ecosystem: self.descriptor.name.clone(),
            created_at,
            tags: json_string_vec(record, "tags"),
        }
    }
}

#[async_trait]
impl SourceAdapter for EcosystemAdapter {
    fn ecosystem(&self) -> &str {
        &self.descriptor.name
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<JsonValue, AdapterError> {
        if self.descriptor.kind == AdapterKind::MockDemo {
            return Ok(demo_payload(ctx.fetched_at));
        }
        let url = self
            .descriptor
            .url
            .as_deref()
            .ok_or_else(|| AdapterError::MissingEndpoint(self.descriptor.name.clone()))?;
        Ok(http
            .fetch_json(ctx.run_id, &self.descriptor.name, url, &self.descriptor.headers)
            .await?)
    }

    fn transform(&self, payload: &JsonValue) -> Result<Vec<CanonicalBounty>, AdapterError> {
        let layout = self.descriptor.kind.layout();
        Ok(self
            .records(&layout, payload)?
            .iter()
            .filter(|record| record.is_object())
            .map(|record| self.normalize(&layout, record))
            .collect())
    }
}

/// Fixed demonstration listings served when no live source is reachable.
pub fn demo_payload(created_at: DateTime<Utc>) -> JsonValue {
    let created_at = created_at.to_rfc3339();
    json!([
        {
            "id": 1,
            "title": "Build Twitter Bot for NFT Monitoring",
            "description": "Create a bot that monitors NFT collections on Twitter and posts updates to Discord. Should track floor prices, new listings, and major sales.",
            "reward": 75,
            "skill": "coding",
            "status": "open",
            "created_at": created_at,
            "tags": ["twitter", "nft", "discord", "monitoring"]
        },
        {
            "id": 2,
            "title": "Write Agent Economics Research Report",
            "description": "Research and write a comprehensive report on the emerging agent economy, covering current platforms, token economics, and future trends.",
            "reward": 150,
            "skill": "writing",
            "status": "open",
            "created_at": created_at,
            "tags": ["research", "economics", "agents", "report"]
        },
        {
            "id": 3,
            "title": "Design Logo for Agent Platform",
            "description": "Create a modern, professional logo for a new agent marketplace. Should work in both light and dark themes.",
            "reward": 50,
            "skill": "design",
            "status": "open",
            "created_at": created_at,
            "tags": ["logo", "branding", "design", "agents"]
        },
        {
            "id": 4,
            "title": "Integrate Stripe Payment Processing",
            "description": "Add Stripe integration to existing bounty platform for escrow payments. Include webhook handling for payment completion.",
            "reward": 200,
            "skill": "coding",
            "status": "open",
            "created_at": created_at,
            "tags": ["stripe", "payments", "integration", "escrow"]
        }
    ])
}

/// Built-in ecosystem registry, used when no registry file is present.
pub fn builtin_sources() -> Vec<SourceDescriptor> {
    let source = |name: &str, slug: &str, kind, url: Option<&str>, claim: &str, enabled| SourceDescriptor {
        name: name.to_string(),
        slug: slug.to_string(),
        kind,
        url: url.map(ToString::to_string),
        claim_url_base: claim.to_string(),
        enabled,
        headers: BTreeMap::new(),
    };
    vec![
        source(
            "Owockibot",
            "owockibot",
            AdapterKind::Owockibot,
            Some("https://www.owockibot.xyz/api/bounty-board"),
            "https://www.owockibot.xyz/bounty",
            true,
        ),
        source(
            "ClawTasks",
            "clawtasks",
            AdapterKind::ClawTasks,
            Some("https://clawtasks.com/api/bounties"),
            "https://clawtasks.com",
            true,
        ),
        source(
            "ClawHunt",
            "clawhunt",
            AdapterKind::ClawHunt,
            Some("https://clawhunt.sh/api/bounties"),
            "https://clawhunt.sh",
            true,
        ),
        source("4Claw", "4claw", AdapterKind::FourClaw, None, "https://4claw.org", false),
        source("Mock Demo Data", "demo", AdapterKind::MockDemo, None, "#demo", false),
    ]
}
