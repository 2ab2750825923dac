//! Axum JSON API for Clawsmos.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use clawsmos_core::{query, stats, total_count, BountyFilters, CanonicalBounty, EcosystemStats, STATUS_ALL};
use clawsmos_sync::{build_scheduler, pipeline_from_env, RefreshPipeline, SourceOutcome};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "clawsmos-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RefreshPipeline>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<RefreshPipeline>) -> Self {
        Self::with_start(pipeline, Instant::now())
    }

    /// State whose health uptime counts from `started_at` (normally process start).
    pub fn with_start(pipeline: Arc<RefreshPipeline>, started_at: Instant) -> Self {
        Self {
            pipeline,
            started_at,
        }
    }
}

/// Raw query parameters; numeric bounds are parsed leniently so that a bad
/// value disables the filter instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BountiesQuery {
    min_reward: Option<String>,
    max_reward: Option<String>,
    skill: Option<String>,
    search: Option<String>,
    ecosystem: Option<String>,
    status: Option<String>,
}

impl BountiesQuery {
    fn into_filters(self) -> BountyFilters {
        BountyFilters {
            min_reward: BountyFilters::parse_reward_bound(self.min_reward.as_deref()),
            max_reward: BountyFilters::parse_reward_bound(self.max_reward.as_deref()),
            skill: self.skill,
            search: self.search,
            ecosystem: self.ecosystem,
            status: self.status.or_else(|| Some(STATUS_ALL.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BountiesResponse {
    success: bool,
    bounties: BTreeMap<String, Vec<CanonicalBounty>>,
    count: usize,
    last_updated: Option<DateTime<Utc>>,
    ecosystems: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EcosystemsResponse {
    success: bool,
    ecosystems: Vec<EcosystemStats>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    message: &'static str,
    last_updated: Option<DateTime<Utc>>,
    total_bounties: usize,
    sources: Vec<SourceOutcome>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    success: bool,
    status: &'static str,
    uptime: f64,
    timestamp: DateTime<Utc>,
    last_updated: Option<DateTime<Utc>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/bounties", get(bounties_handler))
        .route("/api/ecosystems", get(ecosystems_handler))
        .route("/api/refresh", get(refresh_handler).post(refresh_handler))
        .route("/api/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(Arc::new(state))
}

/// Builds the pipeline from the environment, kicks off the first refresh,
/// starts the periodic scheduler when enabled and serves until shutdown.
/// Health uptime counts from `started_at`.
pub async fn serve_from_env(started_at: Instant) -> anyhow::Result<()> {
    let port = std::env::var("CLAWSMOS_WEB_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3848);

    let (config, pipeline) = pipeline_from_env().await?;
    let pipeline = Arc::new(pipeline);
    info!(ecosystems = ?pipeline.ecosystems(), "bounty pipeline ready");

    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let summary = pipeline.refresh().await;
            info!(total_bounties = summary.total_bounties, "initial bounty refresh completed");
        });
    }

    let _scheduler = if config.scheduler_enabled {
        let sched = build_scheduler(Arc::clone(&pipeline), &config.refresh_cron).await?;
        sched.start().await.context("starting refresh scheduler")?;
        info!(cron = %config.refresh_cron, "refresh scheduler started");
        Some(sched)
    } else {
        None
    };

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "clawsmos API listening");
    axum::serve(listener, app(AppState::with_start(pipeline, started_at))).await?;
    Ok(())
}

async fn bounties_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BountiesQuery>,
) -> Response {
    let snapshot = state.pipeline.ensure_populated().await;
    let bounties = query(&snapshot, &params.into_filters());
    Json(BountiesResponse {
        success: true,
        count: total_count(&bounties),
        ecosystems: bounties.keys().cloned().collect(),
        last_updated: snapshot.last_updated,
        bounties,
    })
    .into_response()
}

async fn ecosystems_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.pipeline.snapshot();
    Json(EcosystemsResponse {
        success: true,
        ecosystems: stats(&snapshot),
    })
    .into_response()
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    let summary = state.pipeline.refresh().await;
    for failed in summary.failed_sources() {
        warn!(ecosystem = %failed.ecosystem, error = ?failed.error, "source failed during manual refresh");
    }
    Json(RefreshResponse {
        success: true,
        message: "Bounties refreshed successfully",
        last_updated: summary.last_updated(),
        total_bounties: summary.total_bounties,
        sources: summary.sources.clone(),
    })
    .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(HealthResponse {
        success: true,
        status: "healthy",
        uptime: state.started_at.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
        last_updated: state.pipeline.store().last_updated(),
    })
    .into_response()
}

async fn not_found_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "success": false, "error": "Endpoint not found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use clawsmos_adapters::{AdapterContext, AdapterError, SourceAdapter};
    use clawsmos_core::SkillCategory;
    use clawsmos_storage::{HttpClientConfig, HttpFetcher, SnapshotStore};
    use http_body_util::BodyExt;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    struct StaticAdapter {
        name: &'static str,
        rewards: Vec<(f64, SkillCategory)>,
        fail: bool,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn ecosystem(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _http: &HttpFetcher, _ctx: &AdapterContext) -> Result<JsonValue, AdapterError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AdapterError::Payload("upstream down".into()));
            }
            Ok(json!([]))
        }

        fn transform(&self, _payload: &JsonValue) -> Result<Vec<CanonicalBounty>, AdapterError> {
            Ok(self
                .rewards
                .iter()
                .enumerate()
                .map(|(idx, (reward, skill))| CanonicalBounty {
                    id: format!("{}-{idx}", self.name.to_lowercase()),
                    title: format!("{} task {idx}", self.name),
                    description: String::new(),
                    reward: *reward,
                    skill: *skill,
                    claim_url: String::new(),
                    status: "open".into(),
                    ecosystem: self.name.to_string(),
                    created_at: None,
                    tags: vec![],
                })
                .collect())
        }
    }

    fn adapter(name: &'static str, rewards: Vec<(f64, SkillCategory)>, fail: bool) -> Arc<StaticAdapter> {
        Arc::new(StaticAdapter {
            name,
            rewards,
            fail,
            fetches: AtomicUsize::new(0),
        })
    }

    fn test_pipeline() -> (Arc<RefreshPipeline>, Arc<StaticAdapter>) {
        let alpha = adapter(
            "Alpha",
            vec![(10.0, SkillCategory::Coding), (200.0, SkillCategory::Design)],
            false,
        );
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::clone(&alpha) as Arc<dyn SourceAdapter>,
            adapter("Beta", vec![(50.0, SkillCategory::Writing)], false) as Arc<dyn SourceAdapter>,
            adapter("Broken", vec![(99.0, SkillCategory::Other)], true) as Arc<dyn SourceAdapter>,
        ];
        let pipeline = RefreshPipeline::with_adapters(
            adapters,
            HttpFetcher::new(HttpClientConfig::default()).unwrap(),
            Arc::new(SnapshotStore::new()),
            Duration::from_secs(5),
        );
        (Arc::new(pipeline), alpha)
    }

    fn test_app() -> (Router, Arc<StaticAdapter>) {
        let (pipeline, alpha) = test_pipeline();
        (app(AppState::new(pipeline)), alpha)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, JsonValue) {
        let resp = app
            .clone()
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn bounties_lazily_refreshes_and_filters() {
        let (app, alpha) = test_app();
        let (status, body) = get_json(&app, "/api/bounties?minReward=20&maxReward=100").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 1);
        assert_eq!(body["ecosystems"], json!(["Alpha", "Beta", "Broken"]));
        assert_eq!(body["bounties"]["Alpha"], json!([]));
        assert_eq!(body["bounties"]["Beta"][0]["reward"], 50.0);
        assert_eq!(body["bounties"]["Broken"], json!([]));
        assert!(body["lastUpdated"].is_string());

        get_json(&app, "/api/bounties").await;
        assert_eq!(alpha.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_numeric_bounds_and_ecosystem_filter() {
        let (app, _) = test_app();
        let (_, body) = get_json(&app, "/api/bounties?minReward=abc&ecosystem=alpha").await;
        assert_eq!(body["ecosystems"], json!(["Alpha"]));
        assert_eq!(body["count"], 2);

        let (_, body) = get_json(&app, "/api/bounties?skill=design&status=open").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["bounties"]["Alpha"][0]["skill"], "design");
    }

    #[tokio::test]
    async fn ecosystems_report_stats_after_refresh() {
        let (app, _) = test_app();
        let (_, before) = get_json(&app, "/api/ecosystems").await;
        assert_eq!(before["ecosystems"], json!([]));

        let (status, refreshed) = get_json(&app, "/api/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refreshed["success"], true);
        assert_eq!(refreshed["totalBounties"], 3);
        assert!(refreshed["lastUpdated"].is_string());

        let (_, body) = get_json(&app, "/api/ecosystems").await;
        let rows = body["ecosystems"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["name"], "Alpha");
        assert_eq!(rows[0]["bountyCount"], 2);
        assert_eq!(rows[0]["totalReward"], 210.0);
        assert_eq!(rows[0]["avgReward"], 105.0);
        assert_eq!(rows[0]["skillBreakdown"]["coding"], 1);
        assert_eq!(rows[2]["name"], "Broken");
        assert_eq!(rows[2]["bountyCount"], 0);
    }

    #[tokio::test]
    async fn health_reports_uptime_before_any_refresh() {
        let (app, _) = test_app();
        let (status, body) = get_json(&app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
        assert!(body["lastUpdated"].is_null());
    }

    #[tokio::test]
    async fn health_uptime_counts_from_process_start() {
        let (pipeline, _) = test_pipeline();
        let booted = Instant::now().checked_sub(Duration::from_secs(5)).unwrap();
        let app = app(AppState::with_start(pipeline, booted));
        let (_, body) = get_json(&app, "/api/health").await;
        assert!(body["uptime"].as_f64().unwrap() >= 5.0);
    }

    #[tokio::test]
    async fn unknown_routes_return_json_404() {
        let (app, _) = test_app();
        let (status, body) = get_json(&app, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "success": false, "error": "Endpoint not found" }));
    }
}
