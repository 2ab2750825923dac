//! Refresh orchestration: concurrent fan-out over enabled sources, per-source
//! failure isolation, and a single atomic snapshot commit per cycle.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clawsmos_adapters::{
    builtin_sources, AdapterContext, AdapterError, EcosystemAdapter, SourceAdapter, SourceDescriptor,
};
use clawsmos_core::{CanonicalBounty, Snapshot};
use clawsmos_storage::{HttpClientConfig, HttpFetcher, SnapshotStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "clawsmos-sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceDescriptor>,
}

impl SourceRegistry {
    pub fn builtin() -> Self {
        Self {
            sources: builtin_sources(),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text).context("parsing source registry")?;
        registry.validate()?;
        Ok(registry)
    }

    /// Reads the registry at `path`, or the built-in one when the file does not exist.
    pub async fn load_or_builtin(path: &Path) -> Result<Self> {
        let exists = fs::try_exists(path)
            .await
            .with_context(|| format!("checking {}", path.display()))?;
        if !exists {
            info!(path = %path.display(), "no source registry file; using built-in sources");
            return Ok(Self::builtin());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(|s| s.enabled)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() || source.slug.trim().is_empty() {
                bail!("source entries need a non-empty name and slug");
            }
            if !seen.insert(source.name.as_str()) {
                bail!("duplicate source name `{}`", source.name);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sources_path: PathBuf,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub refresh_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sources_path: PathBuf::from("./sources.yaml"),
            fetch_timeout: Duration::from_secs(10),
            user_agent: "clawsmos-bot/0.1".to_string(),
            scheduler_enabled: true,
            refresh_cron: "0 */15 * * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sources_path: std::env::var("CLAWSMOS_SOURCES")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_path),
            fetch_timeout: std::env::var("CLAWSMOS_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            user_agent: std::env::var("CLAWSMOS_USER_AGENT").unwrap_or(defaults.user_agent),
            scheduler_enabled: std::env::var("CLAWSMOS_SCHEDULER_ENABLED")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "False"))
                .unwrap_or(defaults.scheduler_enabled),
            refresh_cron: std::env::var("CLAWSMOS_REFRESH_CRON").unwrap_or(defaults.refresh_cron),
        }
    }
}

/// What happened to one source during a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub ecosystem: String,
    pub bounty_count: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub total_bounties: usize,
    /// The snapshot this cycle committed.
    #[serde(skip)]
    pub snapshot: Arc<Snapshot>,
}

impl RefreshSummary {
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.snapshot.last_updated
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.error.is_some())
    }
}

pub struct RefreshPipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    http: HttpFetcher,
    store: Arc<SnapshotStore>,
    fetch_timeout: Duration,
    /// Serializes cycles and remembers the last one so waiting callers can join it.
    cycle: Mutex<Option<Arc<RefreshSummary>>>,
    completed_cycles: AtomicU64,
}

impl RefreshPipeline {
    pub fn new(config: &SyncConfig, registry: &SourceRegistry) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig::within_budget(
            config.fetch_timeout,
            Some(config.user_agent.clone()),
        ))?;
        let adapters = registry
            .enabled()
            .cloned()
            .map(|descriptor| Arc::new(EcosystemAdapter::new(descriptor)) as Arc<dyn SourceAdapter>)
            .collect();
        Ok(Self::with_adapters(
            adapters,
            http,
            Arc::new(SnapshotStore::new()),
            config.fetch_timeout,
        ))
    }

    pub fn with_adapters(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        http: HttpFetcher,
        store: Arc<SnapshotStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            http,
            store,
            fetch_timeout,
            cycle: Mutex::new(None),
            completed_cycles: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.read()
    }

    pub fn ecosystems(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.ecosystem().to_string()).collect()
    }

    /// Runs one refresh cycle, or joins the one already in flight.
    pub async fn refresh(&self) -> Arc<RefreshSummary> {
        let observed = self.completed_cycles.load(Ordering::Acquire);
        let mut last = self.cycle.lock().await;
        if self.completed_cycles.load(Ordering::Acquire) != observed {
            if let Some(summary) = last.as_ref() {
                return Arc::clone(summary);
            }
        }

        let summary = Arc::new(self.run_cycle().await);
        *last = Some(Arc::clone(&summary));
        self.completed_cycles.fetch_add(1, Ordering::Release);
        summary
    }

    /// Current snapshot, refreshing first if nothing has ever been committed.
    pub async fn ensure_populated(&self) -> Arc<Snapshot> {
        let current = self.store.read();
        if current.is_populated() {
            return current;
        }
        Arc::clone(&self.refresh().await.snapshot)
    }

    async fn run_cycle(&self) -> RefreshSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ctx = AdapterContext {
            run_id,
            fetched_at: started_at,
        };
        let span = info_span!("refresh_cycle", %run_id);

        async {
            info!(sources = self.adapters.len(), "refreshing bounties from all ecosystems");
            let results = join_all(self.adapters.iter().map(|adapter| {
                let span = info_span!("source_refresh", ecosystem = adapter.ecosystem());
                self.refresh_source(adapter.as_ref(), &ctx).instrument(span)
            }))
            .await;

            let mut ecosystems = BTreeMap::new();
            let mut sources = Vec::with_capacity(results.len());
            for (bounties, outcome) in results {
                ecosystems.insert(outcome.ecosystem.clone(), bounties);
                sources.push(outcome);
            }

            let finished_at = Utc::now();
            let snapshot = self.store.replace(Snapshot::new(ecosystems, finished_at));
            let total_bounties = snapshot.total_count();
            info!(
                total_bounties,
                ecosystems = snapshot.ecosystems.len(),
                failed = sources.iter().filter(|s| s.error.is_some()).count(),
                "bounties refreshed"
            );

            RefreshSummary {
                run_id,
                started_at,
                finished_at,
                sources,
                total_bounties,
                snapshot,
            }
        }
        .instrument(span)
        .await
    }

    async fn refresh_source(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &AdapterContext,
    ) -> (Vec<CanonicalBounty>, SourceOutcome) {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.fetch_timeout, adapter.fetch(&self.http, ctx)).await {
            Ok(Ok(payload)) => adapter.transform(&payload),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AdapterError::Timeout(self.fetch_timeout)),
        };

        let (bounties, error) = match result {
            Ok(bounties) => {
                info!(count = bounties.len(), "source refreshed");
                (bounties, None)
            }
            Err(err) => {
                warn!(error = %err, "source refresh failed");
                (Vec::new(), Some(err.to_string()))
            }
        };

        let outcome = SourceOutcome {
            ecosystem: adapter.ecosystem().to_string(),
            bounty_count: bounties.len(),
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        (bounties, outcome)
    }
}

/// Builds (but does not start) a scheduler that refreshes on `cron`.
pub async fn build_scheduler(pipeline: Arc<RefreshPipeline>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            info!("scheduled bounty refresh starting");
            let summary = pipeline.refresh().await;
            info!(
                run_id = %summary.run_id,
                total_bounties = summary.total_bounties,
                "scheduled bounty refresh completed"
            );
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn pipeline_from_env() -> Result<(SyncConfig, RefreshPipeline)> {
    let config = SyncConfig::from_env();
    let registry = SourceRegistry::load_or_builtin(&config.sources_path).await?;
    let pipeline = RefreshPipeline::new(&config, &registry)?;
    Ok((config, pipeline))
}

pub async fn run_refresh_once_from_env() -> Result<Arc<RefreshSummary>> {
    let (_config, pipeline) = pipeline_from_env().await?;
    Ok(pipeline.refresh().await)
}
