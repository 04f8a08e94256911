//! The dashboard service
//!
//! Owns the gateway, the usage log and the cache for the life of the
//! process. Reads are cache-first; a miss fetches synchronously and stores
//! the result. Failed fetches are never cached.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::cache::RefreshingCache;
use crate::error::{Degrade, RemoteError};
use crate::gateway::{self, Area, Entity, HassGateway};
use crate::ranking::{self, RankedEntity, RankingSettings};
use crate::usage::UsageLog;

pub const ENTITIES_KEY: &str = "scripts_and_scenes";
pub const AREAS_KEY: &str = "areas";

/// Bucket for entities without a known area
pub const OTHER_AREA: &str = "other";
const OTHER_AREA_NAME: &str = "Other";

/// Everything the dashboard page shows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    pub most_used: Vec<RankedEntity>,
    /// Areas worth showing, "Other" first, then by name
    pub areas: Vec<Area>,
    pub entities_by_area: BTreeMap<String, Vec<Entity>>,
    pub area_names: BTreeMap<String, String>,
}

/// One area's page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaView {
    pub area_id: String,
    pub name: String,
    pub entities: Vec<Entity>,
}

/// Result of an activation as reported to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationOutcome {
    pub success: bool,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActivationOutcome {
    fn succeeded(entity_id: &str) -> Self {
        Self {
            success: true,
            entity_id: entity_id.to_string(),
            message: None,
        }
    }

    fn failed(entity_id: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            entity_id: entity_id.to_string(),
            message: Some(message.into()),
        }
    }
}

pub struct Dashboard {
    gateway: HassGateway,
    usage: Arc<UsageLog>,
    cache: Arc<RefreshingCache>,
    ranking: RankingSettings,
}

impl Dashboard {
    pub fn new(
        gateway: HassGateway,
        usage: Arc<UsageLog>,
        cache: Arc<RefreshingCache>,
        ranking: RankingSettings,
    ) -> Self {
        Self {
            gateway,
            usage,
            cache,
            ranking,
        }
    }

    pub fn cache(&self) -> &Arc<RefreshingCache> {
        &self.cache
    }

    /// Run a usage log operation on the blocking pool
    async fn with_usage<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&UsageLog) -> Result<T> + Send + 'static,
    {
        let usage = Arc::clone(&self.usage);
        tokio::task::spawn_blocking(move || f(&usage))
            .await
            .context("usage log task failed")?
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => self.cache.set(key, value),
            Err(err) => log::warn!("Not caching {key}: {err}"),
        }
    }

    async fn fetch_entities(&self) -> Result<Vec<Entity>, RemoteError> {
        let entities = self.gateway.list_entities().await?;
        self.store(ENTITIES_KEY, &entities);
        Ok(entities)
    }

    async fn fetch_areas(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        let areas = self.gateway.list_areas().await?;
        self.store(AREAS_KEY, &areas);
        Ok(areas)
    }

    async fn live_entities(&self) -> Result<Vec<Entity>, RemoteError> {
        match self.cache.get_as(ENTITIES_KEY) {
            Some(entities) => Ok(entities),
            None => self.fetch_entities().await,
        }
    }

    /// Scripts and scenes; empty if the hub cannot be reached
    pub async fn entities(&self) -> Vec<Entity> {
        self.live_entities()
            .await
            .or_degrade("loading scripts and scenes", Vec::new())
    }

    /// Area id to name; empty if the hub cannot be reached
    pub async fn areas(&self) -> BTreeMap<String, String> {
        if let Some(areas) = self.cache.get_as(AREAS_KEY) {
            return areas;
        }
        self.fetch_areas()
            .await
            .or_degrade("loading areas", BTreeMap::new())
    }

    async fn compute_most_used(&self, now: NaiveDateTime) -> Result<Vec<RankedEntity>> {
        let cutoff = ranking::cutoff(now, &self.ranking);
        let buckets = self
            .with_usage(move |usage| usage.query_since(cutoff))
            .await?;
        // Without the live list every entry would be dropped; don't cache that
        let live = self
            .live_entities()
            .await
            .context("listing scripts and scenes for ranking")?;

        let ranked = ranking::rank(&buckets, now, &live, &self.ranking);
        self.store(&ranking::cache_key(now), &ranked);
        Ok(ranked)
    }

    /// Ranking for the hour containing `now`
    pub async fn most_used(&self, now: NaiveDateTime) -> Vec<RankedEntity> {
        if let Some(ranked) = self.cache.get_as(&ranking::cache_key(now)) {
            return ranked;
        }
        self.compute_most_used(now).await.unwrap_or_else(|err| {
            log::error!("Failed to rank usage: {err:#}");
            Vec::new()
        })
    }

    pub async fn data(&self, now: NaiveDateTime) -> DashboardData {
        let entities = self.entities().await;
        let area_names = self.areas().await;
        let most_used = self.most_used(now).await;
        let (areas, entities_by_area) = group_by_area(entities, &area_names);

        DashboardData {
            most_used,
            areas,
            entities_by_area,
            area_names,
        }
    }

    /// Entities of one area sorted by name; `other` collects the unassigned
    pub async fn area(&self, area_id: &str) -> AreaView {
        let entities = self.entities().await;
        let area_names = self.areas().await;

        let (name, mut entities): (String, Vec<Entity>) = if area_id == OTHER_AREA {
            let unassigned = entities
                .into_iter()
                .filter(|e| {
                    e.area_id
                        .as_ref()
                        .map_or(true, |id| !area_names.contains_key(id))
                })
                .collect();
            (OTHER_AREA_NAME.to_string(), unassigned)
        } else {
            let name = area_names
                .get(area_id)
                .cloned()
                .unwrap_or_else(|| "Unknown Area".to_string());
            let members = entities
                .into_iter()
                .filter(|e| e.area_id.as_deref() == Some(area_id))
                .collect();
            (name, members)
        };
        sort_by_name(&mut entities);

        AreaView {
            area_id: area_id.to_string(),
            name,
            entities,
        }
    }

    /// Record the activation, then ask the hub to run it.
    ///
    /// A failed usage write is logged and does not stop the activation.
    pub async fn activate(&self, entity_id: &str) -> ActivationOutcome {
        if !gateway::is_dashboard_entity(entity_id) {
            log::warn!("Refusing to activate {entity_id}: not a script or scene");
            return ActivationOutcome::failed(entity_id, "only scripts and scenes can be activated");
        }

        let id = entity_id.to_string();
        if let Err(err) = self.with_usage(move |usage| usage.record(&id)).await {
            log::error!("Failed to record activation of {entity_id}: {err:#}");
        }

        match self.gateway.activate(entity_id).await {
            Ok(_) => ActivationOutcome::succeeded(entity_id),
            Err(err) => {
                log::warn!("Activation of {entity_id} failed: {err}");
                ActivationOutcome::failed(entity_id, err.to_string())
            }
        }
    }

    /// Drop every cached ranking, recompute the current one, and queue
    /// background refreshes of entities and areas
    pub async fn refresh(&self, now: NaiveDateTime) -> Result<Vec<RankedEntity>> {
        let removed = self.cache.invalidate_matching(ranking::CACHE_KEY_PREFIX);
        log::info!("Manual refresh: dropped {removed} cached rankings");

        self.cache.request_refresh(ENTITIES_KEY);
        self.cache.request_refresh(AREAS_KEY);
        self.compute_most_used(now).await
    }

    /// Recompute one cache key. Failures are logged, never returned.
    pub async fn refresh_key(&self, key: &str, now: NaiveDateTime) {
        match key {
            ENTITIES_KEY => {
                if let Err(err) = self.fetch_entities().await {
                    log::warn!("Background refresh of {key} failed: {err}");
                }
            }
            AREAS_KEY => {
                if let Err(err) = self.fetch_areas().await {
                    log::warn!("Background refresh of {key} failed: {err}");
                }
            }
            _ if key.starts_with(ranking::CACHE_KEY_PREFIX) => {
                if key != ranking::cache_key(now) {
                    log::debug!("Skipping refresh of {key}: hour has passed");
                    return;
                }
                if let Err(err) = self.compute_most_used(now).await {
                    log::warn!("Background refresh of {key} failed: {err:#}");
                }
            }
            _ => log::warn!("No refresher for cache key {key}"),
        }
    }

    /// Start the worker that drains the cache's refresh queue.
    ///
    /// Jobs run one at a time; a panicking job is logged and the worker moves
    /// on. The worker ends once the dashboard is dropped.
    pub fn spawn_refresh_worker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut jobs = self.cache.take_refresh_jobs()?;
        let dashboard: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while let Some(key) = jobs.recv().await {
                let Some(dashboard) = dashboard.upgrade() else {
                    break;
                };
                log::debug!("Refreshing cache key {key}");
                let job = tokio::spawn(async move {
                    let now = chrono::Local::now().naive_local();
                    dashboard.refresh_key(&key, now).await;
                });
                if let Err(err) = job.await {
                    log::error!("Cache refresh job failed: {err}");
                }
            }
            log::debug!("Refresh worker stopped");
        }))
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("server", &self.gateway.server_url())
            .field("ranking", &self.ranking)
            .finish_non_exhaustive()
    }
}

fn sort_by_name(entities: &mut [Entity]) {
    entities.sort_by_key(|e| e.name.to_lowercase());
}

/// Group entities by area.
///
/// Every known area gets a (possibly empty) list, plus `other` for entities
/// whose area is missing or unknown. The display list holds "Other" first
/// when it has entities, then non-empty areas by name.
pub fn group_by_area(
    entities: Vec<Entity>,
    area_names: &BTreeMap<String, String>,
) -> (Vec<Area>, BTreeMap<String, Vec<Entity>>) {
    let mut grouped: BTreeMap<String, Vec<Entity>> = area_names
        .keys()
        .map(|id| (id.clone(), Vec::new()))
        .collect();
    grouped.insert(OTHER_AREA.to_string(), Vec::new());

    for entity in entities {
        let key = match entity.area_id.as_deref() {
            Some(id) if area_names.contains_key(id) => id.to_string(),
            _ => OTHER_AREA.to_string(),
        };
        grouped.entry(key).or_default().push(entity);
    }
    for members in grouped.values_mut() {
        sort_by_name(members);
    }

    let mut display = Vec::new();
    if grouped.get(OTHER_AREA).is_some_and(|v| !v.is_empty()) {
        display.push(Area {
            area_id: OTHER_AREA.to_string(),
            name: OTHER_AREA_NAME.to_string(),
        });
    }

    let mut named: Vec<Area> = area_names
        .iter()
        .filter(|(id, _)| grouped.get(*id).is_some_and(|v| !v.is_empty()))
        .map(|(id, name)| Area {
            area_id: id.clone(),
            name: name.clone(),
        })
        .collect();
    named.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.area_id.cmp(&b.area_id)));
    display.extend(named);

    (display, grouped)
}
