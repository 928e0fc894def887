//! Provider registry and health router.
//!
//! Owns the live provider set, a TTL cache of health probes, and the
//! routing rule used by the classifier:
//!
//! 1. Enabled providers not in the exclusion set, by priority desc then
//!    success rate desc.
//! 2. The first one whose cached-or-fresh health is `healthy`.
//! 3. Otherwise the first candidate regardless of health.
//! 4. `None` only when every enabled provider is excluded.
//!
//! Probe failures never escape routing; they only change which provider
//! is picked.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::expiring::ExpiringCache;
use crate::core::health::{HealthRecord, HealthStatus};
use crate::core::provider::{
    NewProvider, Provider, ProviderConfig, ProviderType, ProviderUpdate, UsageStats, slugify,
    validate_config,
};
use crate::core::secrets::{ApiKeyRef, fingerprint};
use crate::error::{AicwError, Result};
use crate::providers::ProviderTransport;
use crate::storage::providers::ProviderStore;

/// Health records younger than this are reused.
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(30);

/// Upper bound on a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval of the background health monitor.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Registry tuning.
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub health_ttl: Duration,
    pub probe_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            health_ttl: DEFAULT_HEALTH_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Live provider set shared by classifiers and admin operations.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Provider>>,
    health: ExpiringCache<String, HealthRecord>,
    transport: Arc<dyn ProviderTransport>,
    store: Option<ProviderStore>,
    probe_timeout: Duration,
    dirty: AtomicBool,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.read().len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// Empty, in-memory registry.
    #[must_use]
    pub fn new(transport: Arc<dyn ProviderTransport>, options: RegistryOptions) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            health: ExpiringCache::new(options.health_ttl),
            transport,
            store: None,
            probe_timeout: options.probe_timeout,
            dirty: AtomicBool::new(false),
        }
    }

    /// Registry backed by `store`, loaded immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the store exists but cannot be read.
    pub fn with_store(
        transport: Arc<dyn ProviderTransport>,
        options: RegistryOptions,
        store: ProviderStore,
    ) -> Result<Self> {
        let loaded = store.load()?;
        tracing::debug!(count = loaded.len(), path = %store.path().display(), "loaded providers");
        let mut registry = Self::new(transport, options);
        registry.providers = RwLock::new(loaded.into_iter().map(|p| (p.id.clone(), p)).collect());
        registry.store = Some(store);
        Ok(registry)
    }

    /// Transport used for probes; classifiers reuse it for calls.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn ProviderTransport> {
        Arc::clone(&self.transport)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Provider>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Provider>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Pick the next provider to try. See the module docs for the rule.
    pub async fn select_provider(&self, excluded: &HashSet<String>) -> Option<Provider> {
        let mut candidates: Vec<Provider> = self
            .read()
            .values()
            .filter(|p| p.enabled && !excluded.contains(&p.id))
            .cloned()
            .collect();
        candidates.sort_by(Provider::routing_cmp);

        for candidate in &candidates {
            match self.check_health(&candidate.id).await {
                Ok(record) if record.status.is_healthy() => {
                    tracing::debug!(provider_id = %candidate.id, "selected healthy provider");
                    return Some(candidate.clone());
                }
                Ok(record) => {
                    tracing::debug!(
                        provider_id = %candidate.id,
                        status = %record.status,
                        "skipping unhealthy provider"
                    );
                }
                Err(e) => {
                    tracing::debug!(provider_id = %candidate.id, error = %e, "health check failed");
                }
            }
        }

        let fallback = candidates.into_iter().next();
        if let Some(provider) = &fallback {
            tracing::warn!(
                provider_id = %provider.id,
                "no healthy provider; routing to highest-ranked candidate"
            );
        }
        fallback
    }

    /// Cached health for `id`, probing if the cache entry is missing or stale.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::ProviderNotFound`] for unknown ids. Probe failures
    /// are reported as a `down` record, not an error.
    pub async fn check_health(&self, id: &str) -> Result<HealthRecord> {
        if let Some(cached) = self.health.get(&id.to_string()) {
            return Ok(cached);
        }

        let provider = self
            .get_provider(id)
            .ok_or_else(|| AicwError::ProviderNotFound(id.to_string()))?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, self.transport.probe(&provider)).await;
        let elapsed_ms = elapsed_millis(started);
        let error_rate = provider.usage.error_rate();

        let record = match outcome {
            Ok(Ok(())) => HealthRecord::healthy(id, elapsed_ms, error_rate),
            Ok(Err(e)) => HealthRecord::down(id, elapsed_ms, error_rate, e.to_string()),
            Err(_) => HealthRecord::down(
                id,
                elapsed_ms,
                error_rate,
                format!("probe timed out after {}ms", self.probe_timeout.as_millis()),
            ),
        };

        tracing::info!(
            provider_id = id,
            status = %record.status,
            response_time_ms = record.response_time_ms,
            "provider health probed"
        );
        self.health.insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Cached health record, without probing.
    #[must_use]
    pub fn cached_health(&self, id: &str) -> Option<HealthRecord> {
        self.health.get(&id.to_string())
    }

    /// Seed the health cache, e.g. from an out-of-band check.
    pub fn set_health(&self, record: HealthRecord) {
        self.health.insert(record.provider_id.clone(), record);
    }

    /// Apply one call outcome to `id`'s counters.
    ///
    /// Unknown ids are ignored: the provider may have been removed mid-call.
    pub fn record_usage(&self, id: &str, success: bool, latency_ms: u64, cost: Option<f64>) {
        let mut providers = self.write();
        if let Some(provider) = providers.get_mut(id) {
            provider.usage.record(success, latency_ms, cost, Utc::now());
            self.dirty.store(true, Ordering::Release);
        }
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// All providers by priority desc, success rate desc, name asc.
    #[must_use]
    pub fn list_providers(&self) -> Vec<Provider> {
        let mut all: Vec<Provider> = self.read().values().cloned().collect();
        all.sort_by(Provider::listing_cmp);
        all
    }

    #[must_use]
    pub fn get_provider(&self, id: &str) -> Option<Provider> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Register a provider.
    ///
    /// # Errors
    ///
    /// Returns a validation error, a duplicate-id error, or a storage error.
    pub fn create_provider(&self, new: NewProvider) -> Result<Provider> {
        validate_config(new.provider_type, &new.config)?;

        let now = Utc::now();
        let mut config = new.config;
        config.key_fingerprint = key_fingerprint(&config.api_key, &new.name);

        let created = {
            let mut providers = self.write();
            let id = match new.id {
                Some(id) if providers.contains_key(&id) => {
                    return Err(AicwError::ConfigInvalid {
                        key: "id".to_string(),
                        value: id,
                        message: "a provider with this id already exists".to_string(),
                    });
                }
                Some(id) => id,
                None => unique_id(&providers, &slugify(&new.name)),
            };

            let provider = Provider {
                id: id.clone(),
                name: new.name,
                provider_type: new.provider_type,
                enabled: new.enabled,
                priority: new.priority,
                config,
                rate_limits: new
                    .rate_limits
                    .unwrap_or_else(|| new.provider_type.default_rate_limits()),
                usage: UsageStats::new(),
                created_at: now,
                updated_at: now,
            };
            providers.insert(id, provider.clone());
            provider
        };

        tracing::info!(provider_id = %created.id, provider_type = %created.provider_type, "provider created");
        self.persist()?;
        Ok(created)
    }

    /// Change a provider's settings.
    ///
    /// # Errors
    ///
    /// Returns not-found, a validation error, or a storage error.
    pub fn update_provider(&self, id: &str, update: ProviderUpdate) -> Result<Provider> {
        let updated = {
            let mut providers = self.write();
            let provider = providers
                .get_mut(id)
                .ok_or_else(|| AicwError::ProviderNotFound(id.to_string()))?;

            let mut candidate = provider.clone();
            let key_changed = update.apply(&mut candidate, Utc::now());
            validate_config(candidate.provider_type, &candidate.config)?;
            if key_changed {
                candidate.config.key_fingerprint =
                    key_fingerprint(&candidate.config.api_key, &candidate.id);
            }
            *provider = candidate.clone();
            candidate
        };

        self.health.invalidate(&id.to_string());
        tracing::info!(provider_id = id, enabled = updated.enabled, "provider updated");
        self.persist()?;
        Ok(updated)
    }

    /// Enable or disable a provider.
    ///
    /// # Errors
    ///
    /// Returns not-found or a storage error.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Provider> {
        self.update_provider(
            id,
            ProviderUpdate {
                enabled: Some(enabled),
                ..ProviderUpdate::default()
            },
        )
    }

    /// Remove a provider that has never been used.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::ProviderInUse`] when the provider has usage
    /// history; disable it instead.
    pub fn delete_provider(&self, id: &str) -> Result<()> {
        {
            let mut providers = self.write();
            let provider = providers
                .get(id)
                .ok_or_else(|| AicwError::ProviderNotFound(id.to_string()))?;
            if provider.usage.request_count > 0 {
                return Err(AicwError::ProviderInUse(id.to_string()));
            }
            providers.remove(id);
        }
        self.health.invalidate(&id.to_string());
        tracing::info!(provider_id = id, "provider removed");
        self.persist()
    }

    /// Counters for one provider.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::ProviderNotFound`] for unknown ids.
    pub fn usage_stats(&self, id: &str) -> Result<UsageStats> {
        self.read()
            .get(id)
            .map(|p| p.usage.clone())
            .ok_or_else(|| AicwError::ProviderNotFound(id.to_string()))
    }

    /// Force a fresh probe and count it as a call.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::ProviderNotFound`] for unknown ids.
    pub async fn test_provider(&self, id: &str) -> Result<HealthRecord> {
        self.health.invalidate(&id.to_string());
        let record = self.check_health(id).await?;
        self.record_usage(
            id,
            record.status == HealthStatus::Healthy,
            record.response_time_ms,
            None,
        );
        Ok(record)
    }

    /// Register one provider per vendor key found in the environment.
    ///
    /// Does nothing when providers already exist. Returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persisting fails.
    pub fn initialize_default_providers(&self) -> Result<usize> {
        if !self.is_empty() {
            return Ok(0);
        }

        let defaults = [
            (ProviderType::OpenAi, "OpenAI GPT-4", 10),
            (ProviderType::Anthropic, "Anthropic Claude", 8),
        ];

        let mut added = 0;
        for (provider_type, name, priority) in defaults {
            let var = provider_type.default_key_env();
            if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
                continue;
            }
            self.create_provider(NewProvider {
                id: None,
                name: name.to_string(),
                provider_type,
                enabled: true,
                priority,
                config: ProviderConfig::for_type(provider_type, ApiKeyRef::env(var)),
                rate_limits: None,
            })?;
            added += 1;
        }

        if added == 0 {
            tracing::warn!("no provider API keys found in the environment");
        }
        Ok(added)
    }

    // =========================================================================
    // Persistence and monitoring
    // =========================================================================

    /// Write the current set to the store, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.list_providers();
        self.dirty.store(false, Ordering::Release);
        store.save(&snapshot)
    }

    /// Persist only if usage changed since the last write.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn flush_if_dirty(&self) -> Result<()> {
        if self.dirty.load(Ordering::Acquire) {
            self.persist()
        } else {
            Ok(())
        }
    }

    /// Re-probe every enabled provider on `interval` until `cancel` fires.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("health monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.refresh_all_health().await;
                        if let Err(e) = registry.flush_if_dirty() {
                            tracing::warn!(error = %e, "failed to persist provider usage");
                        }
                    }
                }
            }
        })
    }

    /// Fresh probe of every enabled provider, run concurrently.
    pub async fn refresh_all_health(&self) -> Vec<HealthRecord> {
        let ids: Vec<String> = self
            .read()
            .values()
            .filter(|p| p.enabled)
            .map(|p| p.id.clone())
            .collect();

        let probes = ids.iter().map(|id| async move {
            self.health.invalidate(id);
            (id, self.check_health(id).await)
        });
        futures::future::join_all(probes)
            .await
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(provider_id = %id, error = %e, "provider vanished during refresh");
                    None
                }
            })
            .collect()
    }
}

fn unique_id(existing: &HashMap<String, Provider>, base: &str) -> String {
    if !existing.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !existing.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn key_fingerprint(key: &ApiKeyRef, label: &str) -> Option<String> {
    match key.resolve(label) {
        Ok(secret) => Some(fingerprint(&secret)),
        Err(e) => {
            tracing::warn!(provider = label, error = %e, "API key not resolvable yet");
            None
        }
    }
}

/// Milliseconds since `started`, saturating.
#[must_use]
pub fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeTransport, make_new_provider, make_test_provider};

    fn registry_with(transport: Arc<FakeTransport>, providers: Vec<Provider>) -> ProviderRegistry {
        let registry = ProviderRegistry::new(transport, RegistryOptions::default());
        {
            let mut map = registry.write();
            for provider in providers {
                map.insert(provider.id.clone(), provider);
            }
        }
        registry
    }

    #[tokio::test]
    async fn selects_healthy_provider_over_higher_priority_down_one() {
        let transport = Arc::new(FakeTransport::new());
        let registry = registry_with(
            transport,
            vec![make_test_provider("a", 10), make_test_provider("b", 8)],
        );
        registry.set_health(HealthRecord::down("a", 5, 0.0, "unreachable"));
        registry.set_health(HealthRecord::healthy("b", 5, 0.0));

        let picked = registry.select_provider(&HashSet::new()).await.unwrap();
        assert_eq!(picked.id, "b");
    }

    #[tokio::test]
    async fn equal_rank_providers_are_selected_by_id() {
        let transport = Arc::new(FakeTransport::new());
        let registry = registry_with(
            transport,
            vec![
                make_test_provider("delta", 4),
                make_test_provider("bravo", 4),
                make_test_provider("charlie", 4),
            ],
        );

        let picked = registry.select_provider(&HashSet::new()).await.unwrap();
        assert_eq!(picked.id, "bravo");
        let excluded: HashSet<String> = ["bravo".to_string()].into();
        let picked = registry.select_provider(&excluded).await.unwrap();
        assert_eq!(picked.id, "charlie");
    }

    #[tokio::test]
    async fn falls_back_to_first_candidate_when_none_healthy() {
        let transport = Arc::new(FakeTransport::new());
        let registry = registry_with(
            transport,
            vec![make_test_provider("a", 10), make_test_provider("b", 8)],
        );
        registry.set_health(HealthRecord::down("a", 5, 0.0, "x"));
        registry.set_health(HealthRecord::down("b", 5, 0.0, "y"));

        let picked = registry.select_provider(&HashSet::new()).await.unwrap();
        assert_eq!(picked.id, "a");
    }

    #[tokio::test]
    async fn never_selects_disabled_or_excluded() {
        let transport = Arc::new(FakeTransport::new());
        let mut disabled = make_test_provider("off", 100);
        disabled.enabled = false;
        let registry = registry_with(
            transport,
            vec![disabled, make_test_provider("a", 10), make_test_provider("b", 8)],
        );

        let excluded: HashSet<String> = ["a".to_string()].into();
        let picked = registry.select_provider(&excluded).await.unwrap();
        assert_eq!(picked.id, "b");

        let excluded: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        assert!(registry.select_provider(&excluded).await.is_none());
    }

    #[tokio::test]
    async fn probe_failure_marks_down_and_is_cached() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_probe("a");
        let registry = registry_with(Arc::clone(&transport), vec![make_test_provider("a", 1)]);

        let first = registry.check_health("a").await.unwrap();
        assert_eq!(first.status, HealthStatus::Down);
        assert!(first.error_message.is_some());

        registry.check_health("a").await.unwrap();
        assert_eq!(transport.probe_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_health_is_reprobed() {
        let transport = Arc::new(FakeTransport::new());
        let registry = registry_with(Arc::clone(&transport), vec![make_test_provider("a", 1)]);

        registry.check_health("a").await.unwrap();
        tokio::time::advance(DEFAULT_HEALTH_TTL + Duration::from_secs(1)).await;
        registry.check_health("a").await.unwrap();
        assert_eq!(transport.probe_count("a"), 2);
    }

    #[tokio::test]
    async fn unknown_provider_health_is_not_found() {
        let registry = registry_with(Arc::new(FakeTransport::new()), vec![]);
        let err = registry.check_health("nope").await.unwrap_err();
        assert!(matches!(err, AicwError::ProviderNotFound(_)));
    }

    #[test]
    fn record_usage_updates_counters() {
        let registry = registry_with(Arc::new(FakeTransport::new()), vec![make_test_provider("a", 1)]);
        registry.record_usage("a", true, 100, Some(0.01));
        registry.record_usage("a", false, 300, None);
        registry.record_usage("ghost", true, 1, None);

        let stats = registry.usage_stats("a").unwrap();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.average_latency_ms - 200.0).abs() < 1e-9);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn create_generates_unique_ids() {
        let registry = registry_with(Arc::new(FakeTransport::new()), vec![]);
        let first = registry.create_provider(make_new_provider("OpenAI Main")).unwrap();
        let second = registry.create_provider(make_new_provider("OpenAI Main")).unwrap();
        assert_eq!(first.id, "openai-main");
        assert_eq!(second.id, "openai-main-2");
    }

    #[test]
    fn delete_refuses_used_providers() {
        let registry = registry_with(Arc::new(FakeTransport::new()), vec![]);
        let created = registry.create_provider(make_new_provider("Spare")).unwrap();
        registry.record_usage(&created.id, true, 10, None);

        let err = registry.delete_provider(&created.id).unwrap_err();
        assert!(matches!(err, AicwError::ProviderInUse(_)));

        let disabled = registry.set_enabled(&created.id, false).unwrap();
        assert!(!disabled.enabled);
    }

    #[test]
    fn delete_unused_provider() {
        let registry = registry_with(Arc::new(FakeTransport::new()), vec![]);
        let created = registry.create_provider(make_new_provider("Spare")).unwrap();
        registry.delete_provider(&created.id).unwrap();
        assert!(registry.get_provider(&created.id).is_none());
    }

    #[test]
    fn update_validates_before_applying() {
        let registry = registry_with(Arc::new(FakeTransport::new()), vec![make_test_provider("a", 1)]);
        let err = registry
            .update_provider(
                "a",
                ProviderUpdate {
                    max_tokens: Some(0),
                    ..ProviderUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, AicwError::ConfigInvalid { .. }));
        assert_eq!(registry.get_provider("a").unwrap().config.max_tokens, 1000);
    }

    #[tokio::test]
    async fn test_provider_counts_as_usage() {
        let transport = Arc::new(FakeTransport::new());
        let registry = registry_with(Arc::clone(&transport), vec![make_test_provider("a", 1)]);
        registry.set_health(HealthRecord::down("a", 1, 0.0, "old"));

        let record = registry.test_provider("a").await.unwrap();
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(registry.usage_stats("a").unwrap().request_count, 1);
    }

    #[test]
    fn persists_to_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ProviderStore::new(dir.path().join("providers.json"));
        let registry = ProviderRegistry::with_store(
            Arc::new(FakeTransport::new()),
            RegistryOptions::default(),
            store.clone(),
        )
        .unwrap();
        registry.create_provider(make_new_provider("Stored")).unwrap();
        registry.record_usage("stored", true, 5, None);
        registry.flush_if_dirty().unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].usage.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_monitor_stops_on_cancel() {
        let transport = Arc::new(FakeTransport::new());
        let registry = Arc::new(registry_with(
            Arc::clone(&transport),
            vec![make_test_provider("a", 1)],
        ));
        let cancel = CancellationToken::new();
        let handle = registry.spawn_health_monitor(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(transport.probe_count("a") >= 2);
    }
}
