//! In-memory cache of decrypted partner configurations.
//!
//! The broadcast path reads from here exclusively; the repository is only
//! touched on cache misses, write-through operations and refreshes, so a
//! slow or failing store never stalls a broadcast. Loading is strict: a
//! miss resolves to a value or not-found, never a stale entry.

use crate::codec::SecretCodec;
use crate::config::CacheConfig;
use crate::errors::RepositoryError;
use crate::partner::{Partner, PartnerRecord};
use crate::repository::PartnerRepository;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct PartnerCache {
    repository: Arc<dyn PartnerRepository>,
    codec: SecretCodec,
    cache: Cache<String, Partner>,
    // Serializes create/update/disable/refresh with respect to one another;
    // readers never take it.
    write_lock: Mutex<()>,
}

impl PartnerCache {
    pub fn new(
        repository: Arc<dyn PartnerRepository>,
        codec: SecretCodec,
        config: &CacheConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        PartnerCache {
            repository,
            codec,
            cache,
            write_lock: Mutex::new(()),
        }
    }

    /// Loads all active partners. Called once at startup and again after
    /// full refreshes; a repository error leaves whatever was previously
    /// cached in place.
    pub async fn preload(&self) {
        match self.repository.find_active().await {
            Ok(records) => {
                let mut loaded = 0usize;
                for record in &records {
                    if let Some(partner) = self.to_partner(record) {
                        self.cache.insert(partner.id.clone(), partner);
                        loaded += 1;
                    }
                }
                tracing::info!(count = loaded, "Preloaded partners into cache");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to preload partner cache, keeping previous entries");
            }
        }
    }

    /// Point-in-time copy of the cached partner set. Order is unspecified
    /// but the returned snapshot never changes under concurrent writes.
    pub fn active_partners(&self) -> Vec<Partner> {
        self.cache.iter().map(|(_, partner)| partner).collect()
    }

    /// Cache-through lookup. Repository errors are logged and surface as
    /// not-found; the broadcast path never sees them.
    pub async fn get(&self, partner_id: &str) -> Option<Partner> {
        if let Some(partner) = self.cache.get(partner_id) {
            tracing::debug!(partner_id = partner_id, "Partner cache hit");
            return Some(partner);
        }

        match self.repository.find_by_id_and_enabled(partner_id).await {
            Ok(Some(record)) => {
                let partner = self.to_partner(&record)?;
                self.cache.insert(partner.id.clone(), partner.clone());
                Some(partner)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(partner_id = partner_id, error = %e, "Partner lookup failed");
                None
            }
        }
    }

    /// Creates a partner, then rebuilds the whole cache so the new entry is
    /// immediately part of the active set.
    pub async fn create(&self, record: PartnerRecord) -> Result<PartnerRecord, RepositoryError> {
        record.validate().map_err(RepositoryError::Invalid)?;
        let _guard = self.write_lock.lock().await;

        tracing::info!(partner_id = %record.partner_id, name = %record.name, "Creating partner");
        let saved = self.repository.save(self.encode_secret(record)).await?;

        self.cache.invalidate_all();
        self.preload().await;
        Ok(saved)
    }

    /// Updates a partner and drops only its cache entry; the next read
    /// loads the fresh record.
    pub async fn update(&self, record: PartnerRecord) -> Result<PartnerRecord, RepositoryError> {
        record.validate().map_err(RepositoryError::Invalid)?;
        let _guard = self.write_lock.lock().await;

        tracing::info!(partner_id = %record.partner_id, "Updating partner");
        let saved = self.repository.save(self.encode_secret(record)).await?;

        self.cache.invalidate(&saved.partner_id);
        Ok(saved)
    }

    /// Disables a partner and drops its cache entry.
    pub async fn disable(&self, partner_id: &str) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;

        tracing::info!(partner_id = partner_id, "Disabling partner");
        self.repository.set_enabled(partner_id, false).await?;

        self.cache.invalidate(partner_id);
        Ok(())
    }

    /// Drops everything and repopulates from the repository's active set.
    pub async fn refresh(&self) {
        let _guard = self.write_lock.lock().await;
        tracing::info!("Refreshing partner cache");
        self.cache.invalidate_all();
        self.preload().await;
    }

    fn encode_secret(&self, mut record: PartnerRecord) -> PartnerRecord {
        record.api_key = record.api_key.map(|key| self.codec.encode(&key));
        record
    }

    /// Record → cached partner, decoding the stored secret. A record whose
    /// secret cannot be decoded is unusable and skipped.
    fn to_partner(&self, record: &PartnerRecord) -> Option<Partner> {
        let api_key = match &record.api_key {
            Some(stored) => match self.codec.decode(stored) {
                Some(plaintext) => Some(plaintext),
                None => {
                    tracing::warn!(
                        partner_id = %record.partner_id,
                        "Stored api_key is not decodable, skipping partner"
                    );
                    return None;
                }
            },
            None => None,
        };
        Some(Partner::from_record(record, api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partner::test_record;
    use crate::repository::InMemoryPartnerRepository;
    use async_trait::async_trait;

    struct FailingRepository;

    #[async_trait]
    impl PartnerRepository for FailingRepository {
        async fn find_active(&self) -> Result<Vec<PartnerRecord>, RepositoryError> {
            Err(RepositoryError::Storage("connection refused".into()))
        }

        async fn find_by_id_and_enabled(
            &self,
            _partner_id: &str,
        ) -> Result<Option<PartnerRecord>, RepositoryError> {
            Err(RepositoryError::Storage("connection refused".into()))
        }

        async fn save(&self, _record: PartnerRecord) -> Result<PartnerRecord, RepositoryError> {
            Err(RepositoryError::Storage("connection refused".into()))
        }

        async fn set_enabled(
            &self,
            _partner_id: &str,
            _enabled: bool,
        ) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("connection refused".into()))
        }
    }

    fn codec() -> SecretCodec {
        SecretCodec::new("cache-test-key")
    }

    fn cache_with(repository: Arc<dyn PartnerRepository>) -> PartnerCache {
        PartnerCache::new(repository, codec(), &CacheConfig::default())
    }

    fn sorted_ids(partners: &[Partner]) -> Vec<String> {
        let mut ids: Vec<_> = partners.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn preload_populates_the_active_set() {
        let repository = Arc::new(InMemoryPartnerRepository::seeded([
            test_record("a", "http://a.example.com"),
            test_record("b", "http://b.example.com"),
        ]));
        let cache = cache_with(repository);
        cache.preload().await;

        assert_eq!(sorted_ids(&cache.active_partners()), ["a", "b"]);
    }

    #[tokio::test]
    async fn preload_failure_keeps_previous_entries() {
        let repository = Arc::new(InMemoryPartnerRepository::seeded([test_record(
            "a",
            "http://a.example.com",
        )]));
        let cache = cache_with(repository);
        cache.preload().await;
        assert_eq!(cache.active_partners().len(), 1);

        let failing = PartnerCache::new(Arc::new(FailingRepository), codec(), &CacheConfig::default());
        failing.preload().await;
        assert!(failing.active_partners().is_empty());
    }

    #[tokio::test]
    async fn get_loads_through_on_miss_and_hits_after() {
        let repository = Arc::new(InMemoryPartnerRepository::seeded([test_record(
            "a",
            "http://a.example.com",
        )]));
        let cache = cache_with(repository);

        // Miss resolves through the repository
        let partner = cache.get("a").await.expect("partner should load");
        assert_eq!(partner.id, "a");

        // Entry is now part of the snapshot
        assert_eq!(cache.active_partners().len(), 1);
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn repository_errors_surface_as_not_found() {
        let cache = PartnerCache::new(Arc::new(FailingRepository), codec(), &CacheConfig::default());
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn create_encodes_the_secret_and_rebuilds_the_cache() {
        let repository = Arc::new(InMemoryPartnerRepository::new());
        let cache = cache_with(repository.clone());
        cache.preload().await;

        let mut record = test_record("a", "http://a.example.com");
        record.authentication_type = "BEARER".to_string();
        record.api_key = Some("plain-token".to_string());
        cache.create(record).await.unwrap();

        // Stored shape is encoded
        let stored = repository
            .find_by_id_and_enabled("a")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.api_key.as_deref(), Some("plain-token"));

        // Cached shape is decrypted
        let partner = cache.get("a").await.unwrap();
        assert_eq!(partner.api_key.as_deref(), Some("plain-token"));
        assert_eq!(cache.active_partners().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_records() {
        let cache = cache_with(Arc::new(InMemoryPartnerRepository::new()));
        let mut record = test_record("a", "http://a.example.com");
        record.base_url = String::new();

        let err = cache.create(record).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Invalid(_)));
        assert!(cache.active_partners().is_empty());
    }

    #[tokio::test]
    async fn update_invalidates_only_that_entry() {
        let repository = Arc::new(InMemoryPartnerRepository::seeded([
            test_record("a", "http://a.example.com"),
            test_record("b", "http://b.example.com"),
        ]));
        let cache = cache_with(repository);
        cache.preload().await;

        cache
            .update(test_record("a", "http://a-v2.example.com"))
            .await
            .unwrap();

        let partner = cache.get("a").await.unwrap();
        assert_eq!(partner.base_url, "http://a-v2.example.com");
        assert_eq!(cache.get("b").await.unwrap().base_url, "http://b.example.com");
    }

    #[tokio::test]
    async fn disable_removes_the_partner_from_the_active_set() {
        let repository = Arc::new(InMemoryPartnerRepository::seeded([
            test_record("a", "http://a.example.com"),
            test_record("b", "http://b.example.com"),
        ]));
        let cache = cache_with(repository);
        cache.preload().await;
        assert_eq!(cache.active_partners().len(), 2);

        cache.disable("a").await.unwrap();
        assert_eq!(sorted_ids(&cache.active_partners()), ["b"]);
        // Strict loading: the disabled record does not resolve
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn refresh_is_idempotent_for_an_unchanged_repository() {
        let repository = Arc::new(InMemoryPartnerRepository::seeded([
            test_record("a", "http://a.example.com"),
            test_record("b", "http://b.example.com"),
        ]));
        let cache = cache_with(repository);
        cache.preload().await;

        cache.refresh().await;
        let first = sorted_ids(&cache.active_partners());
        cache.refresh().await;
        let second = sorted_ids(&cache.active_partners());
        assert_eq!(first, second);
        assert_eq!(first, ["a", "b"]);
    }

    #[tokio::test]
    async fn records_with_undecodable_secrets_are_skipped() {
        let mut record = test_record("a", "http://a.example.com");
        record.api_key = Some("*** not base64 ***".to_string());
        let repository = Arc::new(InMemoryPartnerRepository::seeded([
            record,
            test_record("b", "http://b.example.com"),
        ]));
        let cache = cache_with(repository);
        cache.preload().await;

        assert_eq!(sorted_ids(&cache.active_partners()), ["b"]);
        assert!(cache.get("a").await.is_none());
    }
}
