//! Partner configuration store.
//!
//! The gateway only needs four operations, so persistence hides behind a
//! small trait that any relational driver can implement. The in-memory
//! implementation backs the binary (seeded from the config file) and the
//! tests.

use crate::errors::RepositoryError;
use crate::partner::PartnerRecord;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[async_trait]
pub trait PartnerRepository: Send + Sync {
    /// All records that are enabled and in ACTIVE status.
    async fn find_active(&self) -> Result<Vec<PartnerRecord>, RepositoryError>;

    /// A single enabled record, regardless of status.
    async fn find_by_id_and_enabled(
        &self,
        partner_id: &str,
    ) -> Result<Option<PartnerRecord>, RepositoryError>;

    /// Insert-or-replace by `partner_id`; returns the stored record.
    async fn save(&self, record: PartnerRecord) -> Result<PartnerRecord, RepositoryError>;

    async fn set_enabled(&self, partner_id: &str, enabled: bool) -> Result<(), RepositoryError>;
}

/// Keyed by partner id; BTreeMap keeps `find_active` output stable, which
/// makes snapshots reproducible in tests.
pub struct InMemoryPartnerRepository {
    records: RwLock<BTreeMap<String, PartnerRecord>>,
}

impl InMemoryPartnerRepository {
    pub fn new() -> Self {
        InMemoryPartnerRepository {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn seeded(records: impl IntoIterator<Item = PartnerRecord>) -> Self {
        let repository = Self::new();
        {
            let mut map = repository.records.write();
            for record in records {
                map.insert(record.partner_id.clone(), record);
            }
        }
        repository
    }
}

impl Default for InMemoryPartnerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartnerRepository for InMemoryPartnerRepository {
    async fn find_active(&self) -> Result<Vec<PartnerRecord>, RepositoryError> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|record| record.is_active())
            .cloned()
            .collect())
    }

    async fn find_by_id_and_enabled(
        &self,
        partner_id: &str,
    ) -> Result<Option<PartnerRecord>, RepositoryError> {
        let records = self.records.read();
        Ok(records
            .get(partner_id)
            .filter(|record| record.enabled)
            .cloned())
    }

    async fn save(&self, mut record: PartnerRecord) -> Result<PartnerRecord, RepositoryError> {
        let now = Utc::now();
        let mut records = self.records.write();
        record.created_at = records
            .get(&record.partner_id)
            .and_then(|existing| existing.created_at)
            .or(Some(now));
        record.updated_at = Some(now);
        records.insert(record.partner_id.clone(), record.clone());
        Ok(record)
    }

    async fn set_enabled(&self, partner_id: &str, enabled: bool) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        match records.get_mut(partner_id) {
            Some(record) => {
                record.enabled = enabled;
                record.updated_at = Some(Utc::now());
                Ok(())
            }
            None => Err(RepositoryError::NotFound(partner_id.to_string())),
        }
    }
}
