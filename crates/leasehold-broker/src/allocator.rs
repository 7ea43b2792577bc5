//! Resource pool allocation
//!
//! Maps aliases to panel server ids and picks free servers for approval.
//! A process-local reservation registry keeps two concurrent approvals from
//! provisioning the same server; the persisted claim remains the source of
//! truth for exclusivity.

use crate::error::{BrokerError, Result, ValidationError};
use crate::state::{self, DbPool, Resource};
use chrono::Utc;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

type Registry = Arc<Mutex<HashSet<String>>>;

/// Pool lookups and reservations
#[derive(Clone)]
pub struct Allocator {
    db: DbPool,
    reservations: Registry,
}

impl Allocator {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            reservations: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Physical id bound to `alias`
    pub async fn resolve(&self, alias: &str) -> Result<String> {
        state::get_resource_by_alias(&self.db, alias)
            .await?
            .map(|r| r.physical_id)
            .ok_or_else(|| BrokerError::not_found("resource", alias))
    }

    /// Alias bound to `physical_id`, if any
    pub async fn reverse_lookup(&self, physical_id: &str) -> Result<Option<String>> {
        Ok(state::get_resource_by_physical_id(&self.db, physical_id)
            .await?
            .map(|r| r.alias))
    }

    /// First resource by alias that no active lease holds.
    ///
    /// Reads persisted state only; reservations are not consulted.
    pub async fn find_available(&self) -> Result<Option<Resource>> {
        Ok(state::available_resources(&self.db).await?.into_iter().next())
    }

    /// Every resource no active lease holds, by alias
    pub async fn available(&self) -> Result<Vec<Resource>> {
        Ok(state::available_resources(&self.db).await?)
    }

    pub async fn list(&self) -> Result<Vec<Resource>> {
        Ok(state::list_resources(&self.db).await?)
    }

    /// Register a server under `alias`
    pub async fn add(&self, alias: &str, physical_id: &str) -> Result<Resource> {
        let alias = alias.trim();
        let physical_id = physical_id.trim();
        if alias.is_empty() {
            return Err(ValidationError::EmptyAlias.into());
        }
        if physical_id.is_empty() {
            return Err(ValidationError::EmptyPhysicalId.into());
        }

        let now = Utc::now();
        match state::insert_resource(&self.db, alias, physical_id, now).await {
            Ok(()) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(ValidationError::AliasTaken(alias.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(alias, physical_id, "Resource added to pool");
        Ok(Resource {
            alias: alias.to_string(),
            physical_id: physical_id.to_string(),
            created_at: now,
        })
    }

    /// Drop a server from the pool; refused while an active lease holds it
    pub async fn remove(&self, alias: &str) -> Result<()> {
        let resource = state::get_resource_by_alias(&self.db, alias)
            .await?
            .ok_or_else(|| BrokerError::not_found("resource", alias))?;

        if !state::delete_resource(&self.db, alias).await? {
            let lease_id = state::active_lease_for_resource(&self.db, &resource.physical_id)
                .await?
                .unwrap_or_default();
            return Err(ValidationError::ResourceInUse {
                alias: alias.to_string(),
                lease_id,
            }
            .into());
        }

        info!(alias, physical_id = %resource.physical_id, "Resource removed from pool");
        Ok(())
    }

    /// Claim `resource` for this process until the guard drops
    pub fn reserve(&self, resource: &Resource) -> Option<Reservation> {
        let mut held = self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !held.insert(resource.physical_id.clone()) {
            debug!(alias = %resource.alias, "Resource already reserved");
            return None;
        }

        Some(Reservation {
            resource: resource.clone(),
            registry: Arc::clone(&self.reservations),
        })
    }

    /// Reserve the first available resource no one else has reserved
    pub async fn reserve_available(&self) -> Result<Option<Reservation>> {
        for resource in self.available().await? {
            if let Some(reservation) = self.reserve(&resource) {
                return Ok(Some(reservation));
            }
        }
        Ok(None)
    }

    pub fn is_reserved(&self, physical_id: &str) -> bool {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(physical_id)
    }
}

/// Process-local hold on a resource, released on drop
#[derive(Debug)]
pub struct Reservation {
    resource: Resource,
    registry: Registry,
}

impl Reservation {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

impl Deref for Reservation {
    type Target = Resource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.resource.physical_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::open_test_db;

    async fn pool_of(aliases: &[(&str, &str)]) -> Allocator {
        let allocator = Allocator::new(open_test_db().await);
        for (alias, id) in aliases {
            allocator.add(alias, id).await.unwrap();
        }
        allocator
    }

    #[tokio::test]
    async fn test_resolve_and_reverse_lookup() {
        let allocator = pool_of(&[("alpha", "srv-a")]).await;

        assert_eq!(allocator.resolve("alpha").await.unwrap(), "srv-a");
        assert!(allocator.resolve("ghost").await.unwrap_err().is_not_found());
        assert_eq!(
            allocator.reverse_lookup("srv-a").await.unwrap().as_deref(),
            Some("alpha")
        );
        assert_eq!(allocator.reverse_lookup("srv-x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_available_is_deterministic() {
        let allocator = pool_of(&[("bravo", "srv-b"), ("alpha", "srv-a")]).await;

        let first = allocator.find_available().await.unwrap().unwrap();
        let again = allocator.find_available().await.unwrap().unwrap();
        assert_eq!(first.alias, "alpha");
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_find_available_empty_pool() {
        let allocator = pool_of(&[]).await;
        assert!(allocator.find_available().await.unwrap().is_none());
        assert!(allocator.reserve_available().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reservation_released_on_drop() {
        let allocator = pool_of(&[("alpha", "srv-a"), ("bravo", "srv-b")]).await;

        let first = allocator.reserve_available().await.unwrap().unwrap();
        assert_eq!(first.alias, "alpha");
        assert!(allocator.is_reserved("srv-a"));

        // Second caller skips the reserved one
        let second = allocator.reserve_available().await.unwrap().unwrap();
        assert_eq!(second.alias, "bravo");
        assert!(allocator.reserve_available().await.unwrap().is_none());

        drop(first);
        assert!(!allocator.is_reserved("srv-a"));
        let again = allocator.reserve_available().await.unwrap().unwrap();
        assert_eq!(again.alias, "alpha");
    }

    #[tokio::test]
    async fn test_add_validates() {
        let allocator = pool_of(&[("alpha", "srv-a")]).await;

        assert!(matches!(
            allocator.add(" ", "srv-z").await,
            Err(BrokerError::Validation(ValidationError::EmptyAlias))
        ));
        assert!(matches!(
            allocator.add("alpha", "srv-z").await,
            Err(BrokerError::Validation(ValidationError::AliasTaken(_)))
        ));
        assert!(matches!(
            allocator.add("zulu", "srv-a").await,
            Err(BrokerError::Validation(ValidationError::AliasTaken(_)))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let allocator = pool_of(&[("alpha", "srv-a")]).await;

        allocator.remove("alpha").await.unwrap();
        assert!(allocator.list().await.unwrap().is_empty());
        assert!(allocator.remove("alpha").await.unwrap_err().is_not_found());
    }
}
