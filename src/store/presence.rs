use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::presence::{DriverPresence, DriverStatus};

/// Ephemeral location store. Every operation is fallible so that an
/// unreachable backend surfaces as `Degraded` and callers can fall back
/// to the durable directory instead of blocking dispatch.
pub trait PresenceStore: Send + Sync {
    /// Sets or refreshes the record and resets its expiry window in one
    /// write. `updated_at` is stamped by the store.
    fn upsert(&self, presence: DriverPresence) -> Result<(), DispatchError>;

    fn get(&self, driver_id: Uuid) -> Result<Option<DriverPresence>, DispatchError>;

    /// Non-expired records with status `available` and no bound ride.
    fn list_available(&self) -> Result<Vec<DriverPresence>, DispatchError>;

    /// Non-expired records currently bound to a ride; the broadcaster's
    /// input set.
    fn list_dispatched(&self) -> Result<Vec<DriverPresence>, DispatchError>;

    /// Atomically rewrites the dispatch sub-state (status + bound ride)
    /// of an existing record. Errors with `NotFound` when the record is
    /// absent or expired.
    fn set_dispatch(
        &self,
        driver_id: Uuid,
        status: DriverStatus,
        current_ride: Option<Uuid>,
    ) -> Result<(), DispatchError>;

    /// Forces immediate expiry; used on an explicit offline toggle.
    fn remove(&self, driver_id: Uuid) -> Result<(), DispatchError>;

    /// Drops expired records, returning how many were removed. Expired
    /// records are already invisible to reads; this reclaims memory.
    fn purge_expired(&self) -> Result<usize, DispatchError>;

    fn live_count(&self) -> Result<usize, DispatchError>;
}

pub struct MemoryPresenceStore {
    records: DashMap<Uuid, DriverPresence>,
    ttl: Duration,
}

impl MemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    fn is_live(&self, presence: &DriverPresence) -> bool {
        let age = Utc::now().signed_duration_since(presence.updated_at);
        age.num_milliseconds() >= 0 && age.num_milliseconds() as u128 <= self.ttl.as_millis()
    }
}

impl PresenceStore for MemoryPresenceStore {
    fn upsert(&self, mut presence: DriverPresence) -> Result<(), DispatchError> {
        presence.updated_at = Utc::now();
        self.records.insert(presence.driver_id, presence);
        Ok(())
    }

    fn get(&self, driver_id: Uuid) -> Result<Option<DriverPresence>, DispatchError> {
        let found = self
            .records
            .get(&driver_id)
            .filter(|entry| self.is_live(entry.value()))
            .map(|entry| entry.value().clone());
        Ok(found)
    }

    fn list_available(&self) -> Result<Vec<DriverPresence>, DispatchError> {
        let available = self
            .records
            .iter()
            .filter(|entry| self.is_live(entry.value()) && entry.value().is_dispatchable())
            .map(|entry| entry.value().clone())
            .collect();
        Ok(available)
    }

    fn list_dispatched(&self) -> Result<Vec<DriverPresence>, DispatchError> {
        let dispatched = self
            .records
            .iter()
            .filter(|entry| self.is_live(entry.value()) && entry.value().current_ride.is_some())
            .map(|entry| entry.value().clone())
            .collect();
        Ok(dispatched)
    }

    fn set_dispatch(
        &self,
        driver_id: Uuid,
        status: DriverStatus,
        current_ride: Option<Uuid>,
    ) -> Result<(), DispatchError> {
        let mut entry = self
            .records
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("no presence for driver {driver_id}")))?;

        if !self.is_live(entry.value()) {
            return Err(DispatchError::NotFound(format!(
                "presence for driver {driver_id} has expired"
            )));
        }

        entry.status = status;
        entry.current_ride = current_ride;
        Ok(())
    }

    fn remove(&self, driver_id: Uuid) -> Result<(), DispatchError> {
        self.records.remove(&driver_id);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, DispatchError> {
        let before = self.records.len();
        self.records.retain(|_, presence| self.is_live(presence));
        Ok(before - self.records.len())
    }

    fn live_count(&self) -> Result<usize, DispatchError> {
        let count = self
            .records
            .iter()
            .filter(|entry| self.is_live(entry.value()))
            .count();
        Ok(count)
    }
}
