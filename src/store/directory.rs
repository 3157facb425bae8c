use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::{GeoPoint, haversine_km};

/// Durable driver registration plus rolling dispatch statistics. Doubles
/// as the coarse geospatial index the matching engine falls back to when
/// the ephemeral store is empty or unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub driver_id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub rating: Option<f64>,
    pub rating_count: u32,
    pub online: bool,
    pub completed: u32,
    pub cancelled: u32,
    pub offered: u32,
    pub accepted: u32,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DriverStats {
    pub rating: Option<f64>,
    pub completed: u32,
    pub cancelled: u32,
    pub offered: u32,
    pub accepted: u32,
}

#[derive(Default)]
pub struct DriverDirectory {
    drivers: DashMap<Uuid, DirectoryEntry>,
}

impl DriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: String,
        location: GeoPoint,
        rating: Option<f64>,
    ) -> DirectoryEntry {
        let entry = DirectoryEntry {
            driver_id: Uuid::new_v4(),
            name,
            location,
            rating: rating.map(|r| r.clamp(0.0, 5.0)),
            rating_count: if rating.is_some() { 1 } else { 0 },
            online: true,
            completed: 0,
            cancelled: 0,
            offered: 0,
            accepted: 0,
            registered_at: Utc::now(),
        };
        self.drivers.insert(entry.driver_id, entry.clone());
        entry
    }

    pub fn get(&self, driver_id: Uuid) -> Option<DirectoryEntry> {
        self.drivers.get(&driver_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, driver_id: Uuid) -> bool {
        self.drivers.contains_key(&driver_id)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Online drivers within `radius_km` of `point`, by last-known coarse
    /// location. Read-only; freshness is whatever the last position push
    /// left behind.
    pub fn find_nearby(&self, point: &GeoPoint, radius_km: f64) -> Vec<DirectoryEntry> {
        self.drivers
            .iter()
            .filter(|entry| {
                entry.value().online
                    && haversine_km(&entry.value().location, point) <= radius_km
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn set_online(&self, driver_id: Uuid, online: bool) -> Result<(), DispatchError> {
        let mut entry = self.entry_mut(driver_id)?;
        entry.online = online;
        Ok(())
    }

    pub fn update_location(&self, driver_id: Uuid, location: GeoPoint) -> Result<(), DispatchError> {
        let mut entry = self.entry_mut(driver_id)?;
        entry.location = location;
        Ok(())
    }

    pub fn record_offer(&self, driver_id: Uuid) {
        if let Some(mut entry) = self.drivers.get_mut(&driver_id) {
            entry.offered = entry.offered.saturating_add(1);
        }
    }

    pub fn record_decision(&self, driver_id: Uuid, accepted: bool) {
        if let Some(mut entry) = self.drivers.get_mut(&driver_id) {
            if accepted {
                entry.accepted = entry.accepted.saturating_add(1);
            }
        }
    }

    pub fn record_completion(&self, driver_id: Uuid) {
        if let Some(mut entry) = self.drivers.get_mut(&driver_id) {
            entry.completed = entry.completed.saturating_add(1);
        }
    }

    pub fn record_cancellation(&self, driver_id: Uuid) {
        if let Some(mut entry) = self.drivers.get_mut(&driver_id) {
            entry.cancelled = entry.cancelled.saturating_add(1);
        }
    }

    /// Incremental rating average over all rated rides.
    pub fn record_rating(&self, driver_id: Uuid, rating: u8) -> Result<(), DispatchError> {
        let mut entry = self.entry_mut(driver_id)?;
        let count = entry.rating_count as f64;
        let current = entry.rating.unwrap_or(0.0);
        entry.rating = Some((current * count + rating as f64) / (count + 1.0));
        entry.rating_count += 1;
        Ok(())
    }

    pub fn stats(&self, driver_id: Uuid) -> Option<DriverStats> {
        self.drivers.get(&driver_id).map(|entry| DriverStats {
            rating: entry.rating,
            completed: entry.completed,
            cancelled: entry.cancelled,
            offered: entry.offered,
            accepted: entry.accepted,
        })
    }

    fn entry_mut(
        &self,
        driver_id: Uuid,
    ) -> Result<dashmap::mapref::one::RefMut<'_, Uuid, DirectoryEntry>, DispatchError> {
        self.drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::DriverDirectory;
    use crate::geo::GeoPoint;

    const KINSHASA: GeoPoint = GeoPoint {
        lat: -4.3250,
        lng: 15.3222,
    };

    #[test]
    fn find_nearby_filters_by_radius_and_online_flag() {
        let directory = DriverDirectory::new();

        let near = directory.register("near".to_string(), KINSHASA, Some(4.5));
        // roughly 0.011 deg latitude per km; 0.3 deg is well past 5 km
        let far_point = GeoPoint {
            lat: KINSHASA.lat + 0.3,
            lng: KINSHASA.lng,
        };
        directory.register("far".to_string(), far_point, Some(4.0));
        let offline = directory.register("offline".to_string(), KINSHASA, None);
        directory.set_online(offline.driver_id, false).unwrap();

        let nearby = directory.find_nearby(&KINSHASA, 5.0);
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].driver_id, near.driver_id);
    }

    #[test]
    fn rating_average_is_incremental() {
        let directory = DriverDirectory::new();
        let entry = directory.register("rated".to_string(), KINSHASA, None);

        directory.record_rating(entry.driver_id, 5).unwrap();
        directory.record_rating(entry.driver_id, 3).unwrap();

        let stats = directory.stats(entry.driver_id).unwrap();
        assert!((stats.rating.unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn decision_counters_track_offers_and_accepts() {
        let directory = DriverDirectory::new();
        let entry = directory.register("busy".to_string(), KINSHASA, None);

        directory.record_offer(entry.driver_id);
        directory.record_offer(entry.driver_id);
        directory.record_decision(entry.driver_id, true);
        directory.record_completion(entry.driver_id);
        directory.record_cancellation(entry.driver_id);

        let stats = directory.stats(entry.driver_id).unwrap();
        assert_eq!(stats.offered, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
    }

    #[test]
    fn unknown_driver_rating_errors() {
        let directory = DriverDirectory::new();
        assert!(directory.record_rating(uuid::Uuid::new_v4(), 5).is_err());
    }
}
