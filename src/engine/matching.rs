use tracing::{debug, warn};

use crate::engine::scoring::{ScoringPolicy, compute_score};
use crate::error::DispatchError;
use crate::geo::{GeoPoint, haversine_km};
use crate::models::candidate::{MatchCandidate, MatchResult, RunnerUp};
use crate::models::presence::DriverStatus;
use crate::store::directory::DriverDirectory;
use crate::store::presence::PresenceStore;

/// How many runner-up candidates a match result carries.
const RUNNER_UP_COUNT: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub max_search_radius_km: f64,
    pub preferred_radius_km: f64,
    pub min_match_score: f64,
}

impl MatchPolicy {
    fn scoring(&self) -> ScoringPolicy {
        ScoringPolicy {
            preferred_radius_km: self.preferred_radius_km,
            max_radius_km: self.max_search_radius_km,
        }
    }
}

/// Gathers, scores, and ranks candidates for a pickup point: best score
/// first, ties broken by nearer distance. Live presence is the primary
/// source; the durable directory serves as the fallback index when the
/// store is unreachable or simply has nobody live.
pub fn rank_candidates(
    store: &dyn PresenceStore,
    directory: &DriverDirectory,
    pickup: &GeoPoint,
    policy: &MatchPolicy,
) -> Result<Vec<MatchCandidate>, DispatchError> {
    let mut candidates = match store.list_available() {
        Ok(live) if !live.is_empty() => live
            .into_iter()
            .map(|presence| {
                score_candidate(
                    presence.driver_id,
                    presence.location,
                    Some(presence.status),
                    pickup,
                    directory,
                    policy,
                )
            })
            .collect::<Vec<_>>(),
        Ok(_) => fallback_candidates(directory, pickup, policy),
        Err(err) => {
            warn!(error = %err, "presence store degraded, matching from directory");
            fallback_candidates(directory, pickup, policy)
        }
    };

    candidates.retain(|c| c.distance_km <= policy.max_search_radius_km);
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.distance_km.total_cmp(&b.distance_km))
    });

    Ok(candidates)
}

/// `findBestDriver`: the highest-ranked candidate, or `None` when nobody
/// clears the minimum score. A `None` is a named outcome, not an error;
/// the caller falls back to an open offer.
pub fn find_best_driver(
    store: &dyn PresenceStore,
    directory: &DriverDirectory,
    pickup: &GeoPoint,
    policy: &MatchPolicy,
) -> Result<Option<MatchResult>, DispatchError> {
    let ranked = rank_candidates(store, directory, pickup, policy)?;

    let Some(best) = ranked.first() else {
        return Ok(None);
    };

    if best.score < policy.min_match_score {
        debug!(
            driver_id = %best.driver_id,
            score = best.score,
            threshold = policy.min_match_score,
            "best candidate below match threshold"
        );
        return Ok(None);
    }

    let runners_up = ranked
        .iter()
        .skip(1)
        .take(RUNNER_UP_COUNT)
        .map(|c| RunnerUp {
            driver_id: c.driver_id,
            score: c.score,
        })
        .collect();

    Ok(Some(MatchResult {
        best: best.clone(),
        runners_up,
    }))
}

fn fallback_candidates(
    directory: &DriverDirectory,
    pickup: &GeoPoint,
    policy: &MatchPolicy,
) -> Vec<MatchCandidate> {
    directory
        .find_nearby(pickup, policy.max_search_radius_km)
        .into_iter()
        .map(|entry| {
            score_candidate(entry.driver_id, entry.location, None, pickup, directory, policy)
        })
        .collect()
}

fn score_candidate(
    driver_id: uuid::Uuid,
    location: GeoPoint,
    status: Option<DriverStatus>,
    pickup: &GeoPoint,
    directory: &DriverDirectory,
    policy: &MatchPolicy,
) -> MatchCandidate {
    let distance_km = haversine_km(&location, pickup);
    let stats = directory.stats(driver_id);
    let (score, breakdown) = compute_score(distance_km, status, stats.as_ref(), &policy.scoring());

    MatchCandidate {
        driver_id,
        location,
        distance_km,
        score,
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{MatchPolicy, find_best_driver, rank_candidates};
    use crate::error::DispatchError;
    use crate::geo::GeoPoint;
    use crate::models::presence::{DriverPresence, DriverStatus};
    use crate::store::directory::DriverDirectory;
    use crate::store::presence::{MemoryPresenceStore, PresenceStore};

    const PICKUP: GeoPoint = GeoPoint {
        lat: -4.3250,
        lng: 15.3222,
    };

    fn policy() -> MatchPolicy {
        MatchPolicy {
            max_search_radius_km: 5.0,
            preferred_radius_km: 1.0,
            min_match_score: 30.0,
        }
    }

    fn offset_km(base: &GeoPoint, km_north: f64) -> GeoPoint {
        GeoPoint {
            lat: base.lat + km_north / 111.0,
            lng: base.lng,
        }
    }

    fn push_driver(
        store: &MemoryPresenceStore,
        directory: &DriverDirectory,
        km_away: f64,
        rating: f64,
    ) -> Uuid {
        let location = offset_km(&PICKUP, km_away);
        let entry = directory.register(format!("driver-{km_away}"), location, Some(rating));
        store
            .upsert(DriverPresence {
                driver_id: entry.driver_id,
                location,
                heading_deg: 0.0,
                speed_kmh: 0.0,
                status: DriverStatus::Available,
                current_ride: None,
                updated_at: Utc::now(),
            })
            .unwrap();
        entry.driver_id
    }

    struct DownStore;

    impl PresenceStore for DownStore {
        fn upsert(&self, _p: DriverPresence) -> Result<(), DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn get(&self, _d: Uuid) -> Result<Option<DriverPresence>, DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn list_available(&self) -> Result<Vec<DriverPresence>, DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn list_dispatched(&self) -> Result<Vec<DriverPresence>, DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn set_dispatch(
            &self,
            _d: Uuid,
            _s: DriverStatus,
            _r: Option<Uuid>,
        ) -> Result<(), DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn remove(&self, _d: Uuid) -> Result<(), DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn purge_expired(&self) -> Result<usize, DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
        fn live_count(&self) -> Result<usize, DispatchError> {
            Err(DispatchError::Degraded("store down".to_string()))
        }
    }

    #[test]
    fn best_driver_wins_on_composite_score() {
        let store = MemoryPresenceStore::new(Duration::from_secs(300));
        let directory = DriverDirectory::new();

        // Distance favors b, rating favors a; composite favors a.
        let a = push_driver(&store, &directory, 1.2, 4.8);
        let _b = push_driver(&store, &directory, 0.4, 3.0);

        let result = find_best_driver(&store, &directory, &PICKUP, &policy())
            .unwrap()
            .expect("should match");

        assert_eq!(result.best.driver_id, a);
        assert_eq!(result.runners_up.len(), 1);
    }

    #[test]
    fn candidates_beyond_max_radius_are_excluded() {
        let store = MemoryPresenceStore::new(Duration::from_secs(300));
        let directory = DriverDirectory::new();

        push_driver(&store, &directory, 8.0, 5.0);

        let ranked = rank_candidates(&store, &directory, &PICKUP, &policy()).unwrap();
        assert!(ranked.is_empty());
        assert!(
            find_best_driver(&store, &directory, &PICKUP, &policy())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn degraded_store_falls_back_to_directory() {
        let directory = DriverDirectory::new();
        let entry = directory.register(
            "fallback".to_string(),
            offset_km(&PICKUP, 0.5),
            Some(4.0),
        );

        let result = find_best_driver(&DownStore, &directory, &PICKUP, &policy())
            .unwrap()
            .expect("directory fallback should match");

        assert_eq!(result.best.driver_id, entry.driver_id);
        // No live presence was consulted for the fallback candidate.
        assert_eq!(result.best.breakdown.availability_score, 50.0);
    }

    #[test]
    fn empty_store_falls_back_to_directory() {
        let store = MemoryPresenceStore::new(Duration::from_secs(300));
        let directory = DriverDirectory::new();
        directory.register("only-durable".to_string(), offset_km(&PICKUP, 1.0), None);

        let ranked = rank_candidates(&store, &directory, &PICKUP, &policy()).unwrap();
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn ties_break_toward_the_nearer_driver() {
        let store = MemoryPresenceStore::new(Duration::from_secs(300));
        let directory = DriverDirectory::new();

        // Both inside the preferred radius with identical ratings: equal
        // scores, so distance decides.
        let near = push_driver(&store, &directory, 0.2, 4.0);
        let _far = push_driver(&store, &directory, 0.9, 4.0);

        let ranked = rank_candidates(&store, &directory, &PICKUP, &policy()).unwrap();
        assert_eq!(ranked[0].driver_id, near);
    }

    #[test]
    fn runner_up_list_is_capped_at_three() {
        let store = MemoryPresenceStore::new(Duration::from_secs(300));
        let directory = DriverDirectory::new();

        for km in [0.2, 0.4, 0.6, 0.8, 1.2, 1.4] {
            push_driver(&store, &directory, km, 4.5);
        }

        let result = find_best_driver(&store, &directory, &PICKUP, &policy())
            .unwrap()
            .expect("should match");
        assert_eq!(result.runners_up.len(), 3);
    }
}
