//! Greedy chair/ride matching.
//!
//! Each pass scores every (idle chair, waiting ride) pair, sorts the pairs by
//! score and walks them once, taking a pair whenever neither side has been
//! taken yet. Rides that have waited too long get a bonus large enough to put
//! them ahead of everything else and may be served from any distance.

use super::engine::DispatchEngine;
use crate::domain::chair::Chair;
use crate::domain::ports::{CoreTx, Transaction};
use crate::domain::ride::{Ride, RideStatus};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingPolicy {
    pub interval_ms: u64,
    /// Matches committed per core transaction.
    pub chunk_size: usize,
    pub max_pickup_distance: i64,
    pub starvation_age_secs: f64,
    pub starvation_bonus: f64,
    /// Score of a chair standing on the pickup point. Farther chairs get
    /// `near_score / distance`.
    pub near_score: f64,
    /// Score per second of waiting.
    pub age_weight: f64,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            chunk_size: 40,
            max_pickup_distance: 50,
            starvation_age_secs: 20.0,
            starvation_bonus: 10_000.0,
            near_score: 250.0,
            age_weight: 10.0,
        }
    }
}

impl MatchingPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn is_starving(&self, age_secs: f64) -> bool {
        age_secs > self.starvation_age_secs
    }

    pub fn score(&self, pickup_distance: i64, age_secs: f64) -> f64 {
        let proximity = if pickup_distance == 0 {
            self.near_score
        } else {
            self.near_score / pickup_distance as f64
        };
        let mut score = proximity + self.age_weight * age_secs;
        if self.is_starving(age_secs) {
            score += self.starvation_bonus;
        }
        score
    }
}

#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub ride: &'a Ride,
    pub chair: &'a Chair,
    pub pickup_distance: i64,
    pub age_secs: f64,
    pub starving: bool,
    pub score: f64,
}

/// Every (chair, ride) pair, highest score first. Pairs with equal scores
/// keep chair-major, ride-minor input order. Chairs without a position are
/// skipped.
pub fn score_candidates<'a>(
    policy: &MatchingPolicy,
    rides: &'a [Ride],
    chairs: &'a [Chair],
    now: DateTime<Utc>,
) -> Vec<Candidate<'a>> {
    let mut candidates = Vec::with_capacity(rides.len() * chairs.len());
    for chair in chairs {
        let Some(position) = chair.location else {
            continue;
        };
        for ride in rides {
            let pickup_distance = position.distance_to(&ride.pickup);
            let age_secs = ((now - ride.created_at).num_milliseconds().max(0) as f64) / 1000.0;
            candidates.push(Candidate {
                ride,
                chair,
                pickup_distance,
                age_secs,
                starving: policy.is_starving(age_secs),
                score: policy.score(pickup_distance, age_secs),
            });
        }
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

/// Single greedy walk over sorted candidates. Each ride and each chair is
/// used at most once.
pub fn select_matches<'a>(policy: &MatchingPolicy, candidates: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
    let mut matched_rides = HashSet::new();
    let mut matched_chairs = HashSet::new();
    let mut selected = Vec::new();
    for candidate in candidates {
        if matched_rides.contains(&candidate.ride.id) || matched_chairs.contains(&candidate.chair.id) {
            continue;
        }
        if candidate.pickup_distance > policy.max_pickup_distance && !candidate.starving {
            continue;
        }
        matched_rides.insert(candidate.ride.id.clone());
        matched_chairs.insert(candidate.chair.id.clone());
        selected.push(candidate);
    }
    selected
}

impl DispatchEngine {
    /// Runs one matching pass and returns the number of rides matched.
    ///
    /// Chairs already serving a ride are left out. Matches are committed in
    /// chunks; once a chunk commits its chairs are marked busy and both
    /// parties of every match receive a `MATCHING` notification.
    pub async fn run_matching_pass(&self) -> Result<usize> {
        let now = Utc::now();
        let (rides, chairs) = {
            let mut core = self.core.begin().await?;
            let rides = core.unmatched_rides().await?;
            let chairs = core.available_chairs().await?;
            (rides, chairs)
        };
        if rides.is_empty() {
            debug!("no rides waiting for a chair");
            return Ok(0);
        }
        let idle: Vec<Chair> = chairs
            .into_iter()
            .filter(|chair| !self.chairs_in_ride.contains(&chair.id))
            .collect();
        if idle.is_empty() {
            debug!(waiting = rides.len(), "no idle chairs");
            return Ok(0);
        }

        let policy = &self.config.matching;
        let selected = select_matches(policy, score_candidates(policy, &rides, &idle, now));
        let mut matched = 0;
        for chunk in selected.chunks(policy.chunk_size.max(1)) {
            let mut core = self.core.begin().await?;
            let mut assigned = Vec::with_capacity(chunk.len());
            for candidate in chunk {
                core.assign_chair(&candidate.ride.id, &candidate.chair.id, now).await?;
                let mut ride = candidate.ride.clone();
                ride.assign(candidate.chair.id.clone(), now)?;
                debug!(
                    ride_id = %ride.id,
                    chair_id = %candidate.chair.id,
                    score = candidate.score,
                    pickup_distance = candidate.pickup_distance,
                    age_secs = candidate.age_secs,
                    "matched"
                );
                assigned.push((candidate.chair.id.clone(), ride));
            }
            core.commit().await?;
            for (chair_id, ride) in assigned {
                self.chairs_in_ride.insert(chair_id, ride.clone());
                self.hub.publish(&ride, RideStatus::Matching);
                matched += 1;
            }
        }

        info!(
            matched,
            waiting = rides.len() - matched,
            idle_chairs = idle.len(),
            "matching pass finished"
        );
        Ok(matched)
    }
}
