//! Read-only rider queries: chairs around a point and past rides.

use super::engine::DispatchEngine;
use crate::domain::coordinate::Coordinate;
use crate::domain::fare::Fare;
use crate::domain::ids::{ChairId, OwnerId, RideId, UserId};
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Search radius used when the caller gives none.
pub const DEFAULT_NEARBY_DISTANCE: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearbyChair {
    pub id: ChairId,
    pub name: String,
    pub model: String,
    pub current_coordinate: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearbyChairs {
    pub chairs: Vec<NearbyChair>,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryChair {
    pub id: ChairId,
    pub owner_id: OwnerId,
    pub name: String,
    pub model: String,
}

/// One completed ride as the rider sees it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RideHistoryEntry {
    pub ride_id: RideId,
    pub pickup_coordinate: Coordinate,
    pub destination_coordinate: Coordinate,
    pub fare: Fare,
    pub evaluation: u8,
    /// Unix milliseconds.
    pub requested_at: i64,
    pub completed_at: i64,
    pub chair: HistoryChair,
}

impl DispatchEngine {
    /// Idle, active chairs within `distance` (Manhattan, inclusive) of
    /// `center`.
    pub async fn nearby_chairs(&self, center: Coordinate, distance: i64) -> Result<NearbyChairs> {
        if distance < 0 {
            return Err(DispatchError::ValidationError(format!("invalid distance {}", distance)));
        }
        let chairs = {
            let mut core = self.core.begin().await?;
            core.available_chairs().await?
        };
        let chairs: Vec<NearbyChair> = chairs
            .into_iter()
            .filter(|chair| !self.chairs_in_ride.contains(&chair.id))
            .filter_map(|chair| {
                let position = chair.location?;
                (position.distance_to(&center) <= distance).then(|| NearbyChair {
                    id: chair.id,
                    name: chair.name,
                    model: chair.model,
                    current_coordinate: position,
                })
            })
            .collect();
        debug!(found = chairs.len(), distance, "nearby chairs");
        Ok(NearbyChairs {
            chairs,
            retrieved_at: Utc::now(),
        })
    }

    /// Evaluated rides of `user_id`, newest first, each with the fare it was
    /// charged.
    pub async fn ride_history(&self, user_id: &UserId) -> Result<Vec<RideHistoryEntry>> {
        let mut core = self.core.begin().await?;
        let mut status = self.status.begin().await?;

        let rides = core.evaluated_rides(user_id).await?;
        let mut entries = Vec::with_capacity(rides.len());
        for ride in rides {
            let (Some(chair_id), Some(evaluation)) = (&ride.chair_id, ride.evaluation) else {
                continue;
            };
            let profile = self.chair_profile(core.as_mut(), chair_id).await?;
            let fare = self.ride_fare(status.as_mut(), &ride).await?;
            entries.push(RideHistoryEntry {
                ride_id: ride.id.clone(),
                pickup_coordinate: ride.pickup,
                destination_coordinate: ride.destination,
                fare,
                evaluation,
                requested_at: ride.created_at.timestamp_millis(),
                completed_at: ride.updated_at.timestamp_millis(),
                chair: HistoryChair {
                    id: profile.id,
                    owner_id: profile.owner_id,
                    name: profile.name,
                    model: profile.model,
                },
            });
        }
        Ok(entries)
    }
}
