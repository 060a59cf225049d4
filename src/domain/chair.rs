use super::coordinate::Coordinate;
use super::ids::{ChairId, OwnerId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chair {
    pub id: ChairId,
    pub owner_id: OwnerId,
    pub name: String,
    pub model: String,
    pub is_active: bool,
    /// Unknown until the chair reports its first location.
    pub location: Option<Coordinate>,
    pub total_distance: i64,
    pub moved_at: Option<DateTime<Utc>>,
}

impl Chair {
    pub fn new(id: ChairId, owner_id: OwnerId, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            owner_id,
            name: name.into(),
            model: model.into(),
            is_active: false,
            location: None,
            total_distance: 0,
            moved_at: None,
        }
    }

    /// Applies one reported position. Distance accumulates; it is never
    /// overwritten.
    pub fn apply_location(&mut self, update: &LocationUpdate) {
        self.location = Some(update.coordinate);
        self.total_distance += update.distance_delta;
        self.moved_at = Some(update.recorded_at);
    }
}

/// One position report queued for the location batchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationUpdate {
    pub chair_id: ChairId,
    pub coordinate: Coordinate,
    pub distance_delta: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Chair identity as shown to riders. Immutable once registered, so it is
/// safe to cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChairProfile {
    pub id: ChairId,
    pub owner_id: OwnerId,
    pub name: String,
    pub model: String,
}

impl From<&Chair> for ChairProfile {
    fn from(chair: &Chair) -> Self {
        Self {
            id: chair.id.clone(),
            owner_id: chair.owner_id.clone(),
            name: chair.name.clone(),
            model: chair.model.clone(),
        }
    }
}

/// Aggregate over a chair's evaluated rides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChairStats {
    pub total_rides_count: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_evaluation_avg: Decimal,
}

impl ChairStats {
    pub fn from_evaluations(evaluations: impl IntoIterator<Item = u8>) -> Self {
        let (count, sum) = evaluations
            .into_iter()
            .fold((0u64, 0u64), |(count, sum), e| (count + 1, sum + u64::from(e)));
        let total_evaluation_avg = if count == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(sum) / Decimal::from(count)
        };
        Self {
            total_rides_count: count,
            total_evaluation_avg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub firstname: String,
    pub lastname: String,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}
