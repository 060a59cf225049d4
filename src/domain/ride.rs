use super::coordinate::Coordinate;
use super::ids::{ChairId, RideId, UserId};
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle position of a ride.
///
/// The declaration order is the only order in which a ride may advance.
/// `Canceled` sits outside that chain and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Matching,
    Enroute,
    Pickup,
    Carrying,
    Arrived,
    Completed,
    Canceled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matching => "MATCHING",
            Self::Enroute => "ENROUTE",
            Self::Pickup => "PICKUP",
            Self::Carrying => "CARRYING",
            Self::Arrived => "ARRIVED",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// The single status this one may advance to.
    pub fn next(&self) -> Option<RideStatus> {
        match self {
            Self::Matching => Some(Self::Enroute),
            Self::Enroute => Some(Self::Pickup),
            Self::Pickup => Some(Self::Carrying),
            Self::Carrying => Some(Self::Arrived),
            Self::Arrived => Some(Self::Completed),
            Self::Completed | Self::Canceled => None,
        }
    }

    /// Validates `self -> target`, returning the new status.
    pub fn advance_to(&self, target: RideStatus) -> Result<RideStatus> {
        if self.next() == Some(target) {
            Ok(target)
        } else {
            Err(DispatchError::InvalidState(format!(
                "cannot move ride from {} to {}",
                self, target
            )))
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MATCHING" => Ok(Self::Matching),
            "ENROUTE" => Ok(Self::Enroute),
            "PICKUP" => Ok(Self::Pickup),
            "CARRYING" => Ok(Self::Carrying),
            "ARRIVED" => Ok(Self::Arrived),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(DispatchError::ValidationError(format!(
                "unknown ride status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub user_id: UserId,
    /// Set once by the matching engine; never cleared.
    pub chair_id: Option<ChairId>,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    /// 1..=5 once the rider has evaluated the ride.
    pub evaluation: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new(user_id: UserId, pickup: Coordinate, destination: Coordinate, now: DateTime<Utc>) -> Self {
        Self {
            id: RideId::generate(),
            user_id,
            chair_id: None,
            pickup,
            destination,
            evaluation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.evaluation.is_none()
    }

    /// Binds the ride to a chair. A ride is matched at most once.
    pub fn assign(&mut self, chair_id: ChairId, now: DateTime<Utc>) -> Result<()> {
        if let Some(existing) = &self.chair_id {
            return Err(DispatchError::Conflict(format!(
                "ride {} already assigned to chair {}",
                self.id, existing
            )));
        }
        self.chair_id = Some(chair_id);
        self.updated_at = now;
        Ok(())
    }

    pub fn evaluate(&mut self, evaluation: u8, now: DateTime<Utc>) -> Result<()> {
        validate_evaluation(evaluation)?;
        self.evaluation = Some(evaluation);
        self.updated_at = now;
        Ok(())
    }
}

pub fn validate_evaluation(evaluation: u8) -> Result<()> {
    if (1..=5).contains(&evaluation) {
        Ok(())
    } else {
        Err(DispatchError::ValidationError(
            "evaluation must be between 1 and 5".to_string(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideStatusRecord {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub updated_at: DateTime<Utc>,
}
