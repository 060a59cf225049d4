//! Fare arithmetic.
//!
//! A fare is a fixed boarding charge plus a metered charge proportional to the
//! Manhattan distance between pickup and destination. Discounts only ever
//! reduce the metered part, so a fare never drops below the boarding charge.

use super::coordinate::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Whole-unit money amount charged for a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fare(pub i64);

impl Fare {
    pub const ZERO: Self = Self(0);

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl Add for Fare {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Fare {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Fare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareSchedule {
    pub initial_fare: Fare,
    pub fare_per_distance: Fare,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            initial_fare: Fare(500),
            fare_per_distance: Fare(100),
        }
    }
}

impl FareSchedule {
    pub fn metered(&self, pickup: &Coordinate, destination: &Coordinate) -> Fare {
        Fare(self.fare_per_distance.0 * pickup.distance_to(destination))
    }

    /// Undiscounted fare.
    pub fn fare(&self, pickup: &Coordinate, destination: &Coordinate) -> Fare {
        self.initial_fare + self.metered(pickup, destination)
    }

    /// Fare after subtracting `discount` from the metered part, floored at zero.
    pub fn discounted(&self, pickup: &Coordinate, destination: &Coordinate, discount: Fare) -> Fare {
        let metered = self.metered(pickup, destination) - discount;
        self.initial_fare + metered.max(Fare::ZERO)
    }
}
