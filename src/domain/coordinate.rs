use serde::{Deserialize, Serialize};

/// Integer grid position. Distances between positions are Manhattan
/// distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: i32,
    pub longitude: i32,
}

impl Coordinate {
    pub const fn new(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn distance_to(&self, other: &Coordinate) -> i64 {
        (i64::from(self.latitude) - i64::from(other.latitude)).abs()
            + (i64::from(self.longitude) - i64::from(other.longitude)).abs()
    }
}
