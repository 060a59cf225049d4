use super::fare::Fare;
use super::ids::{RideId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code of the coupon granted to every rider at signup. It takes priority on
/// a rider's first ride.
pub const WELCOME_COUPON_CODE: &str = "CP_NEW2024";

/// Single-use discount credit. `used_by` is written once, when the coupon is
/// bound to a ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub user_id: UserId,
    pub code: String,
    pub discount: Fare,
    pub created_at: DateTime<Utc>,
    pub used_by: Option<RideId>,
}

impl Coupon {
    pub fn new(user_id: UserId, code: impl Into<String>, discount: Fare, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            code: code.into(),
            discount,
            created_at,
            used_by: None,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.used_by.is_none()
    }

    pub fn is_welcome(&self) -> bool {
        self.code == WELCOME_COUPON_CODE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentToken {
    pub user_id: UserId,
    pub token: String,
}
