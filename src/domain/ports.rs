//! Ports to the external collaborators: the relational store (as two
//! independent transactional scopes) and the payment gateway.
//!
//! Dropping a transaction without committing rolls it back. Reads made
//! through a transaction hold exclusive locks on the rows they return until
//! the transaction ends, so a read followed by a write is a
//! `SELECT ... FOR UPDATE` / `UPDATE` pair.

use super::chair::{Chair, ChairStats, LocationUpdate, User};
use super::coupon::{Coupon, PaymentToken};
use super::fare::Fare;
use super::ids::{ChairId, RideId, UserId};
use super::ride::{Ride, RideStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Rides, chairs, rider identities, payment tokens and settings.
#[async_trait]
pub trait CoreStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CoreTx>>;
}

#[async_trait]
pub trait CoreTx: Transaction {
    async fn ride(&mut self, ride_id: &RideId) -> Result<Option<Ride>>;
    async fn insert_ride(&mut self, ride: Ride) -> Result<()>;
    /// Rides of `user_id` not yet evaluated.
    async fn count_open_rides(&mut self, user_id: &UserId) -> Result<usize>;
    async fn count_rides(&mut self, user_id: &UserId) -> Result<usize>;
    /// Rides of `user_id` carrying an evaluation, newest first.
    async fn evaluated_rides(&mut self, user_id: &UserId) -> Result<Vec<Ride>>;
    /// Rides without a chair, oldest first.
    async fn unmatched_rides(&mut self) -> Result<Vec<Ride>>;
    /// Sets the chair of a ride that has none. Conflict if already matched.
    async fn assign_chair(&mut self, ride_id: &RideId, chair_id: &ChairId, now: DateTime<Utc>) -> Result<()>;
    /// Returns false when no such ride exists.
    async fn set_evaluation(&mut self, ride_id: &RideId, evaluation: u8, now: DateTime<Utc>) -> Result<bool>;
    /// Most recently updated ride served by `chair_id`.
    async fn latest_ride_for_chair(&mut self, chair_id: &ChairId) -> Result<Option<Ride>>;

    async fn chair(&mut self, chair_id: &ChairId) -> Result<Option<Chair>>;
    async fn insert_chair(&mut self, chair: Chair) -> Result<()>;
    /// Active chairs whose position is known.
    async fn available_chairs(&mut self) -> Result<Vec<Chair>>;
    async fn set_chair_active(&mut self, chair_id: &ChairId, active: bool) -> Result<bool>;
    async fn update_chair_location(&mut self, update: &LocationUpdate) -> Result<()>;
    async fn chair_stats(&mut self, chair_id: &ChairId) -> Result<ChairStats>;

    async fn user(&mut self, user_id: &UserId) -> Result<Option<User>>;
    async fn insert_user(&mut self, user: User) -> Result<()>;
    async fn payment_token(&mut self, user_id: &UserId) -> Result<Option<PaymentToken>>;
    async fn upsert_payment_token(&mut self, token: PaymentToken) -> Result<()>;
    async fn setting(&mut self, name: &str) -> Result<Option<String>>;
    async fn put_setting(&mut self, name: &str, value: &str) -> Result<()>;
}

/// Ride status records and coupons.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StatusTx>>;
}

#[async_trait]
pub trait StatusTx: Transaction {
    async fn insert_status(&mut self, ride_id: &RideId, status: RideStatus, now: DateTime<Utc>) -> Result<()>;
    async fn latest_status(&mut self, ride_id: &RideId) -> Result<Option<RideStatus>>;
    async fn update_status(&mut self, ride_id: &RideId, status: RideStatus, now: DateTime<Utc>) -> Result<()>;

    async fn grant_coupon(&mut self, coupon: Coupon) -> Result<()>;
    async fn coupon_for_ride(&mut self, ride_id: &RideId) -> Result<Option<Coupon>>;
    async fn unused_coupon(&mut self, user_id: &UserId, code: &str) -> Result<Option<Coupon>>;
    /// Oldest unused coupon by grant order.
    async fn oldest_unused_coupon(&mut self, user_id: &UserId) -> Result<Option<Coupon>>;
    /// Marks the coupon used by `ride_id`. Returns false if it was already
    /// claimed, leaving it untouched.
    async fn bind_coupon(&mut self, user_id: &UserId, code: &str, ride_id: &RideId) -> Result<bool>;
}

/// Amount and credentials for one payment. The idempotency key stays the
/// same across every retry of the same logical payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Fare,
    pub token: String,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// One attempt. Any error means the attempt did not succeed.
    async fn post_payment(&self, base_url: &str, request: &PaymentRequest) -> Result<()>;
}

pub type CoreStoreRef = std::sync::Arc<dyn CoreStore>;
pub type StatusStoreRef = std::sync::Arc<dyn StatusStore>;
pub type PaymentGatewayRef = std::sync::Arc<dyn PaymentGateway>;
