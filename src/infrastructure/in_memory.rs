use crate::domain::chair::{Chair, ChairStats, LocationUpdate, User};
use crate::domain::coupon::{Coupon, PaymentToken};
use crate::domain::ids::{ChairId, RideId, UserId};
use crate::domain::ports::{CoreStore, CoreTx, StatusStore, StatusTx, Transaction};
use crate::domain::ride::{Ride, RideStatus, RideStatusRecord};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A transaction over one in-memory scope.
///
/// Holds the scope's lock for its whole lifetime and works on a private copy
/// of the tables; `commit` publishes the copy, anything else discards it.
/// Transactions on the same scope are therefore fully serialized.
struct TableTx<T> {
    guard: OwnedMutexGuard<T>,
    working: T,
}

impl<T: Clone> TableTx<T> {
    async fn begin(tables: &Arc<Mutex<T>>) -> Self {
        let guard = tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Self { guard, working }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Transaction for TableTx<T> {
    async fn commit(self: Box<Self>) -> Result<()> {
        let TableTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
struct CoreTables {
    rides: HashMap<RideId, Ride>,
    chairs: HashMap<ChairId, Chair>,
    users: HashMap<UserId, User>,
    payment_tokens: HashMap<UserId, PaymentToken>,
    settings: HashMap<String, String>,
}

/// In-memory core scope: rides, chairs, users, payment tokens, settings.
///
/// `Clone` shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryCoreStore {
    tables: Arc<Mutex<CoreTables>>,
}

impl InMemoryCoreStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoreStore for InMemoryCoreStore {
    async fn begin(&self) -> Result<Box<dyn CoreTx>> {
        Ok(Box::new(TableTx::begin(&self.tables).await))
    }
}

#[async_trait]
impl CoreTx for TableTx<CoreTables> {
    async fn ride(&mut self, ride_id: &RideId) -> Result<Option<Ride>> {
        Ok(self.working.rides.get(ride_id).cloned())
    }

    async fn insert_ride(&mut self, ride: Ride) -> Result<()> {
        if self.working.rides.contains_key(&ride.id) {
            return Err(DispatchError::Conflict(format!("ride {} already exists", ride.id)));
        }
        self.working.rides.insert(ride.id.clone(), ride);
        Ok(())
    }

    async fn count_open_rides(&mut self, user_id: &UserId) -> Result<usize> {
        Ok(self
            .working
            .rides
            .values()
            .filter(|r| &r.user_id == user_id && r.is_open())
            .count())
    }

    async fn count_rides(&mut self, user_id: &UserId) -> Result<usize> {
        Ok(self.working.rides.values().filter(|r| &r.user_id == user_id).count())
    }

    async fn evaluated_rides(&mut self, user_id: &UserId) -> Result<Vec<Ride>> {
        let mut rides: Vec<Ride> = self
            .working
            .rides
            .values()
            .filter(|r| &r.user_id == user_id && r.evaluation.is_some())
            .cloned()
            .collect();
        rides.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(rides)
    }

    async fn unmatched_rides(&mut self) -> Result<Vec<Ride>> {
        let mut rides: Vec<Ride> = self
            .working
            .rides
            .values()
            .filter(|r| r.chair_id.is_none())
            .cloned()
            .collect();
        rides.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(rides)
    }

    async fn assign_chair(&mut self, ride_id: &RideId, chair_id: &ChairId, now: DateTime<Utc>) -> Result<()> {
        let ride = self
            .working
            .rides
            .get_mut(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("ride {}", ride_id)))?;
        ride.assign(chair_id.clone(), now)
    }

    async fn set_evaluation(&mut self, ride_id: &RideId, evaluation: u8, now: DateTime<Utc>) -> Result<bool> {
        match self.working.rides.get_mut(ride_id) {
            Some(ride) => {
                ride.evaluate(evaluation, now)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn latest_ride_for_chair(&mut self, chair_id: &ChairId) -> Result<Option<Ride>> {
        Ok(self
            .working
            .rides
            .values()
            .filter(|r| r.chair_id.as_ref() == Some(chair_id))
            .max_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)))
            .cloned())
    }

    async fn chair(&mut self, chair_id: &ChairId) -> Result<Option<Chair>> {
        Ok(self.working.chairs.get(chair_id).cloned())
    }

    async fn insert_chair(&mut self, chair: Chair) -> Result<()> {
        if self.working.chairs.contains_key(&chair.id) {
            return Err(DispatchError::Conflict(format!("chair {} already exists", chair.id)));
        }
        self.working.chairs.insert(chair.id.clone(), chair);
        Ok(())
    }

    async fn available_chairs(&mut self) -> Result<Vec<Chair>> {
        let mut chairs: Vec<Chair> = self
            .working
            .chairs
            .values()
            .filter(|c| c.is_active && c.location.is_some())
            .cloned()
            .collect();
        chairs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chairs)
    }

    async fn set_chair_active(&mut self, chair_id: &ChairId, active: bool) -> Result<bool> {
        match self.working.chairs.get_mut(chair_id) {
            Some(chair) => {
                chair.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_chair_location(&mut self, update: &LocationUpdate) -> Result<()> {
        let chair = self
            .working
            .chairs
            .get_mut(&update.chair_id)
            .ok_or_else(|| DispatchError::NotFound(format!("chair {}", update.chair_id)))?;
        chair.apply_location(update);
        Ok(())
    }

    async fn chair_stats(&mut self, chair_id: &ChairId) -> Result<ChairStats> {
        Ok(ChairStats::from_evaluations(
            self.working
                .rides
                .values()
                .filter(|r| r.chair_id.as_ref() == Some(chair_id))
                .filter_map(|r| r.evaluation),
        ))
    }

    async fn user(&mut self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.working.users.get(user_id).cloned())
    }

    async fn insert_user(&mut self, user: User) -> Result<()> {
        if self.working.users.contains_key(&user.id) {
            return Err(DispatchError::Conflict(format!("user {} already exists", user.id)));
        }
        self.working.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn payment_token(&mut self, user_id: &UserId) -> Result<Option<PaymentToken>> {
        Ok(self.working.payment_tokens.get(user_id).cloned())
    }

    async fn upsert_payment_token(&mut self, token: PaymentToken) -> Result<()> {
        self.working.payment_tokens.insert(token.user_id.clone(), token);
        Ok(())
    }

    async fn setting(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self.working.settings.get(name).cloned())
    }

    async fn put_setting(&mut self, name: &str, value: &str) -> Result<()> {
        self.working.settings.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
struct StatusTables {
    statuses: HashMap<RideId, RideStatusRecord>,
    /// Grant order.
    coupons: Vec<Coupon>,
}

/// In-memory status scope: ride status records and coupons.
#[derive(Default, Clone)]
pub struct InMemoryStatusStore {
    tables: Arc<Mutex<StatusTables>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn begin(&self) -> Result<Box<dyn StatusTx>> {
        Ok(Box::new(TableTx::begin(&self.tables).await))
    }
}

#[async_trait]
impl StatusTx for TableTx<StatusTables> {
    async fn insert_status(&mut self, ride_id: &RideId, status: RideStatus, now: DateTime<Utc>) -> Result<()> {
        if self.working.statuses.contains_key(ride_id) {
            return Err(DispatchError::Conflict(format!("status for ride {} already exists", ride_id)));
        }
        self.working.statuses.insert(
            ride_id.clone(),
            RideStatusRecord {
                ride_id: ride_id.clone(),
                status,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn latest_status(&mut self, ride_id: &RideId) -> Result<Option<RideStatus>> {
        Ok(self.working.statuses.get(ride_id).map(|r| r.status))
    }

    async fn update_status(&mut self, ride_id: &RideId, status: RideStatus, now: DateTime<Utc>) -> Result<()> {
        let record = self
            .working
            .statuses
            .get_mut(ride_id)
            .ok_or_else(|| DispatchError::NotFound(format!("status for ride {}", ride_id)))?;
        record.status = status;
        record.updated_at = now;
        Ok(())
    }

    async fn grant_coupon(&mut self, coupon: Coupon) -> Result<()> {
        if self
            .working
            .coupons
            .iter()
            .any(|c| c.user_id == coupon.user_id && c.code == coupon.code)
        {
            return Err(DispatchError::Conflict(format!(
                "coupon {} already granted to {}",
                coupon.code, coupon.user_id
            )));
        }
        self.working.coupons.push(coupon);
        Ok(())
    }

    async fn coupon_for_ride(&mut self, ride_id: &RideId) -> Result<Option<Coupon>> {
        Ok(self
            .working
            .coupons
            .iter()
            .find(|c| c.used_by.as_ref() == Some(ride_id))
            .cloned())
    }

    async fn unused_coupon(&mut self, user_id: &UserId, code: &str) -> Result<Option<Coupon>> {
        Ok(self
            .working
            .coupons
            .iter()
            .find(|c| &c.user_id == user_id && c.code == code && c.is_unused())
            .cloned())
    }

    async fn oldest_unused_coupon(&mut self, user_id: &UserId) -> Result<Option<Coupon>> {
        Ok(self
            .working
            .coupons
            .iter()
            .filter(|c| &c.user_id == user_id && c.is_unused())
            .min_by_key(|c| c.created_at)
            .cloned())
    }

    async fn bind_coupon(&mut self, user_id: &UserId, code: &str, ride_id: &RideId) -> Result<bool> {
        match self
            .working
            .coupons
            .iter_mut()
            .find(|c| &c.user_id == user_id && c.code == code && c.is_unused())
        {
            Some(coupon) => {
                coupon.used_by = Some(ride_id.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coordinate::Coordinate;
    use crate::domain::fare::Fare;
    use chrono::Duration;

    fn ride(user: &str, created_at: DateTime<Utc>) -> Ride {
        Ride::new(UserId::from(user), Coordinate::new(0, 0), Coordinate::new(1, 1), created_at)
    }

    #[tokio::test]
    async fn test_commit_publishes_and_drop_discards() {
        let store = InMemoryCoreStore::new();
        let first = ride("u1", Utc::now());
        let second = ride("u2", Utc::now());

        let mut tx = store.begin().await.unwrap();
        tx.insert_ride(first.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_ride(second.clone()).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.ride(&first.id).await.unwrap(), Some(first));
        assert!(tx.ride(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unmatched_rides_oldest_first() {
        let store = InMemoryCoreStore::new();
        let now = Utc::now();
        let young = ride("u1", now);
        let old = ride("u2", now - Duration::seconds(30));
        let mut matched = ride("u3", now - Duration::seconds(60));
        matched.chair_id = Some(ChairId::from("c1"));

        let mut tx = store.begin().await.unwrap();
        for r in [young.clone(), old.clone(), matched] {
            tx.insert_ride(r).await.unwrap();
        }
        let rides = tx.unmatched_rides().await.unwrap();
        assert_eq!(
            rides.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            vec![old.id, young.id]
        );
    }

    #[tokio::test]
    async fn test_evaluated_rides_newest_first() {
        let store = InMemoryCoreStore::new();
        let now = Utc::now();
        let mut older = ride("u1", now - Duration::seconds(60));
        older.evaluate(3, now).unwrap();
        let mut newer = ride("u1", now - Duration::seconds(10));
        newer.evaluate(5, now).unwrap();
        let open = ride("u1", now);
        let mut other_user = ride("u2", now);
        other_user.evaluate(1, now).unwrap();

        let mut tx = store.begin().await.unwrap();
        for r in [older.clone(), open, newer.clone(), other_user] {
            tx.insert_ride(r).await.unwrap();
        }
        let rides = tx.evaluated_rides(&UserId::from("u1")).await.unwrap();
        assert_eq!(
            rides.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
    }

    #[tokio::test]
    async fn test_bind_coupon_only_once() {
        let store = InMemoryStatusStore::new();
        let user = UserId::from("u1");
        let mut tx = store.begin().await.unwrap();
        tx.grant_coupon(Coupon::new(user.clone(), "CODE", Fare(100), Utc::now()))
            .await
            .unwrap();

        assert!(tx.bind_coupon(&user, "CODE", &RideId::from("r1")).await.unwrap());
        assert!(!tx.bind_coupon(&user, "CODE", &RideId::from("r2")).await.unwrap());
        let bound = tx.coupon_for_ride(&RideId::from("r1")).await.unwrap().unwrap();
        assert_eq!(bound.discount, Fare(100));
        assert!(tx.coupon_for_ride(&RideId::from("r2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oldest_unused_coupon_follows_grant_time() {
        let store = InMemoryStatusStore::new();
        let user = UserId::from("u1");
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        tx.grant_coupon(Coupon::new(user.clone(), "NEWER", Fare(1), now)).await.unwrap();
        tx.grant_coupon(Coupon::new(user.clone(), "OLDER", Fare(2), now - Duration::seconds(5)))
            .await
            .unwrap();

        let oldest = tx.oldest_unused_coupon(&user).await.unwrap().unwrap();
        assert_eq!(oldest.code, "OLDER");
    }

    #[tokio::test]
    async fn test_status_update_requires_record() {
        let store = InMemoryStatusStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update_status(&RideId::from("missing"), RideStatus::Enroute, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
