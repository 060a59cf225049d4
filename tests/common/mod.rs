#![allow(dead_code)]

use async_trait::async_trait;
use chair_dispatch::application::engine::{DispatchEngine, PAYMENT_GATEWAY_URL_SETTING};
use chair_dispatch::config::DispatchConfig;
use chair_dispatch::domain::chair::{Chair, User};
use chair_dispatch::domain::coordinate::Coordinate;
use chair_dispatch::domain::coupon::Coupon;
use chair_dispatch::domain::fare::Fare;
use chair_dispatch::domain::ids::{ChairId, OwnerId, RideId, UserId};
use chair_dispatch::domain::ports::{
    CoreStore, CoreTx, PaymentGateway, PaymentRequest, StatusStore, StatusTx, Transaction,
};
use chair_dispatch::domain::ride::{Ride, RideStatus};
use chair_dispatch::error::{DispatchError, Result};
use chair_dispatch::infrastructure::in_memory::{InMemoryCoreStore, InMemoryStatusStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-process gateway double. Rejects the first `failures` attempts, then
/// accepts; records every attempt it sees. Each attempt can be made to take
/// `delay`, and the peak number of overlapping attempts is tracked.
pub struct ScriptedGateway {
    failures: Mutex<usize>,
    attempts: Mutex<Vec<(String, PaymentRequest)>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGateway {
    pub fn accepting() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures),
            attempts: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_failures(&self, failures: usize) {
        *self.failures.lock().unwrap() = failures;
    }

    pub fn attempts(&self) -> Vec<(String, PaymentRequest)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn post_payment(&self, base_url: &str, request: &PaymentRequest) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.attempts
            .lock()
            .unwrap()
            .push((base_url.to_string(), request.clone()));
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(DispatchError::UpstreamFailure("status code 500".to_string()));
        }
        Ok(())
    }
}

pub struct TestEnv {
    pub engine: DispatchEngine,
    pub core: Arc<InMemoryCoreStore>,
    pub status: Arc<InMemoryStatusStore>,
    pub gateway: Arc<ScriptedGateway>,
}

pub fn env() -> TestEnv {
    env_with(DispatchConfig::default(), ScriptedGateway::accepting())
}

pub fn env_with(config: DispatchConfig, gateway: Arc<ScriptedGateway>) -> TestEnv {
    let core = Arc::new(InMemoryCoreStore::new());
    let status = Arc::new(InMemoryStatusStore::new());
    let engine = DispatchEngine::new(config, core.clone(), status.clone(), gateway.clone());
    TestEnv {
        engine,
        core,
        status,
        gateway,
    }
}

impl TestEnv {
    pub async fn add_user(&self, id: &str) -> UserId {
        let user = User {
            id: UserId::from(id),
            firstname: "Rider".to_string(),
            lastname: id.to_string(),
        };
        let mut tx = self.core.begin().await.unwrap();
        tx.insert_user(user).await.unwrap();
        tx.commit().await.unwrap();
        UserId::from(id)
    }

    /// Registers a user with a payment token and the gateway URL setting.
    pub async fn add_paying_user(&self, id: &str) -> UserId {
        let user_id = self.add_user(id).await;
        self.engine
            .register_payment_token(&user_id, &format!("token-{}", id))
            .await
            .unwrap();
        self.put_setting(PAYMENT_GATEWAY_URL_SETTING, "http://payment.test").await;
        user_id
    }

    pub async fn put_setting(&self, name: &str, value: &str) {
        let mut tx = self.core.begin().await.unwrap();
        tx.put_setting(name, value).await.unwrap();
        tx.commit().await.unwrap();
    }

    /// Registers an active chair standing at `at`.
    pub async fn add_chair(&self, id: &str, at: Coordinate) -> ChairId {
        let chair_id = ChairId::from(id);
        let mut tx = self.core.begin().await.unwrap();
        tx.insert_chair(Chair::new(chair_id.clone(), OwnerId::from("owner"), format!("chair {}", id), "basic"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        self.engine.set_chair_activity(&chair_id, true).await.unwrap();
        self.move_chair(&chair_id, at).await;
        chair_id
    }

    pub async fn move_chair(&self, chair_id: &ChairId, to: Coordinate) {
        self.engine.report_chair_location(chair_id, to).await.unwrap();
        self.engine.sync_locations().await.unwrap();
    }

    pub async fn grant_coupon(&self, user_id: &UserId, code: &str, discount: i64) {
        let mut tx = self.status.begin().await.unwrap();
        tx.grant_coupon(Coupon::new(user_id.clone(), code, Fare(discount), Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    /// Inserts a waiting ride with a chosen creation time, bypassing
    /// `create_ride`.
    pub async fn insert_ride_at(
        &self,
        user: &str,
        pickup: Coordinate,
        destination: Coordinate,
        created_at: DateTime<Utc>,
    ) -> RideId {
        let user_id = self.add_user(user).await;
        let ride = Ride::new(user_id, pickup, destination, created_at);
        let mut core = self.core.begin().await.unwrap();
        let mut status = self.status.begin().await.unwrap();
        core.insert_ride(ride.clone()).await.unwrap();
        status.insert_status(&ride.id, RideStatus::Matching, created_at).await.unwrap();
        core.commit().await.unwrap();
        status.commit().await.unwrap();
        ride.id
    }

    pub async fn status_of(&self, ride_id: &RideId) -> RideStatus {
        self.engine.ride_summary(ride_id).await.unwrap().status
    }

    pub async fn ride(&self, ride_id: &RideId) -> Ride {
        self.engine.ride_summary(ride_id).await.unwrap().ride
    }

    pub async fn chair(&self, chair_id: &ChairId) -> Chair {
        let mut tx = self.core.begin().await.unwrap();
        tx.chair(chair_id).await.unwrap().unwrap()
    }

    pub async fn coupon_for(&self, ride_id: &RideId) -> Option<Coupon> {
        let mut tx = self.status.begin().await.unwrap();
        tx.coupon_for_ride(ride_id).await.unwrap()
    }

    /// Requests a ride from (0,0) to (0,10) with a chair waiting on the
    /// pickup point, and drives it to ARRIVED.
    pub async fn arrived_ride(&self, user: &str, chair: &str) -> (RideId, ChairId) {
        let user_id = self.add_paying_user(user).await;
        let chair_id = self.add_chair(chair, Coordinate::new(0, 0)).await;
        let ride_id = self.drive_to_arrival(&user_id, &chair_id).await;
        (ride_id, chair_id)
    }

    /// Same trip as `arrived_ride` for an existing user and idle chair.
    pub async fn drive_to_arrival(&self, user_id: &UserId, chair_id: &ChairId) -> RideId {
        self.move_chair(chair_id, Coordinate::new(0, 0)).await;
        let (ride_id, _) = self
            .engine
            .create_ride(user_id, Coordinate::new(0, 0), Coordinate::new(0, 10))
            .await
            .unwrap();
        assert_eq!(self.engine.run_matching_pass().await.unwrap(), 1);
        self.engine
            .set_chair_status(chair_id, &ride_id, RideStatus::Enroute)
            .await
            .unwrap();
        self.move_chair(chair_id, Coordinate::new(0, 1)).await;
        self.move_chair(chair_id, Coordinate::new(0, 0)).await;
        assert_eq!(self.status_of(&ride_id).await, RideStatus::Pickup);
        self.engine
            .set_chair_status(chair_id, &ride_id, RideStatus::Carrying)
            .await
            .unwrap();
        self.move_chair(chair_id, Coordinate::new(0, 10)).await;
        assert_eq!(self.status_of(&ride_id).await, RideStatus::Arrived);
        ride_id
    }
}
