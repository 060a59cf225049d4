use super::coupons;
use super::location_worker::LocationWorkerPool;
use super::notifications::{
    AssignedChair, ChairNotification, NotificationHub, NotifyEvent, Rider, RiderNotification, Snapshot,
    delivery_stream,
};
use super::registry::Registry;
use super::scope::commit_both;
use super::settlement::PaymentSettlement;
use crate::config::DispatchConfig;
use crate::domain::chair::{ChairProfile, LocationUpdate};
use crate::domain::coordinate::Coordinate;
use crate::domain::coupon::PaymentToken;
use crate::domain::fare::Fare;
use crate::domain::ids::{ChairId, RideId, UserId};
use crate::domain::ports::{CoreStoreRef, CoreTx, PaymentGatewayRef, StatusStoreRef, StatusTx, Transaction};
use crate::domain::ride::{Ride, RideStatus, validate_evaluation};
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Settings row holding the payment gateway base URL.
pub const PAYMENT_GATEWAY_URL_SETTING: &str = "payment_gateway_url";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FareEstimate {
    pub fare: Fare,
    pub discount: Fare,
}

/// Ride row joined with its current status and fare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideSummary {
    pub ride: Ride,
    pub status: RideStatus,
    pub fare: Fare,
}

struct PendingCharge {
    ride: Ride,
    token: String,
    fare: Fare,
    base_url: String,
}

/// Marks a ride as settling for as long as it lives.
struct SettlementClaim<'a> {
    settling: &'a Registry<RideId, ()>,
    ride_id: RideId,
}

impl<'a> SettlementClaim<'a> {
    fn acquire(settling: &'a Registry<RideId, ()>, ride_id: &RideId) -> Result<Self> {
        if !settling.insert_if_absent(ride_id.clone(), ()) {
            return Err(DispatchError::Conflict(format!("evaluation of ride {} is already in progress", ride_id)));
        }
        Ok(Self {
            settling,
            ride_id: ride_id.clone(),
        })
    }
}

impl Drop for SettlementClaim<'_> {
    fn drop(&mut self) {
        self.settling.remove(&self.ride_id);
    }
}

/// The dispatch and settlement engine.
///
/// `DispatchEngine` owns the two transactional store scopes, the payment
/// settlement, the notification hub and the location batchers. It is cheap
/// to clone; clones share all state.
///
/// Cross-scope operations always open the core transaction before the status
/// one and commit in the same order.
#[derive(Clone)]
pub struct DispatchEngine {
    pub(super) config: Arc<DispatchConfig>,
    pub(super) core: CoreStoreRef,
    pub(super) status: StatusStoreRef,
    pub(super) hub: Arc<NotificationHub>,
    locations: Arc<LocationWorkerPool>,
    settlement: Arc<PaymentSettlement>,
    /// Chairs currently serving a ride, with that ride.
    pub(super) chairs_in_ride: Arc<Registry<ChairId, Ride>>,
    chair_profiles: Arc<Registry<ChairId, ChairProfile>>,
    /// Rides whose evaluation is being settled.
    settling: Arc<Registry<RideId, ()>>,
    riders: Arc<Registry<UserId, Rider>>,
    last_positions: Arc<Registry<ChairId, Coordinate>>,
    settings: Arc<Registry<String, String>>,
}

impl DispatchEngine {
    /// Creates a new engine and starts its location batchers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Tunables for every component.
    /// * `core` - Store scope for rides, chairs, users, tokens and settings.
    /// * `status` - Store scope for ride statuses and coupons.
    /// * `gateway` - Client for the external payment gateway.
    pub fn new(config: DispatchConfig, core: CoreStoreRef, status: StatusStoreRef, gateway: PaymentGatewayRef) -> Self {
        let locations = LocationWorkerPool::spawn(core.clone(), &config.locations);
        let settlement = PaymentSettlement::new(gateway, config.payment.max_concurrency, config.payment.max_retries);
        Self {
            hub: Arc::new(NotificationHub::new(config.notifications.queue_capacity)),
            locations: Arc::new(locations),
            settlement: Arc::new(settlement),
            chairs_in_ride: Arc::new(Registry::new()),
            chair_profiles: Arc::new(Registry::new()),
            settling: Arc::new(Registry::new()),
            riders: Arc::new(Registry::new()),
            last_positions: Arc::new(Registry::new()),
            settings: Arc::new(Registry::new()),
            config: Arc::new(config),
            core,
            status,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Requests a ride. Claims the best available coupon for it and returns
    /// the discounted fare.
    ///
    /// Fails with `Conflict` while the rider has a ride not yet evaluated.
    pub async fn create_ride(&self, user_id: &UserId, pickup: Coordinate, destination: Coordinate) -> Result<(RideId, Fare)> {
        let now = Utc::now();
        let mut core = self.core.begin().await?;
        let mut status = self.status.begin().await?;

        if core.user(user_id).await?.is_none() {
            return Err(DispatchError::ValidationError(format!("user {} is not registered", user_id)));
        }
        if core.count_open_rides(user_id).await? > 0 {
            return Err(DispatchError::Conflict("ride already exists".to_string()));
        }
        let first_ride = core.count_rides(user_id).await? == 0;

        let ride = Ride::new(user_id.clone(), pickup, destination, now);
        core.insert_ride(ride.clone()).await?;
        status.insert_status(&ride.id, RideStatus::Matching, now).await?;
        let discount = coupons::claim_for_ride(status.as_mut(), user_id, &ride.id, first_ride).await?;
        let fare = self.config.fares.discounted(&pickup, &destination, discount);

        commit_both(core, status, "create_ride").await?;
        info!(ride_id = %ride.id, %user_id, %fare, %discount, "ride requested");
        Ok((ride.id, fare))
    }

    /// Quotes a ride without creating it. `discount` is what the rider saves
    /// compared with the undiscounted fare.
    pub async fn estimate_fare(&self, user_id: &UserId, pickup: Coordinate, destination: Coordinate) -> Result<FareEstimate> {
        let mut status = self.status.begin().await?;
        let coupon = coupons::preview_discount(status.as_mut(), user_id).await?;
        let fare = self.config.fares.discounted(&pickup, &destination, coupon);
        let discount = self.config.fares.fare(&pickup, &destination) - fare;
        Ok(FareEstimate { fare, discount })
    }

    /// Records the rider's evaluation, charges the final fare and completes
    /// the ride. Nothing is applied unless the payment goes through.
    ///
    /// The gateway is called with no store transaction open. Only one
    /// evaluation per ride may be settling at a time; a concurrent one fails
    /// with `Conflict`.
    ///
    /// Returns the completion time.
    pub async fn submit_evaluation(&self, ride_id: &RideId, evaluation: u8) -> Result<DateTime<Utc>> {
        validate_evaluation(evaluation)?;
        let _claim = SettlementClaim::acquire(&self.settling, ride_id)?;

        let charge = self.prepare_charge(ride_id).await?;
        self.settlement.settle(&charge.base_url, &charge.token, charge.fare).await?;

        let fare = charge.fare;
        let ride = match self.complete_ride(charge.ride, evaluation).await {
            Ok(ride) => ride,
            Err(err) => {
                error!(%ride_id, %fare, error = %err, "payment settled but ride completion failed");
                return Err(err);
            }
        };
        if let Some(chair_id) = &ride.chair_id {
            self.chairs_in_ride.remove(chair_id);
        }
        info!(%ride_id, evaluation, %fare, "ride completed");
        self.hub.publish(&ride, RideStatus::Completed);
        Ok(ride.updated_at)
    }

    /// Checks the ride may complete and gathers what the payment needs, in
    /// read-only transactions that end before the gateway is called.
    async fn prepare_charge(&self, ride_id: &RideId) -> Result<PendingCharge> {
        let mut core = self.core.begin().await?;
        let mut status = self.status.begin().await?;

        let ride = core
            .ride(ride_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("ride {}", ride_id)))?;
        let current = status
            .latest_status(ride_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("status for ride {}", ride_id)))?;
        current.advance_to(RideStatus::Completed)?;

        let token = core
            .payment_token(&ride.user_id)
            .await?
            .ok_or_else(|| DispatchError::ValidationError("payment token not registered".to_string()))?;
        let fare = self.ride_fare(status.as_mut(), &ride).await?;
        let base_url = self.payment_gateway_url(core.as_mut()).await?;
        Ok(PendingCharge {
            ride,
            token: token.token,
            fare,
            base_url,
        })
    }

    /// Writes the evaluation and `COMPLETED` after re-checking the ride is
    /// still `ARRIVED`.
    async fn complete_ride(&self, mut ride: Ride, evaluation: u8) -> Result<Ride> {
        let now = Utc::now();
        let mut core = self.core.begin().await?;
        let mut status = self.status.begin().await?;

        let current = status
            .latest_status(&ride.id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("status for ride {}", ride.id)))?;
        let completed = current.advance_to(RideStatus::Completed)?;
        if !core.set_evaluation(&ride.id, evaluation, now).await? {
            return Err(DispatchError::NotFound(format!("ride {}", ride.id)));
        }
        ride.evaluate(evaluation, now)?;
        status.update_status(&ride.id, completed, now).await?;

        commit_both(core, status, "submit_evaluation").await?;
        Ok(ride)
    }

    /// Accepts a chair position. The position itself is written by the
    /// location batchers; reaching the pickup or destination of the chair's
    /// ride is detected here and advances the ride right away.
    ///
    /// Returns the time the position was recorded.
    pub async fn report_chair_location(&self, chair_id: &ChairId, coordinate: Coordinate) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let cached_ride = self.chairs_in_ride.get(chair_id);
        let (stored_position, ride) = match cached_ride {
            Some(ride) if self.last_positions.contains(chair_id) => (None, Some(ride)),
            cached_ride => {
                let mut core = self.core.begin().await?;
                let chair = core
                    .chair(chair_id)
                    .await?
                    .ok_or_else(|| DispatchError::NotFound(format!("chair {}", chair_id)))?;
                self.chair_profiles.insert(chair_id.clone(), ChairProfile::from(&chair));
                let ride = match cached_ride {
                    Some(ride) => Some(ride),
                    None => core.latest_ride_for_chair(chair_id).await?,
                };
                (chair.location, ride)
            }
        };

        // Swapped atomically so concurrent reports for one chair each measure
        // from the position before their own.
        let previous = self
            .last_positions
            .replace(chair_id.clone(), coordinate)
            .or(stored_position);
        let distance_delta = previous.map(|p| p.distance_to(&coordinate)).unwrap_or(0);
        self.locations
            .enqueue(LocationUpdate {
                chair_id: chair_id.clone(),
                coordinate,
                distance_delta,
                recorded_at: now,
            })
            .await?;

        if let Some(ride) = ride {
            self.advance_on_arrival(&ride, coordinate, now).await?;
        }
        Ok(now)
    }

    async fn advance_on_arrival(&self, ride: &Ride, coordinate: Coordinate, now: DateTime<Utc>) -> Result<()> {
        let mut status = self.status.begin().await?;
        let Some(current) = status.latest_status(&ride.id).await? else {
            return Ok(());
        };
        let reached = match current {
            RideStatus::Enroute if coordinate == ride.pickup => RideStatus::Pickup,
            RideStatus::Carrying if coordinate == ride.destination => RideStatus::Arrived,
            _ => return Ok(()),
        };
        let next = current.advance_to(reached)?;
        status.update_status(&ride.id, next, now).await?;
        status.commit().await?;
        debug!(ride_id = %ride.id, status = %next, "chair reached ride waypoint");
        self.hub.publish(ride, next);
        Ok(())
    }

    /// Chair-acknowledged transitions: `ENROUTE` once the chair heads to the
    /// pickup, `CARRYING` once the rider is aboard.
    pub async fn set_chair_status(&self, chair_id: &ChairId, ride_id: &RideId, target: RideStatus) -> Result<()> {
        if !matches!(target, RideStatus::Enroute | RideStatus::Carrying) {
            return Err(DispatchError::ValidationError(format!("invalid status {}", target)));
        }
        let ride = self.load_ride(ride_id).await?;
        if ride.chair_id.as_ref() != Some(chair_id) {
            return Err(DispatchError::Conflict(format!("chair {} is not assigned to ride {}", chair_id, ride_id)));
        }

        let mut status = self.status.begin().await?;
        let current = status
            .latest_status(ride_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("status for ride {}", ride_id)))?;
        let next = current.advance_to(target)?;
        status.update_status(ride_id, next, Utc::now()).await?;
        status.commit().await?;

        debug!(%ride_id, %chair_id, status = %next, "chair updated ride status");
        self.hub.publish(&ride, next);
        Ok(())
    }

    pub async fn register_payment_token(&self, user_id: &UserId, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(DispatchError::ValidationError("token is required but was empty".to_string()));
        }
        let mut core = self.core.begin().await?;
        if core.user(user_id).await?.is_none() {
            return Err(DispatchError::NotFound(format!("user {}", user_id)));
        }
        core.upsert_payment_token(PaymentToken {
            user_id: user_id.clone(),
            token: token.to_string(),
        })
        .await?;
        core.commit().await
    }

    /// Marks a chair as accepting rides or not. Inactive chairs are ignored
    /// by matching.
    pub async fn set_chair_activity(&self, chair_id: &ChairId, active: bool) -> Result<()> {
        let mut core = self.core.begin().await?;
        if !core.set_chair_active(chair_id, active).await? {
            return Err(DispatchError::NotFound(format!("chair {}", chair_id)));
        }
        core.commit().await?;
        debug!(%chair_id, active, "chair activity changed");
        Ok(())
    }

    /// Waits until every position reported so far has been written.
    pub async fn sync_locations(&self) -> Result<()> {
        self.locations.sync().await
    }

    pub fn subscribe_rider(&self, user_id: &UserId) -> BoxStream<'static, Result<Snapshot<RiderNotification>>> {
        let engine = self.clone();
        delivery_stream(self.hub.rider_queue(user_id), move |event| {
            let engine = engine.clone();
            async move { engine.rider_notification(event).await }
        })
    }

    pub fn subscribe_chair(&self, chair_id: &ChairId) -> BoxStream<'static, Result<Snapshot<ChairNotification>>> {
        let engine = self.clone();
        delivery_stream(self.hub.chair_queue(chair_id), move |event| {
            let engine = engine.clone();
            async move { engine.chair_notification(event).await }
        })
    }

    /// Events dropped so far because a subscriber's queue was full.
    pub fn dropped_notifications(&self) -> u64 {
        self.hub.dropped_events()
    }

    pub async fn ride_summary(&self, ride_id: &RideId) -> Result<RideSummary> {
        let ride = self.load_ride(ride_id).await?;
        let mut status = self.status.begin().await?;
        let current = status
            .latest_status(ride_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("status for ride {}", ride_id)))?;
        let fare = self.ride_fare(status.as_mut(), &ride).await?;
        Ok(RideSummary {
            ride,
            status: current,
            fare,
        })
    }

    async fn load_ride(&self, ride_id: &RideId) -> Result<Ride> {
        let mut core = self.core.begin().await?;
        let ride = core.ride(ride_id).await?;
        ride.ok_or_else(|| DispatchError::NotFound(format!("ride {}", ride_id)))
    }

    pub(super) async fn ride_fare(&self, status: &mut dyn StatusTx, ride: &Ride) -> Result<Fare> {
        let discount = coupons::discount_for_ride(status, &ride.id).await?;
        Ok(self.config.fares.discounted(&ride.pickup, &ride.destination, discount))
    }

    /// Gateway base URL: the `payment_gateway_url` setting, cached once read,
    /// or the configured default.
    async fn payment_gateway_url(&self, core: &mut dyn CoreTx) -> Result<String> {
        let key = PAYMENT_GATEWAY_URL_SETTING.to_string();
        if let Some(url) = self.settings.get(&key) {
            return Ok(url);
        }
        if let Some(url) = core.setting(PAYMENT_GATEWAY_URL_SETTING).await? {
            self.settings.insert(key, url.clone());
            return Ok(url);
        }
        self.config
            .payment
            .gateway_url
            .clone()
            .ok_or_else(|| DispatchError::internal("payment gateway url is not configured"))
    }

    async fn rider_notification(&self, event: NotifyEvent) -> Result<RiderNotification> {
        let NotifyEvent { ride, status } = event;
        let chair = match &ride.chair_id {
            Some(chair_id) => Some(self.assigned_chair(chair_id).await?),
            None => None,
        };
        let fare = {
            let mut tx = self.status.begin().await?;
            self.ride_fare(tx.as_mut(), &ride).await?
        };
        Ok(RiderNotification {
            ride_id: ride.id,
            pickup_coordinate: ride.pickup,
            destination_coordinate: ride.destination,
            fare,
            status,
            chair,
            created_at: ride.created_at.timestamp_millis(),
            updated_at: ride.updated_at.timestamp_millis(),
        })
    }

    async fn assigned_chair(&self, chair_id: &ChairId) -> Result<AssignedChair> {
        let mut core = self.core.begin().await?;
        let profile = self.chair_profile(core.as_mut(), chair_id).await?;
        let stats = core.chair_stats(chair_id).await?;
        Ok(AssignedChair {
            id: profile.id,
            name: profile.name,
            model: profile.model,
            stats,
        })
    }

    /// Chair identity, from the cache or read once through `core`.
    pub(super) async fn chair_profile(&self, core: &mut dyn CoreTx, chair_id: &ChairId) -> Result<ChairProfile> {
        if let Some(profile) = self.chair_profiles.get(chair_id) {
            return Ok(profile);
        }
        let chair = core
            .chair(chair_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("chair {}", chair_id)))?;
        let profile = ChairProfile::from(&chair);
        self.chair_profiles.insert(chair_id.clone(), profile.clone());
        Ok(profile)
    }

    async fn chair_notification(&self, event: NotifyEvent) -> Result<ChairNotification> {
        let NotifyEvent { ride, status } = event;
        let user = match self.riders.get(&ride.user_id) {
            Some(rider) => rider,
            None => {
                let mut core = self.core.begin().await?;
                let name = match core.user(&ride.user_id).await? {
                    Some(user) => user.display_name(),
                    None => ride.user_id.to_string(),
                };
                let rider = Rider {
                    id: ride.user_id.clone(),
                    name,
                };
                self.riders.insert(ride.user_id.clone(), rider.clone());
                rider
            }
        };
        Ok(ChairNotification {
            ride_id: ride.id,
            user,
            pickup_coordinate: ride.pickup,
            destination_coordinate: ride.destination,
            status,
        })
    }
}
