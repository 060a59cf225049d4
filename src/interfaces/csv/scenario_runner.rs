use super::ride_writer::RideReportRow;
use super::scenario_reader::{ScenarioOp, ScenarioStep};
use crate::application::engine::DispatchEngine;
use crate::domain::chair::{Chair, User};
use crate::domain::coupon::Coupon;
use crate::domain::fare::Fare;
use crate::domain::ids::{ChairId, OwnerId, RideId, UserId};
use crate::domain::ports::{CoreStoreRef, CoreTx, StatusStoreRef, StatusTx, Transaction};
use crate::domain::ride::RideStatus;
use crate::error::{DispatchError, Result};
use chrono::Utc;
use std::collections::HashMap;
use tracing::info;

/// Replays scenario steps against an engine.
///
/// Registration steps (users, chairs, coupons, settings) belong to the
/// account layer and are written straight to the stores. Everything else
/// goes through the engine. Rides are referred to by the label the scenario
/// gives them.
pub struct ScenarioRunner {
    engine: DispatchEngine,
    core: CoreStoreRef,
    status: StatusStoreRef,
    labels: HashMap<String, RideId>,
    /// Labels in creation order.
    order: Vec<String>,
}

impl ScenarioRunner {
    pub fn new(engine: DispatchEngine, core: CoreStoreRef, status: StatusStoreRef) -> Self {
        Self {
            engine,
            core,
            status,
            labels: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub async fn apply(&mut self, step: ScenarioStep) -> Result<()> {
        match step.op {
            ScenarioOp::User => {
                let name = step.target.clone().unwrap_or_default();
                let (firstname, lastname) = name.split_once(' ').unwrap_or((name.as_str(), ""));
                let user = User {
                    id: UserId::from(step.subject.as_str()),
                    firstname: firstname.to_string(),
                    lastname: lastname.to_string(),
                };
                let mut core = self.core.begin().await?;
                core.insert_user(user).await?;
                core.commit().await
            }
            ScenarioOp::Chair => {
                let chair = Chair::new(
                    ChairId::from(step.subject.as_str()),
                    OwnerId::from(step.target()?),
                    step.subject.as_str(),
                    step.value.clone().unwrap_or_else(|| "standard".to_string()),
                );
                let mut core = self.core.begin().await?;
                core.insert_chair(chair).await?;
                core.commit().await
            }
            ScenarioOp::Coupon => {
                let discount = parse::<i64>(step.value()?, "discount")?;
                let coupon = Coupon::new(
                    UserId::from(step.subject.as_str()),
                    step.target()?,
                    Fare(discount),
                    Utc::now(),
                );
                let mut status = self.status.begin().await?;
                status.grant_coupon(coupon).await?;
                status.commit().await
            }
            ScenarioOp::Token => {
                self.engine
                    .register_payment_token(&UserId::from(step.subject.as_str()), step.value()?)
                    .await
            }
            ScenarioOp::Setting => {
                let mut core = self.core.begin().await?;
                core.put_setting(&step.subject, step.value()?).await?;
                core.commit().await
            }
            ScenarioOp::Ride => {
                if self.labels.contains_key(&step.subject) {
                    return Err(DispatchError::ValidationError(format!("ride label {} already used", step.subject)));
                }
                let (ride_id, fare) = self
                    .engine
                    .create_ride(&UserId::from(step.target()?), step.first_point()?, step.second_point()?)
                    .await?;
                info!(label = %step.subject, %ride_id, %fare, "scenario ride created");
                self.labels.insert(step.subject.clone(), ride_id);
                self.order.push(step.subject);
                Ok(())
            }
            ScenarioOp::Estimate => {
                let estimate = self
                    .engine
                    .estimate_fare(&UserId::from(step.target()?), step.first_point()?, step.second_point()?)
                    .await?;
                info!(user_id = %step.target()?, fare = %estimate.fare, discount = %estimate.discount, "fare estimate");
                Ok(())
            }
            ScenarioOp::Match => self.engine.run_matching_pass().await.map(|_| ()),
            ScenarioOp::Move => {
                self.engine
                    .report_chair_location(&ChairId::from(step.subject.as_str()), step.first_point()?)
                    .await?;
                self.engine.sync_locations().await
            }
            ScenarioOp::Status => {
                let target = step.value()?.parse::<RideStatus>()?;
                let ride_id = self.ride_id(step.target()?)?;
                self.engine
                    .set_chair_status(&ChairId::from(step.subject.as_str()), &ride_id, target)
                    .await
            }
            ScenarioOp::Evaluate => {
                let evaluation = parse::<u8>(step.value()?, "evaluation")?;
                let ride_id = self.ride_id(step.target()?)?;
                self.engine.submit_evaluation(&ride_id, evaluation).await.map(|_| ())
            }
            ScenarioOp::Activity => {
                let active = parse::<bool>(step.value()?, "activity")?;
                self.engine
                    .set_chair_activity(&ChairId::from(step.subject.as_str()), active)
                    .await
            }
        }
    }

    /// Current state of every ride the scenario created, in creation order.
    pub async fn report(&self) -> Result<Vec<RideReportRow>> {
        let mut rows = Vec::with_capacity(self.order.len());
        for label in &self.order {
            let summary = self.engine.ride_summary(&self.ride_id(label)?).await?;
            rows.push(RideReportRow {
                ride: label.clone(),
                user: summary.ride.user_id,
                chair: summary.ride.chair_id,
                status: summary.status,
                fare: summary.fare,
                evaluation: summary.ride.evaluation,
            });
        }
        Ok(rows)
    }

    fn ride_id(&self, label: &str) -> Result<RideId> {
        self.labels
            .get(label)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("ride labelled {}", label)))
    }
}

fn parse<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| DispatchError::ValidationError(format!("invalid {}: {}", what, raw)))
}
