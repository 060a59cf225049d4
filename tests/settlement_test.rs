mod common;

use chair_dispatch::application::engine::PAYMENT_GATEWAY_URL_SETTING;
use chair_dispatch::config::DispatchConfig;
use chair_dispatch::domain::coordinate::Coordinate;
use chair_dispatch::domain::fare::Fare;
use chair_dispatch::domain::ride::RideStatus;
use chair_dispatch::error::DispatchError;
use common::{ScriptedGateway, env, env_with};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_exhausted_retries_leave_ride_arrived() {
    let env = env_with(DispatchConfig::default(), ScriptedGateway::failing(usize::MAX));
    let (ride_id, _) = env.arrived_ride("u1", "c1").await;

    let err = env.engine.submit_evaluation(&ride_id, 5).await.unwrap_err();
    assert!(matches!(err, DispatchError::UpstreamFailure(_)));

    let attempts = env.gateway.attempts();
    assert_eq!(attempts.len(), 6);
    let key = &attempts[0].1.idempotency_key;
    assert!(attempts.iter().all(|(_, request)| &request.idempotency_key == key));

    assert_eq!(env.status_of(&ride_id).await, RideStatus::Arrived);
    assert_eq!(env.ride(&ride_id).await.evaluation, None);
}

#[tokio::test]
async fn test_evaluation_can_be_resubmitted_after_gateway_recovers() {
    let env = env_with(DispatchConfig::default(), ScriptedGateway::failing(usize::MAX));
    let (ride_id, _) = env.arrived_ride("u1", "c1").await;
    env.engine.submit_evaluation(&ride_id, 2).await.unwrap_err();
    let first_key = env.gateway.attempts()[0].1.idempotency_key.clone();

    env.gateway.set_failures(0);
    env.engine.submit_evaluation(&ride_id, 4).await.unwrap();

    let attempts = env.gateway.attempts();
    assert_eq!(attempts.len(), 7);
    assert_ne!(attempts[6].1.idempotency_key, first_key);
    assert_eq!(env.status_of(&ride_id).await, RideStatus::Completed);
    assert_eq!(env.ride(&ride_id).await.evaluation, Some(4));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let env = env_with(DispatchConfig::default(), ScriptedGateway::failing(2));
    let (ride_id, _) = env.arrived_ride("u1", "c1").await;

    env.engine.submit_evaluation(&ride_id, 5).await.unwrap();

    let attempts = env.gateway.attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].1.idempotency_key, attempts[2].1.idempotency_key);
    assert_eq!(env.status_of(&ride_id).await, RideStatus::Completed);
}

#[tokio::test]
async fn test_retry_budget_follows_config() {
    let mut config = DispatchConfig::default();
    config.payment.max_retries = 1;
    let env = env_with(config, ScriptedGateway::failing(2));
    let (ride_id, _) = env.arrived_ride("u1", "c1").await;

    let err = env.engine.submit_evaluation(&ride_id, 5).await.unwrap_err();
    assert!(matches!(err, DispatchError::UpstreamFailure(_)));
    assert_eq!(env.gateway.attempts().len(), 2);
}

#[tokio::test]
async fn test_configured_gateway_url_used_without_setting() {
    let mut config = DispatchConfig::default();
    config.payment.gateway_url = Some("http://fallback.test".to_string());
    let env = env_with(config, ScriptedGateway::accepting());
    let user = env.add_user("u1").await;
    env.engine.register_payment_token(&user, "tok").await.unwrap();
    let chair = env.add_chair("c1", Coordinate::new(0, 0)).await;
    let ride_id = env.drive_to_arrival(&user, &chair).await;

    env.engine.submit_evaluation(&ride_id, 5).await.unwrap();

    let attempts = env.gateway.attempts();
    assert_eq!(attempts[0].0, "http://fallback.test");
    assert_eq!(attempts[0].1.token, "tok");
    assert_eq!(attempts[0].1.amount, Fare(1500));
}

#[tokio::test]
async fn test_missing_gateway_url_is_an_error() {
    let env = env();
    let user = env.add_user("u1").await;
    env.engine.register_payment_token(&user, "tok").await.unwrap();
    let chair = env.add_chair("c1", Coordinate::new(0, 0)).await;
    let ride_id = env.drive_to_arrival(&user, &chair).await;

    let err = env.engine.submit_evaluation(&ride_id, 5).await.unwrap_err();
    assert!(matches!(err, DispatchError::InternalError(_)));
    assert!(env.gateway.attempts().is_empty());
    assert_eq!(env.status_of(&ride_id).await, RideStatus::Arrived);
}

#[tokio::test]
async fn test_gateway_url_setting_is_read_once() {
    let env = env();
    let (first, chair) = env.arrived_ride("u1", "c1").await;
    let user = env.ride(&first).await.user_id;
    env.engine.submit_evaluation(&first, 5).await.unwrap();

    env.put_setting(PAYMENT_GATEWAY_URL_SETTING, "http://moved.test").await;
    let second = env.drive_to_arrival(&user, &chair).await;
    env.engine.submit_evaluation(&second, 5).await.unwrap();

    let urls: Vec<_> = env.gateway.attempts().into_iter().map(|(url, _)| url).collect();
    assert_eq!(urls, vec!["http://payment.test", "http://payment.test"]);
}

#[tokio::test]
async fn test_settlements_run_concurrently_without_blocking_stores() {
    let env = env_with(DispatchConfig::default(), ScriptedGateway::accepting());
    let mut rides = Vec::new();
    for i in 1..=3 {
        let (ride_id, _) = env.arrived_ride(&format!("u{}", i), &format!("c{}", i)).await;
        rides.push(ride_id);
    }
    let idle = env.add_chair("idle", Coordinate::new(100, 100)).await;
    env.gateway.set_delay(Duration::from_millis(300));

    let mut handles = Vec::new();
    for ride_id in &rides {
        let engine = env.engine.clone();
        let ride_id = ride_id.clone();
        handles.push(tokio::spawn(async move { engine.submit_evaluation(&ride_id, 5).await }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    env.engine
        .report_chair_location(&idle, Coordinate::new(101, 100))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200), "took {:?}", started.elapsed());

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(env.gateway.max_in_flight() >= 2);
    for ride_id in &rides {
        assert_eq!(env.status_of(ride_id).await, RideStatus::Completed);
    }
}

#[tokio::test]
async fn test_concurrent_evaluations_of_one_ride_charge_once() {
    let env = env_with(DispatchConfig::default(), ScriptedGateway::accepting());
    let (ride_id, _) = env.arrived_ride("u1", "c1").await;
    env.gateway.set_delay(Duration::from_millis(100));

    let first = {
        let engine = env.engine.clone();
        let ride_id = ride_id.clone();
        tokio::spawn(async move { engine.submit_evaluation(&ride_id, 5).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = env.engine.submit_evaluation(&ride_id, 3).await.unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));

    first.await.unwrap().unwrap();
    assert_eq!(env.gateway.attempts().len(), 1);
    assert_eq!(env.ride(&ride_id).await.evaluation, Some(5));

    let err = env.engine.submit_evaluation(&ride_id, 3).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState(_)));
}
