//! Application layer orchestrating the dispatch engine.
//!
//! `DispatchEngine` is the entry point for every ride operation. Around it sit
//! the background workers (location batchers, matching scheduler), the
//! per-subscriber notification queues and the payment settlement.

pub mod coupons;
pub mod engine;
pub mod location_worker;
pub mod matching;
pub mod notifications;
pub mod queries;
pub mod registry;
pub mod scheduler;
pub mod scope;
pub mod settlement;
