//! Domain types and the ports the engine depends on.

pub mod chair;
pub mod coordinate;
pub mod coupon;
pub mod fare;
pub mod ids;
pub mod ports;
pub mod ride;
