//! Coupon selection and claiming.
//!
//! All lookups go through a status-scope transaction, so the coupon rows a
//! caller reads stay locked until it commits or drops the transaction.

use crate::domain::coupon::{Coupon, WELCOME_COUPON_CODE};
use crate::domain::fare::Fare;
use crate::domain::ids::{RideId, UserId};
use crate::domain::ports::StatusTx;
use crate::error::Result;
use std::collections::HashSet;
use tracing::debug;

/// Discount already bound to `ride_id`, or zero.
pub async fn discount_for_ride(tx: &mut dyn StatusTx, ride_id: &RideId) -> Result<Fare> {
    Ok(tx
        .coupon_for_ride(ride_id)
        .await?
        .map(|coupon| coupon.discount)
        .unwrap_or(Fare::ZERO))
}

/// Discount a ride requested now would get, without claiming anything.
/// The welcome coupon wins while unused, then the oldest grant.
pub async fn preview_discount(tx: &mut dyn StatusTx, user_id: &UserId) -> Result<Fare> {
    if let Some(coupon) = tx.unused_coupon(user_id, WELCOME_COUPON_CODE).await? {
        return Ok(coupon.discount);
    }
    Ok(tx
        .oldest_unused_coupon(user_id)
        .await?
        .map(|coupon| coupon.discount)
        .unwrap_or(Fare::ZERO))
}

/// Binds the best unused coupon of `user_id` to `ride_id` and returns its
/// discount. On a rider's first ride the welcome coupon is tried first; every
/// other ride takes the oldest grant. A coupon someone else claimed first is
/// skipped and the next candidate tried, down to no discount at all.
pub async fn claim_for_ride(
    tx: &mut dyn StatusTx,
    user_id: &UserId,
    ride_id: &RideId,
    first_ride: bool,
) -> Result<Fare> {
    let mut tried: HashSet<String> = HashSet::new();

    if first_ride {
        if let Some(coupon) = tx.unused_coupon(user_id, WELCOME_COUPON_CODE).await? {
            if try_bind(tx, &coupon, ride_id).await? {
                return Ok(coupon.discount);
            }
            tried.insert(coupon.code);
        }
    }

    while let Some(coupon) = tx.oldest_unused_coupon(user_id).await? {
        if !tried.insert(coupon.code.clone()) {
            break;
        }
        if try_bind(tx, &coupon, ride_id).await? {
            return Ok(coupon.discount);
        }
    }

    Ok(Fare::ZERO)
}

async fn try_bind(tx: &mut dyn StatusTx, coupon: &Coupon, ride_id: &RideId) -> Result<bool> {
    let bound = tx.bind_coupon(&coupon.user_id, &coupon.code, ride_id).await?;
    if bound {
        debug!(user_id = %coupon.user_id, code = %coupon.code, %ride_id, discount = %coupon.discount, "coupon claimed");
    } else {
        debug!(user_id = %coupon.user_id, code = %coupon.code, %ride_id, "coupon already claimed");
    }
    Ok(bound)
}
