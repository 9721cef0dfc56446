//! Client-side request throttling using the Governor crate

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type SharedRateLimiter = Arc<DefaultDirectRateLimiter>;

/// Build a limiter allowing `requests_per_minute` submits, bursting up to the
/// same amount. Returns `None` when throttling is disabled.
pub fn per_minute(requests_per_minute: Option<u32>) -> Option<SharedRateLimiter> {
    let rpm = NonZeroU32::new(requests_per_minute?)?;
    Some(Arc::new(RateLimiter::direct(Quota::per_minute(rpm))))
}
