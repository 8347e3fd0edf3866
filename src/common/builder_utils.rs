use std::time::Duration;

use crate::{Expiration, InvalidExpiration};

const YEAR_SECONDS: u64 = 365 * 24 * 3600;

pub(crate) const MAX_EXPIRATION: Duration = Duration::from_secs(1_000 * YEAR_SECONDS);

pub(crate) fn ensure_expiration(expiration: Expiration) -> Result<(), InvalidExpiration> {
    match expiration.duration() {
        Some(d) if d > MAX_EXPIRATION => Err(InvalidExpiration::TooLong(d)),
        _ => Ok(()),
    }
}

pub(crate) fn ensure_expiration_or_panic(time_to_live: Expiration) {
    if let Err(e) = ensure_expiration(time_to_live) {
        panic!("time_to_live is invalid: {e}");
    }
}
