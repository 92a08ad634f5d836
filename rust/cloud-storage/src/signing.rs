//! V4 signed URLs.
//!
//! A signed URL grants whoever holds it one action on one object until it
//! expires. Producing one is a pure computation over the request, the current
//! time and the service-account key: nothing is sent over the network and no
//! record of issued URLs is kept.

mod canonical;
mod key;
mod signer;

use std::time::Duration;

pub use canonical::*;
pub use key::*;
pub use signer::*;

use crate::ErrorKind;

/// Name of the signing algorithm, first line of every string-to-sign
pub const ALGORITHM: &str = "GOOG4-HMAC-SHA256";

/// Placeholder used in place of a payload hash; the body is never signed
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Region component of the credential scope
pub const REGION: &str = "auto";

/// Service component of the credential scope
pub const SERVICE: &str = "storage";

/// Terminator of the credential scope
pub const REQUEST_TYPE: &str = "goog4_request";

/// Longest lifetime a signed URL may be given
pub const MAX_EXPIRATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Shortest lifetime a signed URL may be given
pub const MIN_EXPIRATION: Duration = Duration::from_secs(1);

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Check an expiration lies within [MIN_EXPIRATION] and [MAX_EXPIRATION].
pub fn validate_expiration(expiration: Duration) -> Result<(), ErrorKind> {
    if expiration < MIN_EXPIRATION {
        return Err(ErrorKind::InvalidInput(format!(
            "Expiration must be at least {} second, got {expiration:?}",
            MIN_EXPIRATION.as_secs()
        )));
    }

    if expiration > MAX_EXPIRATION {
        return Err(ErrorKind::InvalidInput(format!(
            "Expiration must be at most {} seconds, got {}",
            MAX_EXPIRATION.as_secs(),
            expiration.as_secs()
        )));
    }

    Ok(())
}
