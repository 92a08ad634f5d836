use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::{REGION, REQUEST_TYPE, SERVICE};
use crate::SigningIdentity;

/// HMAC key for one account on one calendar date.
#[derive(Clone)]
pub struct SigningKey(Hmac<Sha256>);

impl SigningKey {
    /// Derive the key for `date` (`YYYYMMDD`) from the account secret.
    pub fn derive(secret: &[u8], date: &str) -> Self {
        let mut seed = b"GOOG4".to_vec();
        seed.extend_from_slice(secret);

        let date_key = hmac_sha256(&seed, date.as_bytes());
        let region_key = hmac_sha256(&date_key, REGION.as_bytes());
        let service_key = hmac_sha256(&region_key, SERVICE.as_bytes());
        let signing_key = hmac_sha256(&service_key, REQUEST_TYPE.as_bytes());

        Self(Hmac::new_from_slice(&signing_key).expect("HMAC can take key of any size"))
    }

    /// Sign a message with this key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let mut mac = self.0.clone();
        mac.update(message);
        Signature(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// An HMAC-SHA256 signature, displayed as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Raw signature bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

struct CachedKey {
    fingerprint: [u8; 32],
    key: SigningKey,
}

/// Signing keys cached per account and date.
///
/// Entries for other dates are dropped whenever a new date is derived, so the
/// cache holds at most one date's worth of keys. A rotated secret for the same
/// account is detected by fingerprint and re-derived.
#[derive(Default)]
pub struct SigningKeyCache {
    entries: RwLock<HashMap<(String, String), CachedKey>>,
    derivations: AtomicUsize,
}

impl SigningKeyCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The key for `identity` on `date`, deriving it on a miss.
    pub fn get(&self, identity: &SigningIdentity, date: &str) -> SigningKey {
        let fingerprint: [u8; 32] = Sha256::digest(identity.secret()).into();
        let entry_key = (identity.account().to_string(), date.to_string());

        if let Some(cached) = self.entries.read().get(&entry_key) {
            if cached.fingerprint == fingerprint {
                return cached.key.clone();
            }
        }

        let key = SigningKey::derive(identity.secret(), date);
        self.derivations.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.write();
        entries.retain(|(_, cached_date), _| cached_date == date);
        entries.insert(
            entry_key,
            CachedKey {
                fingerprint,
                key: key.clone(),
            },
        );

        key
    }

    /// How many keys have been derived since the cache was created
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for SigningKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyCache")
            .field("entries", &self.len())
            .field("derivations", &self.derivations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_derives_keys_deterministically() {
        let first = SigningKey::derive(b"secret", "20250507").sign(b"message");
        let second = SigningKey::derive(b"secret", "20250507").sign(b"message");
        let other_day = SigningKey::derive(b"secret", "20250508").sign(b"message");

        assert_eq!(first, second);
        assert_ne!(first, other_day);
        assert_eq!(first.to_string().len(), 64);
        assert!(
            first
                .to_string()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn it_caches_keys_per_account_and_date() {
        let cache = SigningKeyCache::new();
        let alice = SigningIdentity::new("alice@test.iam", b"alice-secret".to_vec());
        let bob = SigningIdentity::new("bob@test.iam", b"bob-secret".to_vec());

        cache.get(&alice, "20250507");
        cache.get(&alice, "20250507");
        cache.get(&bob, "20250507");

        assert_eq!(cache.derivations(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn it_evicts_keys_from_previous_dates() {
        let cache = SigningKeyCache::new();
        let alice = SigningIdentity::new("alice@test.iam", b"alice-secret".to_vec());

        cache.get(&alice, "20250507");
        cache.get(&alice, "20250508");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.derivations(), 2);
    }

    #[test]
    fn it_rederives_when_the_secret_rotates() {
        let cache = SigningKeyCache::new();
        let before = SigningIdentity::new("alice@test.iam", b"old".to_vec());
        let after = SigningIdentity::new("alice@test.iam", b"new".to_vec());

        let old_signature = cache.get(&before, "20250507").sign(b"payload");
        let new_signature = cache.get(&after, "20250507").sign(b"payload");

        assert_ne!(old_signature, new_signature);
        assert_eq!(cache.derivations(), 2);
    }
}
