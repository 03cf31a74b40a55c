//! Provisioned credentials and their secrets
//!
//! Only the SHA-256 hash of a secret is ever stored. Secrets carry 256 bits of
//! randomness, so an unsalted digest is enough and keeps lookup-by-hash a
//! single indexed query.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::net::IpAddr;

use super::permissions::{PermissionSet, Role};

/// Random bytes in a generated secret
const SECRET_BYTES: usize = 32;

/// A provisioned principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub principal_id: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub role: Role,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub active: bool,
    pub rate_limit_per_hour: u32,
    /// `None` allows any address
    pub allowed_ips: Option<BTreeSet<IpAddr>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Whether a request from `ip` may use this credential
    ///
    /// With an allow-list configured, a request without a known address is
    /// refused.
    pub fn allows_ip(&self, ip: Option<IpAddr>) -> bool {
        match (&self.allowed_ips, ip) {
            (None, _) => true,
            (Some(allowed), _) if allowed.is_empty() => true,
            (Some(allowed), Some(ip)) => allowed.contains(&ip),
            (Some(_), None) => false,
        }
    }
}

/// Request to provision a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub principal_id: String,
    pub role: Role,
    pub expires_at: Option<DateTime<Utc>>,
    /// Falls back to the configured default
    pub rate_limit_per_hour: Option<u32>,
    pub allowed_ips: Option<BTreeSet<IpAddr>>,
}

impl NewCredential {
    pub fn new(principal_id: impl Into<String>, role: Role) -> Self {
        Self {
            principal_id: principal_id.into(),
            role,
            expires_at: None,
            rate_limit_per_hour: None,
            allowed_ips: None,
        }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn rate_limit(mut self, per_hour: u32) -> Self {
        self.rate_limit_per_hour = Some(per_hour);
        self
    }

    pub fn allow_ips(mut self, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.allowed_ips = Some(ips.into_iter().collect());
        self
    }
}

/// Generate a fresh secret: `prefix` followed by URL-safe base64
pub fn generate_secret(prefix: &str) -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// One-way hash used to store and look up secrets
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential() -> Credential {
        Credential {
            principal_id: "agent-1".to_string(),
            secret_hash: hash_secret("s"),
            role: Role::Agent,
            permissions: Role::Agent.permissions(),
            created_at: Utc::now(),
            expires_at: None,
            last_used: None,
            active: true,
            rate_limit_per_hour: 10,
            allowed_ips: None,
        }
    }

    #[test]
    fn test_generated_secrets_are_unique_and_prefixed() {
        let a = generate_secret("bwk_");
        let b = generate_secret("bwk_");
        assert_ne!(a, b);
        assert!(a.starts_with("bwk_"));
        assert_eq!(a.len(), 4 + 43);
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_secret("secret");
        assert_eq!(hash, hash_secret("secret"));
        assert_ne!(hash, hash_secret("secret2"));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut cred = credential();
        assert!(!cred.is_expired(now));
        cred.expires_at = Some(now - Duration::seconds(1));
        assert!(cred.is_expired(now));
    }

    #[test]
    fn test_ip_allow_list() {
        let mut cred = credential();
        let allowed: IpAddr = "10.0.0.5".parse().unwrap();
        let other: IpAddr = "10.0.0.6".parse().unwrap();
        assert!(cred.allows_ip(None));

        cred.allowed_ips = Some([allowed].into_iter().collect());
        assert!(cred.allows_ip(Some(allowed)));
        assert!(!cred.allows_ip(Some(other)));
        assert!(!cred.allows_ip(None));
    }

    #[test]
    fn test_hash_not_serialized() {
        let json = serde_json::to_string(&credential()).unwrap();
        assert!(!json.contains("secret_hash"));
    }
}
