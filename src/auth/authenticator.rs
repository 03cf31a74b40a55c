//! Credential authentication and session management
//!
//! Refusals are uniform to the caller ("authentication failed") while the
//! audit log keeps the precise [`AuthFailure`] reason. The hourly rate limit
//! is checked after the read-only credential checks and before any state
//! changes.

use bulwark_core_resilience::{Clock, HourlyRateLimiter};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::credential::{generate_secret, hash_secret, Credential, NewCredential};
use super::permissions::Permission;
use super::session::{AuthContext, Session, SessionCache};
use crate::config::AuthConfig;
use crate::error::{AuthFailure, BulwarkError, Result};
use crate::monitor::{labels, MetricsCollector};
use crate::store::{AuditAction, AuditEntry, Store};

/// Persisted counters older than this many hour buckets are pruned on flush
const COUNTER_RETENTION_HOURS: i64 = 24 * 7;

/// Authentication activity over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStats {
    pub window_hours: u32,
    pub total_attempts: usize,
    pub successful: usize,
    pub failed: usize,
    /// Authentication failures keyed by reason code
    pub failures_by_reason: BTreeMap<String, usize>,
    pub session_validation_failures: usize,
    pub unique_principals: usize,
    pub active_sessions: u64,
    pub active_credentials: usize,
}

impl AuthStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 1.0;
        }
        self.successful as f64 / self.total_attempts as f64
    }
}

/// Authenticates secrets, issues sessions and validates them
#[derive(Debug)]
pub struct Authenticator {
    store: Arc<dyn Store>,
    limiter: HourlyRateLimiter,
    cache: SessionCache,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    metrics: Option<MetricsCollector>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: AuthConfig) -> Self {
        Self {
            store,
            limiter: HourlyRateLimiter::with_clock(clock.clone()),
            cache: SessionCache::new(),
            clock,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limiter(&self) -> &HourlyRateLimiter {
        &self.limiter
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }

    /// Provision a credential and return its secret
    ///
    /// The plaintext secret is returned exactly once; only its hash is kept.
    pub async fn create_credential(&self, request: NewCredential) -> Result<String> {
        let principal_id = request.principal_id.trim();
        if principal_id.is_empty() {
            return Err(BulwarkError::Validation("principal id is empty".to_string()));
        }
        if principal_id.chars().count() < self.config.min_principal_len {
            return Err(BulwarkError::Validation(format!(
                "principal id must be at least {} characters",
                self.config.min_principal_len
            )));
        }
        let rate_limit = request
            .rate_limit_per_hour
            .unwrap_or(self.config.default_rate_limit_per_hour);
        if rate_limit == 0 {
            return Err(BulwarkError::Validation(
                "rate limit must be at least one request per hour".to_string(),
            ));
        }

        let now = self.clock.now();
        let secret = generate_secret(&self.config.secret_prefix);
        let credential = Credential {
            principal_id: principal_id.to_string(),
            secret_hash: hash_secret(&secret),
            role: request.role,
            permissions: request.role.permissions(),
            created_at: now,
            expires_at: request.expires_at,
            last_used: None,
            active: true,
            rate_limit_per_hour: rate_limit,
            allowed_ips: request.allowed_ips,
        };

        self.store.insert_credential(&credential).await?;
        self.audit(AuditEntry {
            principal_id: Some(credential.principal_id.clone()),
            action: AuditAction::CreateCredential,
            client_ip: None,
            user_agent: None,
            success: true,
            error: None,
            timestamp: now,
        })
        .await;

        info!(
            principal = %credential.principal_id,
            role = %credential.role,
            rate_limit,
            "Credential created"
        );
        Ok(secret)
    }

    /// Deactivate a credential and revoke all of its sessions
    ///
    /// Returns whether the credential exists.
    pub async fn revoke_credential(&self, principal_id: &str) -> Result<bool> {
        let exists = self.store.set_credential_active(principal_id, false).await?;
        if exists {
            self.revoke_all_sessions(principal_id).await?;
            info!(principal = principal_id, "Credential revoked");
        }
        self.audit(AuditEntry {
            principal_id: Some(principal_id.to_string()),
            action: AuditAction::RevokeCredential,
            client_ip: None,
            user_agent: None,
            success: exists,
            error: (!exists).then(|| "unknown_credential".to_string()),
            timestamp: self.clock.now(),
        })
        .await;
        Ok(exists)
    }

    /// Every provisioned credential; hashes are never serialized
    pub async fn list_credentials(&self) -> Result<Vec<Credential>> {
        self.store.list_credentials().await
    }

    /// Authenticate a secret and open a session
    pub async fn authenticate(
        &self,
        secret: &str,
        client_ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> Result<AuthContext> {
        let now = self.clock.now();
        let attempt = Attempt {
            action: AuditAction::Authenticate,
            principal_id: None,
            client_ip: client_ip.map(|ip| ip.to_string()),
            user_agent: user_agent.map(str::to_string),
        };

        let Some(credential) = self.store.credential_by_hash(&hash_secret(secret)).await? else {
            return self.refuse(attempt, AuthFailure::UnknownCredential).await;
        };
        let attempt = attempt.principal(&credential.principal_id);

        if !credential.active {
            return self.refuse(attempt, AuthFailure::Deactivated).await;
        }
        if credential.is_expired(now) {
            return self.refuse(attempt, AuthFailure::Expired).await;
        }
        if !credential.allows_ip(client_ip) {
            return self.refuse(attempt, AuthFailure::IpNotAllowed).await;
        }
        if self
            .limiter
            .check_and_increment(&credential.principal_id, credential.rate_limit_per_hour)
            .is_err()
        {
            return self.refuse(attempt, AuthFailure::RateLimited).await;
        }

        self.store
            .touch_credential(&credential.principal_id, now)
            .await?;

        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            principal_id: credential.principal_id.clone(),
            permissions: credential.permissions.clone(),
            client_ip: attempt.client_ip.clone(),
            user_agent: attempt.user_agent.clone(),
            issued_at: now,
            expires_at: now + self.config.session_ttl(),
            revoked: false,
        };
        self.store.insert_session(&session).await?;
        self.cache.insert(session.clone());

        self.audit(attempt.entry(true, None, now)).await;
        self.count("auth.attempts", &[("outcome", "success")]);
        info!(
            principal = %session.principal_id,
            session = %session.session_id,
            expires_at = %session.expires_at,
            "Authenticated"
        );
        Ok(session.context())
    }

    /// Validate a session id, cache first
    ///
    /// On a cache miss the session is rebuilt from the ledger with the
    /// credential's current permissions. Expired sessions are deactivated.
    pub async fn validate_session(&self, session_id: &str) -> Result<AuthContext> {
        let now = self.clock.now();
        let attempt = Attempt {
            action: AuditAction::ValidateSession,
            principal_id: None,
            client_ip: None,
            user_agent: None,
        };

        if let Some(session) = self.cache.get(session_id) {
            let attempt = attempt.principal(&session.principal_id);
            if session.revoked {
                self.cache.remove(session_id);
                return self.refuse(attempt, AuthFailure::SessionRevoked).await;
            }
            if session.is_expired(now) {
                self.expire(&session).await?;
                return self.refuse(attempt, AuthFailure::SessionExpired).await;
            }
            return Ok(session.context());
        }

        let Some(mut session) = self.store.session(session_id).await? else {
            return self.refuse(attempt, AuthFailure::SessionNotFound).await;
        };
        let attempt = attempt.principal(&session.principal_id);

        if session.revoked {
            return self.refuse(attempt, AuthFailure::SessionRevoked).await;
        }
        if session.is_expired(now) {
            self.expire(&session).await?;
            return self.refuse(attempt, AuthFailure::SessionExpired).await;
        }

        match self.store.credential(&session.principal_id).await? {
            Some(credential) if credential.active && !credential.is_expired(now) => {
                session.permissions = credential.permissions;
            }
            _ => return self.refuse(attempt, AuthFailure::Deactivated).await,
        }

        debug!(session = session_id, "Session reloaded from ledger");
        self.cache.insert(session.clone());
        Ok(session.context())
    }

    /// Revoke one session; unknown or already revoked ids are not an error
    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        let cached = self.cache.remove(session_id);
        let deactivated = self.store.deactivate_session(session_id).await?;

        self.audit(AuditEntry {
            principal_id: cached.map(|s| s.principal_id),
            action: AuditAction::RevokeSession,
            client_ip: None,
            user_agent: None,
            success: true,
            error: None,
            timestamp: self.clock.now(),
        })
        .await;

        if deactivated {
            info!(session = session_id, "Session revoked");
        }
        Ok(())
    }

    /// Revoke every session of a principal, returning how many were active
    pub async fn revoke_all_sessions(&self, principal_id: &str) -> Result<u64> {
        self.cache.remove_principal(principal_id);
        let revoked = self.store.deactivate_sessions_for(principal_id).await?;

        self.audit(AuditEntry {
            principal_id: Some(principal_id.to_string()),
            action: AuditAction::RevokeAllSessions,
            client_ip: None,
            user_agent: None,
            success: true,
            error: None,
            timestamp: self.clock.now(),
        })
        .await;

        info!(principal = principal_id, revoked, "Sessions revoked");
        Ok(revoked)
    }

    /// Membership test against the session's frozen permission snapshot
    pub fn check_permission(&self, ctx: &AuthContext, permission: Permission) -> bool {
        ctx.has_permission(permission)
    }

    /// Like [`Self::check_permission`], but refuses with an authentication error
    pub async fn require_permission(&self, ctx: &AuthContext, permission: Permission) -> Result<()> {
        if ctx.has_permission(permission) {
            return Ok(());
        }
        warn!(
            principal = %ctx.principal_id,
            permission = %permission,
            "Permission denied"
        );
        self.count("auth.failures", &[("reason", AuthFailure::PermissionDenied.as_str())]);
        Err(BulwarkError::Authentication(AuthFailure::PermissionDenied))
    }

    /// Authentication activity over the trailing `hours`
    pub async fn get_auth_stats(&self, hours: u32) -> Result<AuthStats> {
        if hours == 0 {
            return Err(BulwarkError::Validation(
                "statistics window must be at least one hour".to_string(),
            ));
        }
        let now = self.clock.now();
        let entries = self
            .store
            .audit_since(now - Duration::hours(i64::from(hours)))
            .await?;

        let mut stats = AuthStats {
            window_hours: hours,
            total_attempts: 0,
            successful: 0,
            failed: 0,
            failures_by_reason: BTreeMap::new(),
            session_validation_failures: 0,
            unique_principals: 0,
            active_sessions: self.store.count_active_sessions(now).await?,
            active_credentials: self
                .store
                .list_credentials()
                .await?
                .iter()
                .filter(|c| c.active && !c.is_expired(now))
                .count(),
        };

        let mut principals = BTreeSet::new();
        for entry in &entries {
            match entry.action {
                AuditAction::Authenticate => {
                    stats.total_attempts += 1;
                    if entry.success {
                        stats.successful += 1;
                        if let Some(principal) = &entry.principal_id {
                            principals.insert(principal.clone());
                        }
                    } else {
                        stats.failed += 1;
                        let reason = entry.error.clone().unwrap_or_else(|| "unknown".to_string());
                        *stats.failures_by_reason.entry(reason).or_insert(0) += 1;
                    }
                }
                AuditAction::ValidateSession if !entry.success => {
                    stats.session_validation_failures += 1;
                }
                _ => {}
            }
        }
        stats.unique_principals = principals.len();
        Ok(stats)
    }

    /// Write in-memory rate counters to the ledger and drop stale buckets
    ///
    /// Returns how many counters were written.
    pub async fn flush_rate_counters(&self) -> Result<usize> {
        let counters = self.limiter.snapshot();
        for counter in &counters {
            self.store.upsert_counter(counter).await?;
        }
        let purged = self.limiter.purge_stale();
        let pruned = self
            .store
            .prune_counters(self.limiter.current_bucket() - COUNTER_RETENTION_HOURS)
            .await?;
        debug!(
            written = counters.len(),
            purged, pruned, "Rate counters flushed"
        );
        Ok(counters.len())
    }

    /// Seed the in-memory limiter from the ledger's current hour bucket
    pub async fn reload_rate_counters(&self) -> Result<usize> {
        let bucket = self.limiter.current_bucket();
        let counters = self.store.counters_for_bucket(bucket).await?;
        for counter in &counters {
            self.limiter
                .seed(&counter.principal, counter.hour_bucket, counter.count);
        }
        debug!(bucket, loaded = counters.len(), "Rate counters reloaded");
        Ok(counters.len())
    }

    /// Drop expired and revoked sessions from the cache
    ///
    /// Expired sessions are also deactivated in the ledger. Returns how many
    /// sessions left the cache.
    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        let purged = self.cache.purge_expired(self.clock.now());
        for session_id in &purged {
            self.store.deactivate_session(session_id).await?;
        }
        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged expired sessions");
        }
        Ok(purged.len())
    }

    async fn expire(&self, session: &Session) -> Result<()> {
        self.cache.remove(&session.session_id);
        self.store.deactivate_session(&session.session_id).await?;
        debug!(session = %session.session_id, "Expired session deactivated");
        Ok(())
    }

    async fn refuse<T>(&self, attempt: Attempt, reason: AuthFailure) -> Result<T> {
        warn!(
            action = %attempt.action,
            principal = attempt.principal_id.as_deref().unwrap_or("-"),
            ip = attempt.client_ip.as_deref().unwrap_or("-"),
            reason = %reason,
            "Authentication refused"
        );
        self.audit(attempt.entry(false, Some(reason), self.clock.now()))
            .await;
        if attempt.action == AuditAction::Authenticate {
            self.count("auth.attempts", &[("outcome", "failure")]);
        }
        self.count("auth.failures", &[("reason", reason.as_str())]);
        Err(BulwarkError::Authentication(reason))
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            warn!(action = %entry.action, "Failed to write audit entry: {}", e);
        }
    }

    fn count(&self, name: &str, pairs: &[(&str, &str)]) {
        if let Some(metrics) = &self.metrics {
            metrics.counter(name, 1.0, labels(pairs));
        }
    }
}

/// Request metadata carried into the audit entry
struct Attempt {
    action: AuditAction,
    principal_id: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
}

impl Attempt {
    fn principal(mut self, principal_id: &str) -> Self {
        self.principal_id = Some(principal_id.to_string());
        self
    }

    fn entry(&self, success: bool, reason: Option<AuthFailure>, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            principal_id: self.principal_id.clone(),
            action: self.action,
            client_ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            success,
            error: reason.map(|r| r.as_str().to_string()),
            timestamp: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::store::SqliteStore;
    use bulwark_core_resilience::ManualClock;
    use chrono::TimeZone;

    async fn authenticator() -> (Authenticator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let auth = Authenticator::new(store, clock.clone(), AuthConfig::default());
        (auth, clock)
    }

    fn reason<T: std::fmt::Debug>(result: Result<T>) -> AuthFailure {
        result.unwrap_err().auth_failure().expect("authentication error")
    }

    #[tokio::test]
    async fn test_create_validates_principal_id() {
        let (auth, _) = authenticator().await;
        assert!(auth.create_credential(NewCredential::new("", Role::Agent)).await.is_err());
        assert!(auth.create_credential(NewCredential::new("ab", Role::Agent)).await.is_err());

        auth.create_credential(NewCredential::new("agent-1", Role::Agent))
            .await
            .unwrap();
        let dup = auth
            .create_credential(NewCredential::new("agent-1", Role::Agent))
            .await;
        assert!(matches!(dup, Err(BulwarkError::Validation(_))));
    }

    #[tokio::test]
    async fn test_authenticate_issues_session() {
        let (auth, clock) = authenticator().await;
        let secret = auth
            .create_credential(NewCredential::new("agent-1", Role::Agent))
            .await
            .unwrap();

        let ctx = auth
            .authenticate(&secret, None, Some("test-agent/1.0"))
            .await
            .unwrap();
        assert_eq!(ctx.principal_id, "agent-1");
        assert!(ctx.has_permission(Permission::WriteData));
        assert_eq!(ctx.expires_at - ctx.issued_at, Duration::hours(1));
        assert_eq!(ctx.issued_at, clock.now());

        let listed = auth.list_credentials().await.unwrap();
        assert_eq!(listed[0].last_used, Some(clock.now()));

        assert_eq!(
            reason(auth.authenticate("bwk_wrong", None, None).await),
            AuthFailure::UnknownCredential
        );
    }

    #[tokio::test]
    async fn test_refusal_priority() {
        let (auth, clock) = authenticator().await;
        let allowed: IpAddr = "10.0.0.1".parse().unwrap();
        let secret = auth
            .create_credential(
                NewCredential::new("agent-1", Role::Agent)
                    .allow_ips([allowed])
                    .expires_at(clock.now() + Duration::minutes(30))
                    .rate_limit(1),
            )
            .await
            .unwrap();

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(
            reason(auth.authenticate(&secret, Some(other), None).await),
            AuthFailure::IpNotAllowed
        );
        // refused attempts do not consume the budget
        auth.authenticate(&secret, Some(allowed), None).await.unwrap();
        assert_eq!(
            reason(auth.authenticate(&secret, Some(allowed), None).await),
            AuthFailure::RateLimited
        );

        clock.advance(Duration::hours(1));
        assert_eq!(
            reason(auth.authenticate(&secret, Some(allowed), None).await),
            AuthFailure::Expired
        );

        auth.revoke_credential("agent-1").await.unwrap();
        assert_eq!(
            reason(auth.authenticate(&secret, Some(allowed), None).await),
            AuthFailure::Deactivated
        );
    }

    #[tokio::test]
    async fn test_validate_session_lifecycle() {
        let (auth, clock) = authenticator().await;
        let secret = auth
            .create_credential(NewCredential::new("agent-1", Role::ReadOnly))
            .await
            .unwrap();
        let ctx = auth.authenticate(&secret, None, None).await.unwrap();

        assert_eq!(auth.validate_session(&ctx.session_id).await.unwrap(), ctx);
        assert_eq!(
            reason(auth.validate_session("no-such-session").await),
            AuthFailure::SessionNotFound
        );

        clock.advance(Duration::hours(2));
        assert_eq!(
            reason(auth.validate_session(&ctx.session_id).await),
            AuthFailure::SessionExpired
        );
        // now served from the ledger, already deactivated
        assert_eq!(
            reason(auth.validate_session(&ctx.session_id).await),
            AuthFailure::SessionRevoked
        );
    }

    #[tokio::test]
    async fn test_cache_miss_reloads_from_ledger() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let first = Authenticator::new(store.clone(), clock.clone(), AuthConfig::default());
        let secret = first
            .create_credential(NewCredential::new("agent-1", Role::Operator))
            .await
            .unwrap();
        let ctx = first.authenticate(&secret, None, None).await.unwrap();

        let second = Authenticator::new(store, clock, AuthConfig::default());
        let reloaded = second.validate_session(&ctx.session_id).await.unwrap();
        assert_eq!(reloaded.permissions, Role::Operator.permissions());
        assert_eq!(second.cached_sessions(), 1);

        first.revoke_credential("agent-1").await.unwrap();
        let third = Authenticator::new(
            first.store.clone(),
            first.clock.clone(),
            AuthConfig::default(),
        );
        assert_eq!(
            reason(third.validate_session(&ctx.session_id).await),
            AuthFailure::SessionRevoked
        );
    }

    #[tokio::test]
    async fn test_revoke_session_is_idempotent() {
        let (auth, _) = authenticator().await;
        let secret = auth
            .create_credential(NewCredential::new("agent-1", Role::Agent))
            .await
            .unwrap();
        let ctx = auth.authenticate(&secret, None, None).await.unwrap();

        auth.revoke_session(&ctx.session_id).await.unwrap();
        auth.revoke_session(&ctx.session_id).await.unwrap();
        auth.revoke_session("never-existed").await.unwrap();
        assert_eq!(
            reason(auth.validate_session(&ctx.session_id).await),
            AuthFailure::SessionRevoked
        );
    }

    #[tokio::test]
    async fn test_permission_checks() {
        let (auth, _) = authenticator().await;
        let secret = auth
            .create_credential(NewCredential::new("viewer", Role::ReadOnly))
            .await
            .unwrap();
        let ctx = auth.authenticate(&secret, None, None).await.unwrap();

        assert!(auth.check_permission(&ctx, Permission::ViewMetrics));
        assert!(!auth.check_permission(&ctx, Permission::WriteData));
        assert_eq!(
            reason(auth.require_permission(&ctx, Permission::WriteData).await),
            AuthFailure::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_auth_stats_count_reasons() {
        let (auth, _) = authenticator().await;
        let secret = auth
            .create_credential(NewCredential::new("agent-1", Role::Agent))
            .await
            .unwrap();
        auth.authenticate(&secret, None, None).await.unwrap();
        let _ = auth.authenticate("bwk_nope", None, None).await;
        let _ = auth.authenticate("bwk_nope", None, None).await;
        let _ = auth.validate_session("missing").await;

        let stats = auth.get_auth_stats(24).await.unwrap();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.failures_by_reason["unknown_credential"], 2);
        assert_eq!(stats.session_validation_failures, 1);
        assert_eq!(stats.unique_principals, 1);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.active_credentials, 1);
    }

    #[tokio::test]
    async fn test_rate_counters_survive_restart() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let first = Authenticator::new(store.clone(), clock.clone(), AuthConfig::default());
        let secret = first
            .create_credential(NewCredential::new("agent-1", Role::Agent).rate_limit(2))
            .await
            .unwrap();
        first.authenticate(&secret, None, None).await.unwrap();
        first.authenticate(&secret, None, None).await.unwrap();
        assert_eq!(first.flush_rate_counters().await.unwrap(), 1);

        let second = Authenticator::new(store, clock, AuthConfig::default());
        assert_eq!(second.reload_rate_counters().await.unwrap(), 1);
        assert_eq!(
            reason(second.authenticate(&secret, None, None).await),
            AuthFailure::RateLimited
        );
    }

    #[tokio::test]
    async fn test_purge_expired_sessions() {
        let (auth, clock) = authenticator().await;
        let secret = auth
            .create_credential(NewCredential::new("agent-1", Role::Agent))
            .await
            .unwrap();
        auth.authenticate(&secret, None, None).await.unwrap();
        assert_eq!(auth.purge_expired_sessions().await.unwrap(), 0);

        clock.advance(Duration::hours(2));
        assert_eq!(auth.purge_expired_sessions().await.unwrap(), 1);
        assert_eq!(auth.cached_sessions(), 0);
    }
}
