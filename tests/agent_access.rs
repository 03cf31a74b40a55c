/*!
 * Integration tests for agent authentication
 *
 * Runs the authenticator against an on-disk ledger with a manual clock to
 * cover:
 * - Credential lifecycle (create, authenticate, revoke)
 * - Hourly rate limits and bucket rollover
 * - Session validation, expiry and idempotent revocation
 * - Authentication statistics and rate counter persistence
 */

use bulwark::{
    auth::{Authenticator, NewCredential, Permission, Role},
    config::AuthConfig,
    error::{AuthFailure, BulwarkError},
    store::{CredentialStore, RateCounterStore, SessionStore, SqliteStore},
};
use bulwark_core_resilience::{hour_bucket, Clock, ManualClock};
use chrono::{Duration, TimeZone, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: Arc<SqliteStore>,
    clock: Arc<ManualClock>,
    authenticator: Authenticator,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("ledger.db"), 4).await.unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap(),
    ));
    let config = AuthConfig {
        session_ttl_secs: 1800,
        ..Default::default()
    };
    let authenticator = Authenticator::new(store.clone(), clock.clone(), config);
    Fixture {
        _dir: dir,
        store,
        clock,
        authenticator,
    }
}

fn refusal(err: BulwarkError) -> AuthFailure {
    assert_eq!(err.to_string(), "authentication failed");
    err.auth_failure().expect("authentication error")
}

#[tokio::test]
async fn rate_limit_resets_at_hour_rollover() {
    let f = fixture().await;
    let secret = f
        .authenticator
        .create_credential(NewCredential::new("scheduler-bot", Role::Agent).rate_limit(2))
        .await
        .unwrap();

    f.authenticator.authenticate(&secret, None, None).await.unwrap();
    f.authenticator.authenticate(&secret, None, None).await.unwrap();
    let err = f
        .authenticator
        .authenticate(&secret, None, None)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::RateLimited);

    // 09:15 -> 10:00 crosses into the next hour bucket
    f.clock.advance(Duration::minutes(45));
    f.authenticator.authenticate(&secret, None, None).await.unwrap();

    let stats = f.authenticator.get_auth_stats(2).await.unwrap();
    assert_eq!(stats.successful, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failures_by_reason["rate_limited"], 1);
    assert_eq!(stats.unique_principals, 1);
}

#[tokio::test]
async fn only_the_issued_secret_authenticates() {
    let f = fixture().await;
    let secret = f
        .authenticator
        .create_credential(NewCredential::new("billing-agent", Role::Operator))
        .await
        .unwrap();

    let ctx = f
        .authenticator
        .authenticate(&secret, None, Some("agent-runtime/1.0"))
        .await
        .unwrap();
    assert_eq!(ctx.principal_id, "billing-agent");
    assert_eq!(ctx.expires_at - ctx.issued_at, Duration::seconds(1800));
    assert_eq!(ctx.permissions, Role::Operator.permissions());

    let forged = format!("{}x", secret);
    let err = f
        .authenticator
        .authenticate(&forged, None, None)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::UnknownCredential);

    // Duplicate provisioning is a validation error
    let err = f
        .authenticator
        .create_credential(NewCredential::new("billing-agent", Role::Agent))
        .await
        .unwrap_err();
    assert!(matches!(err, BulwarkError::Validation(_)));

    let credential = f.store.credential("billing-agent").await.unwrap().unwrap();
    assert_eq!(credential.last_used, Some(f.clock.now()));
}

#[tokio::test]
async fn revoked_credential_stops_authenticating() {
    let f = fixture().await;
    let secret = f
        .authenticator
        .create_credential(NewCredential::new("crawler", Role::ReadOnly))
        .await
        .unwrap();
    let ctx = f.authenticator.authenticate(&secret, None, None).await.unwrap();

    assert!(f.authenticator.revoke_credential("crawler").await.unwrap());
    assert!(f.authenticator.revoke_credential("crawler").await.unwrap());
    assert!(!f.authenticator.revoke_credential("nobody").await.unwrap());

    let err = f
        .authenticator
        .authenticate(&secret, None, None)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::Deactivated);

    let err = f
        .authenticator
        .validate_session(&ctx.session_id)
        .await
        .unwrap_err();
    assert!(matches!(
        refusal(err),
        AuthFailure::SessionRevoked | AuthFailure::Deactivated
    ));
}

#[tokio::test]
async fn ip_allow_list_and_expiry_are_enforced() {
    let f = fixture().await;
    let office: IpAddr = "10.1.2.3".parse().unwrap();
    let secret = f
        .authenticator
        .create_credential(
            NewCredential::new("ops-runner", Role::Admin)
                .allow_ips([office])
                .expires_at(f.clock.now() + Duration::hours(2)),
        )
        .await
        .unwrap();

    let elsewhere: IpAddr = "192.0.2.1".parse().unwrap();
    let err = f
        .authenticator
        .authenticate(&secret, Some(elsewhere), None)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::IpNotAllowed);

    let err = f.authenticator.authenticate(&secret, None, None).await.unwrap_err();
    assert_eq!(refusal(err), AuthFailure::IpNotAllowed);

    f.authenticator
        .authenticate(&secret, Some(office), None)
        .await
        .unwrap();

    f.clock.advance(Duration::hours(2));
    let err = f
        .authenticator
        .authenticate(&secret, Some(office), None)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::Expired);
}

#[tokio::test]
async fn sessions_expire_and_revoke_idempotently() {
    let f = fixture().await;
    let secret = f
        .authenticator
        .create_credential(NewCredential::new("notifier", Role::Agent))
        .await
        .unwrap();
    let first = f.authenticator.authenticate(&secret, None, None).await.unwrap();
    let second = f.authenticator.authenticate(&secret, None, None).await.unwrap();

    let ctx = f.authenticator.validate_session(&first.session_id).await.unwrap();
    assert!(f.authenticator.check_permission(&ctx, Permission::WriteData));
    assert!(!f.authenticator.check_permission(&ctx, Permission::AdminSystem));

    f.authenticator.revoke_session(&first.session_id).await.unwrap();
    f.authenticator.revoke_session(&first.session_id).await.unwrap();
    f.authenticator.revoke_session("never-issued").await.unwrap();
    let err = f
        .authenticator
        .validate_session(&first.session_id)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::SessionRevoked);

    f.clock.advance(Duration::minutes(31));
    let err = f
        .authenticator
        .validate_session(&second.session_id)
        .await
        .unwrap_err();
    assert_eq!(refusal(err), AuthFailure::SessionExpired);
    assert_eq!(f.store.count_active_sessions(f.clock.now()).await.unwrap(), 0);
}

#[tokio::test]
async fn session_survives_cache_loss() {
    let f = fixture().await;
    let secret = f
        .authenticator
        .create_credential(NewCredential::new("archiver", Role::Agent))
        .await
        .unwrap();
    let ctx = f.authenticator.authenticate(&secret, None, None).await.unwrap();

    // A second authenticator over the same ledger has an empty cache
    let restarted = Authenticator::new(f.store.clone(), f.clock.clone(), AuthConfig::default());
    let rebuilt = restarted.validate_session(&ctx.session_id).await.unwrap();
    assert_eq!(rebuilt.principal_id, "archiver");
    assert_eq!(rebuilt.permissions, ctx.permissions);
    assert_eq!(rebuilt.expires_at, ctx.expires_at);
}

#[tokio::test]
async fn rate_counters_round_trip_through_ledger() {
    let f = fixture().await;
    let secret = f
        .authenticator
        .create_credential(NewCredential::new("indexer", Role::Agent).rate_limit(3))
        .await
        .unwrap();
    f.authenticator.authenticate(&secret, None, None).await.unwrap();
    f.authenticator.authenticate(&secret, None, None).await.unwrap();

    assert_eq!(f.authenticator.flush_rate_counters().await.unwrap(), 1);
    let bucket = hour_bucket(f.clock.now());
    let stored = f.store.counters_for_bucket(bucket).await.unwrap();
    assert_eq!(stored[0].count, 2);

    let restarted = Authenticator::new(f.store.clone(), f.clock.clone(), AuthConfig::default());
    assert_eq!(restarted.reload_rate_counters().await.unwrap(), 1);
    restarted.authenticate(&secret, None, None).await.unwrap();
    let err = restarted.authenticate(&secret, None, None).await.unwrap_err();
    assert_eq!(refusal(err), AuthFailure::RateLimited);
}
