//! Sessions and the in-memory session cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::permissions::{Permission, PermissionSet};

/// Time-bounded authorization issued by a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub principal_id: String,
    /// Snapshot taken when the session was issued or reloaded
    pub permissions: PermissionSet,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn context(&self) -> AuthContext {
        AuthContext {
            principal_id: self.principal_id.clone(),
            session_id: self.session_id.clone(),
            permissions: self.permissions.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}

/// What a request handler gets back from authenticate / validate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub principal_id: String,
    pub session_id: String,
    pub permissions: PermissionSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    /// Membership test against the session's frozen permission snapshot
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Hot-path session lookup, keyed by session id
#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn insert(&self, session: Session) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.session_id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Drop every cached session of a principal, returning how many were cached
    pub fn remove_principal(&self, principal_id: &str) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.principal_id != principal_id);
        before - sessions.len()
    }

    /// Drop expired or revoked sessions, returning their ids
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<String> = sessions
            .values()
            .filter(|s| s.revoked || s.is_expired(now))
            .map(|s| s.session_id.clone())
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permissions::Role;
    use chrono::Duration;

    fn session(id: &str, principal: &str, expires_in: i64) -> Session {
        let now = Utc::now();
        Session {
            session_id: id.to_string(),
            principal_id: principal.to_string(),
            permissions: Role::Agent.permissions(),
            client_ip: None,
            user_agent: None,
            issued_at: now,
            expires_at: now + Duration::seconds(expires_in),
            revoked: false,
        }
    }

    #[test]
    fn test_context_carries_snapshot() {
        let ctx = session("s1", "agent", 60).context();
        assert!(ctx.has_permission(Permission::WriteData));
        assert!(!ctx.has_permission(Permission::AdminSystem));
        assert!(ctx.expires_at >= ctx.issued_at);
    }

    #[test]
    fn test_purge_expired() {
        let cache = SessionCache::new();
        cache.insert(session("live", "a", 60));
        cache.insert(session("dead", "a", -1));

        let purged = cache.purge_expired(Utc::now());
        assert_eq!(purged, vec!["dead".to_string()]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("live").is_some());
    }

    #[test]
    fn test_remove_principal() {
        let cache = SessionCache::new();
        cache.insert(session("s1", "a", 60));
        cache.insert(session("s2", "a", 60));
        cache.insert(session("s3", "b", 60));

        assert_eq!(cache.remove_principal("a"), 2);
        assert_eq!(cache.len(), 1);
    }
}
