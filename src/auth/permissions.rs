//! Roles and the permissions they grant
//!
//! The role map is static and exhaustive: adding a [`Permission`] forces a
//! decision for every [`Role`], and [`Role::System`] always holds all of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::BulwarkError;

/// Something a session may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadData,
    WriteData,
    ExecuteTools,
    CallExternal,
    ViewMetrics,
    ManageSessions,
    ManageCredentials,
    AdminSystem,
}

/// Frozen set of permissions carried by a credential or session
pub type PermissionSet = BTreeSet<Permission>;

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::ReadData,
        Permission::WriteData,
        Permission::ExecuteTools,
        Permission::CallExternal,
        Permission::ViewMetrics,
        Permission::ManageSessions,
        Permission::ManageCredentials,
        Permission::AdminSystem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadData => "read_data",
            Permission::WriteData => "write_data",
            Permission::ExecuteTools => "execute_tools",
            Permission::CallExternal => "call_external",
            Permission::ViewMetrics => "view_metrics",
            Permission::ManageSessions => "manage_sessions",
            Permission::ManageCredentials => "manage_credentials",
            Permission::AdminSystem => "admin_system",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = BulwarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| BulwarkError::Validation(format!("unknown permission: {}", s)))
    }
}

/// Principal roles for RBAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read data and metrics only
    ReadOnly,
    /// Autonomous agent: read, write, run tools, call out
    Agent,
    /// Human or service operating agents
    Operator,
    /// Manages credentials and sessions
    Admin,
    /// Internal services; every permission
    System,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::ReadOnly,
        Role::Agent,
        Role::Operator,
        Role::Admin,
        Role::System,
    ];

    /// Permissions granted by this role
    pub fn permissions(&self) -> PermissionSet {
        use Permission::*;
        let granted: &[Permission] = match self {
            Role::ReadOnly => &[ReadData, ViewMetrics],
            Role::Agent => &[ReadData, WriteData, ExecuteTools, CallExternal],
            Role::Operator => &[
                ReadData,
                WriteData,
                ExecuteTools,
                CallExternal,
                ViewMetrics,
                ManageSessions,
            ],
            Role::Admin => &[
                ReadData,
                WriteData,
                ViewMetrics,
                ManageSessions,
                ManageCredentials,
            ],
            Role::System => &Permission::ALL,
        };
        granted.iter().copied().collect()
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Convert role to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ReadOnly => "read_only",
            Role::Agent => "agent",
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = BulwarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| BulwarkError::Validation(format!("Invalid role: {}", s)))
    }
}
