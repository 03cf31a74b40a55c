//! Authentication and access control
//!
//! Credentials are provisioned with a role whose permissions are frozen into
//! every session issued for it. Sessions live in an in-memory cache backed
//! by the ledger.

pub mod authenticator;
pub mod credential;
pub mod permissions;
pub mod session;

pub use authenticator::{AuthStats, Authenticator};
pub use credential::{generate_secret, hash_secret, Credential, NewCredential};
pub use permissions::{Permission, PermissionSet, Role};
pub use session::{AuthContext, Session, SessionCache};
