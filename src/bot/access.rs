//! Per-event access gate.
//!
//! Every inbound event passes through [`AccessGate::admit`] before any
//! handler runs. The gate records the identity and the attempted action, then
//! answers whether the identity is banned.

use crate::models::UserIdentity;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{error, warn};

/// Result of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Not banned
    Granted,
    /// A ban record exists
    Banned,
    /// The ban list could not be read
    Unavailable,
}

/// Ban check plus audit trail
#[derive(Clone)]
pub struct AccessGate {
    storage: Arc<dyn Storage>,
}

impl AccessGate {
    /// Create a gate over the given storage
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Records the identity and the action, then checks for a ban.
    ///
    /// Bookkeeping failures are logged and never block the event. The
    /// activity entry is written before the ban check, so denied attempts
    /// stay in the audit trail.
    pub async fn admit(&self, identity: &UserIdentity, action: &str, details: &str) -> Access {
        if let Err(e) = self.storage.upsert_user(identity).await {
            warn!(user_id = identity.id, error = %e, "Failed to record user");
        }
        if let Err(e) = self
            .storage
            .log_activity(identity.id, action, details)
            .await
        {
            warn!(user_id = identity.id, action, error = %e, "Failed to log activity");
        }

        match self.storage.is_banned(identity.id).await {
            Ok(false) => Access::Granted,
            Ok(true) => Access::Banned,
            Err(e) => {
                error!(user_id = identity.id, error = %e, "Ban check failed");
                Access::Unavailable
            }
        }
    }

    /// `true` only when the identity is known not to be banned
    pub async fn check_access(&self, identity: &UserIdentity, action: &str) -> bool {
        self.admit(identity, action, "").await == Access::Granted
    }
}
