//! Session records.

use chrono::{DateTime, TimeDelta, Utc};
use fileferry_core::AccessMaterial;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed session lifetime in seconds.
pub const SESSION_VALIDITY_SECS: i64 = 10;

/// What a session grants access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScope {
    /// Run that owns the session.
    pub run_id: Uuid,
    /// Upstream approval backing the grant.
    pub approval_ref: String,
    /// Bucket the grant covers.
    pub bucket: String,
    /// Object key the grant covers.
    pub key: String,
}

/// One ephemeral grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique token.
    pub token: Uuid,
    /// Owning requester.
    pub requester: String,
    /// Granted scope.
    pub scope: SessionScope,
    /// Issuance instant.
    pub issued_at: DateTime<Utc>,
    /// Hard expiry, always `issued_at + 10s`.
    pub expires_at: DateTime<Utc>,
    /// Temporary access material; discarded on revoke.
    pub material: Option<AccessMaterial>,
    /// Whether the session was explicitly revoked.
    pub revoked: bool,
}

impl Session {
    /// Fresh session issued at `issued_at`.
    #[must_use]
    pub fn new(
        requester: &str,
        scope: SessionScope,
        material: AccessMaterial,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: Uuid::new_v4(),
            requester: requester.to_string(),
            scope,
            issued_at,
            expires_at: issued_at + validity(),
            material: Some(material),
            revoked: false,
        }
    }

    /// Validity at `now`: unrevoked, material present and not past expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.material.is_some() && now <= self.expires_at
    }

    /// Time left before expiry, zero once expired or revoked.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> TimeDelta {
        if self.is_valid_at(now) {
            self.expires_at - now
        } else {
            TimeDelta::zero()
        }
    }

    /// Reporting view at `now`.
    #[must_use]
    pub fn info_at(&self, now: DateTime<Utc>) -> SessionInfo {
        SessionInfo {
            token: self.token,
            requester: self.requester.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            millis_remaining: self.remaining_at(now).num_milliseconds(),
            is_valid: self.is_valid_at(now),
            revoked: self.revoked,
        }
    }

    /// Drop the material and mark the session revoked.
    pub fn revoke(&mut self) -> bool {
        let changed = !self.revoked;
        self.revoked = true;
        self.material = None;
        changed
    }
}

/// Fixed session window.
#[must_use]
pub fn validity() -> TimeDelta {
    TimeDelta::seconds(SESSION_VALIDITY_SECS)
}

/// Reporting view of a session; never includes material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session token.
    pub token: Uuid,
    /// Owning requester.
    pub requester: String,
    /// Issuance instant.
    pub issued_at: DateTime<Utc>,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
    /// Milliseconds until expiry, zero once invalid.
    pub millis_remaining: i64,
    /// Whether the session may still be used.
    pub is_valid: bool,
    /// Whether the session was explicitly revoked.
    pub revoked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> AccessMaterial {
        AccessMaterial {
            access_key_id: "ASIATEST".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            region: "us-east-1".into(),
        }
    }

    fn scope() -> SessionScope {
        SessionScope {
            run_id: Uuid::nil(),
            approval_ref: "REQ0001".into(),
            bucket: "exports".into(),
            key: "daily.csv".into(),
        }
    }

    #[test]
    fn validity_window_is_inclusive_of_expiry_instant() {
        let issued = Utc::now();
        let session = Session::new("alice", scope(), material(), issued);
        assert_eq!(session.expires_at - session.issued_at, TimeDelta::seconds(10));
        assert!(session.is_valid_at(issued));
        assert!(session.is_valid_at(session.expires_at));
        assert!(!session.is_valid_at(session.expires_at + TimeDelta::milliseconds(1)));
    }

    #[test]
    fn revoke_discards_material_and_is_idempotent() {
        let issued = Utc::now();
        let mut session = Session::new("alice", scope(), material(), issued);
        assert!(session.revoke());
        assert!(!session.revoke());
        assert!(session.material.is_none());
        assert!(!session.is_valid_at(issued));
    }

    #[test]
    fn info_reports_remaining_time() {
        let issued = Utc::now();
        let session = Session::new("alice", scope(), material(), issued);
        let info = session.info_at(issued + TimeDelta::seconds(4));
        assert_eq!(info.millis_remaining, 6_000);
        assert!(info.is_valid);
        let expired = session.info_at(issued + TimeDelta::seconds(11));
        assert_eq!(expired.millis_remaining, 0);
        assert!(!expired.is_valid);
    }
}
