//! Session persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileferry_core::StoreResult;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::session::Session;

/// Result of attempting to persist a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The session was stored.
    Inserted,
    /// Another live session already holds the approval reference.
    ApprovalInUse {
        /// Token of the live session.
        holder: Uuid,
    },
}

/// Shared store of session records, keyed by token.
///
/// Implementations must make the approval check and the insert a single
/// atomic step so two runs cannot both claim one approval.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert `session` unless its approval reference backs a live session at `now`.
    async fn insert(&self, session: &Session, now: DateTime<Utc>) -> StoreResult<InsertOutcome>;

    /// Fetch a session by token.
    async fn get(&self, token: Uuid) -> StoreResult<Option<Session>>;

    /// Mark revoked and drop material; returns `true` if this call revoked it.
    async fn revoke(&self, token: Uuid) -> StoreResult<bool>;

    /// Delete records whose expiry is before `now`; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session, now: DateTime<Utc>) -> StoreResult<InsertOutcome> {
        let mut sessions = self.sessions.write().await;
        if let Some(holder) = sessions.values().find(|existing| {
            existing.scope.approval_ref == session.scope.approval_ref && existing.is_valid_at(now)
        }) {
            return Ok(InsertOutcome::ApprovalInUse {
                holder: holder.token,
            });
        }
        sessions.insert(session.token, session.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, token: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&token).cloned())
    }

    async fn revoke(&self, token: Uuid) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(&token).is_some_and(Session::revoke))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionScope;
    use chrono::TimeDelta;
    use fileferry_core::AccessMaterial;

    fn session(approval: &str, issued_at: DateTime<Utc>) -> Session {
        Session::new(
            "alice",
            SessionScope {
                run_id: Uuid::new_v4(),
                approval_ref: approval.into(),
                bucket: "exports".into(),
                key: "daily.csv".into(),
            },
            AccessMaterial {
                access_key_id: "ASIA".into(),
                secret_access_key: "s".into(),
                session_token: "t".into(),
                region: "us-east-1".into(),
            },
            issued_at,
        )
    }

    #[tokio::test]
    async fn approval_cannot_back_two_live_sessions() -> StoreResult<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let first = session("REQ1", now);
        assert_eq!(store.insert(&first, now).await?, InsertOutcome::Inserted);
        let second = session("REQ1", now);
        assert_eq!(
            store.insert(&second, now).await?,
            InsertOutcome::ApprovalInUse {
                holder: first.token
            }
        );

        assert!(store.revoke(first.token).await?);
        assert_eq!(store.insert(&second, now).await?, InsertOutcome::Inserted);
        Ok(())
    }

    #[tokio::test]
    async fn expired_holder_releases_approval() -> StoreResult<()> {
        let store = MemorySessionStore::new();
        let issued = Utc::now();
        let first = session("INC9", issued);
        store.insert(&first, issued).await?;
        let later = issued + TimeDelta::seconds(11);
        let second = session("INC9", later);
        assert_eq!(store.insert(&second, later).await?, InsertOutcome::Inserted);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_unknown_tokens_are_ignored() -> StoreResult<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let record = session("REQ2", now);
        store.insert(&record, now).await?;
        assert!(store.revoke(record.token).await?);
        assert!(!store.revoke(record.token).await?);
        assert!(!store.revoke(Uuid::new_v4()).await?);
        let stored = store.get(record.token).await?.expect("record kept");
        assert!(stored.material.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_only_expired_records() -> StoreResult<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.insert(&session("REQ3", now - TimeDelta::seconds(30)), now).await?;
        store.insert(&session("REQ4", now), now).await?;
        assert_eq!(store.purge_expired(now).await?, 1);
        assert_eq!(store.len().await, 1);
        Ok(())
    }
}
