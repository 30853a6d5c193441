use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileferry_core::{AccessMaterial, StoreError, StoreResult};
use fileferry_credentials::{InsertOutcome, Session, SessionScope, SessionStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const LOCK_APPROVAL_SQL: &str = r"
    SELECT pg_advisory_xact_lock(hashtext($1))
";

const SELECT_LIVE_HOLDER_SQL: &str = r"
    SELECT token
    FROM fileferry_runtime.sessions
    WHERE approval_ref = $1
      AND NOT revoked
      AND access_key_id IS NOT NULL
      AND expires_at >= $2
    LIMIT 1
";

const INSERT_SESSION_SQL: &str = r"
    INSERT INTO fileferry_runtime.sessions (
        token,
        requester,
        run_id,
        approval_ref,
        bucket,
        object_key,
        issued_at,
        expires_at,
        access_key_id,
        secret_access_key,
        session_token,
        region,
        revoked
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
";

const SELECT_SESSION_SQL: &str = r"
    SELECT
        token,
        requester,
        run_id,
        approval_ref,
        bucket,
        object_key,
        issued_at,
        expires_at,
        access_key_id,
        secret_access_key,
        session_token,
        region,
        revoked
    FROM fileferry_runtime.sessions
    WHERE token = $1
";

const REVOKE_SESSION_SQL: &str = r"
    UPDATE fileferry_runtime.sessions
    SET
        revoked = TRUE,
        access_key_id = NULL,
        secret_access_key = NULL,
        session_token = NULL
    WHERE token = $1
      AND NOT revoked
";

const PURGE_EXPIRED_SQL: &str = r"
    DELETE FROM fileferry_runtime.sessions
    WHERE expires_at < $1
";

/// Session store shared across processes through Postgres.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session, now: DateTime<Utc>) -> StoreResult<InsertOutcome> {
        let backend = |err: sqlx::Error| StoreError::backend("sessions.insert", err);
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(LOCK_APPROVAL_SQL)
            .bind(&session.scope.approval_ref)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let holder: Option<Uuid> = sqlx::query_scalar(SELECT_LIVE_HOLDER_SQL)
            .bind(&session.scope.approval_ref)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        if let Some(holder) = holder {
            tx.rollback().await.map_err(backend)?;
            return Ok(InsertOutcome::ApprovalInUse { holder });
        }

        let material = session.material.as_ref();
        sqlx::query(INSERT_SESSION_SQL)
            .bind(session.token)
            .bind(&session.requester)
            .bind(session.scope.run_id)
            .bind(&session.scope.approval_ref)
            .bind(&session.scope.bucket)
            .bind(&session.scope.key)
            .bind(session.issued_at)
            .bind(session.expires_at)
            .bind(material.map(|m| m.access_key_id.as_str()))
            .bind(material.map(|m| m.secret_access_key.as_str()))
            .bind(material.map(|m| m.session_token.as_str()))
            .bind(material.map(|m| m.region.as_str()))
            .bind(session.revoked)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, token: Uuid) -> StoreResult<Option<Session>> {
        let row = sqlx::query(SELECT_SESSION_SQL)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StoreError::backend("sessions.get", err))?;
        row.map(|row| decode_session(&row))
            .transpose()
            .map_err(|err| StoreError::backend("sessions.decode", err))
    }

    async fn revoke(&self, token: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(REVOKE_SESSION_SQL)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::backend("sessions.revoke", err))?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(PURGE_EXPIRED_SQL)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::backend("sessions.purge", err))?;
        Ok(result.rows_affected())
    }
}

fn decode_session(row: &PgRow) -> Result<Session, sqlx::Error> {
    let access_key_id: Option<String> = row.try_get("access_key_id")?;
    let secret_access_key: Option<String> = row.try_get("secret_access_key")?;
    let session_token: Option<String> = row.try_get("session_token")?;
    let region: Option<String> = row.try_get("region")?;
    let material = match (access_key_id, secret_access_key, session_token, region) {
        (Some(access_key_id), Some(secret_access_key), Some(session_token), Some(region)) => {
            Some(AccessMaterial {
                access_key_id,
                secret_access_key,
                session_token,
                region,
            })
        }
        _ => None,
    };
    Ok(Session {
        token: row.try_get("token")?,
        requester: row.try_get("requester")?,
        scope: SessionScope {
            run_id: row.try_get("run_id")?,
            approval_ref: row.try_get("approval_ref")?,
            bucket: row.try_get("bucket")?,
            key: row.try_get("object_key")?,
        },
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        material,
        revoked: row.try_get("revoked")?,
    })
}
