//! `PostgreSQL` credential store.
//!
//! Every multi-row write runs in one transaction; dropping the transaction
//! (error path or cancelled request) rolls it back. Per-user writes lock the
//! user row first so concurrent logins and resends for the same account
//! serialize instead of racing on counts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::ipnetwork::IpNetwork,
    PgConnection, PgPool, Row,
};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info_span, Instrument, Span};
use uuid::Uuid;

use crate::identity::{
    error::IdentityError,
    model::{
        AuditEventType, NewSession, NewUser, NewVerification, User, UserCredentials, UserSession,
        UserVerification, VerificationStatus,
    },
    ports::{CredentialStore, ResendLimits, SessionCreated},
};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const USERS_EMAIL_CONSTRAINT: &str = "users_email_active_idx";
const TOKEN_HASH_CONSTRAINT: &str = "user_verifications_token_hash_key";
const ONE_PENDING_CONSTRAINT: &str = "user_verifications_one_pending_idx";

const USER_COLUMNS: &str = "id, email, status, mfa_enabled, created_at, updated_at, deleted_at";
const VERIFICATION_COLUMNS: &str = "id, user_id, token_hash, status, expires_at, created_at";
const SESSION_COLUMNS: &str =
    "id, user_id, ip_address, user_agent, device, created_at, last_active, expires_at";

/// Open a small pool the way every service in this family does.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

fn query_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn db_error(operation: &'static str, err: sqlx::Error) -> IdentityError {
    match err {
        sqlx::Error::RowNotFound => IdentityError::NotFound,
        err => {
            error!(db.operation = operation, "database error: {err}");
            IdentityError::DatabaseInternalError
        }
    }
}

fn decode_error(err: sqlx::Error) -> IdentityError {
    error!("failed to decode row: {err}");
    IdentityError::RepositoryInternalError
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name of the violated unique constraint, if `err` is a unique violation.
pub(crate) fn unique_violation_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if is_unique_violation(err) => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn count_from_row(row: &PgRow) -> Result<u64, IdentityError> {
    let count: i64 = row.try_get(0).map_err(decode_error)?;
    u64::try_from(count).map_err(|_| IdentityError::RepositoryInternalError)
}

fn user_from_row(row: &PgRow) -> Result<User, IdentityError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    Ok(User {
        id: row.try_get("id").map_err(decode_error)?,
        email: row.try_get("email").map_err(decode_error)?,
        status: status.parse()?,
        mfa_enabled: row.try_get("mfa_enabled").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
    })
}

fn verification_from_row(row: &PgRow) -> Result<UserVerification, IdentityError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    Ok(UserVerification {
        id: row.try_get("id").map_err(decode_error)?,
        user_id: row.try_get("user_id").map_err(decode_error)?,
        token_hash: row.try_get("token_hash").map_err(decode_error)?,
        status: status.parse()?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<UserSession, IdentityError> {
    let ip_address: IpNetwork = row.try_get("ip_address").map_err(decode_error)?;
    Ok(UserSession {
        id: row.try_get("id").map_err(decode_error)?,
        user_id: row.try_get("user_id").map_err(decode_error)?,
        ip_address: ip_address.ip(),
        user_agent: row.try_get("user_agent").map_err(decode_error)?,
        device: row.try_get("device").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        last_active: row.try_get("last_active").map_err(decode_error)?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
    })
}

/// Serialize per-user writes. Deleted users count as missing.
async fn lock_user(conn: &mut PgConnection, user_id: Uuid) -> Result<(), IdentityError> {
    let query = "SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE";
    sqlx::query(query)
        .bind(user_id)
        .fetch_optional(conn)
        .instrument(query_span("SELECT", query))
        .await
        .map_err(|err| db_error("SELECT", err))?
        .map(|_| ())
        .ok_or(IdentityError::NotFound)
}

/// Enforce the resend cooldown and hourly cap. Call with the user row locked.
async fn check_resend_limits(
    conn: &mut PgConnection,
    user_id: Uuid,
    limits: ResendLimits,
) -> Result<(), IdentityError> {
    let query = r"
        SELECT MAX(created_at) AS latest,
               COUNT(*) FILTER (WHERE created_at >= $2) AS recent
        FROM user_verifications
        WHERE user_id = $1
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(limits.window_start)
        .fetch_one(conn)
        .instrument(query_span("SELECT", query))
        .await
        .map_err(|err| db_error("SELECT", err))?;

    let latest: Option<OffsetDateTime> = row.try_get("latest").map_err(decode_error)?;
    let recent: i64 = row.try_get("recent").map_err(decode_error)?;
    let recent = u64::try_from(recent).map_err(|_| IdentityError::RepositoryInternalError)?;

    if latest.is_some_and(|created_at| created_at > limits.cooldown_start)
        || recent >= limits.hourly_cap
    {
        return Err(IdentityError::TooManyRequests);
    }
    Ok(())
}

async fn session_exists(
    conn: &mut PgConnection,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<bool, IdentityError> {
    let query = "SELECT id FROM user_sessions WHERE id = $1 AND user_id = $2";
    let row = sqlx::query(query)
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(conn)
        .instrument(query_span("SELECT", query))
        .await
        .map_err(|err| db_error("SELECT", err))?;
    Ok(row.is_some())
}

async fn count_user_sessions(conn: &mut PgConnection, user_id: Uuid) -> Result<u64, IdentityError> {
    let query = "SELECT COUNT(*) FROM user_sessions WHERE user_id = $1";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(conn)
        .instrument(query_span("SELECT", query))
        .await
        .map_err(|err| db_error("SELECT", err))?;
    count_from_row(&row)
}

async fn insert_audit(
    conn: &mut PgConnection,
    session_id: Uuid,
    user_id: Uuid,
    event_type: AuditEventType,
    old_value: Option<String>,
    new_value: Option<String>,
    at: OffsetDateTime,
) -> Result<(), IdentityError> {
    let query = r"
        INSERT INTO audit_user_sessions
            (id, session_id, user_id, event_type, old_value, new_value, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(user_id)
        .bind(event_type.as_str())
        .bind(old_value)
        .bind(new_value)
        .bind(at)
        .execute(conn)
        .instrument(query_span("INSERT", query))
        .await
        .map_err(|err| db_error("INSERT", err))?;
    Ok(())
}

async fn insert_session(
    conn: &mut PgConnection,
    session: &NewSession,
) -> Result<UserSession, IdentityError> {
    let query = format!(
        r"
        INSERT INTO user_sessions
            (id, user_id, ip_address, user_agent, device, created_at, last_active, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
        RETURNING {SESSION_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(session.id)
        .bind(session.user_id)
        .bind(IpNetwork::from(session.ip_address))
        .bind(&session.user_agent)
        .bind(session.device.as_deref())
        .bind(session.created_at)
        .bind(session.expires_at)
        .fetch_one(&mut *conn)
        .instrument(query_span("INSERT", &query))
        .await
        .map_err(|err| db_error("INSERT", err))?;
    let created = session_from_row(&row)?;

    insert_audit(
        conn,
        created.id,
        created.user_id,
        AuditEventType::SessionCreated,
        None,
        Some(created.ip_address.to_string()),
        created.created_at,
    )
    .await?;
    Ok(created)
}

async fn insert_verification(
    conn: &mut PgConnection,
    record: &NewVerification,
) -> Result<(), IdentityError> {
    let query = r"
        INSERT INTO user_verifications
            (id, user_id, token_hash, status, expires_at, created_at)
        VALUES ($1, $2, $3, 'pending', $4, $5)
    ";
    let result = sqlx::query(query)
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(conn)
        .instrument(query_span("INSERT", query))
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) => match unique_violation_constraint(&err).as_deref() {
            Some(TOKEN_HASH_CONSTRAINT) => Err(IdentityError::TokenCollision),
            // Another rotation for the same user committed first.
            Some(ONE_PENDING_CONSTRAINT) => Err(IdentityError::TooManyRequests),
            _ => Err(db_error("INSERT", err)),
        },
    }
}

#[derive(Clone, Debug)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables and indexes. Safe to run on every start.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(query_span("DDL", "schema.sql"))
            .await
            .context("failed to apply schema")?;
        Ok(())
    }

    /// Sessions of a user, oldest first.
    ///
    /// # Errors
    /// Returns an internal kind if the query fails.
    pub async fn sessions_for(&self, user_id: Uuid) -> Result<Vec<UserSession>, IdentityError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE user_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error("SELECT", err))?;
        rows.iter().map(session_from_row).collect()
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, IdentityError> {
        self.pool
            .begin()
            .await
            .map_err(|err| db_error("BEGIN", err))
    }
}

async fn commit(tx: sqlx::Transaction<'static, sqlx::Postgres>) -> Result<(), IdentityError> {
    tx.commit().await.map_err(|err| db_error("COMMIT", err))
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn get_user_by_email(&self, email: &str) -> Result<User, IdentityError> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error("SELECT", err))?
            .ok_or(IdentityError::NotFound)?;
        user_from_row(&row)
    }

    async fn get_credentials(&self, user_id: Uuid) -> Result<UserCredentials, IdentityError> {
        let query = r"
            SELECT user_id, password_hash, last_password_change, updated_at
            FROM user_credentials
            WHERE user_id = $1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error("SELECT", err))?
            .ok_or(IdentityError::NotFound)?;
        Ok(UserCredentials {
            user_id: row.try_get("user_id").map_err(decode_error)?,
            password_hash: row.try_get("password_hash").map_err(decode_error)?,
            last_password_change: row.try_get("last_password_change").map_err(decode_error)?,
            updated_at: row.try_get("updated_at").map_err(decode_error)?,
        })
    }

    async fn create_user_with_credentials(
        &self,
        new_user: &NewUser,
    ) -> Result<User, IdentityError> {
        let mut tx = self.begin().await?;

        let query = format!(
            r"
            INSERT INTO users (id, email, status, mfa_enabled, created_at, updated_at)
            VALUES ($1, $2, 'pending_verification', FALSE, $3, $3)
            RETURNING {USER_COLUMNS}
            "
        );
        let row = match sqlx::query(&query)
            .bind(new_user.id)
            .bind(&new_user.email)
            .bind(new_user.created_at)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", &query))
            .await
        {
            Ok(row) => row,
            Err(err) => {
                return match unique_violation_constraint(&err).as_deref() {
                    Some(USERS_EMAIL_CONSTRAINT) => Err(IdentityError::UserAlreadyExists),
                    _ => Err(db_error("INSERT", err)),
                };
            }
        };
        let user = user_from_row(&row)?;

        let query = r"
            INSERT INTO user_credentials
                (user_id, password_hash, last_password_change, updated_at)
            VALUES ($1, $2, $3, $3)
        ";
        sqlx::query(query)
            .bind(user.id)
            .bind(&new_user.password_hash)
            .bind(new_user.created_at)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| db_error("INSERT", err))?;

        insert_verification(&mut tx, &new_user.verification).await?;

        commit(tx).await?;
        Ok(user)
    }

    async fn get_verification_by_token(
        &self,
        token_hash: &[u8],
    ) -> Result<UserVerification, IdentityError> {
        let query =
            format!("SELECT {VERIFICATION_COLUMNS} FROM user_verifications WHERE token_hash = $1");
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error("SELECT", err))?
            .ok_or(IdentityError::TokenNotFound)?;
        verification_from_row(&row)
    }

    async fn confirm_verification(
        &self,
        user_id: Uuid,
        verification_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), IdentityError> {
        let mut tx = self.begin().await?;

        let query = r"
            UPDATE user_verifications
            SET status = 'consumed'
            WHERE id = $1
              AND user_id = $2
              AND status = 'pending'
              AND expires_at >= $3
            RETURNING id
        ";
        let consumed = sqlx::query(query)
            .bind(verification_id)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error("UPDATE", err))?;

        if consumed.is_none() {
            // Lost a race or the deadline passed: report where the record ended up.
            let query = "SELECT status FROM user_verifications WHERE id = $1 AND user_id = $2";
            let row = sqlx::query(query)
                .bind(verification_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .instrument(query_span("SELECT", query))
                .await
                .map_err(|err| db_error("SELECT", err))?
                .ok_or(IdentityError::TokenNotFound)?;
            let status: String = row.try_get("status").map_err(decode_error)?;
            return Err(match status.parse::<VerificationStatus>()? {
                VerificationStatus::Consumed => IdentityError::UsedToken,
                VerificationStatus::Expired | VerificationStatus::Pending => {
                    IdentityError::TokenExpired
                }
                VerificationStatus::Invalidated => IdentityError::InvalidTokenState,
            });
        }

        let query = r"
            UPDATE users
            SET status = CASE WHEN status = 'pending_verification' THEN 'active' ELSE status END,
                updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
        ";
        let updated = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error("UPDATE", err))?;
        if updated.rows_affected() == 0 {
            return Err(IdentityError::TokenNotFound);
        }

        commit(tx).await
    }

    async fn expire_verification(&self, verification_id: Uuid) -> Result<(), IdentityError> {
        let query = r"
            UPDATE user_verifications
            SET status = 'expired'
            WHERE id = $1 AND status = 'pending'
        ";
        sqlx::query(query)
            .bind(verification_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error("UPDATE", err))?;
        Ok(())
    }

    async fn get_latest_verification_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserVerification>, IdentityError> {
        let query = format!(
            r"
            SELECT {VERIFICATION_COLUMNS}
            FROM user_verifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error("SELECT", err))?;
        row.as_ref().map(verification_from_row).transpose()
    }

    async fn count_verifications_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> Result<u64, IdentityError> {
        let query = r"
            SELECT COUNT(*)
            FROM user_verifications
            WHERE user_id = $1 AND created_at >= $2
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error("SELECT", err))?;
        count_from_row(&row)
    }

    async fn rotate_verification_token(
        &self,
        previous: Option<Uuid>,
        record: &NewVerification,
        limits: ResendLimits,
    ) -> Result<(), IdentityError> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, record.user_id)
            .await
            .map_err(|err| match err {
                IdentityError::NotFound => IdentityError::UserNotFound,
                other => other,
            })?;
        check_resend_limits(&mut tx, record.user_id, limits).await?;

        let query = r"
            UPDATE user_verifications
            SET status = 'invalidated'
            WHERE status = 'pending'
              AND (user_id = $1 OR id = $2)
        ";
        sqlx::query(query)
            .bind(record.user_id)
            .bind(previous)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error("UPDATE", err))?;

        insert_verification(&mut tx, record).await?;
        commit(tx).await
    }

    async fn count_sessions(&self, user_id: Uuid) -> Result<u64, IdentityError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|err| db_error("ACQUIRE", err))?;
        count_user_sessions(&mut conn, user_id).await
    }

    async fn create_session(
        &self,
        session: &NewSession,
        max_sessions: u32,
    ) -> Result<UserSession, IdentityError> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, session.user_id).await?;

        if count_user_sessions(&mut tx, session.user_id).await? >= u64::from(max_sessions) {
            return Err(IdentityError::TooManyUserSessions);
        }
        let created = insert_session(&mut tx, session).await?;

        commit(tx).await?;
        Ok(created)
    }

    async fn create_session_evicting_oldest(
        &self,
        session: &NewSession,
        max_sessions: u32,
    ) -> Result<SessionCreated, IdentityError> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, session.user_id).await?;

        let mut evicted = None;
        if count_user_sessions(&mut tx, session.user_id).await? >= u64::from(max_sessions) {
            let query = r"
                DELETE FROM user_sessions
                WHERE id = (
                    SELECT id FROM user_sessions
                    WHERE user_id = $1
                    ORDER BY created_at ASC, id ASC
                    LIMIT 1
                )
                RETURNING id
            ";
            let row = sqlx::query(query)
                .bind(session.user_id)
                .fetch_optional(&mut *tx)
                .instrument(query_span("DELETE", query))
                .await
                .map_err(|err| db_error("DELETE", err))?;

            if let Some(row) = row {
                let evicted_id: Uuid = row.try_get("id").map_err(decode_error)?;
                insert_audit(
                    &mut tx,
                    evicted_id,
                    session.user_id,
                    AuditEventType::SessionEvicted,
                    Some(evicted_id.to_string()),
                    Some(session.id.to_string()),
                    session.created_at,
                )
                .await?;
                evicted = Some(evicted_id);
            }
        }

        let created = insert_session(&mut tx, session).await?;
        commit(tx).await?;

        Ok(SessionCreated {
            session: created,
            evicted,
        })
    }

    async fn delete_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), IdentityError> {
        let mut tx = self.begin().await?;

        let query = "DELETE FROM user_sessions WHERE id = $1 AND user_id = $2 RETURNING id";
        sqlx::query(query)
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| db_error("DELETE", err))?
            .ok_or(IdentityError::NotFound)?;

        insert_audit(
            &mut tx,
            session_id,
            user_id,
            AuditEventType::SessionDeleted,
            None,
            None,
            now,
        )
        .await?;

        commit(tx).await
    }

    async fn delete_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<u64, IdentityError> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, user_id).await?;
        if !session_exists(&mut tx, user_id, session_id).await? {
            return Err(IdentityError::NotFound);
        }

        let query = "DELETE FROM user_sessions WHERE user_id = $1 RETURNING id";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| db_error("DELETE", err))?;

        for row in &rows {
            let session_id: Uuid = row.try_get("id").map_err(decode_error)?;
            insert_audit(
                &mut tx,
                session_id,
                user_id,
                AuditEventType::SessionRevoked,
                None,
                None,
                now,
            )
            .await?;
        }

        let query = r"
            UPDATE user_verifications
            SET status = 'invalidated'
            WHERE user_id = $1 AND status = 'pending'
        ";
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error("UPDATE", err))?;

        let query = "UPDATE users SET deleted_at = $2, updated_at = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error("UPDATE", err))?;

        commit(tx).await?;
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    fn db_err(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(TestDbError {
            code: Some(code),
            constraint,
        }))
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        assert!(is_unique_violation(&db_err("23505", None)));
        assert!(!is_unique_violation(&db_err("99999", None)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn unique_violation_constraint_names() {
        assert_eq!(
            unique_violation_constraint(&db_err("23505", Some(TOKEN_HASH_CONSTRAINT))).as_deref(),
            Some(TOKEN_HASH_CONSTRAINT)
        );
        assert_eq!(
            unique_violation_constraint(&db_err("23505", None)).as_deref(),
            Some("")
        );
        assert_eq!(
            unique_violation_constraint(&db_err("23503", Some("fk"))),
            None
        );
    }

    #[test]
    fn db_error_classifies_not_found() {
        assert_eq!(
            db_error("SELECT", sqlx::Error::RowNotFound),
            IdentityError::NotFound
        );
        assert_eq!(
            db_error("SELECT", sqlx::Error::PoolTimedOut),
            IdentityError::DatabaseInternalError
        );
    }

    #[test]
    fn schema_declares_named_constraints() {
        assert!(SCHEMA.contains(USERS_EMAIL_CONSTRAINT));
        assert!(SCHEMA.contains(TOKEN_HASH_CONSTRAINT));
        assert!(SCHEMA.contains(ONE_PENDING_CONSTRAINT));
    }
}
