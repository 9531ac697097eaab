//! In-process credential store for local runs and tests.
//!
//! One mutex guards every table, so each trait call is trivially atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::identity::{
    error::IdentityError,
    model::{
        AuditEventType, AuditUserSession, NewSession, NewUser, NewVerification, User,
        UserCredentials, UserSession, UserStatus, UserVerification, VerificationStatus,
    },
    ports::{CredentialStore, ResendLimits, SessionCreated},
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    credentials: HashMap<Uuid, UserCredentials>,
    verifications: Vec<UserVerification>,
    sessions: Vec<UserSession>,
    audit: Vec<AuditUserSession>,
}

impl Tables {
    fn active_user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|user| user.deleted_at.is_none() && user.email == email)
    }

    fn token_taken(&self, token_hash: &[u8]) -> bool {
        self.verifications
            .iter()
            .any(|record| record.token_hash == token_hash)
    }

    fn session_count(&self, user_id: Uuid) -> u64 {
        self.sessions
            .iter()
            .filter(|session| session.user_id == user_id)
            .count() as u64
    }

    fn audit(
        &mut self,
        session: &UserSession,
        event_type: AuditEventType,
        old_value: Option<String>,
        new_value: Option<String>,
        at: OffsetDateTime,
    ) {
        self.audit.push(AuditUserSession {
            id: Uuid::new_v4(),
            session_id: session.id,
            user_id: session.user_id,
            event_type,
            old_value,
            new_value,
            created_at: at,
        });
    }

    fn insert_verification(&mut self, record: &NewVerification) {
        self.verifications.push(UserVerification {
            id: record.id,
            user_id: record.user_id,
            token_hash: record.token_hash.clone(),
            status: VerificationStatus::Pending,
            expires_at: record.expires_at,
            created_at: record.created_at,
        });
    }

    fn insert_session(&mut self, new: &NewSession) -> UserSession {
        let session = UserSession {
            id: new.id,
            user_id: new.user_id,
            ip_address: new.ip_address,
            user_agent: new.user_agent.clone(),
            device: new.device.clone(),
            created_at: new.created_at,
            last_active: new.created_at,
            expires_at: new.expires_at,
        };
        self.sessions.push(session.clone());
        self.audit(
            &session,
            AuditEventType::SessionCreated,
            None,
            Some(session.ip_address.to_string()),
            new.created_at,
        );
        session
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    tables: Mutex<Tables>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every verification record of a user, oldest first.
    pub async fn verifications_for(&self, user_id: Uuid) -> Vec<UserVerification> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .verifications
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    pub async fn audit_log(&self, user_id: Uuid) -> Vec<AuditUserSession> {
        let tables = self.tables.lock().await;
        tables
            .audit
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Set a user's status directly, for accounts moderated out of band.
    pub async fn set_user_status(&self, user_id: Uuid, status: UserStatus) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&user_id) {
            Some(user) => {
                user.status = status;
                true
            }
            None => false,
        }
    }

    /// Sessions of a user, oldest first.
    pub async fn sessions_for(&self, user_id: Uuid) -> Vec<UserSession> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<_> = tables
            .sessions
            .iter()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    pub async fn get_user(&self, user_id: Uuid) -> Option<User> {
        self.tables.lock().await.users.get(&user_id).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_user_by_email(&self, email: &str) -> Result<User, IdentityError> {
        let tables = self.tables.lock().await;
        tables
            .active_user_by_email(email)
            .cloned()
            .ok_or(IdentityError::NotFound)
    }

    async fn get_credentials(&self, user_id: Uuid) -> Result<UserCredentials, IdentityError> {
        let tables = self.tables.lock().await;
        tables
            .credentials
            .get(&user_id)
            .cloned()
            .ok_or(IdentityError::NotFound)
    }

    async fn create_user_with_credentials(
        &self,
        new_user: &NewUser,
    ) -> Result<User, IdentityError> {
        let mut tables = self.tables.lock().await;
        if tables.active_user_by_email(&new_user.email).is_some() {
            return Err(IdentityError::UserAlreadyExists);
        }
        if tables.token_taken(&new_user.verification.token_hash) {
            return Err(IdentityError::TokenCollision);
        }

        let user = User {
            id: new_user.id,
            email: new_user.email.clone(),
            status: UserStatus::PendingVerification,
            mfa_enabled: false,
            created_at: new_user.created_at,
            updated_at: new_user.created_at,
            deleted_at: None,
        };
        tables.users.insert(user.id, user.clone());
        tables.credentials.insert(
            user.id,
            UserCredentials {
                user_id: user.id,
                password_hash: new_user.password_hash.clone(),
                last_password_change: new_user.created_at,
                updated_at: new_user.created_at,
            },
        );
        tables.insert_verification(&new_user.verification);
        Ok(user)
    }

    async fn get_verification_by_token(
        &self,
        token_hash: &[u8],
    ) -> Result<UserVerification, IdentityError> {
        let tables = self.tables.lock().await;
        tables
            .verifications
            .iter()
            .find(|record| record.token_hash == token_hash)
            .cloned()
            .ok_or(IdentityError::TokenNotFound)
    }

    async fn confirm_verification(
        &self,
        user_id: Uuid,
        verification_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), IdentityError> {
        let mut tables = self.tables.lock().await;

        let Some(index) = tables
            .verifications
            .iter()
            .position(|record| record.id == verification_id && record.user_id == user_id)
        else {
            return Err(IdentityError::TokenNotFound);
        };

        match tables.verifications[index].status {
            VerificationStatus::Pending => {}
            VerificationStatus::Consumed => return Err(IdentityError::UsedToken),
            VerificationStatus::Expired => return Err(IdentityError::TokenExpired),
            VerificationStatus::Invalidated => return Err(IdentityError::InvalidTokenState),
        }
        if tables.verifications[index].is_expired_at(now) {
            return Err(IdentityError::TokenExpired);
        }

        let Some(user) = tables
            .users
            .get_mut(&user_id)
            .filter(|user| user.deleted_at.is_none())
        else {
            return Err(IdentityError::TokenNotFound);
        };
        if user.status == UserStatus::PendingVerification {
            user.status = UserStatus::Active;
            user.updated_at = now;
        }
        tables.verifications[index].status = VerificationStatus::Consumed;
        Ok(())
    }

    async fn expire_verification(&self, verification_id: Uuid) -> Result<(), IdentityError> {
        let mut tables = self.tables.lock().await;
        if let Some(record) = tables
            .verifications
            .iter_mut()
            .find(|record| record.id == verification_id)
        {
            if record.status == VerificationStatus::Pending {
                record.status = VerificationStatus::Expired;
            }
        }
        Ok(())
    }

    async fn get_latest_verification_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserVerification>, IdentityError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .verifications
            .iter()
            .filter(|record| record.user_id == user_id)
            // `max_by_key` keeps the last maximum, i.e. the latest insert on ties.
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn count_verifications_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> Result<u64, IdentityError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .verifications
            .iter()
            .filter(|record| record.user_id == user_id && record.created_at >= since)
            .count() as u64)
    }

    async fn rotate_verification_token(
        &self,
        previous: Option<Uuid>,
        record: &NewVerification,
        limits: ResendLimits,
    ) -> Result<(), IdentityError> {
        let mut tables = self.tables.lock().await;

        let mut latest = None;
        let mut recent = 0u64;
        for existing in tables
            .verifications
            .iter()
            .filter(|existing| existing.user_id == record.user_id)
        {
            latest = latest.max(Some(existing.created_at));
            if existing.created_at >= limits.window_start {
                recent += 1;
            }
        }
        if latest.is_some_and(|created_at| created_at > limits.cooldown_start)
            || recent >= limits.hourly_cap
        {
            return Err(IdentityError::TooManyRequests);
        }

        if tables.token_taken(&record.token_hash) {
            return Err(IdentityError::TokenCollision);
        }

        for existing in &mut tables.verifications {
            let owned = existing.user_id == record.user_id;
            if existing.status == VerificationStatus::Pending
                && (owned || Some(existing.id) == previous)
            {
                existing.status = VerificationStatus::Invalidated;
            }
        }
        tables.insert_verification(record);
        Ok(())
    }

    async fn count_sessions(&self, user_id: Uuid) -> Result<u64, IdentityError> {
        Ok(self.tables.lock().await.session_count(user_id))
    }

    async fn create_session(
        &self,
        session: &NewSession,
        max_sessions: u32,
    ) -> Result<UserSession, IdentityError> {
        let mut tables = self.tables.lock().await;
        if tables.session_count(session.user_id) >= u64::from(max_sessions) {
            return Err(IdentityError::TooManyUserSessions);
        }
        Ok(tables.insert_session(session))
    }

    async fn create_session_evicting_oldest(
        &self,
        session: &NewSession,
        max_sessions: u32,
    ) -> Result<SessionCreated, IdentityError> {
        let mut tables = self.tables.lock().await;

        let mut evicted = None;
        if tables.session_count(session.user_id) >= u64::from(max_sessions) {
            let oldest = tables
                .sessions
                .iter()
                .enumerate()
                .filter(|(_, existing)| existing.user_id == session.user_id)
                .min_by_key(|(_, existing)| existing.created_at)
                .map(|(index, _)| index);
            if let Some(index) = oldest {
                let removed = tables.sessions.remove(index);
                tables.audit(
                    &removed,
                    AuditEventType::SessionEvicted,
                    Some(removed.id.to_string()),
                    Some(session.id.to_string()),
                    session.created_at,
                );
                evicted = Some(removed.id);
            }
        }

        let created = tables.insert_session(session);
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
        let mut tables = self.tables.lock().await;
        let Some(index) = tables
            .sessions
            .iter()
            .position(|session| session.id == session_id && session.user_id == user_id)
        else {
            return Err(IdentityError::NotFound);
        };
        let removed = tables.sessions.remove(index);
        tables.audit(&removed, AuditEventType::SessionDeleted, None, None, now);
        Ok(())
    }

    async fn delete_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<u64, IdentityError> {
        let mut tables = self.tables.lock().await;
        match tables.users.get(&user_id) {
            Some(user) if user.deleted_at.is_none() => {}
            _ => return Err(IdentityError::NotFound),
        }
        if !tables
            .sessions
            .iter()
            .any(|session| session.id == session_id && session.user_id == user_id)
        {
            return Err(IdentityError::NotFound);
        }

        let (revoked, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.sessions)
            .into_iter()
            .partition(|session| session.user_id == user_id);
        tables.sessions = kept;
        for session in &revoked {
            tables.audit(session, AuditEventType::SessionRevoked, None, None, now);
        }

        for record in &mut tables.verifications {
            if record.user_id == user_id && record.status == VerificationStatus::Pending {
                record.status = VerificationStatus::Invalidated;
            }
        }

        if let Some(user) = tables.users.get_mut(&user_id) {
            user.deleted_at = Some(now);
            user.updated_at = now;
        }
        Ok(revoked.len() as u64)
    }
}
