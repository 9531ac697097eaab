//! Login sessions: creation under the concurrent-session limit, logout and
//! account teardown.

use std::{net::IpAddr, sync::Arc};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{
    config::IdentityConfig,
    error::IdentityError,
    model::{NewSession, UserSession},
    ports::{Clock, CredentialStore, SessionCreated},
};
use crate::keys::{SignedToken, TokenKind, TokenSigner};

/// Where a login came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOrigin {
    pub ip_address: IpAddr,
    pub user_agent: String,
    pub device: Option<String>,
}

/// A persisted session and the two tokens bound to it.
#[derive(Clone, Debug)]
pub struct OpenedSession {
    pub session: UserSession,
    pub access: SignedToken,
    pub refresh: SignedToken,
    pub evicted: Option<Uuid>,
}

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    signer: TokenSigner,
    clock: Arc<dyn Clock>,
    config: IdentityConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        signer: TokenSigner,
        clock: Arc<dyn Clock>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            store,
            signer,
            clock,
            config,
        }
    }

    fn sign(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        kind: TokenKind,
        now: time::OffsetDateTime,
    ) -> Result<SignedToken, IdentityError> {
        let ttl = match kind {
            TokenKind::Access => self.config.access_token_ttl(),
            TokenKind::Refresh => self.config.refresh_token_ttl(),
        };
        self.signer
            .sign(session_id, user_id, kind, now, ttl)
            .map_err(|err| {
                error!("failed to sign {kind:?} token: {err}");
                IdentityError::DomainInternalError
            })
    }

    /// Open a session for an authenticated user.
    ///
    /// Tokens are signed before anything is written, so a signing failure
    /// leaves no session behind. At the limit, the oldest session is evicted in
    /// the same transaction as the insert.
    ///
    /// # Errors
    /// `DomainInternalError` if signing fails, or an error from the store.
    pub async fn open(
        &self,
        user_id: Uuid,
        origin: SessionOrigin,
    ) -> Result<OpenedSession, IdentityError> {
        let now = self.clock.now();
        let session_id = Uuid::new_v4();

        let access = self.sign(session_id, user_id, TokenKind::Access, now)?;
        let refresh = self.sign(session_id, user_id, TokenKind::Refresh, now)?;

        let new_session = NewSession {
            id: session_id,
            user_id,
            ip_address: origin.ip_address,
            user_agent: origin.user_agent,
            device: origin.device,
            created_at: now,
            expires_at: refresh.expires_at,
        };

        let max_sessions = self.config.max_sessions();
        let SessionCreated { session, evicted } =
            if self.store.count_sessions(user_id).await? >= u64::from(max_sessions) {
                self.store
                    .create_session_evicting_oldest(&new_session, max_sessions)
                    .await?
            } else {
                match self.store.create_session(&new_session, max_sessions).await {
                    Ok(session) => SessionCreated {
                        session,
                        evicted: None,
                    },
                    // A concurrent login filled the last slot.
                    Err(IdentityError::TooManyUserSessions) => {
                        self.store
                            .create_session_evicting_oldest(&new_session, max_sessions)
                            .await?
                    }
                    Err(err) => return Err(err),
                }
            };

        if let Some(evicted) = evicted {
            info!(%user_id, %evicted, "session limit reached, evicted oldest session");
        }
        debug!(%user_id, session_id = %session.id, "session created");

        Ok(OpenedSession {
            session,
            access,
            refresh,
            evicted,
        })
    }

    /// # Errors
    /// [`IdentityError::NotFound`] when the session is unknown or belongs to
    /// someone else.
    pub async fn close(&self, user_id: Uuid, session_id: Uuid) -> Result<(), IdentityError> {
        self.store
            .delete_session(user_id, session_id, self.clock.now())
            .await?;
        debug!(%user_id, %session_id, "session deleted");
        Ok(())
    }

    /// Revoke every session and tombstone the user, on behalf of the caller's
    /// still-live `session_id`.
    ///
    /// # Errors
    /// [`IdentityError::NotFound`] for unknown or already deleted users, and
    /// when `session_id` was logged out or evicted.
    pub async fn delete_account(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<u64, IdentityError> {
        let revoked = self
            .store
            .delete_user(user_id, session_id, self.clock.now())
            .await?;
        info!(%user_id, revoked, "account deleted");
        Ok(revoked)
    }
}
