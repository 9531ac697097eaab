//! The six identity use cases.

use secrecy::SecretString;
use std::{fmt, future::Future, net::IpAddr, sync::Arc};
use time::OffsetDateTime;
use tokio::{sync::OnceCell, task::spawn_blocking, time::timeout};
use tracing::{debug, error, field, info, instrument, warn, Span};
use uuid::Uuid;

use super::{
    clock::SystemClock,
    config::IdentityConfig,
    email::{normalize_email, FormatEmailValidator},
    error::IdentityError,
    model::{NewUser, User, UserStatus},
    password::Passwords,
    ports::{Clock, CredentialStore, EmailValidator, EventPublisher, RateLimiter},
    session::{SessionManager, SessionOrigin},
    verification::{IssuedToken, VerificationManager},
};
use crate::{events::LogEventPublisher, keys::TokenSigner, ratelimit::NoopRateLimiter};

const DUMMY_PASSWORD: &str = "warden-timing-equalizer";

pub struct RegisterRequest {
    pub email: String,
    pub password: SecretString,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
    pub ip_address: IpAddr,
    pub user_agent: String,
    pub device: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("ip_address", &self.ip_address)
            .field("user_agent", &self.user_agent)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginResponse {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub access_token: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_token: String,
    pub refresh_expires_at: OffsetDateTime,
}

/// Identifies the caller's own session, taken from a verified access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogoutRequest {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

/// The caller's account and the session their access token is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteAccountRequest {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

pub struct IdentityService {
    store: Arc<dyn CredentialStore>,
    publisher: Arc<dyn EventPublisher>,
    email_validator: Arc<dyn EmailValidator>,
    clock: Arc<dyn Clock>,
    signer: TokenSigner,
    passwords: Passwords,
    config: IdentityConfig,
    verifications: VerificationManager,
    sessions: SessionManager,
    dummy_hash: OnceCell<String>,
}

/// Wires an [`IdentityService`]. Only the store and the signer are required;
/// everything else falls back to a permissive local default.
pub struct IdentityServiceBuilder {
    store: Arc<dyn CredentialStore>,
    signer: TokenSigner,
    limiter: Arc<dyn RateLimiter>,
    publisher: Arc<dyn EventPublisher>,
    email_validator: Arc<dyn EmailValidator>,
    clock: Arc<dyn Clock>,
    passwords: Passwords,
    config: IdentityConfig,
}

impl IdentityServiceBuilder {
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    #[must_use]
    pub fn email_validator(mut self, validator: Arc<dyn EmailValidator>) -> Self {
        self.email_validator = validator;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn passwords(mut self, passwords: Passwords) -> Self {
        self.passwords = passwords;
        self
    }

    #[must_use]
    pub fn config(mut self, config: IdentityConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn build(self) -> IdentityService {
        let verifications = VerificationManager::new(
            self.store.clone(),
            self.limiter,
            self.clock.clone(),
            self.config.clone(),
        );
        let sessions = SessionManager::new(
            self.store.clone(),
            self.signer.clone(),
            self.clock.clone(),
            self.config.clone(),
        );

        IdentityService {
            store: self.store,
            publisher: self.publisher,
            email_validator: self.email_validator,
            clock: self.clock,
            signer: self.signer,
            passwords: self.passwords,
            config: self.config,
            verifications,
            sessions,
            dummy_hash: OnceCell::new(),
        }
    }
}

impl IdentityService {
    #[must_use]
    pub fn builder(store: Arc<dyn CredentialStore>, signer: TokenSigner) -> IdentityServiceBuilder {
        IdentityServiceBuilder {
            store,
            signer,
            limiter: Arc::new(NoopRateLimiter),
            publisher: Arc::new(LogEventPublisher),
            email_validator: Arc::new(FormatEmailValidator),
            clock: Arc::new(SystemClock),
            passwords: Passwords::default(),
            config: IdentityConfig::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    async fn with_deadline<T, F>(&self, operation: &'static str, fut: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, IdentityError>>,
    {
        if let Ok(result) = timeout(self.config.request_timeout(), fut).await {
            result
        } else {
            warn!(operation, "request deadline exceeded");
            Err(IdentityError::Timeout)
        }
    }

    async fn hash_password(&self, password: SecretString) -> Result<String, IdentityError> {
        let passwords = self.passwords.clone();
        spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|err| {
                error!("password hashing task failed: {err}");
                IdentityError::HashingError
            })?
            .map_err(|err| {
                error!("{err:#}");
                IdentityError::HashingError
            })
    }

    async fn verify_password(
        &self,
        password: SecretString,
        stored_hash: String,
    ) -> Result<bool, IdentityError> {
        let passwords = self.passwords.clone();
        spawn_blocking(move || passwords.verify(&password, &stored_hash))
            .await
            .map_err(|err| {
                error!("password verification task failed: {err}");
                IdentityError::HashingError
            })
    }

    /// Burn one verification so unknown emails cost as much as wrong passwords.
    async fn reject_unknown_user(&self, password: SecretString) -> IdentityError {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash_password(SecretString::from(DUMMY_PASSWORD)))
            .await;
        if let Ok(hash) = dummy {
            let _ = self.verify_password(password, hash.clone()).await;
        }
        IdentityError::InvalidPassword
    }

    /// Create a `pending_verification` user and hand its first verification
    /// token to the event publisher.
    ///
    /// # Errors
    /// `BrokerInternalError` means the account was created but the
    /// notification failed; it is not rolled back.
    #[instrument(skip_all, fields(user_id = field::Empty))]
    pub async fn register(&self, request: RegisterRequest) -> Result<User, IdentityError> {
        self.with_deadline("register", self.register_user(request))
            .await
    }

    async fn register_user(&self, request: RegisterRequest) -> Result<User, IdentityError> {
        let email = normalize_email(&request.email);
        self.email_validator
            .validate(&email)
            .await
            .map_err(|err| match err {
                IdentityError::InvalidEmail => IdentityError::InvalidEmail,
                other => {
                    warn!("email validation could not run: {other}");
                    IdentityError::DomainInternalError
                }
            })?;

        let password_hash = self.hash_password(request.password).await?;

        match self.store.get_user_by_email(&email).await {
            Ok(_) => return Err(IdentityError::UserAlreadyExists),
            Err(IdentityError::NotFound) => {}
            Err(err) => {
                error!("user lookup failed: {err}");
                return Err(IdentityError::DatabaseInternalError);
            }
        }

        let now = self.clock.now();
        let user_id = Uuid::new_v4();
        for attempt in 1..=self.config.register_max_attempts() {
            let IssuedToken { token, record } = self.verifications.issue(user_id, now)?;
            let new_user = NewUser {
                id: user_id,
                email: email.clone(),
                password_hash: password_hash.clone(),
                created_at: now,
                verification: record,
            };

            match self.store.create_user_with_credentials(&new_user).await {
                Ok(user) => {
                    Span::current().record("user_id", field::display(user.id));
                    info!("user registered");
                    if let Err(err) = self
                        .publisher
                        .publish_user_registered(&user.email, &token)
                        .await
                    {
                        error!("failed to publish user registered event: {err:#}");
                        return Err(IdentityError::BrokerInternalError);
                    }
                    return Ok(user);
                }
                Err(IdentityError::TokenCollision) => {
                    warn!(attempt, "verification token collision, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        error!("registration exhausted its token retries");
        Err(IdentityError::DatabaseInternalError)
    }

    /// Consume a verification token and activate the account.
    ///
    /// # Errors
    /// See [`VerificationManager::verify`].
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<Uuid, IdentityError> {
        self.with_deadline("verify_email", self.verifications.verify(token))
            .await
    }

    /// Rotate the pending verification token and publish the new one.
    ///
    /// # Errors
    /// See [`VerificationManager::resend`]; `BrokerInternalError` if the
    /// rotation committed but publishing failed.
    #[instrument(skip_all)]
    pub async fn resend_verification(&self, email: &str) -> Result<(), IdentityError> {
        self.with_deadline("resend_verification", async {
            let email = normalize_email(email);
            let token = self.verifications.resend(&email).await?;
            if let Err(err) = self
                .publisher
                .publish_verification_resent(&email, &token)
                .await
            {
                error!("failed to publish verification resent event: {err:#}");
                return Err(IdentityError::BrokerInternalError);
            }
            debug!("verification token rotated");
            Ok(())
        })
        .await
    }

    /// Check credentials and open a session.
    ///
    /// # Errors
    /// `InvalidPassword` for unknown emails and wrong passwords alike, then
    /// `UserNotVerified`, `UserAccountBanned` or `UserAccountSuspended`.
    #[instrument(skip_all, fields(user_id = field::Empty, ip = %request.ip_address))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, IdentityError> {
        self.with_deadline("login", self.authenticate(request))
            .await
    }

    async fn authenticate(&self, request: LoginRequest) -> Result<LoginResponse, IdentityError> {
        let LoginRequest {
            email,
            password,
            ip_address,
            user_agent,
            device,
        } = request;
        let email = normalize_email(&email);

        let user = match self.store.get_user_by_email(&email).await {
            Ok(user) => user,
            Err(IdentityError::NotFound) => return Err(self.reject_unknown_user(password).await),
            Err(err) => return Err(err),
        };
        Span::current().record("user_id", field::display(user.id));

        let credentials = self
            .store
            .get_credentials(user.id)
            .await
            .map_err(|err| match err {
                IdentityError::NotFound => {
                    error!("user has no credentials row");
                    IdentityError::RepositoryInternalError
                }
                other => other,
            })?;

        if !self
            .verify_password(password, credentials.password_hash)
            .await?
        {
            return Err(IdentityError::InvalidPassword);
        }

        match user.status {
            UserStatus::Active => {}
            UserStatus::PendingVerification => return Err(IdentityError::UserNotVerified),
            UserStatus::Banned => return Err(IdentityError::UserAccountBanned),
            UserStatus::Suspended => return Err(IdentityError::UserAccountSuspended),
        }

        let opened = self
            .sessions
            .open(
                user.id,
                SessionOrigin {
                    ip_address,
                    user_agent,
                    device,
                },
            )
            .await?;

        Ok(LoginResponse {
            session_id: opened.session.id,
            user_id: user.id,
            access_token: opened.access.token,
            access_expires_at: opened.access.expires_at,
            refresh_token: opened.refresh.token,
            refresh_expires_at: opened.refresh.expires_at,
        })
    }

    /// # Errors
    /// [`IdentityError::NotFound`] when the session is unknown or not the
    /// caller's.
    #[instrument(skip_all, fields(user_id = %request.user_id))]
    pub async fn logout(&self, request: LogoutRequest) -> Result<(), IdentityError> {
        self.with_deadline(
            "logout",
            self.sessions.close(request.user_id, request.session_id),
        )
        .await
    }

    /// Revoke all sessions and tombstone the account.
    ///
    /// # Errors
    /// [`IdentityError::NotFound`] for unknown or already deleted users, and
    /// when the requesting session no longer exists.
    #[instrument(skip_all, fields(user_id = %request.user_id))]
    pub async fn delete_account(&self, request: DeleteAccountRequest) -> Result<(), IdentityError> {
        self.with_deadline("delete_account", async {
            self.sessions
                .delete_account(request.user_id, request.session_id)
                .await?;
            Ok(())
        })
        .await
    }
}
