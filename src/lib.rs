//! # Warden (user identity lifecycle engine)
//!
//! `warden` owns the lifecycle of a self-service account: registration with a
//! confirmed email address, verification-token rotation, login sessions with a
//! bounded number of concurrent devices, logout and account deletion.
//!
//! ## Layout
//!
//! - [`identity`] holds the domain: the error taxonomy, the entities, the
//!   capability traits (ports) and the managers that sequence them.
//! - [`keys`] keeps the RS256 signing key sealed in memory and mints bearer tokens.
//! - [`store`], [`ratelimit`] and [`events`] are adapters for the ports.
//! - [`api`] is a thin axum transport over [`identity::IdentityService`].
//!
//! ## Verification tokens
//!
//! Tokens are 256-bit random values handed to the event publisher for
//! out-of-band delivery. Only a SHA-256 hash is persisted, and at most one
//! token per user is ever `pending`.
//!
//! ## Sessions
//!
//! The session id doubles as the `jti` of both the access and refresh tokens.
//! When a user already holds the configured maximum, the oldest session is
//! evicted in the same transaction that creates the new one.

pub mod api;
pub mod cli;
pub mod events;
pub mod identity;
pub mod keys;
pub mod ratelimit;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
