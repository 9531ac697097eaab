//! Identity lifecycle core.
//!
//! [`IdentityService`] is the only entry point used by the transport. It
//! sequences the [`verification::VerificationManager`] and the
//! [`session::SessionManager`] over the capability traits in [`ports`], and
//! never touches a concrete storage technology.

pub mod clock;
pub mod config;
pub mod email;
pub mod error;
pub mod model;
pub mod password;
pub mod ports;
pub mod service;
pub mod session;
pub mod token;
pub mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::IdentityConfig;
pub use error::IdentityError;
pub use service::{
    DeleteAccountRequest, IdentityService, IdentityServiceBuilder, LoginRequest, LoginResponse,
    LogoutRequest, RegisterRequest,
};
