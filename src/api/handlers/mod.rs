pub mod health;
pub mod registration;
pub mod session;

pub(crate) mod error;
pub(crate) mod principal;
pub(crate) mod rate_limit;
pub(crate) mod types;
pub(crate) mod utils;

mod state;
pub use self::state::{AppState, IpRateLimit};
