//! [`CredentialStore`](crate::identity::ports::CredentialStore) adapters.

mod memory;
mod postgres;

pub use self::memory::MemoryCredentialStore;
pub use self::postgres::{connect, PostgresCredentialStore};
