//! Session storage for Weaver.
//!
//! [`SessionStore`] owns the live sessions; persisters give it optional
//! durable backing.

pub mod store;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use store::SessionStore;
pub use in_memory::InMemoryPersister;

#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePersister;
