//! Transactional keyed record storage for a single partition replica.
//!
//! [`StorageBackend`] / [`StorageTransaction`] describe the ACID key/value
//! provider; [`MemoryStorage`] is the in-process implementation. On top of it
//! [`Collection`] gives a typed JSON view and [`StateManager`] owns the named
//! collections of one replica.

pub mod backends;
pub mod collection;
pub mod config;
pub mod error;
pub mod state;
pub mod traits;

pub use backends::memory::{MemoryStorage, MemoryTransaction};
pub use collection::{Collection, TypedTransaction};
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use state::StateManager;
pub use traits::{StorageBackend, StorageTransaction};
