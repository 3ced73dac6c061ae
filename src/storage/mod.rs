//! Persistent subscription store collaborator.
//!
//! The cache never talks to a database directly; the synchronizer reads
//! through [`SubscriptionStore`]. [`InMemorySubscriptionStore`] backs tests
//! and embedded use.

pub mod memory;
pub mod traits;

pub use memory::InMemorySubscriptionStore;
pub use traits::{StatsUpdate, StorageError, SubscriptionStore, TenantScope};
