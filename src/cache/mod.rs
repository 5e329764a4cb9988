//! In-memory caches fronting the embedded store.
//!
//! Three tiers: a byte/item-bounded LRU for skill bodies, the same for
//! governance documents, and a TTL-capped cache for search result sets.

pub mod bounded;
pub mod expiring;
pub mod manager;

pub use bounded::{BoundedCache, CacheStats};
pub use expiring::TtlCache;
pub use manager::{CacheManager, ManagerStats};
