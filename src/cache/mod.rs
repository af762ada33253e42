//! Query cache.
//!
//! A keyed, time-expiring store for query results shared by every façade:
//!
//! - **Keys** are structured (`entity`, `scope`, `qualifier`) and render to
//!   the `"<entity>_<scope>[_<qualifier>]"` namespace.
//! - **Expiry** is lazy: an expired entry is a miss on the next read.
//! - **Invalidation** works by entity family, by scope, or by substring.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_ttl_seconds = 300
//! profile_ttl_seconds = 600
//! offers_ttl_seconds = 180
//! max_entries = 1000
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod registry;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, EntityKind, hash_value};
pub use registry::CacheRegistry;
pub use store::{CacheStats, CachedValue, QueryCache, TtlCache};

pub(crate) use store::{
    METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED, METRIC_CACHE_MISS,
};
