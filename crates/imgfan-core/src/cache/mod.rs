//! Caching in front of the history store and derived-data builders.
//!
//! Two distinct needs:
//!
//! - [`TtlCache`] - a generic single-entry cache with a fixed lifetime,
//!   for expensive aggregates (time-period statistics). Invalidation is
//!   broadcast so other windows drop their copy too.
//! - [`LruCache`] - a bounded multi-value cache for per-item derived data
//!   (full detail rows, thumbnails), evicting the least-recently-touched
//!   entry when full.
//!
//! Both de-duplicate concurrent loads of the same missing key.

mod lru;
mod ttl;

pub use lru::LruCache;
pub use ttl::TtlCache;
