#![warn(missing_docs)]

//! # glimpse-store
//!
//! The two long-lived shared resources of the pipeline:
//!
//! - [`CacheStore`]: artifacts keyed by `(endpoint, cache key, session?)`
//!   with per-write TTL and access accounting, over a pluggable
//!   [`CacheBackend`].
//! - [`SessionRegistry`]: opaque visitor sessions with endpoint bindings and
//!   idle expiry.
//!
//! Both are constructed once at startup, shared behind `Arc`, and swept in
//! the background by [`sweep::spawn_sweeper`]. All time arithmetic goes
//! through a [`Clock`] so expiry can be tested without sleeping.

pub mod cache;
pub mod clock;
pub mod session;
pub mod sweep;

pub use cache::{
    BackendError, CacheBackend, CacheEntry, CacheStats, CacheStore, CompositeKey, DeleteFilter,
    MemoryBackend,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{Resolved, SessionConfig, SessionRegistry, SessionStats};
pub use sweep::{spawn_sweeper, SweepConfig};
