//! iconpipe-cache: resolution cache and in-flight deduplication.
//!
//! The cache is the only place duplicate remote calls are prevented.
//!
//! # Architecture
//!
//! ```text
//! ResolutionCache
//!   ├── resolved: ItemId → CacheEntry (Found | NotFound, write-once)
//!   └── in_flight: ItemId → InFlight
//!       ├── shared CancelToken (fires when the last waiter leaves)
//!       ├── watch channel carrying the eventual outcome
//!       └── waiter count
//! ```
//!
//! A caller that misses the cache asks for an `InFlightHandle`. The first
//! caller's factory future is spawned; later callers join it. When the
//! work settles, an authoritative outcome is cached before it is
//! broadcast to the handles and the registry entry is removed.

pub mod cache;
pub mod in_flight;

pub use cache::ResolutionCache;
pub use in_flight::InFlightHandle;
