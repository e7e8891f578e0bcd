//! Handle-to-display-name resolution.
//!
//! Provides a TTL'd LRU name cache, an optional persisted cache,
//! request coalescing, and a rate-limited fetch queue in front of a
//! network name source.

pub mod cache;
pub mod config;
pub mod parse;
pub mod persist;
pub mod queue;
pub mod resolver;
pub mod source;

mod key;

pub use cache::{CacheEntry, Lookup, ResolutionCache, Ttls};
pub use config::{ConfigError, ResolverConfig};
pub use key::{InvalidKey, ResolveKey};
pub use persist::{FileStorage, MemoryStorage, Storage, StorageError};
pub use queue::FetchQueue;
pub use resolver::{Clock, ResolverBuilder, ResolverService, ResolverStats, SystemClock};
pub use source::{NameSource, YouTubeSource};

/// Why a single name lookup failed.
///
/// None of these reach the end user: the resolver collapses every variant
/// into a negative cache entry and the page keeps showing the raw handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("fetch timed out")]
    Timeout,

    #[error("response did not contain a usable name field: {0}")]
    ParseFailure(String),

    #[error("no display name found")]
    NotFound,

    #[error("lookup cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::NetworkFailure(e.to_string())
        }
    }
}
