//! Sponsored feed engine: a per-placement ad cache with lazy expiration,
//! single-flight fetch scheduling and retry backoff, plus the placement
//! arithmetic that interleaves ads into a host content list.
//!
//! Nothing in this crate performs I/O. The cache drives an [`AdSource`]
//! which is expected to issue requests and arm retry timers elsewhere and
//! report back through [`AdCache::complete`] and [`AdCache::retry_due`].
//! All types are meant to be owned and mutated by a single context.

pub mod ad;
pub mod cache;
pub mod error;
pub mod fetch;
pub mod placement;
pub mod request;
pub mod response;

pub use ad::{Ad, AdId, Creative};
pub use cache::{AdCache, CacheEntry, CacheSettings, CacheStats, Completion};
pub use error::{FeedError, FetchError};
pub use fetch::{AdSource, FetchPhase, FetchState, RetrySchedule};
pub use placement::{FeedPlacement, PlacementSpec, SlotState};

use std::fmt;

/// Identifies one ad slot configuration (an inventory code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlacementKey(String);

impl PlacementKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlacementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlacementKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for PlacementKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::ad::{Ad, Creative};
    use std::time::Instant;

    pub fn creative(advertiser: &str) -> Creative {
        Creative {
            advertiser_name: advertiser.to_string(),
            heading: format!("{advertiser} heading"),
            caption: format!("{advertiser} caption"),
            clickthrough_url: format!("http://{advertiser}.example/landing"),
            image_url: format!("http://{advertiser}.example/image.png"),
            logo_url: None,
            impression_pixels: vec![format!("http://px.example/{advertiser}/imp")],
            clickthrough_pixels: vec![format!("http://px.example/{advertiser}/click")],
            share_pixels: vec![],
        }
    }

    pub fn ad_at(advertiser: &str, created: Instant) -> Ad {
        Ad::new(creative(advertiser), created)
    }
}
