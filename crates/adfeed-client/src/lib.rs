//! Runtime side of the sponsored feed: HTTP fetching and beacons on tokio,
//! and the [`FeedController`] that interleaves fetched ads into a host list.

pub mod beacon;
pub mod config;
pub mod content;
pub mod controller;
pub mod fetcher;
pub mod metrics;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use beacon::{BeaconKind, BeaconSender};
pub use config::{ConfigError, ControllerConfig};
pub use content::{ContentSource, FeedItem, StableId, ViewType};
pub use controller::{ControllerError, FeedController, FeedUpdate};
pub use fetcher::{FetchEvent, Fetcher};
pub use transport::{AdTransport, HttpTransport, TransportError};

pub use adfeed_cache::{Ad, AdId, Completion, Creative, FeedError, FetchError, PlacementKey, SlotState};
