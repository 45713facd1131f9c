use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_AD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a fetched ad. Used as the stable list id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdId(u64);

impl AdId {
    fn next() -> Self {
        Self(NEXT_AD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Creative content of a sponsored item as served by the ad decision service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creative {
    pub advertiser_name: String,
    pub heading: String,
    pub caption: String,
    pub clickthrough_url: String,
    pub image_url: String,
    pub logo_url: Option<String>,
    pub impression_pixels: Vec<String>,
    pub clickthrough_pixels: Vec<String>,
    /// Only sponsored image variants carry share beacons.
    pub share_pixels: Vec<String>,
}

/// A fetched ad. The creative never changes after parsing; only the
/// fired-event flags flip.
#[derive(Debug)]
pub struct Ad {
    id: AdId,
    creative: Creative,
    created: Instant,
    impression_fired: AtomicBool,
    click_fired: AtomicBool,
}

impl Ad {
    pub fn new(creative: Creative, created: Instant) -> Self {
        Self {
            id: AdId::next(),
            creative,
            created,
            impression_fired: AtomicBool::new(false),
            click_fired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> AdId {
        self.id
    }

    pub fn creative(&self) -> &Creative {
        &self.creative
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Age relative to `now`; zero if `now` predates creation.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.age(now) > window
    }

    /// Set the impression flag. Returns the previous value.
    pub fn mark_impression_fired(&self) -> bool {
        self.impression_fired.swap(true, Ordering::Relaxed)
    }

    pub fn impression_fired(&self) -> bool {
        self.impression_fired.load(Ordering::Relaxed)
    }

    /// Set the click flag. Returns the previous value.
    pub fn mark_click_fired(&self) -> bool {
        self.click_fired.swap(true, Ordering::Relaxed)
    }

    pub fn click_fired(&self) -> bool {
        self.click_fired.load(Ordering::Relaxed)
    }
}
