use crate::beacon::{BeaconKind, BeaconSender};
use crate::config::{ConfigError, ControllerConfig};
use crate::content::{ContentSource, FeedItem, StableId, ViewType};
use crate::fetcher::{FetchEvent, Fetcher};
use crate::metrics::{PLACEMENTS_ABANDONED, SLOTS_FILLED};
use crate::transport::{AdTransport, HttpTransport, TransportError};
use adfeed_cache::{
    Ad, AdCache, CacheStats, Completion, FeedError, FeedPlacement, FetchError, FetchPhase,
    PlacementKey, SlotState,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportError),

    #[error("no tokio runtime to run fetches on: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

/// What one processed background event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Fetched {
        key: PlacementKey,
        completion: Completion,
    },
    RetryDue {
        key: PlacementKey,
    },
}

type RefreshHook = Box<dyn FnMut() + Send>;

/// Merges ads into one host content list.
///
/// The controller is owned by the host's event loop. Fetches and retry
/// timers run as tokio tasks and report back over a channel; the host
/// applies their results with [`drain_events`](Self::drain_events) or
/// [`next_update`](Self::next_update). Dropping the controller cancels
/// every outstanding retry timer.
pub struct FeedController<C, T = HttpTransport> {
    key: PlacementKey,
    cache: AdCache<Fetcher<T>>,
    placement: FeedPlacement,
    events: mpsc::UnboundedReceiver<FetchEvent>,
    beacons: BeaconSender<T>,
    content: C,
    registered: BTreeSet<PlacementKey>,
    on_refresh: Option<RefreshHook>,
    shutdown: CancellationToken,
}

impl<C: ContentSource> FeedController<C, HttpTransport> {
    /// Build a controller talking HTTP, on the current tokio runtime.
    pub fn new(config: &ControllerConfig, content: C) -> Result<Self, ControllerError> {
        let runtime = Handle::try_current()?;
        let transport = HttpTransport::new(config.timeout())?;
        Self::with_transport(config, content, Arc::new(transport), runtime)
    }
}

impl<C: ContentSource, T: AdTransport> FeedController<C, T> {
    pub fn with_transport(
        config: &ControllerConfig,
        content: C,
        transport: Arc<T>,
        runtime: Handle,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let key = config.placement_key();
        let shutdown = CancellationToken::new();

        let (mut fetcher, events) = Fetcher::new(
            Arc::clone(&transport),
            runtime.clone(),
            config.endpoint()?,
            config.parse_options(),
            shutdown.clone(),
        );
        fetcher.set_debug(config.request.debug);
        fetcher.set_params(key.clone(), config.request.params.clone());

        let mut placement = FeedPlacement::new(config.placement_spec());
        placement.set_content_len(content.len());

        info!(
            placement = %key,
            initial_positions = ?config.placement.initial_positions,
            repeat_interval = config.placement.repeat_interval,
            capacity = config.cache.capacity,
            "feed controller ready"
        );

        Ok(Self {
            registered: BTreeSet::from([key.clone()]),
            key,
            cache: AdCache::new(config.cache_settings(), fetcher),
            placement,
            events,
            beacons: BeaconSender::new(transport, runtime),
            content,
            on_refresh: None,
            shutdown,
        })
    }

    pub fn placement_key(&self) -> &PlacementKey {
        &self.key
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    /// Mutate the host content, then resync the merged layout with its new
    /// length.
    pub fn with_content_mut<R>(&mut self, f: impl FnOnce(&mut C) -> R) -> R {
        let result = f(&mut self.content);
        self.placement.set_content_len(self.content.len());
        result
    }

    /// Called whenever an ad goes live and the rows after it shift down.
    pub fn set_refresh_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_refresh = Some(Box::new(hook));
    }

    /// Number of rows the host should display: content plus live ads, or
    /// zero when there is no content.
    pub fn merged_count(&self) -> usize {
        self.placement.virtual_len()
    }

    /// Resolve a merged position. An ad slot without a live ad takes a
    /// cached ad if there is one; otherwise it asks for more and shows the
    /// content that falls on it.
    pub fn get_item(&mut self, position: usize) -> Result<FeedItem<'_, C::Item>, FeedError> {
        self.check_range(position)?;
        if self.placement.is_ad_slot(position) {
            if let Some(ad) = self.resolve_slot(position) {
                return Ok(FeedItem::Ad(ad));
            }
        }
        self.content_item(position)
    }

    /// Like [`get_item`](Self::get_item) but never touches the cache.
    pub fn item_at(&self, position: usize) -> Result<FeedItem<'_, C::Item>, FeedError> {
        self.check_range(position)?;
        if let Some(ad) = self.placement.ad_at(position) {
            return Ok(FeedItem::Ad(Arc::clone(ad)));
        }
        self.content_item(position)
    }

    pub fn view_type_at(&self, position: usize) -> Result<ViewType, FeedError> {
        self.check_range(position)?;
        if self.placement.is_live(position) {
            return Ok(ViewType::Ad);
        }
        let index = self.placement.content_position(position)?;
        Ok(ViewType::Content(self.content.view_type(index)))
    }

    /// Content view types plus the single ad type.
    pub fn view_type_count(&self) -> usize {
        self.content.view_type_count() + 1
    }

    pub fn stable_id_at(&self, position: usize) -> Result<StableId, FeedError> {
        self.check_range(position)?;
        if let Some(ad) = self.placement.ad_at(position) {
            return Ok(StableId::Ad(ad.id()));
        }
        let index = self.placement.content_position(position)?;
        Ok(StableId::Content(self.content.stable_id(index)))
    }

    pub fn slot_state(&self, position: usize) -> SlotState {
        self.placement.slot_state(position)
    }

    pub fn live_ad_count(&self) -> usize {
        self.placement.live_ad_count()
    }

    /// Ad slots in the visible range that are not showing an ad.
    pub fn unfilled_slot_count(&self) -> usize {
        self.placement.unfilled_count()
    }

    /// Send every impression beacon of `ad` and flag it. Firing twice sends
    /// twice; hosts de-duplicate with [`Ad::impression_fired`].
    pub fn fire_impression(&self, ad: &Ad) -> usize {
        ad.mark_impression_fired();
        self.beacons.fire(BeaconKind::Impression, ad)
    }

    pub fn fire_click(&self, ad: &Ad) -> usize {
        ad.mark_click_fired();
        self.beacons.fire(BeaconKind::Click, ad)
    }

    pub fn fire_share(&self, ad: &Ad) -> usize {
        self.beacons.fire(BeaconKind::Share, ad)
    }

    /// Top up this feed's placement bucket.
    pub fn load_ads(&mut self) -> bool {
        let key = self.key.clone();
        self.cache.fill(&key)
    }

    /// Remember another placement key so [`refresh_registered`] keeps its
    /// bucket warm.
    ///
    /// [`refresh_registered`]: Self::refresh_registered
    pub fn register_placement(&mut self, key: PlacementKey) -> bool {
        self.registered.insert(key)
    }

    pub fn registered_placements(&self) -> impl Iterator<Item = &PlacementKey> {
        self.registered.iter()
    }

    /// Set targeting for `key` and start filling its bucket ahead of
    /// display. Returns true if a request went out.
    pub fn request_ads(&mut self, key: PlacementKey, params: BTreeMap<String, String>) -> bool {
        self.registered.insert(key.clone());
        self.cache.source_mut().set_params(key.clone(), params);
        self.cache.fill(&key)
    }

    /// Fill every registered placement. Returns how many requests started.
    pub fn refresh_registered(&mut self) -> usize {
        let keys: Vec<PlacementKey> = self.registered.iter().cloned().collect();
        keys.iter().filter(|key| self.cache.fill(key)).count()
    }

    /// A single request outside the cache and retry schedule.
    pub fn fetch_once(
        &self,
        key: &PlacementKey,
        params: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Ad, FetchError>> + Send + 'static {
        self.cache.source().fetch_once(key, params)
    }

    pub fn ads_available(&self) -> bool {
        self.cache.ads_available()
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.cache.source_mut().set_debug(debug);
    }

    pub fn fetch_phase(&self) -> FetchPhase {
        self.cache.phase(&self.key)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Apply every background event that has already arrived.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next background event and apply it.
    pub async fn next_update(&mut self) -> Option<FeedUpdate> {
        let event = self.events.recv().await?;
        Some(self.handle_event(event))
    }

    /// Stop the controller and every retry timer it armed. Requests already
    /// on the wire run to completion but their results are dropped.
    ///
    /// ```compile_fail
    /// # fn stop(mut controller: adfeed_client::FeedController<Vec<u32>>) {
    /// controller.shutdown();
    /// controller.load_ads();
    /// # }
    /// ```
    pub fn shutdown(self) {
        self.shutdown.cancel();
        info!(placement = %self.key, "feed controller stopped");
    }

    fn handle_event(&mut self, event: FetchEvent) -> FeedUpdate {
        match event {
            FetchEvent::Completed { key, result } => {
                let completion = self.cache.complete(&key, result);
                if completion == Completion::Abandoned {
                    metrics::counter!(PLACEMENTS_ABANDONED).increment(1);
                }
                if key == self.key {
                    self.settle_pending(completion);
                }
                FeedUpdate::Fetched { key, completion }
            }
            FetchEvent::RetryDue { key } => {
                self.cache.retry_due(&key);
                FeedUpdate::RetryDue { key }
            }
        }
    }

    fn settle_pending(&mut self, completion: Completion) {
        match completion {
            Completion::Filled => {
                let mut filled = 0u64;
                for position in self.placement.pending_slots() {
                    let Some(ad) = self.cache.retrieve(&self.key) else {
                        break;
                    };
                    match self.placement.assign(position, Arc::new(ad)) {
                        Ok(_) => filled += 1,
                        Err(e) => warn!(placement = %self.key, error = %e, "could not place ad"),
                    }
                }
                if filled > 0 {
                    metrics::counter!(SLOTS_FILLED).increment(filled);
                    debug!(placement = %self.key, filled, "pending slots filled");
                    self.notify_refresh();
                }
            }
            Completion::Empty | Completion::Abandoned => {
                let released = self.placement.release_pending();
                if released > 0 {
                    debug!(placement = %self.key, released, "no ad for pending slots");
                }
            }
            Completion::RetryScheduled(_) => {}
        }
    }

    fn resolve_slot(&mut self, position: usize) -> Option<Arc<Ad>> {
        if let Some(ad) = self.placement.ad_at(position) {
            return Some(Arc::clone(ad));
        }
        match self.cache.retrieve(&self.key) {
            Some(ad) => {
                let ad = Arc::new(ad);
                if let Err(e) = self.placement.assign(position, Arc::clone(&ad)) {
                    warn!(placement = %self.key, error = %e, "could not place ad");
                    return None;
                }
                metrics::counter!(SLOTS_FILLED).increment(1);
                self.notify_refresh();
                Some(ad)
            }
            None => {
                if self.cache.is_fetching(&self.key) {
                    let _ = self.placement.mark_pending(position);
                }
                None
            }
        }
    }

    fn content_item(&self, position: usize) -> Result<FeedItem<'_, C::Item>, FeedError> {
        let index = self.placement.content_position(position)?;
        self.content
            .item(index)
            .map(FeedItem::Content)
            .ok_or(FeedError::OutOfRange {
                position,
                len: self.merged_count(),
            })
    }

    fn check_range(&self, position: usize) -> Result<(), FeedError> {
        let len = self.merged_count();
        if position >= len {
            return Err(FeedError::OutOfRange { position, len });
        }
        Ok(())
    }

    fn notify_refresh(&mut self) {
        if let Some(hook) = self.on_refresh.as_mut() {
            hook();
        }
    }
}

impl<C, T> Drop for FeedController<C, T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
