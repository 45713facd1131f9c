use crate::metrics::{outcome_label, FETCH_OUTCOMES, FETCH_REQUESTS, RETRIES_SCHEDULED};
use crate::transport::AdTransport;
use adfeed_cache::request::build_request_url;
use adfeed_cache::response::{parse_ad, ParseOptions};
use adfeed_cache::{Ad, AdSource, FetchError, PlacementKey};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Delivered to the owning controller when background work finishes.
#[derive(Debug)]
pub enum FetchEvent {
    Completed {
        key: PlacementKey,
        result: Result<Ad, FetchError>,
    },
    RetryDue {
        key: PlacementKey,
    },
}

/// [`AdSource`] that runs requests and retry timers as tokio tasks.
///
/// Results come back over the channel returned by [`Fetcher::new`]. Retry
/// timers stop when `shutdown` is cancelled; requests already on the wire
/// run to completion and their result is dropped if nobody is listening.
pub struct Fetcher<T> {
    transport: Arc<T>,
    runtime: Handle,
    events: mpsc::UnboundedSender<FetchEvent>,
    endpoint: Url,
    params: HashMap<PlacementKey, BTreeMap<String, String>>,
    debug: bool,
    parse: Arc<ParseOptions>,
    shutdown: CancellationToken,
}

impl<T: AdTransport> Fetcher<T> {
    pub fn new(
        transport: Arc<T>,
        runtime: Handle,
        endpoint: Url,
        parse: ParseOptions,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<FetchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let fetcher = Self {
            transport,
            runtime,
            events,
            endpoint,
            params: HashMap::new(),
            debug: false,
            parse: Arc::new(parse),
            shutdown,
        };
        (fetcher, rx)
    }

    /// Targeting parameters sent with every request for `key`.
    pub fn set_params(&mut self, key: PlacementKey, params: BTreeMap<String, String>) {
        self.params.insert(key, params);
    }

    pub fn params(&self, key: &PlacementKey) -> Option<&BTreeMap<String, String>> {
        self.params.get(key)
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn request_url(&self, key: &PlacementKey) -> Url {
        let empty = BTreeMap::new();
        let params = self.params.get(key).unwrap_or(&empty);
        build_request_url(&self.endpoint, key, params, self.debug)
    }

    /// One request outside the cache: no retry, nothing stored.
    pub fn fetch_once(
        &self,
        key: &PlacementKey,
        params: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Ad, FetchError>> + Send + 'static {
        let url = build_request_url(&self.endpoint, key, params, self.debug);
        let transport = Arc::clone(&self.transport);
        let parse = Arc::clone(&self.parse);
        async move { execute(transport.as_ref(), url.as_str(), &parse).await }
    }
}

async fn execute<T: AdTransport>(
    transport: &T,
    url: &str,
    parse: &ParseOptions,
) -> Result<Ad, FetchError> {
    let body = transport
        .get(url)
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    parse_ad(&body, parse)
}

impl<T: AdTransport> AdSource for Fetcher<T> {
    fn request(&mut self, key: &PlacementKey) {
        let url = self.request_url(key);
        let transport = Arc::clone(&self.transport);
        let parse = Arc::clone(&self.parse);
        let events = self.events.clone();
        let key = key.clone();

        metrics::counter!(FETCH_REQUESTS).increment(1);
        debug!(placement = %key, url = %url, "sending ad request");

        self.runtime.spawn(async move {
            let result = execute(transport.as_ref(), url.as_str(), &parse).await;
            metrics::counter!(FETCH_OUTCOMES, "outcome" => outcome_label(&result)).increment(1);
            if events.send(FetchEvent::Completed { key, result }).is_err() {
                debug!("controller gone, dropping ad response");
            }
        });
    }

    fn schedule_retry(&mut self, key: &PlacementKey, delay: Duration) {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let key = key.clone();

        metrics::counter!(RETRIES_SCHEDULED).increment(1);

        self.runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(placement = %key, "retry timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(FetchEvent::RetryDue { key });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fill_body, no_fill_body, Reply, ScriptedTransport};

    fn fetcher(
        transport: Arc<ScriptedTransport>,
    ) -> (Fetcher<ScriptedTransport>, mpsc::UnboundedReceiver<FetchEvent>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (fetcher, rx) = Fetcher::new(
            transport,
            Handle::current(),
            Url::parse("http://ads.test/mj/auction?invType=app").unwrap(),
            ParseOptions::default(),
            shutdown.clone(),
        );
        (fetcher, rx, shutdown)
    }

    #[tokio::test]
    async fn request_reports_completion() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Body(fill_body("acme"))));
        let (mut fetcher, mut rx, _shutdown) = fetcher(Arc::clone(&transport));
        let key = PlacementKey::from("feed_top");
        fetcher.set_params(key.clone(), BTreeMap::from([("age".to_string(), "30".to_string())]));

        fetcher.request(&key);
        match rx.recv().await.unwrap() {
            FetchEvent::Completed { key: got, result } => {
                assert_eq!(got, key);
                assert_eq!(result.unwrap().creative().advertiser_name, "acme");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            transport.urls(),
            vec!["http://ads.test/mj/auction?invType=app&inv_code=feed_top&age=30".to_string()]
        );
    }

    #[tokio::test]
    async fn transport_errors_become_fetch_errors() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Fail));
        let (mut fetcher, mut rx, _shutdown) = fetcher(transport);
        fetcher.request(&PlacementKey::from("feed_top"));
        match rx.recv().await.unwrap() {
            FetchEvent::Completed { result, .. } => {
                assert_eq!(
                    result.unwrap_err(),
                    FetchError::Transport("unexpected status 503".into())
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn debug_flag_marks_requests() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Body(no_fill_body())));
        let (mut fetcher, _rx, _shutdown) = fetcher(transport);
        fetcher.set_debug(true);
        let url = fetcher.request_url(&PlacementKey::from("feed_top"));
        assert_eq!(
            url.as_str(),
            "http://ads.test/mj/auction?invType=app&test=true&inv_code=feed_top"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_timer_fires_after_delay() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Fail));
        let (mut fetcher, mut rx, _shutdown) = fetcher(transport);
        let start = tokio::time::Instant::now();
        fetcher.schedule_retry(&PlacementKey::from("feed_top"), Duration::from_secs(5));
        match rx.recv().await.unwrap() {
            FetchEvent::RetryDue { key } => assert_eq!(key.as_str(), "feed_top"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Fail));
        let (mut fetcher, mut rx, shutdown) = fetcher(transport);
        fetcher.schedule_retry(&PlacementKey::from("feed_top"), Duration::from_secs(1));
        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fetch_once_bypasses_the_channel() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Body(no_fill_body())));
        transport.push(Reply::Body(fill_body("direct")));
        let (fetcher, mut rx, _shutdown) = fetcher(transport);
        let key = PlacementKey::from("feed_top");

        let ad = fetcher.fetch_once(&key, &BTreeMap::new()).await.unwrap();
        assert_eq!(ad.creative().advertiser_name, "direct");
        let err = fetcher.fetch_once(&key, &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err, FetchError::NoFill);
        assert!(rx.try_recv().is_err());
    }
}
