use crate::metrics::{BEACONS_FAILED, BEACONS_SENT};
use crate::transport::AdTransport;
use adfeed_cache::Ad;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeaconKind {
    Impression,
    Click,
    Share,
}

impl BeaconKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BeaconKind::Impression => "impression",
            BeaconKind::Click => "click",
            BeaconKind::Share => "share",
        }
    }

    pub fn urls(self, ad: &Ad) -> &[String] {
        let creative = ad.creative();
        match self {
            BeaconKind::Impression => &creative.impression_pixels,
            BeaconKind::Click => &creative.clickthrough_pixels,
            BeaconKind::Share => &creative.share_pixels,
        }
    }
}

impl fmt::Display for BeaconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget tracking pixels. Each URL gets one GET on its own task;
/// failures are logged and counted, never retried.
pub struct BeaconSender<T> {
    transport: Arc<T>,
    runtime: Handle,
}

impl<T> Clone for BeaconSender<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: AdTransport> BeaconSender<T> {
    pub fn new(transport: Arc<T>, runtime: Handle) -> Self {
        Self { transport, runtime }
    }

    /// Returns how many beacons were dispatched.
    pub fn fire(&self, kind: BeaconKind, ad: &Ad) -> usize {
        let urls = kind.urls(ad);
        for url in urls {
            let transport = Arc::clone(&self.transport);
            let url = url.clone();
            self.runtime.spawn(async move {
                match transport.get(&url).await {
                    Ok(_) => {
                        metrics::counter!(BEACONS_SENT, "kind" => kind.as_str()).increment(1);
                        debug!(kind = %kind, url = %url, "beacon delivered");
                    }
                    Err(e) => {
                        metrics::counter!(BEACONS_FAILED, "kind" => kind.as_str()).increment(1);
                        warn!(kind = %kind, url = %url, error = %e, "beacon failed");
                    }
                }
            });
        }
        urls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedTransport};
    use adfeed_cache::Creative;
    use std::time::Instant;

    fn ad() -> Ad {
        Ad::new(
            Creative {
                advertiser_name: "acme".into(),
                heading: "h".into(),
                caption: "c".into(),
                clickthrough_url: "http://acme.example".into(),
                image_url: "http://acme.example/a.png".into(),
                logo_url: None,
                impression_pixels: vec!["http://px.test/imp1".into(), "http://px.test/imp2".into()],
                clickthrough_pixels: vec!["http://px.test/click".into()],
                share_pixels: vec![],
            },
            Instant::now(),
        )
    }

    #[tokio::test]
    async fn fires_every_url_of_the_kind() {
        let transport = Arc::new(ScriptedTransport::new(Reply::Fail));
        let sender = BeaconSender::new(Arc::clone(&transport), Handle::current());
        let ad = ad();

        assert_eq!(sender.fire(BeaconKind::Impression, &ad), 2);
        assert_eq!(sender.fire(BeaconKind::Click, &ad), 1);
        assert_eq!(sender.fire(BeaconKind::Share, &ad), 0);

        while transport.beacons().len() < 3 {
            tokio::task::yield_now().await;
        }
        let mut beacons = transport.beacons();
        beacons.sort();
        assert_eq!(
            beacons,
            vec![
                "http://px.test/click".to_string(),
                "http://px.test/imp1".to_string(),
                "http://px.test/imp2".to_string(),
            ]
        );
    }

    #[test]
    fn kind_names() {
        assert_eq!(BeaconKind::Impression.to_string(), "impression");
        assert_eq!(BeaconKind::Share.as_str(), "share");
    }
}
