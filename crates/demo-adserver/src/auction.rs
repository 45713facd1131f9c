use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADVERTISERS: [(&str, &str, &str); 4] = [
    ("Northwind Outfitters", "Gear up for the trail", "Boots, packs and tents on sale"),
    ("Lumen Coffee", "Your morning, upgraded", "Single origin beans shipped weekly"),
    ("Orbit Mobile", "Unlimited data, half price", "Switch today and keep your number"),
    ("Fernway Travel", "Weekend escapes from $99", "Hand-picked stays near you"),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuctionSettings {
    /// Share of auctions answered with an ad.
    pub fill_rate: f64,
    /// Share of auctions answered with a 503.
    pub error_rate: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl AuctionSettings {
    pub fn validate(&self) -> Result<(), String> {
        for (name, rate) in [("fill rate", self.fill_rate), ("error rate", self.error_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("{name} must be within [0, 1], got {rate}"));
            }
        }
        if self.fill_rate + self.error_rate > 1.0 {
            return Err("fill rate and error rate add up to more than 1".into());
        }
        if self.min_latency_ms > self.max_latency_ms {
            return Err("min latency exceeds max latency".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fill,
    NoFill,
    Unavailable,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Decision::Fill => "fill",
            Decision::NoFill => "no_fill",
            Decision::Unavailable => "unavailable",
        }
    }
}

pub fn decide<R: Rng + ?Sized>(rng: &mut R, settings: &AuctionSettings) -> Decision {
    let roll: f64 = rng.gen();
    if roll < settings.error_rate {
        Decision::Unavailable
    } else if roll < settings.error_rate + settings.fill_rate {
        Decision::Fill
    } else {
        Decision::NoFill
    }
}

pub struct AuctionState {
    settings: AuctionSettings,
    auctions: AtomicU64,
    fills: AtomicU64,
    no_fills: AtomicU64,
    errors: AtomicU64,
    beacons: AtomicU64,
}

impl AuctionState {
    pub fn new(settings: AuctionSettings) -> Self {
        Self {
            settings,
            auctions: AtomicU64::new(0),
            fills: AtomicU64::new(0),
            no_fills: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            beacons: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub auctions: u64,
    pub fills: u64,
    pub no_fills: u64,
    pub errors: u64,
    pub beacons: u64,
}

pub fn router(state: Arc<AuctionState>) -> Router {
    Router::new()
        .route("/mj/auction", get(auction))
        .route("/px/{kind}/{id}", get(beacon))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .with_state(state)
}

/// Creative payload in the shape the feed client parses. Images are
/// served over https so clients exercise their scheme downgrade.
pub fn creative(id: u64, placement: &str, host: &str) -> Value {
    let (advertiser, heading, caption) = ADVERTISERS[(id as usize) % ADVERTISERS.len()];
    let slug = advertiser.to_lowercase().replace(' ', "-");
    json!({
        "advertiser_name": advertiser,
        "heading": heading,
        "caption": caption,
        "clickthrough_url": format!("https://{slug}.example/landing?src={placement}"),
        "image_url": format!("https://img.{slug}.example/creative/{id}.jpg"),
        "logo_url": format!("https://img.{slug}.example/logo.png"),
        "impression_pixels": [
            format!("http://{host}/px/impression/{id}"),
            format!("http://{host}/px/viewable/{id}"),
        ],
        "clickthrough_pixels": [format!("http://{host}/px/click/{id}")],
        "share_pixels": [format!("http://{host}/px/share/{id}")],
    })
}

async fn auction(
    State(state): State<Arc<AuctionState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let id = state.auctions.fetch_add(1, Ordering::Relaxed) + 1;
    let placement = params.get("inv_code").cloned().unwrap_or_default();
    let test = params.get("test").is_some_and(|v| v == "true");

    let (delay, decision) = {
        let mut rng = rand::thread_rng();
        let delay = rng.gen_range(state.settings.min_latency_ms..=state.settings.max_latency_ms);
        (delay, decide(&mut rng, &state.settings))
    };
    tokio::time::sleep(Duration::from_millis(delay)).await;

    tracing::debug!(
        id,
        placement = %placement,
        test,
        latency_ms = delay,
        decision = decision.as_str(),
        "auction"
    );

    if placement.is_empty() {
        state.no_fills.fetch_add(1, Ordering::Relaxed);
        return Json(json!({ "status": "missing inv_code" })).into_response();
    }

    match decision {
        Decision::Fill => {
            state.fills.fetch_add(1, Ordering::Relaxed);
            let host = headers
                .get("host")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("127.0.0.1:3000");
            Json(creative(id, &placement, host)).into_response()
        }
        Decision::NoFill => {
            state.no_fills.fetch_add(1, Ordering::Relaxed);
            Json(json!({ "status": "no_fill" })).into_response()
        }
        Decision::Unavailable => {
            state.errors.fetch_add(1, Ordering::Relaxed);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn beacon(
    State(state): State<Arc<AuctionState>>,
    Path((kind, id)): Path<(String, u64)>,
) -> StatusCode {
    state.beacons.fetch_add(1, Ordering::Relaxed);
    tracing::info!(kind = %kind, id, "beacon");
    StatusCode::NO_CONTENT
}

async fn stats(State(state): State<Arc<AuctionState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        auctions: state.auctions.load(Ordering::Relaxed),
        fills: state.fills.load(Ordering::Relaxed),
        no_fills: state.no_fills.load(Ordering::Relaxed),
        errors: state.errors.load(Ordering::Relaxed),
        beacons: state.beacons.load(Ordering::Relaxed),
    })
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(fill_rate: f64, error_rate: f64) -> AuctionSettings {
        AuctionSettings {
            fill_rate,
            error_rate,
            min_latency_ms: 0,
            max_latency_ms: 0,
        }
    }

    #[test]
    fn extreme_rates_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(decide(&mut rng, &settings(1.0, 0.0)), Decision::Fill);
            assert_eq!(decide(&mut rng, &settings(0.0, 1.0)), Decision::Unavailable);
            assert_eq!(decide(&mut rng, &settings(0.0, 0.0)), Decision::NoFill);
        }
    }

    #[test]
    fn rates_shape_the_mix() {
        let mut rng = StdRng::seed_from_u64(42);
        let settings = settings(0.6, 0.1);
        let mut fills = 0;
        let mut errors = 0;
        for _ in 0..10_000 {
            match decide(&mut rng, &settings) {
                Decision::Fill => fills += 1,
                Decision::Unavailable => errors += 1,
                Decision::NoFill => {}
            }
        }
        assert!((5_500..6_500).contains(&fills), "fills = {fills}");
        assert!((700..1_300).contains(&errors), "errors = {errors}");
    }

    #[test]
    fn settings_validation() {
        assert!(settings(0.8, 0.1).validate().is_ok());
        assert!(settings(0.8, 0.3).validate().is_err());
        assert!(settings(-0.1, 0.0).validate().is_err());
        let mut s = settings(0.5, 0.0);
        s.min_latency_ms = 50;
        s.max_latency_ms = 10;
        assert!(s.validate().is_err());
    }

    #[test]
    fn creative_has_every_field_the_client_needs() {
        let value = creative(5, "feed_top", "127.0.0.1:3000");
        for field in [
            "advertiser_name",
            "heading",
            "caption",
            "clickthrough_url",
            "image_url",
            "impression_pixels",
            "clickthrough_pixels",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert!(value["image_url"].as_str().unwrap().starts_with("https://"));
        assert_eq!(
            value["clickthrough_pixels"][0],
            "http://127.0.0.1:3000/px/click/5"
        );
    }

    #[tokio::test]
    async fn auction_handler_answers_by_decision() {
        let state = Arc::new(AuctionState::new(settings(1.0, 0.0)));
        let params = HashMap::from([("inv_code".to_string(), "feed_top".to_string())]);
        let response = auction(State(Arc::clone(&state)), Query(params), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["clickthrough_pixels"][0], "http://127.0.0.1:3000/px/click/1");

        let down = Arc::new(AuctionState::new(settings(0.0, 1.0)));
        let params = HashMap::from([("inv_code".to_string(), "feed_top".to_string())]);
        let response = auction(State(Arc::clone(&down)), Query(params), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(down.errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn missing_placement_is_a_no_fill() {
        let state = Arc::new(AuctionState::new(settings(1.0, 0.0)));
        let response = auction(State(Arc::clone(&state)), Query(HashMap::new()), HeaderMap::new()).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value.get("status").is_some());
        assert_eq!(state.fills.load(Ordering::Relaxed), 0);
    }
}
