use crate::ad::{Ad, Creative};
use crate::error::FetchError;
use serde::Deserialize;
use std::time::Instant;

/// How response payloads are turned into ads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Rewrite `https://` image URLs to `http://`. The origin image host
    /// only serves plain HTTP.
    pub downgrade_image_scheme: bool,
    /// Used when the payload has no `logo_url`.
    pub default_logo_url: Option<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            downgrade_image_scheme: true,
            default_logo_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdPayload {
    advertiser_name: String,
    clickthrough_url: String,
    image_url: String,
    caption: String,
    heading: String,
    clickthrough_pixels: Vec<String>,
    impression_pixels: Vec<String>,
    #[serde(default)]
    logo_url: Option<String>,
    #[serde(default)]
    share_pixels: Vec<String>,
}

/// Parse an ad decision response body.
///
/// A JSON object with a `status` field is a no-fill. Anything that is not
/// an object carrying every required field is malformed.
pub fn parse_creative(body: &[u8], options: &ParseOptions) -> Result<Creative, FetchError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| FetchError::Malformed("response is not a JSON object".to_string()))?;
    if object.contains_key("status") {
        return Err(FetchError::NoFill);
    }

    let payload: AdPayload =
        serde_json::from_value(value).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let image_url = if options.downgrade_image_scheme {
        downgrade_scheme(payload.image_url)
    } else {
        payload.image_url
    };

    Ok(Creative {
        advertiser_name: payload.advertiser_name,
        heading: payload.heading,
        caption: payload.caption,
        clickthrough_url: payload.clickthrough_url,
        image_url,
        logo_url: payload.logo_url.or_else(|| options.default_logo_url.clone()),
        impression_pixels: payload.impression_pixels,
        clickthrough_pixels: payload.clickthrough_pixels,
        share_pixels: payload.share_pixels,
    })
}

/// Parse a response body into an ad stamped with the current time.
pub fn parse_ad(body: &[u8], options: &ParseOptions) -> Result<Ad, FetchError> {
    parse_creative(body, options).map(|creative| Ad::new(creative, Instant::now()))
}

fn downgrade_scheme(url: String) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => format!("http://{rest}"),
        None => url,
    }
}
