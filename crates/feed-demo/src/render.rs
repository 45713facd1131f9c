use adfeed_client::FeedItem;
use std::collections::BTreeMap;

/// One printed row of the merged feed.
pub fn render_row(position: usize, item: &FeedItem<'_, String>) -> String {
    match item {
        FeedItem::Content(text) => format!("{position:>4}  {text}"),
        FeedItem::Ad(ad) => {
            let creative = ad.creative();
            format!(
                "{position:>4}  [sponsored] {}: {} | {}",
                creative.advertiser_name, creative.heading, creative.image_url
            )
        }
    }
}

/// Parse `name=value` from the command line.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got {raw:?}")),
    }
}

pub fn collect_params(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    pairs.iter().cloned().collect()
}
