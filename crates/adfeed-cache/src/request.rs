use crate::PlacementKey;
use std::collections::BTreeMap;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "http://tlx.3lift.com/mj/auction?invType=app";

/// Query parameter carrying the placement key.
pub const PLACEMENT_PARAM: &str = "inv_code";

/// Marker the ad decision service uses to tell test traffic apart.
pub const DEBUG_PARAM: (&str, &str) = ("test", "true");

/// Build the fetch URL for one placement.
///
/// Parameters are appended after whatever query `endpoint` already has:
/// the debug marker first (when set), then the placement key, then the
/// caller's extra parameters in key order. An extra parameter cannot
/// override the placement key.
pub fn build_request_url(
    endpoint: &Url,
    key: &PlacementKey,
    params: &BTreeMap<String, String>,
    debug: bool,
) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        if debug {
            query.append_pair(DEBUG_PARAM.0, DEBUG_PARAM.1);
        }
        query.append_pair(PLACEMENT_PARAM, key.as_str());
        for (name, value) in params {
            if name == PLACEMENT_PARAM {
                continue;
            }
            query.append_pair(name, value);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Url {
        Url::parse("http://ads.example/mj/auction?invType=app").unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_and_params_follow_existing_query() {
        let url = build_request_url(
            &endpoint(),
            &PlacementKey::from("feed_top"),
            &params(&[("gender", "f"), ("age", "30")]),
            false,
        );
        assert_eq!(
            url.as_str(),
            "http://ads.example/mj/auction?invType=app&inv_code=feed_top&age=30&gender=f"
        );
    }

    #[test]
    fn debug_marker_comes_first() {
        let url = build_request_url(
            &endpoint(),
            &PlacementKey::from("feed_top"),
            &BTreeMap::new(),
            true,
        );
        assert_eq!(
            url.as_str(),
            "http://ads.example/mj/auction?invType=app&test=true&inv_code=feed_top"
        );
    }

    #[test]
    fn values_are_form_encoded() {
        let url = build_request_url(
            &Url::parse("http://ads.example/auction").unwrap(),
            &PlacementKey::from("top & center"),
            &params(&[("city", "new york")]),
            false,
        );
        assert_eq!(
            url.as_str(),
            "http://ads.example/auction?inv_code=top+%26+center&city=new+york"
        );
    }

    #[test]
    fn params_cannot_replace_placement() {
        let url = build_request_url(
            &endpoint(),
            &PlacementKey::from("feed_top"),
            &params(&[("inv_code", "other")]),
            false,
        );
        let codes: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == PLACEMENT_PARAM)
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(codes, vec!["feed_top".to_string()]);
    }
}
