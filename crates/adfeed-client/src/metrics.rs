//! Counter names and descriptions. Recording is a no-op until the host
//! installs a `metrics` recorder.

use adfeed_cache::{Ad, FetchError};

pub const FETCH_REQUESTS: &str = "adfeed_fetch_requests_total";
pub const FETCH_OUTCOMES: &str = "adfeed_fetch_outcomes_total";
pub const RETRIES_SCHEDULED: &str = "adfeed_retries_scheduled_total";
pub const PLACEMENTS_ABANDONED: &str = "adfeed_placements_abandoned_total";
pub const SLOTS_FILLED: &str = "adfeed_slots_filled_total";
pub const BEACONS_SENT: &str = "adfeed_beacons_sent_total";
pub const BEACONS_FAILED: &str = "adfeed_beacons_failed_total";

/// Register descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(FETCH_REQUESTS, "Ad requests sent to the ad decision service.");
    metrics::describe_counter!(
        FETCH_OUTCOMES,
        "Completed ad requests by outcome (fill, no_fill, malformed, transport)."
    );
    metrics::describe_counter!(RETRIES_SCHEDULED, "Retry timers armed after transport failures.");
    metrics::describe_counter!(
        PLACEMENTS_ABANDONED,
        "Placements that exhausted the retry schedule."
    );
    metrics::describe_counter!(SLOTS_FILLED, "Feed slots that received an ad.");
    metrics::describe_counter!(BEACONS_SENT, "Tracking beacons delivered, by kind.");
    metrics::describe_counter!(BEACONS_FAILED, "Tracking beacons that failed, by kind.");
}

pub(crate) fn outcome_label(result: &Result<Ad, FetchError>) -> &'static str {
    match result {
        Ok(_) => "fill",
        Err(FetchError::NoFill) => "no_fill",
        Err(FetchError::Malformed(_)) => "malformed",
        Err(FetchError::Transport(_)) => "transport",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&Err(FetchError::NoFill)), "no_fill");
        assert_eq!(outcome_label(&Err(FetchError::Malformed("x".into()))), "malformed");
        assert_eq!(outcome_label(&Err(FetchError::Transport("x".into()))), "transport");
    }
}
