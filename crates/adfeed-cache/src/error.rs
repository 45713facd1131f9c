use thiserror::Error;

/// Why a fetch produced no ad.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or I/O failure. Drives the retry schedule.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The body was not a usable ad payload.
    #[error("malformed ad response: {0}")]
    Malformed(String),

    /// The ad decision service answered but had nothing to serve.
    #[error("no fill")]
    NoFill,
}

impl FetchError {
    /// Only transport failures are worth retrying. A no-fill or a broken
    /// payload would come back the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

/// Misuse of the merged feed indexing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("position {position} is outside the merged feed of {len} items")]
    OutOfRange { position: usize, len: usize },

    #[error("position {position} shows an ad and has no content position")]
    NotContent { position: usize },

    #[error("position {position} is not an ad slot")]
    NotAdSlot { position: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(FetchError::Transport("connection reset".into()).is_retryable());
        assert!(!FetchError::Malformed("missing heading".into()).is_retryable());
        assert!(!FetchError::NoFill.is_retryable());
    }

    #[test]
    fn messages_name_the_position() {
        let err = FeedError::OutOfRange { position: 30, len: 24 };
        assert_eq!(
            err.to_string(),
            "position 30 is outside the merged feed of 24 items"
        );
    }
}
