use crate::PlacementKey;
use std::time::Duration;

/// Backoff applied to consecutive transport failures on one placement.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 5] = [1_000, 5_000, 30_000, 60_000, 180_000];

pub fn default_retry_delays() -> Vec<Duration> {
    DEFAULT_RETRY_DELAYS_MS
        .iter()
        .map(|&ms| Duration::from_millis(ms))
        .collect()
}

/// Where the cache sends work it cannot do itself.
///
/// Both calls must return immediately. The implementation reports the
/// outcome of `request` through [`AdCache::complete`] and the expiry of a
/// retry timer through [`AdCache::retry_due`], on the cache's owning context.
///
/// [`AdCache::complete`]: crate::cache::AdCache::complete
/// [`AdCache::retry_due`]: crate::cache::AdCache::retry_due
pub trait AdSource {
    /// Start one network exchange for `key`.
    fn request(&mut self, key: &PlacementKey);

    /// Arm a timer that reports back after `delay`.
    fn schedule_retry(&mut self, key: &PlacementKey, delay: Duration);
}

/// Ordered retry delays with a cursor. One failure consumes one step; a
/// failure with no step left rewinds to the start and yields nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    index: usize,
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, index: 0 }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        match self.delays.get(self.index) {
            Some(&delay) => {
                self.index += 1;
                Some(delay)
            }
            None => {
                self.index = 0;
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Number of steps consumed since the last reset.
    pub fn step(&self) -> usize {
        self.index
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(default_retry_delays())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPhase {
    #[default]
    Idle,
    /// A request is outstanding.
    InFlight,
    /// A retry timer is armed.
    RetryPending,
}

/// Per-placement fetch bookkeeping. A placement is busy while a request
/// or a retry timer is outstanding, and never starts another one then.
#[derive(Debug, Clone)]
pub struct FetchState {
    phase: FetchPhase,
    retry: RetrySchedule,
}

impl FetchState {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            phase: FetchPhase::Idle,
            retry: RetrySchedule::new(delays),
        }
    }

    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != FetchPhase::Idle
    }

    pub fn retry_step(&self) -> usize {
        self.retry.step()
    }

    /// Idle -> InFlight. Returns false if already busy.
    pub fn begin(&mut self) -> bool {
        if self.is_busy() {
            return false;
        }
        self.phase = FetchPhase::InFlight;
        true
    }

    /// The exchange completed with a response, usable or not.
    pub fn responded(&mut self) {
        self.phase = FetchPhase::Idle;
        self.retry.reset();
    }

    /// The exchange failed at the transport level. Returns the delay to
    /// arm, or `None` once the schedule is exhausted.
    pub fn failed(&mut self) -> Option<Duration> {
        match self.retry.next_delay() {
            Some(delay) => {
                self.phase = FetchPhase::RetryPending;
                Some(delay)
            }
            None => {
                self.phase = FetchPhase::Idle;
                None
            }
        }
    }

    /// RetryPending -> Idle. Returns false for a timer nobody armed.
    pub fn retry_elapsed(&mut self) -> bool {
        if self.phase != FetchPhase::RetryPending {
            return false;
        }
        self.phase = FetchPhase::Idle;
        true
    }
}

impl Default for FetchState {
    fn default() -> Self {
        Self::new(default_retry_delays())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&v| Duration::from_millis(v)).collect()
    }

    #[test]
    fn schedule_walks_every_step_then_rewinds() {
        let mut schedule = RetrySchedule::default();
        let mut observed = Vec::new();
        while let Some(delay) = schedule.next_delay() {
            observed.push(delay);
        }
        assert_eq!(observed, ms(&[1_000, 5_000, 30_000, 60_000, 180_000]));
        assert_eq!(schedule.step(), 0);
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn reset_rewinds_mid_schedule() {
        let mut schedule = RetrySchedule::new(ms(&[10, 20, 30]));
        schedule.next_delay();
        schedule.next_delay();
        assert_eq!(schedule.step(), 2);
        schedule.reset();
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn empty_schedule_never_retries() {
        let mut schedule = RetrySchedule::new(Vec::new());
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn begin_refuses_while_busy() {
        let mut state = FetchState::default();
        assert!(state.begin());
        assert!(!state.begin());
        assert_eq!(state.phase(), FetchPhase::InFlight);

        assert_eq!(state.failed(), Some(Duration::from_millis(1_000)));
        assert_eq!(state.phase(), FetchPhase::RetryPending);
        assert!(!state.begin());

        assert!(state.retry_elapsed());
        assert!(state.begin());
    }

    #[test]
    fn response_resets_backoff() {
        let mut state = FetchState::default();
        state.begin();
        state.failed();
        state.retry_elapsed();
        state.begin();
        state.failed();
        assert_eq!(state.retry_step(), 2);

        state.retry_elapsed();
        state.begin();
        state.responded();
        assert_eq!(state.retry_step(), 0);
        assert_eq!(state.phase(), FetchPhase::Idle);
    }

    #[test]
    fn exhaustion_goes_idle() {
        let mut state = FetchState::new(ms(&[5]));
        state.begin();
        assert_eq!(state.failed(), Some(Duration::from_millis(5)));
        state.retry_elapsed();
        state.begin();
        assert_eq!(state.failed(), None);
        assert_eq!(state.phase(), FetchPhase::Idle);
        assert_eq!(state.retry_step(), 0);
    }

    #[test]
    fn stray_timer_is_ignored() {
        let mut state = FetchState::default();
        assert!(!state.retry_elapsed());
        state.begin();
        assert!(!state.retry_elapsed());
        assert_eq!(state.phase(), FetchPhase::InFlight);
    }
}
