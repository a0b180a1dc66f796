//! Hybrid logical clock producing [`Eventstamp`]s.
//!
//! The clock combines wall-clock milliseconds with a counter for writes that
//! land on the same millisecond and a fresh random nonce per tick. Every call
//! to [`Clock::now`] is strictly greater than any stamp the clock has
//! produced or absorbed before, and [`Clock::forward`] absorbs remote
//! progress so the next local stamp dominates anything already seen.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::eventstamp::{Eventstamp, COUNTER_MAX};

/// Abstraction over the wall clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a fixed one.
pub trait TimeSource: Send + Sync {
    /// Returns the current time as milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Default time source that reads the real system time.
#[derive(Debug, Clone)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as u64
    }
}

/// Source of the per-tick nonce.
pub trait NonceSource: Send {
    /// Returns a fresh nonce for the next tick.
    fn next_nonce(&mut self) -> u16;
}

/// Default nonce source backed by `rand`.
#[derive(Debug, Clone)]
pub struct RandomNonce;

impl NonceSource for RandomNonce {
    fn next_nonce(&mut self) -> u16 {
        rand::random()
    }
}

/// A clock shared by every collection of one database.
pub type SharedClock = Arc<Mutex<Clock>>;

/// Hybrid logical clock.
///
/// State is `(last_ms, counter, last_nonce)`. When the wall clock advances
/// past the last logical time the counter resets to zero; otherwise the
/// counter increments, which absorbs stalled or backwards wall clocks.
///
/// # Examples
///
/// ```
/// use roost_engine::Clock;
///
/// let mut clock = Clock::new();
/// let first = clock.now();
/// let second = clock.now();
/// assert!(first < second);
/// ```
pub struct Clock {
    last_ms: u64,
    counter: u32,
    last_nonce: u16,
    time: Box<dyn TimeSource>,
    nonce: Box<dyn NonceSource>,
}

impl Clock {
    /// Create a clock reading the real system time with random nonces.
    pub fn new() -> Self {
        Self::with_sources(Box::new(WallClock), Box::new(RandomNonce))
    }

    /// Create a clock with explicit time and nonce sources.
    pub fn with_sources(time: Box<dyn TimeSource>, mut nonce: Box<dyn NonceSource>) -> Self {
        let last_ms = time.now_ms();
        let last_nonce = nonce.next_nonce();
        Self {
            last_ms,
            counter: 0,
            last_nonce,
            time,
            nonce,
        }
    }

    /// Wrap this clock for sharing across collections.
    pub fn shared(self) -> SharedClock {
        Arc::new(Mutex::new(self))
    }

    /// Produce a new eventstamp, strictly greater than every stamp this
    /// clock has produced or absorbed so far.
    pub fn now(&mut self) -> Eventstamp {
        let wall = self.time.now_ms();
        if wall > self.last_ms {
            self.last_ms = wall;
            self.counter = 0;
        } else if self.counter >= COUNTER_MAX {
            // Fixed-width counter exhausted within this millisecond; borrow
            // the next one rather than widening the encoding.
            self.last_ms += 1;
            self.counter = 0;
        } else {
            self.counter += 1;
        }
        self.last_nonce = self.nonce.next_nonce();
        Eventstamp::encode(self.last_ms, self.counter, self.last_nonce)
    }

    /// The eventstamp of the most recent state transition, without advancing.
    pub fn latest(&self) -> Eventstamp {
        Eventstamp::encode(self.last_ms, self.counter, self.last_nonce)
    }

    /// Absorb a remote eventstamp.
    ///
    /// Advances the clock state iff `remote` is a valid stamp greater than
    /// [`Clock::latest`]; malformed remotes are ignored. After a successful
    /// forward the next [`Clock::now`] dominates the remote.
    pub fn forward(&mut self, remote: &Eventstamp) {
        let Ok((instant_ms, counter, nonce)) = remote.decode() else {
            tracing::debug!(remote = %remote, "ignoring malformed remote eventstamp");
            return;
        };
        if *remote > self.latest() {
            self.last_ms = instant_ms;
            self.counter = counter;
            self.last_nonce = nonce;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a shared clock, tolerating poisoning from a panicked subscriber.
pub(crate) fn lock_clock(clock: &SharedClock) -> std::sync::MutexGuard<'_, Clock> {
    clock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;

    /// A deterministic time source controlled explicitly.
    pub struct FixedTime {
        time: Arc<AtomicU64>,
    }

    impl FixedTime {
        pub fn new(initial: u64) -> (Self, Arc<AtomicU64>) {
            let time = Arc::new(AtomicU64::new(initial));
            (Self { time: time.clone() }, time)
        }
    }

    impl TimeSource for FixedTime {
        fn now_ms(&self) -> u64 {
            self.time.load(Ordering::Relaxed)
        }
    }

    /// A nonce source that counts up from zero.
    pub struct SequenceNonce(pub u16);

    impl NonceSource for SequenceNonce {
        fn next_nonce(&mut self) -> u16 {
            let nonce = self.0;
            self.0 = self.0.wrapping_add(1);
            nonce
        }
    }

    /// A clock pinned to `initial` milliseconds with sequential nonces.
    pub fn fixed_clock(initial: u64) -> (Clock, Arc<AtomicU64>) {
        let (time, handle) = FixedTime::new(initial);
        let clock = Clock::with_sources(Box::new(time), Box::new(SequenceNonce(0)));
        (clock, handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_support::fixed_clock;
    use super::*;

    #[test]
    fn now_is_strictly_monotonic_within_a_millisecond() {
        let (mut clock, _) = fixed_clock(1_000_000);

        let mut stamps = Vec::new();
        for _ in 0..100 {
            stamps.push(clock.now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        let (instant, counter, _) = stamps[99].decode().unwrap();
        assert_eq!(instant, 1_000_000);
        assert_eq!(counter, 99);
    }

    #[test]
    fn now_resets_counter_when_wall_clock_advances() {
        let (mut clock, time) = fixed_clock(1_000_000);

        let first = clock.now();
        assert_eq!(first.decode().unwrap().1, 1);

        time.store(1_000_005, Ordering::Relaxed);
        let second = clock.now();
        let (instant, counter, _) = second.decode().unwrap();
        assert_eq!(instant, 1_000_005);
        assert_eq!(counter, 0);
        assert!(first < second);
    }

    #[test]
    fn now_absorbs_backwards_wall_clock() {
        let (mut clock, time) = fixed_clock(1_000_000);

        let before = clock.now();
        time.store(999_000, Ordering::Relaxed);
        let after = clock.now();

        assert!(before < after);
        assert_eq!(after.decode().unwrap().0, 1_000_000);
    }

    #[test]
    fn latest_does_not_advance() {
        let (mut clock, _) = fixed_clock(1_000_000);

        let stamp = clock.now();
        assert_eq!(clock.latest(), stamp);
        assert_eq!(clock.latest(), stamp);
    }

    #[test]
    fn forward_adopts_greater_remote() {
        let (mut clock, _) = fixed_clock(1_000_000);

        let remote = Eventstamp::encode(2_000_000, 7, 0x0abc);
        clock.forward(&remote);
        assert_eq!(clock.latest(), remote);

        // The next local stamp dominates the absorbed remote.
        let next = clock.now();
        assert!(next > remote);
        let (instant, counter, _) = next.decode().unwrap();
        assert_eq!(instant, 2_000_000);
        assert_eq!(counter, 8);
    }

    #[test]
    fn forward_ignores_older_remote() {
        let (mut clock, _) = fixed_clock(1_000_000);

        let local = clock.now();
        let remote = Eventstamp::encode(500, 0, 0);
        clock.forward(&remote);
        assert_eq!(clock.latest(), local);
    }

    #[test]
    fn forward_ignores_malformed_remote() {
        let (mut clock, _) = fixed_clock(1_000_000);

        let local = clock.now();
        let bogus = Eventstamp::parse("2024-01-01T00:00:00.000Z|0000|0000");
        assert!(bogus.is_ok());
        // Build an invalid stamp through serde to bypass parse validation.
        let invalid: Eventstamp = serde_json::from_str("\"definitely not a stamp\"").unwrap();
        clock.forward(&invalid);
        assert_eq!(clock.latest(), local);
    }

    #[test]
    fn forward_latest_returns_max_of_remote_and_prior() {
        let (mut clock, _) = fixed_clock(1_000_000);
        let prior = clock.latest();

        let greater = Eventstamp::encode(3_000_000, 0, 0);
        clock.forward(&greater);
        assert_eq!(clock.latest(), greater.max(prior));
    }

    #[test]
    fn counter_exhaustion_borrows_the_next_millisecond() {
        let (mut clock, _) = fixed_clock(1_000_000);

        clock.forward(&Eventstamp::encode(1_000_000, COUNTER_MAX, 0));
        let next = clock.now();
        let (instant, counter, _) = next.decode().unwrap();
        assert_eq!(instant, 1_000_001);
        assert_eq!(counter, 0);
    }

    #[test]
    fn wall_clock_returns_nonzero() {
        assert!(WallClock.now_ms() > 0);
    }
}
