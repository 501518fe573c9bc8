//! Process-wide time: the [`TimestampMs`] wire type and the injectable
//! [`Clock`] that all temporal reasoning (billing periods, freshness windows,
//! credit expiry) consults.

use std::{
    convert::TryFrom,
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// The number of milliseconds since the [`UNIX_EPOCH`].
///
/// Internally represented by a non-negative [`i64`] to ease interoperability
/// with platforms that don't support unsigned ints.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct TimestampMs(i64);

impl TimestampMs {
    pub const UNIX_EPOCH: Self = Self(0);

    /// Creates a new [`TimestampMs`] from the current [`SystemTime`].
    ///
    /// Panics if the current time is not within bounds.
    pub fn now() -> Self {
        Self::try_from(SystemTime::now()).unwrap()
    }

    /// Returns the contained [`i64`].
    #[inline]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    pub fn from_i64(value: i64) -> anyhow::Result<Self> {
        anyhow::ensure!(value >= 0, "Timestamp must be non-negative");
        Ok(Self(value))
    }

    /// The corresponding UTC datetime.
    pub fn to_datetime_utc(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0)
            .expect("Non-negative i64 millis is always in chrono range")
    }

    /// The UTC calendar date containing this instant.
    pub fn to_date_utc(self) -> NaiveDate {
        self.to_datetime_utc().date_naive()
    }

    /// Midnight UTC at the start of `date`.
    pub fn from_date_utc(date: NaiveDate) -> Self {
        let millis = date
            .and_hms_opt(0, 0, 0)
            .expect("00:00:00 is always valid")
            .and_utc()
            .timestamp_millis();
        Self(millis.max(0))
    }

    /// `self + duration`, clamped at the representable max.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// The duration from `earlier` to `self`, or [`None`] if `earlier` is in
    /// the future relative to `self`.
    pub fn duration_since(self, earlier: Self) -> Option<Duration> {
        u64::try_from(self.0 - earlier.0)
            .ok()
            .map(Duration::from_millis)
    }
}

/// Displays the raw millisecond count.
impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Get a [`SystemTime`] corresponding to this timestamp.
impl From<TimestampMs> for SystemTime {
    fn from(timestamp: TimestampMs) -> Self {
        let millis = u64::try_from(timestamp.0)
            .expect("Non-negative invariant was violated");
        UNIX_EPOCH + Duration::from_millis(millis)
    }
}

/// Attempts to convert a [`SystemTime`] into a [`TimestampMs`].
impl TryFrom<SystemTime> for TimestampMs {
    type Error = anyhow::Error;
    fn try_from(system_time: SystemTime) -> anyhow::Result<Self> {
        system_time
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .map(i64::try_from)
            .map(|res| res.map(Self))
            .context("Current time is before January 1st, 1970")?
            .context("Current time is more than 292 million years past epoch")
    }
}

/// Enforces that the inner [`i64`] is non-negative.
impl<'de> Deserialize<'de> for TimestampMs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        if value >= 0 {
            Ok(TimestampMs(value))
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Signed(value),
                &"Unix timestamp must be non-negative",
            ))
        }
    }
}

/// The process-wide "now" provider, injected everywhere temporal reasoning
/// occurs.
///
/// `now()` is non-decreasing within a single process: the system arm clamps
/// against the last value handed out, and the mock arm can only be stepped
/// forward.
#[derive(Clone, Debug)]
pub enum Clock {
    System,
    Mock(Arc<AtomicI64>),
}

/// The stepping handle for a mock [`Clock`]. Only the test harness holds one.
#[derive(Clone, Debug)]
pub struct MockClock(Arc<AtomicI64>);

impl Clock {
    pub fn system() -> Self {
        Self::System
    }

    /// A mock clock starting at `start`, plus its stepping handle.
    pub fn mock_at(start: TimestampMs) -> (Self, MockClock) {
        let shared = Arc::new(AtomicI64::new(start.as_i64()));
        (Self::Mock(shared.clone()), MockClock(shared))
    }

    pub fn now(&self) -> TimestampMs {
        match self {
            Self::System => {
                static LAST: AtomicI64 = AtomicI64::new(0);
                let wall = TimestampMs::now().as_i64();
                let prev = LAST.fetch_max(wall, Ordering::SeqCst);
                TimestampMs(wall.max(prev))
            }
            Self::Mock(shared) => TimestampMs(shared.load(Ordering::SeqCst)),
        }
    }

    pub fn today_utc(&self) -> NaiveDate {
        self.now().to_date_utc()
    }
}

impl MockClock {
    /// Step the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let millis = i64::try_from(delta.as_millis()).unwrap_or(i64::MAX);
        self.0.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the clock to `to`. Never moves backward.
    pub fn set(&self, to: TimestampMs) {
        self.0.fetch_max(to.as_i64(), Ordering::SeqCst);
    }

    pub fn now(&self) -> TimestampMs {
        TimestampMs(self.0.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::Arbitrary;
    use proptest::strategy::{BoxedStrategy, Strategy};

    use super::*;

    impl Arbitrary for TimestampMs {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (0..i64::MAX).prop_map(Self).boxed()
        }
    }

    #[test]
    fn deserialize_enforces_nonnegative() {
        assert_eq!(serde_json::from_str::<TimestampMs>("42").unwrap().0, 42);
        assert!(serde_json::from_str::<TimestampMs>("-42").is_err());
    }

    #[test]
    fn mock_clock_steps_forward_only() {
        let start = TimestampMs::from_i64(1_700_000_000_000).unwrap();
        let (clock, mock) = Clock::mock_at(start);
        assert_eq!(clock.now(), start);

        mock.advance(Duration::from_secs(60));
        assert_eq!(clock.now().as_i64(), start.as_i64() + 60_000);

        // Setting to an earlier instant is a no-op.
        mock.set(start);
        assert_eq!(clock.now().as_i64(), start.as_i64() + 60_000);
    }

    #[test]
    fn date_conversion() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let ts = TimestampMs::from_date_utc(date);
        assert_eq!(ts.to_date_utc(), date);
    }
}
