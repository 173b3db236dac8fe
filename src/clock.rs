use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

use time::{Date, Duration, OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn today(&self) -> Date {
        self.now().date()
    }
}

/// Wall clock at a fixed UTC offset. The quota day rolls over at midnight in that offset.
/// `Default` is UTC.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Captures the machine's local offset, or UTC when it cannot be determined.
    ///
    /// On Unix `time` only reports the local offset while the process has a single thread, so
    /// call this before starting the async runtime or any logging worker.
    pub fn local() -> Self {
        match UtcOffset::current_local_offset() {
            Ok(offset) => Self::with_offset(offset),
            Err(_) => Self::default(),
        }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::with_offset(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance_days(&self, days: i64) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += Duration::days(days);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}
