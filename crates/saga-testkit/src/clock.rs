//! Deterministic `Clock` for tests — advances only when told to, so TTL
//! expiry and breaker `resets_at` can be exercised without real sleeps.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use saga_schemas::Clock;

pub struct TestClock {
    inner: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().unwrap() = at;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard = *guard + delta;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }
}
