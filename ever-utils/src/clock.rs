use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

pub trait Clock: Send + Sync {
    fn now_sec_u64(&self) -> u64;
    fn now_ms_f64(&self) -> f64;
    fn now_ms_u64(&self) -> u64;
}

pub struct SimpleClock;

impl Clock for SimpleClock {
    #[inline]
    fn now_sec_u64(&self) -> u64 {
        now_sec_u64()
    }

    #[inline]
    fn now_ms_f64(&self) -> f64 {
        now_ms_f64()
    }

    #[inline]
    fn now_ms_u64(&self) -> u64 {
        now_ms_u64()
    }
}

/// Local clock corrected by the offset to some trusted time source.
///
/// The offset is shared: one writer (network layer) updates it while
/// subscriptions keep reading it through `&self`.
#[derive(Default)]
pub struct ClockWithOffset {
    offset_ms: AtomicI64,
}

impl ClockWithOffset {
    pub fn new(offset_ms: i64) -> Self {
        let clock = Self::default();
        clock.update_offset(offset_ms);
        clock
    }

    pub fn update_offset(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Release);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }
}

impl Clock for ClockWithOffset {
    fn now_sec_u64(&self) -> u64 {
        self.now_ms_u64() / 1000
    }

    fn now_ms_f64(&self) -> f64 {
        self.offset_ms() as f64 + now_ms_f64()
    }

    fn now_ms_u64(&self) -> u64 {
        apply_offset(now_ms_u64(), self.offset_ms())
    }
}

/// Manually driven clock
#[derive(Default)]
pub struct ConstClock {
    time_ms: AtomicU64,
}

impl ConstClock {
    pub fn from_millis(time_ms: u64) -> Self {
        Self {
            time_ms: AtomicU64::new(time_ms),
        }
    }

    pub fn from_secs(time_sec: u64) -> Self {
        Self::from_millis(time_sec * 1000)
    }

    pub fn set_millis(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::Release);
    }

    pub fn advance_millis(&self, delta_ms: u64) {
        self.time_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl Clock for ConstClock {
    fn now_sec_u64(&self) -> u64 {
        self.now_ms_u64() / 1000
    }

    fn now_ms_f64(&self) -> f64 {
        self.now_ms_u64() as f64
    }

    fn now_ms_u64(&self) -> u64 {
        self.time_ms.load(Ordering::Acquire)
    }
}

#[inline]
fn apply_offset(time_ms: u64, offset_ms: i64) -> u64 {
    if offset_ms >= 0 {
        time_ms.saturating_add(offset_ms as u64)
    } else {
        time_ms.saturating_sub(offset_ms.unsigned_abs())
    }
}

/// Time since the unix epoch. A system clock set before the epoch reads as zero
fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
}

pub fn now_sec_u64() -> u64 {
    since_epoch().as_secs()
}

pub fn now_ms_f64() -> f64 {
    since_epoch().as_secs_f64() * 1000.0
}

pub fn now_ms_u64() -> u64 {
    since_epoch().as_millis() as u64
}
