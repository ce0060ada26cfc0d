//! Tick sources for the loop budget.
//!
//! The budget is expressed in ticks of whatever source the queue was given;
//! `DriverConfig::tick_frequency` must describe that source.

#[cfg(feature = "std")]
use alloc::sync::Arc;

/// Monotonic tick counter.
pub trait TickSource: Send + Sync {
    fn now(&self) -> u64;
}

/// Read TSC (Time Stamp Counter).
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn get_tsc() -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: rdtsc has no memory effects.
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nostack, nomem, preserves_flags)
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn get_tsc() -> u64 {
    0
}

/// Raw TSC. Pair with a calibrated `tick_frequency`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TscClock;

impl TickSource for TscClock {
    fn now(&self) -> u64 {
        get_tsc()
    }
}

/// Nanoseconds since the clock was created (`tick_frequency` = 1e9).
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl TickSource for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Clock matching `DriverConfig::default().tick_frequency`.
#[cfg(feature = "std")]
pub fn default_clock() -> Arc<dyn TickSource> {
    Arc::new(MonotonicClock::new())
}
