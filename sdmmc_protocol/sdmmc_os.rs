//! Timing services the driver needs from its environment.
//!
//! Both are busy-wait based. The driver must stay usable from a fault handler,
//! where no scheduler or timer interrupt can run, so nothing here may yield.

pub trait Sleep {
    /// Spin for at least `time_us` microseconds.
    fn usleep(&mut self, time_us: u32);
}

pub trait MonotonicClock {
    /// Milliseconds since an arbitrary epoch, wrapping at `u32::MAX`.
    fn millis(&self) -> u32;

    /// True once strictly more than `budget_ms` milliseconds have passed since `start`.
    #[inline]
    fn timed_out(&self, start: u32, budget_ms: u32) -> bool {
        self.millis().wrapping_sub(start) > budget_ms
    }
}
