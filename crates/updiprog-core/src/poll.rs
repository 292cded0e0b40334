//! Time source and bounded polling
//!
//! Every wait in the stack goes through [`Delay`], so the whole protocol can
//! be driven on virtual time by test doubles. [`Poll`] captures the
//! "check, sleep, repeat at most N times" contract used for start-bit
//! detection, unlock waits and NVM ready polling.

/// Microsecond sleep capability
pub trait Delay {
    /// Block for at least `us` microseconds
    fn delay_us(&mut self, us: u32);

    /// Block for at least `ms` milliseconds
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

impl<D: Delay + ?Sized> Delay for Box<D> {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Bounded polling loop: at most `max_polls` checks, `interval_us` apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    /// Sleep between checks
    pub interval_us: u32,
    /// Maximum number of checks before giving up
    pub max_polls: u32,
}

impl Poll {
    /// Create a polling policy
    pub const fn new(interval_us: u32, max_polls: u32) -> Self {
        Self {
            interval_us,
            max_polls,
        }
    }

    /// Sleep first, then check; repeat until `check` yields a value.
    ///
    /// Returns `Ok(None)` when the budget runs out. Errors from `check`
    /// end the loop immediately.
    pub fn sleep_then_check<D, R, E, F>(&self, ctx: &mut D, mut check: F) -> Result<Option<R>, E>
    where
        D: Delay + ?Sized,
        F: FnMut(&mut D) -> Result<Option<R>, E>,
    {
        for _ in 0..self.max_polls {
            ctx.delay_us(self.interval_us);
            if let Some(value) = check(ctx)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Check first, then sleep; the form used for edge detection.
    pub fn check_then_sleep<D, F>(&self, ctx: &mut D, mut done: F) -> bool
    where
        D: Delay + ?Sized,
        F: FnMut(&mut D) -> bool,
    {
        let mut polls = 0;
        while !done(ctx) {
            ctx.delay_us(self.interval_us);
            polls += 1;
            if polls > self.max_polls {
                return false;
            }
        }
        true
    }
}

/// Delay that only accumulates virtual time
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualClock {
    /// Total microseconds "slept"
    pub elapsed_us: u64,
}

impl Delay for VirtualClock {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += u64::from(us);
    }
}

/// Delay backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_us(&mut self, us: u32) {
        if us > 0 {
            std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_then_check_budget() {
        let mut clock = VirtualClock::default();
        let mut calls = 0;
        let res: Result<Option<()>, ()> = Poll::new(1000, 10).sleep_then_check(&mut clock, |_| {
            calls += 1;
            Ok(None)
        });
        assert_eq!(res, Ok(None));
        assert_eq!(calls, 10);
        assert_eq!(clock.elapsed_us, 10_000);
    }

    #[test]
    fn test_std_delay_sleeps() {
        let start = std::time::Instant::now();
        let mut delay = StdDelay;
        delay.delay_us(0);
        delay.delay_us(2000);
        assert!(start.elapsed() >= std::time::Duration::from_micros(2000));
    }

    #[test]
    fn test_sleep_then_check_early_exit() {
        let mut clock = VirtualClock::default();
        let mut calls = 0;
        let res: Result<Option<u8>, ()> = Poll::new(1000, 10).sleep_then_check(&mut clock, |_| {
            calls += 1;
            Ok(if calls == 3 { Some(7) } else { None })
        });
        assert_eq!(res, Ok(Some(7)));
        assert_eq!(clock.elapsed_us, 3000);
    }

    #[test]
    fn test_check_then_sleep_timeout() {
        let mut clock = VirtualClock::default();
        assert!(!Poll::new(125, 5000).check_then_sleep(&mut clock, |_| false));
        assert_eq!(clock.elapsed_us, 125 * 5001);
        assert!(Poll::new(125, 5000).check_then_sleep(&mut clock, |_| true));
    }
}
