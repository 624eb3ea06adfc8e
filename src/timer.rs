use core::sync::atomic::{AtomicU8, Ordering};

/// One of the two independent countdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// Bring-up loop and data token wait.
    Transfer,
    /// Card busy wait.
    Ready,
}

/// Two countdown counters decremented by a periodic tick.
///
/// Usually lives in a `static` shared by the tick interrupt and the driver:
///
/// ```
/// use sdmmc_spi_dma::Countdowns;
///
/// static COUNTDOWNS: Countdowns = Countdowns::new();
///
/// // Called every 10 ms.
/// fn on_timer_tick() {
///     COUNTDOWNS.tick();
/// }
/// # on_timer_tick();
/// ```
#[derive(Debug, Default)]
pub struct Countdowns {
    transfer: AtomicU8,
    ready: AtomicU8,
}

impl Countdowns {
    /// Creates expired countdowns.
    pub const fn new() -> Self {
        Self {
            transfer: AtomicU8::new(0),
            ready: AtomicU8::new(0),
        }
    }

    fn counter(&self, countdown: Countdown) -> &AtomicU8 {
        match countdown {
            Countdown::Transfer => &self.transfer,
            Countdown::Ready => &self.ready,
        }
    }

    /// Decrements both counters, saturating at zero.
    pub fn tick(&self) {
        for counter in [&self.transfer, &self.ready] {
            // Err means the counter already expired.
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    /// Restarts `countdown` from `ticks`.
    pub fn arm(&self, countdown: Countdown, ticks: u8) {
        self.counter(countdown).store(ticks, Ordering::Release);
    }

    /// Returns `true` while `countdown` has not reached zero.
    pub fn is_running(&self, countdown: Countdown) -> bool {
        self.remaining(countdown) != 0
    }

    /// Ticks left on `countdown`.
    pub fn remaining(&self, countdown: Countdown) -> u8 {
        self.counter(countdown).load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::{Countdown, Countdowns};

    #[test]
    fn test_tick_saturates() {
        let countdowns = Countdowns::new();
        countdowns.arm(Countdown::Transfer, 2);
        countdowns.arm(Countdown::Ready, 1);

        countdowns.tick();
        assert_eq!(countdowns.remaining(Countdown::Transfer), 1);
        assert!(!countdowns.is_running(Countdown::Ready));

        countdowns.tick();
        countdowns.tick();
        assert_eq!(countdowns.remaining(Countdown::Transfer), 0);
        assert_eq!(countdowns.remaining(Countdown::Ready), 0);
    }

    #[test]
    fn test_countdowns_are_independent() {
        let countdowns = Countdowns::new();
        countdowns.arm(Countdown::Ready, 50);
        countdowns.tick();
        countdowns.arm(Countdown::Transfer, 100);

        assert_eq!(countdowns.remaining(Countdown::Ready), 49);
        assert_eq!(countdowns.remaining(Countdown::Transfer), 100);
    }

    #[test]
    fn test_concurrent_ticks_are_not_lost() {
        let countdowns = Countdowns::new();
        countdowns.arm(Countdown::Transfer, 200);
        countdowns.arm(Countdown::Ready, 250);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        countdowns.tick();
                    }
                });
            }
        });

        assert_eq!(countdowns.remaining(Countdown::Transfer), 0);
        assert_eq!(countdowns.remaining(Countdown::Ready), 50);
    }
}
