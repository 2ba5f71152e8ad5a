//! Microsecond delay capability.

use std::fmt::Debug;
use std::thread::sleep;
use std::time::Duration;

/// Blocks the caller for at least the given number of microseconds.
///
/// Implementations must never return early: the HD44780 timing is specified as minimums, and a
/// delay that rounds down to zero breaks the enable strobe.
pub trait Delay: Debug {
    fn delay_us(&mut self, micros: u32);
}

/// [Delay] backed by [std::thread::sleep], which sleeps at least the requested duration.
#[derive(Debug, Default, Copy, Clone)]
pub struct SleepDelay;

impl Delay for SleepDelay {
    fn delay_us(&mut self, micros: u32) {
        sleep(Duration::from_micros(micros as u64));
    }
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_us(&mut self, micros: u32) {
        (**self).delay_us(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_delay_never_returns_early() {
        let start = Instant::now();
        SleepDelay.delay_us(1500);
        assert!(start.elapsed() >= Duration::from_micros(1500));
    }
}
