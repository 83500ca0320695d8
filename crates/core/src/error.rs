//! Blink code functionality (same concept as beep codes).
//!
//! The device has no display of its own, so unrecoverable boot and load
//! failures are reported by pulsing the debug LED: a code is `2 * code`
//! toggles at 250 ms spacing, separated by one-second gaps, repeated three
//! times by default.

use crate::hal::{Delay, Led};

/// Debug codes blinked on the LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlinkCode {
    /// Boot-time clock configuration failed.
    OverclockFailed = 3,
    /// No loadable image was found on storage.
    NoValidFiles = 4,
}

/// Default number of times a code is repeated.
pub const BLINK_REPEATS: u8 = 3;

/// Blink an error code on the LED, [`BLINK_REPEATS`] times.
pub fn blink_code(led: &mut Led, delay: &mut impl Delay, code: BlinkCode) {
    blink_code_repeated(led, delay, code, BLINK_REPEATS);
}

/// Blink an error code on the LED a given number of times.
pub fn blink_code_repeated(led: &mut Led, delay: &mut impl Delay, code: BlinkCode, repeat: u8) {
    led.set(false);
    delay.delay_ms(1000);
    for _ in 0..repeat {
        for _ in 0..2 * (code as u8) {
            led.toggle();
            delay.delay_ms(250);
        }
        delay.delay_ms(1000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingDelay {
        total_ms: u64,
    }

    impl Delay for CountingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.total_ms += u64::from(ms);
        }
    }

    #[test]
    fn test_blink_toggle_count_encodes_the_code() {
        let mut led = Led::new();
        let mut delay = CountingDelay::default();

        blink_code(&mut led, &mut delay, BlinkCode::NoValidFiles);
        // 2 * 4 toggles per repeat, three repeats
        assert_eq!(led.toggle_count(), 24);
        // LED ends where it started: an even number of toggles
        assert!(!led.is_on());
    }

    #[test]
    fn test_blink_timing_totals() {
        let mut led = Led::new();
        let mut delay = CountingDelay::default();

        blink_code_repeated(&mut led, &mut delay, BlinkCode::OverclockFailed, 1);
        // 1s lead-in + 6 toggles * 250ms + 1s gap
        assert_eq!(delay.total_ms, 1000 + 6 * 250 + 1000);
    }
}
