//! Hardware abstraction seams.
//!
//! The firmware core never touches pins, SPI buses, or clock registers
//! directly. Everything electrical or host-specific enters through the traits
//! in this module, so the same core runs against real GPIO on a
//! microcontroller, a scripted bus in tests, or a trace player on a
//! workstation.
//!
//! # Interfaces
//!
//! | Trait           | Covers                                               |
//! |-----------------|------------------------------------------------------|
//! | `BusLines`      | ROMC/data/WRITE/INTRQ wires of the cartridge slot    |
//! | `EntropySource` | Raw hardware randomness (e.g. a ring oscillator)     |
//! | `Delay`         | Millisecond pacing for blink codes                   |
//! | `SystemClock`   | Boot-time CPU frequency configuration                |
//! | `Storage`       | Flat removable-storage enumeration and file reads    |
//! | `Cp437Encoder`  | UTF-8 to code-page-437 title translation             |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The cartridge-slot wires, as seen from the cartridge side.
///
/// One bus cycle is delimited by the WRITE clock: the host latches command
/// and data on the rising edge, and expects any response to be driven before
/// the next one. `drive_dbus` switches the data bus to output and places a
/// byte; `release_dbus` returns it to input.
pub trait BusLines {
    /// Sample the 5-bit ROMC command bus.
    fn sample_romc(&mut self) -> u8;
    /// Sample the 8-bit data bus.
    fn sample_dbus(&mut self) -> u8;
    /// Switch the data bus to output and place a byte on it.
    fn drive_dbus(&mut self, value: u8);
    /// Return the data bus to input mode.
    fn release_dbus(&mut self);
    /// Block until the rising edge of WRITE.
    fn wait_write_rising(&mut self);
    /// Block until the falling edge of WRITE.
    fn wait_write_falling(&mut self);
    /// Whether the host console is powered and driving the bus.
    fn bus_present(&mut self) -> bool;
    /// Drive the active-high interrupt-request wire.
    fn set_intrq(&mut self, raised: bool);
}

/// A supply of raw hardware randomness, one bit at a time.
///
/// The quality can be poor (biased, periodic when sampled rapidly); consumers
/// are expected to run the bits through an extractor.
pub trait EntropySource {
    fn random_bit(&mut self) -> bool;
}

/// Millisecond-granularity busy delay, used only off the bus hot path.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

#[derive(Debug, Error)]
#[error("clock configuration failed: requested {requested_hz} Hz")]
pub struct ClockError {
    pub requested_hz: u32,
}

/// Boot-time CPU clock configuration.
///
/// Servicing a bus half-cycle leaves only microseconds, so the firmware
/// overclocks the microcontroller before emulation starts.
pub trait SystemClock {
    fn set_cpu_frequency(&mut self, hz: u32) -> Result<(), ClockError>;
}

/// One entry of a flat storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Removable-storage access.
///
/// Only touched before bus emulation starts (to build the directory cache)
/// and inside the loader between bus cycles. Never on the hot path.
pub trait Storage {
    /// Enumerate the root directory, in storage order.
    fn entries(&mut self) -> Vec<StorageEntry>;
    /// Read a whole file by name. `None` if it is missing or unreadable.
    fn read(&mut self, name: &str) -> Option<Vec<u8>>;
}

/// UTF-8 to code-page-437 translation for on-screen titles.
///
/// Writes translated bytes into `dest`, truncating at its length, and returns
/// the number of bytes written. The caller pads the remainder.
pub trait Cp437Encoder {
    fn encode(&self, source: &str, dest: &mut [u8]) -> usize;
}

/// The debug LED line.
///
/// This is an observable signal, not a pin: the embedder maps it to real
/// GPIO, tests read the toggle counter. Guest programs deliberately toggle it
/// through LED-tagged memory writes to time running code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Led {
    on: bool,
    toggles: u64,
}

impl Led {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invert the LED state.
    pub fn toggle(&mut self) {
        self.on = !self.on;
        self.toggles += 1;
    }

    /// Force the LED state without counting a toggle.
    pub fn set(&mut self, on: bool) {
        self.on = on;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Total number of toggles since power-on.
    pub fn toggle_count(&self) -> u64 {
        self.toggles
    }
}
