//! Videocart firmware core for the Fairchild Channel F.
//!
//! This crate makes a microcontroller impersonate arbitrary Videocart
//! hardware on the console's external cartridge bus: ROM, RAM, SRAM-mapped
//! peripherals, and auxiliary logic, with program images (.bin / .chf)
//! loaded from removable storage at run time.
//!
//! # Architecture
//!
//! The console's F8 CPU does not expose an address bus. Instead it drives a
//! 5-bit ROMC command every bus cycle, and every memory device keeps shadow
//! copies of the CPU's counters, updating them in lock-step. The firmware
//! core is therefore a cycle-synchronous state machine, not a memory chip:
//!
//! - [`romc`]: the 32-state ROMC dispatcher and the shadow registers
//!   (PC0, PC1, DC0, DC1) it maintains.
//! - [`memory`]: 64 KiB of attributed memory: every address carries a
//!   chip-type tag that decides its read/write semantics.
//! - [`chips`]: the closed registry of chip types (ROM, RAM, LED, NVRAM,
//!   RESERVED).
//! - [`ports`]: the 256-slot I/O port table and the peripherals that live
//!   in it: 2102 SRAM, RNG, hardware stacks, and the Launcher menu port.
//! - [`loader`]: parses .bin and .chf images into the attributed memory
//!   and installs the peripherals the image calls for.
//! - [`file_cache`]: the one-shot directory snapshot the menu program
//!   browses through the Launcher.
//! - [`hal`]: the seams to the outside: bus wires, entropy, delays, clock,
//!   storage, and title translation are all trait objects the embedder
//!   provides.
//!
//! # Memory map, as the guest sees it
//!
//! ```text
//! [0x0000, 0x0800)  console BIOS; permanently RESERVED, never driven
//! [0x0800, 0xFFFF]  cartridge-controlled, per the loaded image
//! [0x2800, 0x3000)  default RAM window under the BIN hardware profile
//! ```
//!
//! # Timing
//!
//! The bus runs at roughly 2 MHz and the dispatcher must answer within one
//! WRITE half-cycle. Everything on that path is allocation-free and
//! dispatches through dense, directly-indexed tables; the service loop owns
//! its core and busy-waits on the WRITE edges.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use vcart_core::hal::{Delay, EntropySource};
//! use vcart_core::Videocart;
//!
//! struct Rosc;
//! impl EntropySource for Rosc {
//!     fn random_bit(&mut self) -> bool {
//!         true // stand-in for a real ring oscillator
//!     }
//! }
//!
//! struct Busy;
//! impl Delay for Busy {
//!     fn delay_ms(&mut self, _ms: u32) {}
//! }
//!
//! let mut cart = Videocart::new(Rc::new(RefCell::new(Rosc)));
//! cart.load_game(Some(&[0x55]), &mut Busy);
//! assert!(cart.ports.is_installed(0xFF));
//! ```

use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod chips;
pub mod error;
pub mod file_cache;
pub mod hal;
pub mod hardware;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod ports;
pub mod romc;

use error::{blink_code, BlinkCode};
use file_cache::{DirectoryCache, FileRecord};
use hal::{BusLines, Delay, Led, Storage, SystemClock};
use logging::{log, LogCategory, LogLevel};
use memory::AttributedMemory;
use ports::{PortTable, SharedEntropy};
use romc::BusRegisters;

/// CPU frequency requested at boot. Bus servicing does not meet timing at
/// stock clocks.
pub const OVERCLOCK_HZ: u32 = 600_000_000;

/// The emulated cartridge: attributed memory, I/O ports, shadow registers,
/// and the loader/menu plumbing that ties them together.
///
/// This struct is the logical backplane the ROMC dispatcher operates on.
/// One instance owns all 64 KiB planes and the port table; nothing here is
/// process-global.
pub struct Videocart {
    pub memory: AttributedMemory,
    pub ports: PortTable,
    pub regs: BusRegisters,
    pub led: Led,
    files: Rc<DirectoryCache>,
    cursor: Rc<Cell<u16>>,
    load_request: Rc<Cell<Option<u16>>>,
    entropy: SharedEntropy,
}

#[derive(Serialize, Deserialize)]
struct SaveState {
    regs: BusRegisters,
    memory: AttributedMemory,
    led: Led,
    cursor: u16,
}

impl Videocart {
    /// A cartridge with no image loaded and an empty directory snapshot.
    ///
    /// `entropy` feeds the RNG peripheral's power-on seed and re-seeds.
    pub fn new(entropy: SharedEntropy) -> Self {
        Self {
            memory: AttributedMemory::new(),
            ports: PortTable::new(),
            regs: BusRegisters::default(),
            led: Led::new(),
            files: Rc::new(DirectoryCache::default()),
            cursor: Rc::new(Cell::new(0)),
            load_request: Rc::new(Cell::new(None)),
            entropy,
        }
    }

    /// Configure the CPU clock for bus servicing; blinks `OverclockFailed`
    /// if the board refuses.
    pub fn power_on<C: SystemClock, D: Delay>(&mut self, clock: &mut C, delay: &mut D) {
        self.led.set(true);
        if clock.set_cpu_frequency(OVERCLOCK_HZ).is_err() {
            blink_code(&mut self.led, delay, BlinkCode::OverclockFailed);
        }
    }

    /// Install the directory snapshot the Launcher exposes to the menu.
    ///
    /// Call before emulation starts; the snapshot is immutable afterwards.
    /// Resets the menu cursor and drops any stale load request.
    pub fn set_directory(&mut self, cache: DirectoryCache) {
        self.files = Rc::new(cache);
        self.cursor.set(0);
        self.load_request.set(None);
    }

    /// The installed directory snapshot.
    pub fn directory(&self) -> &DirectoryCache {
        &self.files
    }

    /// The cached entry the menu cursor is on.
    pub fn selected_file(&self) -> Option<&FileRecord> {
        self.files.get(self.cursor.get())
    }

    /// Take the pending load request, if the Launcher raised one.
    pub fn take_load_request(&mut self) -> Option<u16> {
        self.load_request.take()
    }

    /// Raise the active-high interrupt-request wire.
    pub fn trigger_interrupt_request<B: BusLines>(&mut self, lines: &mut B) {
        lines.set_intrq(true);
    }

    /// Clear the interrupt-request wire.
    pub fn reset_interrupt_request<B: BusLines>(&mut self, lines: &mut B) {
        lines.set_intrq(false);
    }

    /// Service one bus cycle: release the bus on the WRITE falling edge,
    /// sample command and data on the rising edge, dispatch.
    pub fn service_cycle<B: BusLines>(&mut self, lines: &mut B) {
        lines.wait_write_falling();
        lines.release_dbus();
        lines.wait_write_rising();
        self.regs.dbus = lines.sample_dbus();
        self.regs.romc = lines.sample_romc();
        self.execute_romc(lines);
    }

    /// The bus service loop.
    ///
    /// Runs for as long as the host console is present. Between cycles, a
    /// load request posted by the Launcher yields to the loader; `storage`
    /// is only ever touched there.
    pub fn run<B, S, D>(&mut self, lines: &mut B, storage: &mut S, delay: &mut D)
    where
        B: BusLines,
        S: Storage,
        D: Delay,
    {
        while lines.bus_present() {
            self.service_cycle(lines);
            if let Some(index) = self.load_request.take() {
                self.load_selected(index, storage, delay);
            }
        }
    }

    /// Re-open the cached entry at `index` and load it.
    pub fn load_selected<S: Storage, D: Delay>(
        &mut self,
        index: u16,
        storage: &mut S,
        delay: &mut D,
    ) {
        log(LogCategory::Loader, LogLevel::Info, || {
            format!("loading entry {}", index)
        });
        let image = self
            .files
            .get(index)
            .map(|record| record.name.clone())
            .and_then(|name| storage.read(&name));
        self.load_game(image.as_deref(), delay);
    }

    /// A JSON-serializable snapshot for debugging.
    pub fn save_state(&self) -> Value {
        let state = SaveState {
            regs: self.regs.clone(),
            memory: self.memory.clone(),
            led: self.led.clone(),
            cursor: self.cursor.get(),
        };
        serde_json::to_value(state).unwrap_or(Value::Null)
    }

    /// Restore a snapshot produced by [`Videocart::save_state`].
    ///
    /// Peripherals are not part of the snapshot; reload the image to get
    /// them back.
    pub fn load_state(&mut self, value: &Value) -> Result<(), serde_json::Error> {
        let state: SaveState = serde_json::from_value(value.clone())?;
        self.regs = state.regs;
        self.memory = state.memory;
        self.led = state.led;
        self.cursor.set(state.cursor);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for the unit tests.

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::hal::{BusLines, Delay, EntropySource};
    use crate::Videocart;

    /// Deterministic entropy: a rotating bit pattern.
    pub struct TestEntropy(pub u64);

    impl EntropySource for TestEntropy {
        fn random_bit(&mut self) -> bool {
            self.0 = self.0.rotate_left(1);
            self.0 & 1 != 0
        }
    }

    /// Bus mock that records what the cartridge drives.
    #[derive(Default)]
    pub struct RecordingLines {
        pub driven: Vec<u8>,
        pub intrq: bool,
    }

    impl BusLines for RecordingLines {
        fn sample_romc(&mut self) -> u8 {
            0
        }

        fn sample_dbus(&mut self) -> u8 {
            0
        }

        fn drive_dbus(&mut self, value: u8) {
            self.driven.push(value);
        }

        fn release_dbus(&mut self) {}

        fn wait_write_rising(&mut self) {}

        fn wait_write_falling(&mut self) {}

        fn bus_present(&mut self) -> bool {
            false
        }

        fn set_intrq(&mut self, raised: bool) {
            self.intrq = raised;
        }
    }

    /// Delay mock that returns immediately.
    pub struct NoDelay;

    impl Delay for NoDelay {
        fn delay_ms(&mut self, _ms: u32) {}
    }

    pub fn test_cart() -> Videocart {
        Videocart::new(Rc::new(RefCell::new(TestEntropy(0x0123_4567_89AB_CDEF))))
    }
}
