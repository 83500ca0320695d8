//! Channel F I/O ports.
//!
//! The console communicates with 256 addressable I/O ports through its OUT(S)
//! and IN(S) instructions. A handful belong to the console itself (CPU/PSU,
//! 3850/3853 registers); the cartridge is free to claim the rest. This module
//! provides the port table the ROMC dispatcher indexes plus the peripherals
//! this firmware can install behind it.
//!
//! # Port assignments
//!
//! | Port | Device            | Description |
//! |------|-------------------|-------------|
//! | 0x00 | CPU               | buttons and video RAM |
//! | 0x01 | CPU               | right controller and pixel palette |
//! | 0x04 | PSU               | left controller and horizontal video position |
//! | 0x05 | PSU               | sound and vertical video position |
//! | 0x0C | 3853 SMI          | programmable interrupt vector (upper byte) |
//! | 0x0D | 3853 SMI          | programmable interrupt vector (lower byte) |
//! | 0x0E | 3853 SMI          | interrupt control port |
//! | 0x0F | 3853 SMI          | programmable timer |
//! | 0x20 | Videocart 18      | 2102 SRAM |
//! | 0x21 | Videocart 18      | 2102 SRAM |
//! | 0x24 | Videocart 10      | 2102 SRAM |
//! | 0x25 | Videocart 10      | 2102 SRAM |
//!
//! Flashcart-only devices:
//!
//! | Port | Device            | Description |
//! |------|-------------------|-------------|
//! | 0x08 | Flashcart         | random number generator |
//! | 0x09 | Flashcart         | data stack |
//! | 0x0A | Flashcart         | return stack |
//! | 0xFF | Flashcart         | launcher (menu/load control) |

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::file_cache::DirectoryCache;
use crate::hal::EntropySource;
use crate::logging::{log, LogCategory, LogLevel};
use crate::memory::AttributedMemory;

/// Base of the default RAM window; the menu program lives off this.
pub const SRAM_START_ADDR: u16 = 0x2800;

/// Port address of the Launcher.
pub const LAUNCHER_PORT: u8 = 0xFF;

/// Flashcart random number generator port.
pub const RNG_PORT: u8 = 0x08;

/// Flashcart data stack port.
pub const DATA_STACK_PORT: u8 = 0x09;

/// Flashcart return stack port.
pub const RETURN_STACK_PORT: u8 = 0x0A;

/// Where the Launcher stages file titles for the menu program.
pub const TITLE_STAGING_ADDR: u16 = SRAM_START_ADDR + 2;

/// An emulated I/O port device.
///
/// `write` receives the attributed memory because some devices (the
/// Launcher) respond by staging bytes into emulated RAM.
pub trait IoPort {
    fn read(&mut self) -> u8;
    fn write(&mut self, data: u8, memory: &mut AttributedMemory);
}

/// A mapping from port addresses to I/O port devices.
///
/// Dense 256-slot table, directly indexed by the dispatcher. Slots are
/// populated by the loader and dropped wholesale before the next image
/// installs its own set.
pub struct PortTable {
    slots: [Option<Box<dyn IoPort>>; 256],
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Drop every installed peripheral.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Install a device at a port address, replacing any previous occupant.
    pub fn install(&mut self, address: u8, port: Box<dyn IoPort>) {
        self.slots[address as usize] = Some(port);
    }

    pub fn is_installed(&self, address: u8) -> bool {
        self.slots[address as usize].is_some()
    }

    /// Read from the port at `address`. `None` if the slot is empty, in
    /// which case the data bus must not be driven.
    #[inline]
    pub fn read(&mut self, address: u8) -> Option<u8> {
        self.slots[address as usize].as_mut().map(|port| port.read())
    }

    /// Write to the port at `address`; a no-op on an empty slot.
    #[inline]
    pub fn write(&mut self, address: u8, data: u8, memory: &mut AttributedMemory) {
        if let Some(port) = self.slots[address as usize].as_mut() {
            port.write(data, memory);
        }
    }
}

mod serde_arrays {
    //! Serde support for fixed arrays past serde's built-in 32-element limit.

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, const N: usize>(arr: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        arr.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {} bytes, got {}", N, len)))
    }
}

/// The shared guts of a 2102 SRAM: 1024 bits plus the two shadow ports.
///
/// The real IC is one chip wired to two port addresses, so both `Sram2102`
/// handles reference a single instance of this state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SramChip {
    #[serde(with = "serde_arrays")]
    bits: [u8; 128],
    port_a: u8,
    port_b: u8,
    address: u16,
}

impl Default for SramChip {
    fn default() -> Self {
        Self {
            bits: [0; 128],
            port_a: 0,
            port_b: 0,
            address: 0,
        }
    }
}

impl SramChip {
    const OUT_FLAG: u8 = 0x80;
    const IN_FLAG: u8 = 0x08;
    const ADDR_MASK: u8 = 0x06;
    const WRITE_FLAG: u8 = 0x01;

    fn bit(&self, address: u16) -> bool {
        let address = address as usize;
        self.bits[address >> 3] & (1 << (address & 7)) != 0
    }

    fn set_bit(&mut self, address: u16, value: bool) {
        let address = address as usize;
        let mask = 1u8 << (address & 7);
        if value {
            self.bits[address >> 3] |= mask;
        } else {
            self.bits[address >> 3] &= !mask;
        }
    }

    /// Latch a byte into one of the shadow ports and clock the chip.
    ///
    /// The order is the observable contract: store the shadow port, derive
    /// the 10-bit address, perform the conditional write, then refresh the
    /// OUT bit from the addressed cell.
    fn latch(&mut self, port_index: u8, data: u8) {
        if port_index != 0 {
            self.port_b = data;
        } else {
            self.port_a = data & 0x0F;
        }

        self.address = (u16::from(self.port_a & Self::ADDR_MASK) << 7) | u16::from(self.port_b);
        if self.port_a & Self::WRITE_FLAG != 0 {
            self.set_bit(self.address, self.port_a & Self::IN_FLAG != 0);
        }
        let out = u8::from(self.bit(self.address)) << 7;
        self.port_a = out | (self.port_a & !Self::OUT_FLAG);
    }
}

/// One port-address handle onto a shared 2102 SRAM IC.
///
/// The 2102 is an asynchronous 1024 x 1-bit static RAM, used by Videocart 10
/// (Maze) and 18 (Hangman). Data is normally written while the read/WRITE
/// pin is low, but the ports invert the signal, so this emulation writes
/// while it is high.
///
/// # Port bit assignments, as emulated
///
/// | Bits | Port A            |
/// |------|-------------------|
/// | 7    | OUT (data out)    |
/// | 3    | IN (data in)      |
/// | 2..1 | address bits 9..8 |
/// | 0    | R/W               |
///
/// Port B carries address bits 7..0, giving
/// `address = ((A & 0x06) << 7) | B`.
pub struct Sram2102 {
    port_index: u8,
    chip: Rc<RefCell<SramChip>>,
}

impl Sram2102 {
    /// `port_index` 0 is the control/data port (A), 1 the address port (B).
    pub fn new(port_index: u8, chip: Rc<RefCell<SramChip>>) -> Self {
        Self { port_index, chip }
    }
}

impl IoPort for Sram2102 {
    fn read(&mut self) -> u8 {
        let chip = self.chip.borrow();
        if self.port_index != 0 {
            chip.port_b
        } else {
            chip.port_a
        }
    }

    fn write(&mut self, data: u8, _memory: &mut AttributedMemory) {
        self.chip.borrow_mut().latch(self.port_index, data);
    }
}

/// A shared handle onto the board's entropy source.
pub type SharedEntropy = Rc<RefCell<dyn EntropySource>>;

/// An I/O port pseudo random number generator.
///
/// Reads run a fast multiply-with-carry generator; writes shift seed bytes
/// into the 64-bit state. The power-on seed comes from the hardware entropy
/// source through an FNV-1a randomness extractor.
pub struct Random {
    z: u32,
    w: u32,
    entropy: SharedEntropy,
}

impl Random {
    // Two distinct 16-bit constants for which both k*2^16-1 and k*2^15-1 are
    // prime (Marsaglia's MWC criteria).
    const Z_CONST: u32 = 30135;
    const W_CONST: u32 = 18513;

    pub fn new(entropy: SharedEntropy) -> Self {
        let (z, w) = {
            let mut source = entropy.borrow_mut();
            (Self::extract32(&mut *source), Self::extract32(&mut *source))
        };
        Self { z, w, entropy }
    }

    /// Condense 64 raw entropy bits into 32 via a FNV-1a hash.
    ///
    /// The raw bit stream is somewhat biased and periodic when sampled
    /// rapidly, so it is never used directly.
    fn extract32(source: &mut dyn EntropySource) -> u32 {
        let mut hash: u32 = 0x811c_9dc5; // FNV offset basis
        for _ in 0..8 {
            let mut byte: u8 = 0;
            for _ in 0..8 {
                byte = (byte << 1) | u8::from(source.random_bit());
            }
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193); // FNV prime
        }
        hash
    }

    /// Advance the multiply-with-carry state and produce the next 32 bits.
    fn next32(&mut self) -> u32 {
        self.z = Self::Z_CONST * (self.z & 0xFFFF) + (self.z >> 16);
        self.w = Self::W_CONST * (self.w & 0xFFFF) + (self.w >> 16);
        (self.z << 16) + (self.w & 0xFFFF)
    }
}

impl IoPort for Random {
    fn read(&mut self) -> u8 {
        let value = self.next32();
        // XOR-fold 32 bits into 8
        ((value >> 8) ^ value) as u8
    }

    /// Shift a seed byte into the 64-bit state from the low side.
    ///
    /// The state must never be all zero, so shifting in eight zeros forces a
    /// re-seed from the entropy source. Guests use this to switch between
    /// deterministic and non-deterministic sequences.
    fn write(&mut self, data: u8, _memory: &mut AttributedMemory) {
        self.z = (self.z << 8) | (self.w >> 24);
        self.w = (self.w << 8) | u32::from(data);

        if self.w == 0 {
            self.w = Self::extract32(&mut *self.entropy.borrow_mut());
        }
    }
}

// Must be a power of two
const STACK_SIZE: usize = 2048;

/// An I/O port full-descending hardware stack.
///
/// Writes push, reads pop. The pointer free-runs and is masked on use, so
/// the buffer is circular and overflow is silent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareStack {
    #[serde(with = "serde_arrays")]
    data: [u8; STACK_SIZE],
    pointer: u16,
}

impl HardwareStack {
    pub fn new() -> Self {
        Self {
            data: [0; STACK_SIZE],
            pointer: STACK_SIZE as u16 - 1,
        }
    }
}

impl Default for HardwareStack {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPort for HardwareStack {
    fn read(&mut self) -> u8 {
        let value = self.data[(self.pointer as usize) & (STACK_SIZE - 1)];
        self.pointer = self.pointer.wrapping_add(1);
        value
    }

    fn write(&mut self, data: u8, _memory: &mut AttributedMemory) {
        self.pointer = self.pointer.wrapping_sub(1);
        self.data[(self.pointer as usize) & (STACK_SIZE - 1)] = data;
    }
}

/// The menu/load control port.
///
/// A menu program running on the console talks to this port to walk the
/// directory snapshot and request a new image load.
///
/// # Commands (OUT 0xFF)
///
/// | Byte | Action      | Effect |
/// |------|-------------|--------|
/// | 0x01 | Next file   | advance the cursor, stage the new title |
/// | 0x02 | Select      | request a load if the entry is a file |
/// | 0x04 | Prev file   | retreat the cursor, stage the new title |
/// | 0x08 | None active | stage the current title on the first idle frame |
///
/// Commands act on *change* only: the controller is polled every frame, so a
/// held button repeats the same byte and must not repeat the action.
pub struct Launcher {
    files: Rc<DirectoryCache>,
    cursor: Rc<Cell<u16>>,
    load_request: Rc<Cell<Option<u16>>>,
    previous_command: u8,
}

impl Launcher {
    const NEXT_FLAG: u8 = 0x01;
    const SELECT_FLAG: u8 = 0x02;
    const PREV_FLAG: u8 = 0x04;
    const NONE_FLAG: u8 = 0x08;

    /// `cursor` and `load_request` are shared with the owner so the menu
    /// position survives reloads and the loader can pick up the request.
    pub fn new(
        files: Rc<DirectoryCache>,
        cursor: Rc<Cell<u16>>,
        load_request: Rc<Cell<Option<u16>>>,
    ) -> Self {
        Self {
            files,
            cursor,
            load_request,
            previous_command: 0,
        }
    }

    /// Stage a title into the menu's staging area in emulated RAM:
    /// 32 bytes, space-padded, then a NUL.
    fn stage_title(memory: &mut AttributedMemory, title: &[u8]) {
        let mut staged = [b' '; 33];
        let len = title.len().min(32);
        staged[..len].copy_from_slice(&title[..len]);
        staged[32] = 0;
        memory.blit(TITLE_STAGING_ADDR, &staged);
    }

    fn stage_current(&self, memory: &mut AttributedMemory) {
        if let Some(record) = self.files.get(self.cursor.get()) {
            Self::stage_title(memory, &record.title);
        }
    }
}

impl IoPort for Launcher {
    fn read(&mut self) -> u8 {
        0xFF
    }

    fn write(&mut self, command: u8, memory: &mut AttributedMemory) {
        if command != self.previous_command {
            if self.files.is_empty() {
                Self::stage_title(memory, b"No Data");
            } else {
                match command {
                    Self::NEXT_FLAG => {
                        let index = self.cursor.get();
                        if index != self.files.len() - 1 {
                            self.cursor.set(index + 1);
                        }
                        self.stage_current(memory);
                    }
                    Self::PREV_FLAG => {
                        let index = self.cursor.get();
                        if index != 0 {
                            self.cursor.set(index - 1);
                        }
                        self.stage_current(memory);
                    }
                    Self::SELECT_FLAG => {
                        let index = self.cursor.get();
                        if self.files.get(index).is_some_and(|record| record.is_file) {
                            log(LogCategory::Ports, LogLevel::Info, || {
                                format!("launcher: select entry {}", index)
                            });
                            self.load_request.set(Some(index));
                        }
                    }
                    Self::NONE_FLAG => {
                        if self.previous_command == 0 {
                            self.stage_current(memory);
                        }
                    }
                    _ => {}
                }
            }
        }
        self.previous_command = command;
    }
}
