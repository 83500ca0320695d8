//! Attributed memory: a 64 KiB byte plane plus a parallel chip-type plane.
//!
//! Every address carries two bytes of state: its content and the id of the
//! chip type that owns it. All guest-visible reads and writes dispatch
//! through the chip type, so a write to ROM is ignored, a write to RAM
//! sticks, and a write to an LED-tagged address toggles the debug LED
//! without touching the backing byte.
//!
//! `[0x0000, 0x0800)` belongs to the console's internal BIOS and is
//! permanently RESERVED; the loader-facing mutators in this module refuse to
//! tag or fill that range, which is what keeps the cartridge from ever
//! driving addresses it does not own.

use serde::{Deserialize, Serialize};

use crate::chips::{ChipId, ChipType};
use crate::hal::Led;

/// Size of the address space, in bytes.
pub const MEMORY_SIZE: usize = 0x10000;

/// First address the cartridge owns; everything below is console BIOS.
pub const VIDEOCART_START: u16 = 0x0800;

/// Value returned for reads the cartridge does not back.
pub const OPEN_BUS: u8 = 0xFF;

mod serde_plane {
    //! Serde support for the boxed 64 KiB planes (serde's built-in array
    //! support stops well short of this size).

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::MEMORY_SIZE;

    pub fn serialize<S>(plane: &[u8; MEMORY_SIZE], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        plane.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Box<[u8; MEMORY_SIZE]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .into_boxed_slice()
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {} bytes, got {}", MEMORY_SIZE, len)))
    }
}

/// The 64 KiB content plane plus its chip-type attribute plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedMemory {
    #[serde(with = "serde_plane")]
    rom: Box<[u8; MEMORY_SIZE]>,
    #[serde(with = "serde_plane")]
    attributes: Box<[u8; MEMORY_SIZE]>,
}

impl Default for AttributedMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn boxed_plane(fill: u8) -> Box<[u8; MEMORY_SIZE]> {
    vec![fill; MEMORY_SIZE]
        .into_boxed_slice()
        .try_into()
        .expect("plane length is MEMORY_SIZE")
}

impl AttributedMemory {
    /// All addresses RESERVED, all content open-bus.
    pub fn new() -> Self {
        Self {
            rom: boxed_plane(OPEN_BUS),
            attributes: boxed_plane(ChipType::RESERVED_ID),
        }
    }

    /// Return to the power-on state: everything RESERVED / open-bus.
    pub fn reset(&mut self) {
        self.rom.fill(OPEN_BUS);
        self.attributes.fill(ChipType::RESERVED_ID);
    }

    /// The chip type owning `address`.
    #[inline]
    pub fn attribute(&self, address: u16) -> ChipType {
        ChipType::from_id(self.attributes[address as usize])
    }

    /// The raw attribute id at `address` (may name an unregistered type).
    #[inline]
    pub fn attribute_id(&self, address: u16) -> ChipId {
        self.attributes[address as usize]
    }

    /// Guest-visible read, dispatched through the chip type.
    ///
    /// RESERVED and NVRAM reads never touch the content plane.
    #[inline]
    pub fn read(&self, address: u16) -> u8 {
        match self.attribute(address) {
            ChipType::Rom | ChipType::Ram | ChipType::Led => self.rom[address as usize],
            ChipType::Nvram | ChipType::Reserved => OPEN_BUS,
        }
    }

    /// Guest-visible write, dispatched through the chip type.
    ///
    /// Only RAM mutates the content plane. LED toggles the debug LED signal;
    /// ROM, NVRAM, and RESERVED ignore the write.
    #[inline]
    pub fn write(&mut self, address: u16, value: u8, led: &mut Led) {
        match self.attribute(address) {
            ChipType::Ram => self.rom[address as usize] = value,
            ChipType::Led => led.toggle(),
            ChipType::Rom | ChipType::Nvram | ChipType::Reserved => {}
        }
    }

    /// Clamp `[start, start + len)` to the cartridge-owned address range.
    ///
    /// Returns `(first, end)` as plane indices, with `first >= end` meaning
    /// the span is empty. The portion below [`VIDEOCART_START`] is dropped.
    fn cartridge_span(start: u16, len: usize) -> (usize, usize) {
        let first = (start as usize).max(VIDEOCART_START as usize);
        let end = (start as usize).saturating_add(len).min(MEMORY_SIZE);
        (first, end)
    }

    /// Tag `[start, start + len)` with a chip-type id.
    ///
    /// Addresses below [`VIDEOCART_START`] are skipped so the BIOS range
    /// stays RESERVED no matter what an image asks for.
    pub fn set_attributes(&mut self, start: u16, len: usize, id: ChipId) {
        let (first, end) = Self::cartridge_span(start, len);
        if first < end {
            self.attributes[first..end].fill(id);
        }
    }

    /// Fill `[start, start + len)` of the content plane with a byte.
    ///
    /// Raw access for the loader; the BIOS range is skipped.
    pub fn fill(&mut self, start: u16, len: usize, value: u8) {
        let (first, end) = Self::cartridge_span(start, len);
        if first < end {
            self.rom[first..end].fill(value);
        }
    }

    /// Copy `bytes` into the content plane at `start`.
    ///
    /// Raw access for the loader and the Launcher's title staging. Source
    /// bytes that would land below [`VIDEOCART_START`] or past the top of
    /// memory are dropped.
    pub fn blit(&mut self, start: u16, bytes: &[u8]) {
        let (first, end) = Self::cartridge_span(start, bytes.len());
        if first < end {
            let skip = first - start as usize;
            self.rom[first..end].copy_from_slice(&bytes[skip..skip + (end - first)]);
        }
    }
}
