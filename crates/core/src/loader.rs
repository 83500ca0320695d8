//! Image loading: .bin and .chf files into the attributed memory.
//!
//! BIN files are raw chunks of ROM loaded under a fixed default hardware
//! profile. CHF files are a container designed for Channel F preservation: a
//! file header (title, board type) followed by CHIP packets, each tagging an
//! address range with a chip type and optionally carrying its contents.
//!
//! Headers are little-endian on disk and parsed field by field; nothing here
//! relies on in-memory struct layout.
//!
//! A load replaces the whole cartridge: peripherals are dropped first, then
//! memory is cleared, then populated, then the image's peripherals are
//! installed. A bad image leaves memory cleared (all RESERVED / open-bus)
//! and reports through the blink channel; the bus keeps getting serviced
//! either way.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::chips::ChipType;
use crate::error::{blink_code, BlinkCode};
use crate::hal::Delay;
use crate::hardware::HardwareType;
use crate::logging::{log, LogCategory, LogLevel};
use crate::ports::{
    HardwareStack, Launcher, Random, Sram2102, SramChip, DATA_STACK_PORT, LAUNCHER_PORT,
    RETURN_STACK_PORT, RNG_PORT, SRAM_START_ADDR,
};
use crate::Videocart;

/// First byte of a raw BIN image.
pub const BIN_MAGIC: u8 = 0x55;

/// Magic of a CHF container (16 bytes, ASCII plus space padding).
pub const CHF_MAGIC: &[u8; 16] = b"CHANNEL F       ";

/// Largest BIN payload: the span from the load base to the top of memory.
const BIN_CAPACITY: usize = 0xF7FF;

/// Where BIN payloads land.
const BIN_LOAD_ADDR: u16 = 0x0801;

/// Size of the default RAM window tagged for BIN images.
const BIN_RAM_SIZE: usize = 0x800;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image too short: {0} bytes")]
    TooShort(usize),
    #[error("bad container magic")]
    BadMagic,
    #[error("file header extends past the end of the image")]
    TruncatedHeader,
    #[error("CHIP packet at {offset:#x} extends past the end of the image")]
    TruncatedPacket { offset: usize },
}

/// Whether `data` looks like a CHF container.
pub fn is_chf_image(data: &[u8]) -> bool {
    data.len() >= 64 && data[..16] == CHF_MAGIC[..]
}

/// The parsed CHF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChfHeader {
    /// Absolute offset of the first CHIP packet.
    pub header_length: u32,
    pub minor_version: u8,
    pub major_version: u8,
    /// Board profile id; see [`HardwareType`].
    pub hardware_type: u16,
    /// Program title, UTF-8.
    pub title: String,
}

impl ChfHeader {
    /// Parse the fixed header plus the variable-length title.
    pub fn parse(data: &[u8]) -> Result<Self, ImageError> {
        if data.len() < 64 {
            return Err(ImageError::TooShort(data.len()));
        }
        if data[..16] != CHF_MAGIC[..] {
            return Err(ImageError::BadMagic);
        }

        let header_length = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let minor_version = data[20];
        let major_version = data[21];
        let hardware_type = u16::from_le_bytes([data[22], data[23]]);
        // bytes 24..32 are reserved

        let title_length = data[32] as usize;
        let title_bytes = data
            .get(33..33 + title_length)
            .ok_or(ImageError::TruncatedHeader)?;
        let title_bytes = match title_bytes.iter().position(|&byte| byte == 0) {
            Some(nul) => &title_bytes[..nul],
            None => title_bytes,
        };

        Ok(Self {
            header_length,
            minor_version,
            major_version,
            hardware_type,
            title: String::from_utf8_lossy(title_bytes).into_owned(),
        })
    }
}

/// One CHIP packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChipPacket {
    /// Total packet bytes, header and payload included.
    packet_length: u32,
    chip_type: u16,
    /// Reserved for bank switching; parsed and ignored.
    bank_number: u16,
    load_address: u16,
    size: u16,
}

impl ChipPacket {
    const HEADER_LEN: usize = 16;

    /// Parse the packet header at `offset`, if one is there.
    ///
    /// `None` ends the packet stream: fewer than 16 bytes remain or the
    /// magic is absent.
    fn parse(data: &[u8], offset: usize) -> Option<Self> {
        let header = data.get(offset..offset + Self::HEADER_LEN)?;
        if &header[0..4] != b"CHIP" {
            return None;
        }
        Some(Self {
            packet_length: u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
            chip_type: u16::from_le_bytes([header[8], header[9]]),
            bank_number: u16::from_le_bytes([header[10], header[11]]),
            load_address: u16::from_le_bytes([header[12], header[13]]),
            size: u16::from_le_bytes([header[14], header[15]]),
        })
    }
}

impl Videocart {
    /// Replace the loaded cartridge with `image`.
    ///
    /// `None` or an unrecognized image blinks `NoValidFiles` and leaves the
    /// memory cleared.
    pub fn load_game(&mut self, image: Option<&[u8]>, delay: &mut impl Delay) {
        self.ports.clear();
        self.memory.reset();

        let Some(data) = image else {
            log(LogCategory::Loader, LogLevel::Error, || {
                "no image to load".to_string()
            });
            blink_code(&mut self.led, delay, BlinkCode::NoValidFiles);
            return;
        };

        match data.first() {
            Some(&BIN_MAGIC) => self.load_bin(data),
            Some(&b'C') if is_chf_image(data) => {
                if let Err(error) = self.load_chf(data) {
                    log(LogCategory::Loader, LogLevel::Error, || {
                        format!("chf load failed: {}", error)
                    });
                    // Leave nothing half-populated behind
                    self.ports.clear();
                    self.memory.reset();
                    blink_code(&mut self.led, delay, BlinkCode::NoValidFiles);
                }
            }
            _ => {
                log(LogCategory::Loader, LogLevel::Error, || {
                    format!("unrecognized image, {} bytes", data.len())
                });
                blink_code(&mut self.led, delay, BlinkCode::NoValidFiles);
            }
        }
    }

    /// Load a raw BIN image under the default flashcart hardware profile:
    /// ROM from the load base, 2K of RAM at the menu window, 2102 SRAM and
    /// the launcher on their usual ports.
    fn load_bin(&mut self, data: &[u8]) {
        let length = data.len().min(BIN_CAPACITY);

        self.memory
            .set_attributes(BIN_LOAD_ADDR, length, ChipType::ROM_ID);
        self.memory.fill(SRAM_START_ADDR, BIN_RAM_SIZE, 0);
        self.memory
            .set_attributes(SRAM_START_ADDR, BIN_RAM_SIZE, ChipType::RAM_ID);
        self.memory.blit(BIN_LOAD_ADDR, &data[..length]);

        self.install_sram_ports();
        self.install_launcher();

        log(LogCategory::Loader, LogLevel::Info, || {
            format!("bin image loaded, {} bytes", length)
        });
    }

    /// Load a CHF container: walk its CHIP packets into the attributed
    /// memory, then install the board profile its header names.
    fn load_chf(&mut self, data: &[u8]) -> Result<(), ImageError> {
        let header = ChfHeader::parse(data)?;

        let mut offset = header.header_length as usize;
        let mut packets = 0u32;
        while let Some(packet) = ChipPacket::parse(data, offset) {
            log(LogCategory::Loader, LogLevel::Trace, || {
                format!(
                    "chip packet at {:#x}: type {} bank {} load {:#06x} size {:#06x}",
                    offset, packet.chip_type, packet.bank_number, packet.load_address, packet.size
                )
            });
            let chip = ChipType::from_packet_id(packet.chip_type);
            self.memory.set_attributes(
                packet.load_address,
                packet.size as usize,
                packet.chip_type as u8,
            );

            if chip.has_backing_data() {
                let payload = data
                    .get(offset + ChipPacket::HEADER_LEN
                        ..offset + ChipPacket::HEADER_LEN + packet.size as usize)
                    .ok_or(ImageError::TruncatedPacket { offset })?;
                self.memory.blit(packet.load_address, payload);
                // Skip any padding; a malformed length must not stall the walk
                offset += (packet.packet_length as usize).max(ChipPacket::HEADER_LEN);
            } else {
                offset += ChipPacket::HEADER_LEN;
            }
            packets += 1;
        }

        if let Some(hardware) = HardwareType::from_id(header.hardware_type) {
            hardware.install_ports(self);
        }

        log(LogCategory::Loader, LogLevel::Info, || {
            format!(
                "chf image loaded: \"{}\" v{}.{}, {} packets, hardware {}",
                header.title, header.major_version, header.minor_version, packets,
                header.hardware_type
            )
        });
        Ok(())
    }

    /// 2102 SRAM on its four customary ports. One chip, two port indices,
    /// both mirrors.
    pub(crate) fn install_sram_ports(&mut self) {
        let chip = Rc::new(RefCell::new(SramChip::default()));
        self.ports
            .install(0x20, Box::new(Sram2102::new(0, chip.clone())));
        self.ports
            .install(0x21, Box::new(Sram2102::new(1, chip.clone())));
        self.ports
            .install(0x24, Box::new(Sram2102::new(0, chip.clone())));
        self.ports.install(0x25, Box::new(Sram2102::new(1, chip)));
    }

    /// The menu/load control port.
    pub(crate) fn install_launcher(&mut self) {
        self.ports.install(
            LAUNCHER_PORT,
            Box::new(Launcher::new(
                self.files.clone(),
                self.cursor.clone(),
                self.load_request.clone(),
            )),
        );
    }

    /// Flashcart extras: RNG plus the data and return stacks.
    pub(crate) fn install_flashcart_ports(&mut self) {
        self.ports
            .install(RNG_PORT, Box::new(Random::new(self.entropy.clone())));
        self.ports
            .install(DATA_STACK_PORT, Box::new(HardwareStack::new()));
        self.ports
            .install(RETURN_STACK_PORT, Box::new(HardwareStack::new()));
    }
}
