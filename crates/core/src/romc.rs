//! ROMC dispatch: the external-bus microcode contract of the F8 CPU.
//!
//! Every bus cycle the console drives a 5-bit ROMC command naming what the
//! memory subsystem must do: place a byte on the data bus, absorb one into
//! a counter, address an I/O port. The original 3853 Static Memory Interface
//! implemented this contract for real RAM/ROM ICs; this module implements it
//! for the attributed memory and port table.
//!
//! The dispatcher maintains shadow copies of the CPU counters (PC0, PC1,
//! DC0, DC1) exactly as far as ROMC exposes them on the bus. It runs inside
//! one bus half-cycle, so nothing here allocates, blocks, or logs
//! unconditionally.

use serde::{Deserialize, Serialize};

use crate::chips::ChipType;
use crate::hal::BusLines;
use crate::logging::{log, LogCategory, LogLevel};
use crate::memory::VIDEOCART_START;
use crate::Videocart;

/// The IDLE command; also the power-on value of the `romc` latch.
pub const ROMC_IDLE: u8 = 0x1C;

/// Shadow registers mirroring what the CPU exposes on the external bus.
///
/// `pc0`/`pc1` are the program counters, `dc0`/`dc1` the data counters.
/// `dbus` and `romc` latch the last sampled bus values; `io_address` latches
/// the last addressed I/O port. Mutated exclusively by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRegisters {
    pub pc0: u16,
    pub pc1: u16,
    pub dc0: u16,
    pub dc1: u16,
    pub dbus: u8,
    pub romc: u8,
    pub io_address: u8,
}

impl Default for BusRegisters {
    fn default() -> Self {
        Self {
            pc0: 0,
            pc1: 0,
            dc0: 0,
            dc1: 0,
            dbus: 0,
            romc: ROMC_IDLE,
            io_address: 0,
        }
    }
}

/// Add a data-bus byte to a counter as a signed 8-bit offset, wrapping at
/// 16 bits.
#[inline]
fn signed_add(base: u16, offset: u8) -> u16 {
    base.wrapping_add(offset as i8 as u16)
}

impl Videocart {
    /// Place a byte on the data bus on behalf of `source`.
    ///
    /// The drive is elided when the source address is RESERVED: the console
    /// (or another device) owns that range and the cartridge must not fight
    /// it. A suppressed drive also leaves the `dbus` latch holding the
    /// sampled value.
    #[inline]
    fn drive_dbus<B: BusLines>(&mut self, lines: &mut B, value: u8, source: u16) {
        if self.memory.attribute(source) != ChipType::Reserved {
            self.regs.dbus = value;
            lines.drive_dbus(value);
        }
    }

    /// Execute the latched ROMC command for this bus cycle.
    pub fn execute_romc<B: BusLines>(&mut self, lines: &mut B) {
        match self.regs.romc {
            // Instruction fetch: drive the op code at PC0, all devices
            // increment PC0.
            0x00 => {
                let value = self.memory.read(self.regs.pc0);
                self.drive_dbus(lines, value, self.regs.pc0);
                self.regs.pc0 = self.regs.pc0.wrapping_add(1);
            }
            // Drive the byte at PC0, then add it to PC0 as a signed offset
            // (relative branch).
            0x01 => {
                let value = self.memory.read(self.regs.pc0);
                self.drive_dbus(lines, value, self.regs.pc0);
                self.regs.pc0 = signed_add(self.regs.pc0, self.regs.dbus);
            }
            // Drive the byte at DC0, increment DC0.
            0x02 => {
                let value = self.memory.read(self.regs.dc0);
                self.drive_dbus(lines, value, self.regs.dc0);
                self.regs.dc0 = self.regs.dc0.wrapping_add(1);
            }
            // Immediate operand fetch; the byte also names an I/O port.
            0x03 => {
                let value = self.memory.read(self.regs.pc0);
                self.regs.io_address = value;
                self.drive_dbus(lines, value, self.regs.pc0);
                self.regs.pc0 = self.regs.pc0.wrapping_add(1);
            }
            // Subroutine return: PC1 into PC0.
            0x04 => {
                self.regs.pc0 = self.regs.pc1;
            }
            // Store the data bus at DC0 (through the chip type), increment
            // DC0.
            0x05 => {
                let data = self.regs.dbus;
                let address = self.regs.dc0;
                let Videocart { memory, led, .. } = self;
                memory.write(address, data, led);
                self.regs.dc0 = self.regs.dc0.wrapping_add(1);
            }
            // High byte of DC0 onto the bus.
            0x06 => {
                let value = (self.regs.dc0 >> 8) as u8;
                self.drive_dbus(lines, value, self.regs.dc0);
            }
            // High byte of PC1 onto the bus.
            0x07 => {
                let value = (self.regs.pc1 >> 8) as u8;
                self.drive_dbus(lines, value, self.regs.pc1);
            }
            // Reset: PC0 into PC1, then both halves of PC0 from the data bus
            // (the CPU outputs zero here).
            0x08 => {
                self.regs.pc1 = self.regs.pc0;
                self.regs.pc0 = (u16::from(self.regs.dbus) << 8) | u16::from(self.regs.dbus);
            }
            // Low byte of DC0 onto the bus.
            0x09 => {
                let value = self.regs.dc0 as u8;
                self.drive_dbus(lines, value, self.regs.dc0);
            }
            // Add the data bus to DC0 as a signed offset.
            0x0A => {
                self.regs.dc0 = signed_add(self.regs.dc0, self.regs.dbus);
            }
            // Low byte of PC1 onto the bus.
            0x0B => {
                let value = self.regs.pc1 as u8;
                self.drive_dbus(lines, value, self.regs.pc1);
            }
            // Drive the byte at PC0, then move it into the low byte of PC0.
            0x0C => {
                let value = self.memory.read(self.regs.pc0);
                self.drive_dbus(lines, value, self.regs.pc0);
                self.regs.pc0 = (self.regs.pc0 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // PC1 takes PC0 + 1; PC0 unaltered.
            0x0D => {
                self.regs.pc1 = self.regs.pc0.wrapping_add(1);
            }
            // Drive the byte at PC0, then move it into the low byte of DC0.
            0x0E => {
                let value = self.memory.read(self.regs.pc0);
                self.drive_dbus(lines, value, self.regs.pc0);
                self.regs.dc0 = (self.regs.dc0 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // Interrupt vector, low half. The interrupting device's priority
            // chain is not modeled; only the register update happens.
            0x0F => {
                log(LogCategory::Stubs, LogLevel::Debug, || {
                    "romc 0x0F: interrupt priority chain not serviced".to_string()
                });
                self.regs.pc1 = self.regs.pc0;
                self.regs.pc0 = (self.regs.pc0 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // Long-cycle no-op while the CPU's priority chain settles.
            0x10 => {}
            // Drive the byte at PC0, then move it into the high byte of DC0.
            0x11 => {
                let value = self.memory.read(self.regs.pc0);
                self.drive_dbus(lines, value, self.regs.pc0);
                self.regs.dc0 = (self.regs.dc0 & 0x00FF) | (u16::from(self.regs.dbus) << 8);
            }
            // PC0 into PC1, then the data bus into the low byte of PC0.
            0x12 => {
                self.regs.pc1 = self.regs.pc0;
                self.regs.pc0 = (self.regs.pc0 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // Interrupt vector, high half; priority chain not modeled.
            0x13 => {
                log(LogCategory::Stubs, LogLevel::Debug, || {
                    "romc 0x13: interrupt priority chain not serviced".to_string()
                });
                self.regs.pc0 = (self.regs.pc0 & 0x00FF) | (u16::from(self.regs.dbus) << 8);
            }
            // Data bus into the high byte of PC0.
            0x14 => {
                self.regs.pc0 = (self.regs.pc0 & 0x00FF) | (u16::from(self.regs.dbus) << 8);
            }
            // Data bus into the high byte of PC1.
            0x15 => {
                self.regs.pc1 = (self.regs.pc1 & 0x00FF) | (u16::from(self.regs.dbus) << 8);
            }
            // Data bus into the high byte of DC0.
            0x16 => {
                self.regs.dc0 = (self.regs.dc0 & 0x00FF) | (u16::from(self.regs.dbus) << 8);
            }
            // Data bus into the low byte of PC0.
            0x17 => {
                self.regs.pc0 = (self.regs.pc0 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // Data bus into the low byte of PC1.
            0x18 => {
                self.regs.pc1 = (self.regs.pc1 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // Data bus into the low byte of DC0.
            0x19 => {
                self.regs.dc0 = (self.regs.dc0 & 0xFF00) | u16::from(self.regs.dbus);
            }
            // The port addressed during the prior cycle absorbs the data
            // bus. Empty slot: no-op.
            0x1A => {
                let address = self.regs.io_address;
                let data = self.regs.dbus;
                let Videocart { ports, memory, .. } = self;
                ports.write(address, data, memory);
            }
            // The port addressed during the prior cycle drives the data bus.
            // Empty slot: the bus is left alone.
            0x1B => {
                if let Some(value) = self.ports.read(self.regs.io_address) {
                    self.drive_dbus(lines, value, VIDEOCART_START);
                }
            }
            // IDLE. During OUTS/INS the data bus holds an I/O port address;
            // latch it for the 0x1A/0x1B cycle that follows.
            0x1C => {
                self.regs.io_address = self.regs.dbus;
            }
            // Devices with both data counters switch them.
            0x1D => {
                std::mem::swap(&mut self.regs.dc0, &mut self.regs.dc1);
            }
            // Low byte of PC0 onto the bus.
            0x1E => {
                let value = self.regs.pc0 as u8;
                self.drive_dbus(lines, value, self.regs.pc0);
            }
            // High byte of PC0 onto the bus.
            0x1F => {
                let value = (self.regs.pc0 >> 8) as u8;
                self.drive_dbus(lines, value, self.regs.pc0);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chips::ChipType;
    use crate::ports::HardwareStack;
    use crate::testing::{test_cart, RecordingLines};

    fn cart_with_rom(address: u16, bytes: &[u8]) -> Videocart {
        let mut cart = test_cart();
        cart.memory
            .set_attributes(address, bytes.len(), ChipType::ROM_ID);
        cart.memory.blit(address, bytes);
        cart
    }

    fn step(cart: &mut Videocart, romc: u8, dbus: u8) -> RecordingLines {
        let mut lines = RecordingLines::default();
        cart.regs.romc = romc;
        cart.regs.dbus = dbus;
        cart.execute_romc(&mut lines);
        lines
    }

    #[test]
    fn test_fetch_drives_and_increments() {
        let mut cart = cart_with_rom(0x0801, &[0x42]);
        cart.regs.pc0 = 0x0801;

        let lines = step(&mut cart, 0x00, 0x00);
        assert_eq!(lines.driven, vec![0x42]);
        assert_eq!(cart.regs.pc0, 0x0802);
        assert_eq!(cart.regs.dbus, 0x42);
    }

    #[test]
    fn test_fetch_from_reserved_is_not_driven() {
        let mut cart = test_cart();
        cart.regs.pc0 = 0x0100;

        let lines = step(&mut cart, 0x00, 0x00);
        assert!(lines.driven.is_empty());
        assert_eq!(cart.regs.pc0, 0x0101);
    }

    #[test]
    fn test_relative_branch_uses_driven_byte() {
        // ROM holds the displacement; once driven it feeds the add
        let mut cart = cart_with_rom(0x0900, &[0xFE]); // -2
        cart.regs.pc0 = 0x0900;

        step(&mut cart, 0x01, 0x00);
        assert_eq!(cart.regs.pc0, 0x08FE);
    }

    #[test]
    fn test_signed_add_wraps_around_zero() {
        assert_eq!(signed_add(0x0000, 0x80), 0xFF80);
        assert_eq!(signed_add(0xFFFF, 0x01), 0x0000);
        assert_eq!(signed_add(0x0800, 0x7F), 0x087F);
    }

    #[test]
    fn test_data_counter_fetch() {
        let mut cart = cart_with_rom(0x0A00, &[0x77]);
        cart.regs.dc0 = 0x0A00;

        let lines = step(&mut cart, 0x02, 0x00);
        assert_eq!(lines.driven, vec![0x77]);
        assert_eq!(cart.regs.dc0, 0x0A01);
    }

    #[test]
    fn test_operand_fetch_latches_io_address() {
        let mut cart = cart_with_rom(0x0810, &[0x25]);
        cart.regs.pc0 = 0x0810;

        step(&mut cart, 0x03, 0x00);
        assert_eq!(cart.regs.io_address, 0x25);
        assert_eq!(cart.regs.pc0, 0x0811);
    }

    #[test]
    fn test_return_copies_pc1() {
        let mut cart = test_cart();
        cart.regs.pc1 = 0x1234;

        step(&mut cart, 0x04, 0x00);
        assert_eq!(cart.regs.pc0, 0x1234);
    }

    #[test]
    fn test_store_goes_through_chip_dispatch() {
        let mut cart = test_cart();
        cart.memory.set_attributes(0x0900, 1, ChipType::ROM_ID);
        cart.memory.blit(0x0900, &[0x42]);
        cart.memory.set_attributes(0x2800, 1, ChipType::RAM_ID);
        cart.memory.set_attributes(0x3000, 1, ChipType::LED_ID);

        // ROM-tagged target: no mutation
        cart.regs.dc0 = 0x0900;
        step(&mut cart, 0x05, 0x99);
        assert_eq!(cart.memory.read(0x0900), 0x42);
        assert_eq!(cart.regs.dc0, 0x0901);

        // RAM-tagged target: sticks
        cart.regs.dc0 = 0x2800;
        step(&mut cart, 0x05, 0xAB);
        assert_eq!(cart.memory.read(0x2800), 0xAB);

        // LED-tagged target: toggles the signal
        cart.regs.dc0 = 0x3000;
        step(&mut cart, 0x05, 0x00);
        assert_eq!(cart.led.toggle_count(), 1);
    }

    #[test]
    fn test_counter_halves_on_the_bus() {
        let mut cart = test_cart();
        cart.memory.set_attributes(0x1234, 1, ChipType::RAM_ID);
        cart.memory.set_attributes(0x5678, 1, ChipType::RAM_ID);
        cart.regs.dc0 = 0x1234;
        cart.regs.pc1 = 0x5678;

        assert_eq!(step(&mut cart, 0x06, 0).driven, vec![0x12]);
        assert_eq!(step(&mut cart, 0x09, 0).driven, vec![0x34]);
        assert_eq!(step(&mut cart, 0x07, 0).driven, vec![0x56]);
        assert_eq!(step(&mut cart, 0x0B, 0).driven, vec![0x78]);
    }

    #[test]
    fn test_pc0_halves_on_the_bus() {
        let mut cart = test_cart();
        cart.memory.set_attributes(0x4321, 1, ChipType::RAM_ID);
        cart.regs.pc0 = 0x4321;

        assert_eq!(step(&mut cart, 0x1E, 0).driven, vec![0x21]);
        assert_eq!(step(&mut cart, 0x1F, 0).driven, vec![0x43]);
    }

    #[test]
    fn test_reset_clears_pc0_and_saves_it() {
        let mut cart = test_cart();
        cart.regs.pc0 = 0x0855;

        step(&mut cart, 0x08, 0x00);
        assert_eq!(cart.regs.pc1, 0x0855);
        assert_eq!(cart.regs.pc0, 0x0000);
    }

    #[test]
    fn test_byte_loads_into_counter_halves() {
        let mut cart = test_cart();
        cart.regs.pc0 = 0x1122;
        cart.regs.pc1 = 0x3344;
        cart.regs.dc0 = 0x5566;

        step(&mut cart, 0x14, 0xAA);
        assert_eq!(cart.regs.pc0, 0xAA22);
        step(&mut cart, 0x17, 0xBB);
        assert_eq!(cart.regs.pc0, 0xAABB);
        step(&mut cart, 0x15, 0xCC);
        assert_eq!(cart.regs.pc1, 0xCC44);
        step(&mut cart, 0x18, 0xDD);
        assert_eq!(cart.regs.pc1, 0xCCDD);
        step(&mut cart, 0x16, 0xEE);
        assert_eq!(cart.regs.dc0, 0xEE66);
        step(&mut cart, 0x19, 0xFF);
        assert_eq!(cart.regs.dc0, 0xEEFF);
    }

    #[test]
    fn test_interrupt_vector_halves() {
        let mut cart = test_cart();
        cart.regs.pc0 = 0x0820;

        step(&mut cart, 0x0F, 0x34);
        assert_eq!(cart.regs.pc1, 0x0820);
        assert_eq!(cart.regs.pc0, 0x0834);

        step(&mut cart, 0x13, 0x12);
        assert_eq!(cart.regs.pc0, 0x1234);
    }

    #[test]
    fn test_call_sequence_saves_return_address() {
        let mut cart = test_cart();
        cart.regs.pc0 = 0x0810;

        step(&mut cart, 0x0D, 0x00);
        assert_eq!(cart.regs.pc1, 0x0811);

        step(&mut cart, 0x12, 0x50);
        assert_eq!(cart.regs.pc1, 0x0810);
        assert_eq!(cart.regs.pc0, 0x0850);
    }

    #[test]
    fn test_data_counter_swap() {
        let mut cart = test_cart();
        cart.regs.dc0 = 0x1111;
        cart.regs.dc1 = 0x2222;

        step(&mut cart, 0x1D, 0x00);
        assert_eq!(cart.regs.dc0, 0x2222);
        assert_eq!(cart.regs.dc1, 0x1111);
    }

    #[test]
    fn test_idle_latches_port_then_port_read_drives() {
        let mut cart = test_cart();
        // Port-read drives are sourced from the cartridge base address, so
        // it must be tagged before the drive can go through.
        cart.memory.set_attributes(0x0800, 1, ChipType::ROM_ID);
        cart.ports.install(0x09, Box::new(HardwareStack::new()));

        // Push a byte through the port, then read it back over the bus
        step(&mut cart, 0x1C, 0x09);
        step(&mut cart, 0x1A, 0x5A);
        step(&mut cart, 0x1C, 0x09);
        let lines = step(&mut cart, 0x1B, 0x00);
        assert_eq!(lines.driven, vec![0x5A]);
    }

    #[test]
    fn test_port_ops_on_empty_slot_do_nothing() {
        let mut cart = test_cart();

        step(&mut cart, 0x1C, 0x42);
        step(&mut cart, 0x1A, 0x99);
        let lines = step(&mut cart, 0x1B, 0x00);
        assert!(lines.driven.is_empty());
    }

    #[test]
    fn test_memory_reference_loads_low_bytes() {
        let mut cart = cart_with_rom(0x0900, &[0x44]);
        cart.regs.pc0 = 0x0900;
        cart.regs.dc0 = 0x1200;

        step(&mut cart, 0x0E, 0x00);
        assert_eq!(cart.regs.dc0, 0x1244);

        cart.regs.pc0 = 0x0900;
        step(&mut cart, 0x0C, 0x00);
        assert_eq!(cart.regs.pc0, 0x0944);
    }

    #[test]
    fn test_memory_reference_loads_dc0_high() {
        let mut cart = cart_with_rom(0x0900, &[0x7C]);
        cart.regs.pc0 = 0x0900;
        cart.regs.dc0 = 0x0012;

        step(&mut cart, 0x11, 0x00);
        assert_eq!(cart.regs.dc0, 0x7C12);
    }

    #[test]
    fn test_suppressed_drive_keeps_sampled_dbus() {
        // A branch displacement fetched from an address the cartridge does
        // not own must fall back to whatever the sample latched.
        let mut cart = test_cart();
        cart.regs.pc0 = 0x0100; // reserved

        step(&mut cart, 0x01, 0x02);
        assert_eq!(cart.regs.pc0, 0x0102);
    }
}
