//! CHF hardware types: which ports a cartridge image brings along.
//!
//! A CHF header names the board the image was dumped from; the board decides
//! which I/O peripherals exist. Only two official boards carried anything
//! besides memory (the 2102 SRAM of Videocarts 10 and 18); the flashcart
//! profile adds this firmware's own devices on otherwise-unused ports.

use crate::Videocart;

/// The board profiles a CHF image can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareType {
    /// Plain ROM Videocart.
    Videocart,
    /// Videocart 10/18 board: 2102 SRAM on ports 0x20/0x21/0x24/0x25.
    Videocart1018,
    /// ROM + RAM board.
    RomRam,
    /// SABA Videoplay board.
    Saba,
    /// Multi-game cartridge.
    Multicart,
    /// This device: SRAM, RNG, hardware stacks, and the launcher port.
    Flashcart,
}

impl HardwareType {
    /// Look up a board profile by CHF header id. Unknown ids get no ports.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(HardwareType::Videocart),
            1 => Some(HardwareType::Videocart1018),
            2 => Some(HardwareType::RomRam),
            3 => Some(HardwareType::Saba),
            4 => Some(HardwareType::Multicart),
            5 => Some(HardwareType::Flashcart),
            _ => None,
        }
    }

    /// Install this board's peripherals into the cartridge's port table.
    pub fn install_ports(self, cart: &mut Videocart) {
        match self {
            HardwareType::Videocart
            | HardwareType::RomRam
            | HardwareType::Saba
            | HardwareType::Multicart => {}
            HardwareType::Videocart1018 => {
                cart.install_sram_ports();
            }
            HardwareType::Flashcart => {
                cart.install_sram_ports();
                cart.install_flashcart_ports();
                cart.install_launcher();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{DATA_STACK_PORT, LAUNCHER_PORT, RETURN_STACK_PORT, RNG_PORT};
    use crate::testing::test_cart;

    #[test]
    fn test_unknown_ids_have_no_profile() {
        assert_eq!(HardwareType::from_id(6), None);
        assert_eq!(HardwareType::from_id(0xFFFF), None);
    }

    #[test]
    fn test_videocart_10_18_brings_sram_only() {
        let mut cart = test_cart();
        HardwareType::Videocart1018.install_ports(&mut cart);

        for port in [0x20, 0x21, 0x24, 0x25] {
            assert!(cart.ports.is_installed(port));
        }
        assert!(!cart.ports.is_installed(LAUNCHER_PORT));
        assert!(!cart.ports.is_installed(RNG_PORT));
    }

    #[test]
    fn test_flashcart_brings_the_full_set() {
        let mut cart = test_cart();
        HardwareType::Flashcart.install_ports(&mut cart);

        for port in [
            0x20,
            0x21,
            0x24,
            0x25,
            RNG_PORT,
            DATA_STACK_PORT,
            RETURN_STACK_PORT,
            LAUNCHER_PORT,
        ] {
            assert!(cart.ports.is_installed(port), "port {:#04x}", port);
        }
    }

    #[test]
    fn test_plain_boards_bring_nothing() {
        let mut cart = test_cart();
        HardwareType::RomRam.install_ports(&mut cart);
        for port in 0..=255u8 {
            assert!(!cart.ports.is_installed(port));
        }
    }
}
