//! BCM283x / BCM2711 GPIO register block
//!
//! Offsets are in bytes from the start of the GPIO peripheral. Every access is
//! a volatile 32-bit load or store on the mapped page.

use std::io;
use std::ptr;

use memmap2::MmapMut;

/// Size of the mapping; the block itself ends well before one page
pub const GPIO_BLOCK_SIZE: usize = 4096;

pub const GPFSEL0: usize = 0x00;
pub const GPSET0: usize = 0x1C;
pub const GPCLR0: usize = 0x28;
pub const GPLEV0: usize = 0x34;
pub const GPEDS0: usize = 0x40;
pub const GPREN0: usize = 0x4C;
pub const GPFEN0: usize = 0x58;
pub const GPHEN0: usize = 0x64;
pub const GPLEN0: usize = 0x70;
pub const GPAREN0: usize = 0x7C;
pub const GPAFEN0: usize = 0x88;
pub const GPPUD: usize = 0x94;
pub const GPPUDCLK0: usize = 0x98;
/// BCM2711 only: two pull bits per pin, sixteen pins per register
pub const GPIO_PUP_PDN_CNTRL0: usize = 0xE4;

/// Edge/level detect enable registers, cleared when a pin is taken over
const DETECT_ENABLE: [usize; 6] = [GPREN0, GPFEN0, GPHEN0, GPLEN0, GPAREN0, GPAFEN0];

/// Cycles to hold the legacy pull control and clock lines
const PULL_SETUP_CYCLES: u32 = 150;

/// 3-bit function-select code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFunction {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl PinFunction {
    pub fn bits(self) -> u32 {
        match self {
            Self::Input => 0b000,
            Self::Output => 0b001,
            Self::Alt0 => 0b100,
            Self::Alt1 => 0b101,
            Self::Alt2 => 0b110,
            Self::Alt3 => 0b111,
            Self::Alt4 => 0b011,
            Self::Alt5 => 0b010,
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b111 {
            0b000 => Self::Input,
            0b001 => Self::Output,
            0b100 => Self::Alt0,
            0b101 => Self::Alt1,
            0b110 => Self::Alt2,
            0b111 => Self::Alt3,
            0b011 => Self::Alt4,
            _ => Self::Alt5,
        }
    }
}

/// Pull resistor setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

impl Pull {
    /// Code for the legacy `GPPUD` register
    fn legacy_code(self) -> u32 {
        match self {
            Pull::Off => 0,
            Pull::Down => 1,
            Pull::Up => 2,
        }
    }

    /// Code for `GPIO_PUP_PDN_CNTRL`
    fn bcm2711_code(self) -> u32 {
        match self {
            Pull::Off => 0,
            Pull::Up => 1,
            Pull::Down => 2,
        }
    }
}

/// Register and bit of a one-bit-per-pin bank
fn bank(base: usize, pin: u32) -> (usize, u32) {
    (base + (pin as usize / 32) * 4, 1 << (pin % 32))
}

/// Mapped GPIO register page
pub struct RegisterView {
    map: MmapMut,
}

impl RegisterView {
    pub fn new(map: MmapMut) -> io::Result<Self> {
        if map.len() < GPIO_BLOCK_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("GPIO mapping is {} bytes, need {}", map.len(), GPIO_BLOCK_SIZE),
            ));
        }
        Ok(Self { map })
    }

    /// Anonymous page standing in for the hardware
    #[cfg(test)]
    pub fn anonymous() -> io::Result<Self> {
        Self::new(MmapMut::map_anon(GPIO_BLOCK_SIZE)?)
    }

    pub fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.map.len());
        unsafe { ptr::read_volatile(self.map.as_ptr().add(offset) as *const u32) }
    }

    pub fn write(&mut self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.map.len());
        unsafe { ptr::write_volatile(self.map.as_mut_ptr().add(offset) as *mut u32, value) }
    }

    pub fn function(&self, pin: u32) -> PinFunction {
        let offset = GPFSEL0 + (pin as usize / 10) * 4;
        let shift = (pin % 10) * 3;
        PinFunction::from_bits(self.read(offset) >> shift)
    }

    pub fn set_function(&mut self, pin: u32, function: PinFunction) {
        let offset = GPFSEL0 + (pin as usize / 10) * 4;
        let shift = (pin % 10) * 3;
        let value = (self.read(offset) & !(0b111 << shift)) | (function.bits() << shift);
        self.write(offset, value);
    }

    /// Set or clear through the write-only set/clear banks
    pub fn set_level(&mut self, pin: u32, high: bool) {
        let (offset, bit) = bank(if high { GPSET0 } else { GPCLR0 }, pin);
        self.write(offset, bit);
    }

    pub fn level(&self, pin: u32) -> bool {
        let (offset, bit) = bank(GPLEV0, pin);
        self.read(offset) & bit != 0
    }

    /// Disable every detect source for the pin and acknowledge a pending event
    pub fn clear_detection(&mut self, pin: u32) {
        for base in DETECT_ENABLE {
            let (offset, bit) = bank(base, pin);
            let value = self.read(offset) & !bit;
            self.write(offset, value);
        }
        let (offset, bit) = bank(GPEDS0, pin);
        self.write(offset, bit);
    }

    /// BCM2835-7 pull sequence: latch the control value into the pin with
    /// the pull clock, then release both.
    pub fn set_pull_legacy(&mut self, pin: u32, pull: Pull) {
        let (clock, bit) = bank(GPPUDCLK0, pin);
        self.write(GPPUD, pull.legacy_code());
        spin(PULL_SETUP_CYCLES);
        self.write(clock, bit);
        spin(PULL_SETUP_CYCLES);
        self.write(GPPUD, 0);
        self.write(clock, 0);
    }

    pub fn set_pull_bcm2711(&mut self, pin: u32, pull: Pull) {
        let offset = GPIO_PUP_PDN_CNTRL0 + (pin as usize >> 4) * 4;
        let shift = (pin & 0xf) << 1;
        let value = (self.read(offset) & !(0b11 << shift)) | (pull.bcm2711_code() << shift);
        self.write(offset, value);
    }

    pub fn pull_bcm2711(&self, pin: u32) -> Pull {
        let offset = GPIO_PUP_PDN_CNTRL0 + (pin as usize >> 4) * 4;
        let shift = (pin & 0xf) << 1;
        match (self.read(offset) >> shift) & 0b11 {
            1 => Pull::Up,
            2 => Pull::Down,
            _ => Pull::Off,
        }
    }
}

fn spin(cycles: u32) {
    for _ in 0..cycles {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_select_bits() {
        let mut regs = RegisterView::anonymous().unwrap();
        regs.write(GPFSEL0 + 4, 0xFFFF_FFFF);

        regs.set_function(17, PinFunction::Output);
        assert_eq!(regs.function(17), PinFunction::Output);
        assert_eq!((regs.read(GPFSEL0 + 4) >> 21) & 0b111, 0b001);
        // Neighbours in the same register keep their function.
        assert_eq!(regs.function(16), PinFunction::Alt3);
        assert_eq!(regs.function(18), PinFunction::Alt3);

        regs.set_function(17, PinFunction::Input);
        assert_eq!(regs.function(17), PinFunction::Input);
    }

    #[test]
    fn test_alt_function_codes_roundtrip() {
        for function in [
            PinFunction::Alt0,
            PinFunction::Alt1,
            PinFunction::Alt2,
            PinFunction::Alt3,
            PinFunction::Alt4,
            PinFunction::Alt5,
        ] {
            assert_eq!(PinFunction::from_bits(function.bits()), function);
        }
    }

    #[test]
    fn test_set_and_clear_target_their_banks() {
        let mut regs = RegisterView::anonymous().unwrap();
        regs.set_level(4, true);
        assert_eq!(regs.read(GPSET0), 1 << 4);
        regs.set_level(27, false);
        assert_eq!(regs.read(GPCLR0), 1 << 27);
        regs.set_level(33, true);
        assert_eq!(regs.read(GPSET0 + 4), 1 << 1);
    }

    #[test]
    fn test_level_reads_lev_bank() {
        let mut regs = RegisterView::anonymous().unwrap();
        regs.write(GPLEV0, 1 << 22);
        assert!(regs.level(22));
        assert!(!regs.level(23));
    }

    #[test]
    fn test_clear_detection() {
        let mut regs = RegisterView::anonymous().unwrap();
        regs.write(GPREN0, 0b1100);
        regs.write(GPAFEN0, 0b0100);
        regs.clear_detection(2);
        assert_eq!(regs.read(GPREN0), 0b1000);
        assert_eq!(regs.read(GPAFEN0), 0);
        assert_eq!(regs.read(GPEDS0), 0b0100);
    }

    #[test]
    fn test_legacy_pull_sequence_releases_lines() {
        let mut regs = RegisterView::anonymous().unwrap();
        regs.set_pull_legacy(5, Pull::Up);
        assert_eq!(regs.read(GPPUD), 0);
        assert_eq!(regs.read(GPPUDCLK0), 0);
    }

    #[test]
    fn test_bcm2711_pull_fields() {
        let mut regs = RegisterView::anonymous().unwrap();
        regs.set_pull_bcm2711(17, Pull::Up);
        regs.set_pull_bcm2711(18, Pull::Down);
        assert_eq!(regs.read(GPIO_PUP_PDN_CNTRL0 + 4), 0b10_01 << 2);
        assert_eq!(regs.pull_bcm2711(17), Pull::Up);
        assert_eq!(regs.pull_bcm2711(18), Pull::Down);

        regs.set_pull_bcm2711(17, Pull::Off);
        assert_eq!(regs.pull_bcm2711(17), Pull::Off);
        assert_eq!(regs.pull_bcm2711(18), Pull::Down);
    }

    #[test]
    fn test_short_mapping_rejected() {
        let map = MmapMut::map_anon(64).unwrap();
        assert!(RegisterView::new(map).is_err());
    }
}
