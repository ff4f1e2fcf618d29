//! Memory-mapped Raspberry Pi GPIO driver
//!
//! Maps the BCM283x/BCM2711 GPIO register page into the process and drives
//! pins with plain register writes. Needs `/dev/gpiomem` (any member of the
//! `gpio` group) or `/dev/mem` (root). Edge events are not taken from the
//! registers: the first armed pin lazily opens a character-device (or sysfs)
//! driver that owns interrupt delivery.

mod registers;

pub use registers::{PinFunction, Pull, RegisterView};

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;

use memmap2::MmapOptions;

use devio_core::driver::{DriverConfig, DriverStatus};
use devio_core::error::{GpioError, GpioResult};
use devio_core::events::EventSink;
use devio_core::pin::{PinEventTypes, PinMode, PinValue};

use crate::board;

use super::GpioDriver;
#[cfg(feature = "cdev")]
use super::CharacterDeviceDriver;
#[cfg(feature = "sysfs")]
use super::SysfsDriver;

use registers::GPIO_BLOCK_SIZE;

const GPIOMEM_PATH: &str = "/dev/gpiomem";
const DEVMEM_PATH: &str = "/dev/mem";
const MODEL_PATH: &str = "/proc/device-tree/model";
const SOC_RANGES_PATH: &str = "/proc/device-tree/soc/ranges";

/// Bus address of the peripherals as seen by the VideoCore
const VC_PERIPHERAL_BASE: u32 = 0x7E00_0000;
/// ARM physical peripheral bases: BCM2835, BCM2836/7, BCM2711
const KNOWN_PERIPHERAL_BASES: [u64; 3] = [0x2000_0000, 0x3F00_0000, 0xFE00_0000];
const GPIO_OFFSET: u64 = 0x20_0000;

/// Memory-mapped Raspberry Pi GPIO driver
pub struct MemoryMappedDriver {
    registers: Option<RegisterView>,
    bcm2711: bool,
    pins: HashMap<u32, PinMode>,
    armed: HashSet<u32>,
    interrupt_config: DriverConfig,
    interrupts: Option<Box<GpioDriver>>,
    status: DriverStatus,
}

impl MemoryMappedDriver {
    pub fn new(config: &DriverConfig) -> GpioResult<Self> {
        let model = supported_model().ok_or_else(|| {
            GpioError::platform(
                "The memory-mapped driver needs a Raspberry Pi with a BCM2835/6/7 or BCM2711 SoC",
            )
        })?;
        let bcm2711 = is_bcm2711(&model);
        let registers = map_registers()?;
        log::info!("Memory-mapped GPIO driver created for {}", model);

        Ok(Self::from_parts(registers, bcm2711, config.clone()))
    }

    fn from_parts(registers: RegisterView, bcm2711: bool, interrupt_config: DriverConfig) -> Self {
        Self {
            registers: Some(registers),
            bcm2711,
            pins: HashMap::new(),
            armed: HashSet::new(),
            interrupt_config,
            interrupts: None,
            status: DriverStatus::Ready,
        }
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    pub fn pin_count(&self) -> u32 {
        board::RASPBERRY_PI_PIN_COUNT
    }

    pub fn convert_to_logical(&self, board_pin: u32) -> GpioResult<u32> {
        board::raspberry_pi_board_to_logical(board_pin)
    }

    pub fn is_pin_mode_supported(&self, pin: u32, _mode: PinMode) -> bool {
        pin < self.pin_count()
    }

    fn registers(&self) -> GpioResult<&RegisterView> {
        self.registers.as_ref().ok_or(GpioError::Disposed)
    }

    fn registers_mut(&mut self) -> GpioResult<&mut RegisterView> {
        self.registers.as_mut().ok_or(GpioError::Disposed)
    }

    fn check_pin(&self, pin: u32) -> GpioResult<()> {
        if pin < self.pin_count() {
            Ok(())
        } else {
            Err(GpioError::invalid_argument(format!(
                "Pin {} is not a user GPIO (0..{})",
                pin,
                self.pin_count()
            )))
        }
    }

    pub fn open_pin(
        &mut self,
        pin: u32,
        mode: PinMode,
        initial: Option<PinValue>,
    ) -> GpioResult<()> {
        self.check_pin(pin)?;
        if self.pins.contains_key(&pin) {
            return Err(GpioError::PinAlreadyOpen(pin));
        }

        let regs = self.registers_mut()?;
        regs.clear_detection(pin);
        if let (PinMode::Output, Some(value)) = (mode, initial) {
            regs.set_level(pin, value.is_high());
        }
        self.apply_mode(pin, mode)?;
        self.pins.insert(pin, mode);
        log::debug!("Register pin {} opened as {}", pin, mode);
        Ok(())
    }

    fn apply_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        let bcm2711 = self.bcm2711;
        let regs = self.registers_mut()?;
        let pull = match mode {
            PinMode::Output => {
                regs.set_function(pin, PinFunction::Output);
                return Ok(());
            }
            PinMode::Input => Pull::Off,
            PinMode::InputPullUp => Pull::Up,
            PinMode::InputPullDown => Pull::Down,
        };

        regs.set_function(pin, PinFunction::Input);
        if bcm2711 {
            regs.set_pull_bcm2711(pin, pull);
        } else {
            regs.set_pull_legacy(pin, pull);
        }
        Ok(())
    }

    /// Release a pin back to a plain input; closing a closed pin does nothing
    pub fn close_pin(&mut self, pin: u32) -> GpioResult<()> {
        if !self.pins.contains_key(&pin) {
            return Ok(());
        }

        let mut result = Ok(());
        if self.armed.contains(&pin) {
            result = self.disarm(pin);
        }
        self.pins.remove(&pin);
        if let Some(regs) = self.registers.as_mut() {
            regs.set_function(pin, PinFunction::Input);
        }
        log::debug!("Register pin {} closed", pin);
        result
    }

    pub fn set_pin_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        let current = self.get_pin_mode(pin)?;
        if self.armed.contains(&pin) && !mode.is_input() {
            return Err(GpioError::invalid_operation(format!(
                "Pin {} is armed for edge events and must stay an input",
                pin
            )));
        }
        if current != mode {
            self.apply_mode(pin, mode)?;
            self.pins.insert(pin, mode);
        }
        Ok(())
    }

    pub fn get_pin_mode(&self, pin: u32) -> GpioResult<PinMode> {
        self.pins
            .get(&pin)
            .copied()
            .ok_or(GpioError::PinNotOpened(pin))
    }

    /// Current function-select setting, including alternate functions
    pub fn pin_function(&self, pin: u32) -> GpioResult<PinFunction> {
        self.check_pin(pin)?;
        Ok(self.registers()?.function(pin))
    }

    pub fn read(&self, pin: u32) -> GpioResult<PinValue> {
        if !self.pins.contains_key(&pin) {
            return Err(GpioError::PinNotOpened(pin));
        }
        Ok(PinValue::from(self.registers()?.level(pin)))
    }

    pub fn write(&mut self, pin: u32, value: PinValue) -> GpioResult<()> {
        match self.pins.get(&pin) {
            Some(PinMode::Output) => {}
            Some(mode) => {
                return Err(GpioError::invalid_operation(format!(
                    "Pin {} is opened as {} and cannot be written",
                    pin, mode
                )))
            }
            None => return Err(GpioError::PinNotOpened(pin)),
        }
        self.registers_mut()?.set_level(pin, value.is_high());
        Ok(())
    }

    pub fn set_pin_events_to_detect(
        &mut self,
        pin: u32,
        edges: PinEventTypes,
        sink: &EventSink,
    ) -> GpioResult<()> {
        self.registers()?;
        let mode = self.get_pin_mode(pin)?;

        if edges.is_none() {
            if self.armed.contains(&pin) {
                self.disarm(pin)?;
            }
            return Ok(());
        }
        if !mode.is_input() {
            return Err(GpioError::InvalidPinMode { pin, mode });
        }

        let interrupts = match &mut self.interrupts {
            Some(driver) => driver,
            empty => empty.insert(Box::new(interrupt_driver(&self.interrupt_config)?)),
        };

        if !self.armed.contains(&pin) {
            interrupts.open_pin(pin, PinMode::Input, None)?;
        }
        if let Err(e) = interrupts.set_pin_events_to_detect(pin, edges, sink) {
            if !self.armed.contains(&pin) {
                let _ = interrupts.close_pin(pin);
            }
            return Err(e);
        }

        self.armed.insert(pin);
        self.status = DriverStatus::Running;
        log::debug!(
            "Register pin {} armed for {} edges via {}",
            pin,
            edges,
            interrupts.kind()
        );
        Ok(())
    }

    fn disarm(&mut self, pin: u32) -> GpioResult<()> {
        self.armed.remove(&pin);
        let Some(interrupts) = self.interrupts.as_mut() else {
            return Ok(());
        };
        // Closing the line also tears down its event request.
        interrupts.close_pin(pin)
    }

    /// Close every pin, dispose the interrupt driver and unmap the registers
    pub fn dispose(&mut self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Ok(());
        }

        let mut result = Ok(());
        let pins: Vec<u32> = self.pins.keys().copied().collect();
        for pin in pins {
            if let Err(e) = self.close_pin(pin) {
                log::warn!("Failed to release register pin {}: {}", pin, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if let Some(mut interrupts) = self.interrupts.take() {
            if let Err(e) = interrupts.dispose() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.registers = None;

        self.status = DriverStatus::Shutdown;
        log::info!("Memory-mapped GPIO driver disposed");
        result
    }
}

impl Drop for MemoryMappedDriver {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("Memory-mapped GPIO driver teardown failed: {}", e);
        }
    }
}

/// Driver that delivers edge events for register-driven pins
fn interrupt_driver(config: &DriverConfig) -> GpioResult<GpioDriver> {
    #[cfg(feature = "cdev")]
    {
        match CharacterDeviceDriver::new(config) {
            Ok(driver) => return Ok(GpioDriver::CharacterDevice(driver)),
            Err(e) => log::debug!("Character device unavailable for edge events: {}", e),
        }
    }
    #[cfg(feature = "sysfs")]
    {
        if SysfsDriver::is_available() {
            return SysfsDriver::new(config).map(GpioDriver::Sysfs);
        }
    }
    let _ = config;
    Err(GpioError::platform(
        "Edge events need the character device or sysfs GPIO interface",
    ))
}

/// Board model when it is a Raspberry Pi this driver can map
pub fn supported_model() -> Option<String> {
    let raw = fs::read_to_string(MODEL_PATH).ok()?;
    let model = raw.trim_end_matches('\0').trim().to_string();
    is_supported_model(&model).then_some(model)
}

fn is_supported_model(model: &str) -> bool {
    // The Pi 5 moved its GPIO to the RP1 southbridge with a different layout.
    model.contains("Raspberry Pi") && !model.contains("Raspberry Pi 5")
}

fn is_bcm2711(model: &str) -> bool {
    model.contains("Raspberry Pi 4") || model.contains("Compute Module 4")
}

fn map_registers() -> GpioResult<RegisterView> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(GPIOMEM_PATH)
    {
        Ok(file) => return map_file(&file, 0, GPIOMEM_PATH),
        Err(e) => log::debug!("{} unavailable ({}), trying {}", GPIOMEM_PATH, e, DEVMEM_PATH),
    }

    let base = peripheral_base()?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(DEVMEM_PATH)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                GpioError::platform(format!("Neither {} nor {} exists", GPIOMEM_PATH, DEVMEM_PATH))
            }
            _ => GpioError::native(format!("open {}", DEVMEM_PATH), e),
        })?;
    map_file(&file, base + GPIO_OFFSET, DEVMEM_PATH)
}

fn map_file(file: &fs::File, offset: u64, path: &str) -> GpioResult<RegisterView> {
    let map = unsafe {
        MmapOptions::new()
            .offset(offset)
            .len(GPIO_BLOCK_SIZE)
            .map_mut(file)
    }
    .map_err(|e| GpioError::native(format!("mmap {} at {:#x}", path, offset), e))?;
    RegisterView::new(map).map_err(|e| GpioError::native(format!("mmap {}", path), e))
}

fn peripheral_base() -> GpioResult<u64> {
    let ranges = fs::read(SOC_RANGES_PATH)
        .map_err(|e| GpioError::platform(format!("Cannot read {}: {}", SOC_RANGES_PATH, e)))?;
    parse_soc_ranges(&ranges).ok_or_else(|| {
        GpioError::platform(format!(
            "{} does not describe a known Raspberry Pi peripheral base",
            SOC_RANGES_PATH
        ))
    })
}

/// ARM physical base of the peripherals from a device-tree `ranges` blob.
///
/// The first cell is the VideoCore bus address; the next is the CPU address,
/// which BCM2711 trees prefix with a zero high cell.
fn parse_soc_ranges(ranges: &[u8]) -> Option<u64> {
    let cells: Vec<u32> = ranges
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if cells.first() != Some(&VC_PERIPHERAL_BASE) {
        return None;
    }
    let mut cpu = u64::from(*cells.get(1)?);
    if cpu == 0 {
        cpu = u64::from(*cells.get(2)?);
    }
    KNOWN_PERIPHERAL_BASES.contains(&cpu).then_some(cpu)
}
