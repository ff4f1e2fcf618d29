//! GPIO driver backends
//!
//! Every backend implements the same pin contract as inherent methods, and
//! [`GpioDriver`] dispatches over them. The controller only talks to
//! `GpioDriver`.
//!
//! # Architecture
//!
//! ```text
//! GpioController
//!   │
//!   └── GpioDriver
//!           ├── SimulationDriver      (always available)
//!           ├── SysfsDriver           (feature `sysfs`)
//!           ├── CharacterDeviceDriver (feature `cdev`)
//!           └── MemoryMappedDriver    (feature `mmio`)
//!                   └── lazily owns a cdev/sysfs driver for edge events
//! ```
//!
//! All pin numbers at this level are logical (SoC) numbers.

pub mod factory;
pub mod simulation;

#[cfg(feature = "cdev")]
pub mod cdev;
#[cfg(feature = "mmio")]
pub mod mmio;
#[cfg(any(feature = "sysfs", feature = "cdev"))]
mod monitor;
#[cfg(feature = "sysfs")]
pub mod sysfs;

pub use factory::{best_driver_for_board, create_driver, list_available_backends};
pub use simulation::{SimulationDriver, SimulationHandle};

#[cfg(feature = "cdev")]
pub use cdev::CharacterDeviceDriver;
#[cfg(feature = "mmio")]
pub use mmio::MemoryMappedDriver;
#[cfg(feature = "sysfs")]
pub use sysfs::SysfsDriver;

use devio_core::driver::{DriverKind, DriverStatus};
use devio_core::error::GpioResult;
use devio_core::events::EventSink;
use devio_core::pin::{PinEventTypes, PinMode, PinValue};

/// Type-erased GPIO driver
pub enum GpioDriver {
    Simulation(SimulationDriver),
    #[cfg(feature = "sysfs")]
    Sysfs(SysfsDriver),
    #[cfg(feature = "cdev")]
    CharacterDevice(CharacterDeviceDriver),
    #[cfg(feature = "mmio")]
    MemoryMapped(MemoryMappedDriver),
}

impl GpioDriver {
    /// Simulation driver with the default bank, plus its test handle
    pub fn simulation() -> (Self, SimulationHandle) {
        let driver = SimulationDriver::default();
        let handle = driver.handle();
        (Self::Simulation(driver), handle)
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            Self::Simulation(_) => DriverKind::Simulation,
            #[cfg(feature = "sysfs")]
            Self::Sysfs(_) => DriverKind::Sysfs,
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(_) => DriverKind::CharacterDevice,
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(_) => DriverKind::MemoryMapped,
        }
    }

    /// Whether [`convert_to_logical`](Self::convert_to_logical) can succeed
    pub fn has_board_layout(&self) -> bool {
        match self {
            Self::Simulation(_) => true,
            #[cfg(feature = "sysfs")]
            Self::Sysfs(_) => false,
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(_) => false,
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(_) => true,
        }
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Simulation(d) => d.status(),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.status(),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.status(),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.status(),
        }
    }

    /// Release every native resource; calling it again does nothing
    pub fn dispose(&mut self) -> GpioResult<()> {
        match self {
            Self::Simulation(d) => d.dispose(),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.dispose(),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.dispose(),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.dispose(),
        }
    }

    // ========================================================================
    // Pin numbering
    // ========================================================================

    pub fn pin_count(&self) -> u32 {
        match self {
            Self::Simulation(d) => d.pin_count(),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.pin_count(),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.pin_count(),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.pin_count(),
        }
    }

    /// Translate a board header position to the logical number
    pub fn convert_to_logical(&self, board_pin: u32) -> GpioResult<u32> {
        match self {
            Self::Simulation(d) => d.convert_to_logical(board_pin),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.convert_to_logical(board_pin),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.convert_to_logical(board_pin),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.convert_to_logical(board_pin),
        }
    }

    // ========================================================================
    // Pin methods
    // ========================================================================

    /// Acquire the pin and configure its direction.
    ///
    /// `initial` is driven on an output before the direction switches where
    /// the backend allows it.
    pub fn open_pin(
        &mut self,
        pin: u32,
        mode: PinMode,
        initial: Option<PinValue>,
    ) -> GpioResult<()> {
        match self {
            Self::Simulation(d) => d.open_pin(pin, mode, initial),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.open_pin(pin, mode, initial),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.open_pin(pin, mode, initial),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.open_pin(pin, mode, initial),
        }
    }

    /// Release the pin; a pin that is not open is left alone
    pub fn close_pin(&mut self, pin: u32) -> GpioResult<()> {
        match self {
            Self::Simulation(d) => d.close_pin(pin),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.close_pin(pin),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.close_pin(pin),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.close_pin(pin),
        }
    }

    pub fn is_pin_mode_supported(&self, pin: u32, mode: PinMode) -> bool {
        match self {
            Self::Simulation(d) => d.is_pin_mode_supported(pin, mode),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.is_pin_mode_supported(pin, mode),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.is_pin_mode_supported(pin, mode),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.is_pin_mode_supported(pin, mode),
        }
    }

    /// Reconfigure an open pin
    pub fn set_pin_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        match self {
            Self::Simulation(d) => d.set_pin_mode(pin, mode),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.set_pin_mode(pin, mode),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.set_pin_mode(pin, mode),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.set_pin_mode(pin, mode),
        }
    }

    pub fn get_pin_mode(&self, pin: u32) -> GpioResult<PinMode> {
        match self {
            Self::Simulation(d) => d.get_pin_mode(pin),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.get_pin_mode(pin),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.get_pin_mode(pin),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.get_pin_mode(pin),
        }
    }

    pub fn read(&self, pin: u32) -> GpioResult<PinValue> {
        match self {
            Self::Simulation(d) => d.read(pin),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.read(pin),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.read(pin),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.read(pin),
        }
    }

    pub fn write(&mut self, pin: u32, value: PinValue) -> GpioResult<()> {
        match self {
            Self::Simulation(d) => d.write(pin, value),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.write(pin, value),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.write(pin, value),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.write(pin, value),
        }
    }

    /// Arm (or with `PinEventTypes::None`, disarm) edge detection.
    ///
    /// Detected edges are dispatched into `sink` from the driver's monitor
    /// thread, keyed by logical pin.
    pub fn set_pin_events_to_detect(
        &mut self,
        pin: u32,
        edges: PinEventTypes,
        sink: &EventSink,
    ) -> GpioResult<()> {
        match self {
            Self::Simulation(d) => d.set_pin_events_to_detect(pin, edges, sink),
            #[cfg(feature = "sysfs")]
            Self::Sysfs(d) => d.set_pin_events_to_detect(pin, edges, sink),
            #[cfg(feature = "cdev")]
            Self::CharacterDevice(d) => d.set_pin_events_to_detect(pin, edges, sink),
            #[cfg(feature = "mmio")]
            Self::MemoryMapped(d) => d.set_pin_events_to_detect(pin, edges, sink),
        }
    }
}

impl std::fmt::Debug for GpioDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioDriver")
            .field("kind", &self.kind())
            .field("status", &self.status())
            .finish()
    }
}
