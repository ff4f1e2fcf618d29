//! # DEVIO - GPIO for Linux single-board computers
//!
//! One controller API over several ways of reaching the pins: the sysfs
//! interface, the GPIO character device, direct Raspberry Pi register access
//! and an in-memory simulation. Software PWM is built on top.
//!
//! ## Quick Start
//!
//! ```rust
//! use devio::prelude::*;
//!
//! let (driver, sim) = GpioDriver::simulation();
//! let gpio = GpioController::new(NumberingScheme::Board, driver)?;
//!
//! // Header pin 11 is GPIO17 on a Raspberry Pi.
//! gpio.open_pin(11, PinMode::Output)?;
//! gpio.write(11, PinValue::High)?;
//! assert_eq!(sim.level(17), Some(PinValue::High));
//! # Ok::<(), GpioError>(())
//! ```
//!
//! ## Features
//!
//! - **sysfs** - `/sys/class/gpio` backend
//! - **cdev** - `/dev/gpiochipN` backend
//! - **mmio** - Raspberry Pi register backend (`/dev/gpiomem`, `/dev/mem`)
//!
//! All three are on by default. The simulation backend is always present.

// Re-export core components
pub use devio_core::{self, *};

// Re-export the library with alias
pub use devio_library as library;

/// The DEVIO prelude
///
/// `use devio::prelude::*;` brings in the controller, the driver selection
/// helpers and the pin vocabulary.
pub mod prelude {
    // ============================================
    // Pin vocabulary
    // ============================================
    pub use devio_core::pin::{
        NumberingScheme, PinEventTypes, PinMode, PinValue, PinValueChangedEvent, PinValuePair,
        WaitForEventResult,
    };

    // ============================================
    // Errors & configuration
    // ============================================
    pub use devio_core::driver::{ControllerConfig, DriverConfig, DriverKind, DriverStatus};
    pub use devio_core::error::{GpioError, GpioResult};
    pub use devio_core::events::SubscriptionId;

    // ============================================
    // Controller & drivers
    // ============================================
    pub use devio_library::{
        best_driver_for_board, create_driver, list_available_backends, GpioController,
        GpioDriver, SimulationDriver, SimulationHandle,
    };

    // ============================================
    // PWM
    // ============================================
    pub use devio_library::{PwmState, SoftwarePwmChannel};
}
