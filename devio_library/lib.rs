//! # devio library
//!
//! GPIO controller, driver backends and software PWM.
//!
//! ## Structure
//!
//! ```text
//! devio_library/
//! ── controller.rs   # GpioController: pin ownership, numbering, events
//! ── drivers/        # sysfs, character device, memory-mapped, simulation
//! ── pwm/            # Software PWM on top of the controller
//! ── board.rs        # Raspberry Pi header numbering
//! ── handle.rs       # epoll / eventfd descriptors
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use devio_core::{NumberingScheme, PinEventTypes, PinMode, PinValue};
//! use devio_library::GpioController;
//!
//! let gpio = GpioController::with_best_driver(NumberingScheme::Logical)?;
//! gpio.open_pin(17, PinMode::Output)?;
//! gpio.open_pin(27, PinMode::Input)?;
//!
//! let button = gpio.register_callback_for_pin_value_changed_event(
//!     27,
//!     PinEventTypes::Rising,
//!     |event| println!("pin {} went {}", event.pin, event.change_type),
//! )?;
//!
//! gpio.write(17, PinValue::High)?;
//! let result = gpio.wait_for_event(27, PinEventTypes::Falling, Duration::from_secs(1))?;
//! println!("timed out: {}", result.timed_out);
//!
//! gpio.unregister_callback_for_pin_value_changed_event(27, button)?;
//! gpio.dispose()?;
//! # Ok::<(), devio_core::GpioError>(())
//! ```

pub mod board;
pub mod controller;
pub mod drivers;
#[cfg(any(feature = "sysfs", feature = "cdev"))]
pub mod handle;
pub mod pwm;

pub use controller::{GpioController, OpenPinRecord};
pub use drivers::{
    best_driver_for_board, create_driver, list_available_backends, GpioDriver, SimulationDriver,
    SimulationHandle,
};
pub use pwm::{PwmState, SoftwarePwmChannel};

#[cfg(feature = "cdev")]
pub use drivers::CharacterDeviceDriver;
#[cfg(feature = "mmio")]
pub use drivers::MemoryMappedDriver;
#[cfg(feature = "sysfs")]
pub use drivers::SysfsDriver;
