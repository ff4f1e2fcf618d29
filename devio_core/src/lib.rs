//! # DEVIO Core
//!
//! Shared vocabulary for the DEVIO GPIO stack.
//!
//! This crate holds everything the controller and the driver backends agree
//! on, without touching any hardware:
//!
//! - **Pins**: modes, levels, edge masks and numbering schemes
//! - **Errors**: the [`GpioError`] type returned by every fallible call
//! - **Events**: the subscriber registry backends deliver edges into
//! - **Drivers**: backend selection and YAML/TOML configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use devio_core::{ControllerConfig, DriverKind, NumberingScheme};
//!
//! let config = ControllerConfig::from_yaml("numbering: board\ndriver:\n  backend: cdev\n").unwrap();
//! assert_eq!(config.numbering, NumberingScheme::Board);
//! assert_eq!(config.driver.backend, DriverKind::CharacterDevice);
//! ```

pub mod driver;
pub mod error;
pub mod events;
pub mod pin;

pub use driver::{ControllerConfig, DriverConfig, DriverKind, DriverStatus};
pub use error::{GpioError, GpioResult};
pub use events::{EventSink, PinChangeCallback, SubscriberRegistry, SubscriptionId};
pub use pin::{
    NumberingScheme, PinEventTypes, PinMode, PinValue, PinValueChangedEvent, PinValuePair,
    WaitForEventResult,
};
