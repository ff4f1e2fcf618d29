//! Unified error handling for DEVIO
//!
//! Every controller, driver backend and PWM channel reports failures through
//! [`GpioError`]. Per-pin failures never invalidate the controller that
//! produced them.

use std::io;

use thiserror::Error;

use crate::pin::PinMode;

/// Main error type for GPIO operations
#[derive(Debug, Error)]
pub enum GpioError {
    /// The pin already has an open session on this controller
    #[error("Pin {0} is already open")]
    PinAlreadyOpen(u32),

    /// The operation targets a pin that was never opened or was closed
    #[error("Pin {0} is not open")]
    PinNotOpened(u32),

    /// The backend (or the operation) cannot work with the requested mode
    #[error("Pin {pin} does not support mode {mode}")]
    InvalidPinMode { pin: u32, mode: PinMode },

    /// The pin is claimed by the kernel or another process
    #[error("Pin {pin} is not available: {reason}")]
    PinNotAvailable { pin: u32, reason: String },

    /// The operation is not valid in the pin's current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid input/argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested backend cannot run on this host
    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),

    /// A syscall or memory mapping failed
    #[error("Native resource error ({context}): {source}")]
    NativeResource {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The controller (or driver) was already disposed
    #[error("The GPIO controller has been disposed")]
    Disposed,

    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience type alias for Results using GpioError
pub type GpioResult<T> = Result<T, GpioError>;

impl From<serde_yaml::Error> for GpioError {
    fn from(err: serde_yaml::Error) -> Self {
        GpioError::Config(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for GpioError {
    fn from(err: toml::de::Error) -> Self {
        GpioError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for GpioError {
    fn from(err: toml::ser::Error) -> Self {
        GpioError::Config(format!("TOML serialization error: {}", err))
    }
}

// Helper methods
impl GpioError {
    /// Wrap an OS error with the operation that produced it
    pub fn native<S: Into<String>>(context: S, source: io::Error) -> Self {
        GpioError::NativeResource {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GpioError::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        GpioError::InvalidArgument(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        GpioError::InvalidOperation(msg.into())
    }

    /// Create a platform-not-supported error
    pub fn platform<S: Into<String>>(msg: S) -> Self {
        GpioError::PlatformNotSupported(msg.into())
    }

    /// Create a pin-not-available error
    pub fn not_available<S: Into<String>>(pin: u32, reason: S) -> Self {
        GpioError::PinNotAvailable {
            pin,
            reason: reason.into(),
        }
    }

    /// OS error code of a native failure, if there is one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            GpioError::NativeResource { source, .. } | GpioError::Io(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    /// Check if this is a pin-not-opened error
    pub fn is_pin_not_opened(&self) -> bool {
        matches!(self, GpioError::PinNotOpened(_))
    }

    /// Check if this is a pin-already-open error
    pub fn is_pin_already_open(&self) -> bool {
        matches!(self, GpioError::PinAlreadyOpen(_))
    }

    /// Check if this is a platform error
    pub fn is_platform_not_supported(&self) -> bool {
        matches!(self, GpioError::PlatformNotSupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(GpioError::PinAlreadyOpen(4).to_string(), "Pin 4 is already open");
        assert_eq!(GpioError::PinNotOpened(17).to_string(), "Pin 17 is not open");
        assert_eq!(
            GpioError::InvalidPinMode {
                pin: 3,
                mode: PinMode::InputPullUp
            }
            .to_string(),
            "Pin 3 does not support mode InputPullUp"
        );
    }

    #[test]
    fn test_raw_os_error() {
        let err = GpioError::native("open /dev/gpiomem", io::Error::from_raw_os_error(13));
        assert_eq!(err.raw_os_error(), Some(13));
        assert!(err.to_string().contains("open /dev/gpiomem"));
        assert_eq!(GpioError::Disposed.raw_os_error(), None);
    }

    #[test]
    fn test_predicates() {
        assert!(GpioError::PinNotOpened(1).is_pin_not_opened());
        assert!(GpioError::PinAlreadyOpen(1).is_pin_already_open());
        assert!(GpioError::platform("x").is_platform_not_supported());
        assert!(!GpioError::Disposed.is_pin_not_opened());
    }
}
