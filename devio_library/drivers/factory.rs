//! Driver Factory - Create drivers from configuration
//!
//! Maps a [`DriverKind`] to the matching constructor. Backends that are not
//! compiled in report `PlatformNotSupported` together with the list of the
//! ones that are.
//!
//! # Example
//!
//! ```rust,no_run
//! use devio_core::driver::DriverConfig;
//! use devio_library::drivers::factory::{best_driver_for_board, create_driver};
//!
//! let config = DriverConfig::new(best_driver_for_board());
//! let driver = create_driver(&config)?;
//! # Ok::<(), devio_core::GpioError>(())
//! ```

use std::path::Path;

use devio_core::driver::{DriverConfig, DriverKind};
use devio_core::error::{GpioError, GpioResult};

use super::simulation::{SimulationDriver, DEFAULT_SIMULATED_PINS};
use super::GpioDriver;

/// Create a driver from configuration
///
/// # Supported Backends
///
/// - `simulation` - Always available, in-memory pin bank
/// - `sysfs` - `/sys/class/gpio` (requires `sysfs` feature)
/// - `character_device` - `/dev/gpiochipN` (requires `cdev` feature)
/// - `memory_mapped` - Raspberry Pi registers (requires `mmio` feature)
pub fn create_driver(config: &DriverConfig) -> GpioResult<GpioDriver> {
    #[allow(unreachable_patterns)]
    let driver = match config.backend {
        DriverKind::Simulation => GpioDriver::Simulation(SimulationDriver::new(
            config.pin_count.unwrap_or(DEFAULT_SIMULATED_PINS),
        )),

        #[cfg(feature = "sysfs")]
        DriverKind::Sysfs => GpioDriver::Sysfs(super::SysfsDriver::new(config)?),

        #[cfg(feature = "cdev")]
        DriverKind::CharacterDevice => {
            GpioDriver::CharacterDevice(super::CharacterDeviceDriver::new(config)?)
        }

        #[cfg(feature = "mmio")]
        DriverKind::MemoryMapped => GpioDriver::MemoryMapped(super::MemoryMappedDriver::new(config)?),

        other => {
            return Err(GpioError::platform(format!(
                "GPIO backend '{}' is not compiled in. Available: {}",
                other,
                list_available_backends()
                    .iter()
                    .map(DriverKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    };

    log::debug!("Created {} GPIO driver", driver.kind());
    Ok(driver)
}

/// Backends compiled into this build, simulation first
pub fn list_available_backends() -> Vec<DriverKind> {
    let mut backends = vec![DriverKind::Simulation];
    if cfg!(feature = "sysfs") {
        backends.push(DriverKind::Sysfs);
    }
    if cfg!(feature = "cdev") {
        backends.push(DriverKind::CharacterDevice);
    }
    if cfg!(feature = "mmio") {
        backends.push(DriverKind::MemoryMapped);
    }
    backends
}

/// Fastest backend that should work on this host.
///
/// Register access on a supported Raspberry Pi, then the character device,
/// then sysfs. Falls back to simulation when no GPIO interface is present.
pub fn best_driver_for_board() -> DriverKind {
    #[cfg(feature = "mmio")]
    {
        if super::mmio::supported_model().is_some() {
            return DriverKind::MemoryMapped;
        }
    }
    if cfg!(feature = "cdev") && Path::new("/dev/gpiochip0").exists() {
        return DriverKind::CharacterDevice;
    }
    if cfg!(feature = "sysfs") && Path::new("/sys/class/gpio").exists() {
        return DriverKind::Sysfs;
    }
    DriverKind::Simulation
}
