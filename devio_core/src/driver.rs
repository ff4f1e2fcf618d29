//! Driver configuration for DEVIO
//!
//! Backends are selected from a [`DriverKind`] and configured with a
//! [`DriverConfig`]. A [`ControllerConfig`] adds the numbering scheme and can
//! be loaded from YAML or TOML.
//!
//! # Example YAML
//!
//! ```yaml
//! numbering: board
//! driver:
//!   backend: character_device
//!   chip: 0
//!   consumer: door-sensor
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GpioError, GpioResult};
use crate::pin::NumberingScheme;

/// Driver status for lifecycle tracking
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DriverStatus {
    /// Backend acquired its process-wide resources
    #[default]
    Ready,
    /// At least one pin is armed and the monitor thread is alive
    Running,
    /// Backend released everything it acquired
    Shutdown,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Concrete strategy used to talk to the GPIO hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// `/sys/class/gpio` virtual files
    Sysfs,
    /// `/dev/gpiochipN` line handles
    #[serde(alias = "libgpiod", alias = "cdev")]
    CharacterDevice,
    /// Raspberry Pi register page mapped into the process
    #[serde(alias = "raspberry_pi", alias = "mmio")]
    MemoryMapped,
    /// In-memory pin bank
    #[default]
    #[serde(alias = "sim")]
    Simulation,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sysfs => "sysfs",
            Self::CharacterDevice => "character_device",
            Self::MemoryMapped => "memory_mapped",
            Self::Simulation => "simulation",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(Self::Sysfs),
            "character_device" | "chardev" | "cdev" | "libgpiod" => Ok(Self::CharacterDevice),
            "memory_mapped" | "mmio" | "raspberry_pi" | "rpi" => Ok(Self::MemoryMapped),
            "simulation" | "sim" => Ok(Self::Simulation),
            other => Err(GpioError::config(format!(
                "Unknown driver backend '{}'. Available: sysfs, character_device, memory_mapped, simulation",
                other
            ))),
        }
    }
}

/// Configuration for a single driver backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Backend to construct
    #[serde(default)]
    pub backend: DriverKind,

    /// GPIO chip number (`gpiochipN`)
    #[serde(default)]
    pub chip: u32,

    /// Explicit character device path, overrides `chip`
    #[serde(default)]
    pub chip_path: Option<String>,

    /// Consumer label reported to the kernel for requested lines
    #[serde(default = "default_consumer")]
    pub consumer: String,

    /// Number of pins in the simulated bank
    #[serde(default)]
    pub pin_count: Option<u32>,

    /// Wait after a sysfs export before touching the new nodes
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_consumer() -> String {
    "devio".to_string()
}

fn default_settle_delay_ms() -> u64 {
    10
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: DriverKind::Simulation,
            chip: 0,
            chip_path: None,
            consumer: default_consumer(),
            pin_count: None,
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl DriverConfig {
    /// Config for the given backend with every other field defaulted
    pub fn new(backend: DriverKind) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    pub fn simulation(pin_count: u32) -> Self {
        Self {
            backend: DriverKind::Simulation,
            pin_count: Some(pin_count),
            ..Default::default()
        }
    }

    pub fn character_device(chip: u32) -> Self {
        Self {
            backend: DriverKind::CharacterDevice,
            chip,
            ..Default::default()
        }
    }

    pub fn sysfs(chip: u32) -> Self {
        Self {
            backend: DriverKind::Sysfs,
            chip,
            ..Default::default()
        }
    }

    /// Character device path for this config
    pub fn chip_device_path(&self) -> String {
        self.chip_path
            .clone()
            .unwrap_or_else(|| format!("/dev/gpiochip{}", self.chip))
    }

    pub fn is_simulation(&self) -> bool {
        self.backend == DriverKind::Simulation
    }
}

/// Controller configuration file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Numbering scheme used by every public call
    #[serde(default)]
    pub numbering: NumberingScheme,

    /// Backend selection
    #[serde(default)]
    pub driver: DriverConfig,
}

impl ControllerConfig {
    pub fn new(numbering: NumberingScheme, driver: DriverConfig) -> Self {
        Self { numbering, driver }
    }

    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> GpioResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GpioError::config(format!("Failed to read controller config: {}", e)))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_yaml(&contents).or_else(|_| Self::from_toml(&contents)),
        }
    }

    /// Parse config from YAML string
    pub fn from_yaml(contents: &str) -> GpioResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| GpioError::config(format!("Failed to parse controller YAML: {}", e)))
    }

    /// Parse config from TOML string
    pub fn from_toml(contents: &str) -> GpioResult<Self> {
        toml::from_str(contents)
            .map_err(|e| GpioError::config(format!("Failed to parse controller TOML: {}", e)))
    }

    /// Save config to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GpioResult<()> {
        let path = path.as_ref();
        let contents = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self)?,
            _ => serde_yaml::to_string(self)?,
        };

        std::fs::write(path, contents)
            .map_err(|e| GpioError::config(format!("Failed to write controller config: {}", e)))
    }
}
