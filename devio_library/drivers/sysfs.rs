//! Sysfs GPIO driver
//!
//! Uses the Linux `/sys/class/gpio` interface through `sysfs_gpio`. Edge
//! detection writes the pin's `edge` node and waits for `POLLPRI` on its
//! `value` node in the shared edge monitor.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::thread;
use std::time::Duration;

use devio_core::driver::{DriverConfig, DriverStatus};
use devio_core::error::{GpioError, GpioResult};
use devio_core::events::EventSink;
use devio_core::pin::{PinEventTypes, PinMode, PinValue};

use sysfs_gpio::{Direction, Edge, Pin};

use super::monitor::{EdgeMonitor, EdgeSource};

/// Root of the sysfs GPIO class
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

struct SysfsPin {
    pin: Pin,
    mode: PinMode,
    /// False when the line was already exported by someone else
    exported_here: bool,
    armed: bool,
}

/// Sysfs GPIO driver
pub struct SysfsDriver {
    chip_base: u32,
    chip_lines: u32,
    settle_delay: Duration,
    pins: HashMap<u32, SysfsPin>,
    monitor: Option<EdgeMonitor>,
    status: DriverStatus,
}

impl SysfsDriver {
    pub fn new(config: &DriverConfig) -> GpioResult<Self> {
        let root = Path::new(SYSFS_GPIO_ROOT);
        if !root.exists() {
            return Err(GpioError::platform(format!(
                "{} does not exist; the kernel was built without sysfs GPIO",
                SYSFS_GPIO_ROOT
            )));
        }

        let (chip_base, chip_lines) = find_gpio_chip(root)
            .map_err(|e| GpioError::native(format!("scan {}", SYSFS_GPIO_ROOT), e))?
            .unwrap_or((0, 0));

        log::info!(
            "Sysfs GPIO driver created (chip base {}, {} lines)",
            chip_base,
            chip_lines
        );

        Ok(Self {
            chip_base,
            chip_lines,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            pins: HashMap::new(),
            monitor: None,
            status: DriverStatus::Ready,
        })
    }

    pub fn is_available() -> bool {
        Path::new(SYSFS_GPIO_ROOT).exists()
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    pub fn pin_count(&self) -> u32 {
        self.chip_lines
    }

    /// Kernel GPIO number of a logical pin
    fn sysfs_number(&self, pin: u32) -> u64 {
        u64::from(self.chip_base) + u64::from(pin)
    }

    pub fn convert_to_logical(&self, _board_pin: u32) -> GpioResult<u32> {
        Err(GpioError::platform(
            "The sysfs driver has no board layout; use logical numbering",
        ))
    }

    pub fn is_pin_mode_supported(&self, _pin: u32, mode: PinMode) -> bool {
        !mode.needs_bias()
    }

    pub fn open_pin(
        &mut self,
        pin: u32,
        mode: PinMode,
        initial: Option<PinValue>,
    ) -> GpioResult<()> {
        self.ensure_active()?;
        if self.pins.contains_key(&pin) {
            return Err(GpioError::PinAlreadyOpen(pin));
        }
        if !self.is_pin_mode_supported(pin, mode) {
            return Err(GpioError::InvalidPinMode { pin, mode });
        }

        let handle = Pin::new(self.sysfs_number(pin));
        let exported_here = !handle.is_exported();
        if exported_here {
            handle
                .export()
                .map_err(|e| sysfs_error(pin, "export", e))?;
            // udev needs a moment to fix up permissions on the new nodes
            thread::sleep(self.settle_delay);
        }

        let direction = match (mode, initial) {
            (PinMode::Output, Some(PinValue::High)) => Direction::High,
            (PinMode::Output, Some(PinValue::Low)) => Direction::Low,
            (PinMode::Output, None) => Direction::Out,
            _ => Direction::In,
        };
        if let Err(e) = handle.set_direction(direction) {
            if exported_here {
                let _ = handle.unexport();
            }
            return Err(sysfs_error(pin, "set direction of", e));
        }

        self.pins.insert(
            pin,
            SysfsPin {
                pin: handle,
                mode,
                exported_here,
                armed: false,
            },
        );
        log::debug!("Sysfs pin {} opened as {}", pin, mode);
        Ok(())
    }

    /// Release a pin; closing a pin that is not open does nothing
    pub fn close_pin(&mut self, pin: u32) -> GpioResult<()> {
        let Some(entry) = self.pins.remove(&pin) else {
            return Ok(());
        };

        let mut result = Ok(());
        if entry.armed {
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.remove(pin);
            }
            if let Err(e) = entry.pin.set_edge(Edge::NoInterrupt) {
                result = Err(sysfs_error(pin, "clear edge of", e));
            }
        }
        if entry.exported_here {
            if let Err(e) = entry.pin.unexport() {
                if result.is_ok() {
                    result = Err(sysfs_error(pin, "unexport", e));
                }
            }
        }
        log::debug!("Sysfs pin {} closed", pin);
        result
    }

    pub fn set_pin_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.ensure_active()?;
        if !self.is_pin_mode_supported(pin, mode) {
            return Err(GpioError::InvalidPinMode { pin, mode });
        }
        let entry = self.pins.get_mut(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        let direction = if mode == PinMode::Output {
            Direction::Out
        } else {
            Direction::In
        };
        entry
            .pin
            .set_direction(direction)
            .map_err(|e| sysfs_error(pin, "set direction of", e))?;
        entry.mode = mode;
        Ok(())
    }

    pub fn get_pin_mode(&self, pin: u32) -> GpioResult<PinMode> {
        self.pins
            .get(&pin)
            .map(|entry| entry.mode)
            .ok_or(GpioError::PinNotOpened(pin))
    }

    pub fn read(&self, pin: u32) -> GpioResult<PinValue> {
        let entry = self.pins.get(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        entry
            .pin
            .get_value()
            .map(PinValue::from_u8)
            .map_err(|e| sysfs_error(pin, "read", e))
    }

    pub fn write(&mut self, pin: u32, value: PinValue) -> GpioResult<()> {
        self.ensure_active()?;
        let entry = self.pins.get(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        if entry.mode != PinMode::Output {
            return Err(GpioError::invalid_operation(format!(
                "Pin {} is opened as {} and cannot be written",
                pin, entry.mode
            )));
        }
        entry
            .pin
            .set_value(value.as_u8())
            .map_err(|e| sysfs_error(pin, "write", e))
    }

    pub fn set_pin_events_to_detect(
        &mut self,
        pin: u32,
        edges: PinEventTypes,
        sink: &EventSink,
    ) -> GpioResult<()> {
        self.ensure_active()?;
        let number = self.sysfs_number(pin);
        let entry = self.pins.get_mut(&pin).ok_or(GpioError::PinNotOpened(pin))?;

        if edges.is_none() {
            if entry.armed {
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.remove(pin);
                }
                entry.armed = false;
                entry
                    .pin
                    .set_edge(Edge::NoInterrupt)
                    .map_err(|e| sysfs_error(pin, "clear edge of", e))?;
                log::debug!("Sysfs pin {} disarmed", pin);
            }
            return Ok(());
        }

        if !entry.mode.is_input() {
            return Err(GpioError::InvalidPinMode {
                pin,
                mode: entry.mode,
            });
        }

        entry
            .pin
            .set_edge(sysfs_edge(edges))
            .map_err(|e| sysfs_error(pin, "set edge of", e))?;
        if entry.armed {
            // Already watched; only the trigger changed.
            return Ok(());
        }

        let path = format!("{}/gpio{}/value", SYSFS_GPIO_ROOT, number);
        let value = File::open(&path).map_err(|e| GpioError::native(format!("open {}", path), e))?;

        let monitor = match &mut self.monitor {
            Some(monitor) => monitor,
            empty => empty.insert(EdgeMonitor::new("devio-sysfs-events", sink.clone())?),
        };
        monitor.add(
            pin,
            Box::new(SysfsEdgeSource {
                value,
                primed: false,
            }),
            (libc::EPOLLIN | libc::EPOLLPRI | libc::EPOLLET) as u32,
        )?;

        entry.armed = true;
        self.status = DriverStatus::Running;
        log::debug!("Sysfs pin {} armed for {} edges", pin, edges);
        Ok(())
    }

    fn ensure_active(&self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Err(GpioError::Disposed);
        }
        Ok(())
    }

    /// Close every open pin and stop the monitor, reporting the first failure
    pub fn dispose(&mut self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Ok(());
        }

        let mut result = Ok(());
        let pins: Vec<u32> = self.pins.keys().copied().collect();
        for pin in pins {
            if let Err(e) = self.close_pin(pin) {
                log::warn!("Failed to release sysfs pin {}: {}", pin, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if let Some(mut monitor) = self.monitor.take() {
            if let Err(e) = monitor.stop() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        self.status = DriverStatus::Shutdown;
        log::info!("Sysfs GPIO driver disposed");
        result
    }
}

impl Drop for SysfsDriver {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("Sysfs GPIO driver teardown failed: {}", e);
        }
    }
}

struct SysfsEdgeSource {
    value: File,
    /// The first wake-up after arming reports the current state, not an edge
    primed: bool,
}

impl EdgeSource for SysfsEdgeSource {
    fn raw_fd(&self) -> RawFd {
        self.value.as_raw_fd()
    }

    fn read_edge(&mut self) -> io::Result<Option<PinEventTypes>> {
        let level = read_value_node(&self.value)?;
        if !self.primed {
            self.primed = true;
            return Ok(None);
        }
        Ok(Some(PinEventTypes::edge_to(level)))
    }

    fn read_level(&self) -> io::Result<PinValue> {
        read_value_node(&self.value)
    }
}

/// Re-read a `value` node from the start, clearing its pending `POLLPRI`
fn read_value_node(file: &File) -> io::Result<PinValue> {
    let mut file = file;
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 2];
    let n = file.read(&mut buf)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty GPIO value node",
        ));
    }
    Ok(PinValue::from(buf[0] == b'1'))
}

fn sysfs_edge(edges: PinEventTypes) -> Edge {
    match edges {
        PinEventTypes::None => Edge::NoInterrupt,
        PinEventTypes::Rising => Edge::RisingEdge,
        PinEventTypes::Falling => Edge::FallingEdge,
        PinEventTypes::Both => Edge::BothEdges,
    }
}

fn sysfs_error(pin: u32, context: &str, err: sysfs_gpio::Error) -> GpioError {
    match err {
        sysfs_gpio::Error::Io(source) => match source.raw_os_error() {
            Some(libc::EBUSY) => {
                GpioError::not_available(pin, format!("{} failed: line is in use", context))
            }
            _ => GpioError::native(format!("{} gpio pin {}", context, pin), source),
        },
        other => GpioError::native(
            format!("{} gpio pin {}", context, pin),
            io::Error::other(other.to_string()),
        ),
    }
}

/// Base number and line count of the gpiochip logical pins are offsets into.
///
/// Prefers the SoC pin controller (label starting with `pinctrl`). Without
/// one, the chip with the lowest base is used.
fn find_gpio_chip(root: &Path) -> io::Result<Option<(u32, u32)>> {
    let mut chips: Vec<_> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("gpiochip"))
                .unwrap_or(false)
        })
        .collect();
    chips.sort();

    let mut fallback: Option<(u32, u32)> = None;
    for chip in chips {
        let label = match fs::read_to_string(chip.join("label")) {
            Ok(label) => label,
            Err(_) => continue,
        };
        let base = read_number(&chip.join("base"))?;
        let lines = read_number(&chip.join("ngpio")).unwrap_or(0);
        if label.trim().starts_with("pinctrl") {
            return Ok(Some((base, lines)));
        }
        if fallback.map_or(true, |(lowest, _)| base < lowest) {
            fallback = Some((base, lines));
        }
    }
    Ok(fallback)
}

fn read_number(path: &Path) -> io::Result<u32> {
    fs::read_to_string(path)?
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
