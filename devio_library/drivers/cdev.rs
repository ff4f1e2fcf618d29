//! GPIO character-device driver
//!
//! Requests lines from `/dev/gpiochipN` through `gpio-cdev`. An armed line is
//! re-requested as an event handle and handed to the shared edge monitor; the
//! kernel timestamps and classifies each edge for us.
//!
//! Pull resistors are requested with the v1 `GPIOHANDLE_REQUEST_BIAS_*` flags,
//! which need Linux 5.5 or newer. Older kernels reject the request with
//! `EINVAL`.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use devio_core::driver::{DriverConfig, DriverStatus};
use devio_core::error::{GpioError, GpioResult};
use devio_core::events::EventSink;
use devio_core::pin::{PinEventTypes, PinMode, PinValue};

use gpio_cdev::{
    Chip, EventRequestFlags, EventType, Line, LineEventHandle, LineHandle, LineRequestFlags,
};
use nix::errno::Errno;

use super::monitor::{EdgeMonitor, EdgeSource};

const BIAS_PULL_UP: u32 = 1 << 5;
const BIAS_PULL_DOWN: u32 = 1 << 6;

struct CdevLine {
    line: Line,
    mode: PinMode,
    /// `None` while the line is held by the edge monitor
    handle: Option<LineHandle>,
    edges: PinEventTypes,
}

/// GPIO character-device driver
pub struct CharacterDeviceDriver {
    chip: Chip,
    path: String,
    consumer: String,
    lines: HashMap<u32, CdevLine>,
    monitor: Option<EdgeMonitor>,
    status: DriverStatus,
}

impl CharacterDeviceDriver {
    pub fn new(config: &DriverConfig) -> GpioResult<Self> {
        let path = config.chip_device_path();
        if !Path::new(&path).exists() {
            return Err(GpioError::platform(format!(
                "GPIO character device {} does not exist",
                path
            )));
        }

        let chip = Chip::new(&path).map_err(|e| cdev_error(None, format!("open {}", path), e))?;
        log::info!(
            "Character device GPIO driver opened {} ({}, {} lines)",
            path,
            chip.label(),
            chip.num_lines()
        );

        Ok(Self {
            chip,
            path,
            consumer: config.consumer.clone(),
            lines: HashMap::new(),
            monitor: None,
            status: DriverStatus::Ready,
        })
    }

    pub fn is_available(config: &DriverConfig) -> bool {
        Path::new(&config.chip_device_path()).exists()
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    pub fn pin_count(&self) -> u32 {
        self.chip.num_lines()
    }

    pub fn convert_to_logical(&self, _board_pin: u32) -> GpioResult<u32> {
        Err(GpioError::platform(format!(
            "{} has no board layout; use logical numbering",
            self.path
        )))
    }

    pub fn is_pin_mode_supported(&self, pin: u32, _mode: PinMode) -> bool {
        pin < self.chip.num_lines()
    }

    pub fn open_pin(
        &mut self,
        pin: u32,
        mode: PinMode,
        initial: Option<PinValue>,
    ) -> GpioResult<()> {
        self.ensure_active()?;
        if self.lines.contains_key(&pin) {
            return Err(GpioError::PinAlreadyOpen(pin));
        }
        if pin >= self.chip.num_lines() {
            return Err(GpioError::invalid_argument(format!(
                "Pin {} is outside {} ({} lines)",
                pin,
                self.path,
                self.chip.num_lines()
            )));
        }

        let line = self
            .chip
            .get_line(pin)
            .map_err(|e| cdev_error(Some(pin), format!("get line {}", pin), e))?;
        let info = line
            .info()
            .map_err(|e| cdev_error(Some(pin), format!("line {} info", pin), e))?;
        if info.is_used() {
            return Err(GpioError::not_available(
                pin,
                format!("claimed by '{}'", info.consumer().unwrap_or("kernel")),
            ));
        }

        let handle = request_handle(&line, mode, initial, &self.consumer)
            .map_err(|e| cdev_error(Some(pin), format!("request line {}", pin), e))?;
        self.lines.insert(
            pin,
            CdevLine {
                line,
                mode,
                handle: Some(handle),
                edges: PinEventTypes::None,
            },
        );
        log::debug!("Line {} of {} opened as {}", pin, self.path, mode);
        Ok(())
    }

    /// Release a line; closing a line that is not open does nothing
    pub fn close_pin(&mut self, pin: u32) -> GpioResult<()> {
        if let Some(entry) = self.lines.remove(&pin) {
            if !entry.edges.is_none() {
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.remove(pin);
                }
            }
            log::debug!("Line {} of {} closed", pin, self.path);
        }
        Ok(())
    }

    pub fn set_pin_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.ensure_active()?;
        if !self.is_pin_mode_supported(pin, mode) {
            return Err(GpioError::InvalidPinMode { pin, mode });
        }
        let consumer = self.consumer.clone();
        let entry = self.lines.get_mut(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        if !entry.edges.is_none() {
            return Err(GpioError::invalid_operation(format!(
                "Line {} is armed for edge events; disarm it before changing mode",
                pin
            )));
        }

        // The kernel only changes direction on a fresh request.
        entry.handle = None;
        let handle = request_handle(&entry.line, mode, None, &consumer)
            .map_err(|e| cdev_error(Some(pin), format!("request line {}", pin), e))?;
        entry.handle = Some(handle);
        entry.mode = mode;
        Ok(())
    }

    pub fn get_pin_mode(&self, pin: u32) -> GpioResult<PinMode> {
        self.lines
            .get(&pin)
            .map(|entry| entry.mode)
            .ok_or(GpioError::PinNotOpened(pin))
    }

    pub fn read(&self, pin: u32) -> GpioResult<PinValue> {
        let entry = self.lines.get(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        if let Some(handle) = &entry.handle {
            return handle
                .get_value()
                .map(PinValue::from_u8)
                .map_err(|e| cdev_error(Some(pin), format!("read line {}", pin), e));
        }

        match self.monitor.as_ref().and_then(|m| m.read_level(pin)) {
            Some(level) => level.map_err(|e| GpioError::native(format!("read line {}", pin), e)),
            None => Err(GpioError::invalid_operation(format!(
                "Line {} has no active request",
                pin
            ))),
        }
    }

    pub fn write(&mut self, pin: u32, value: PinValue) -> GpioResult<()> {
        self.ensure_active()?;
        let entry = self.lines.get(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        if entry.mode != PinMode::Output {
            return Err(GpioError::invalid_operation(format!(
                "Pin {} is opened as {} and cannot be written",
                pin, entry.mode
            )));
        }
        let handle = entry.handle.as_ref().ok_or_else(|| {
            GpioError::invalid_operation(format!("Line {} has no active request", pin))
        })?;
        handle
            .set_value(value.as_u8())
            .map_err(|e| cdev_error(Some(pin), format!("write line {}", pin), e))
    }

    pub fn set_pin_events_to_detect(
        &mut self,
        pin: u32,
        edges: PinEventTypes,
        sink: &EventSink,
    ) -> GpioResult<()> {
        self.ensure_active()?;
        let consumer = self.consumer.clone();
        let entry = self.lines.get_mut(&pin).ok_or(GpioError::PinNotOpened(pin))?;
        if entry.edges == edges {
            return Ok(());
        }
        if !edges.is_none() && !entry.mode.is_input() {
            return Err(GpioError::InvalidPinMode {
                pin,
                mode: entry.mode,
            });
        }

        // Give the line back before requesting it again with new flags.
        if !entry.edges.is_none() {
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.remove(pin);
            }
        }
        entry.handle = None;
        entry.edges = PinEventTypes::None;

        if edges.is_none() {
            let handle = request_handle(&entry.line, entry.mode, None, &consumer)
                .map_err(|e| cdev_error(Some(pin), format!("request line {}", pin), e))?;
            entry.handle = Some(handle);
            log::debug!("Line {} disarmed", pin);
            return Ok(());
        }

        let events = match entry
            .line
            .events(request_flags(entry.mode), event_flags(edges), &consumer)
        {
            Ok(events) => events,
            Err(e) => {
                entry.handle = request_handle(&entry.line, entry.mode, None, &consumer).ok();
                return Err(cdev_error(
                    Some(pin),
                    format!("request events on line {}", pin),
                    e,
                ));
            }
        };

        let monitor = match &mut self.monitor {
            Some(monitor) => monitor,
            empty => empty.insert(EdgeMonitor::new("devio-cdev-events", sink.clone())?),
        };
        monitor.add(pin, Box::new(CdevEdgeSource { events }), libc::EPOLLIN as u32)?;

        entry.edges = edges;
        self.status = DriverStatus::Running;
        log::debug!("Line {} armed for {} edges", pin, edges);
        Ok(())
    }

    fn ensure_active(&self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Err(GpioError::Disposed);
        }
        Ok(())
    }

    /// Release every line and stop the monitor
    pub fn dispose(&mut self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(mut monitor) = self.monitor.take() {
            result = monitor.stop();
        }
        self.lines.clear();

        self.status = DriverStatus::Shutdown;
        log::info!("Character device GPIO driver for {} disposed", self.path);
        result
    }
}

impl Drop for CharacterDeviceDriver {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("Character device GPIO driver teardown failed: {}", e);
        }
    }
}

struct CdevEdgeSource {
    events: LineEventHandle,
}

impl EdgeSource for CdevEdgeSource {
    fn raw_fd(&self) -> RawFd {
        self.events.as_raw_fd()
    }

    fn read_edge(&mut self) -> io::Result<Option<PinEventTypes>> {
        let event = self
            .events
            .get_event()
            .map_err(|e| cdev_io_error(&e))?;
        Ok(Some(match event.event_type() {
            EventType::RisingEdge => PinEventTypes::Rising,
            EventType::FallingEdge => PinEventTypes::Falling,
        }))
    }

    fn read_level(&self) -> io::Result<PinValue> {
        self.events
            .get_value()
            .map(PinValue::from_u8)
            .map_err(|e| cdev_io_error(&e))
    }
}

fn request_handle(
    line: &Line,
    mode: PinMode,
    initial: Option<PinValue>,
    consumer: &str,
) -> Result<LineHandle, gpio_cdev::Error> {
    let default = match mode {
        PinMode::Output => initial.unwrap_or_default().as_u8(),
        _ => 0,
    };
    line.request(request_flags(mode), default, consumer)
}

fn request_flags(mode: PinMode) -> LineRequestFlags {
    match mode {
        PinMode::Output => LineRequestFlags::OUTPUT,
        PinMode::Input => LineRequestFlags::INPUT,
        PinMode::InputPullUp => {
            LineRequestFlags::from_bits_retain(LineRequestFlags::INPUT.bits() | BIAS_PULL_UP)
        }
        PinMode::InputPullDown => {
            LineRequestFlags::from_bits_retain(LineRequestFlags::INPUT.bits() | BIAS_PULL_DOWN)
        }
    }
}

fn event_flags(edges: PinEventTypes) -> EventRequestFlags {
    match edges {
        PinEventTypes::Rising => EventRequestFlags::RISING_EDGE,
        PinEventTypes::Falling => EventRequestFlags::FALLING_EDGE,
        _ => EventRequestFlags::BOTH_EDGES,
    }
}

/// Keep the errno behind a gpio-cdev error when there is one
fn cdev_io_error(err: &gpio_cdev::Error) -> io::Error {
    let source = std::error::Error::source(err);
    if let Some(errno) = source.and_then(|s| s.downcast_ref::<Errno>()) {
        return io::Error::from_raw_os_error(*errno as i32);
    }
    match source.and_then(|s| s.downcast_ref::<io::Error>()) {
        Some(io_err) => match io_err.raw_os_error() {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(io_err.kind(), io_err.to_string()),
        },
        None => io::Error::other(err.to_string()),
    }
}

fn cdev_error(pin: Option<u32>, context: String, err: gpio_cdev::Error) -> GpioError {
    let source = cdev_io_error(&err);
    match (pin, source.raw_os_error()) {
        (Some(pin), Some(libc::EBUSY)) => {
            GpioError::not_available(pin, format!("{} failed: line is in use", context))
        }
        _ => GpioError::native(context, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_flags() {
        assert_eq!(
            event_flags(PinEventTypes::Rising).bits(),
            EventRequestFlags::RISING_EDGE.bits()
        );
        assert_eq!(
            event_flags(PinEventTypes::Falling).bits(),
            EventRequestFlags::FALLING_EDGE.bits()
        );
        assert_eq!(
            event_flags(PinEventTypes::Both).bits(),
            EventRequestFlags::BOTH_EDGES.bits()
        );
    }

    #[test]
    fn test_request_flags_carry_bias() {
        assert_eq!(request_flags(PinMode::Input).bits(), 1);
        assert_eq!(request_flags(PinMode::Output).bits(), 1 << 1);
        assert_eq!(request_flags(PinMode::InputPullUp).bits(), 1 | (1 << 5));
        assert_eq!(request_flags(PinMode::InputPullDown).bits(), 1 | (1 << 6));
    }

    #[test]
    fn test_errno_survives_conversion() {
        let busy = gpio_cdev::Error::from(io::Error::from_raw_os_error(libc::EBUSY));
        match cdev_error(Some(17), "request line 17".into(), busy) {
            GpioError::PinNotAvailable { pin, .. } => assert_eq!(pin, 17),
            other => panic!("unexpected error: {}", other),
        }

        let denied = gpio_cdev::Error::from(io::Error::from_raw_os_error(libc::EACCES));
        let err = cdev_error(None, "open /dev/gpiochip0".into(), denied);
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert!(err.to_string().contains("open /dev/gpiochip0"));
    }

    #[test]
    fn test_missing_chip_is_platform_error() {
        let config = DriverConfig {
            chip_path: Some("/dev/gpiochip-devio-missing".into()),
            ..DriverConfig::character_device(0)
        };
        assert!(!CharacterDeviceDriver::is_available(&config));
        match CharacterDeviceDriver::new(&config) {
            Err(err) => assert!(err.is_platform_not_supported()),
            Ok(_) => panic!("opened a chip that does not exist"),
        }
    }
}
