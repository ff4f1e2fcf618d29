//! Simulation GPIO driver
//!
//! An in-memory pin bank. Tests drive input levels through a
//! [`SimulationHandle`] and observe writes, arming and open pins. Level changes
//! on armed pins are queued to the driver's own monitor thread, which delivers
//! them to subscribers the same way the kernel-backed drivers do.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use devio_core::driver::DriverStatus;
use devio_core::error::{GpioError, GpioResult};
use devio_core::events::EventSink;
use devio_core::pin::{PinEventTypes, PinMode, PinValue};

use crate::board;

/// Default bank size, matching the Raspberry Pi header
pub const DEFAULT_SIMULATED_PINS: u32 = board::RASPBERRY_PI_PIN_COUNT;

/// Board → logical translation for a simulated board
pub type BoardConverter = Arc<dyn Fn(u32) -> GpioResult<u32> + Send + Sync>;

enum SimMessage {
    Edge { pin: u32, edge: PinEventTypes },
    Shutdown,
}

struct SimState {
    pin_count: u32,
    levels: Vec<PinValue>,
    modes: HashMap<u32, PinMode>,
    armed: HashMap<u32, PinEventTypes>,
    write_counts: HashMap<u32, usize>,
    arm_counts: HashMap<u32, usize>,
    close_counts: HashMap<u32, usize>,
    /// errno returned by the next `close_pin` of a pin
    close_failures: HashMap<u32, i32>,
    events: Option<Sender<SimMessage>>,
}

impl SimState {
    fn check_pin(&self, pin: u32) -> GpioResult<usize> {
        if pin < self.pin_count {
            Ok(pin as usize)
        } else {
            Err(GpioError::invalid_argument(format!(
                "Pin {} is outside the simulated bank of {} pins",
                pin, self.pin_count
            )))
        }
    }

    /// Store a level and queue an edge if an armed pin changed
    fn set_level(&mut self, pin: u32, value: PinValue) -> GpioResult<()> {
        let index = self.check_pin(pin)?;
        let previous = std::mem::replace(&mut self.levels[index], value);
        if previous == value {
            return Ok(());
        }

        let edge = PinEventTypes::edge_to(value);
        let armed = self.armed.get(&pin).copied().unwrap_or_default();
        if armed.contains(edge) {
            if let Some(tx) = &self.events {
                // The receiver only disappears during disposal.
                let _ = tx.send(SimMessage::Edge { pin, edge });
            }
        }
        Ok(())
    }
}

/// Simulation GPIO driver
pub struct SimulationDriver {
    state: Arc<Mutex<SimState>>,
    converter: BoardConverter,
    status: DriverStatus,
    monitor: Option<JoinHandle<()>>,
}

impl SimulationDriver {
    /// Bank of `pin_count` pins using the Raspberry Pi header for board numbers
    pub fn new(pin_count: u32) -> Self {
        Self::with_converter(pin_count, Arc::new(board::raspberry_pi_board_to_logical))
    }

    pub fn with_converter(pin_count: u32, converter: BoardConverter) -> Self {
        log::info!("Simulation GPIO driver created with {} pins", pin_count);
        Self {
            state: Arc::new(Mutex::new(SimState {
                pin_count,
                levels: vec![PinValue::Low; pin_count as usize],
                modes: HashMap::new(),
                armed: HashMap::new(),
                write_counts: HashMap::new(),
                arm_counts: HashMap::new(),
                close_counts: HashMap::new(),
                close_failures: HashMap::new(),
                events: None,
            })),
            converter,
            status: DriverStatus::Ready,
            monitor: None,
        }
    }

    /// Handle for driving and inspecting the bank from tests
    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    pub fn pin_count(&self) -> u32 {
        self.state.lock().pin_count
    }

    pub fn convert_to_logical(&self, board_pin: u32) -> GpioResult<u32> {
        let logical = (self.converter)(board_pin)?;
        self.state.lock().check_pin(logical)?;
        Ok(logical)
    }

    pub fn is_pin_mode_supported(&self, _pin: u32, mode: PinMode) -> bool {
        matches!(mode, PinMode::Input | PinMode::Output)
    }

    pub fn open_pin(
        &mut self,
        pin: u32,
        mode: PinMode,
        initial: Option<PinValue>,
    ) -> GpioResult<()> {
        self.ensure_active()?;
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        if state.modes.contains_key(&pin) {
            return Err(GpioError::PinAlreadyOpen(pin));
        }
        if !self.is_pin_mode_supported(pin, mode) {
            return Err(GpioError::InvalidPinMode { pin, mode });
        }
        state.modes.insert(pin, mode);
        if let (PinMode::Output, Some(value)) = (mode, initial) {
            state.set_level(pin, value)?;
        }
        Ok(())
    }

    pub fn close_pin(&mut self, pin: u32) -> GpioResult<()> {
        let mut state = self.state.lock();
        if let Some(errno) = state.close_failures.remove(&pin) {
            return Err(GpioError::native(
                format!("close simulated pin {}", pin),
                io::Error::from_raw_os_error(errno),
            ));
        }
        if state.modes.contains_key(&pin) {
            *state.close_counts.entry(pin).or_insert(0) += 1;
        }
        state.armed.remove(&pin);
        state.modes.remove(&pin);
        Ok(())
    }

    pub fn set_pin_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.ensure_active()?;
        if !self.is_pin_mode_supported(pin, mode) {
            return Err(GpioError::InvalidPinMode { pin, mode });
        }
        let mut state = self.state.lock();
        match state.modes.get_mut(&pin) {
            Some(current) => {
                *current = mode;
                Ok(())
            }
            None => Err(GpioError::PinNotOpened(pin)),
        }
    }

    pub fn get_pin_mode(&self, pin: u32) -> GpioResult<PinMode> {
        self.state
            .lock()
            .modes
            .get(&pin)
            .copied()
            .ok_or(GpioError::PinNotOpened(pin))
    }

    pub fn read(&self, pin: u32) -> GpioResult<PinValue> {
        let state = self.state.lock();
        if !state.modes.contains_key(&pin) {
            return Err(GpioError::PinNotOpened(pin));
        }
        let index = state.check_pin(pin)?;
        Ok(state.levels[index])
    }

    pub fn write(&mut self, pin: u32, value: PinValue) -> GpioResult<()> {
        self.ensure_active()?;
        let mut state = self.state.lock();
        match state.modes.get(&pin) {
            Some(PinMode::Output) => {}
            Some(mode) => {
                return Err(GpioError::invalid_operation(format!(
                    "Pin {} is opened as {} and cannot be written",
                    pin, mode
                )))
            }
            None => return Err(GpioError::PinNotOpened(pin)),
        }
        *state.write_counts.entry(pin).or_insert(0) += 1;
        state.set_level(pin, value)
    }

    pub fn set_pin_events_to_detect(
        &mut self,
        pin: u32,
        edges: PinEventTypes,
        sink: &EventSink,
    ) -> GpioResult<()> {
        self.ensure_active()?;
        if edges.is_none() {
            self.state.lock().armed.remove(&pin);
            return Ok(());
        }

        {
            let state = self.state.lock();
            if !state.modes.contains_key(&pin) {
                return Err(GpioError::PinNotOpened(pin));
            }
        }
        self.ensure_monitor(sink)?;

        let mut state = self.state.lock();
        state.armed.insert(pin, edges);
        *state.arm_counts.entry(pin).or_insert(0) += 1;
        self.status = DriverStatus::Running;
        log::debug!("Simulated pin {} armed for {} edges", pin, edges);
        Ok(())
    }

    fn ensure_monitor(&mut self, sink: &EventSink) -> GpioResult<()> {
        if self.monitor.is_some() {
            return Ok(());
        }

        let (tx, rx) = channel::unbounded();
        let sink = Arc::clone(sink);
        let handle = thread::Builder::new()
            .name("devio-sim-events".to_string())
            .spawn(move || run_events(rx, sink))
            .map_err(|e| GpioError::native("spawn simulation monitor", e))?;

        self.state.lock().events = Some(tx);
        self.monitor = Some(handle);
        Ok(())
    }

    fn ensure_active(&self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Err(GpioError::Disposed);
        }
        Ok(())
    }

    /// Close every pin and stop the monitor thread
    pub fn dispose(&mut self) -> GpioResult<()> {
        if self.status == DriverStatus::Shutdown {
            return Ok(());
        }

        let sender = {
            let mut state = self.state.lock();
            state.modes.clear();
            state.armed.clear();
            state.events.take()
        };
        if let Some(tx) = sender {
            let _ = tx.send(SimMessage::Shutdown);
        }
        if let Some(handle) = self.monitor.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("Simulation monitor thread panicked");
            }
        }

        self.status = DriverStatus::Shutdown;
        log::info!("Simulation GPIO driver disposed");
        Ok(())
    }
}

impl Default for SimulationDriver {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_PINS)
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("Simulation GPIO driver teardown failed: {}", e);
        }
    }
}

impl fmt::Debug for SimulationDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationDriver")
            .field("pin_count", &self.pin_count())
            .field("status", &self.status)
            .finish()
    }
}

fn run_events(rx: Receiver<SimMessage>, sink: EventSink) {
    while let Ok(message) = rx.recv() {
        match message {
            SimMessage::Edge { pin, edge } => {
                sink.dispatch(pin, edge);
            }
            SimMessage::Shutdown => break,
        }
    }
    log::debug!("Simulation monitor thread exiting");
}

/// Test-side view of a [`SimulationDriver`]'s pin bank
#[derive(Clone)]
pub struct SimulationHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulationHandle {
    /// Drive a pin from the outside, as wiring or a sensor would
    pub fn set_input(&self, pin: u32, value: PinValue) -> GpioResult<()> {
        self.state.lock().set_level(pin, value)
    }

    pub fn level(&self, pin: u32) -> Option<PinValue> {
        self.state.lock().levels.get(pin as usize).copied()
    }

    /// Number of writes the driver accepted for `pin`
    pub fn write_count(&self, pin: u32) -> usize {
        self.state.lock().write_counts.get(&pin).copied().unwrap_or(0)
    }

    /// Number of times `pin` was armed for edge detection
    pub fn arm_count(&self, pin: u32) -> usize {
        self.state.lock().arm_counts.get(&pin).copied().unwrap_or(0)
    }

    /// Number of times an open `pin` was released through `close_pin`
    pub fn close_count(&self, pin: u32) -> usize {
        self.state.lock().close_counts.get(&pin).copied().unwrap_or(0)
    }

    /// Make the next `close_pin` of `pin` fail with `errno`
    pub fn fail_close(&self, pin: u32, errno: i32) {
        self.state.lock().close_failures.insert(pin, errno);
    }

    pub fn is_armed(&self, pin: u32) -> bool {
        self.state.lock().armed.contains_key(&pin)
    }

    pub fn is_open(&self, pin: u32) -> bool {
        self.state.lock().modes.contains_key(&pin)
    }

    /// Logical numbers of every open pin, ascending
    pub fn open_pins(&self) -> Vec<u32> {
        let mut pins: Vec<u32> = self.state.lock().modes.keys().copied().collect();
        pins.sort_unstable();
        pins
    }
}

impl fmt::Debug for SimulationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationHandle")
            .field("open_pins", &self.open_pins())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devio_core::events::SubscriberRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_open_write_read() {
        let mut driver = SimulationDriver::new(8);
        driver.open_pin(3, PinMode::Output, Some(PinValue::High)).unwrap();
        assert_eq!(driver.read(3).unwrap(), PinValue::High);

        driver.write(3, PinValue::Low).unwrap();
        assert_eq!(driver.read(3).unwrap(), PinValue::Low);
        assert_eq!(driver.handle().write_count(3), 1);
    }

    #[test]
    fn test_pull_modes_unsupported() {
        let mut driver = SimulationDriver::new(8);
        let err = driver.open_pin(1, PinMode::InputPullUp, None).unwrap_err();
        assert!(matches!(err, GpioError::InvalidPinMode { pin: 1, .. }));
        assert!(!driver.is_pin_mode_supported(1, PinMode::InputPullDown));
    }

    #[test]
    fn test_out_of_range_pin() {
        let mut driver = SimulationDriver::new(4);
        assert!(matches!(
            driver.open_pin(4, PinMode::Input, None),
            Err(GpioError::InvalidArgument(_))
        ));
        assert!(driver.handle().set_input(9, PinValue::High).is_err());
    }

    #[test]
    fn test_write_to_input_is_invalid() {
        let mut driver = SimulationDriver::new(4);
        driver.open_pin(0, PinMode::Input, None).unwrap();
        assert!(matches!(
            driver.write(0, PinValue::High),
            Err(GpioError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_set_pin_mode_requires_open_pin() {
        let mut driver = SimulationDriver::new(4);
        assert!(driver.set_pin_mode(2, PinMode::Output).is_err());
        driver.open_pin(2, PinMode::Input, None).unwrap();
        driver.set_pin_mode(2, PinMode::Output).unwrap();
        assert_eq!(driver.get_pin_mode(2).unwrap(), PinMode::Output);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut driver = SimulationDriver::new(4);
        driver.open_pin(1, PinMode::Input, None).unwrap();
        driver.close_pin(1).unwrap();
        driver.close_pin(1).unwrap();
        driver.open_pin(1, PinMode::Input, None).unwrap();
    }

    #[test]
    fn test_injected_close_failure_fires_once() {
        let mut driver = SimulationDriver::new(4);
        let handle = driver.handle();
        driver.open_pin(3, PinMode::Input, None).unwrap();
        handle.fail_close(3, 5);

        let err = driver.close_pin(3).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(5));
        assert!(handle.is_open(3));
        assert_eq!(handle.close_count(3), 0);

        driver.close_pin(3).unwrap();
        assert!(!handle.is_open(3));
        assert_eq!(handle.close_count(3), 1);
    }

    #[test]
    fn test_board_conversion() {
        let driver = SimulationDriver::default();
        assert_eq!(driver.convert_to_logical(7).unwrap(), 4);
        assert!(driver.convert_to_logical(1).is_err());

        let identity =
            SimulationDriver::with_converter(4, Arc::new(|pin: u32| -> GpioResult<u32> { Ok(pin) }));
        assert_eq!(identity.convert_to_logical(2).unwrap(), 2);
        assert!(identity.convert_to_logical(6).is_err());
    }

    #[test]
    fn test_armed_pin_delivers_edges() {
        let registry = Arc::new(SubscriberRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        registry.subscribe(
            2,
            2,
            PinEventTypes::Rising,
            Arc::new(move |_event| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut driver = SimulationDriver::new(4);
        let handle = driver.handle();
        driver.open_pin(2, PinMode::Input, None).unwrap();
        driver
            .set_pin_events_to_detect(2, PinEventTypes::Both, &registry)
            .unwrap();
        assert_eq!(driver.status(), DriverStatus::Running);

        handle.set_input(2, PinValue::High).unwrap();
        handle.set_input(2, PinValue::Low).unwrap();
        handle.set_input(2, PinValue::Low).unwrap();

        // Dispose joins the monitor, so every queued edge is delivered first.
        driver.dispose().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(handle.arm_count(2), 1);
    }

    #[test]
    fn test_disarmed_pin_is_silent() {
        let registry = Arc::new(SubscriberRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        registry.subscribe(
            1,
            1,
            PinEventTypes::Both,
            Arc::new(move |_event| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut driver = SimulationDriver::new(4);
        let handle = driver.handle();
        driver.open_pin(1, PinMode::Input, None).unwrap();
        driver
            .set_pin_events_to_detect(1, PinEventTypes::Both, &registry)
            .unwrap();
        driver
            .set_pin_events_to_detect(1, PinEventTypes::None, &registry)
            .unwrap();
        assert!(!handle.is_armed(1));

        handle.set_input(1, PinValue::High).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        driver.dispose().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispose_closes_pins_once() {
        let mut driver = SimulationDriver::new(4);
        let handle = driver.handle();
        driver.open_pin(0, PinMode::Input, None).unwrap();
        driver.open_pin(1, PinMode::Output, None).unwrap();
        assert_eq!(handle.open_pins(), vec![0, 1]);

        driver.dispose().unwrap();
        assert!(handle.open_pins().is_empty());
        assert_eq!(driver.status(), DriverStatus::Shutdown);
        driver.dispose().unwrap();
        assert!(matches!(
            driver.open_pin(0, PinMode::Input, None),
            Err(GpioError::Disposed)
        ));
    }
}
