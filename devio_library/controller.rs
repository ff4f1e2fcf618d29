//! GPIO controller
//!
//! [`GpioController`] is the public entry point. It owns one [`GpioDriver`],
//! tracks which pins are open and in which mode, translates board numbers to
//! logical numbers once at the boundary, and fans value-changed events out to
//! subscribers.
//!
//! Every method takes `&self`; the controller can be shared between threads
//! behind an `Arc`.
//!
//! # Example
//!
//! ```rust
//! use devio_core::{NumberingScheme, PinMode, PinValue};
//! use devio_library::{GpioController, GpioDriver};
//!
//! let (driver, _sim) = GpioDriver::simulation();
//! let controller = GpioController::new(NumberingScheme::Logical, driver)?;
//!
//! controller.open_pin(4, PinMode::Output)?;
//! controller.write(4, PinValue::High)?;
//! assert_eq!(controller.read(4)?, PinValue::High);
//! controller.close_pin(4)?;
//! # Ok::<(), devio_core::GpioError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use parking_lot::Mutex;

use devio_core::driver::{ControllerConfig, DriverConfig, DriverKind, DriverStatus};
use devio_core::error::{GpioError, GpioResult};
use devio_core::events::{EventSink, PinChangeCallback, SubscriberRegistry, SubscriptionId};
use devio_core::pin::{
    NumberingScheme, PinEventTypes, PinMode, PinValue, PinValueChangedEvent, PinValuePair,
    WaitForEventResult,
};

use crate::drivers::{factory, GpioDriver};

/// Book-keeping for one open pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenPinRecord {
    /// Pin number in the controller's scheme
    pub pin: u32,
    /// Number handed to the driver
    pub logical_pin: u32,
    pub mode: PinMode,
    /// Edge detection is armed in the driver
    pub armed: bool,
}

struct ControllerState {
    /// `None` once disposed
    driver: Option<GpioDriver>,
    open_pins: HashMap<u32, OpenPinRecord>,
}

impl ControllerState {
    fn driver(&mut self) -> GpioResult<&mut GpioDriver> {
        self.driver.as_mut().ok_or(GpioError::Disposed)
    }

    fn record(&self, pin: u32) -> GpioResult<OpenPinRecord> {
        if self.driver.is_none() {
            return Err(GpioError::Disposed);
        }
        self.open_pins
            .get(&pin)
            .copied()
            .ok_or(GpioError::PinNotOpened(pin))
    }
}

/// GPIO controller
pub struct GpioController {
    numbering: NumberingScheme,
    kind: DriverKind,
    state: Mutex<ControllerState>,
    subscribers: EventSink,
}

impl GpioController {
    /// Controller over an already constructed driver.
    ///
    /// Fails with `PlatformNotSupported` when `Board` numbering is requested
    /// from a driver that has no header layout.
    pub fn new(numbering: NumberingScheme, driver: GpioDriver) -> GpioResult<Self> {
        if numbering == NumberingScheme::Board && !driver.has_board_layout() {
            return Err(GpioError::platform(format!(
                "The {} driver has no board layout; use logical numbering",
                driver.kind()
            )));
        }

        let kind = driver.kind();
        log::info!(
            "GPIO controller created ({} driver, {:?} numbering)",
            kind,
            numbering
        );
        Ok(Self {
            numbering,
            kind,
            state: Mutex::new(ControllerState {
                driver: Some(driver),
                open_pins: HashMap::new(),
            }),
            subscribers: Arc::new(SubscriberRegistry::new()),
        })
    }

    /// Controller with the backend described by `config`
    pub fn from_config(config: &ControllerConfig) -> GpioResult<Self> {
        let driver = factory::create_driver(&config.driver)?;
        Self::new(config.numbering, driver)
    }

    /// Controller with the fastest backend available on this host
    pub fn with_best_driver(numbering: NumberingScheme) -> GpioResult<Self> {
        let config =
            ControllerConfig::new(numbering, DriverConfig::new(factory::best_driver_for_board()));
        Self::from_config(&config)
    }

    pub fn numbering_scheme(&self) -> NumberingScheme {
        self.numbering
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.kind
    }

    pub fn driver_status(&self) -> DriverStatus {
        match &self.state.lock().driver {
            Some(driver) => driver.status(),
            None => DriverStatus::Shutdown,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().driver.is_none()
    }

    /// Number of pins the driver exposes
    pub fn pin_count(&self) -> GpioResult<u32> {
        Ok(self.state.lock().driver()?.pin_count())
    }

    fn to_logical(&self, driver: &GpioDriver, pin: u32) -> GpioResult<u32> {
        match self.numbering {
            NumberingScheme::Logical => Ok(pin),
            NumberingScheme::Board => driver.convert_to_logical(pin),
        }
    }

    // ========================================================================
    // Pin lifetime
    // ========================================================================

    pub fn open_pin(&self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.open(pin, mode, None)
    }

    /// Open a pin and drive `value` on it before it is first used
    pub fn open_pin_with_value(&self, pin: u32, mode: PinMode, value: PinValue) -> GpioResult<()> {
        self.open(pin, mode, Some(value))
    }

    fn open(&self, pin: u32, mode: PinMode, initial: Option<PinValue>) -> GpioResult<()> {
        let mut state = self.state.lock();
        let driver = state.driver()?;
        let logical_pin = self.to_logical(driver, pin)?;
        if state.open_pins.contains_key(&pin) {
            return Err(GpioError::PinAlreadyOpen(pin));
        }

        state.driver()?.open_pin(logical_pin, mode, initial)?;

        state.open_pins.insert(
            pin,
            OpenPinRecord {
                pin,
                logical_pin,
                mode,
                armed: false,
            },
        );
        log::debug!("Pin {} (logical {}) opened as {}", pin, logical_pin, mode);
        Ok(())
    }

    /// Close an open pin, dropping its subscriptions.
    ///
    /// Fails with `PinNotOpened` if the pin is not open.
    pub fn close_pin(&self, pin: u32) -> GpioResult<()> {
        let mut state = self.state.lock();
        let record = state.record(pin)?;
        state.open_pins.remove(&pin);
        self.subscribers.remove_pin(record.logical_pin);

        let driver = state.driver()?;
        if record.armed {
            if let Err(e) =
                driver.set_pin_events_to_detect(record.logical_pin, PinEventTypes::None, &self.subscribers)
            {
                log::warn!("Failed to disarm pin {} while closing: {}", pin, e);
            }
        }
        driver.close_pin(record.logical_pin)?;
        log::debug!("Pin {} closed", pin);
        Ok(())
    }

    pub fn is_pin_open(&self, pin: u32) -> bool {
        self.state.lock().open_pins.contains_key(&pin)
    }

    /// Snapshot of every open pin, ordered by pin number
    pub fn open_pins(&self) -> Vec<OpenPinRecord> {
        let mut records: Vec<_> = self.state.lock().open_pins.values().copied().collect();
        records.sort_by_key(|record| record.pin);
        records
    }

    /// Mode the pin was opened with
    pub fn get_pin_mode(&self, pin: u32) -> GpioResult<PinMode> {
        Ok(self.state.lock().record(pin)?.mode)
    }

    pub fn is_pin_mode_supported(&self, pin: u32, mode: PinMode) -> GpioResult<bool> {
        let mut state = self.state.lock();
        let driver = state.driver()?;
        let logical_pin = self.to_logical(driver, pin)?;
        Ok(driver.is_pin_mode_supported(logical_pin, mode))
    }

    // ========================================================================
    // Reading and writing
    // ========================================================================

    pub fn read(&self, pin: u32) -> GpioResult<PinValue> {
        let mut state = self.state.lock();
        let record = state.record(pin)?;
        state.driver()?.read(record.logical_pin)
    }

    /// Drive an output pin; fails with `InvalidOperation` on an input pin
    pub fn write(&self, pin: u32, value: PinValue) -> GpioResult<()> {
        let mut state = self.state.lock();
        Self::write_locked(&mut state, pin, value)
    }

    fn write_locked(state: &mut ControllerState, pin: u32, value: PinValue) -> GpioResult<()> {
        let record = state.record(pin)?;
        if record.mode != PinMode::Output {
            return Err(GpioError::invalid_operation(format!(
                "Pin {} is opened as {} and cannot be written",
                pin, record.mode
            )));
        }
        state.driver()?.write(record.logical_pin, value)
    }

    /// Invert an output pin, returning the new level
    pub fn toggle(&self, pin: u32) -> GpioResult<PinValue> {
        let mut state = self.state.lock();
        let record = state.record(pin)?;
        let next = !state.driver()?.read(record.logical_pin)?;
        Self::write_locked(&mut state, pin, next)?;
        Ok(next)
    }

    /// Write several pins under one lock; stops at the first failure
    pub fn write_many(&self, values: &[PinValuePair]) -> GpioResult<()> {
        let mut state = self.state.lock();
        for pair in values {
            Self::write_locked(&mut state, pair.pin, pair.value)?;
        }
        Ok(())
    }

    /// Fill in the `value` of every pair from its pin
    pub fn read_many(&self, values: &mut [PinValuePair]) -> GpioResult<()> {
        let mut state = self.state.lock();
        for pair in values.iter_mut() {
            let record = state.record(pair.pin)?;
            pair.value = state.driver()?.read(record.logical_pin)?;
        }
        Ok(())
    }

    // ========================================================================
    // Value-changed events
    // ========================================================================

    /// Subscribe `callback` to edges of an open pin.
    ///
    /// The driver is armed for both edges when the pin gets its first
    /// subscription; each subscription only sees the edges in its own mask.
    /// Callbacks run on the driver's monitor thread.
    pub fn register_callback_for_pin_value_changed_event<F>(
        &self,
        pin: u32,
        event_types: PinEventTypes,
        callback: F,
    ) -> GpioResult<SubscriptionId>
    where
        F: Fn(&PinValueChangedEvent) + Send + Sync + 'static,
    {
        if event_types.is_none() {
            return Err(GpioError::invalid_argument(
                "A subscription needs at least one edge",
            ));
        }

        let mut state = self.state.lock();
        let record = state.record(pin)?;
        let callback: PinChangeCallback = Arc::new(callback);
        let (id, first) =
            self.subscribers
                .subscribe(record.logical_pin, pin, event_types, callback);

        if first && !record.armed {
            let armed = state.driver()?.set_pin_events_to_detect(
                record.logical_pin,
                PinEventTypes::Both,
                &self.subscribers,
            );
            if let Err(e) = armed {
                self.subscribers.unsubscribe(record.logical_pin, id);
                return Err(e);
            }
            if let Some(entry) = state.open_pins.get_mut(&pin) {
                entry.armed = true;
            }
            log::debug!("Pin {} armed for value-changed events", pin);
        }
        Ok(id)
    }

    /// Remove one subscription; the last one for a pin disarms the driver
    pub fn unregister_callback_for_pin_value_changed_event(
        &self,
        pin: u32,
        subscription: SubscriptionId,
    ) -> GpioResult<()> {
        let mut state = self.state.lock();
        let record = state.record(pin)?;
        let last = self
            .subscribers
            .unsubscribe(record.logical_pin, subscription)
            .ok_or_else(|| {
                GpioError::invalid_argument(format!(
                    "Subscription {} is not registered on pin {}",
                    subscription, pin
                ))
            })?;

        if last && record.armed {
            state.driver()?.set_pin_events_to_detect(
                record.logical_pin,
                PinEventTypes::None,
                &self.subscribers,
            )?;
            if let Some(entry) = state.open_pins.get_mut(&pin) {
                entry.armed = false;
            }
            log::debug!("Pin {} disarmed", pin);
        }
        Ok(())
    }

    /// Block until an edge in `event_types` occurs on `pin` or `timeout` passes
    pub fn wait_for_event(
        &self,
        pin: u32,
        event_types: PinEventTypes,
        timeout: Duration,
    ) -> GpioResult<WaitForEventResult> {
        let (tx, rx) = channel::bounded(1);
        let id = self.register_callback_for_pin_value_changed_event(
            pin,
            event_types,
            move |event| {
                let _ = tx.try_send(event.change_type);
            },
        )?;

        let result = match rx.recv_timeout(timeout) {
            Ok(edge) => WaitForEventResult {
                timed_out: false,
                event_types: edge,
            },
            Err(_) => WaitForEventResult::timeout(),
        };

        match self.unregister_callback_for_pin_value_changed_event(pin, id) {
            // Closed or disposed while we were waiting; the subscription is gone.
            Err(GpioError::PinNotOpened(_)) | Err(GpioError::Disposed) => Ok(result),
            Err(e) => Err(e),
            Ok(()) => Ok(result),
        }
    }

    // ========================================================================
    // Disposal
    // ========================================================================

    /// Close every pin and release the driver.
    ///
    /// Teardown continues past individual failures and the first one is
    /// returned. A second call does nothing.
    pub fn dispose(&self) -> GpioResult<()> {
        let (driver, records) = {
            let mut state = self.state.lock();
            let Some(driver) = state.driver.take() else {
                return Ok(());
            };
            let records: Vec<OpenPinRecord> = state.open_pins.drain().map(|(_, r)| r).collect();
            (driver, records)
        };
        self.subscribers.clear();

        // The lock is released so callbacks still running can fail fast
        // instead of deadlocking against the monitor join below.
        let mut driver = driver;
        let mut result = Ok(());
        for record in &records {
            let released = if record.armed {
                driver
                    .set_pin_events_to_detect(record.logical_pin, PinEventTypes::None, &self.subscribers)
                    .and_then(|_| driver.close_pin(record.logical_pin))
            } else {
                driver.close_pin(record.logical_pin)
            };
            if let Err(e) = released {
                log::warn!("Failed to release pin {}: {}", record.pin, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if let Err(e) = driver.dispose() {
            log::warn!("Failed to dispose {} driver: {}", self.kind, e);
            if result.is_ok() {
                result = Err(e);
            }
        }

        log::info!(
            "GPIO controller disposed ({} pins released)",
            records.len()
        );
        result
    }
}

impl Drop for GpioController {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("GPIO controller teardown failed: {}", e);
        }
    }
}

impl fmt::Debug for GpioController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioController")
            .field("numbering", &self.numbering)
            .field("driver", &self.kind)
            .field("open_pins", &self.open_pins().len())
            .finish()
    }
}
