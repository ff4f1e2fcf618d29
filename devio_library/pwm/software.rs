//! Software PWM channel
//!
//! One named thread per running channel drives the pin high for
//! `period * duty_cycle` and low for the rest of the period. Frequency and
//! duty-cycle changes are picked up at the start of the next period.
//!
//! Timing is best effort: jitter is whatever the host scheduler gives.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use devio_core::error::{GpioError, GpioResult};
use devio_core::pin::{PinMode, PinValue};

use crate::controller::GpioController;

/// Channel state
/// Shortest period the loop can drive (100 kHz)
const MIN_PERIOD: Duration = Duration::from_micros(10);
/// Longest period accepted (one hour)
const MAX_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy)]
struct PwmSettings {
    frequency: f64,
    duty_cycle: f64,
    running: bool,
}

impl PwmSettings {
    /// (high, low) durations of one period
    fn timing(&self) -> (Duration, Duration) {
        let period = period_of(self.frequency).unwrap_or(MIN_PERIOD);
        let high = period.mul_f64(self.duty_cycle);
        (high, period.saturating_sub(high))
    }
}

struct PwmShared {
    settings: Mutex<PwmSettings>,
    wake: Condvar,
}

impl PwmShared {
    fn is_running(&self) -> bool {
        self.settings.lock().running
    }

    /// Sleep for `duration` unless stopped first; returns whether still running
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut settings = self.settings.lock();
        while settings.running {
            if self.wake.wait_until(&mut settings, deadline).timed_out() {
                return settings.running;
            }
        }
        false
    }

    fn halt(&self) {
        self.settings.lock().running = false;
        self.wake.notify_all();
    }
}

/// Period of `frequency`, `None` outside `MIN_PERIOD..=MAX_PERIOD`
fn period_of(frequency: f64) -> Option<Duration> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / frequency)
        .ok()
        .filter(|period| (MIN_PERIOD..=MAX_PERIOD).contains(period))
}

fn validate_frequency(frequency: f64) -> GpioResult<()> {
    if period_of(frequency).is_none() {
        return Err(GpioError::invalid_argument(format!(
            "PWM frequency must be within {} Hz..={} Hz, got {}",
            1.0 / MAX_PERIOD.as_secs_f64(),
            1.0 / MIN_PERIOD.as_secs_f64(),
            frequency
        )));
    }
    Ok(())
}

fn validate_duty_cycle(duty_cycle: f64) -> GpioResult<()> {
    if !(0.0..=1.0).contains(&duty_cycle) {
        return Err(GpioError::invalid_argument(format!(
            "PWM duty cycle must be within 0.0..=1.0, got {}",
            duty_cycle
        )));
    }
    Ok(())
}

/// PWM waveform on a controller output pin
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use devio_core::NumberingScheme;
/// use devio_library::{GpioController, GpioDriver, SoftwarePwmChannel};
///
/// let (driver, _sim) = GpioDriver::simulation();
/// let gpio = Arc::new(GpioController::new(NumberingScheme::Logical, driver)?);
///
/// let mut led = SoftwarePwmChannel::new(Arc::clone(&gpio), 18, 100.0, 0.25)?;
/// led.start()?;
/// led.set_duty_cycle(0.75)?;
/// led.stop()?;
/// # Ok::<(), devio_core::GpioError>(())
/// ```
pub struct SoftwarePwmChannel {
    controller: Arc<GpioController>,
    pin: u32,
    /// The channel opened the pin and closes it on drop
    owns_pin: bool,
    shared: Arc<PwmShared>,
    worker: Option<JoinHandle<()>>,
}

impl SoftwarePwmChannel {
    /// Channel on `pin`, opened as a low output if it is not open yet.
    ///
    /// A pin that is already open must be an output.
    pub fn new(
        controller: Arc<GpioController>,
        pin: u32,
        frequency: f64,
        duty_cycle: f64,
    ) -> GpioResult<Self> {
        validate_frequency(frequency)?;
        validate_duty_cycle(duty_cycle)?;

        let owns_pin = !controller.is_pin_open(pin);
        if owns_pin {
            controller.open_pin_with_value(pin, PinMode::Output, PinValue::Low)?;
        } else if controller.get_pin_mode(pin)? != PinMode::Output {
            return Err(GpioError::invalid_operation(format!(
                "PWM needs pin {} opened as Output",
                pin
            )));
        }

        Ok(Self {
            controller,
            pin,
            owns_pin,
            shared: Arc::new(PwmShared {
                settings: Mutex::new(PwmSettings {
                    frequency,
                    duty_cycle,
                    running: false,
                }),
                wake: Condvar::new(),
            }),
            worker: None,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn frequency(&self) -> f64 {
        self.shared.settings.lock().frequency
    }

    pub fn duty_cycle(&self) -> f64 {
        self.shared.settings.lock().duty_cycle
    }

    /// `Stopped` also after the loop gave up on a failed write
    pub fn state(&self) -> PwmState {
        let alive = self
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished());
        if alive && self.shared.is_running() {
            PwmState::Running
        } else {
            PwmState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PwmState::Running
    }

    /// Frequency in hertz, applied from the next period
    pub fn set_frequency(&self, frequency: f64) -> GpioResult<()> {
        validate_frequency(frequency)?;
        self.shared.settings.lock().frequency = frequency;
        Ok(())
    }

    /// Fraction of the period spent high, applied from the next period
    pub fn set_duty_cycle(&self, duty_cycle: f64) -> GpioResult<()> {
        validate_duty_cycle(duty_cycle)?;
        self.shared.settings.lock().duty_cycle = duty_cycle;
        Ok(())
    }

    /// `Stopped -> Running`; does nothing while already running
    pub fn start(&mut self) -> GpioResult<()> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a loop that ended on its own.
        self.join_worker();

        self.shared.settings.lock().running = true;
        let controller = Arc::clone(&self.controller);
        let shared = Arc::clone(&self.shared);
        let pin = self.pin;
        let spawned = thread::Builder::new()
            .name(format!("devio-pwm-{}", pin))
            .spawn(move || run_pwm(&controller, pin, &shared));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::debug!("Software PWM started on pin {}", pin);
                Ok(())
            }
            Err(e) => {
                self.shared.settings.lock().running = false;
                Err(e.into())
            }
        }
    }

    /// `Running -> Stopped`, leaving the pin low
    pub fn stop(&mut self) -> GpioResult<()> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.shared.halt();
        self.join_worker();
        log::debug!("Software PWM stopped on pin {}", self.pin);
        self.controller.write(self.pin, PinValue::Low)
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Software PWM thread for pin {} panicked", self.pin);
            }
        }
    }
}

fn run_pwm(controller: &GpioController, pin: u32, shared: &PwmShared) {
    loop {
        let (high, low) = {
            let settings = shared.settings.lock();
            if !settings.running {
                return;
            }
            settings.timing()
        };

        for (value, duration) in [(PinValue::High, high), (PinValue::Low, low)] {
            if duration.is_zero() {
                continue;
            }
            if let Err(e) = controller.write(pin, value) {
                log::error!("Software PWM on pin {} stopped: {}", pin, e);
                shared.halt();
                return;
            }
            if !shared.sleep(duration) {
                return;
            }
        }
    }
}

impl Drop for SoftwarePwmChannel {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Failed to stop software PWM on pin {}: {}", self.pin, e);
        }
        if self.owns_pin {
            match self.controller.close_pin(self.pin) {
                Ok(()) | Err(GpioError::PinNotOpened(_)) | Err(GpioError::Disposed) => {}
                Err(e) => log::warn!("Failed to release PWM pin {}: {}", self.pin, e),
            }
        }
    }
}

impl std::fmt::Debug for SoftwarePwmChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settings = *self.shared.settings.lock();
        f.debug_struct("SoftwarePwmChannel")
            .field("pin", &self.pin)
            .field("frequency", &settings.frequency)
            .field("duty_cycle", &settings.duty_cycle)
            .field("state", &self.state())
            .finish()
    }
}
