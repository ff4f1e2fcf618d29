//! Value-changed event delivery through the controller

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;

use devio_core::{GpioError, NumberingScheme, PinEventTypes, PinMode, PinValue};
use devio_library::{GpioController, GpioDriver, SimulationHandle};

const DELIVERY: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn simulated(numbering: NumberingScheme) -> (GpioController, SimulationHandle) {
    let (driver, sim) = GpioDriver::simulation();
    (GpioController::new(numbering, driver).unwrap(), sim)
}

#[test]
fn test_every_subscriber_sees_an_edge_once() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(23, PinMode::Input).unwrap();

    let (tx, rx) = channel::unbounded();
    let first = tx.clone();
    gpio.register_callback_for_pin_value_changed_event(23, PinEventTypes::Rising, move |e| {
        first.send(("first", e.pin, e.change_type)).unwrap();
    })
    .unwrap();
    gpio.register_callback_for_pin_value_changed_event(23, PinEventTypes::Both, move |e| {
        tx.send(("second", e.pin, e.change_type)).unwrap();
    })
    .unwrap();

    sim.set_input(23, PinValue::High).unwrap();

    let mut seen = vec![
        rx.recv_timeout(DELIVERY).unwrap(),
        rx.recv_timeout(DELIVERY).unwrap(),
    ];
    seen.sort_by_key(|(name, _, _)| *name);
    assert_eq!(
        seen,
        vec![
            ("first", 23, PinEventTypes::Rising),
            ("second", 23, PinEventTypes::Rising),
        ]
    );
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn test_mask_filters_edges() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(24, PinMode::Input).unwrap();

    let (tx, rx) = channel::unbounded();
    gpio.register_callback_for_pin_value_changed_event(24, PinEventTypes::Falling, move |e| {
        tx.send(e.change_type).unwrap();
    })
    .unwrap();

    sim.set_input(24, PinValue::High).unwrap();
    sim.set_input(24, PinValue::Low).unwrap();

    assert_eq!(rx.recv_timeout(DELIVERY).unwrap(), PinEventTypes::Falling);
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn test_backend_armed_once_per_pin() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(16, PinMode::Input).unwrap();

    let a = gpio
        .register_callback_for_pin_value_changed_event(16, PinEventTypes::Rising, |_| {})
        .unwrap();
    let b = gpio
        .register_callback_for_pin_value_changed_event(16, PinEventTypes::Falling, |_| {})
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(sim.arm_count(16), 1);
    assert!(sim.is_armed(16));

    gpio.unregister_callback_for_pin_value_changed_event(16, a)
        .unwrap();
    assert!(sim.is_armed(16));
    gpio.unregister_callback_for_pin_value_changed_event(16, b)
        .unwrap();
    assert!(!sim.is_armed(16));
}

#[test]
fn test_unregistered_callback_is_not_called() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(20, PinMode::Input).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let id = gpio
        .register_callback_for_pin_value_changed_event(20, PinEventTypes::Both, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    gpio.unregister_callback_for_pin_value_changed_event(20, id)
        .unwrap();

    sim.set_input(20, PinValue::High).unwrap();
    thread::sleep(QUIET);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Same id twice is rejected.
    assert!(matches!(
        gpio.unregister_callback_for_pin_value_changed_event(20, id),
        Err(GpioError::InvalidArgument(_))
    ));
}

#[test]
fn test_output_writes_raise_events() {
    let (gpio, _) = simulated(NumberingScheme::Logical);
    gpio.open_pin(21, PinMode::Output).unwrap();

    let (tx, rx) = channel::unbounded();
    gpio.register_callback_for_pin_value_changed_event(21, PinEventTypes::Both, move |e| {
        tx.send(e.change_type).unwrap();
    })
    .unwrap();

    gpio.write(21, PinValue::High).unwrap();
    gpio.write(21, PinValue::Low).unwrap();
    assert_eq!(rx.recv_timeout(DELIVERY).unwrap(), PinEventTypes::Rising);
    assert_eq!(rx.recv_timeout(DELIVERY).unwrap(), PinEventTypes::Falling);
}

#[test]
fn test_board_numbering_reported_to_subscribers() {
    let (gpio, sim) = simulated(NumberingScheme::Board);
    // Header pin 13 is GPIO27.
    gpio.open_pin(13, PinMode::Input).unwrap();

    let (tx, rx) = channel::unbounded();
    gpio.register_callback_for_pin_value_changed_event(13, PinEventTypes::Both, move |e| {
        tx.send(e.pin).unwrap();
    })
    .unwrap();

    sim.set_input(27, PinValue::High).unwrap();
    assert_eq!(rx.recv_timeout(DELIVERY).unwrap(), 13);
}

#[test]
fn test_close_pin_drops_subscriptions() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(25, PinMode::Input).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    gpio.register_callback_for_pin_value_changed_event(25, PinEventTypes::Both, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    gpio.close_pin(25).unwrap();
    assert!(!sim.is_armed(25));
    sim.set_input(25, PinValue::High).unwrap();
    thread::sleep(QUIET);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_panicking_callback_does_not_stop_delivery() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(26, PinMode::Input).unwrap();

    let (tx, rx) = channel::unbounded();
    gpio.register_callback_for_pin_value_changed_event(26, PinEventTypes::Rising, |_| {
        panic!("subscriber failure")
    })
    .unwrap();
    gpio.register_callback_for_pin_value_changed_event(26, PinEventTypes::Both, move |e| {
        tx.send(e.change_type).unwrap();
    })
    .unwrap();

    sim.set_input(26, PinValue::High).unwrap();
    sim.set_input(26, PinValue::Low).unwrap();
    assert_eq!(rx.recv_timeout(DELIVERY).unwrap(), PinEventTypes::Rising);
    assert_eq!(rx.recv_timeout(DELIVERY).unwrap(), PinEventTypes::Falling);
}

#[test]
fn test_wait_for_event_times_out() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(12, PinMode::Input).unwrap();

    let result = gpio
        .wait_for_event(12, PinEventTypes::Both, Duration::from_millis(50))
        .unwrap();
    assert!(result.timed_out);
    assert_eq!(result.event_types, PinEventTypes::None);
    assert!(!sim.is_armed(12));
}

#[test]
fn test_wait_for_event_sees_edge() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(13, PinMode::Input).unwrap();

    let driver_side = sim.clone();
    let edge = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        driver_side.set_input(13, PinValue::High).unwrap();
    });

    let result = gpio
        .wait_for_event(13, PinEventTypes::Rising, DELIVERY)
        .unwrap();
    edge.join().unwrap();
    assert!(!result.timed_out);
    assert_eq!(result.event_types, PinEventTypes::Rising);
}

#[test]
fn test_dispose_stops_delivery() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(6, PinMode::Input).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    gpio.register_callback_for_pin_value_changed_event(6, PinEventTypes::Both, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    gpio.dispose().unwrap();
    assert!(matches!(
        gpio.register_callback_for_pin_value_changed_event(6, PinEventTypes::Both, |_| {}),
        Err(GpioError::Disposed)
    ));
    sim.set_input(6, PinValue::High).unwrap();
    thread::sleep(QUIET);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
