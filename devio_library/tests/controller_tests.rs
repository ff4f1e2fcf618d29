//! Controller behaviour against the simulation backend

use std::io::Write;
use std::sync::Arc;
use std::thread;

use devio_core::{
    ControllerConfig, DriverConfig, DriverKind, GpioError, NumberingScheme, PinEventTypes,
    PinMode, PinValue,
};
use devio_library::{GpioController, GpioDriver, SimulationHandle};

fn simulated(numbering: NumberingScheme) -> (GpioController, SimulationHandle) {
    let (driver, sim) = GpioDriver::simulation();
    (GpioController::new(numbering, driver).unwrap(), sim)
}

#[test]
fn test_double_open_fails_and_keeps_first_session() {
    let (gpio, _) = simulated(NumberingScheme::Logical);
    gpio.open_pin(17, PinMode::Output).unwrap();

    let err = gpio.open_pin(17, PinMode::Input).unwrap_err();
    assert!(err.is_pin_already_open());
    assert_eq!(gpio.get_pin_mode(17).unwrap(), PinMode::Output);
}

#[test]
fn test_closed_pin_fails_fast() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(4, PinMode::Output).unwrap();
    gpio.write(4, PinValue::High).unwrap();
    gpio.write(4, PinValue::Low).unwrap();
    gpio.close_pin(4).unwrap();

    assert!(!sim.is_open(4));
    assert!(gpio.read(4).unwrap_err().is_pin_not_opened());
    assert!(gpio.write(4, PinValue::High).unwrap_err().is_pin_not_opened());
    assert!(gpio.close_pin(4).unwrap_err().is_pin_not_opened());
}

#[test]
fn test_write_then_read_returns_written_value() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(22, PinMode::Output).unwrap();

    for value in [PinValue::High, PinValue::Low, PinValue::High] {
        gpio.write(22, value).unwrap();
        assert_eq!(gpio.read(22).unwrap(), value);
    }
    assert_eq!(sim.write_count(22), 3);
}

#[test]
fn test_input_pin_follows_external_level() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(5, PinMode::Input).unwrap();
    assert_eq!(gpio.read(5).unwrap(), PinValue::Low);

    sim.set_input(5, PinValue::High).unwrap();
    assert_eq!(gpio.read(5).unwrap(), PinValue::High);

    assert!(matches!(
        gpio.write(5, PinValue::Low),
        Err(GpioError::InvalidOperation(_))
    ));
}

#[test]
fn test_board_numbering_is_translated() {
    let (gpio, sim) = simulated(NumberingScheme::Board);
    assert_eq!(gpio.numbering_scheme(), NumberingScheme::Board);

    // Header pin 11 is GPIO17.
    gpio.open_pin(11, PinMode::Output).unwrap();
    gpio.write(11, PinValue::High).unwrap();
    assert!(sim.is_open(17));
    assert_eq!(sim.level(17), Some(PinValue::High));

    // Header pin 6 is ground.
    assert!(matches!(
        gpio.open_pin(6, PinMode::Input),
        Err(GpioError::InvalidArgument(_))
    ));
}

#[test]
fn test_dispose_releases_every_pin() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    for pin in [2, 3, 4, 17, 27] {
        gpio.open_pin(pin, PinMode::Output).unwrap();
    }
    assert_eq!(gpio.open_pins().len(), 5);

    gpio.dispose().unwrap();
    assert!(sim.open_pins().is_empty());
    assert!(gpio.open_pins().is_empty());
    assert!(matches!(gpio.pin_count(), Err(GpioError::Disposed)));

    // Second dispose is a no-op.
    gpio.dispose().unwrap();
}

#[test]
fn test_drop_disposes() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    gpio.open_pin(9, PinMode::Input).unwrap();
    drop(gpio);
    assert!(sim.open_pins().is_empty());
}

#[test]
fn test_concurrent_writes_to_different_pins() {
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    let gpio = Arc::new(gpio);
    let pins = [5, 6, 12, 13, 19, 26];
    for pin in pins {
        gpio.open_pin(pin, PinMode::Output).unwrap();
    }

    let workers: Vec<_> = pins
        .iter()
        .map(|&pin| {
            let gpio = Arc::clone(&gpio);
            thread::spawn(move || {
                for i in 0..200 {
                    gpio.write(pin, PinValue::from(i % 2 == 0)).unwrap();
                }
                // Each pin ends on its own level.
                let last = PinValue::from(pin % 2 == 0);
                gpio.write(pin, last).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for pin in pins {
        assert_eq!(gpio.read(pin).unwrap(), PinValue::from(pin % 2 == 0));
        assert_eq!(sim.write_count(pin), 201);
    }
}

#[test]
fn test_controller_from_config() {
    let config = ControllerConfig::from_yaml(
        "numbering: board\ndriver:\n  backend: sim\n  pin_count: 28\n",
    )
    .unwrap();
    let gpio = GpioController::from_config(&config).unwrap();
    assert_eq!(gpio.driver_kind(), DriverKind::Simulation);
    assert_eq!(gpio.numbering_scheme(), NumberingScheme::Board);
    assert_eq!(gpio.pin_count().unwrap(), 28);
}

#[test]
fn test_controller_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        "numbering = \"logical\"\n\n[driver]\nbackend = \"simulation\"\npin_count = 8\n"
    )
    .unwrap();

    let config = ControllerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.driver, DriverConfig::simulation(8));
    let gpio = GpioController::from_config(&config).unwrap();
    assert_eq!(gpio.pin_count().unwrap(), 8);
    assert!(gpio.open_pin(8, PinMode::Input).is_err());
}

#[test]
fn test_dispose_releases_remaining_pins_after_a_failure() {
    const EIO: i32 = 5;
    let (gpio, sim) = simulated(NumberingScheme::Logical);
    for pin in [5, 6, 7] {
        gpio.open_pin(pin, PinMode::Input).unwrap();
    }
    gpio.register_callback_for_pin_value_changed_event(7, PinEventTypes::Both, |_| {})
        .unwrap();
    sim.fail_close(6, EIO);

    let err = gpio.dispose().unwrap_err();
    assert_eq!(err.raw_os_error(), Some(EIO));
    assert_eq!(sim.close_count(5), 1);
    assert_eq!(sim.close_count(6), 0);
    assert_eq!(sim.close_count(7), 1);
    assert!(!sim.is_armed(7));
    assert!(sim.open_pins().is_empty());
    assert!(gpio.is_disposed());

    gpio.dispose().unwrap();
    assert!(matches!(gpio.read(5), Err(GpioError::Disposed)));
}
