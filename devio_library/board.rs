//! Physical header layouts
//!
//! Maps a position on a board's pin header to the SoC (logical) GPIO number.

use devio_core::error::{GpioError, GpioResult};

/// Number of GPIO lines the BCM283x/BCM2711 bank exposes on the header
pub const RASPBERRY_PI_PIN_COUNT: u32 = 28;

/// Header position → BCM number for the 40-pin Raspberry Pi header
const RASPBERRY_PI_HEADER: [(u32, u32); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// BCM number wired to a Raspberry Pi header position.
///
/// Power, ground and ID EEPROM positions have no GPIO and yield an error.
pub fn raspberry_pi_board_to_logical(board_pin: u32) -> GpioResult<u32> {
    RASPBERRY_PI_HEADER
        .iter()
        .find(|(board, _)| *board == board_pin)
        .map(|(_, logical)| *logical)
        .ok_or_else(|| {
            GpioError::invalid_argument(format!(
                "Board pin {} is not a GPIO on the Raspberry Pi header",
                board_pin
            ))
        })
}
