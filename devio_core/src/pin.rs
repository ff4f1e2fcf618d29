//! Pin vocabulary shared by the controller and every driver backend

use std::fmt;
use std::ops::{BitOr, Not};

use serde::{Deserialize, Serialize};

/// Requested capability of an open pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinMode {
    #[default]
    Input,
    Output,
    InputPullUp,
    InputPullDown,
}

impl PinMode {
    /// All input flavours, with or without a bias resistor
    pub fn is_input(self) -> bool {
        !matches!(self, PinMode::Output)
    }

    /// Modes that need a hardware pull resistor
    pub fn needs_bias(self) -> bool {
        matches!(self, PinMode::InputPullUp | PinMode::InputPullDown)
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "Input"),
            Self::Output => write!(f, "Output"),
            Self::InputPullUp => write!(f, "InputPullUp"),
            Self::InputPullDown => write!(f, "InputPullDown"),
        }
    }
}

/// Binary logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinValue {
    #[default]
    Low,
    High,
}

impl PinValue {
    pub fn is_high(self) -> bool {
        self == PinValue::High
    }

    /// Raw 0/1 level as used by the kernel interfaces
    pub fn as_u8(self) -> u8 {
        match self {
            PinValue::Low => 0,
            PinValue::High => 1,
        }
    }

    /// Any non-zero raw level counts as high
    pub fn from_u8(raw: u8) -> Self {
        if raw == 0 {
            PinValue::Low
        } else {
            PinValue::High
        }
    }
}

impl From<bool> for PinValue {
    fn from(value: bool) -> Self {
        if value {
            PinValue::High
        } else {
            PinValue::Low
        }
    }
}

impl From<PinValue> for bool {
    fn from(value: PinValue) -> Self {
        value.is_high()
    }
}

impl Not for PinValue {
    type Output = PinValue;

    fn not(self) -> Self::Output {
        match self {
            PinValue::Low => PinValue::High,
            PinValue::High => PinValue::Low,
        }
    }
}

impl fmt::Display for PinValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Edge-trigger mask for value-changed events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinEventTypes {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl PinEventTypes {
    /// True when every edge in `other` is also in `self`
    pub fn contains(self, other: PinEventTypes) -> bool {
        match other {
            PinEventTypes::None => true,
            PinEventTypes::Both => self == PinEventTypes::Both,
            edge => self == edge || self == PinEventTypes::Both,
        }
    }

    pub fn is_none(self) -> bool {
        self == PinEventTypes::None
    }

    /// Edge implied by a transition to `value`
    pub fn edge_to(value: PinValue) -> Self {
        match value {
            PinValue::High => PinEventTypes::Rising,
            PinValue::Low => PinEventTypes::Falling,
        }
    }
}

impl BitOr for PinEventTypes {
    type Output = PinEventTypes;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (PinEventTypes::None, other) | (other, PinEventTypes::None) => other,
            (a, b) if a == b => a,
            _ => PinEventTypes::Both,
        }
    }
}

impl fmt::Display for PinEventTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Rising => write!(f, "Rising"),
            Self::Falling => write!(f, "Falling"),
            Self::Both => write!(f, "Both"),
        }
    }
}

/// Convention used to identify pins at the public API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberingScheme {
    /// SoC numbering (BCM numbers on a Raspberry Pi)
    #[default]
    Logical,
    /// Physical header position
    Board,
}

/// Pin number and level, used by the batch read/write calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinValuePair {
    pub pin: u32,
    pub value: PinValue,
}

impl PinValuePair {
    pub fn new(pin: u32, value: PinValue) -> Self {
        Self { pin, value }
    }
}

/// Delivered to subscribers when a watched pin changes level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinValueChangedEvent {
    /// Pin number in the controller's numbering scheme
    pub pin: u32,
    /// Edge that fired (`Rising` or `Falling`)
    pub change_type: PinEventTypes,
}

/// Outcome of a blocking wait for an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitForEventResult {
    pub timed_out: bool,
    pub event_types: PinEventTypes,
}

impl WaitForEventResult {
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            event_types: PinEventTypes::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_union() {
        assert_eq!(
            PinEventTypes::Rising | PinEventTypes::Falling,
            PinEventTypes::Both
        );
        assert_eq!(
            PinEventTypes::None | PinEventTypes::Rising,
            PinEventTypes::Rising
        );
        assert_eq!(
            PinEventTypes::Falling | PinEventTypes::Falling,
            PinEventTypes::Falling
        );
    }

    #[test]
    fn test_event_mask_contains() {
        assert!(PinEventTypes::Both.contains(PinEventTypes::Rising));
        assert!(PinEventTypes::Both.contains(PinEventTypes::Both));
        assert!(!PinEventTypes::Rising.contains(PinEventTypes::Falling));
        assert!(!PinEventTypes::Rising.contains(PinEventTypes::Both));
        assert!(!PinEventTypes::None.contains(PinEventTypes::Rising));
    }

    #[test]
    fn test_pin_value_conversions() {
        assert_eq!(PinValue::from(true), PinValue::High);
        assert_eq!(!PinValue::High, PinValue::Low);
        assert_eq!(PinValue::from_u8(7), PinValue::High);
        assert_eq!(PinValue::Low.as_u8(), 0);
        assert_eq!(PinEventTypes::edge_to(PinValue::High), PinEventTypes::Rising);
    }

    #[test]
    fn test_pin_mode_helpers() {
        assert!(PinMode::InputPullDown.is_input());
        assert!(PinMode::InputPullDown.needs_bias());
        assert!(!PinMode::Output.is_input());
        assert!(!PinMode::Input.needs_bias());
    }
}
