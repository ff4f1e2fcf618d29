//! PWM output
//!
//! Only the software channel exists: a waveform produced by toggling a
//! controller output pin from a timed loop. It uses nothing beyond the
//! controller's public pin contract.

pub mod software;

pub use software::{PwmState, SoftwarePwmChannel};
