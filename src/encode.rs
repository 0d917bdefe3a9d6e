//! New control word values computed from the current ones.
//!
//! Each function replaces only its own bit field and leaves every other bit of the word as the
//! adapter reported it.

use crate::codes::{Code, FanDirection, FanVolume, OperatingMode, OperatingStatus};
use crate::decode::mask;

/// Must accompany any change to fan direction or fan volume for the adapter to act on it.
pub const FAN_CONTROL_FLAG: u16 = 0x0060;

/// Setpoints are accepted in the range `-SETPOINT_LIMIT..=SETPOINT_LIMIT` degrees Celsius.
pub const SETPOINT_LIMIT: f64 = 127.9;

const FILTER_SIGN_RESET: u16 = 0x00F0;

fn replace(word: u16, mask: u16, code: u16) -> u16 {
    (word & !mask) | ((code << mask.trailing_zeros()) & mask)
}

/// Without a target, the power state is toggled.
pub fn power(word: u16, on: Option<bool>) -> u16 {
    let on = on.unwrap_or(word & mask::POWER == 0);
    replace(word, mask::POWER, u16::from(on))
}

pub fn fan_direction(word: u16, direction: FanDirection) -> u16 {
    replace(word | FAN_CONTROL_FLAG, mask::FAN_DIRECTION, direction.code())
}

pub fn fan_volume(word: u16, volume: FanVolume) -> u16 {
    replace(word | FAN_CONTROL_FLAG, mask::FAN_VOLUME, volume.code())
}

pub fn operating_mode(word: u16, mode: OperatingMode) -> u16 {
    replace(word, mask::OPERATING_MODE, mode.code())
}

pub fn filter_sign(word: u16, reset: bool) -> u16 {
    (word & !mask::FILTER_SIGN) | if reset { FILTER_SIGN_RESET } else { 0 }
}

pub fn operating_status(word: u16, status: OperatingStatus) -> u16 {
    replace(word, mask::OPERATING_STATUS, status.code())
}

/// Encodes degrees Celsius as a tenths-of-a-degree two's complement word.
///
/// Returns `None` for values outside of the accepted range (including NaN).
pub fn setpoint(degrees: f64) -> Option<u16> {
    if !(-SETPOINT_LIMIT..=SETPOINT_LIMIT).contains(&degrees) {
        return None;
    }
    Some((degrees * 10.0).round() as i16 as u16)
}

/// The first three control words with power forced on and mode, fan volume and setpoint
/// replaced.
pub fn compound(
    current: [u16; 3],
    mode: OperatingMode,
    volume: FanVolume,
    setpoint_word: u16,
) -> [u16; 3] {
    let [first, second, _] = current;
    [
        fan_volume(power(first, Some(true)), volume),
        operating_mode(second, mode),
        setpoint_word,
    ]
}

/// Adapter-wide settings written once during commissioning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitialSettings {
    pub managed: bool,
    pub master: bool,
    pub communication_start: bool,
}

impl InitialSettings {
    pub fn word(self) -> u16 {
        let mut word = 0;
        if self.managed {
            word |= 0x0001;
        }
        if self.master {
            word |= 0x0100;
        }
        if self.communication_start {
            word |= 0x8000;
        }
        word
    }
}
