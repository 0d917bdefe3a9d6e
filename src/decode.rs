//! Interpretation of the adapter's input register blocks. Nothing here performs I/O.

use crate::codes::{
    Code, Coded, Communication, Connection, FanDirection, FanVolume, FilterSign, ForcedOff,
    Malfunction, MasterSlave, OperatingMode, OperatingStatus, Power, Presence, Readiness,
    SensorData, SensorError, Warning,
};
use crate::registers::{CAPABILITY_WORDS, STATUS_WORDS, UNIT_COUNT, Uid};

/// Bit layout of the status block words, shared with the control words that mirror them.
pub(crate) mod mask {
    // word 0
    pub const POWER: u16 = 0x0001;
    pub const FORCED_OFF: u16 = 0x0004;
    pub const FAN_DIRECTION: u16 = 0x0700;
    pub const FAN_VOLUME: u16 = 0x7000;
    // word 1
    pub const OPERATING_MODE: u16 = 0x000F;
    pub const FILTER_SIGN: u16 = 0x00F0;
    pub const OPERATING_STATUS: u16 = 0x0F00;
    pub const MASTER_SLAVE: u16 = 0xC000;
    // word 3
    pub const ERROR_CODE_1: u16 = 0x000F;
    pub const ERROR_CODE_2: u16 = 0x01F0;
    pub const MALFUNCTION: u16 = 0x0200;
    pub const WARNING: u16 = 0x0400;
    // word 5
    pub const SENSOR_ERROR: u16 = 0x0100;
    pub const SENSOR_DATA: u16 = 0x8000;
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("{block} block must be exactly {expected} words long, got {actual}")]
pub struct WordCountError {
    pub block: &'static str,
    pub expected: u16,
    pub actual: usize,
}

fn check_length(block: &'static str, words: &[u16], expected: u16) -> Result<(), WordCountError> {
    if words.len() != usize::from(expected) {
        return Err(WordCountError { block, expected, actual: words.len() });
    }
    Ok(())
}

fn field<T: Code>(word: u16, mask: u16) -> Coded<T> {
    Coded::decode((word & mask) >> mask.trailing_zeros())
}

/// A temperature in tenths of a degree Celsius, transmitted as a two's complement word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Temperature {
    word: u16,
}

impl Temperature {
    pub fn from_word(word: u16) -> Self {
        Self { word }
    }

    pub fn word(self) -> u16 {
        self.word
    }

    pub fn tenths(self) -> i16 {
        self.word as i16
    }

    pub fn degrees(self) -> f64 {
        f64::from(self.tenths()) / 10.0
    }
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}", self.degrees())
    }
}

impl serde::Serialize for Temperature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("Temperature", 2)?;
        s.serialize_field("code", &self.word)?;
        s.serialize_field("text", &self.degrees())?;
        s.end()
    }
}

/// Room temperature is reported with two decimals.
fn serialize_room_temperature<S: serde::Serializer>(
    temperature: &Temperature,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct as _;
    let mut s = serializer.serialize_struct("Temperature", 2)?;
    s.serialize_field("code", &temperature.word)?;
    s.serialize_field("text", &format!("{:.2}", temperature.degrees()))?;
    s.end()
}

/// One nibble of a unit's error code. Its text is the number itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: u16,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}", self.code)
    }
}

impl serde::Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("ErrorCode", 2)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("text", &self.code)?;
        s.end()
    }
}

/// How many settings a unit offers for its fan direction or fan volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Steps {
    pub code: u16,
}

impl std::fmt::Display for Steps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} step", self.code)
    }
}

impl serde::Serialize for Steps {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("Steps", 2)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("text", &self.to_string())?;
        s.end()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct UnitStatus {
    pub power: Coded<Power>,
    pub forced_off: Coded<ForcedOff>,
    pub fan_direction: Coded<FanDirection>,
    pub fan_volume: Coded<FanVolume>,
    pub operating_mode: Coded<OperatingMode>,
    pub filter_sign: Coded<FilterSign>,
    pub operating_status: Coded<OperatingStatus>,
    pub master_slave: Coded<MasterSlave>,
    pub setpoint: Temperature,
    pub error_code_1: ErrorCode,
    pub error_code_2: ErrorCode,
    pub malfunction: Coded<Malfunction>,
    pub warning: Coded<Warning>,
    #[serde(serialize_with = "serialize_room_temperature")]
    pub room_temperature: Temperature,
    pub sensor_error: Coded<SensorError>,
    pub sensor_data: Coded<SensorData>,
}

impl UnitStatus {
    pub fn decode(words: &[u16]) -> Result<Self, WordCountError> {
        check_length("status", words, STATUS_WORDS)?;
        let filter_nibble = (words[1] & mask::FILTER_SIGN) >> 4;
        Ok(UnitStatus {
            power: field(words[0], mask::POWER),
            forced_off: field(words[0], mask::FORCED_OFF),
            fan_direction: field(words[0], mask::FAN_DIRECTION),
            fan_volume: field(words[0], mask::FAN_VOLUME),
            operating_mode: field(words[1], mask::OPERATING_MODE),
            // Any bit of the nibble lit means the sign is showing.
            filter_sign: Coded {
                code: filter_nibble,
                value: Some(if filter_nibble != 0 { FilterSign::On } else { FilterSign::Off }),
            },
            operating_status: field(words[1], mask::OPERATING_STATUS),
            master_slave: field(words[1], mask::MASTER_SLAVE),
            setpoint: Temperature::from_word(words[2]),
            error_code_1: ErrorCode { code: words[3] & mask::ERROR_CODE_1 },
            error_code_2: ErrorCode { code: (words[3] & mask::ERROR_CODE_2) >> 4 },
            malfunction: field(words[3], mask::MALFUNCTION),
            warning: field(words[3], mask::WARNING),
            room_temperature: Temperature::from_word(words[4]),
            sensor_error: field(words[5], mask::SENSOR_ERROR),
            sensor_data: field(words[5], mask::SENSOR_DATA),
        })
    }
}

/// Upper and lower setpoint limits, in whole degrees Celsius.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SetpointLimits {
    pub upper: i8,
    pub lower: i8,
}

impl SetpointLimits {
    /// The low byte holds the upper limit, the high byte the lower one.
    fn from_word(word: u16) -> Self {
        let [high, low] = word.to_be_bytes();
        SetpointLimits { upper: low as i8, lower: high as i8 }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct UnitCapability {
    pub fan_mode: Coded<Presence>,
    pub cooling_mode: Coded<Presence>,
    pub heating_mode: Coded<Presence>,
    pub auto_mode: Coded<Presence>,
    pub dry_mode: Coded<Presence>,
    pub fan_direction_steps: Steps,
    pub fan_direction: Coded<Presence>,
    pub fan_volume_steps: Steps,
    pub fan_volume: Coded<Presence>,
    pub cooling_setpoint: SetpointLimits,
    pub heating_setpoint: SetpointLimits,
}

impl UnitCapability {
    pub fn decode(words: &[u16]) -> Result<Self, WordCountError> {
        check_length("capability", words, CAPABILITY_WORDS)?;
        let modes = words[0];
        Ok(UnitCapability {
            fan_mode: field(modes, 0x0001),
            cooling_mode: field(modes, 0x0002),
            heating_mode: field(modes, 0x0004),
            auto_mode: field(modes, 0x0008),
            dry_mode: field(modes, 0x0010),
            fan_direction_steps: Steps { code: (modes & 0x0700) >> 8 },
            fan_direction: field(modes, 0x0800),
            fan_volume_steps: Steps { code: (modes & 0x7000) >> 12 },
            fan_volume: field(modes, 0x8000),
            cooling_setpoint: SetpointLimits::from_word(words[1]),
            heating_setpoint: SetpointLimits::from_word(words[2]),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AdapterStatus {
    pub ready: Coded<Readiness>,
}

impl AdapterStatus {
    pub fn decode(word: u16) -> Self {
        AdapterStatus { ready: field(word, 0x0001) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(bound(serialize = "T: Code"))]
pub struct UnitFlag<T> {
    pub uid: Uid,
    pub state: Coded<T>,
}

/// A per-unit bitmask word: bit `n` describes unit `100 + n`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(bound(serialize = "T: Code"))]
pub struct UnitBitmap<T> {
    pub word: u16,
    pub units: Vec<UnitFlag<T>>,
}

impl<T: Code> UnitBitmap<T> {
    pub fn decode(word: u16) -> Self {
        let units = Uid::all()
            .take(usize::from(UNIT_COUNT))
            .map(|uid| UnitFlag { uid, state: Coded::decode((word >> uid.index()) & 1) })
            .collect();
        UnitBitmap { word, units }
    }

    pub fn get(&self, uid: Uid) -> Option<&Coded<T>> {
        self.units.iter().find(|flag| flag.uid == uid).map(|flag| &flag.state)
    }
}

pub type ConnectionMap = UnitBitmap<Connection>;
pub type CommunicationMap = UnitBitmap<Communication>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_status_block() {
        let words = [0x3261, 0x8213, 0x00F0, 0x0625, 0x00FF, 0x8100];
        let status = UnitStatus::decode(&words).unwrap();
        assert_eq!(status.power.value, Some(Power::On));
        assert_eq!(status.forced_off.value, Some(ForcedOff::NotForced));
        assert_eq!(status.fan_direction.value, Some(FanDirection::P2));
        assert_eq!(status.fan_volume.value, Some(FanVolume::Medium));
        assert_eq!(status.operating_mode.value, Some(OperatingMode::Auto));
        assert_eq!(status.filter_sign.code, 1);
        assert_eq!(status.filter_sign.value, Some(FilterSign::On));
        assert_eq!(status.operating_status.value, Some(OperatingStatus::Cooling));
        assert_eq!(status.master_slave.value, Some(MasterSlave::Master));
        assert_eq!(status.setpoint.degrees(), 24.0);
        assert_eq!(status.error_code_1, ErrorCode { code: 5 });
        assert_eq!(status.error_code_2, ErrorCode { code: 2 });
        assert_eq!(status.malfunction.value, Some(Malfunction::Malfunction));
        assert_eq!(status.warning.value, Some(Warning::Warning));
        assert_eq!(status.room_temperature.degrees(), 25.5);
        assert_eq!(status.sensor_error.value, Some(SensorError::Failed));
        assert_eq!(status.sensor_data.value, Some(SensorData::Received));
    }

    #[test]
    fn unknown_sub_codes_do_not_fail_the_decode() {
        // fan volume 2, fan direction 5, mode 6, master/slave 3
        let words = [0x2500, 0xC006, 0, 0, 0, 0];
        let status = UnitStatus::decode(&words).unwrap();
        assert_eq!((status.fan_volume.code, status.fan_volume.value), (2, None));
        assert_eq!((status.fan_direction.code, status.fan_direction.value), (5, None));
        assert_eq!((status.operating_mode.code, status.operating_mode.value), (6, None));
        assert_eq!((status.master_slave.code, status.master_slave.value), (3, None));
        assert_eq!(status.power.value, Some(Power::Off));
        assert_eq!(status.sensor_data.value, Some(SensorData::NotYet));
    }

    #[test]
    fn status_block_length_is_checked() {
        let error = UnitStatus::decode(&[0; 5]).unwrap_err();
        assert_eq!(error, WordCountError { block: "status", expected: 6, actual: 5 });
        assert!(UnitStatus::decode(&[0; 7]).is_err());
        assert!(UnitCapability::decode(&[0; 2]).is_err());
        assert!(UnitCapability::decode(&[0; 6]).is_err());
    }

    #[test]
    fn negative_temperatures() {
        assert_eq!(Temperature::from_word(0x00F0).degrees(), 24.0);
        assert_eq!(Temperature::from_word(0xFFC9).degrees(), -5.5);
        assert_eq!(Temperature::from_word(0xFFFF).degrees(), -0.1);
        assert_eq!(Temperature::from_word(0x7FFF).tenths(), 32767);
        assert_eq!(Temperature::from_word(0x8000).tenths(), -32768);
        assert_eq!(Temperature::from_word(0xFFC9).to_string(), "-5.5");
    }

    #[test]
    fn room_temperature_has_two_decimals() {
        let status = UnitStatus::decode(&[0, 0, 0, 0, 0x00E7, 0]).unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["room_temperature"]["text"], "23.10");
        assert_eq!(json["setpoint"]["text"], 0.0);
        assert_eq!(json["fan_volume"]["text"], serde_json::Value::Null);
    }

    #[test]
    fn decodes_capability_block() {
        // all modes, 5 direction steps, 3 volume steps; cooling 32..18, heating 30..-2
        let words = [0xB51F, 0x1220, 0xFE1E];
        let capability = UnitCapability::decode(&words).unwrap();
        assert_eq!(capability.fan_mode.value, Some(Presence::Exist));
        assert_eq!(capability.dry_mode.value, Some(Presence::Exist));
        assert_eq!(capability.fan_direction_steps, Steps { code: 5 });
        assert_eq!(capability.fan_direction.value, Some(Presence::NotExist));
        assert_eq!(capability.fan_volume_steps, Steps { code: 3 });
        assert_eq!(capability.fan_volume.value, Some(Presence::Exist));
        assert_eq!(capability.cooling_setpoint, SetpointLimits { upper: 32, lower: 18 });
        assert_eq!(capability.heating_setpoint, SetpointLimits { upper: 30, lower: -2 });
    }

    #[test]
    fn counts_and_error_codes_are_labelled() {
        let status = UnitStatus::decode(&[0, 0, 0, 0x01FC, 0, 0]).unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["error_code_1"], serde_json::json!({ "code": 12, "text": 12 }));
        assert_eq!(json["error_code_2"], serde_json::json!({ "code": 31, "text": 31 }));
        assert_eq!(status.error_code_1.to_string(), "C");

        let capability = UnitCapability::decode(&[0x3500, 0, 0]).unwrap();
        let json = serde_json::to_value(&capability).unwrap();
        assert_eq!(json["fan_direction_steps"], serde_json::json!({ "code": 5, "text": "5 step" }));
        assert_eq!(json["fan_volume_steps"], serde_json::json!({ "code": 3, "text": "3 step" }));
    }

    #[test]
    fn setpoint_limit_bytes_are_signed_independently() {
        assert_eq!(SetpointLimits::from_word(0x7F80), SetpointLimits { upper: -128, lower: 127 });
        assert_eq!(SetpointLimits::from_word(0x80FF), SetpointLimits { upper: -1, lower: -128 });
    }

    #[test]
    fn decodes_adapter_status() {
        assert_eq!(AdapterStatus::decode(0x0001).ready.value, Some(Readiness::Ready));
        assert_eq!(AdapterStatus::decode(0xFFFE).ready.value, Some(Readiness::NotReady));
    }

    #[test]
    fn decodes_connection_bitmask() {
        let map = ConnectionMap::decode(0x0003);
        assert_eq!(map.units.len(), 16);
        let uids = map.units.iter().map(|f| f.uid.get()).collect::<Vec<_>>();
        assert_eq!(uids, (100..=115).collect::<Vec<_>>());
        for flag in &map.units {
            let expected = if flag.uid.get() <= 101 {
                Connection::Connected
            } else {
                Connection::Unconnected
            };
            assert_eq!(flag.state.value, Some(expected));
        }
    }

    #[test]
    fn decodes_communication_bitmask_high_bit() {
        let map = CommunicationMap::decode(0x8000);
        let last = Uid::new(115).unwrap();
        assert_eq!(map.get(last).and_then(|s| s.value), Some(Communication::Normal));
        let first = Uid::new(100).unwrap();
        assert_eq!(map.get(first).and_then(|s| s.value), Some(Communication::Failed));
    }
}
