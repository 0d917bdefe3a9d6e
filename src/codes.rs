//! Coded sub-fields of the adapter's register words.
//!
//! Every field is kept as the raw code read from the wire together with its interpretation.
//! Codes the adapter documentation does not define are kept as-is, but without a label.

/// A closed set of codes a register sub-field may hold.
pub trait Code: Copy {
    fn code(self) -> u16;
    fn from_code(code: u16) -> Option<Self>;
    fn label(self) -> &'static str;
}

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $value:literal => $label:literal),* $(,)?
        }
    ) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            strum::FromRepr,
            strum::IntoStaticStr,
            strum::EnumString,
            strum::VariantNames,
        )]
        #[repr(u16)]
        $(#[$meta])*
        $vis enum $name {
            $(#[strum(serialize = $label)] $variant = $value),*
        }

        impl $crate::codes::Code for $name {
            fn code(self) -> u16 {
                self as u16
            }
            fn from_code(code: u16) -> Option<Self> {
                Self::from_repr(code)
            }
            fn label(self) -> &'static str {
                self.into()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::codes::Code::label(*self))
            }
        }
    };
}

code_enum! {
    pub enum Power {
        Off = 0 => "off",
        On = 1 => "on",
    }
}

code_enum! {
    pub enum ForcedOff {
        NotForced = 0 => "none",
        ForcedOff = 1 => "forced off",
    }
}

code_enum! {
    /// Louver position. Code 5 is not assigned.
    pub enum FanDirection {
        P0 = 0 => "p0",
        P1 = 1 => "p1",
        P2 = 2 => "p2",
        P3 = 3 => "p3",
        P4 = 4 => "p4",
        Stop = 6 => "stop",
        Swing = 7 => "swing",
    }
}

code_enum! {
    pub enum FanVolume {
        Low = 1 => "low",
        Medium = 3 => "medium",
        High = 5 => "high",
    }
}

code_enum! {
    pub enum OperatingMode {
        Fan = 0 => "fan",
        Heating = 1 => "heating",
        Cooling = 2 => "cooling",
        Auto = 3 => "auto",
        Dry = 7 => "dry",
    }
}

code_enum! {
    /// Written as a control value, `Fan` means "don't care".
    pub enum OperatingStatus {
        Fan = 0 => "fan",
        Heating = 1 => "heating",
        Cooling = 2 => "cooling",
    }
}

code_enum! {
    pub enum MasterSlave {
        NotDecided = 0 => "not decided",
        Slave = 1 => "slave",
        Master = 2 => "master",
    }
}

code_enum! {
    pub enum FilterSign {
        Off = 0 => "off",
        On = 1 => "on",
    }
}

code_enum! {
    pub enum Malfunction {
        Normal = 0 => "normal",
        Malfunction = 1 => "malfunction",
    }
}

code_enum! {
    pub enum Warning {
        Normal = 0 => "normal",
        Warning = 1 => "warning",
    }
}

code_enum! {
    pub enum SensorError {
        Normal = 0 => "normal",
        Failed = 1 => "error",
    }
}

code_enum! {
    pub enum SensorData {
        NotYet = 0 => "not yet",
        Received = 1 => "received",
    }
}

code_enum! {
    pub enum Presence {
        NotExist = 0 => "not exist",
        Exist = 1 => "exist",
    }
}

code_enum! {
    pub enum Readiness {
        NotReady = 0 => "not ready",
        Ready = 1 => "ready",
    }
}

code_enum! {
    pub enum Connection {
        Unconnected = 0 => "unconnected",
        Connected = 1 => "connected",
    }
}

code_enum! {
    pub enum Communication {
        Failed = 0 => "communication error",
        Normal = 1 => "normal",
    }
}

/// A raw sub-field code with its interpretation, if the code is a known one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coded<T> {
    pub code: u16,
    pub value: Option<T>,
}

impl<T: Code> Coded<T> {
    pub fn decode(code: u16) -> Self {
        Coded { code, value: T::from_code(code) }
    }

    pub fn label(&self) -> Option<&'static str> {
        self.value.map(Code::label)
    }
}

impl<T: Code> std::fmt::Display for Coded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "unknown ({})", self.code),
        }
    }
}

impl<T: Code> serde::Serialize for Coded<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("Coded", 2)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("text", &self.label())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_are_labelled() {
        assert_eq!(Coded::<FanVolume>::decode(1).label(), Some("low"));
        assert_eq!(Coded::<FanVolume>::decode(5).value, Some(FanVolume::High));
        assert_eq!(Coded::<OperatingMode>::decode(7).label(), Some("dry"));
        assert_eq!(Coded::<FanDirection>::decode(7).label(), Some("swing"));
        assert_eq!(Coded::<MasterSlave>::decode(2).label(), Some("master"));
    }

    #[test]
    fn unknown_codes_keep_the_code() {
        let volume = Coded::<FanVolume>::decode(2);
        assert_eq!(volume.code, 2);
        assert_eq!(volume.label(), None);
        assert_eq!(volume.to_string(), "unknown (2)");
        assert_eq!(Coded::<FanDirection>::decode(5).value, None);
        assert_eq!(Coded::<OperatingMode>::decode(6).value, None);
        assert_eq!(Coded::<MasterSlave>::decode(3).value, None);
    }

    #[test]
    fn labels_parse_back() {
        assert_eq!("cooling".parse::<OperatingMode>().unwrap(), OperatingMode::Cooling);
        assert_eq!("medium".parse::<FanVolume>().unwrap(), FanVolume::Medium);
        assert_eq!("p3".parse::<FanDirection>().unwrap(), FanDirection::P3);
        assert!("turbo".parse::<FanVolume>().is_err());
    }

    #[test]
    fn serializes_code_and_text() {
        let json = serde_json::to_value(Coded::<Power>::decode(1)).unwrap();
        assert_eq!(json, serde_json::json!({ "code": 1, "text": "on" }));
        let json = serde_json::to_value(Coded::<FanVolume>::decode(0)).unwrap();
        assert_eq!(json, serde_json::json!({ "code": 0, "text": null }));
    }
}
