//! Physical register addresses of the DIII-NET adapter.
//!
//! Addresses are kept in the form printed in the adapter documentation (3xxxx for input
//! registers, 4xxxx for holding registers). [`InputRegister::wire_address`] and
//! [`HoldingRegister::wire_address`] produce the zero based address that goes into a frame.

use std::ops::RangeInclusive;

pub const INPUT_REGISTER_BASE: u16 = 30001;
pub const HOLDING_REGISTER_BASE: u16 = 40001;

pub const UID_RANGE: RangeInclusive<u16> = 100..=115;
pub const UNIT_COUNT: u16 = 16;

pub const CAPABILITY_WORDS: u16 = 3;
pub const STATUS_WORDS: u16 = 6;
pub const CONTROL_WORDS: u16 = 3;

pub const ADAPTER_STATUS: InputRegister = InputRegister(30001);
pub const CONNECTION_STATUS: InputRegister = InputRegister(30002);
pub const COMMUNICATION_STATUS: InputRegister = InputRegister(30006);
const CAPABILITY_BASE: u16 = 31001;
const STATUS_BASE: u16 = 32001;
pub const ADAPTER_INITIAL_SETTINGS: HoldingRegister = HoldingRegister(40001);
const CONTROL_BASE: u16 = 42001;

/// Indoor unit identifier behind an adapter, always within [`UID_RANGE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct Uid(u16);

impl Uid {
    pub fn new(uid: u16) -> Option<Uid> {
        UID_RANGE.contains(&uid).then_some(Uid(uid))
    }

    pub fn all() -> impl Iterator<Item = Uid> {
        UID_RANGE.map(Uid)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Position of this unit within the adapter's per-unit blocks and bitmasks.
    pub fn index(self) -> u16 {
        self.0 - UID_RANGE.start()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputRegister(u16);

impl InputRegister {
    pub fn physical(self) -> u16 {
        self.0
    }

    pub fn wire_address(self) -> u16 {
        self.0 - INPUT_REGISTER_BASE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HoldingRegister(u16);

impl HoldingRegister {
    pub fn physical(self) -> u16 {
        self.0
    }

    pub fn wire_address(self) -> u16 {
        self.0 - HOLDING_REGISTER_BASE
    }
}

/// One of the three control words of a unit. Word `n` mirrors word `n` of its status block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlWord {
    First = 0,
    Second = 1,
    Third = 2,
}

impl ControlWord {
    pub fn index(self) -> usize {
        self as usize
    }
}

pub fn capability_block(uid: Uid) -> InputRegister {
    InputRegister(CAPABILITY_BASE + CAPABILITY_WORDS * uid.index())
}

pub fn status_block(uid: Uid) -> InputRegister {
    InputRegister(STATUS_BASE + STATUS_WORDS * uid.index())
}

/// Start and length of the status blocks of every unit, readable as one transaction.
pub fn all_status_blocks() -> (InputRegister, u16) {
    (InputRegister(STATUS_BASE), STATUS_WORDS * UNIT_COUNT)
}

pub fn control_block(uid: Uid) -> HoldingRegister {
    control_word(uid, ControlWord::First)
}

pub fn control_word(uid: Uid, word: ControlWord) -> HoldingRegister {
    HoldingRegister(CONTROL_BASE + word as u16 + CONTROL_WORDS * uid.index())
}
