//! The command and query interface of one DIII-NET adapter.
//!
//! Every change to a unit follows the same sequence the adapter insists on: read the unit's
//! status block, write the current control word back unchanged ("prime"), keep the bus silent
//! for a while and only then write the new value ("commit"). Priming twice is harmless, so a
//! sequence abandoned after the prime leaves the unit as it was.

use crate::codes::{FanDirection, FanVolume, OperatingMode, OperatingStatus};
use crate::connection::{self, OpenSibling, Transport};
use crate::decode::{
    AdapterStatus, CommunicationMap, ConnectionMap, UnitCapability, UnitStatus, WordCountError,
};
use crate::encode::{self, InitialSettings};
use crate::registers::{self, ControlWord, InputRegister, STATUS_WORDS, Uid};
use crate::retry::{RetryPolicy, Retrying};
use std::time::Duration;
use tracing::{debug, warn};

pub const SILENT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unit id {0} is not within 100..=115")]
    InvalidUnit(u16),
    #[error("{name} {value} is out of range")]
    InvalidArgument { name: &'static str, value: String },
    #[error("register block could not be decoded")]
    PreconditionViolation(#[from] WordCountError),
    #[error("could not communicate with the adapter")]
    Communication(#[from] connection::Error),
}

/// Caller owned settings of an [`AdapterHandle`].
#[derive(Clone, Debug, PartialEq)]
pub struct AdapterConfig {
    /// Units decoded by [`AdapterHandle::get_all_status`].
    pub units: Vec<Uid>,
    /// Pause between priming a control register and committing its new value.
    pub silent_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            units: Uid::all().collect(),
            silent_interval: SILENT_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

fn unit(uid: u16) -> Result<Uid, Error> {
    Uid::new(uid).ok_or(Error::InvalidUnit(uid))
}

fn setpoint_word(degrees: f64) -> Result<u16, Error> {
    encode::setpoint(degrees)
        .ok_or_else(|| Error::InvalidArgument { name: "setpoint", value: degrees.to_string() })
}

/// One adapter on the bus.
///
/// All operations take `&mut self`, so transactions issued through a handle never overlap.
/// Callers sharing a handle must serialize access to it themselves.
pub struct AdapterHandle<T> {
    transport: Retrying<T>,
    config: AdapterConfig,
}

impl<T: Transport> AdapterHandle<T> {
    pub fn new(transport: T, config: AdapterConfig) -> Self {
        let transport = Retrying::new(transport, config.retry);
        Self { transport, config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn read(&mut self, register: InputRegister, count: u16) -> Result<Vec<u16>, Error> {
        Ok(self.transport.read_input_registers(register.wire_address(), count).await?)
    }

    async fn read_word(&mut self, register: InputRegister) -> Result<u16, Error> {
        let words = self.read(register, 1).await?;
        let word = words.first().copied();
        Ok(word.ok_or(connection::Error::UnexpectedResponse("register count"))?)
    }

    async fn status_words(&mut self, uid: Uid) -> Result<Vec<u16>, Error> {
        self.read(registers::status_block(uid), STATUS_WORDS).await
    }

    pub async fn get_adapter_status(&mut self) -> Result<AdapterStatus, Error> {
        let word = self.read_word(registers::ADAPTER_STATUS).await?;
        Ok(AdapterStatus::decode(word))
    }

    pub async fn get_connection_map(&mut self) -> Result<ConnectionMap, Error> {
        let word = self.read_word(registers::CONNECTION_STATUS).await?;
        Ok(ConnectionMap::decode(word))
    }

    pub async fn get_communication_map(&mut self) -> Result<CommunicationMap, Error> {
        let word = self.read_word(registers::COMMUNICATION_STATUS).await?;
        Ok(CommunicationMap::decode(word))
    }

    pub async fn get_capability(&mut self, uid: u16) -> Result<UnitCapability, Error> {
        let uid = unit(uid)?;
        let words = self.read(registers::capability_block(uid), registers::CAPABILITY_WORDS).await?;
        Ok(UnitCapability::decode(&words)?)
    }

    pub async fn get_status(&mut self, uid: u16) -> Result<UnitStatus, Error> {
        let uid = unit(uid)?;
        let words = self.status_words(uid).await?;
        Ok(UnitStatus::decode(&words)?)
    }

    /// Status of every configured unit, read in a single transaction.
    ///
    /// Decoding stops at the first unit whose block was not returned in full. That only happens
    /// with transports that hand back fewer words than requested: [`connection::RtuConnection`]
    /// rejects a truncated reply outright, so over a serial line it ends up as
    /// [`Error::Communication`] once the retries run out.
    pub async fn get_all_status(&mut self) -> Result<Vec<(Uid, UnitStatus)>, Error> {
        let (start, count) = registers::all_status_blocks();
        let words = self.transport.read_input_registers_up_to(start.wire_address(), count).await?;
        let mut units = self.config.units.clone();
        units.sort();
        let mut result = Vec::with_capacity(units.len());
        for uid in units {
            let slot = usize::from(STATUS_WORDS * uid.index());
            let Some(block) = words.get(slot..slot + usize::from(STATUS_WORDS)) else {
                debug!(message = "bulk status read ended early", %uid, words = words.len());
                break;
            };
            result.push((uid, UnitStatus::decode(block)?));
        }
        Ok(result)
    }

    pub async fn set_adapter_initial_settings(
        &mut self,
        settings: InitialSettings,
    ) -> Result<(), Error> {
        let register = registers::ADAPTER_INITIAL_SETTINGS;
        let value = settings.word();
        debug!(message = "writing initial settings", ?settings, value);
        self.transport.write_holding_register(register.wire_address(), value).await?;
        Ok(())
    }

    /// Switch a unit on or off. `None` toggles the current state.
    pub async fn set_power(&mut self, uid: u16, on: Option<bool>) -> Result<(), Error> {
        let uid = unit(uid)?;
        self.set_field(uid, ControlWord::First, |w| encode::power(w, on)).await
    }

    pub async fn set_fan_direction(
        &mut self,
        uid: u16,
        direction: FanDirection,
    ) -> Result<(), Error> {
        let uid = unit(uid)?;
        self.set_field(uid, ControlWord::First, |w| encode::fan_direction(w, direction)).await
    }

    pub async fn set_fan_volume(&mut self, uid: u16, volume: FanVolume) -> Result<(), Error> {
        let uid = unit(uid)?;
        self.set_field(uid, ControlWord::First, |w| encode::fan_volume(w, volume)).await
    }

    pub async fn set_operating_mode(&mut self, uid: u16, mode: OperatingMode) -> Result<(), Error> {
        let uid = unit(uid)?;
        self.set_field(uid, ControlWord::Second, |w| encode::operating_mode(w, mode)).await
    }

    /// Raises the reset pattern, then clears it again.
    pub async fn reset_filter_sign(&mut self, uid: u16) -> Result<(), Error> {
        let uid = unit(uid)?;
        self.set_field(uid, ControlWord::Second, |w| encode::filter_sign(w, true)).await?;
        tokio::time::sleep(self.config.silent_interval).await;
        self.set_field(uid, ControlWord::Second, |w| encode::filter_sign(w, false)).await
    }

    /// [`OperatingStatus::Fan`] leaves the choice between heating and cooling to the unit.
    pub async fn set_operating_status(
        &mut self,
        uid: u16,
        status: OperatingStatus,
    ) -> Result<(), Error> {
        let uid = unit(uid)?;
        self.set_field(uid, ControlWord::Second, |w| encode::operating_status(w, status)).await
    }

    pub async fn set_setpoint(&mut self, uid: u16, degrees: f64) -> Result<(), Error> {
        let uid = unit(uid)?;
        let word = setpoint_word(degrees)?;
        self.set_field(uid, ControlWord::Third, |_| word).await
    }

    /// Powers the unit on and changes its mode, fan volume and setpoint in one transaction.
    pub async fn set_compound(
        &mut self,
        uid: u16,
        mode: OperatingMode,
        volume: FanVolume,
        degrees: f64,
    ) -> Result<(), Error> {
        let uid = unit(uid)?;
        let setpoint = setpoint_word(degrees)?;
        debug!(message = "compound write", %uid, %mode, %volume, degrees);
        let words = self.status_words(uid).await?;
        let current = [words[0], words[1], words[2]];
        let address = registers::control_block(uid).wire_address();
        self.transport.write_holding_registers(address, &current).await?;
        tokio::time::sleep(self.config.silent_interval).await;
        let new = encode::compound(current, mode, volume, setpoint);
        debug!(message = "committing control block", %uid, ?current, ?new);
        self.transport.write_holding_registers(address, &new).await?;
        Ok(())
    }

    async fn set_field(
        &mut self,
        uid: Uid,
        word: ControlWord,
        mutate: impl FnOnce(u16) -> u16,
    ) -> Result<(), Error> {
        let words = self.status_words(uid).await?;
        let current = words[word.index()];
        let address = registers::control_word(uid, word).wire_address();
        debug!(message = "priming control word", %uid, ?word, current);
        self.transport.write_holding_register(address, current).await?;
        tokio::time::sleep(self.config.silent_interval).await;
        let new = mutate(current);
        debug!(message = "committing control word", %uid, ?word, current, new);
        self.transport.write_holding_register(address, new).await?;
        Ok(())
    }
}

impl<T: OpenSibling> AdapterHandle<T> {
    pub fn slave_address(&self) -> u8 {
        self.transport.slave_address()
    }

    /// A handle for the adapter at `slave_address` on the same serial line.
    ///
    /// Returns `None` when `slave_address` is this handle's own address; keep using `self`.
    /// `Ok(None)` thus stands for "the same handle", without a second owner of the port.
    pub fn derive_handle(&self, slave_address: u8) -> Result<Option<Self>, Error> {
        if slave_address == self.slave_address() {
            warn!(message = "derived handle would target the same adapter", slave_address);
            return Ok(None);
        }
        let transport = self.transport.open_sibling(slave_address)?;
        Ok(Some(Self { transport, config: self.config.clone() }))
    }
}
