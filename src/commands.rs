use crate::adapter::{self, AdapterConfig, AdapterHandle};
use crate::codes::{Code, Coded, FanDirection, FanVolume, OperatingMode, OperatingStatus, Power};
use crate::connection;
use crate::decode::{AdapterStatus, UnitBitmap, UnitCapability, UnitStatus};
use crate::encode::InitialSettings;
use crate::output::{self, Record};
use crate::registers::Uid;
use clap::builder::{PossibleValuesParser, TypedValueParser};
use std::str::FromStr;
use strum::VariantNames;
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not connect to the adapter")]
    Connect(#[source] connection::Error),
    #[error("adapter operation failed")]
    Adapter(#[from] adapter::Error),
    #[error("could not output the results")]
    Output(#[from] output::Error),
}

/// Accepts the labels of a coded field, e.g. `medium` for [`FanVolume::Medium`].
fn code_parser<T>() -> impl TypedValueParser<Value = T>
where
    T: VariantNames + FromStr<Err = strum::ParseError> + Clone + Send + Sync + 'static,
{
    PossibleValuesParser::new(T::VARIANTS.iter().copied()).try_map(|label| label.parse::<T>())
}

#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    connection: connection::Args,
    #[clap(flatten)]
    output: output::Args,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Whether the adapter is ready to accept commands.
    AdapterStatus,
    /// Which indoor units are connected to the adapter.
    Connections,
    /// Which indoor units the adapter is communicating with.
    Communications,
    /// Status of one indoor unit, or of all of them with a single read.
    Status { uid: Option<u16> },
    /// Modes, fan steps and setpoint limits supported by an indoor unit.
    Capability { uid: u16 },
    /// Switch an indoor unit on or off. Without a state the unit is toggled.
    Power {
        uid: u16,
        #[arg(value_parser = code_parser::<Power>())]
        state: Option<Power>,
    },
    FanDirection {
        uid: u16,
        #[arg(value_parser = code_parser::<FanDirection>())]
        direction: FanDirection,
    },
    FanVolume {
        uid: u16,
        #[arg(value_parser = code_parser::<FanVolume>())]
        volume: FanVolume,
    },
    Mode {
        uid: u16,
        #[arg(value_parser = code_parser::<OperatingMode>())]
        mode: OperatingMode,
    },
    /// Clear the filter sign of an indoor unit.
    FilterReset { uid: u16 },
    /// Select heating or cooling. `fan` leaves the choice to the unit.
    OpStatus {
        uid: u16,
        #[arg(value_parser = code_parser::<OperatingStatus>())]
        status: OperatingStatus,
    },
    /// Set the target temperature in degrees Celsius.
    Setpoint {
        uid: u16,
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    /// Power on and set mode, fan volume and target temperature at once.
    Compound {
        uid: u16,
        #[arg(value_parser = code_parser::<OperatingMode>())]
        mode: OperatingMode,
        #[arg(value_parser = code_parser::<FanVolume>())]
        volume: FanVolume,
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    /// Write the adapter's initial settings.
    InitSettings {
        #[arg(long)]
        managed: bool,
        #[arg(long)]
        master: bool,
        #[arg(long)]
        comm_start: bool,
    },
}

#[derive(serde::Serialize)]
struct StatusRecord {
    uid: Uid,
    #[serde(flatten)]
    status: UnitStatus,
}

impl Record for StatusRecord {
    const HEADERS: &'static [&'static str] = &[
        "UID",
        "Power",
        "Mode",
        "Op. status",
        "Setpoint",
        "Room",
        "Fan volume",
        "Fan direction",
        "Filter",
        "Role",
        "Forced off",
        "Errors",
        "Malfunction",
        "Warning",
        "Sensor",
        "Sensor data",
    ];

    fn cells(&self) -> Vec<String> {
        let s = &self.status;
        vec![
            self.uid.to_string(),
            s.power.to_string(),
            s.operating_mode.to_string(),
            s.operating_status.to_string(),
            s.setpoint.to_string(),
            format!("{:.2}", s.room_temperature.degrees()),
            s.fan_volume.to_string(),
            s.fan_direction.to_string(),
            s.filter_sign.to_string(),
            s.master_slave.to_string(),
            s.forced_off.to_string(),
            format!("{}/{}", s.error_code_1, s.error_code_2),
            s.malfunction.to_string(),
            s.warning.to_string(),
            s.sensor_error.to_string(),
            s.sensor_data.to_string(),
        ]
    }
}

#[derive(serde::Serialize)]
struct CapabilityRecord {
    uid: Uid,
    #[serde(flatten)]
    capability: UnitCapability,
}

impl Record for CapabilityRecord {
    const HEADERS: &'static [&'static str] = &[
        "UID",
        "Fan",
        "Cooling",
        "Heating",
        "Auto",
        "Dry",
        "Fan direction",
        "Fan volume",
        "Cooling setpoint",
        "Heating setpoint",
    ];

    fn cells(&self) -> Vec<String> {
        let c = &self.capability;
        vec![
            self.uid.to_string(),
            c.fan_mode.to_string(),
            c.cooling_mode.to_string(),
            c.heating_mode.to_string(),
            c.auto_mode.to_string(),
            c.dry_mode.to_string(),
            format!("{} ({})", c.fan_direction, c.fan_direction_steps),
            format!("{} ({})", c.fan_volume, c.fan_volume_steps),
            format!("{}..{}", c.cooling_setpoint.lower, c.cooling_setpoint.upper),
            format!("{}..{}", c.heating_setpoint.lower, c.heating_setpoint.upper),
        ]
    }
}

impl Record for AdapterStatus {
    const HEADERS: &'static [&'static str] = &["Adapter"];

    fn cells(&self) -> Vec<String> {
        vec![self.ready.to_string()]
    }
}

#[derive(serde::Serialize)]
#[serde(bound(serialize = "T: Code"))]
struct FlagRecord<T> {
    uid: Uid,
    state: Coded<T>,
}

impl<T: Code> Record for FlagRecord<T> {
    const HEADERS: &'static [&'static str] = &["UID", "State"];

    fn cells(&self) -> Vec<String> {
        vec![self.uid.to_string(), self.state.to_string()]
    }
}

fn flag_records<T: Code>(bitmap: UnitBitmap<T>) -> Vec<FlagRecord<T>> {
    bitmap.units.into_iter().map(|flag| FlagRecord { uid: flag.uid, state: flag.state }).collect()
}

/// Acknowledgement of a completed write.
#[derive(serde::Serialize)]
struct WriteRecord {
    uid: Option<u16>,
    operation: &'static str,
    result: &'static str,
}

impl WriteRecord {
    fn ok(uid: Option<u16>, operation: &'static str) -> Self {
        info!(message = "write completed", uid, operation);
        WriteRecord { uid, operation, result: "ok" }
    }
}

impl Record for WriteRecord {
    const HEADERS: &'static [&'static str] = &["UID", "Operation", "Result"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.uid.map(|uid| uid.to_string()).unwrap_or_default(),
            self.operation.to_string(),
            self.result.to_string(),
        ]
    }
}

pub async fn run(args: Args) -> Result<(), Error> {
    let connection = args.connection.open().map_err(Error::Connect)?;
    let mut adapter = AdapterHandle::new(connection, AdapterConfig::default());
    let output = args.output.to_output()?;
    let written = match args.command {
        Command::AdapterStatus => {
            let status = adapter.get_adapter_status().await?;
            return Ok(output.records(&[status])?);
        }
        Command::Connections => {
            let map = adapter.get_connection_map().await?;
            return Ok(output.records(&flag_records(map))?);
        }
        Command::Communications => {
            let map = adapter.get_communication_map().await?;
            return Ok(output.records(&flag_records(map))?);
        }
        Command::Status { uid: Some(uid) } => {
            let status = adapter.get_status(uid).await?;
            let uid = Uid::new(uid).ok_or(adapter::Error::InvalidUnit(uid))?;
            return Ok(output.records(&[StatusRecord { uid, status }])?);
        }
        Command::Status { uid: None } => {
            let all = adapter.get_all_status().await?;
            let records = all
                .into_iter()
                .map(|(uid, status)| StatusRecord { uid, status })
                .collect::<Vec<_>>();
            return Ok(output.records(&records)?);
        }
        Command::Capability { uid } => {
            let capability = adapter.get_capability(uid).await?;
            let uid = Uid::new(uid).ok_or(adapter::Error::InvalidUnit(uid))?;
            return Ok(output.records(&[CapabilityRecord { uid, capability }])?);
        }
        Command::Power { uid, state } => {
            adapter.set_power(uid, state.map(|s| s == Power::On)).await?;
            WriteRecord::ok(Some(uid), "power")
        }
        Command::FanDirection { uid, direction } => {
            adapter.set_fan_direction(uid, direction).await?;
            WriteRecord::ok(Some(uid), "fan-direction")
        }
        Command::FanVolume { uid, volume } => {
            adapter.set_fan_volume(uid, volume).await?;
            WriteRecord::ok(Some(uid), "fan-volume")
        }
        Command::Mode { uid, mode } => {
            adapter.set_operating_mode(uid, mode).await?;
            WriteRecord::ok(Some(uid), "mode")
        }
        Command::FilterReset { uid } => {
            adapter.reset_filter_sign(uid).await?;
            WriteRecord::ok(Some(uid), "filter-reset")
        }
        Command::OpStatus { uid, status } => {
            adapter.set_operating_status(uid, status).await?;
            WriteRecord::ok(Some(uid), "op-status")
        }
        Command::Setpoint { uid, degrees } => {
            adapter.set_setpoint(uid, degrees).await?;
            WriteRecord::ok(Some(uid), "setpoint")
        }
        Command::Compound { uid, mode, volume, degrees } => {
            adapter.set_compound(uid, mode, volume, degrees).await?;
            WriteRecord::ok(Some(uid), "compound")
        }
        Command::InitSettings { managed, master, comm_start } => {
            let settings = InitialSettings { managed, master, communication_start: comm_start };
            adapter.set_adapter_initial_settings(settings).await?;
            WriteRecord::ok(None, "init-settings")
        }
    };
    Ok(output.records(&[written])?)
}
