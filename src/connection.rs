use crate::modbus::{self, FrameError, ModbusRTUCodec, Operation, Request, Response, ResponseKind};
use futures::{SinkExt as _, StreamExt as _};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt as _, SerialStream, StopBits};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the serial port {1:?}")]
    OpenPort(#[source] tokio_serial::Error, String),
    #[error("could not send out the request")]
    Send(#[source] FrameError),
    #[error("could not receive the response")]
    Receive(#[source] FrameError),
    #[error("the serial line closed before a response arrived")]
    Closed,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("the adapter responded with modbus exception code {0}")]
    Exception(u8),
    #[error("the response does not match the request ({0})")]
    UnexpectedResponse(&'static str),
    #[error("invalid request ({0})")]
    InvalidRequest(&'static str),
}

impl Error {
    /// Whether repeating the same transaction could succeed.
    ///
    /// Illegal function, illegal data address and illegal data value exceptions describe the
    /// request itself, so they will come back the same every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Exception(1..=3) => false,
            Error::OpenPort(..) | Error::InvalidRequest(_) => false,
            Error::Send(FrameError::TooManyRegisters(_)) => false,
            _ => true,
        }
    }
}

/// Register-level access to one slave on the bus.
///
/// Addresses are wire-relative. Implementations must not let two transactions overlap.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error>;
    async fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), Error>;
    async fn write_holding_registers(&mut self, address: u16, values: &[u16]) -> Result<(), Error>;
}

/// Transports which can open another connection to a different slave on the same line.
pub trait OpenSibling: Sized {
    fn slave_address(&self) -> u8;
    fn open_sibling(&self, slave_address: u8) -> Result<Self, Error>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    /// Upper bound on a single request/response exchange.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 19200,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
            timeout: Duration::from_secs(1),
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum ParityArg {
    None,
    Even,
    Odd,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DataBitsArg {
    #[value(name = "7")]
    Seven,
    #[value(name = "8")]
    Eight,
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// The serial device the RS-485 line to the DIII-NET adapter is attached to.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// The modbus slave address of the adapter.
    #[arg(long, short = 'a', default_value = "1", value_parser = clap::value_parser!(u8).range(1..=247))]
    slave_address: u8,

    #[arg(long, default_value = "19200")]
    baudrate: u32,

    #[arg(long, value_enum, default_value_t = ParityArg::Even)]
    parity: ParityArg,

    #[arg(long, value_enum, default_value_t = StopBitsArg::One)]
    stop_bits: StopBitsArg,

    #[arg(long, value_enum, default_value_t = DataBitsArg::Eight)]
    data_bits: DataBitsArg,

    /// If the modbus response isn't received in this amount of time, consider the request
    /// failed.
    ///
    /// Failed requests are retried a few times before giving up.
    #[arg(long, default_value = "1s")]
    timeout: humantime::Duration,
}

impl Args {
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baudrate: self.baudrate,
            parity: match self.parity {
                ParityArg::None => Parity::None,
                ParityArg::Even => Parity::Even,
                ParityArg::Odd => Parity::Odd,
            },
            stop_bits: match self.stop_bits {
                StopBitsArg::One => StopBits::One,
                StopBitsArg::Two => StopBits::Two,
            },
            data_bits: match self.data_bits {
                DataBitsArg::Seven => DataBits::Seven,
                DataBitsArg::Eight => DataBits::Eight,
            },
            timeout: *self.timeout,
        }
    }

    pub fn open(&self) -> Result<RtuConnection, Error> {
        RtuConnection::open(self.serial_config(), self.slave_address)
    }
}

/// Modbus RTU master for a single slave address.
pub struct RtuConnection<T = SerialStream> {
    io: Framed<T, ModbusRTUCodec>,
    config: SerialConfig,
    slave_address: u8,
}

impl RtuConnection<SerialStream> {
    pub fn open(config: SerialConfig, slave_address: u8) -> Result<Self, Error> {
        info!(
            message = "opening serial port",
            port = config.port,
            baudrate = config.baudrate,
            slave_address
        );
        let open_error = |e| Error::OpenPort(e, config.port.clone());
        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(&config.port, config.baudrate)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .data_bits(config.data_bits)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(open_error)?;
        // Handles for other adapters on the same line open the port again.
        #[cfg(unix)]
        stream.set_exclusive(false).map_err(open_error)?;
        Ok(Self::new(stream, config, slave_address))
    }
}

impl OpenSibling for RtuConnection<SerialStream> {
    fn slave_address(&self) -> u8 {
        self.slave_address
    }

    fn open_sibling(&self, slave_address: u8) -> Result<Self, Error> {
        Self::open(self.config.clone(), slave_address)
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> RtuConnection<T> {
    pub fn new(io: T, config: SerialConfig, slave_address: u8) -> Self {
        Self { io: Framed::new(io, ModbusRTUCodec::default()), config, slave_address }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    async fn transact(&mut self, operation: Operation) -> Result<ResponseKind, Error> {
        let request = Request { device_id: self.slave_address, operation };
        // Leftovers of an earlier, abandoned exchange must not be taken for this response.
        self.io.read_buffer_mut().clear();
        let timeout = self.config.timeout;
        let response = match tokio::time::timeout(timeout, self.exchange(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.io.read_buffer_mut().clear();
                return Err(e);
            }
            Err(_) => {
                debug!(message = "request timed out", ?timeout, ?request);
                return Err(Error::Timeout(timeout));
            }
        };
        if let Some(code) = response.exception_code() {
            return Err(Error::Exception(code));
        }
        if response.function_code() != request.operation.function_code() {
            return Err(Error::UnexpectedResponse("function code"));
        }
        Ok(response.kind)
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, Error> {
        self.io.send(request).await.map_err(Error::Send)?;
        loop {
            match self.io.next().await {
                None => return Err(Error::Closed),
                Some(Err(e)) => {
                    // After a decoding error the stream yields one `None` before it reads again.
                    let _ = self.io.next().await;
                    return Err(Error::Receive(e));
                }
                Some(Ok(response)) if response.device_id != request.device_id => {
                    debug!(
                        message = "ignoring a response from another device",
                        device = response.device_id
                    );
                }
                Some(Ok(response)) => {
                    trace!(message = "decoded a response", ?response);
                    return Ok(response);
                }
            }
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Transport for RtuConnection<T> {
    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        if count == 0 || count > modbus::MAX_READ_COUNT {
            return Err(Error::InvalidRequest("register count must be within 1..=125"));
        }
        match self.transact(Operation::GetInputs { address, count }).await? {
            ResponseKind::GetInputs { values } if values.len() == usize::from(count) => Ok(values),
            _ => Err(Error::UnexpectedResponse("register count")),
        }
    }

    async fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        match self.transact(Operation::SetHolding { address, value }).await? {
            ResponseKind::SetHolding { address: a, value: v } if a == address && v == value => {
                Ok(())
            }
            _ => Err(Error::UnexpectedResponse("write echo")),
        }
    }

    async fn write_holding_registers(&mut self, address: u16, values: &[u16]) -> Result<(), Error> {
        if values.is_empty() {
            return Err(Error::InvalidRequest("nothing to write"));
        }
        let operation = Operation::SetHoldings { address, values: values.to_vec() };
        match self.transact(operation).await? {
            ResponseKind::SetHoldings { address: a, words }
                if a == address && usize::from(words) == values.len() =>
            {
                Ok(())
            }
            _ => Err(Error::UnexpectedResponse("write echo")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const UNIT_ID: u8 = 0x2A;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend(modbus::checksum(body).to_le_bytes());
        frame
    }

    fn connection(mock: tokio_test::io::Mock) -> RtuConnection<tokio_test::io::Mock> {
        RtuConnection::new(mock, SerialConfig::default(), UNIT_ID)
    }

    #[tokio::test]
    async fn reads_input_registers() {
        let mock = Builder::new()
            .write(&[UNIT_ID, 0x04, 0x00, 0x10, 0x00, 0x03, 0xB7, 0xD5])
            .read(&[UNIT_ID, 0x04, 0x06, 0x12, 0x34, 0x56, 0x78, 0x23, 0x45, 0x71, 0x86])
            .build();
        let values = connection(mock).read_input_registers(0x10, 3).await.unwrap();
        assert_eq!(values, [0x1234, 0x5678, 0x2345]);
    }

    #[tokio::test]
    async fn reassembles_a_split_response() {
        let mock = Builder::new()
            .write(&[UNIT_ID, 0x04, 0x00, 0x10, 0x00, 0x03, 0xB7, 0xD5])
            .read(&[UNIT_ID, 0x04, 0x06, 0x12])
            .read(&[0x34, 0x56, 0x78, 0x23, 0x45, 0x71, 0x86])
            .build();
        let values = connection(mock).read_input_registers(0x10, 3).await.unwrap();
        assert_eq!(values, [0x1234, 0x5678, 0x2345]);
    }

    #[tokio::test]
    async fn writes_single_register() {
        let echo = [UNIT_ID, 0x06, 0x00, 0x10, 0x12, 0x34, 0x83, 0x63];
        let mock = Builder::new().write(&echo).read(&echo).build();
        connection(mock).write_holding_register(0x10, 0x1234).await.unwrap();
    }

    #[tokio::test]
    async fn writes_multiple_registers_in_one_frame() {
        let mock = Builder::new()
            .write(&[
                UNIT_ID, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78, 0x07, 0x73,
            ])
            .read(&[UNIT_ID, 0x10, 0x00, 0x10, 0x00, 0x02, 0x46, 0x16])
            .build();
        connection(mock).write_holding_registers(0x10, &[0x1234, 0x5678]).await.unwrap();
    }

    #[tokio::test]
    async fn exception_responses_are_errors() {
        let mock = Builder::new()
            .write(&frame(&[UNIT_ID, 0x04, 0x00, 0x10, 0x00, 0x03]))
            .read(&frame(&[UNIT_ID, 0x84, 0x02]))
            .build();
        let error = connection(mock).read_input_registers(0x10, 3).await.unwrap_err();
        assert!(matches!(error, Error::Exception(2)));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn responses_from_other_slaves_are_skipped() {
        let mock = Builder::new()
            .write(&frame(&[UNIT_ID, 0x04, 0x00, 0x00, 0x00, 0x01]))
            .read(&frame(&[0x07, 0x04, 0x02, 0xFF, 0xFF]))
            .read(&frame(&[UNIT_ID, 0x04, 0x02, 0x00, 0x01]))
            .build();
        let values = connection(mock).read_input_registers(0, 1).await.unwrap();
        assert_eq!(values, [0x0001]);
    }

    #[tokio::test]
    async fn short_read_is_rejected() {
        let mock = Builder::new()
            .write(&frame(&[UNIT_ID, 0x04, 0x00, 0x00, 0x00, 0x02]))
            .read(&frame(&[UNIT_ID, 0x04, 0x02, 0x00, 0x01]))
            .build();
        let error = connection(mock).read_input_registers(0, 2).await.unwrap_err();
        assert!(matches!(error, Error::UnexpectedResponse(_)));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn corrupted_response_is_a_receive_error() {
        let mut response = frame(&[UNIT_ID, 0x06, 0x00, 0x10, 0x12, 0x34]);
        response[5] = 0x35;
        let mock = Builder::new()
            .write(&frame(&[UNIT_ID, 0x06, 0x00, 0x10, 0x12, 0x34]))
            .read(&response)
            .build();
        let error = connection(mock).write_holding_register(0x10, 0x1234).await.unwrap_err();
        assert!(matches!(error, Error::Receive(FrameError::Crc { .. })));
        assert!(error.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_slave_times_out() {
        let mock = Builder::new()
            .write(&frame(&[UNIT_ID, 0x04, 0x00, 0x00, 0x00, 0x01]))
            .wait(Duration::from_secs(10))
            .build();
        let started = tokio::time::Instant::now();
        let error = connection(mock).read_input_registers(0, 1).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(t) if t == Duration::from_secs(1)));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn invalid_counts_never_reach_the_wire() {
        let mut connection = connection(Builder::new().build());
        let error = connection.read_input_registers(0, 126).await.unwrap_err();
        assert!(matches!(error, Error::InvalidRequest(_)));
        let error = connection.write_holding_registers(0, &[]).await.unwrap_err();
        assert!(!error.is_retryable());
    }
}
