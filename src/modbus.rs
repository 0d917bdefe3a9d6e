use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

pub const FUNCTION_READ_INPUTS: u8 = 0x04;
pub const FUNCTION_WRITE_HOLDING: u8 = 0x06;
pub const FUNCTION_WRITE_HOLDINGS: u8 = 0x10;

/// The most registers a single 0x04 response can carry (250 data bytes).
pub const MAX_READ_COUNT: u16 = 125;
/// The most registers a single 0x10 request can carry.
pub const MAX_WRITE_COUNT: u16 = 123;

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

pub fn checksum(bytes: &[u8]) -> u16 {
    CRC.checksum(bytes)
}

#[derive(Debug, Clone)]
pub struct Request {
    pub device_id: u8,
    pub operation: Operation,
}

/// A single Modbus transaction, with wire-relative (zero based) register addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetInputs { address: u16, count: u16 },
    SetHolding { address: u16, value: u16 },
    SetHoldings { address: u16, values: Vec<u16> },
}

impl Operation {
    pub fn function_code(&self) -> u8 {
        match self {
            Operation::GetInputs { .. } => FUNCTION_READ_INPUTS,
            Operation::SetHolding { .. } => FUNCTION_WRITE_HOLDING,
            Operation::SetHoldings { .. } => FUNCTION_WRITE_HOLDINGS,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode { function: _, code } => Some(*code),
            ResponseKind::GetInputs { values: _ } => None,
            ResponseKind::SetHolding { .. } => None,
            ResponseKind::SetHoldings { .. } => None,
        }
    }

    pub fn function_code(&self) -> u8 {
        match &self.kind {
            ResponseKind::ErrorCode { function, code: _ } => *function,
            ResponseKind::GetInputs { .. } => FUNCTION_READ_INPUTS,
            ResponseKind::SetHolding { .. } => FUNCTION_WRITE_HOLDING,
            ResponseKind::SetHoldings { .. } => FUNCTION_WRITE_HOLDINGS,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    /// `function` is the requested function code, with the exception bit already stripped.
    ErrorCode { function: u8, code: u8 },
    GetInputs { values: Vec<u16> },
    SetHolding { address: u16, value: u16 },
    SetHoldings { address: u16, words: u16 },
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("could not read from or write to the serial line")]
    Io(#[from] std::io::Error),
    #[error("frame checksum mismatch (received {received:#06x}, computed {expected:#06x})")]
    Crc { received: u16, expected: u16 },
    #[error("response carries an unsupported function code {0:#04x}")]
    UnsupportedFunction(u8),
    #[error("read response byte count {0} is not a whole number of registers")]
    OddByteCount(u8),
    #[error("request does not fit into a single frame ({0} registers)")]
    TooManyRegisters(usize),
}

/// Modbus RTU framing: `device id | function | body | crc16 (little endian)`.
///
/// RTU has no length prefix, so the decoder derives the frame length from the function code
/// of the response. Only the responses to the three requests this crate issues are understood.
#[derive(Default)]
pub struct ModbusRTUCodec {}

impl Encoder<&Request> for ModbusRTUCodec {
    type Error = FrameError;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        dst.put_u8(req.device_id);
        dst.put_u8(req.operation.function_code());
        match &req.operation {
            Operation::GetInputs { address, count } => {
                dst.put_u16(*address);
                dst.put_u16(*count);
            }
            Operation::SetHolding { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(*value);
            }
            Operation::SetHoldings { address, values } => {
                let words = u16::try_from(values.len())
                    .ok()
                    .filter(|w| *w <= MAX_WRITE_COUNT)
                    .ok_or(FrameError::TooManyRegisters(values.len()))?;
                dst.put_u16(*address);
                // Quantity is in registers, the byte count that follows in bytes.
                dst.put_u16(words);
                dst.put_u8((words * 2) as u8);
                for value in values {
                    dst.put_u16(*value);
                }
            }
        }
        let crc = checksum(&dst[start..]);
        dst.put_u16_le(crc);
        trace!(message = "sending encoded", buffer = ?&dst[start..]);
        Ok(())
    }
}

impl Decoder for ModbusRTUCodec {
    type Item = Response;
    type Error = FrameError;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        trace!(message = "attempt at decoding", buffer = ?src);
        if src.len() < 2 {
            return Ok(None);
        }
        let (device_id, function_code) = (src[0], src[1]);
        let body_length = if function_code & 0x80 != 0 {
            1
        } else {
            match function_code {
                FUNCTION_READ_INPUTS => {
                    let Some(&byte_count) = src.get(2) else {
                        return Ok(None);
                    };
                    1 + usize::from(byte_count)
                }
                FUNCTION_WRITE_HOLDING | FUNCTION_WRITE_HOLDINGS => 4,
                other => {
                    src.clear();
                    return Err(FrameError::UnsupportedFunction(other));
                }
            }
        };
        let frame_length = 2 + body_length + 2;
        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }
        let frame = src.split_to(frame_length);
        let (payload, crc) = frame.split_at(frame_length - 2);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        let expected = checksum(payload);
        if received != expected {
            return Err(FrameError::Crc { received, expected });
        }
        let mut body = &payload[2..];
        let kind = if function_code & 0x80 != 0 {
            ResponseKind::ErrorCode { function: function_code & 0x7F, code: body.get_u8() }
        } else {
            match function_code {
                FUNCTION_READ_INPUTS => {
                    let byte_count = body.get_u8();
                    if byte_count % 2 != 0 {
                        return Err(FrameError::OddByteCount(byte_count));
                    }
                    let values = body.chunks_exact(2).map(|w| u16::from_be_bytes([w[0], w[1]]));
                    ResponseKind::GetInputs { values: values.collect() }
                }
                FUNCTION_WRITE_HOLDING => {
                    ResponseKind::SetHolding { address: body.get_u16(), value: body.get_u16() }
                }
                _ => ResponseKind::SetHoldings { address: body.get_u16(), words: body.get_u16() },
            }
        };
        Ok(Some(Response { device_id, kind }))
    }
}
