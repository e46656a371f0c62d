//! Modbus RTU framing for the three function codes the XY PSUs need.
//!
//! Outbound frames are built into fixed-capacity [`Frame`] buffers. Inbound frames are
//! classified into a [`Reply`]. The CRC of inbound frames is computed and reported in
//! [`Decoded::crc_ok`], but a mismatch does not reject the frame.

use thiserror::Error;

/// Read holding registers.
pub const FN_READ_HOLDINGS: u8 = 0x03;
/// Write single register.
pub const FN_WRITE_SINGLE: u8 = 0x06;
/// Write multiple registers.
pub const FN_WRITE_MULTIPLE: u8 = 0x10;
/// Set in the function byte of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Largest RTU frame on the wire.
pub const MAX_FRAME_LEN: usize = 256;
/// Protocol limit on registers per read.
pub const MAX_READ_WORDS: usize = 125;
/// Protocol limit on registers per multiple write.
pub const MAX_WRITE_WORDS: usize = 123;

const CRC_LEN: usize = 2;
const CRC_POLY: u16 = 0xA001;
const CRC_TABLE: [u16; 256] = build_crc_table();

pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;
pub type Words = heapless::Vec<u16, MAX_READ_WORDS>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Register count out of range")]
    InvalidCount,
    #[error("Frame buffer overflow")]
    BufferOverflow,
}

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ CRC_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Modbus CRC16 (reflected 0xA001, init 0xFFFF). Goes on the wire little-endian.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &byte| {
        (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u16) & 0x00FF) as usize]
    })
}

fn extend(frame: &mut Frame, bytes: &[u8]) -> Result<(), CodecError> {
    frame
        .extend_from_slice(bytes)
        .map_err(|_| CodecError::BufferOverflow)
}

fn finish(mut frame: Frame) -> Result<Frame, CodecError> {
    let crc = crc16(&frame);
    extend(&mut frame, &crc.to_le_bytes())?;
    Ok(frame)
}

/// `[addr][0x03][start][count][crc]`
pub fn encode_read_holdings(address: u8, start: u16, count: u16) -> Result<Frame, CodecError> {
    if count == 0 || count as usize > MAX_READ_WORDS {
        return Err(CodecError::InvalidCount);
    }
    let mut frame = Frame::new();
    extend(&mut frame, &[address, FN_READ_HOLDINGS])?;
    extend(&mut frame, &start.to_be_bytes())?;
    extend(&mut frame, &count.to_be_bytes())?;
    finish(frame)
}

/// `[addr][0x06][index][value][crc]`
pub fn encode_write_single(address: u8, index: u16, value: u16) -> Result<Frame, CodecError> {
    let mut frame = Frame::new();
    extend(&mut frame, &[address, FN_WRITE_SINGLE])?;
    extend(&mut frame, &index.to_be_bytes())?;
    extend(&mut frame, &value.to_be_bytes())?;
    finish(frame)
}

/// `[addr][0x10][start][count][byte count][values][crc]`
pub fn encode_write_multiple(
    address: u8,
    start: u16,
    values: &[u16],
) -> Result<Frame, CodecError> {
    if values.is_empty() || values.len() > MAX_WRITE_WORDS {
        return Err(CodecError::InvalidCount);
    }
    let count = values.len() as u16;
    let mut frame = Frame::new();
    extend(&mut frame, &[address, FN_WRITE_MULTIPLE])?;
    extend(&mut frame, &start.to_be_bytes())?;
    extend(&mut frame, &count.to_be_bytes())?;
    extend(&mut frame, &[(count * 2) as u8])?;
    for value in values {
        extend(&mut frame, &value.to_be_bytes())?;
    }
    finish(frame)
}

/// Exception codes a slave may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        use ExceptionCode as EC;
        match value {
            0x01 => EC::IllegalFunction,
            0x02 => EC::IllegalDataAddress,
            0x03 => EC::IllegalDataValue,
            0x04 => EC::SlaveDeviceFailure,
            0x05 => EC::Acknowledge,
            0x06 => EC::SlaveDeviceBusy,
            0x07 => EC::NegativeAcknowledge,
            0x08 => EC::MemoryParityError,
            0x0A => EC::GatewayPathUnavailable,
            0x0B => EC::GatewayTargetFailed,
            other => EC::Unknown(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(value: ExceptionCode) -> Self {
        use ExceptionCode as EC;
        match value {
            EC::IllegalFunction => 0x01,
            EC::IllegalDataAddress => 0x02,
            EC::IllegalDataValue => 0x03,
            EC::SlaveDeviceFailure => 0x04,
            EC::Acknowledge => 0x05,
            EC::SlaveDeviceBusy => 0x06,
            EC::NegativeAcknowledge => 0x07,
            EC::MemoryParityError => 0x08,
            EC::GatewayPathUnavailable => 0x0A,
            EC::GatewayTargetFailed => 0x0B,
            EC::Unknown(other) => other,
        }
    }
}

impl From<ExceptionCode> for rmodbus::ErrorKind {
    fn from(value: ExceptionCode) -> Self {
        use rmodbus::ErrorKind as EK;
        use ExceptionCode as EC;
        match value {
            EC::IllegalFunction => EK::IllegalFunction,
            EC::IllegalDataAddress => EK::IllegalDataAddress,
            EC::IllegalDataValue => EK::IllegalDataValue,
            EC::SlaveDeviceFailure => EK::SlaveDeviceFailure,
            EC::Acknowledge => EK::Acknowledge,
            EC::SlaveDeviceBusy => EK::SlaveDeviceBusy,
            EC::NegativeAcknowledge => EK::NegativeAcknowledge,
            EC::MemoryParityError => EK::MemoryParityError,
            EC::GatewayPathUnavailable => EK::GatewayPathUnavailable,
            EC::GatewayTargetFailed => EK::GatewayTargetFailed,
            EC::Unknown(_) => EK::UnknownError,
        }
    }
}

/// Classification of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    ReadReply(Words),
    WriteSingleConfirm { index: u16, value: u16 },
    WriteMultipleConfirm { start: u16, count: u16 },
    /// `function` is the request function code, with the exception flag stripped.
    Exception { function: u8, code: ExceptionCode },
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Slave address byte as received.
    pub address: u8,
    pub reply: Reply,
    /// Whether the trailer matched. Informational only.
    pub crc_ok: bool,
}

/// How much of the receive buffer forms the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    NeedMore,
    Complete(usize),
    /// Header can never become a valid frame.
    Garbage,
}

fn byte_count_ok(byte_count: u8, max_words: usize) -> bool {
    byte_count % 2 == 0 && byte_count as usize <= max_words.min(MAX_READ_WORDS) * 2
}

/// Work out the length of the frame at the start of `buf` from its header.
pub fn framing(buf: &[u8], max_words: usize) -> Framing {
    let Some(&function) = buf.get(1) else {
        return Framing::NeedMore;
    };
    let len = if function & EXCEPTION_FLAG != 0 {
        3 + CRC_LEN
    } else {
        match function {
            FN_READ_HOLDINGS => {
                let Some(&byte_count) = buf.get(2) else {
                    return Framing::NeedMore;
                };
                if !byte_count_ok(byte_count, max_words) {
                    return Framing::Garbage;
                }
                3 + byte_count as usize + CRC_LEN
            }
            FN_WRITE_SINGLE | FN_WRITE_MULTIPLE => 6 + CRC_LEN,
            _ => return Framing::Garbage,
        }
    };
    if buf.len() >= len {
        Framing::Complete(len)
    } else {
        Framing::NeedMore
    }
}

fn word_at(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}

/// Classify one complete frame. `max_words` bounds the payload of a read reply.
pub fn decode(frame: &[u8], max_words: usize) -> Decoded {
    let address = frame.first().copied().unwrap_or_default();
    let crc_ok = frame.len() > CRC_LEN + 1 && {
        let (body, trailer) = frame.split_at(frame.len() - CRC_LEN);
        crc16(body).to_le_bytes() == [trailer[0], trailer[1]]
    };
    Decoded {
        address,
        reply: decode_reply(frame, max_words),
        crc_ok,
    }
}

fn decode_reply(frame: &[u8], max_words: usize) -> Reply {
    let Some(&function) = frame.get(1) else {
        return Reply::Malformed;
    };

    if function & EXCEPTION_FLAG != 0 {
        return match frame.get(2) {
            Some(&code) if frame.len() >= 3 + CRC_LEN => Reply::Exception {
                function: function & !EXCEPTION_FLAG,
                code: code.into(),
            },
            _ => Reply::Malformed,
        };
    }

    match function {
        FN_READ_HOLDINGS => {
            let Some(&byte_count) = frame.get(2) else {
                return Reply::Malformed;
            };
            let end = 3 + byte_count as usize;
            if !byte_count_ok(byte_count, max_words) || frame.len() < end + CRC_LEN {
                return Reply::Malformed;
            }
            let mut values = Words::new();
            for word in frame[3..end].chunks_exact(2) {
                if values.push(u16::from_be_bytes([word[0], word[1]])).is_err() {
                    return Reply::Malformed;
                }
            }
            Reply::ReadReply(values)
        }
        FN_WRITE_SINGLE if frame.len() >= 6 + CRC_LEN => Reply::WriteSingleConfirm {
            index: word_at(frame, 2),
            value: word_at(frame, 4),
        },
        FN_WRITE_MULTIPLE if frame.len() >= 6 + CRC_LEN => Reply::WriteMultipleConfirm {
            start: word_at(frame, 2),
            count: word_at(frame, 4),
        },
        _ => Reply::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_golden_vectors() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
        // Same vectors the PSU answers with, calculated using: https://homepages.plus.net/dougrice/dev/modbus/crc.html
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x20, 0x00, 0x01]).to_le_bytes(), [0x85, 0xC0]);
        assert_eq!(crc16(&[0x01, 0x03, 0x02, 0x56, 0x78]).to_le_bytes(), [0x87, 0xC6]);
        assert_eq!(crc16(&[0x01, 0x06, 0x00, 0x10, 0x12, 0x34]).to_le_bytes(), [0x85, 0x78]);
    }

    #[test]
    fn read_request_layout() {
        let frame = encode_read_holdings(0x01, 0x0002, 1).unwrap();
        assert_eq!(frame.as_slice(), &[0x01, 0x03, 0x00, 0x02, 0x00, 0x01, 0x25, 0xCA]);
    }

    #[test]
    fn write_single_layout() {
        let frame = encode_write_single(0x01, 0x0000, 0x0960).unwrap();
        assert_eq!(frame.as_slice(), &[0x01, 0x06, 0x00, 0x00, 0x09, 0x60, 0x8F, 0xB2]);
    }

    #[test]
    fn write_multiple_layout() {
        let frame = encode_write_multiple(0x01, 0x50, &[0x1234, 0x0001]).unwrap();
        assert_eq!(frame.len(), 7 + 4 + 2);
        assert_eq!(&frame[..11], &[0x01, 0x10, 0x00, 0x50, 0x00, 0x02, 0x04, 0x12, 0x34, 0x00, 0x01]);
        let crc = crc16(&frame[..11]).to_le_bytes();
        assert_eq!(&frame[11..], &crc);
    }

    #[test]
    fn encoding_matches_rmodbus() {
        use rmodbus::{ModbusProto, client::ModbusRequest};

        let mut req = ModbusRequest::new(0x01, ModbusProto::Rtu);
        let mut expected = Vec::new();
        req.generate_get_holdings(0, 31, &mut expected).unwrap();
        assert_eq!(encode_read_holdings(0x01, 0, 31).unwrap().as_slice(), expected.as_slice());

        let mut expected = Vec::new();
        req.generate_set_holding(0x12, 1, &mut expected).unwrap();
        assert_eq!(encode_write_single(0x01, 0x12, 1).unwrap().as_slice(), expected.as_slice());

        let words = [500u16, 100, 0, 6500, 1000, 9999, 99, 59, 0, 1, 0, 2, 100, 1];
        let mut expected = Vec::new();
        req.generate_set_holdings_bulk(0x60, &words, &mut expected).unwrap();
        assert_eq!(encode_write_multiple(0x01, 0x60, &words).unwrap().as_slice(), expected.as_slice());
    }

    #[test]
    fn encode_rejects_bad_counts() {
        assert_eq!(encode_read_holdings(1, 0, 0), Err(CodecError::InvalidCount));
        assert_eq!(encode_read_holdings(1, 0, 126), Err(CodecError::InvalidCount));
        assert_eq!(encode_write_multiple(1, 0, &[]), Err(CodecError::InvalidCount));
        assert_eq!(encode_write_multiple(1, 0, &[0; 124]), Err(CodecError::InvalidCount));
    }

    #[test]
    fn decode_read_reply() {
        let decoded = decode(&[0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6], 31);
        assert_eq!(decoded.address, 0x01);
        assert!(decoded.crc_ok);
        match decoded.reply {
            Reply::ReadReply(values) => assert_eq!(values.as_slice(), &[0x5678]),
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn decode_ignores_bad_crc() {
        let decoded = decode(&[0x01, 0x03, 0x02, 0x56, 0x78, 0x00, 0x00], 31);
        assert!(!decoded.crc_ok);
        assert!(matches!(decoded.reply, Reply::ReadReply(_)));
    }

    #[test]
    fn decode_oversized_byte_count_is_malformed() {
        // 4 registers declared, but only 2 allowed.
        let frame = [0x01, 0x03, 0x08, 0, 1, 0, 2, 0, 3, 0, 4, 0, 0];
        assert_eq!(decode(&frame, 2).reply, Reply::Malformed);
        assert_eq!(framing(&frame, 2), Framing::Garbage);
    }

    #[test]
    fn decode_write_confirms() {
        let single = decode(&[0x01, 0x06, 0x00, 0x10, 0x12, 0x34, 0x85, 0x78], 31);
        assert_eq!(single.reply, Reply::WriteSingleConfirm { index: 0x10, value: 0x1234 });

        let multiple = decode(&[0x01, 0x10, 0x00, 0x50, 0x00, 0x0E, 0x00, 0x00], 31);
        assert_eq!(multiple.reply, Reply::WriteMultipleConfirm { start: 0x50, count: 14 });
    }

    #[test]
    fn decode_exception_strips_flag() {
        let body = [0x01, 0x86, 0x02];
        let crc = crc16(&body).to_le_bytes();
        let frame = [body[0], body[1], body[2], crc[0], crc[1]];
        let decoded = decode(&frame, 31);
        assert_eq!(
            decoded.reply,
            Reply::Exception { function: FN_WRITE_SINGLE, code: ExceptionCode::IllegalDataAddress }
        );
        assert_eq!(framing(&frame, 31), Framing::Complete(5));
    }

    #[test]
    fn decode_unknown_function_is_malformed() {
        assert_eq!(decode(&[0x01, 0x2B, 0, 0, 0, 0, 0, 0], 31).reply, Reply::Malformed);
        assert_eq!(framing(&[0x01, 0x2B, 0], 31), Framing::Garbage);
    }

    #[test]
    fn framing_waits_for_whole_frame() {
        assert_eq!(framing(&[0x01], 31), Framing::NeedMore);
        assert_eq!(framing(&[0x01, 0x03], 31), Framing::NeedMore);
        assert_eq!(framing(&[0x01, 0x03, 0x02, 0x56], 31), Framing::NeedMore);
        assert_eq!(framing(&[0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6, 0x01], 31), Framing::Complete(7));
        assert_eq!(framing(&[0x01, 0x06, 0, 0, 0, 0, 0], 31), Framing::NeedMore);
    }

    #[test]
    fn exception_codes_round_trip_through_u8() {
        for code in [1u8, 2, 3, 4, 5, 6, 7, 8, 10, 11, 0x42] {
            assert_eq!(u8::from(ExceptionCode::from(code)), code);
        }
        assert_eq!(ExceptionCode::from(9), ExceptionCode::Unknown(9));
    }

    #[test]
    fn exception_codes_map_to_rmodbus() {
        assert!(matches!(
            rmodbus::ErrorKind::from(ExceptionCode::SlaveDeviceBusy),
            rmodbus::ErrorKind::SlaveDeviceBusy
        ));
        assert!(matches!(
            rmodbus::ErrorKind::from(ExceptionCode::Unknown(0x42)),
            rmodbus::ErrorKind::UnknownError
        ));
    }
}
