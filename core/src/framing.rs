use crate::error::{ModemError, Result};
use std::fmt;

/// Link-frame header: type, sequence number, payload length (big-endian).
pub const HEADER_SIZE: usize = 4;
/// Longest payload a single link frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = 1024;
/// Trailing CRC-32 over header + payload, big-endian.
pub const CRC_SIZE: usize = 4;

/// CRC-32/IEEE over the given bytes.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Ack,
    Nack,
    Control,
    FileMeta,
    FileEnd,
    Ping,
    Pong,
    /// Any type byte outside the known set. Decodes successfully; the
    /// caller decides what to do with it.
    Unknown(u8),
}

impl FrameType {
    pub fn to_byte(self) -> u8 {
        match self {
            FrameType::Data => 0x01,
            FrameType::Ack => 0x02,
            FrameType::Nack => 0x03,
            FrameType::Control => 0x04,
            FrameType::FileMeta => 0x05,
            FrameType::FileEnd => 0x06,
            FrameType::Ping => 0x07,
            FrameType::Pong => 0x08,
            FrameType::Unknown(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => FrameType::Data,
            0x02 => FrameType::Ack,
            0x03 => FrameType::Nack,
            0x04 => FrameType::Control,
            0x05 => FrameType::FileMeta,
            0x06 => FrameType::FileEnd,
            0x07 => FrameType::Ping,
            0x08 => FrameType::Pong,
            other => FrameType::Unknown(other),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Data => write!(f, "DATA"),
            FrameType::Ack => write!(f, "ACK"),
            FrameType::Nack => write!(f, "NACK"),
            FrameType::Control => write!(f, "CONTROL"),
            FrameType::FileMeta => write!(f, "FILE_META"),
            FrameType::FileEnd => write!(f, "FILE_END"),
            FrameType::Ping => write!(f, "PING"),
            FrameType::Pong => write!(f, "PONG"),
            FrameType::Unknown(b) => write!(f, "UNKNOWN(0x{b:02x})"),
        }
    }
}

/// One link-layer record. Produced once, consumed once, never mutated.
///
/// Wire format: `[type(1)][seq(1)][len(2 BE)][payload][crc32(4 BE)]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn data(seq: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Data,
            seq,
            payload,
        }
    }

    pub fn ack(seq: u8) -> Self {
        Self {
            frame_type: FrameType::Ack,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn nack(seq: u8) -> Self {
        Self {
            frame_type: FrameType::Nack,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn control(payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Control,
            seq: 0,
            payload,
        }
    }

    pub fn file_meta(payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::FileMeta,
            seq: 0,
            payload,
        }
    }

    pub fn file_end() -> Self {
        Self {
            frame_type: FrameType::FileEnd,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn ping() -> Self {
        Self {
            frame_type: FrameType::Ping,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn pong() -> Self {
        Self {
            frame_type: FrameType::Pong,
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to the canonical wire image.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ModemError::Format(format!(
                "payload {} exceeds {MAX_PAYLOAD_SIZE} bytes",
                self.payload.len()
            )));
        }

        let len = self.payload.len() as u16;
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len() + CRC_SIZE);
        buf.push(self.frame_type.to_byte());
        buf.push(self.seq);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let checksum = crc32(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        Ok(buf)
    }

    /// Parse and verify a wire image. The buffer may carry trailing bytes
    /// beyond the frame (demodulator padding); they are ignored.
    pub fn decode(data: &[u8]) -> Result<Frame> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(ModemError::Format(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }

        let frame_type = FrameType::from_byte(data[0]);
        let seq = data[1];
        let payload_len = u16::from_be_bytes([data[2], data[3]]) as usize;

        let total = HEADER_SIZE + payload_len + CRC_SIZE;
        if data.len() < total {
            return Err(ModemError::Format(format!(
                "frame truncated: have {}, need {total}",
                data.len()
            )));
        }

        let expected = u32::from_be_bytes([
            data[total - 4],
            data[total - 3],
            data[total - 2],
            data[total - 1],
        ]);
        let actual = crc32(&data[..HEADER_SIZE + payload_len]);
        if expected != actual {
            return Err(ModemError::CrcMismatch);
        }

        Ok(Frame {
            frame_type,
            seq,
            payload: data[HEADER_SIZE..HEADER_SIZE + payload_len].to_vec(),
        })
    }

    /// Total on-wire length of this frame once encoded.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }
}
