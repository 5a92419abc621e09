//! Streaming chunk-protocol payloads.
//!
//! These byte images ride directly inside an OFDM waveform; they are not
//! wrapped in a link frame. The receiver dispatches on the first byte:
//! `0xFE` metadata, `0xFF` data chunk, anything else a legacy single-shot
//! packet whose leading byte is a name length.
//!
//! Decoding never fails on a bad checksum: the assembler wants to see the
//! flagged-invalid chunk so it can count the error, so every decode returns
//! the parsed value alongside a CRC-validity flag.

use crate::error::{ModemError, Result};
use crate::framing::crc32;
use crate::{MAX_NAME_LEN, TAG_DATA_CHUNK, TAG_METADATA};

/// File announcement opening a chunked transfer.
///
/// Wire: `[0xFE][totalChunks(4 BE)][totalFileSize(4 BE)][chunkSize(2 BE)]`
/// `[nameLen(1)][name][crc32(4 BE)]`, CRC over every preceding byte
/// including the tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub total_chunks: u32,
    pub total_file_size: u32,
    pub chunk_size: u16,
    pub name: String,
}

impl FileMetadata {
    pub fn new(
        total_chunks: u32,
        total_file_size: u32,
        chunk_size: usize,
        name: &str,
    ) -> Result<Self> {
        if total_chunks == 0 {
            return Err(ModemError::Format("metadata with zero chunks".into()));
        }
        if chunk_size == 0 || chunk_size > 0xFFFF {
            return Err(ModemError::Format(format!(
                "chunk size {chunk_size} out of range"
            )));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ModemError::Format(format!(
                "file name {} exceeds {MAX_NAME_LEN} bytes",
                name.len()
            )));
        }
        Ok(Self {
            total_chunks,
            total_file_size,
            chunk_size: chunk_size as u16,
            name: name.to_string(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let mut buf = Vec::with_capacity(12 + name_bytes.len() + 4);
        buf.push(TAG_METADATA);
        buf.extend_from_slice(&self.total_chunks.to_be_bytes());
        buf.extend_from_slice(&self.total_file_size.to_be_bytes());
        buf.extend_from_slice(&self.chunk_size.to_be_bytes());
        buf.push(name_bytes.len() as u8);
        buf.extend_from_slice(name_bytes);
        let checksum = crc32(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse a metadata image. The returned flag reports CRC validity;
    /// structural problems (short buffer, wrong tag) are errors.
    pub fn decode(data: &[u8]) -> Result<(FileMetadata, bool)> {
        if data.len() < 16 {
            return Err(ModemError::Format(format!(
                "metadata too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != TAG_METADATA {
            return Err(ModemError::Format(format!(
                "not a metadata frame: tag 0x{:02x}",
                data[0]
            )));
        }

        let total_chunks = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let total_file_size = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        let chunk_size = u16::from_be_bytes([data[9], data[10]]);
        let name_len = data[11] as usize;

        let crc_start = 12 + name_len;
        if data.len() < crc_start + 4 {
            return Err(ModemError::Format("metadata truncated".into()));
        }

        let name = String::from_utf8_lossy(&data[12..12 + name_len]).into_owned();
        let expected = u32::from_be_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let crc_ok = crc32(&data[..crc_start]) == expected;

        if total_chunks == 0 {
            return Err(ModemError::Format("metadata with zero chunks".into()));
        }

        Ok((
            FileMetadata {
                total_chunks,
                total_file_size,
                chunk_size,
                name,
            },
            crc_ok,
        ))
    }

    /// Bytes this metadata occupies on the wire.
    pub fn wire_len(&self) -> usize {
        12 + self.name.len() + 4
    }
}

/// One sequenced slice of the file.
///
/// Wire: `[0xFF][seq(4 BE)][dataLen(2 BE)][data][crc32(4 BE)]`, CRC over
/// every preceding byte including the tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataChunk {
    pub seq: u32,
    pub data: Vec<u8>,
}

impl DataChunk {
    pub fn new(seq: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() > 0xFFFF {
            return Err(ModemError::Format(format!(
                "chunk payload {} exceeds 65535 bytes",
                data.len()
            )));
        }
        Ok(Self { seq, data })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(7 + self.data.len() + 4);
        buf.push(TAG_DATA_CHUNK);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.data);
        let checksum = crc32(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse a data-chunk image; the flag reports CRC validity.
    pub fn decode(data: &[u8]) -> Result<(DataChunk, bool)> {
        if data.len() < 11 {
            return Err(ModemError::Format(format!(
                "data chunk too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != TAG_DATA_CHUNK {
            return Err(ModemError::Format(format!(
                "not a data chunk: tag 0x{:02x}",
                data[0]
            )));
        }

        let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let data_len = u16::from_be_bytes([data[5], data[6]]) as usize;

        let crc_start = 7 + data_len;
        if data.len() < crc_start + 4 {
            return Err(ModemError::Format("data chunk truncated".into()));
        }

        let payload = data[7..7 + data_len].to_vec();
        let expected = u32::from_be_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let crc_ok = crc32(&data[..crc_start]) == expected;

        Ok((DataChunk { seq, data: payload }, crc_ok))
    }
}

/// Single-shot packet for small files, predating the chunk protocol.
///
/// Wire: `[nameLen(1)][name][dataLen(4 BE)][data][crc32(4 BE)]`. The name
/// length is clamped below the streaming tags so the first byte stays
/// unambiguous.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyPacket {
    pub name: String,
    pub data: Vec<u8>,
}

impl LegacyPacket {
    pub fn new(name: &str, data: Vec<u8>) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(ModemError::Format(format!(
                "file name {} exceeds {MAX_NAME_LEN} bytes",
                name.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let mut buf = Vec::with_capacity(1 + name_bytes.len() + 4 + self.data.len() + 4);
        buf.push(name_bytes.len() as u8);
        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        let checksum = crc32(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse a legacy packet; the flag reports CRC validity.
    pub fn decode(data: &[u8]) -> Result<(LegacyPacket, bool)> {
        if data.len() < 9 {
            return Err(ModemError::Format(format!(
                "legacy packet too short: {} bytes",
                data.len()
            )));
        }
        let name_len = data[0] as usize;
        if name_len > MAX_NAME_LEN {
            return Err(ModemError::Format(format!(
                "legacy packet name length {name_len} collides with frame tags"
            )));
        }
        if data.len() < 1 + name_len + 4 {
            return Err(ModemError::Format("legacy packet truncated".into()));
        }

        let name = String::from_utf8_lossy(&data[1..1 + name_len]).into_owned();
        let len_off = 1 + name_len;
        let data_len = u32::from_be_bytes([
            data[len_off],
            data[len_off + 1],
            data[len_off + 2],
            data[len_off + 3],
        ]) as usize;

        let crc_start = len_off + 4 + data_len;
        if data.len() < crc_start + 4 {
            return Err(ModemError::Format("legacy packet truncated".into()));
        }

        let payload = data[len_off + 4..len_off + 4 + data_len].to_vec();
        let expected = u32::from_be_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let crc_ok = crc32(&data[..crc_start]) == expected;

        Ok((
            LegacyPacket {
                name,
                data: payload,
            },
            crc_ok,
        ))
    }

    /// Bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        1 + self.name.len() + 4 + self.data.len() + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip() {
        let meta = FileMetadata::new(40, 163_840, 4096, "photo.jpg").unwrap();
        let encoded = meta.encode();
        assert_eq!(encoded.len(), meta.wire_len());

        let (decoded, crc_ok) = FileMetadata::decode(&encoded).unwrap();
        assert!(crc_ok);
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_metadata_bad_crc_is_flagged_not_fatal() {
        let meta = FileMetadata::new(4, 64, 16, "x.bin").unwrap();
        let mut encoded = meta.encode();
        encoded[2] ^= 0xFF;
        let (decoded, crc_ok) = FileMetadata::decode(&encoded).unwrap();
        assert!(!crc_ok);
        // Fields parse anyway; the caller counts the error.
        assert_eq!(decoded.name, "x.bin");
    }

    #[test]
    fn test_metadata_trailing_padding_ignored() {
        let meta = FileMetadata::new(4, 64, 16, "pad.bin").unwrap();
        let mut encoded = meta.encode();
        encoded.extend_from_slice(&[0u8; 200]);
        let (decoded, crc_ok) = FileMetadata::decode(&encoded).unwrap();
        assert!(crc_ok);
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_metadata_zero_chunks_rejected() {
        assert!(FileMetadata::new(0, 0, 16, "x").is_err());
    }

    #[test]
    fn test_metadata_oversized_chunk_size_rejected() {
        assert!(FileMetadata::new(1, 1, 0x10000, "x").is_err());
        assert!(FileMetadata::new(1, 1, 0, "x").is_err());
    }

    #[test]
    fn test_metadata_name_clamped_below_tags() {
        let long_name = "n".repeat(254);
        assert!(FileMetadata::new(1, 1, 16, &long_name).is_err());
        let ok_name = "n".repeat(253);
        assert!(FileMetadata::new(1, 1, 16, &ok_name).is_ok());
    }

    #[test]
    fn test_metadata_wrong_tag_rejected() {
        let chunk = DataChunk::new(0, vec![1, 2, 3]).unwrap();
        assert!(FileMetadata::decode(&chunk.encode()).is_err());
    }

    #[test]
    fn test_data_chunk_round_trip() {
        let chunk = DataChunk::new(7, (0..255u8).collect()).unwrap();
        let (decoded, crc_ok) = DataChunk::decode(&chunk.encode()).unwrap();
        assert!(crc_ok);
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_data_chunk_corruption_flagged() {
        let chunk = DataChunk::new(3, vec![9; 32]).unwrap();
        let mut encoded = chunk.encode();
        encoded[10] ^= 0x40;
        let (decoded, crc_ok) = DataChunk::decode(&encoded).unwrap();
        assert!(!crc_ok);
        assert_eq!(decoded.seq, 3);
    }

    #[test]
    fn test_data_chunk_oversized_rejected() {
        assert!(DataChunk::new(0, vec![0; 0x10000]).is_err());
    }

    #[test]
    fn test_legacy_round_trip() {
        let packet = LegacyPacket::new("hi.txt", vec![0x48, 0x65, 0x6C, 0x6C, 0x6F]).unwrap();
        let encoded = packet.encode();
        assert_eq!(encoded[0], 6);
        let (decoded, crc_ok) = LegacyPacket::decode(&encoded).unwrap();
        assert!(crc_ok);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_legacy_empty_file() {
        let packet = LegacyPacket::new("empty", Vec::new()).unwrap();
        let (decoded, crc_ok) = LegacyPacket::decode(&packet.encode()).unwrap();
        assert!(crc_ok);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_legacy_rejects_tag_collision() {
        // A buffer opening with a streaming tag must not parse as legacy.
        let chunk = DataChunk::new(1, vec![5; 8]).unwrap();
        assert!(LegacyPacket::decode(&chunk.encode()).is_err());
    }

    #[test]
    fn test_tags_route_distinctly() {
        let meta = FileMetadata::new(2, 32, 16, "f").unwrap().encode();
        let chunk = DataChunk::new(0, vec![1; 16]).unwrap().encode();
        let legacy = LegacyPacket::new("f", vec![1]).unwrap().encode();
        assert_eq!(meta[0], TAG_METADATA);
        assert_eq!(chunk[0], TAG_DATA_CHUNK);
        assert!(legacy[0] < TAG_METADATA);
    }
}
