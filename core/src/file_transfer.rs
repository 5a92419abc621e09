//! Framed file transfer over the ARQ transport: a FILE_META announcement,
//! payload-sized DATA frames, then FILE_END. The metadata carries an MD5
//! digest as 32 hex characters; computing and checking it is the host's
//! job, the core only moves the string.

use crate::error::{ModemError, Result};
use crate::framing::{Frame, FrameType, MAX_PAYLOAD_SIZE};
use crate::host::Clock;
use crate::transport::Transport;
use std::time::Duration;
use tracing::{info, warn};

const MD5_HEX_LEN: usize = 32;

/// Metadata payload of a FILE_META frame.
///
/// Wire: `[nameLen(2 BE)][name][size(8 BE)][md5(32 ASCII hex)]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferMetadata {
    pub name: String,
    pub size: u64,
    pub md5_hex: String,
}

impl TransferMetadata {
    pub fn new(name: &str, size: u64, md5_hex: &str) -> Result<Self> {
        if md5_hex.len() != MD5_HEX_LEN {
            return Err(ModemError::Format(format!(
                "md5 digest must be {MD5_HEX_LEN} hex chars, got {}",
                md5_hex.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            size,
            md5_hex: md5_hex.to_string(),
        })
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let mut buf = Vec::with_capacity(2 + name_bytes.len() + 8 + MD5_HEX_LEN);
        buf.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.extend_from_slice(self.md5_hex.as_bytes());
        buf
    }

    pub fn decode_payload(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(ModemError::Format("file metadata too short".into()));
        }
        let name_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        let needed = 2 + name_len + 8 + MD5_HEX_LEN;
        if data.len() < needed {
            return Err(ModemError::Format(format!(
                "file metadata truncated: have {}, need {needed}",
                data.len()
            )));
        }

        let name = String::from_utf8_lossy(&data[2..2 + name_len]).into_owned();
        let size_off = 2 + name_len;
        let size = u64::from_be_bytes([
            data[size_off],
            data[size_off + 1],
            data[size_off + 2],
            data[size_off + 3],
            data[size_off + 4],
            data[size_off + 5],
            data[size_off + 6],
            data[size_off + 7],
        ]);
        let md5_hex =
            String::from_utf8_lossy(&data[size_off + 8..size_off + 8 + MD5_HEX_LEN]).into_owned();

        Ok(Self {
            name,
            size,
            md5_hex,
        })
    }
}

/// Send a complete file through the transport: metadata, data frames of up
/// to the link payload limit, FILE_END. `progress` sees (sent, total).
pub fn send_file<S, R, C>(
    transport: &mut Transport<S, R, C>,
    meta: &TransferMetadata,
    data: &[u8],
    mut progress: impl FnMut(u64, u64),
) -> Result<()>
where
    S: FnMut(&Frame) -> Result<()>,
    R: FnMut(Duration) -> Result<Frame>,
    C: Clock,
{
    transport.send(Frame::file_meta(meta.encode_payload()))?;
    progress(0, meta.size);

    let mut sent = 0u64;
    for piece in data.chunks(MAX_PAYLOAD_SIZE) {
        transport.send(Frame::data(0, piece.to_vec()))?;
        sent += piece.len() as u64;
        progress(sent, meta.size);
    }

    transport.send(Frame::file_end())?;
    info!(name = %meta.name, size = meta.size, "file sent");
    Ok(())
}

/// Receive a file announced by FILE_META. Returns the metadata and the raw
/// bytes; the caller checks the digest. `progress` sees (received, total).
pub fn receive_file<S, R, C>(
    transport: &mut Transport<S, R, C>,
    timeout: Duration,
    mut progress: impl FnMut(u64, u64),
) -> Result<(TransferMetadata, Vec<u8>)>
where
    S: FnMut(&Frame) -> Result<()>,
    R: FnMut(Duration) -> Result<Frame>,
    C: Clock,
{
    let meta_frame = transport.receive(timeout)?;
    if meta_frame.frame_type != FrameType::FileMeta {
        return Err(ModemError::Format(format!(
            "expected FILE_META, got {}",
            meta_frame.frame_type
        )));
    }
    let meta = TransferMetadata::decode_payload(&meta_frame.payload)?;
    info!(name = %meta.name, size = meta.size, "receiving file");
    progress(0, meta.size);

    let mut data = Vec::with_capacity(meta.size as usize);
    loop {
        let frame = transport.receive(Duration::from_secs(5))?;
        match frame.frame_type {
            FrameType::Data => {
                data.extend_from_slice(&frame.payload);
                progress(data.len() as u64, meta.size);
                if data.len() as u64 >= meta.size {
                    break;
                }
            }
            FrameType::FileEnd => break,
            other => warn!(frame_type = %other, "unexpected frame during transfer"),
        }
    }

    // The closing FILE_END may still be in flight after the last byte.
    if data.len() as u64 >= meta.size {
        match transport.receive(Duration::from_secs(2)) {
            Ok(frame) if frame.frame_type == FrameType::FileEnd => {}
            Ok(frame) => warn!(frame_type = %frame.frame_type, "expected FILE_END"),
            Err(_) => {}
        }
    }

    if (data.len() as u64) < meta.size {
        return Err(ModemError::Format(format!(
            "file incomplete: {} of {} bytes",
            data.len(),
            meta.size
        )));
    }
    data.truncate(meta.size as usize);

    Ok((meta, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SystemClock;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[test]
    fn test_file_transfer_across_paired_transports() {
        let meta = TransferMetadata::new(
            "pair.bin",
            3000,
            "0123456789abcdef0123456789abcdef",
        )
        .unwrap();
        let payload: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();

        // Sender side: every frame it puts on the wire is recorded and
        // immediately acknowledged.
        let wire: Rc<RefCell<Vec<Frame>>> = Rc::new(RefCell::new(Vec::new()));
        let wire_out = wire.clone();
        let wire_ack = wire.clone();
        let mut sender = Transport::new(
            move |frame: &Frame| {
                wire_out.borrow_mut().push(frame.clone());
                Ok(())
            },
            move |_timeout| {
                let seq = wire_ack.borrow().last().map(|f| f.seq).unwrap_or(0);
                Ok(Frame::ack(seq))
            },
            SystemClock,
        );

        send_file(&mut sender, &meta, &payload, |_, _| {}).unwrap();

        // Receiver side replays the recorded frames in order.
        let inbox = RefCell::new(VecDeque::from(wire.borrow().clone()));
        let mut receiver = Transport::new(
            |_frame: &Frame| Ok(()),
            move |_timeout| inbox.borrow_mut().pop_front().ok_or(ModemError::Timeout),
            SystemClock,
        );

        let (got_meta, got_data) =
            receive_file(&mut receiver, Duration::from_secs(5), |_, _| {}).unwrap();
        assert_eq!(got_meta, meta);
        assert_eq!(got_data, payload);
    }

    #[test]
    fn test_metadata_payload_round_trip() {
        let meta = TransferMetadata::new(
            "report.pdf",
            1_048_576,
            "9e107d9d372bb6826bd81d3542a419d6",
        )
        .unwrap();
        let payload = meta.encode_payload();
        assert_eq!(payload.len(), 2 + 10 + 8 + 32);
        assert_eq!(TransferMetadata::decode_payload(&payload).unwrap(), meta);
    }

    #[test]
    fn test_metadata_requires_full_digest() {
        assert!(TransferMetadata::new("f", 1, "abc").is_err());
    }

    #[test]
    fn test_metadata_truncation_detected() {
        let meta = TransferMetadata::new("f.bin", 10, "9e107d9d372bb6826bd81d3542a419d6")
            .unwrap();
        let payload = meta.encode_payload();
        assert!(TransferMetadata::decode_payload(&payload[..payload.len() - 4]).is_err());
    }

    #[test]
    fn test_metadata_empty_name() {
        let meta =
            TransferMetadata::new("", 0, "d41d8cd98f00b204e9800998ecf8427e").unwrap();
        let decoded = TransferMetadata::decode_payload(&meta.encode_payload()).unwrap();
        assert_eq!(decoded.name, "");
        assert_eq!(decoded.size, 0);
    }
}
