//! Acoustic file-transfer modem.
//!
//! Encodes a byte stream into a band-limited OFDM waveform played through a
//! speaker or 3.5mm line, and recovers the original bytes from a microphone
//! or line capture with CRC integrity checks. Three layers:
//!
//! * OFDM transceiver: FFT, Gray-coded QAM, pilots, cyclic prefix,
//!   Schmidl-Cox preamble, channel estimation and equalization;
//! * frame link layer: typed header + payload + CRC-32, stop-and-wait ARQ;
//! * chunked streaming file protocol: metadata + sequenced data chunks,
//!   duplicate suppression, partial-reception assembly over a free-running
//!   sample stream.

pub mod assembler;
pub mod bits;
pub mod chunking;
pub mod constellation;
pub mod decoder;
pub mod encoder;
pub mod encoder_chunked;
pub mod equalizer;
pub mod error;
pub mod fft;
pub mod file_transfer;
pub mod framing;
pub mod host;
pub mod ofdm;
pub mod profile;
pub mod receiver;
pub mod ring;
pub mod session;
pub mod signal;
pub mod sync;
pub mod transport;

pub use assembler::{ChunkAssembler, SessionOutcome};
pub use constellation::{Constellation, Modulation};
pub use decoder::{decode_received_signal, DecodedFile};
pub use encoder::{build_transmit_signal, TransmitSignal};
pub use encoder_chunked::{build_data_chunk_frame, build_metadata_frame, ChunkedFileSender};
pub use error::{ModemError, Result};
pub use host::{AudioSink, AudioSource, ChunkStore, Clock, MemoryChunkStore, SystemClock};
pub use profile::{ModemMode, OfdmProfile};
pub use receiver::{ReceiverEvent, StreamingReceiver};
pub use transport::Transport;

/// Audio sample rate shared by every profile, in Hz.
pub const SAMPLE_RATE: usize = 44_100;

/// Files at or below this size go out as a single legacy packet; larger
/// files use the chunked streaming protocol.
pub const CHUNK_THRESHOLD: usize = 32 * 1024;

/// First byte of a streaming metadata frame.
pub const TAG_METADATA: u8 = 0xFE;

/// First byte of a streaming data-chunk frame.
pub const TAG_DATA_CHUNK: u8 = 0xFF;

/// Longest file name carried on the wire. Keeps the legacy packet's leading
/// name-length byte disjoint from the streaming tags above.
pub const MAX_NAME_LEN: usize = 253;

/// Payload budget assumed for a frame before metadata announces the real
/// chunk size. Large enough for any metadata frame.
pub const INITIAL_PAYLOAD_BYTES: usize = 280;

/// Wire overhead of a data-chunk frame: tag + seq(4) + len(2) + crc(4).
pub const DATA_CHUNK_OVERHEAD: usize = 11;
