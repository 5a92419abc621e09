use crate::chunking::{DataChunk, FileMetadata};
use crate::error::{ModemError, Result};
use crate::host::ChunkStore;
use tracing::{debug, warn};

/// Reassembles a chunked file from whatever order the chunks arrive in.
///
/// Created on the first good metadata frame; any previous persistent
/// contents are cleared at that point. A received-bitmap tracks which
/// sequence numbers have landed, so retransmitted duplicates are no-ops and
/// `received_count` always equals the bitmap population count.
pub struct ChunkAssembler {
    metadata: FileMetadata,
    store: Box<dyn ChunkStore>,
    bitmap: Vec<u8>,
    received_count: u32,
    crc_errors: u64,
}

/// What a receive session ultimately produced.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Every chunk arrived; the reassembled file.
    Completed(Vec<u8>),
    /// Some chunks never arrived; what landed, plus the missing sequence
    /// numbers.
    Partial {
        received: u32,
        missing: Vec<u32>,
    },
    /// The session was abandoned before metadata was seen.
    Aborted(String),
}

impl ChunkAssembler {
    /// Start a fresh assembly for the announced file. Clears any stale
    /// chunks left in the store by an earlier session.
    pub fn new(metadata: FileMetadata, mut store: Box<dyn ChunkStore>) -> Result<Self> {
        if metadata.total_chunks == 0 {
            return Err(ModemError::Format("metadata with zero chunks".into()));
        }
        store.clear()?;
        let bitmap_len = (metadata.total_chunks as usize).div_ceil(8);
        debug!(
            name = %metadata.name,
            total_chunks = metadata.total_chunks,
            "assembly started"
        );
        Ok(Self {
            metadata,
            store,
            bitmap: vec![0u8; bitmap_len],
            received_count: 0,
            crc_errors: 0,
        })
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Apply one received chunk. CRC-failed chunks are counted and
    /// discarded; duplicates and out-of-range sequence numbers are ignored.
    /// Returns whether the chunk was newly stored.
    pub fn accept(&mut self, chunk: &DataChunk, crc_ok: bool) -> Result<bool> {
        if !crc_ok {
            self.crc_errors += 1;
            warn!(seq = chunk.seq, "chunk failed CRC, discarded");
            return Ok(false);
        }
        if chunk.seq >= self.metadata.total_chunks {
            warn!(
                seq = chunk.seq,
                total = self.metadata.total_chunks,
                "chunk out of range, ignored"
            );
            return Ok(false);
        }
        if self.is_received(chunk.seq) {
            debug!(seq = chunk.seq, "duplicate chunk ignored");
            return Ok(false);
        }

        self.store.put(chunk.seq, &chunk.data)?;
        self.set_received(chunk.seq);
        self.received_count += 1;
        debug!(
            seq = chunk.seq,
            received = self.received_count,
            total = self.metadata.total_chunks,
            "chunk stored"
        );
        Ok(true)
    }

    pub fn is_received(&self, seq: u32) -> bool {
        let byte = (seq / 8) as usize;
        let bit = seq % 8;
        self.bitmap[byte] & (1 << bit) != 0
    }

    fn set_received(&mut self, seq: u32) {
        let byte = (seq / 8) as usize;
        let bit = seq % 8;
        self.bitmap[byte] |= 1 << bit;
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.metadata.total_chunks
    }

    /// Sequence numbers still outstanding, ascending.
    pub fn missing(&self) -> Vec<u32> {
        (0..self.metadata.total_chunks)
            .filter(|&seq| !self.is_received(seq))
            .collect()
    }

    /// Concatenate the stored chunks in sequence order and truncate to the
    /// announced file size. Only valid once complete.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(ModemError::Format(format!(
                "assembly incomplete: {}/{} chunks",
                self.received_count, self.metadata.total_chunks
            )));
        }

        let mut out = Vec::with_capacity(self.metadata.total_file_size as usize);
        for seq in 0..self.metadata.total_chunks {
            let chunk = self
                .store
                .get(seq)?
                .ok_or_else(|| {
                    ModemError::Store(format!("chunk {seq} marked received but missing"))
                })?;
            out.extend_from_slice(&chunk);
        }
        out.truncate(self.metadata.total_file_size as usize);
        Ok(out)
    }

    /// Tear down and hand the persistent store back for the next session.
    pub fn into_store(self) -> Box<dyn ChunkStore> {
        self.store
    }

    /// Close the session, yielding the file or a partial report.
    pub fn finish(self) -> SessionOutcome {
        if self.is_complete() {
            match self.assemble() {
                Ok(bytes) => SessionOutcome::Completed(bytes),
                Err(e) => SessionOutcome::Aborted(e.to_string()),
            }
        } else {
            SessionOutcome::Partial {
                received: self.received_count,
                missing: self.missing(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryChunkStore;

    fn metadata(total_chunks: u32, chunk_size: usize, file_size: u32) -> FileMetadata {
        FileMetadata::new(total_chunks, file_size, chunk_size, "test.bin").unwrap()
    }

    fn assembler(total_chunks: u32, chunk_size: usize, file_size: u32) -> ChunkAssembler {
        ChunkAssembler::new(
            metadata(total_chunks, chunk_size, file_size),
            Box::new(MemoryChunkStore::new()),
        )
        .unwrap()
    }

    fn chunk(seq: u32, data: &[u8]) -> DataChunk {
        DataChunk::new(seq, data.to_vec()).unwrap()
    }

    #[test]
    fn test_in_order_assembly() {
        let mut asm = assembler(3, 4, 10);
        assert!(asm.accept(&chunk(0, &[0, 1, 2, 3]), true).unwrap());
        assert!(asm.accept(&chunk(1, &[4, 5, 6, 7]), true).unwrap());
        assert!(!asm.is_complete());
        assert!(asm.accept(&chunk(2, &[8, 9, 0, 0]), true).unwrap());
        assert!(asm.is_complete());
        assert_eq!(asm.assemble().unwrap(), (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_out_of_order_assembly() {
        let mut asm = assembler(4, 2, 8);
        for seq in [2u32, 0, 3, 1] {
            let base = (seq * 2) as u8;
            asm.accept(&chunk(seq, &[base, base + 1]), true).unwrap();
        }
        assert_eq!(asm.assemble().unwrap(), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mut asm = assembler(2, 2, 4);
        assert!(asm.accept(&chunk(0, &[1, 2]), true).unwrap());
        for _ in 0..5 {
            assert!(!asm.accept(&chunk(0, &[1, 2]), true).unwrap());
        }
        assert_eq!(asm.received_count(), 1);
        assert_eq!(asm.crc_errors(), 0);
        asm.accept(&chunk(1, &[3, 4]), true).unwrap();
        assert_eq!(asm.assemble().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_crc_failure_counted_not_stored() {
        let mut asm = assembler(2, 2, 4);
        assert!(!asm.accept(&chunk(0, &[1, 2]), false).unwrap());
        assert_eq!(asm.crc_errors(), 1);
        assert_eq!(asm.received_count(), 0);
        assert!(!asm.is_received(0));
    }

    #[test]
    fn test_out_of_range_seq_ignored() {
        let mut asm = assembler(2, 2, 4);
        assert!(!asm.accept(&chunk(2, &[9, 9]), true).unwrap());
        assert!(!asm.accept(&chunk(u32::MAX, &[9, 9]), true).unwrap());
        assert_eq!(asm.received_count(), 0);
    }

    #[test]
    fn test_truncates_to_file_size() {
        let mut asm = assembler(2, 4, 6);
        asm.accept(&chunk(0, &[1, 2, 3, 4]), true).unwrap();
        asm.accept(&chunk(1, &[5, 6, 0, 0]), true).unwrap();
        assert_eq!(asm.assemble().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_new_session_clears_store() {
        let mut store = MemoryChunkStore::new();
        store.put(0, &[0xAA]).unwrap();
        store.put(17, &[0xBB]).unwrap();
        let asm = ChunkAssembler::new(metadata(1, 4, 4), Box::new(store)).unwrap();
        assert_eq!(asm.received_count(), 0);
        // Stale chunk 0 must not leak into the new file.
        assert!(asm.assemble().is_err());
    }

    #[test]
    fn test_partial_outcome_lists_missing() {
        let mut asm = assembler(4, 2, 8);
        asm.accept(&chunk(1, &[1, 2]), true).unwrap();
        asm.accept(&chunk(3, &[3, 4]), true).unwrap();
        match asm.finish() {
            SessionOutcome::Partial { received, missing } => {
                assert_eq!(received, 2);
                assert_eq!(missing, vec![0, 2]);
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_bitmap_count_invariant() {
        let mut asm = assembler(100, 2, 200);
        for seq in (0..100).step_by(3) {
            asm.accept(&chunk(seq, &[0, 0]), true).unwrap();
        }
        let popcount: u32 = asm.bitmap.iter().map(|b| b.count_ones()).sum();
        assert_eq!(popcount, asm.received_count());
    }
}
