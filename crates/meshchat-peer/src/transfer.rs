use bytes::{Bytes, BytesMut};
use meshchat_shared::constants::FILE_CHUNK_SIZE;

use crate::error::MeshError;

/// Yields a shared file as fixed-size chunks, one per pump turn.
#[derive(Debug)]
pub struct ChunkProducer {
    filename: String,
    data: Bytes,
    offset: usize,
    chunk_size: usize,
}

impl ChunkProducer {
    pub fn new(filename: impl Into<String>, data: Bytes) -> Self {
        Self::with_chunk_size(filename, data, FILE_CHUNK_SIZE)
    }

    pub fn with_chunk_size(filename: impl Into<String>, data: Bytes, chunk_size: usize) -> Self {
        Self {
            filename: filename.into(),
            data,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn is_finished(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn sent_bytes(&self) -> usize {
        self.offset
    }
}

impl Iterator for ChunkProducer {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.is_finished() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }
}

/// Chunks received for one requested file.
#[derive(Debug)]
pub struct InboundTransfer {
    filename: String,
    declared_size: Option<u64>,
    mime: Option<String>,
    chunks: Vec<Bytes>,
    received: usize,
}

impl InboundTransfer {
    pub fn new(filename: impl Into<String>, declared_size: Option<u64>) -> Self {
        Self {
            filename: filename.into(),
            declared_size,
            mime: None,
            chunks: Vec::new(),
            received: 0,
        }
    }

    pub fn with_mime(mut self, mime: Option<String>) -> Self {
        self.mime = mime;
        self
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn received_bytes(&self) -> usize {
        self.received
    }

    pub fn push_chunk(&mut self, chunk: Bytes) {
        self.received += chunk.len();
        self.chunks.push(chunk);
    }

    /// Concatenate the chunks in arrival order.
    pub fn finish(self) -> Result<Bytes, MeshError> {
        match self.declared_size {
            Some(expected) if expected != self.received as u64 => {
                return Err(MeshError::TransferAborted {
                    filename: self.filename,
                    reason: format!("expected {expected} bytes, received {}", self.received),
                });
            }
            // The owner closes right away when it does not share the file.
            None if self.chunks.is_empty() => {
                return Err(MeshError::TransferAborted {
                    filename: self.filename,
                    reason: "file not available".to_string(),
                });
            }
            _ => {}
        }

        let mut buf = BytesMut::with_capacity(self.received);
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_chunk_boundaries() {
        let producer = ChunkProducer::new("movie.bin", sample(50_000));
        let sizes: Vec<usize> = producer.map(|c| c.len()).collect();
        assert_eq!(sizes, vec![16_384, 16_384, 16_384, 848]);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let producer = ChunkProducer::new("a", sample(FILE_CHUNK_SIZE * 2));
        assert_eq!(producer.count(), 2);
    }

    #[test]
    fn test_empty_file_produces_nothing() {
        let mut producer = ChunkProducer::new("empty.txt", Bytes::new());
        assert!(producer.is_finished());
        assert!(producer.next().is_none());
    }

    #[test]
    fn test_reassembly() {
        let data = sample(40_000);
        let mut inbound = InboundTransfer::new("x", Some(40_000));
        for chunk in ChunkProducer::new("x", data.clone()) {
            inbound.push_chunk(chunk);
        }
        assert_eq!(inbound.received_bytes(), 40_000);
        assert_eq!(inbound.finish().unwrap(), data);
    }

    #[test]
    fn test_size_mismatch_fails() {
        let mut inbound = InboundTransfer::new("x", Some(100));
        inbound.push_chunk(Bytes::from_static(b"short"));
        assert!(matches!(
            inbound.finish(),
            Err(MeshError::TransferAborted { .. })
        ));
    }

    #[test]
    fn test_undeclared_size_accepts_anything() {
        let mut inbound = InboundTransfer::new("x", None);
        inbound.push_chunk(Bytes::from_static(b"abc"));
        assert_eq!(inbound.finish().unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_nothing_received_without_declared_size_fails() {
        let inbound = InboundTransfer::new("missing.txt", None);
        assert!(inbound.finish().is_err());

        let empty = InboundTransfer::new("empty.txt", Some(0));
        assert!(empty.finish().unwrap().is_empty());
    }
}
