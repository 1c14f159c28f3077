//! Lazy trace line iterator over any byte source
//!
//! [`TraceReader`] wraps a [`std::io::Read`] source, pulls fixed-size chunks
//! into a [`StreamDecoder`] and yields lines one at a time. Retrying a live
//! source that reported an error is caller policy; the reader only surfaces
//! what happened.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::decoder::{LinkFormat, StreamDecoder};
use crate::types::{Result, TraceLine};

/// Default read chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Iterator of decoded trace lines over a byte source
pub struct TraceReader<R: Read> {
    source: R,
    decoder: StreamDecoder,
    pending: VecDeque<Result<TraceLine>>,
    chunk: Vec<u8>,
    eof: bool,
}

impl TraceReader<BufReader<File>> {
    /// Opens a stored trace file (storage header format)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("opening DLT trace file: {}", path.display());
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), LinkFormat::File))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(source: R, format: LinkFormat) -> Self {
        Self::with_chunk_size(source, format, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(source: R, format: LinkFormat, chunk_size: usize) -> Self {
        Self {
            source,
            decoder: StreamDecoder::new(format),
            pending: VecDeque::new(),
            chunk: vec![0u8; chunk_size.max(1)],
            eof: false,
        }
    }

    /// Replace the internal decoder, e.g. to set a custom resync bound
    pub fn with_decoder(mut self, decoder: StreamDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    fn fill(&mut self) {
        while self.pending.is_empty() && !self.eof {
            match self.source.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    self.pending.extend(self.decoder.flush());
                    log::debug!(
                        "end of stream at offset {}",
                        self.decoder.position()
                    );
                }
                Ok(n) => {
                    self.decoder.append(&self.chunk[..n]);
                    self.pending.extend(self.decoder.drain());
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.eof = true;
                    self.pending.extend(self.decoder.flush());
                    self.pending.push_back(Err(err.into()));
                }
            }
        }
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fill();
        self.pending.pop_front()
    }
}
