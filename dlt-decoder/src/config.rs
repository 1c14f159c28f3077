//! Decoder configuration types
//!
//! Minimal configuration consumed when wiring up a decode pipeline. Policy
//! decisions (retrying live sources, output formatting) belong to the
//! application layer.

use serde::{Deserialize, Serialize};

use crate::decoder::{LinkFormat, StreamDecoder, DEFAULT_MAX_RESYNC_BYTES};
use crate::reader::DEFAULT_CHUNK_SIZE;

/// Configuration for a decode pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Framing convention of the byte source
    #[serde(default)]
    pub format: LinkFormat,

    /// Resynchronization scan bound in bytes (default: 64 KiB)
    #[serde(default = "default_max_resync_bytes")]
    pub max_resync_bytes: usize,

    /// Read chunk size in bytes for stream sources (default: 64 KiB)
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_max_resync_bytes() -> usize {
    DEFAULT_MAX_RESYNC_BYTES
}

fn default_read_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            format: LinkFormat::default(),
            max_resync_bytes: default_max_resync_bytes(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl DecoderConfig {
    /// Create a configuration with default settings (file format)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the source framing format
    pub fn with_format(mut self, format: LinkFormat) -> Self {
        self.format = format;
        self
    }

    /// Builder method: set the resynchronization bound
    pub fn with_max_resync_bytes(mut self, bytes: usize) -> Self {
        self.max_resync_bytes = bytes;
        self
    }

    /// Builder method: set the read chunk size
    pub fn with_read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes;
        self
    }

    /// Construct a stream decoder from this configuration
    pub fn build_decoder(&self) -> StreamDecoder {
        StreamDecoder::with_max_resync(self.format, self.max_resync_bytes)
    }
}
