//! DLT Trace Decoder Library
//!
//! A library for decoding and encoding AUTOSAR DLT (Diagnostic Log and
//! Trace) v1 frames from byte streams, with a stateful before/after context
//! filter over the decoded line sequence.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on the codec:
//! - Decodes stored files ("DLT\x01" storage headers), serial links
//!   ("DLS\x01" markers) and raw network streams
//! - Parses verbose arguments, non-verbose payloads and control services
//! - Resynchronizes past corrupt data with a bounded scan
//! - Encodes trace lines back to the wire, file format included
//! - Applies grep-style before/after context filtering
//!
//! The library does NOT:
//! - Parse CLI arguments or format output
//! - Load Fibex schemas for non-verbose payload interpretation
//! - Unwrap PCAP/PCAP-NG captures
//!
//! All higher-level functionality belongs to the application layer.
//!
//! # Example Usage
//!
//! ```no_run
//! use dlt_decoder::{ContextWindow, TraceReader};
//!
//! let reader = TraceReader::open("trace.dlt").unwrap();
//! let mut window = ContextWindow::new(2, 1, |line: &dlt_decoder::TraceLine| {
//!     line.application_id.as_deref() == Some("APP1")
//! });
//!
//! for item in reader {
//!     match item {
//!         Ok(line) => {
//!             if window.check(&line) {
//!                 for before in window.take_before_context() {
//!                     println!("{:?}", before);
//!                 }
//!                 println!("{:?}", line);
//!             } else if window.is_after_context() {
//!                 println!("{:?}", line);
//!             }
//!         }
//!         Err(e) => eprintln!("decode error: {}", e),
//!     }
//! }
//! ```

pub mod args;
pub mod config;
pub mod context;
pub mod control;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod reader;
pub mod types;

// Re-export main types for convenience
pub use args::{Argument, IntFormat, StringCoding, TypeInfo, TypeLength};
pub use config::DecoderConfig;
pub use context::ContextWindow;
pub use control::{ControlPayload, ControlRequest, ControlResponse};
pub use decoder::{decode_frame, LinkFormat, StreamDecoder};
pub use encoder::DltEncoder;
pub use header::{StandardHeader, StorageHeader};
pub use reader::TraceReader;
pub use types::{
    DltError, LineFeatures, MessageType, Payload, Result, TraceLine,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
