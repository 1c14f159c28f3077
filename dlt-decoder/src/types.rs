//! Core types for the DLT trace decoder library
//!
//! This module defines the trace line model that the decoder emits and the
//! encoder consumes, together with the error taxonomy shared by all codec
//! operations. A `TraceLine` is created once per decoded or encoded frame and
//! is immutable afterwards; ownership passes to the consumer when yielded.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::args::Argument;
use crate::control::ControlPayload;

/// Timestamp type for the storage (wall-clock) header
pub type StorageTimestamp = DateTime<Utc>;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DltError>;

/// Errors that can occur during encoding or decoding
#[derive(Debug, thiserror::Error)]
pub enum DltError {
    /// The standard header is invalid: wrong protocol version, or a declared
    /// length below the minimum implied by its feature flags. Recoverable;
    /// the streaming decoder resynchronizes past it.
    #[error("malformed standard header: {0}")]
    MalformedHeader(String),

    /// Storage header signature did not match "DLT\x01"
    #[error("invalid storage header magic")]
    InvalidMagic,

    /// The destination buffer is too small for the encoded frame
    #[error("insufficient buffer: need {needed} bytes, have {available}")]
    InsufficientBuffer { needed: usize, available: usize },

    /// The input ended before the bytes promised by a header or type tag
    #[error("insufficient data: need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A payload that is long enough but does not decode consistently,
    /// e.g. an argument length not matching the declared frame length
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Verbose NOAR field is 8 bits, limiting a frame to 255 arguments
    #[error("too many arguments: {0} (limit 255)")]
    TooManyArguments(usize),

    /// An encoded frame would exceed the 16-bit length field
    #[error("encoded frame length {0} exceeds maximum of 65535")]
    FrameTooLarge(usize),

    /// Resynchronization scanned past its bound without finding a frame.
    /// The byte range is discarded; the stream itself continues.
    #[error("stream desynchronized after skipping {skipped} bytes at offset {position}")]
    StreamDesynchronized { skipped: usize, position: u64 },

    /// Error reading from the byte source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

bitflags! {
    /// Optional fields present on a trace line.
    ///
    /// ECU_ID, SESSION_ID and DEVICE_TIMESTAMP map to the WEID/WSID/WTMS
    /// standard header bits; APP_ID and CONTEXT_ID to the extended header;
    /// STORAGE_TIMESTAMP marks lines read from (or written to) the file
    /// format. BIG_ENDIAN is the MSBF payload flag, VERBOSE the MSIN
    /// verbose bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineFeatures: u16 {
        const ECU_ID = 1 << 0;
        const APP_ID = 1 << 1;
        const CONTEXT_ID = 1 << 2;
        const SESSION_ID = 1 << 3;
        const DEVICE_TIMESTAMP = 1 << 4;
        const STORAGE_TIMESTAMP = 1 << 5;
        const BIG_ENDIAN = 1 << 6;
        const VERBOSE = 1 << 7;
    }
}

/// Message classification from the MSIN field (MSTP and MTIN bits).
///
/// The raw values are the MSIN byte with the verbose bit cleared, as used on
/// the wire: low nibble selects the message class, high nibble the subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
    LogVerbose,
    AppTraceVariable,
    AppTraceFunctionIn,
    AppTraceFunctionOut,
    AppTraceState,
    AppTraceVfb,
    NetworkTraceIpc,
    NetworkTraceCan,
    NetworkTraceFlexray,
    NetworkTraceMost,
    NetworkTraceEthernet,
    NetworkTraceSomeIp,
    ControlRequest,
    ControlResponse,
    ControlTime,
    /// A classification this decoder has no name for; the raw MSIN value
    /// (verbose bit cleared) is preserved for re-encoding.
    Unknown(u8),
}

impl MessageType {
    /// The MSIN wire value with the verbose bit cleared
    pub fn raw(self) -> u8 {
        match self {
            MessageType::LogFatal => 0x10,
            MessageType::LogError => 0x20,
            MessageType::LogWarn => 0x30,
            MessageType::LogInfo => 0x40,
            MessageType::LogDebug => 0x50,
            MessageType::LogVerbose => 0x60,
            MessageType::AppTraceVariable => 0x12,
            MessageType::AppTraceFunctionIn => 0x22,
            MessageType::AppTraceFunctionOut => 0x32,
            MessageType::AppTraceState => 0x42,
            MessageType::AppTraceVfb => 0x52,
            MessageType::NetworkTraceIpc => 0x14,
            MessageType::NetworkTraceCan => 0x24,
            MessageType::NetworkTraceFlexray => 0x34,
            MessageType::NetworkTraceMost => 0x44,
            MessageType::NetworkTraceEthernet => 0x54,
            MessageType::NetworkTraceSomeIp => 0x64,
            MessageType::ControlRequest => 0x16,
            MessageType::ControlResponse => 0x26,
            MessageType::ControlTime => 0x36,
            MessageType::Unknown(raw) => raw,
        }
    }

    /// Classify a raw MSIN value (verbose bit already cleared)
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x10 => MessageType::LogFatal,
            0x20 => MessageType::LogError,
            0x30 => MessageType::LogWarn,
            0x40 => MessageType::LogInfo,
            0x50 => MessageType::LogDebug,
            0x60 => MessageType::LogVerbose,
            0x12 => MessageType::AppTraceVariable,
            0x22 => MessageType::AppTraceFunctionIn,
            0x32 => MessageType::AppTraceFunctionOut,
            0x42 => MessageType::AppTraceState,
            0x52 => MessageType::AppTraceVfb,
            0x14 => MessageType::NetworkTraceIpc,
            0x24 => MessageType::NetworkTraceCan,
            0x34 => MessageType::NetworkTraceFlexray,
            0x44 => MessageType::NetworkTraceMost,
            0x54 => MessageType::NetworkTraceEthernet,
            0x64 => MessageType::NetworkTraceSomeIp,
            0x16 => MessageType::ControlRequest,
            0x26 => MessageType::ControlResponse,
            0x36 => MessageType::ControlTime,
            raw => MessageType::Unknown(raw),
        }
    }

    /// True for control request/response/time messages (MSTP == 3)
    pub fn is_control(self) -> bool {
        self.raw() & 0x0E == 0x06
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::LogFatal => write!(f, "log fatal"),
            MessageType::LogError => write!(f, "log error"),
            MessageType::LogWarn => write!(f, "log warn"),
            MessageType::LogInfo => write!(f, "log info"),
            MessageType::LogDebug => write!(f, "log debug"),
            MessageType::LogVerbose => write!(f, "log verbose"),
            MessageType::AppTraceVariable => write!(f, "app_trace variable"),
            MessageType::AppTraceFunctionIn => write!(f, "app_trace func_in"),
            MessageType::AppTraceFunctionOut => write!(f, "app_trace func_out"),
            MessageType::AppTraceState => write!(f, "app_trace state"),
            MessageType::AppTraceVfb => write!(f, "app_trace vfb"),
            MessageType::NetworkTraceIpc => write!(f, "nw_trace ipc"),
            MessageType::NetworkTraceCan => write!(f, "nw_trace can"),
            MessageType::NetworkTraceFlexray => write!(f, "nw_trace flexray"),
            MessageType::NetworkTraceMost => write!(f, "nw_trace most"),
            MessageType::NetworkTraceEthernet => write!(f, "nw_trace ethernet"),
            MessageType::NetworkTraceSomeIp => write!(f, "nw_trace someip"),
            MessageType::ControlRequest => write!(f, "control request"),
            MessageType::ControlResponse => write!(f, "control response"),
            MessageType::ControlTime => write!(f, "control time"),
            MessageType::Unknown(raw) => write!(f, "unknown (0x{:02x})", raw),
        }
    }
}

/// Payload of a trace line
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Verbose mode: each argument carries its own type tag
    Verbose(Vec<Argument>),
    /// Non-verbose mode: a numeric message id plus opaque bytes that need an
    /// external (Fibex) schema to interpret
    NonVerbose { message_id: u32, data: Vec<u8> },
    /// A control service request or response
    Control(ControlPayload),
}

/// One decoded (or to-be-encoded) DLT v1 trace line
#[derive(Debug, Clone, PartialEq)]
pub struct TraceLine {
    /// Which optional fields are present
    pub features: LineFeatures,
    /// ECU identifier, 0-4 ASCII characters (WEID, or the storage header)
    pub ecu_id: Option<String>,
    /// Application identifier, 0-4 ASCII characters (extended header)
    pub application_id: Option<String>,
    /// Context identifier, 0-4 ASCII characters (extended header)
    pub context_id: Option<String>,
    /// Session identifier (WSID)
    pub session_id: Option<u32>,
    /// Monotonic device-relative time, 0.1 ms wire resolution (WTMS)
    pub device_timestamp: Option<Duration>,
    /// Wall-clock capture time, present only for file-stored frames
    pub storage_timestamp: Option<StorageTimestamp>,
    /// Message counter. `None` when encoding means auto-increment from the
    /// encoder's previous counter; decoded lines always carry a value.
    pub count: Option<u8>,
    /// Message classification from the extended header
    pub message_type: MessageType,
    /// Byte offset in the source stream where the frame began. Diagnostic
    /// only, not part of the wire format.
    pub position: u64,
    /// The line payload
    pub payload: Payload,
}

impl TraceLine {
    /// Create a line with no optional features set
    pub fn new(message_type: MessageType, payload: Payload) -> Self {
        let mut features = LineFeatures::empty();
        match &payload {
            Payload::Verbose(_) => features |= LineFeatures::VERBOSE,
            Payload::NonVerbose { .. } => {}
            Payload::Control(_) => {}
        }
        Self {
            features,
            ecu_id: None,
            application_id: None,
            context_id: None,
            session_id: None,
            device_timestamp: None,
            storage_timestamp: None,
            count: None,
            message_type,
            position: 0,
            payload,
        }
    }

    /// Builder method: set the ECU identifier
    pub fn with_ecu_id(mut self, id: impl Into<String>) -> Self {
        self.ecu_id = Some(id.into());
        self.features |= LineFeatures::ECU_ID;
        self
    }

    /// Builder method: set the application identifier
    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self.features |= LineFeatures::APP_ID;
        self
    }

    /// Builder method: set the context identifier
    pub fn with_context_id(mut self, id: impl Into<String>) -> Self {
        self.context_id = Some(id.into());
        self.features |= LineFeatures::CONTEXT_ID;
        self
    }

    /// Builder method: set the session identifier
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self.features |= LineFeatures::SESSION_ID;
        self
    }

    /// Builder method: set the device timestamp
    pub fn with_device_timestamp(mut self, timestamp: Duration) -> Self {
        self.device_timestamp = Some(timestamp);
        self.features |= LineFeatures::DEVICE_TIMESTAMP;
        self
    }

    /// Builder method: set the storage (wall-clock) timestamp
    pub fn with_storage_timestamp(mut self, timestamp: StorageTimestamp) -> Self {
        self.storage_timestamp = Some(timestamp);
        self.features |= LineFeatures::STORAGE_TIMESTAMP;
        self
    }

    /// Builder method: set an explicit message counter
    pub fn with_count(mut self, count: u8) -> Self {
        self.count = Some(count);
        self
    }

    /// Builder method: mark the payload as big endian on the wire
    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.features.set(LineFeatures::BIG_ENDIAN, big_endian);
        self
    }

    /// True when the payload is a verbose argument list
    pub fn is_verbose(&self) -> bool {
        self.features.contains(LineFeatures::VERBOSE)
    }

    /// True when the payload is encoded big endian
    pub fn is_big_endian(&self) -> bool {
        self.features.contains(LineFeatures::BIG_ENDIAN)
    }
}
