//! Standard, extended and storage header codec for DLT v1 frames
//!
//! The standard header is 4 fixed bytes (HTYP, counter, 16-bit length)
//! followed by optional 4-byte fields selected by HTYP bits, then the
//! 10-byte extended header when UEH is set. The storage header is the
//! 16-byte file-format wrapper carrying the capture wall-clock time.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use crate::types::{DltError, MessageType, Result};

/// HTYP bit: use extended header
pub const HTYP_UEH: u8 = 0x01;
/// HTYP bit: payload is big endian (most significant byte first)
pub const HTYP_MSBF: u8 = 0x02;
/// HTYP bit: with ECU id
pub const HTYP_WEID: u8 = 0x04;
/// HTYP bit: with session id
pub const HTYP_WSID: u8 = 0x08;
/// HTYP bit: with device timestamp
pub const HTYP_WTMS: u8 = 0x10;
/// HTYP version field mask (bits 5-7)
pub const HTYP_VERSION_MASK: u8 = 0xE0;
/// HTYP version field for protocol version 1
pub const HTYP_VERSION1: u8 = 0x20;

/// MSIN bit: verbose payload
pub const MSIN_VERBOSE: u8 = 0x01;
/// MSIN message type (MSTP) mask
pub const MSIN_MSTP_MASK: u8 = 0x0E;
/// MSIN MSTP value for control messages
pub const MSIN_MSTP_CONTROL: u8 = 0x06;

/// Fixed part of the standard header
pub const STANDARD_HEADER_MIN: usize = 4;
/// Extended header size
pub const EXTENDED_HEADER_LEN: usize = 10;
/// Storage header size (magic, seconds, microseconds, ECU id)
pub const STORAGE_HEADER_LEN: usize = 16;
/// Storage header signature for the file format
pub const STORAGE_MAGIC: [u8; 4] = [0x44, 0x4C, 0x54, 0x01]; // "DLT\x01"
/// Frame marker for the serial format
pub const SERIAL_MAGIC: [u8; 4] = [0x44, 0x4C, 0x53, 0x01]; // "DLS\x01"

/// Device timestamp wire resolution in microseconds (0.1 ms units)
pub const DEVICE_TIME_RESOLUTION_US: u64 = 100;

pub(crate) fn read_u16(buf: &[u8], big_endian: bool) -> u16 {
    if big_endian {
        BigEndian::read_u16(buf)
    } else {
        LittleEndian::read_u16(buf)
    }
}

pub(crate) fn read_u32(buf: &[u8], big_endian: bool) -> u32 {
    if big_endian {
        BigEndian::read_u32(buf)
    } else {
        LittleEndian::read_u32(buf)
    }
}

pub(crate) fn read_u64(buf: &[u8], big_endian: bool) -> u64 {
    if big_endian {
        BigEndian::read_u64(buf)
    } else {
        LittleEndian::read_u64(buf)
    }
}

pub(crate) fn write_u16(buf: &mut [u8], value: u16, big_endian: bool) {
    if big_endian {
        BigEndian::write_u16(buf, value)
    } else {
        LittleEndian::write_u16(buf, value)
    }
}

pub(crate) fn write_u32(buf: &mut [u8], value: u32, big_endian: bool) {
    if big_endian {
        BigEndian::write_u32(buf, value)
    } else {
        LittleEndian::write_u32(buf, value)
    }
}

pub(crate) fn write_u64(buf: &mut [u8], value: u64, big_endian: bool) {
    if big_endian {
        BigEndian::write_u64(buf, value)
    } else {
        LittleEndian::write_u64(buf, value)
    }
}

/// Writes a 0-4 character identifier as 4 ASCII bytes, high bit cleared,
/// right-padded with NUL bytes.
pub fn write_id(buf: &mut [u8], id: Option<&str>) {
    let bytes = id.map(|s| s.as_bytes()).unwrap_or(&[]);
    for i in 0..4 {
        buf[i] = if i < bytes.len() { bytes[i] & 0x7F } else { 0 };
    }
}

/// Reads a 4-byte identifier field, stopping at the first NUL byte.
/// Returns `None` for an all-zero field.
pub fn read_id(buf: &[u8]) -> Option<String> {
    let len = buf[..4].iter().position(|&b| b == 0).unwrap_or(4);
    if len == 0 {
        return None;
    }
    Some(buf[..len].iter().map(|&b| (b & 0x7F) as char).collect())
}

/// Extended header fields (present when the HTYP UEH bit is set)
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedHeader {
    pub verbose: bool,
    pub message_type: MessageType,
    pub argument_count: u8,
    pub application_id: Option<String>,
    pub context_id: Option<String>,
}

/// Decoded standard header, including the extended header when present
#[derive(Debug, Clone, PartialEq)]
pub struct StandardHeader {
    pub big_endian: bool,
    pub counter: u8,
    /// Total frame length declared on the wire (from HTYP onwards)
    pub length: u16,
    pub ecu_id: Option<String>,
    pub session_id: Option<u32>,
    pub device_timestamp: Option<Duration>,
    pub extended: Option<ExtendedHeader>,
}

impl StandardHeader {
    /// Number of header bytes implied by the HTYP flags
    pub fn header_len(htyp: u8) -> usize {
        let mut len = STANDARD_HEADER_MIN;
        if htyp & HTYP_WEID != 0 {
            len += 4;
        }
        if htyp & HTYP_WSID != 0 {
            len += 4;
        }
        if htyp & HTYP_WTMS != 0 {
            len += 4;
        }
        if htyp & HTYP_UEH != 0 {
            len += EXTENDED_HEADER_LEN;
        }
        len
    }
}

/// Validates the first 4 standard header bytes and returns the declared
/// frame length.
///
/// Fails with [`DltError::MalformedHeader`] when the version is not 1 or the
/// declared length is below the minimum implied by the HTYP flags. Used by
/// the streaming decoder to decide whether to wait for more data or to
/// resynchronize, before the full frame is buffered.
pub fn peek_frame(buf: &[u8]) -> Result<u16> {
    if buf.len() < STANDARD_HEADER_MIN {
        return Err(DltError::InsufficientData {
            needed: STANDARD_HEADER_MIN,
            available: buf.len(),
        });
    }

    let htyp = buf[0];
    if htyp & HTYP_VERSION_MASK != HTYP_VERSION1 {
        return Err(DltError::MalformedHeader(format!(
            "unsupported protocol version {}",
            (htyp & HTYP_VERSION_MASK) >> 5
        )));
    }

    let length = BigEndian::read_u16(&buf[2..4]);
    let min = StandardHeader::header_len(htyp);
    if (length as usize) < min {
        return Err(DltError::MalformedHeader(format!(
            "declared length {} below minimum {}",
            length, min
        )));
    }
    Ok(length)
}

/// Decodes the standard header (and extended header if UEH is set).
///
/// Returns the parsed header and the number of bytes consumed. The buffer
/// must hold at least the full header; the payload may follow.
pub fn decode_standard_header(buf: &[u8]) -> Result<(StandardHeader, usize)> {
    let length = peek_frame(buf)?;

    let htyp = buf[0];
    let header_len = StandardHeader::header_len(htyp);
    if buf.len() < header_len {
        return Err(DltError::InsufficientData {
            needed: header_len,
            available: buf.len(),
        });
    }

    let counter = buf[1];
    let mut offset = STANDARD_HEADER_MIN;

    let ecu_id = if htyp & HTYP_WEID != 0 {
        let id = read_id(&buf[offset..offset + 4]);
        offset += 4;
        id
    } else {
        None
    };

    let session_id = if htyp & HTYP_WSID != 0 {
        let id = BigEndian::read_u32(&buf[offset..offset + 4]);
        offset += 4;
        Some(id)
    } else {
        None
    };

    let device_timestamp = if htyp & HTYP_WTMS != 0 {
        let ticks = BigEndian::read_u32(&buf[offset..offset + 4]);
        offset += 4;
        Some(Duration::from_micros(
            ticks as u64 * DEVICE_TIME_RESOLUTION_US,
        ))
    } else {
        None
    };

    let extended = if htyp & HTYP_UEH != 0 {
        let msin = buf[offset];
        let noar = buf[offset + 1];
        let application_id = read_id(&buf[offset + 2..offset + 6]);
        let context_id = read_id(&buf[offset + 6..offset + 10]);
        offset += EXTENDED_HEADER_LEN;
        Some(ExtendedHeader {
            verbose: msin & MSIN_VERBOSE != 0,
            message_type: MessageType::from_raw(msin & !MSIN_VERBOSE),
            argument_count: noar,
            application_id,
            context_id,
        })
    } else {
        None
    };

    Ok((
        StandardHeader {
            big_endian: htyp & HTYP_MSBF != 0,
            counter,
            length,
            ecu_id,
            session_id,
            device_timestamp,
            extended,
        },
        offset,
    ))
}

/// Storage header prepended to every frame in the file format
#[derive(Debug, Clone, PartialEq)]
pub struct StorageHeader {
    pub timestamp: DateTime<Utc>,
    pub ecu_id: Option<String>,
}

impl StorageHeader {
    /// Decode the 16-byte storage header.
    ///
    /// Fails with [`DltError::InvalidMagic`] if the signature does not match.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < STORAGE_HEADER_LEN {
            return Err(DltError::InsufficientData {
                needed: STORAGE_HEADER_LEN,
                available: buf.len(),
            });
        }
        if buf[0..4] != STORAGE_MAGIC {
            return Err(DltError::InvalidMagic);
        }

        let seconds = LittleEndian::read_u32(&buf[4..8]) as i64;
        let micros = LittleEndian::read_u32(&buf[8..12]);
        let ecu_id = read_id(&buf[12..16]);
        let timestamp = Utc
            .timestamp_opt(seconds, micros.saturating_mul(1000))
            .single()
            .unwrap_or_default();
        Ok(StorageHeader { timestamp, ecu_id })
    }

    /// Encode the 16-byte storage header
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < STORAGE_HEADER_LEN {
            return Err(DltError::InsufficientBuffer {
                needed: STORAGE_HEADER_LEN,
                available: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&STORAGE_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.timestamp.timestamp().max(0) as u32);
        LittleEndian::write_u32(&mut buf[8..12], self.timestamp.timestamp_subsec_micros());
        write_id(&mut buf[12..16], self.ecu_id.as_deref());
        Ok(STORAGE_HEADER_LEN)
    }
}

/// Convert a device timestamp to its 0.1 ms wire representation
pub(crate) fn device_timestamp_ticks(timestamp: Duration) -> u32 {
    (timestamp.as_micros() as u64 / DEVICE_TIME_RESOLUTION_US) as u32
}
