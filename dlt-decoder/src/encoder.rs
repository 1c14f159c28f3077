//! Trace line encoder
//!
//! Writes a [`TraceLine`] back to its wire representation. The encoder keeps
//! a running message counter per instance so successive lines get consecutive
//! counter values unless a line pins its own.

use byteorder::{BigEndian, ByteOrder};

use crate::args::encode_argument;
use crate::control::encode_control;
use crate::header::{
    device_timestamp_ticks, write_id, StorageHeader, EXTENDED_HEADER_LEN, HTYP_MSBF, HTYP_UEH,
    HTYP_VERSION1, HTYP_WEID, HTYP_WSID, HTYP_WTMS, STORAGE_HEADER_LEN,
};
use crate::types::{DltError, LineFeatures, Payload, Result, TraceLine};

/// Largest frame the 16-bit standard header length field can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Encoder with a per-instance running message counter.
///
/// The counter starts so that the first auto-counted line gets 0, increments
/// modulo 256 for each encoded line, and resynchronizes to any counter a line
/// carries explicitly.
#[derive(Debug, Default)]
pub struct DltEncoder {
    last_count: Option<u8>,
}

impl DltEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_count(&mut self, line: &TraceLine) -> u8 {
        let count = match line.count {
            Some(count) => count,
            None => self.last_count.map(|c| c.wrapping_add(1)).unwrap_or(0),
        };
        self.last_count = Some(count);
        count
    }

    /// Encodes one line into `buf`, returning the bytes written.
    ///
    /// The extended header is always emitted. Verbose lines write one typed
    /// argument per entry; control lines always encode with NOAR 0 and the
    /// verbose bit clear, whatever the line's feature flags say.
    pub fn encode(&mut self, buf: &mut [u8], line: &TraceLine) -> Result<usize> {
        let big_endian = line.is_big_endian();

        let mut htyp = HTYP_VERSION1 | HTYP_UEH;
        if big_endian {
            htyp |= HTYP_MSBF;
        }
        if line.features.contains(LineFeatures::ECU_ID) {
            htyp |= HTYP_WEID;
        }
        if line.features.contains(LineFeatures::SESSION_ID) {
            htyp |= HTYP_WSID;
        }
        if line.features.contains(LineFeatures::DEVICE_TIMESTAMP) {
            htyp |= HTYP_WTMS;
        }

        let header_len = crate::header::StandardHeader::header_len(htyp);
        if buf.len() < header_len {
            return Err(DltError::InsufficientBuffer {
                needed: header_len,
                available: buf.len(),
            });
        }

        buf[0] = htyp;
        buf[1] = self.next_count(line);
        // Length is backpatched once the payload size is known
        let mut offset = 4;

        if htyp & HTYP_WEID != 0 {
            write_id(&mut buf[offset..offset + 4], line.ecu_id.as_deref());
            offset += 4;
        }
        if htyp & HTYP_WSID != 0 {
            BigEndian::write_u32(
                &mut buf[offset..offset + 4],
                line.session_id.unwrap_or(0),
            );
            offset += 4;
        }
        if htyp & HTYP_WTMS != 0 {
            let ticks = line
                .device_timestamp
                .map(device_timestamp_ticks)
                .unwrap_or(0);
            BigEndian::write_u32(&mut buf[offset..offset + 4], ticks);
            offset += 4;
        }

        offset += self.write_extended_header(&mut buf[offset..], line)?;
        offset += match &line.payload {
            Payload::Verbose(args) => {
                let mut written = 0;
                for arg in args {
                    written += encode_argument(&mut buf[offset + written..], arg, big_endian)?;
                }
                written
            }
            Payload::NonVerbose { message_id, data } => {
                let needed = 4 + data.len();
                if buf.len() < offset + needed {
                    return Err(DltError::InsufficientBuffer {
                        needed: offset + needed,
                        available: buf.len(),
                    });
                }
                crate::header::write_u32(&mut buf[offset..], *message_id, big_endian);
                buf[offset + 4..offset + needed].copy_from_slice(data);
                needed
            }
            Payload::Control(control) => encode_control(&mut buf[offset..], control, big_endian)?,
        };

        if offset > MAX_FRAME_LEN {
            return Err(DltError::FrameTooLarge(offset));
        }
        BigEndian::write_u16(&mut buf[2..4], offset as u16);
        Ok(offset)
    }

    fn write_extended_header(&self, buf: &mut [u8], line: &TraceLine) -> Result<usize> {
        if buf.len() < EXTENDED_HEADER_LEN {
            return Err(DltError::InsufficientBuffer {
                needed: EXTENDED_HEADER_LEN,
                available: buf.len(),
            });
        }

        let (msin, noar) = match &line.payload {
            Payload::Verbose(args) => {
                if args.len() > u8::MAX as usize {
                    return Err(DltError::TooManyArguments(args.len()));
                }
                (line.message_type.raw() | 0x01, args.len() as u8)
            }
            Payload::NonVerbose { .. } => (line.message_type.raw(), 0),
            Payload::Control(_) => (line.message_type.raw(), 0),
        };

        buf[0] = msin;
        buf[1] = noar;
        write_id(&mut buf[2..6], line.application_id.as_deref());
        write_id(&mut buf[6..10], line.context_id.as_deref());
        Ok(EXTENDED_HEADER_LEN)
    }

    /// Encodes one line in the file format: a 16-byte storage header followed
    /// by the frame. The storage timestamp defaults to the Unix epoch when
    /// the line does not carry one; the storage ECU id mirrors the line's.
    pub fn encode_file(&mut self, buf: &mut [u8], line: &TraceLine) -> Result<usize> {
        let storage = StorageHeader {
            timestamp: line.storage_timestamp.unwrap_or_default(),
            ecu_id: line.ecu_id.clone(),
        };
        let written = storage.encode(buf)?;
        let frame = self.encode(&mut buf[written..], line)?;
        Ok(written + frame)
    }
}

/// Convenience wrapper encoding a line into a fresh vector.
pub fn encode_line(encoder: &mut DltEncoder, line: &TraceLine) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_FRAME_LEN + STORAGE_HEADER_LEN];
    let written = encoder.encode(&mut buf, line)?;
    buf.truncate(written);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Argument, IntFormat, StringCoding, TypeLength};
    use crate::control::{ControlPayload, ControlRequest};
    use crate::header::{decode_standard_header, STORAGE_MAGIC};
    use crate::types::MessageType;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn sample_line() -> TraceLine {
        TraceLine::new(
            MessageType::LogInfo,
            Payload::Verbose(vec![
                Argument::String {
                    coding: StringCoding::Utf8,
                    value: "temperature".to_string(),
                },
                Argument::Unsigned {
                    width: TypeLength::Bits16,
                    value: 451,
                    format: IntFormat::Decimal,
                },
            ]),
        )
        .with_ecu_id("ECU1")
        .with_application_id("APP1")
        .with_context_id("CTX1")
        .with_device_timestamp(Duration::from_millis(1500))
    }

    #[test]
    fn test_encode_verbose_line_headers() {
        let mut encoder = DltEncoder::new();
        let frame = encode_line(&mut encoder, &sample_line()).unwrap();

        let (header, consumed) = decode_standard_header(&frame).unwrap();
        assert_eq!(header.length as usize, frame.len());
        assert_eq!(header.counter, 0);
        assert_eq!(header.ecu_id.as_deref(), Some("ECU1"));
        assert_eq!(header.device_timestamp, Some(Duration::from_millis(1500)));
        assert!(!header.big_endian);

        let ext = header.extended.unwrap();
        assert!(ext.verbose);
        assert_eq!(ext.message_type, MessageType::LogInfo);
        assert_eq!(ext.argument_count, 2);
        assert_eq!(ext.application_id.as_deref(), Some("APP1"));
        assert_eq!(ext.context_id.as_deref(), Some("CTX1"));
        assert!(consumed < frame.len());
    }

    #[test]
    fn test_counter_increments_and_wraps() {
        let mut encoder = DltEncoder::new();
        let line = sample_line();
        let mut buf = [0u8; 256];

        for expected in 0..=255u8 {
            encoder.encode(&mut buf, &line).unwrap();
            assert_eq!(buf[1], expected);
        }
        // 256th line wraps back to 0
        encoder.encode(&mut buf, &line).unwrap();
        assert_eq!(buf[1], 0);
    }

    #[test]
    fn test_explicit_counter_resynchronizes() {
        let mut encoder = DltEncoder::new();
        let mut buf = [0u8; 256];

        encoder
            .encode(&mut buf, &sample_line().with_count(200))
            .unwrap();
        assert_eq!(buf[1], 200);
        encoder.encode(&mut buf, &sample_line()).unwrap();
        assert_eq!(buf[1], 201);
    }

    #[test]
    fn test_control_line_forces_noar_zero() {
        let line = TraceLine::new(
            MessageType::ControlRequest,
            Payload::Control(ControlPayload::Request(ControlRequest::GetSoftwareVersion)),
        );
        let mut encoder = DltEncoder::new();
        let frame = encode_line(&mut encoder, &line).unwrap();

        let (header, _) = decode_standard_header(&frame).unwrap();
        let ext = header.extended.unwrap();
        assert!(!ext.verbose);
        assert_eq!(ext.argument_count, 0);
        assert_eq!(ext.message_type, MessageType::ControlRequest);
    }

    #[test]
    fn test_encode_file_prepends_storage_header() {
        let line = sample_line()
            .with_storage_timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let mut encoder = DltEncoder::new();
        let mut buf = [0u8; 512];
        let written = encoder.encode_file(&mut buf, &line).unwrap();

        assert_eq!(&buf[0..4], &STORAGE_MAGIC);
        let storage = StorageHeader::decode(&buf[..STORAGE_HEADER_LEN]).unwrap();
        assert_eq!(storage.ecu_id.as_deref(), Some("ECU1"));
        assert_eq!(storage.timestamp.timestamp(), 1_700_000_000);

        let (header, _) = decode_standard_header(&buf[STORAGE_HEADER_LEN..written]).unwrap();
        assert_eq!(header.length as usize, written - STORAGE_HEADER_LEN);
    }

    #[test]
    fn test_big_endian_payload_flag() {
        let line = sample_line().with_big_endian(true);
        let mut encoder = DltEncoder::new();
        let frame = encode_line(&mut encoder, &line).unwrap();
        assert_eq!(frame[0] & HTYP_MSBF, HTYP_MSBF);
    }

    #[test]
    fn test_small_buffer_rejected() {
        let mut encoder = DltEncoder::new();
        let mut buf = [0u8; 8];
        assert!(matches!(
            encoder.encode(&mut buf, &sample_line()),
            Err(DltError::InsufficientBuffer { .. })
        ));
    }

    #[test]
    fn test_too_many_arguments_rejected() {
        let args = vec![Argument::Bool(true); 300];
        let line = TraceLine::new(MessageType::LogInfo, Payload::Verbose(args));
        let mut encoder = DltEncoder::new();
        let mut buf = [0u8; 4096];
        assert!(matches!(
            encoder.encode(&mut buf, &line),
            Err(DltError::TooManyArguments(300))
        ));
    }
}
