//! Streaming frame decoder
//!
//! [`StreamDecoder`] consumes byte chunks in whatever sizes the transport
//! delivers them, buffers incomplete frames internally and yields decoded
//! trace lines. Corrupt input triggers a bounded resynchronization scan for
//! the next plausible frame start instead of failing the stream.

use serde::{Deserialize, Serialize};

use crate::args::decode_argument;
use crate::control::decode_control;
use crate::header::{
    decode_standard_header, peek_frame, read_u32, StorageHeader, SERIAL_MAGIC, STANDARD_HEADER_MIN,
    STORAGE_HEADER_LEN, STORAGE_MAGIC,
};
use crate::types::{
    DltError, LineFeatures, MessageType, Payload, Result, TraceLine,
};

/// Slack allowed between the consumed control payload and the declared
/// frame length, for ECUs padding their control messages
const CONTROL_LENGTH_SLACK: usize = 32;

/// Default bound on resynchronization scans
pub const DEFAULT_MAX_RESYNC_BYTES: usize = 64 * 1024;

/// Framing convention of the byte source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkFormat {
    /// Stored file: every frame behind a 16-byte "DLT\x01" storage header
    #[default]
    File,
    /// Serial link: every frame behind a 4-byte "DLS\x01" marker
    Serial,
    /// TCP/UDP stream: the standard header starts immediately
    Network,
}

impl LinkFormat {
    /// Frame marker bytes, if the format has one
    pub fn marker(self) -> Option<&'static [u8; 4]> {
        match self {
            LinkFormat::File => Some(&STORAGE_MAGIC),
            LinkFormat::Serial => Some(&SERIAL_MAGIC),
            LinkFormat::Network => None,
        }
    }

    /// Bytes between the frame start and the standard header
    fn header_offset(self) -> usize {
        match self {
            LinkFormat::File => STORAGE_HEADER_LEN,
            LinkFormat::Serial => 4,
            LinkFormat::Network => 0,
        }
    }

    /// Minimum bytes discarded when a candidate frame turns out invalid
    fn min_discard(self) -> usize {
        match self {
            LinkFormat::File | LinkFormat::Serial => 4,
            LinkFormat::Network => 1,
        }
    }
}

/// Buffering decoder for one DLT byte stream.
///
/// Feed bytes with [`append`](Self::append), collect lines with
/// [`drain`](Self::drain), and call [`flush`](Self::flush) once at end of
/// stream. One decoder instance per stream; it is exclusively owned and
/// does no locking.
#[derive(Debug)]
pub struct StreamDecoder {
    format: LinkFormat,
    max_resync_bytes: usize,
    buf: Vec<u8>,
    /// Stream offset of `buf[0]`
    position: u64,
    /// Bytes skipped since the last good frame or desync report
    skipped: usize,
}

impl StreamDecoder {
    pub fn new(format: LinkFormat) -> Self {
        Self::with_max_resync(format, DEFAULT_MAX_RESYNC_BYTES)
    }

    pub fn with_max_resync(format: LinkFormat, max_resync_bytes: usize) -> Self {
        Self {
            format,
            max_resync_bytes: max_resync_bytes.max(1),
            buf: Vec::new(),
            position: 0,
            skipped: 0,
        }
    }

    pub fn format(&self) -> LinkFormat {
        self.format
    }

    /// Stream offset of the next unconsumed byte
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Appends a chunk of raw bytes to the internal buffer
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decodes every complete frame currently buffered.
    ///
    /// Incomplete trailing data stays buffered for the next call; splitting
    /// the input at arbitrary chunk boundaries does not change the decoded
    /// sequence. Invalid data produces at most one
    /// [`DltError::StreamDesynchronized`] item per `max_resync_bytes`
    /// scanned.
    pub fn drain(&mut self) -> Vec<Result<TraceLine>> {
        let mut out = Vec::new();
        let mut cursor = 0usize;

        loop {
            // Align on the frame marker, where the format has one
            if let Some(marker) = self.format.marker() {
                let avail = self.buf.len() - cursor;
                match find_marker(&self.buf[cursor..], marker) {
                    Some(0) => {}
                    Some(idx) => {
                        self.note_skipped(idx, &mut out, cursor);
                        cursor += idx;
                    }
                    None => {
                        // Keep up to 3 trailing bytes: they may be the
                        // start of a marker split across chunks
                        let keep = avail.min(marker.len() - 1);
                        let skip = avail - keep;
                        if skip > 0 {
                            self.note_skipped(skip, &mut out, cursor);
                            cursor += skip;
                        }
                        break;
                    }
                }
            }

            let offset = self.format.header_offset();
            let avail = self.buf.len() - cursor;
            if avail < offset + STANDARD_HEADER_MIN {
                break;
            }

            let total = match peek_frame(&self.buf[cursor + offset..]) {
                Ok(length) => offset + length as usize,
                Err(err) => {
                    log::debug!(
                        "invalid frame header at offset {}: {}",
                        self.position + cursor as u64,
                        err
                    );
                    let discard = self.format.min_discard().min(avail);
                    self.note_skipped(discard, &mut out, cursor);
                    cursor += discard;
                    continue;
                }
            };
            if avail < total {
                break;
            }

            let position = self.position + cursor as u64;
            match parse_frame(self.format, &self.buf[cursor..cursor + total], position) {
                Ok(line) => {
                    self.skipped = 0;
                    out.push(Ok(line));
                    cursor += total;
                }
                Err(err) => {
                    log::debug!("dropping invalid frame at offset {}: {}", position, err);
                    let discard = self.format.min_discard().min(avail);
                    self.note_skipped(discard, &mut out, cursor);
                    cursor += discard;
                }
            }
        }

        self.position += cursor as u64;
        self.buf.drain(..cursor);
        out
    }

    /// Drains remaining complete frames and discards any truncated tail.
    ///
    /// Call once at end of stream. A partial frame left in the buffer is not
    /// an error; live captures routinely end mid-frame.
    pub fn flush(&mut self) -> Vec<Result<TraceLine>> {
        let out = self.drain();
        if !self.buf.is_empty() {
            log::debug!(
                "discarding {} truncated trailing bytes at offset {}",
                self.buf.len(),
                self.position
            );
            self.position += self.buf.len() as u64;
            self.buf.clear();
        }
        self.skipped = 0;
        out
    }

    fn note_skipped(&mut self, count: usize, out: &mut Vec<Result<TraceLine>>, cursor: usize) {
        self.skipped += count;
        if self.skipped >= self.max_resync_bytes {
            out.push(Err(DltError::StreamDesynchronized {
                skipped: self.skipped,
                position: self.position + cursor as u64,
            }));
            self.skipped = 0;
        }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 4]) -> Option<usize> {
    if haystack.len() < marker.len() {
        return None;
    }
    haystack.windows(marker.len()).position(|w| w == marker)
}

/// Decodes one complete frame, marker and storage header included.
fn parse_frame(format: LinkFormat, frame: &[u8], position: u64) -> Result<TraceLine> {
    let storage = match format {
        LinkFormat::File => Some(StorageHeader::decode(frame)?),
        LinkFormat::Serial | LinkFormat::Network => None,
    };
    let body = &frame[format.header_offset()..];

    let (header, consumed) = decode_standard_header(body)?;
    if body.len() < header.length as usize {
        return Err(DltError::InsufficientData {
            needed: header.length as usize,
            available: body.len(),
        });
    }
    let payload_buf = &body[consumed..header.length as usize];
    let big_endian = header.big_endian;

    let (message_type, verbose) = match &header.extended {
        Some(ext) => (ext.message_type, ext.verbose),
        // Without an extended header the classification is unknowable
        None => (MessageType::Unknown(0), false),
    };

    let payload = decode_payload(payload_buf, big_endian, message_type, verbose, &header)?;

    let mut features = LineFeatures::empty();
    features.set(LineFeatures::ECU_ID, header.ecu_id.is_some());
    features.set(LineFeatures::SESSION_ID, header.session_id.is_some());
    features.set(
        LineFeatures::DEVICE_TIMESTAMP,
        header.device_timestamp.is_some(),
    );
    features.set(LineFeatures::BIG_ENDIAN, big_endian);
    features.set(LineFeatures::VERBOSE, verbose);
    features.set(LineFeatures::STORAGE_TIMESTAMP, storage.is_some());

    let (application_id, context_id) = match &header.extended {
        Some(ext) => (ext.application_id.clone(), ext.context_id.clone()),
        None => (None, None),
    };
    features.set(LineFeatures::APP_ID, application_id.is_some());
    features.set(LineFeatures::CONTEXT_ID, context_id.is_some());

    // The storage header supplies the ECU id when WEID is absent
    let ecu_id = header
        .ecu_id
        .clone()
        .or_else(|| storage.as_ref().and_then(|s| s.ecu_id.clone()));

    Ok(TraceLine {
        features,
        ecu_id,
        application_id,
        context_id,
        session_id: header.session_id,
        device_timestamp: header.device_timestamp,
        storage_timestamp: storage.map(|s| s.timestamp),
        count: Some(header.counter),
        message_type,
        position,
        payload,
    })
}

fn decode_payload(
    buf: &[u8],
    big_endian: bool,
    message_type: MessageType,
    verbose: bool,
    header: &crate::header::StandardHeader,
) -> Result<Payload> {
    if verbose {
        let noar = header
            .extended
            .as_ref()
            .map(|ext| ext.argument_count)
            .unwrap_or(0);
        let mut args = Vec::with_capacity(noar as usize);
        let mut offset = 0usize;
        for _ in 0..noar {
            let (arg, consumed) = decode_argument(&buf[offset..], big_endian)?;
            args.push(arg);
            offset += consumed;
        }
        if offset != buf.len() {
            return Err(DltError::InvalidPayload(format!(
                "verbose payload has {} trailing bytes",
                buf.len() - offset
            )));
        }
        return Ok(Payload::Verbose(args));
    }

    match message_type {
        MessageType::ControlRequest | MessageType::ControlResponse => {
            let is_request = message_type == MessageType::ControlRequest;
            let (control, consumed) = decode_control(buf, big_endian, is_request)?;
            // Some ECUs pad control payloads; tolerate a bounded excess
            if buf.len() < consumed || buf.len() > consumed + CONTROL_LENGTH_SLACK {
                return Err(DltError::InvalidPayload(format!(
                    "control payload length {} does not match consumed {}",
                    buf.len(),
                    consumed
                )));
            }
            Ok(Payload::Control(control))
        }
        // Time markers carry no service payload; keep whatever follows
        // as opaque bytes
        MessageType::ControlTime => Ok(Payload::NonVerbose {
            message_id: 0,
            data: buf.to_vec(),
        }),
        _ => {
            // A payload shorter than the message id is still a valid frame:
            // id 0, whatever bytes there are kept opaque
            if buf.len() < 4 {
                return Ok(Payload::NonVerbose {
                    message_id: 0,
                    data: buf.to_vec(),
                });
            }
            Ok(Payload::NonVerbose {
                message_id: read_u32(buf, big_endian),
                data: buf[4..].to_vec(),
            })
        }
    }
}

/// Decodes a single frame from a buffer known to hold exactly one frame.
/// Mostly useful in tests and for datagram (UDP) sources where the
/// transport preserves frame boundaries.
pub fn decode_frame(format: LinkFormat, frame: &[u8]) -> Result<TraceLine> {
    parse_frame(format, frame, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Argument, StringCoding};
    use crate::encoder::DltEncoder;
    use crate::types::{MessageType, Payload, TraceLine};

    fn text_line(text: &str) -> TraceLine {
        TraceLine::new(
            MessageType::LogInfo,
            Payload::Verbose(vec![Argument::String {
                coding: StringCoding::Utf8,
                value: text.to_string(),
            }]),
        )
        .with_ecu_id("ECU1")
        .with_application_id("APP1")
        .with_context_id("CTX1")
    }

    fn file_stream(lines: &[TraceLine]) -> Vec<u8> {
        let mut encoder = DltEncoder::new();
        let mut stream = Vec::new();
        let mut buf = [0u8; 4096];
        for line in lines {
            let written = encoder.encode_file(&mut buf, line).unwrap();
            stream.extend_from_slice(&buf[..written]);
        }
        stream
    }

    fn network_stream(lines: &[TraceLine]) -> Vec<u8> {
        let mut encoder = DltEncoder::new();
        let mut stream = Vec::new();
        let mut buf = [0u8; 4096];
        for line in lines {
            let written = encoder.encode(&mut buf, line).unwrap();
            stream.extend_from_slice(&buf[..written]);
        }
        stream
    }

    fn decoded_texts(items: &[Result<TraceLine>]) -> Vec<String> {
        items
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .map(|line| match &line.payload {
                Payload::Verbose(args) => args[0].to_string(),
                other => panic!("unexpected payload {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_file_stream_round_trip() {
        let lines = vec![text_line("one"), text_line("two"), text_line("three")];
        let stream = file_stream(&lines);

        let mut decoder = StreamDecoder::new(LinkFormat::File);
        decoder.append(&stream);
        let items = decoder.flush();

        assert_eq!(items.len(), 3);
        assert_eq!(decoded_texts(&items), vec!["one", "two", "three"]);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.ecu_id.as_deref(), Some("ECU1"));
        assert_eq!(first.count, Some(0));
        assert!(first.storage_timestamp.is_some());
        assert_eq!(first.position, 0);
    }

    #[test]
    fn test_network_stream_round_trip() {
        let lines = vec![text_line("alpha"), text_line("beta")];
        let stream = network_stream(&lines);

        let mut decoder = StreamDecoder::new(LinkFormat::Network);
        decoder.append(&stream);
        let items = decoder.flush();
        assert_eq!(decoded_texts(&items), vec!["alpha", "beta"]);
        assert!(items[0].as_ref().unwrap().storage_timestamp.is_none());
    }

    #[test]
    fn test_split_points_do_not_change_output() {
        let lines = vec![text_line("one"), text_line("two"), text_line("three")];
        let stream = file_stream(&lines);
        let reference: Vec<String> = {
            let mut decoder = StreamDecoder::new(LinkFormat::File);
            decoder.append(&stream);
            decoded_texts(&decoder.flush())
        };

        for split in 1..stream.len() {
            let mut decoder = StreamDecoder::new(LinkFormat::File);
            decoder.append(&stream[..split]);
            let mut items = decoder.drain();
            decoder.append(&stream[split..]);
            items.extend(decoder.flush());
            assert_eq!(
                decoded_texts(&items),
                reference,
                "split at byte {} changed the output",
                split
            );
        }
    }

    #[test]
    fn test_resync_across_corrupt_byte() {
        let stream = file_stream(&[text_line("good1"), text_line("good2")]);
        let mut corrupted = Vec::new();
        corrupted.extend_from_slice(&stream[..file_stream(&[text_line("good1")]).len()]);
        corrupted.push(0xFF); // garbage between two valid frames
        corrupted.extend_from_slice(&stream[file_stream(&[text_line("good1")]).len()..]);

        let mut decoder = StreamDecoder::new(LinkFormat::File);
        decoder.append(&corrupted);
        let items = decoder.flush();
        assert_eq!(decoded_texts(&items), vec!["good1", "good2"]);
    }

    #[test]
    fn test_corrupt_length_field_recovers() {
        let frame1 = file_stream(&[text_line("first")]);
        let frame2 = file_stream(&[text_line("second")]);
        let mut stream = frame1.clone();
        // Destroy the length field of the first frame
        stream[STORAGE_HEADER_LEN + 2] = 0x00;
        stream[STORAGE_HEADER_LEN + 3] = 0x01;
        stream.extend_from_slice(&frame2);

        let mut decoder = StreamDecoder::new(LinkFormat::File);
        decoder.append(&stream);
        let items = decoder.flush();
        assert_eq!(decoded_texts(&items), vec!["second"]);
    }

    #[test]
    fn test_desync_reported_after_bound() {
        let garbage = vec![0xAAu8; 256];
        let mut decoder = StreamDecoder::with_max_resync(LinkFormat::Network, 64);
        decoder.append(&garbage);
        let items = decoder.drain();

        let desyncs = items
            .iter()
            .filter(|item| {
                matches!(
                    item,
                    Err(DltError::StreamDesynchronized { .. })
                )
            })
            .count();
        assert!(desyncs >= 1, "expected at least one desync report");
        assert!(items.iter().all(|item| item.is_err()));
    }

    #[test]
    fn test_flush_discards_truncated_tail() {
        let stream = file_stream(&[text_line("whole")]);
        let mut truncated = file_stream(&[text_line("whole"), text_line("partial")]);
        truncated.truncate(stream.len() + 20);

        let mut decoder = StreamDecoder::new(LinkFormat::File);
        decoder.append(&truncated);
        let items = decoder.flush();
        assert_eq!(decoded_texts(&items), vec!["whole"]);
        assert!(decoder.buf.is_empty());
    }

    #[test]
    fn test_partial_marker_kept_across_chunks() {
        let stream = file_stream(&[text_line("later")]);
        let mut decoder = StreamDecoder::new(LinkFormat::File);
        // Garbage ending with the first two marker bytes
        decoder.append(&[0x00, 0x01, 0x02, b'D', b'L']);
        assert!(decoder.drain().iter().all(|item| item.is_err()));
        // Rest of the marker and the frame arrive later
        decoder.append(&stream[2..]);
        let items = decoder.flush();
        assert_eq!(decoded_texts(&items), vec!["later"]);
    }

    #[test]
    fn test_position_tracks_stream_offsets() {
        let lines = vec![text_line("one"), text_line("two")];
        let stream = file_stream(&lines);
        let first_len = file_stream(&[text_line("one")]).len();

        let mut decoder = StreamDecoder::new(LinkFormat::File);
        decoder.append(&stream);
        let items = decoder.flush();
        assert_eq!(items[0].as_ref().unwrap().position, 0);
        assert_eq!(items[1].as_ref().unwrap().position, first_len as u64);
        assert_eq!(decoder.position(), stream.len() as u64);
    }

    #[test]
    fn test_round_trip_preserves_line() {
        use crate::args::{IntFormat, TypeLength};
        use std::time::Duration;

        let line = TraceLine::new(
            MessageType::LogWarn,
            Payload::Verbose(vec![
                Argument::Bool(true),
                Argument::Signed {
                    width: TypeLength::Bits32,
                    value: -42,
                },
                Argument::Unsigned {
                    width: TypeLength::Bits64,
                    value: u64::MAX,
                    format: IntFormat::Hex,
                },
                Argument::Float64(1.5),
                Argument::String {
                    coding: StringCoding::Utf8,
                    value: "brake pressure".to_string(),
                },
                Argument::Raw(vec![1, 2, 3]),
            ]),
        )
        .with_ecu_id("ECU1")
        .with_application_id("APP1")
        .with_context_id("CTX1")
        .with_session_id(7)
        .with_device_timestamp(Duration::from_millis(250))
        .with_big_endian(true)
        .with_count(17);

        let mut encoder = DltEncoder::new();
        let mut buf = [0u8; 1024];
        let written = encoder.encode(&mut buf, &line).unwrap();
        let decoded = decode_frame(LinkFormat::Network, &buf[..written]).unwrap();

        assert_eq!(decoded.payload, line.payload);
        assert_eq!(decoded.message_type, line.message_type);
        assert_eq!(decoded.ecu_id, line.ecu_id);
        assert_eq!(decoded.application_id, line.application_id);
        assert_eq!(decoded.context_id, line.context_id);
        assert_eq!(decoded.session_id, line.session_id);
        assert_eq!(decoded.device_timestamp, line.device_timestamp);
        assert_eq!(decoded.count, Some(17));
        assert_eq!(decoded.features, line.features);
    }

    #[test]
    fn test_empty_nonverbose_payload_accepted() {
        // UEH set, NOAR 0, nothing after the extended header. Legal on the
        // wire; decodes to message id 0 with empty data
        let frame = [
            0x21, 0x00, 0x00, 0x0E, // HTYP (v1 | UEH), counter, length 14
            0x40, 0x00, // MSIN log info, NOAR 0
            b'A', b'P', b'P', 0x00, // APID
            b'C', b'T', b'X', 0x00, // CTID
        ];
        let line = decode_frame(LinkFormat::Network, &frame).unwrap();
        assert_eq!(line.message_type, MessageType::LogInfo);
        assert!(!line.is_verbose());
        assert_eq!(
            line.payload,
            Payload::NonVerbose {
                message_id: 0,
                data: vec![],
            }
        );
    }

    #[test]
    fn test_frame_without_extended_header() {
        // No UEH: the classification is not on the wire, the payload is
        // non-verbose
        let mut frame = vec![0x20, 0x07, 0x00, 0x0A]; // v1 only, counter 7, length 10
        frame.extend_from_slice(&0x1234u32.to_le_bytes());
        frame.extend_from_slice(&[0xAB, 0xCD]);

        let line = decode_frame(LinkFormat::Network, &frame).unwrap();
        assert_eq!(line.message_type, MessageType::Unknown(0));
        assert_eq!(line.count, Some(7));
        assert!(line.application_id.is_none());
        assert!(line.context_id.is_none());
        match &line.payload {
            Payload::NonVerbose { message_id, data } => {
                assert_eq!(*message_id, 0x1234);
                assert_eq!(data, &[0xAB, 0xCD]);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        // The minimal 4-byte frame decodes the same way, with no payload
        let minimal = [0x20, 0x00, 0x00, 0x04];
        let line = decode_frame(LinkFormat::Network, &minimal).unwrap();
        assert_eq!(
            line.payload,
            Payload::NonVerbose {
                message_id: 0,
                data: vec![],
            }
        );
    }

    #[test]
    fn test_nonverbose_payload_round_trip() {
        let line = TraceLine::new(
            MessageType::LogDebug,
            Payload::NonVerbose {
                message_id: 0x1234,
                data: vec![9, 8, 7],
            },
        );
        let mut encoder = DltEncoder::new();
        let mut buf = [0u8; 256];
        let written = encoder.encode(&mut buf, &line).unwrap();
        let decoded = decode_frame(LinkFormat::Network, &buf[..written]).unwrap();
        assert_eq!(decoded.payload, line.payload);
        assert!(!decoded.is_verbose());
    }

    #[test]
    fn test_control_response_through_stream() {
        use crate::control::{ControlPayload, ControlResponse, STATUS_OK};

        let line = TraceLine::new(
            MessageType::ControlResponse,
            Payload::Control(ControlPayload::Response(
                ControlResponse::GetSoftwareVersion {
                    status: STATUS_OK,
                    version: "ECU 2.1".to_string(),
                },
            )),
        )
        .with_ecu_id("ECU1");

        let stream = file_stream(&[line.clone()]);
        let mut decoder = StreamDecoder::new(LinkFormat::File);
        decoder.append(&stream);
        let items = decoder.flush();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().payload, line.payload);
    }

    #[test]
    fn test_serial_marker_framing() {
        let frame = network_stream(&[text_line("serial")]);
        let mut stream = SERIAL_MAGIC.to_vec();
        stream.extend_from_slice(&frame);

        let mut decoder = StreamDecoder::new(LinkFormat::Serial);
        decoder.append(&stream);
        let items = decoder.flush();
        assert_eq!(decoded_texts(&items), vec!["serial"]);
        assert!(items[0].as_ref().unwrap().storage_timestamp.is_none());
    }
}
