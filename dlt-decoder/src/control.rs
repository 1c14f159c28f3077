//! Control message payload codec
//!
//! Control payloads start with a 32-bit service identifier in the frame's
//! endianness; responses carry one status byte right after it. A handful of
//! services get typed representations, everything else round-trips through
//! the generic variants with the raw parameter bytes preserved.

use crate::header::{read_id, read_u32, write_id, write_u32};
use crate::types::{DltError, Result};

/// Service id: SetLogLevel
pub const SERVICE_SET_LOG_LEVEL: u32 = 0x01;
/// Service id: GetDefaultLogLevel
pub const SERVICE_GET_DEFAULT_LOG_LEVEL: u32 = 0x04;
/// Service id: GetSoftwareVersion
pub const SERVICE_GET_SOFTWARE_VERSION: u32 = 0x13;

/// Response status: OK
pub const STATUS_OK: u8 = 0x00;
/// Response status: not supported
pub const STATUS_NOT_SUPPORTED: u8 = 0x01;
/// Response status: error
pub const STATUS_ERROR: u8 = 0x02;

/// Decoded control request
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    SetLogLevel {
        application_id: Option<String>,
        context_id: Option<String>,
        log_level: i8,
        com_interface: Option<String>,
    },
    GetDefaultLogLevel,
    GetSoftwareVersion,
    /// Any service without a typed representation
    Custom { service_id: u32, data: Vec<u8> },
}

impl ControlRequest {
    pub fn service_id(&self) -> u32 {
        match self {
            ControlRequest::SetLogLevel { .. } => SERVICE_SET_LOG_LEVEL,
            ControlRequest::GetDefaultLogLevel => SERVICE_GET_DEFAULT_LOG_LEVEL,
            ControlRequest::GetSoftwareVersion => SERVICE_GET_SOFTWARE_VERSION,
            ControlRequest::Custom { service_id, .. } => *service_id,
        }
    }
}

/// Decoded control response
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    SetLogLevel {
        status: u8,
    },
    GetDefaultLogLevel {
        status: u8,
        log_level: u8,
    },
    GetSoftwareVersion {
        status: u8,
        version: String,
    },
    /// Any service without a typed representation
    Generic {
        service_id: u32,
        status: u8,
        data: Vec<u8>,
    },
}

impl ControlResponse {
    pub fn service_id(&self) -> u32 {
        match self {
            ControlResponse::SetLogLevel { .. } => SERVICE_SET_LOG_LEVEL,
            ControlResponse::GetDefaultLogLevel { .. } => SERVICE_GET_DEFAULT_LOG_LEVEL,
            ControlResponse::GetSoftwareVersion { .. } => SERVICE_GET_SOFTWARE_VERSION,
            ControlResponse::Generic { service_id, .. } => *service_id,
        }
    }

    pub fn status(&self) -> u8 {
        match self {
            ControlResponse::SetLogLevel { status }
            | ControlResponse::GetDefaultLogLevel { status, .. }
            | ControlResponse::GetSoftwareVersion { status, .. }
            | ControlResponse::Generic { status, .. } => *status,
        }
    }
}

/// Control payload of a trace line
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPayload {
    Request(ControlRequest),
    Response(ControlResponse),
}

fn check_len(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(DltError::InsufficientData {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Decodes a control payload, returning it and the bytes consumed.
///
/// `is_request` comes from the MTIN field of the extended header: requests
/// and responses share service ids but differ in layout.
pub fn decode_control(
    buf: &[u8],
    big_endian: bool,
    is_request: bool,
) -> Result<(ControlPayload, usize)> {
    check_len(buf, 4)?;
    let service_id = read_u32(buf, big_endian);
    let body = &buf[4..];

    if is_request {
        let (request, consumed) = decode_request(service_id, body, big_endian)?;
        Ok((ControlPayload::Request(request), 4 + consumed))
    } else {
        let (response, consumed) = decode_response(service_id, body, big_endian)?;
        Ok((ControlPayload::Response(response), 4 + consumed))
    }
}

fn decode_request(
    service_id: u32,
    body: &[u8],
    _big_endian: bool,
) -> Result<(ControlRequest, usize)> {
    match service_id {
        SERVICE_SET_LOG_LEVEL => {
            check_len(body, 13)?;
            Ok((
                ControlRequest::SetLogLevel {
                    application_id: read_id(&body[0..4]),
                    context_id: read_id(&body[4..8]),
                    log_level: body[8] as i8,
                    com_interface: read_id(&body[9..13]),
                },
                13,
            ))
        }
        SERVICE_GET_DEFAULT_LOG_LEVEL => Ok((ControlRequest::GetDefaultLogLevel, 0)),
        SERVICE_GET_SOFTWARE_VERSION => Ok((ControlRequest::GetSoftwareVersion, 0)),
        _ => Ok((
            ControlRequest::Custom {
                service_id,
                data: body.to_vec(),
            },
            body.len(),
        )),
    }
}

fn decode_response(
    service_id: u32,
    body: &[u8],
    big_endian: bool,
) -> Result<(ControlResponse, usize)> {
    check_len(body, 1)?;
    let status = body[0];
    let params = &body[1..];

    match service_id {
        SERVICE_SET_LOG_LEVEL => Ok((ControlResponse::SetLogLevel { status }, 1)),
        SERVICE_GET_DEFAULT_LOG_LEVEL => {
            check_len(params, 1)?;
            Ok((
                ControlResponse::GetDefaultLogLevel {
                    status,
                    log_level: params[0],
                },
                2,
            ))
        }
        SERVICE_GET_SOFTWARE_VERSION => {
            check_len(params, 4)?;
            let len = read_u32(params, big_endian) as usize;
            check_len(&params[4..], len)?;
            let raw = &params[4..4 + len];
            let text = raw.strip_suffix(&[0]).unwrap_or(raw);
            let version = String::from_utf8_lossy(text).into_owned();
            Ok((
                ControlResponse::GetSoftwareVersion { status, version },
                1 + 4 + len,
            ))
        }
        _ => Ok((
            ControlResponse::Generic {
                service_id,
                status,
                data: params.to_vec(),
            },
            1 + params.len(),
        )),
    }
}

/// Encodes a control payload into `buf`, returning the bytes written.
pub fn encode_control(buf: &mut [u8], payload: &ControlPayload, big_endian: bool) -> Result<usize> {
    match payload {
        ControlPayload::Request(request) => encode_request(buf, request, big_endian),
        ControlPayload::Response(response) => encode_response(buf, response, big_endian),
    }
}

fn check_buf(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(DltError::InsufficientBuffer {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn encode_request(buf: &mut [u8], request: &ControlRequest, big_endian: bool) -> Result<usize> {
    match request {
        ControlRequest::SetLogLevel {
            application_id,
            context_id,
            log_level,
            com_interface,
        } => {
            check_buf(buf, 17)?;
            write_u32(buf, SERVICE_SET_LOG_LEVEL, big_endian);
            write_id(&mut buf[4..8], application_id.as_deref());
            write_id(&mut buf[8..12], context_id.as_deref());
            buf[12] = *log_level as u8;
            write_id(&mut buf[13..17], com_interface.as_deref());
            Ok(17)
        }
        ControlRequest::GetDefaultLogLevel | ControlRequest::GetSoftwareVersion => {
            check_buf(buf, 4)?;
            write_u32(buf, request.service_id(), big_endian);
            Ok(4)
        }
        ControlRequest::Custom { service_id, data } => {
            check_buf(buf, 4 + data.len())?;
            write_u32(buf, *service_id, big_endian);
            buf[4..4 + data.len()].copy_from_slice(data);
            Ok(4 + data.len())
        }
    }
}

fn encode_response(buf: &mut [u8], response: &ControlResponse, big_endian: bool) -> Result<usize> {
    match response {
        ControlResponse::SetLogLevel { status } => {
            check_buf(buf, 5)?;
            write_u32(buf, SERVICE_SET_LOG_LEVEL, big_endian);
            buf[4] = *status;
            Ok(5)
        }
        ControlResponse::GetDefaultLogLevel { status, log_level } => {
            check_buf(buf, 6)?;
            write_u32(buf, SERVICE_GET_DEFAULT_LOG_LEVEL, big_endian);
            buf[4] = *status;
            buf[5] = *log_level;
            Ok(6)
        }
        ControlResponse::GetSoftwareVersion { status, version } => {
            // Length field covers the text plus a trailing NUL
            let len = version.len() + 1;
            check_buf(buf, 9 + len)?;
            write_u32(buf, SERVICE_GET_SOFTWARE_VERSION, big_endian);
            buf[4] = *status;
            write_u32(&mut buf[5..], len as u32, big_endian);
            buf[9..9 + version.len()].copy_from_slice(version.as_bytes());
            buf[9 + version.len()] = 0;
            Ok(9 + len)
        }
        ControlResponse::Generic {
            service_id,
            status,
            data,
        } => {
            check_buf(buf, 5 + data.len())?;
            write_u32(buf, *service_id, big_endian);
            buf[4] = *status;
            buf[5..5 + data.len()].copy_from_slice(data);
            Ok(5 + data.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_log_level_request_round_trip() {
        let payload = ControlPayload::Request(ControlRequest::SetLogLevel {
            application_id: Some("APP1".to_string()),
            context_id: Some("CTX1".to_string()),
            log_level: -1,
            com_interface: None,
        });
        let mut buf = [0u8; 32];
        let written = encode_control(&mut buf, &payload, false).unwrap();
        assert_eq!(written, 17);

        let (decoded, consumed) = decode_control(&buf[..written], false, true).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_get_software_version_response_round_trip() {
        let payload = ControlPayload::Response(ControlResponse::GetSoftwareVersion {
            status: STATUS_OK,
            version: "ECU 1.2.3".to_string(),
        });
        let mut buf = [0u8; 64];
        let written = encode_control(&mut buf, &payload, true).unwrap();

        let (decoded, consumed) = decode_control(&buf[..written], true, false).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_get_default_log_level_response() {
        let payload = ControlPayload::Response(ControlResponse::GetDefaultLogLevel {
            status: STATUS_OK,
            log_level: 4,
        });
        let mut buf = [0u8; 8];
        let written = encode_control(&mut buf, &payload, false).unwrap();
        assert_eq!(written, 6);

        let (decoded, _) = decode_control(&buf[..written], false, false).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_unknown_service_preserved() {
        let payload = ControlPayload::Request(ControlRequest::Custom {
            service_id: 0xF01,
            data: vec![1, 2, 3],
        });
        let mut buf = [0u8; 16];
        let written = encode_control(&mut buf, &payload, false).unwrap();

        let (decoded, consumed) = decode_control(&buf[..written], false, true).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_truncated_response_rejected() {
        // Service id only, status byte missing
        let buf = SERVICE_SET_LOG_LEVEL.to_le_bytes();
        assert!(matches!(
            decode_control(&buf, false, false),
            Err(DltError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_software_version_length_past_end() {
        let mut buf = SERVICE_GET_SOFTWARE_VERSION.to_le_bytes().to_vec();
        buf.push(STATUS_OK);
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(b"1.0");
        assert!(matches!(
            decode_control(&buf, false, false),
            Err(DltError::InsufficientData { .. })
        ));
    }
}
