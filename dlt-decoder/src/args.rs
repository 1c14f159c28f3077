//! Verbose argument codec
//!
//! Each verbose argument starts with a 32-bit type-info word in the frame's
//! endianness, followed by the argument data. The type-info selects the
//! payload kind (bool, integer, float, string, raw) and the length, plus
//! presentation hints such as hexadecimal output for integers.

use std::fmt;

use crate::header::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::types::{DltError, Result};

/// Type-info: length field mask (TYLE)
pub const TYPE_INFO_LENGTH_MASK: u32 = 0x0F;
/// Type-info: boolean
pub const TYPE_INFO_BOOL: u32 = 0x10;
/// Type-info: signed integer
pub const TYPE_INFO_SIGNED: u32 = 0x20;
/// Type-info: unsigned integer
pub const TYPE_INFO_UNSIGNED: u32 = 0x40;
/// Type-info: float
pub const TYPE_INFO_FLOAT: u32 = 0x80;
/// Type-info: string
pub const TYPE_INFO_STRING: u32 = 0x200;
/// Type-info: raw data
pub const TYPE_INFO_RAW: u32 = 0x400;
/// Type-info: variable info attached (unsupported)
pub const TYPE_INFO_VARIABLE_INFO: u32 = 0x800;
/// Type-info: fixed point (unsupported)
pub const TYPE_INFO_FIXED_POINT: u32 = 0x1000;
/// Type-info: struct (unsupported)
pub const TYPE_INFO_STRUCT: u32 = 0x4000;
/// Bits considered when dispatching on the argument kind
pub const TYPE_INFO_KIND_MASK: u32 = 0x67F0;
/// Type-info: string/integer coding field mask (SCOD)
pub const TYPE_INFO_CODING_MASK: u32 = 0x0003_8000;
/// SCOD field shift
pub const TYPE_INFO_CODING_SHIFT: u32 = 15;

/// Argument byte width encoded in the TYLE field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeLength {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
    Bits128,
}

impl TypeLength {
    pub fn from_type_info(type_info: u32) -> Option<Self> {
        match type_info & TYPE_INFO_LENGTH_MASK {
            1 => Some(TypeLength::Bits8),
            2 => Some(TypeLength::Bits16),
            3 => Some(TypeLength::Bits32),
            4 => Some(TypeLength::Bits64),
            5 => Some(TypeLength::Bits128),
            _ => None,
        }
    }

    pub fn byte_len(self) -> usize {
        match self {
            TypeLength::Bits8 => 1,
            TypeLength::Bits16 => 2,
            TypeLength::Bits32 => 4,
            TypeLength::Bits64 => 8,
            TypeLength::Bits128 => 16,
        }
    }

    fn tyle(self) -> u32 {
        match self {
            TypeLength::Bits8 => 1,
            TypeLength::Bits16 => 2,
            TypeLength::Bits32 => 3,
            TypeLength::Bits64 => 4,
            TypeLength::Bits128 => 5,
        }
    }
}

/// Parsed view of the 32-bit type-info word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo(pub u32);

impl TypeInfo {
    /// The kind-selecting bits (BOOL/SINT/UINT/FLOA/STRG/RAWD/STRU)
    pub fn kind(self) -> u32 {
        self.0 & TYPE_INFO_KIND_MASK
    }

    /// The TYLE length field, when it holds a defined value
    pub fn length(self) -> Option<TypeLength> {
        TypeLength::from_type_info(self.0)
    }

    /// The raw SCOD coding field value
    pub fn coding(self) -> u32 {
        (self.0 & TYPE_INFO_CODING_MASK) >> TYPE_INFO_CODING_SHIFT
    }

    /// True when the VARI or FIXP extension bits are set
    pub fn has_extensions(self) -> bool {
        self.0 & (TYPE_INFO_VARIABLE_INFO | TYPE_INFO_FIXED_POINT) != 0
    }

    pub fn string_coding(self) -> StringCoding {
        match self.coding() {
            1 => StringCoding::Utf8,
            _ => StringCoding::Ascii,
        }
    }

    pub fn int_format(self) -> IntFormat {
        match self.coding() {
            2 => IntFormat::Hex,
            3 => IntFormat::Binary,
            _ => IntFormat::Decimal,
        }
    }
}

/// String payload coding from the SCOD field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringCoding {
    /// ISO-8859-1, decoded byte-for-byte
    Ascii,
    Utf8,
}

/// Integer presentation hint from the SCOD field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntFormat {
    #[default]
    Decimal,
    Hex,
    Binary,
}

/// A decoded verbose argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Bool(bool),
    Signed {
        width: TypeLength,
        value: i64,
    },
    Unsigned {
        width: TypeLength,
        value: u64,
        format: IntFormat,
    },
    Float32(f32),
    Float64(f64),
    String {
        coding: StringCoding,
        value: String,
    },
    Raw(Vec<u8>),
    /// Argument kinds that are recognized but not interpreted
    /// (128-bit integers, 16-bit and 128-bit floats). The raw bytes are
    /// preserved so the argument re-encodes unchanged.
    Unknown {
        type_info: u32,
        data: Vec<u8>,
    },
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn string_to_latin1(s: &str) -> Vec<u8> {
    s.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect()
}

fn payload_error(type_info: u32, detail: &str) -> DltError {
    DltError::InvalidPayload(format!("type info {type_info:#010x}: {detail}"))
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

/// Decodes one verbose argument from the start of `buf`.
///
/// Returns the argument and the number of bytes consumed, type-info word
/// included. Arguments carrying the VARI, FIXP or STRU bits are rejected
/// with [`DltError::InvalidPayload`].
pub fn decode_argument(buf: &[u8], big_endian: bool) -> Result<(Argument, usize)> {
    check_len(buf, 4)?;
    let type_info = read_u32(buf, big_endian);
    let info = TypeInfo(type_info);
    let data = &buf[4..];

    if info.has_extensions() {
        return Err(payload_error(type_info, "unsupported VARI/FIXP bits"));
    }

    let (arg, len) = match info.kind() {
        TYPE_INFO_BOOL => {
            let width = info
                .length()
                .ok_or_else(|| payload_error(type_info, "invalid bool length"))?;
            if width != TypeLength::Bits8 {
                return Err(payload_error(type_info, "bool wider than 8 bits"));
            }
            check_len(data, 1)?;
            (Argument::Bool(data[0] != 0), 1)
        }
        TYPE_INFO_SIGNED => {
            let width = info
                .length()
                .ok_or_else(|| payload_error(type_info, "invalid integer length"))?;
            let len = width.byte_len();
            check_len(data, len)?;
            if width == TypeLength::Bits128 {
                (
                    Argument::Unknown {
                        type_info,
                        data: data[..len].to_vec(),
                    },
                    len,
                )
            } else {
                let value = match width {
                    TypeLength::Bits8 => data[0] as i8 as i64,
                    TypeLength::Bits16 => read_u16(data, big_endian) as i16 as i64,
                    TypeLength::Bits32 => read_u32(data, big_endian) as i32 as i64,
                    _ => read_u64(data, big_endian) as i64,
                };
                (Argument::Signed { width, value }, len)
            }
        }
        TYPE_INFO_UNSIGNED => {
            let width = info
                .length()
                .ok_or_else(|| payload_error(type_info, "invalid integer length"))?;
            let len = width.byte_len();
            check_len(data, len)?;
            if width == TypeLength::Bits128 {
                (
                    Argument::Unknown {
                        type_info,
                        data: data[..len].to_vec(),
                    },
                    len,
                )
            } else {
                let value = match width {
                    TypeLength::Bits8 => data[0] as u64,
                    TypeLength::Bits16 => read_u16(data, big_endian) as u64,
                    TypeLength::Bits32 => read_u32(data, big_endian) as u64,
                    _ => read_u64(data, big_endian),
                };
                (
                    Argument::Unsigned {
                        width,
                        value,
                        format: info.int_format(),
                    },
                    len,
                )
            }
        }
        TYPE_INFO_FLOAT => {
            let width = info
                .length()
                .ok_or_else(|| payload_error(type_info, "invalid float length"))?;
            let len = width.byte_len();
            check_len(data, len)?;
            match width {
                TypeLength::Bits32 => (
                    Argument::Float32(f32::from_bits(read_u32(data, big_endian))),
                    len,
                ),
                TypeLength::Bits64 => (
                    Argument::Float64(f64::from_bits(read_u64(data, big_endian))),
                    len,
                ),
                // 16- and 128-bit floats are carried through uninterpreted
                _ => (
                    Argument::Unknown {
                        type_info,
                        data: data[..len].to_vec(),
                    },
                    len,
                ),
            }
        }
        TYPE_INFO_STRING => {
            check_len(data, 2)?;
            let len = read_u16(data, big_endian) as usize;
            check_len(&data[2..], len)?;
            let raw = &data[2..2 + len];
            // Wire length includes a trailing NUL, which the string value
            // drops. A zero-length field decodes to an empty string.
            let text = raw.strip_suffix(&[0]).unwrap_or(raw);
            let coding = info.string_coding();
            let value = match coding {
                StringCoding::Utf8 => String::from_utf8_lossy(text).into_owned(),
                StringCoding::Ascii => latin1_to_string(text),
            };
            (Argument::String { coding, value }, 2 + len)
        }
        TYPE_INFO_RAW => {
            check_len(data, 2)?;
            let len = read_u16(data, big_endian) as usize;
            check_len(&data[2..], len)?;
            (Argument::Raw(data[2..2 + len].to_vec()), 2 + len)
        }
        _ => return Err(payload_error(type_info, "unrecognized argument kind")),
    };

    Ok((arg, 4 + len))
}

/// Encodes one verbose argument into `buf`, returning the bytes written.
pub fn encode_argument(buf: &mut [u8], arg: &Argument, big_endian: bool) -> Result<usize> {
    match arg {
        Argument::Bool(value) => {
            check_buf(buf, 5)?;
            write_u32(buf, TYPE_INFO_BOOL | TypeLength::Bits8.tyle(), big_endian);
            buf[4] = u8::from(*value);
            Ok(5)
        }
        Argument::Signed { width, value } => {
            let len = width.byte_len();
            check_buf(buf, 4 + len)?;
            write_u32(buf, TYPE_INFO_SIGNED | width.tyle(), big_endian);
            match width {
                TypeLength::Bits8 => buf[4] = *value as u8,
                TypeLength::Bits16 => write_u16(&mut buf[4..], *value as u16, big_endian),
                TypeLength::Bits32 => write_u32(&mut buf[4..], *value as u32, big_endian),
                _ => write_u64(&mut buf[4..], *value as u64, big_endian),
            }
            Ok(4 + len)
        }
        Argument::Unsigned {
            width,
            value,
            format,
        } => {
            let len = width.byte_len();
            check_buf(buf, 4 + len)?;
            let coding = match format {
                IntFormat::Decimal => 0,
                IntFormat::Hex => 2,
                IntFormat::Binary => 3,
            };
            write_u32(
                buf,
                TYPE_INFO_UNSIGNED | width.tyle() | (coding << TYPE_INFO_CODING_SHIFT),
                big_endian,
            );
            match width {
                TypeLength::Bits8 => buf[4] = *value as u8,
                TypeLength::Bits16 => write_u16(&mut buf[4..], *value as u16, big_endian),
                TypeLength::Bits32 => write_u32(&mut buf[4..], *value as u32, big_endian),
                _ => write_u64(&mut buf[4..], *value, big_endian),
            }
            Ok(4 + len)
        }
        Argument::Float32(value) => {
            check_buf(buf, 8)?;
            write_u32(buf, TYPE_INFO_FLOAT | TypeLength::Bits32.tyle(), big_endian);
            write_u32(&mut buf[4..], value.to_bits(), big_endian);
            Ok(8)
        }
        Argument::Float64(value) => {
            check_buf(buf, 12)?;
            write_u32(buf, TYPE_INFO_FLOAT | TypeLength::Bits64.tyle(), big_endian);
            write_u64(&mut buf[4..], value.to_bits(), big_endian);
            Ok(12)
        }
        Argument::String { coding, value } => {
            let bytes = match coding {
                StringCoding::Utf8 => value.as_bytes().to_vec(),
                StringCoding::Ascii => string_to_latin1(value),
            };
            // Wire length covers the payload plus a trailing NUL
            let len = bytes.len() + 1;
            if len > u16::MAX as usize {
                return Err(DltError::InvalidPayload(format!(
                    "string argument of {} bytes exceeds the 16-bit length field",
                    len
                )));
            }
            check_buf(buf, 6 + len)?;
            let scod = match coding {
                StringCoding::Ascii => 0,
                StringCoding::Utf8 => 1,
            };
            write_u32(
                buf,
                TYPE_INFO_STRING | (scod << TYPE_INFO_CODING_SHIFT),
                big_endian,
            );
            write_u16(&mut buf[4..], len as u16, big_endian);
            buf[6..6 + bytes.len()].copy_from_slice(&bytes);
            buf[6 + bytes.len()] = 0;
            Ok(6 + len)
        }
        Argument::Raw(data) => {
            if data.len() > u16::MAX as usize {
                return Err(DltError::InvalidPayload(format!(
                    "raw argument of {} bytes exceeds the 16-bit length field",
                    data.len()
                )));
            }
            check_buf(buf, 6 + data.len())?;
            write_u32(buf, TYPE_INFO_RAW, big_endian);
            write_u16(&mut buf[4..], data.len() as u16, big_endian);
            buf[6..6 + data.len()].copy_from_slice(data);
            Ok(6 + data.len())
        }
        Argument::Unknown { type_info, data } => {
            check_buf(buf, 4 + data.len())?;
            write_u32(buf, *type_info, big_endian);
            buf[4..4 + data.len()].copy_from_slice(data);
            Ok(4 + data.len())
        }
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

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Bool(value) => write!(f, "{}", value),
            Argument::Signed { value, .. } => write!(f, "{}", value),
            Argument::Unsigned { value, format, .. } => match format {
                IntFormat::Decimal => write!(f, "{}", value),
                IntFormat::Hex => write!(f, "0x{:x}", value),
                IntFormat::Binary => write!(f, "0b{:b}", value),
            },
            Argument::Float32(value) => write!(f, "{}", value),
            Argument::Float64(value) => write!(f, "{}", value),
            Argument::String { value, .. } => f.write_str(value),
            Argument::Raw(data) => {
                for (i, byte) in data.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Argument::Unknown { data, .. } => {
                for (i, byte) in data.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}
