// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;

use bytes::Buf;
use bytes::Bytes;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Deepest array nesting accepted in a request. Commands are flat arrays, anything far deeper
/// is rejected before it can exhaust the stack.
const MAX_DEPTH: usize = 64;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; unexpected frame type '{}'", *.0 as char)]
    InvalidDataType(u8),
    #[error("protocol error; invalid length {0:?}")]
    InvalidLength(String),
    /// The bytes following a bulk payload were not `\r\n`.
    #[error("protocol error; bulk string is not terminated by CRLF")]
    MissingTerminator,
    #[error("protocol error; arrays nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

/// A single protocol level value. Requests from clients are arrays of bulk strings, replies may
/// be any variant.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Parses one frame from the cursor, leaving the cursor right after it.
    ///
    /// Only the request shapes are accepted: arrays and bulk strings (including the `$-1` null
    /// bulk). When the buffer holds a prefix of a valid frame `Error::Incomplete` is returned and
    /// the caller is expected to retry once more bytes have arrived.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        if depth > MAX_DEPTH {
            return Err(Error::TooDeep);
        }

        // The first byte in an RESP-serialized payload always identifies its type.
        let first_byte = get_byte(src)?;

        match DataType::try_from(first_byte)? {
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = get_length(src)?;
                if length < 0 {
                    return Err(Error::InvalidLength(length.to_string()));
                }

                // The declared length is untrusted, don't let it drive the allocation.
                let mut frames = Vec::with_capacity(length.min(64) as usize);
                for _ in 0..length {
                    frames.push(Self::parse_nested(src, depth + 1)?);
                }

                Ok(Frame::Array(frames))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = get_length(src)?;
                match length {
                    -1 => Ok(Frame::Null),
                    length if length < 0 => Err(Error::InvalidLength(length.to_string())),
                    length => {
                        let data = get_exact(src, length as usize)?;
                        Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
                    }
                }
            }
            DataType::SimpleString | DataType::SimpleError | DataType::Integer => {
                Err(Error::InvalidDataType(first_byte))
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes);
        bytes
    }

    /// Appends the wire representation of the frame to `dst`.
    pub fn write_to(&self, dst: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                dst.push(u8::from(DataType::SimpleString));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.push(u8::from(DataType::SimpleError));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.push(u8::from(DataType::Integer));
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Bulk(data) => {
                dst.push(u8::from(DataType::BulkString));
                dst.extend_from_slice(data.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(data);
                dst.extend_from_slice(CRLF);
            }
            // RESP2 null bulk string.
            Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
            Frame::Array(frames) => {
                dst.push(u8::from(DataType::Array));
                dst.extend_from_slice(frames.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in frames {
                    frame.write_to(dst);
                }
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(frames) => {
                write!(f, "[")?;
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Reads a line up to (not including) the next CRLF and moves the cursor past the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_length(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = get_line(src)?;

    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::InvalidLength(String::from_utf8_lossy(line).into_owned()))
}

/// Reads exactly `len` payload bytes followed by CRLF. The payload itself may contain CRLF.
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], Error> {
    if src.remaining() < len + CRLF.len() {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    let data = &buf[start..start + len];

    if &buf[start + len..start + len + CRLF.len()] != CRLF {
        return Err(Error::MissingTerminator);
    }

    src.advance(len + CRLF.len());

    Ok(data)
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
