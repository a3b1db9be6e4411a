//! # Reply Frames
//!
//! The bytes a remote reply context hands to the transport.
//!
//! ## Format
//!
//! - **Ok**:  `[Tag::ReplyOk: 1b][Len: 4b][Payload: Len]`
//! - **Err**: `[Tag::ReplyErr: 1b][Len: 4b][Kind: 1b][Len: 4b][Message: Len]`
//!
//! All integers are Little-Endian.
//!
//! ## Invariants
//! - **Panic Safety**: decoding never panics on arbitrary input.
//! - **Exact**: a frame must consume the whole buffer; trailing bytes are an error.

use std::fmt;

use crate::error::RpcError;
use crate::message::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    Truncated,
    /// Byte does not correspond to a known frame or error tag.
    UnknownTag(u8),
    /// Error message is not valid UTF-8.
    InvalidUtf8,
    /// Bytes left over after a complete frame.
    TrailingBytes(usize),
    /// Body length exceeds `u32::MAX`.
    TooLarge(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "Frame truncated"),
            Self::UnknownTag(b) => write!(f, "Unknown tag byte: {:#04x}", b),
            Self::InvalidUtf8 => write!(f, "Error message is not valid UTF-8"),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after frame", n),
            Self::TooLarge(n) => write!(f, "Frame body of {} bytes is too large", n),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    ReplyOk = 0x10,
    ReplyErr = 0x11,
    EndpointUnavailable = 0x20,
    Handler = 0x21,
    NoReply = 0x22,
}

impl Tag {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x10 => Some(Self::ReplyOk),
            0x11 => Some(Self::ReplyErr),
            0x20 => Some(Self::EndpointUnavailable),
            0x21 => Some(Self::Handler),
            0x22 => Some(Self::NoReply),
            _ => None,
        }
    }
}

/// The outcome of a remotely originated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFrame {
    Ok(Payload),
    Err(RpcError),
}

impl ReplyFrame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Ok(payload) => write_blob(&mut buf, Tag::ReplyOk, payload)?,
            Self::Err(error) => {
                let (tag, message) = match error {
                    RpcError::EndpointUnavailable(name) => (Tag::EndpointUnavailable, name),
                    RpcError::Handler(msg) => (Tag::Handler, msg),
                    RpcError::NoReply(name) => (Tag::NoReply, name),
                };
                let mut body = Vec::with_capacity(message.len() + 5);
                write_blob(&mut body, tag, message.as_bytes())?;
                write_blob(&mut buf, Tag::ReplyErr, &body)?;
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let (tag, body) = read_blob(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(Error::TrailingBytes(cursor.len()));
        }

        match tag {
            Tag::ReplyOk => Ok(Self::Ok(body.to_vec())),
            Tag::ReplyErr => {
                let mut inner = body;
                let (kind, message) = read_blob(&mut inner)?;
                if !inner.is_empty() {
                    return Err(Error::TrailingBytes(inner.len()));
                }
                let message = std::str::from_utf8(message)
                    .map_err(|_| Error::InvalidUtf8)?
                    .to_string();
                let error = match kind {
                    Tag::EndpointUnavailable => RpcError::EndpointUnavailable(message),
                    Tag::Handler => RpcError::Handler(message),
                    Tag::NoReply => RpcError::NoReply(message),
                    other => return Err(Error::UnknownTag(other as u8)),
                };
                Ok(Self::Err(error))
            }
            other => Err(Error::UnknownTag(other as u8)),
        }
    }

    /// Converts the frame into the value a caller awaits.
    pub fn into_result(self) -> std::result::Result<Payload, RpcError> {
        match self {
            Self::Ok(payload) => Ok(payload),
            Self::Err(error) => Err(error),
        }
    }
}

fn write_blob(buf: &mut Vec<u8>, tag: Tag, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| Error::TooLarge(data.len()))?;
    buf.push(tag as u8);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

fn read_blob<'a>(cursor: &mut &'a [u8]) -> Result<(Tag, &'a [u8])> {
    let (&tag, rest) = cursor.split_first().ok_or(Error::Truncated)?;
    let tag = Tag::from_u8(tag).ok_or(Error::UnknownTag(tag))?;

    if rest.len() < 4 {
        return Err(Error::Truncated);
    }
    let (len, rest) = rest.split_at(4);
    let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;

    if rest.len() < len {
        return Err(Error::Truncated);
    }
    let (body, rest) = rest.split_at(len);
    *cursor = rest;
    Ok((tag, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_frame_layout() {
        let bytes = ReplyFrame::Ok(vec![42]).encode().unwrap();
        assert_eq!(bytes, vec![0x10, 1, 0, 0, 0, 42]);
    }

    #[test]
    fn test_error_frames_decode_to_same_error() {
        for error in [
            RpcError::EndpointUnavailable("echo".into()),
            RpcError::Handler("boom".into()),
            RpcError::NoReply("silent".into()),
        ] {
            let bytes = ReplyFrame::Err(error.clone()).encode().unwrap();
            let frame = ReplyFrame::decode(&bytes).unwrap();
            assert_eq!(frame.into_result(), Err(error));
        }
    }

    #[test]
    fn test_empty_payload() {
        let bytes = ReplyFrame::Ok(Vec::new()).encode().unwrap();
        assert_eq!(ReplyFrame::decode(&bytes).unwrap(), ReplyFrame::Ok(Vec::new()));
    }

    #[test]
    fn test_truncated_frames() {
        let bytes = ReplyFrame::Ok(vec![1, 2, 3]).encode().unwrap();
        for end in 0..bytes.len() {
            assert_eq!(ReplyFrame::decode(&bytes[..end]), Err(Error::Truncated));
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(ReplyFrame::decode(&[0xFF, 0, 0, 0, 0]), Err(Error::UnknownTag(0xFF)));
        // An error kind is not a valid top-level frame.
        assert_eq!(ReplyFrame::decode(&[0x20, 0, 0, 0, 0]), Err(Error::UnknownTag(0x20)));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = ReplyFrame::Ok(vec![7]).encode().unwrap();
        bytes.push(0);
        assert_eq!(ReplyFrame::decode(&bytes), Err(Error::TrailingBytes(1)));
    }

    #[test]
    fn test_invalid_utf8_message() {
        let body = [0x21, 1, 0, 0, 0, 0xFF];
        let mut bytes = vec![0x11, body.len() as u8, 0, 0, 0];
        bytes.extend_from_slice(&body);
        assert_eq!(ReplyFrame::decode(&bytes), Err(Error::InvalidUtf8));
    }
}
