use bytes::{Buf, BufMut, BytesMut};
use std::env;
use std::io::Cursor;
use std::sync::OnceLock;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::frame::{self, Frame};
use crate::Error;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Streaming codec for `Frame`s. Bytes are buffered until a whole frame is available, so a frame
/// split over any number of reads decodes exactly like one delivered in a single read.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Read from `MAX_FRAME_SIZE` the first time a frame is decoded.
    fn max_frame_size() -> usize {
        static MAX_FRAME_SIZE: OnceLock<usize> = OnceLock::new();

        *MAX_FRAME_SIZE.get_or_init(|| {
            env::var("MAX_FRAME_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
        })
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Check if the frame size exceeds a certain limit to prevent DoS attacks
        if src.len() > FrameCodec::max_frame_size() {
            return Err("frame size exceeds limit".into());
        }

        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            // Not enough data to parse a frame.
            Err(frame::Error::Incomplete) => {
                trace!(buffered = src.len(), "incomplete frame");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let position = cursor.position() as usize;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = frame.serialize();
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn decode_waits_for_whole_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        for part in [&b"*2\r\n$3\r\nGE"[..], b"T\r\n$3\r\nfo", b"o\r"] {
            buf.extend_from_slice(part);
            assert_eq!(codec.decode(&mut buf).unwrap(), None);
        }

        buf.extend_from_slice(b"\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Array(vec![
                Frame::Bulk(Bytes::from("GET")),
                Frame::Bulk(Bytes::from("foo")),
            ]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_consumes_one_frame_at_a_time() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"$1\r\na\r\n$1\r\nb\r\n$1"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Bulk(Bytes::from("a")))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Bulk(Bytes::from("b")))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"$1");
    }

    #[test]
    fn decode_protocol_error() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"*abc\r\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        let err = err.downcast_ref::<frame::Error>().unwrap();

        assert_eq!(*err, frame::Error::InvalidLength("abc".to_string()));
    }

    #[test]
    fn decode_rejects_deeply_nested_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"*1\r\n".repeat(1000)[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        let err = err.downcast_ref::<frame::Error>().unwrap();

        assert_eq!(*err, frame::Error::TooDeep);
    }

    #[test]
    fn max_frame_size_is_read_once() {
        let size = FrameCodec::max_frame_size();

        env::set_var("MAX_FRAME_SIZE", "1");
        assert_eq!(FrameCodec::max_frame_size(), size);
        env::remove_var("MAX_FRAME_SIZE");
    }

    #[test]
    fn decode_eof_with_partial_frame_is_an_error() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"*1\r\n$3\r\nfo"[..]);

        assert!(codec.decode_eof(&mut buf).is_err());
    }

    #[test]
    fn encode_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        codec.encode(Frame::Simple("OK".to_string()), &mut buf).unwrap();
        codec.encode(Frame::Null, &mut buf).unwrap();

        assert_eq!(&buf[..], b"+OK\r\n$-1\r\n");
    }
}
