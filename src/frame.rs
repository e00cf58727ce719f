// ABOUTME: Defines the NSQ wire frame and the stateful decoder that turns a byte stream into frames
// ABOUTME: Frames are the unit nsqd uses to push responses, errors and messages back to a connection

use bytes::{Buf, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Magic preamble a client writes exactly once, immediately after the TCP
/// handshake, to select protocol version 2.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Size in bytes of the message id field carried in every `Message` frame.
pub const MESSAGE_ID_LENGTH: usize = 16;

/// Identifier of a message assigned by nsqd, opaque to the client beyond
/// being usable in `FIN`/`REQ`/`TOUCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; MESSAGE_ID_LENGTH]);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The three frame types nsqd can send, tagged by a 4-byte big-endian code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum FrameType {
    Response = 0,
    Error = 1,
    Message = 2,
}

/// A decoded wire frame.
///
/// `Message` carries the fields nsqd packs ahead of the message body:
/// an 8-byte nanosecond timestamp, a 2-byte attempt counter and a 16-byte id.
#[derive(Debug, Clone)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message {
        timestamp_ns: i64,
        attempts: u16,
        id: MessageId,
        body: Bytes,
    },
}

impl Frame {
    /// The literal body nsqd sends in the `Response` frame used as a heartbeat.
    pub const HEARTBEAT_BODY: &'static [u8] = b"_heartbeat_";

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(body) if body.as_ref() == Self::HEARTBEAT_BODY)
    }

    /// Split an `Error` frame's body into its error code and message, the
    /// code being everything up to the first whitespace byte.
    pub fn error_parts(body: &[u8]) -> (&[u8], &[u8]) {
        match body.iter().position(u8::is_ascii_whitespace) {
            Some(idx) => (&body[..idx], &body[idx + 1..]),
            None => (body, &[]),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown frame type: {0}")]
    UnknownFrameType(i32),

    #[error("message frame too short: need at least {need} bytes, have {have}")]
    ShortMessageFrame { need: usize, have: usize },

    #[error("frame body exceeds configured maximum ({0} bytes)")]
    FrameTooLarge(u32),
}

/// Caps how large a single frame's declared size may be before the decoder
/// refuses to buffer it, guarding against a misbehaving or malicious peer.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug)]
enum DecodeState {
    NeedSize,
    HaveSize(u32),
}

/// Incremental frame decoder fed arbitrary chunks of bytes read off the
/// socket. Tolerates partial reads, multiple frames landing in one read, and
/// zero-length reads; never blocks waiting for "enough" data itself — callers
/// drive it by appending newly-read bytes and calling `decode` in a loop.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecodeState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: DecodeState::NeedSize,
        }
    }

    /// Buffer for the caller to read new bytes into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to decode one frame from whatever has been buffered so far.
    /// Returns `Ok(None)` when more bytes are needed.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn decode(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            match self.state {
                DecodeState::NeedSize => {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }
                    let size = (&self.buffer[..4]).get_u32();
                    if size > MAX_FRAME_SIZE {
                        return Err(CodecError::FrameTooLarge(size));
                    }
                    self.buffer.advance(4);
                    self.state = DecodeState::HaveSize(size);
                }
                DecodeState::HaveSize(size) => {
                    if self.buffer.len() < size as usize {
                        return Ok(None);
                    }
                    let mut payload = self.buffer.split_to(size as usize).freeze();
                    self.state = DecodeState::NeedSize;

                    if payload.len() < 4 {
                        return Err(CodecError::ShortMessageFrame {
                            need: 4,
                            have: payload.len(),
                        });
                    }
                    let frame_type_raw = (&payload[..4]).get_i32();
                    payload.advance(4);
                    let frame_type = FrameType::try_from(frame_type_raw)
                        .map_err(|_| CodecError::UnknownFrameType(frame_type_raw))?;

                    return Ok(Some(match frame_type {
                        FrameType::Response => Frame::Response(payload),
                        FrameType::Error => Frame::Error(payload),
                        FrameType::Message => decode_message(payload)?,
                    }));
                }
            }
        }
    }
}

fn decode_message(mut payload: Bytes) -> Result<Frame, CodecError> {
    const HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LENGTH;
    if payload.len() < HEADER_LEN {
        return Err(CodecError::ShortMessageFrame {
            need: HEADER_LEN,
            have: payload.len(),
        });
    }
    let timestamp_ns = (&payload[..8]).get_i64();
    payload.advance(8);
    let attempts = (&payload[..2]).get_u16();
    payload.advance(2);
    let mut id = [0u8; MESSAGE_ID_LENGTH];
    id.copy_from_slice(&payload[..MESSAGE_ID_LENGTH]);
    payload.advance(MESSAGE_ID_LENGTH);

    Ok(Frame::Message {
        timestamp_ns,
        attempts,
        id: MessageId(id),
        body: payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn encode_frame(frame_type: i32, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let size = 4 + body.len() as u32;
        buf.put_u32(size);
        buf.put_i32(frame_type);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn decodes_response_frame() {
        let bytes = encode_frame(0, b"OK");
        let mut decoder = FrameDecoder::new();
        decoder.buffer_mut().extend_from_slice(&bytes);
        match decoder.decode().unwrap().unwrap() {
            Frame::Response(body) => assert_eq!(&body[..], b"OK"),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn decodes_frame_split_across_multiple_reads() {
        let bytes = encode_frame(0, b"OK");
        let mut decoder = FrameDecoder::new();
        for chunk in bytes.chunks(1) {
            decoder.buffer_mut().extend_from_slice(chunk);
            if let Some(frame) = decoder.decode().unwrap() {
                match frame {
                    Frame::Response(body) => assert_eq!(&body[..], b"OK"),
                    other => panic!("unexpected {other:?}"),
                }
                return;
            }
        }
        panic!("never produced a frame");
    }

    #[test]
    fn decodes_two_frames_from_one_buffer() {
        let mut bytes = encode_frame(0, b"OK");
        bytes.extend(encode_frame(1, b"E_INVALID bad"));
        let mut decoder = FrameDecoder::new();
        decoder.buffer_mut().extend_from_slice(&bytes);

        assert!(matches!(
            decoder.decode().unwrap().unwrap(),
            Frame::Response(_)
        ));
        assert!(matches!(decoder.decode().unwrap().unwrap(), Frame::Error(_)));
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn decodes_message_frame() {
        let mut body = Vec::new();
        body.put_i64(1_000_000_000);
        body.put_u16(1);
        body.extend_from_slice(&[0xABu8; MESSAGE_ID_LENGTH]);
        body.extend_from_slice(b"hello");
        let bytes = encode_frame(2, &body);

        let mut decoder = FrameDecoder::new();
        decoder.buffer_mut().extend_from_slice(&bytes);
        match decoder.decode().unwrap().unwrap() {
            Frame::Message {
                timestamp_ns,
                attempts,
                id,
                body,
            } => {
                assert_eq!(timestamp_ns, 1_000_000_000);
                assert_eq!(attempts, 1);
                assert_eq!(id.0, [0xABu8; MESSAGE_ID_LENGTH]);
                assert_eq!(&body[..], b"hello");
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_frame_type() {
        let bytes = encode_frame(99, b"");
        let mut decoder = FrameDecoder::new();
        decoder.buffer_mut().extend_from_slice(&bytes);
        assert!(matches!(
            decoder.decode(),
            Err(CodecError::UnknownFrameType(99))
        ));
    }

    #[test]
    fn heartbeat_is_recognized() {
        let frame = Frame::Response(Bytes::from_static(Frame::HEARTBEAT_BODY));
        assert!(frame.is_heartbeat());
        assert!(!Frame::Response(Bytes::from_static(b"OK")).is_heartbeat());
    }

    #[test]
    fn error_parts_split_on_first_whitespace() {
        let (code, msg) = Frame::error_parts(b"E_BAD_BODY body too big");
        assert_eq!(code, b"E_BAD_BODY");
        assert_eq!(msg, b"body too big");
    }
}
