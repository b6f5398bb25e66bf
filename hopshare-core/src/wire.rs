//! Framing: protocol version (1 byte) + length prefix (4 bytes LE) + bincode payload.
//! One frame per datagram.

use crate::protocol::{Message, PROTOCOL_VERSION};

const HEADER_SIZE: usize = 5;
/// Largest frame that fits a UDP datagram.
pub const MAX_FRAME_LEN: usize = 65_507;

/// Encode a message into a single frame.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    if HEADER_SIZE + payload.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large ({0} byte payload)")]
    TooLarge(usize),
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes
/// consumed. Trailing bytes after the frame are left to the caller.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameDecodeError::Truncated);
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(FrameDecodeError::Version(bytes[0]));
    }
    let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if HEADER_SIZE + len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < HEADER_SIZE + len {
        return Err(FrameDecodeError::Truncated);
    }
    let msg: Message = bincode::deserialize(&bytes[HEADER_SIZE..HEADER_SIZE + len])
        .map_err(FrameDecodeError::Decode)?;
    Ok((msg, HEADER_SIZE + len))
}

/// Error decoding a frame. Every variant means the datagram is malformed and is dropped.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("truncated frame")]
    Truncated,
    #[error("unsupported protocol version {0}")]
    Version(u8),
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::split;
    use crate::identity::{ContentId, PeerId, SessionId};
    use crate::protocol::{Content, ContentKind, ErrorCode, Payload};
    use crate::routing::RoutingTable;

    fn sample_hello() -> Message {
        let mut table = RoutingTable::new(PeerId::new("a"));
        table.add_owned_reference(ContentId::of_bytes(b"x"), "x.txt");
        Message::hello(&PeerId::new("a"), PeerId::multicast(), table.snapshot())
    }

    #[test]
    fn hello_survives_framing() {
        let msg = sample_hello();
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(frame[0], PROTOCOL_VERSION);
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn default_sized_fragment_fits_a_datagram() {
        let data = vec![7u8; 3000];
        let fragment = split(&data, "big.bin", 3000).remove(0);
        let req = Message::file_request(
            &PeerId::new("c"),
            PeerId::new("a"),
            PeerId::new("a"),
            &ContentId::of_bytes(&data),
            0,
        );
        let resp = Message::reply_to(
            &req,
            &PeerId::new("a"),
            ErrorCode::Valid,
            Payload::ResponseContent {
                kind: ContentKind::File,
                params: vec![],
                content: Content::Fragment(fragment),
            },
        );
        let frame = encode_frame(&resp).unwrap();
        assert!(frame.len() < 4096);
    }

    #[test]
    fn oversized_message_is_refused() {
        let mut msg = Message::ping(&PeerId::new("a"), PeerId::broadcast(), SessionId::none());
        msg.payload = Payload::Error {
            reason: "x".repeat(MAX_FRAME_LEN),
        };
        assert!(matches!(
            encode_frame(&msg),
            Err(FrameEncodeError::TooLarge(_))
        ));
    }

    #[test]
    fn truncated_and_garbage_frames() {
        let frame = encode_frame(&sample_hello()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..3]),
            Err(FrameDecodeError::Truncated)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::Truncated)
        ));
        let mut bad_version = frame.clone();
        bad_version[0] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            decode_frame(&bad_version),
            Err(FrameDecodeError::Version(_))
        ));
        let garbage = [PROTOCOL_VERSION, 4, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_frame(&garbage),
            Err(FrameDecodeError::Decode(_))
        ));
    }
}
