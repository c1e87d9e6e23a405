//! RFC 6455 frame codec.
//!
//! The server sends single, unfragmented, unmasked frames with the FIN bit
//! set and the shortest length encoding. Client frames are masked; the
//! decoder unmasks them and consumes exactly one frame per successful call,
//! leaving any trailing bytes for the next one.

use bytes::{Buf, BytesMut};

/// Empty, unmasked pong frame.
pub const PONG_FRAME: [u8; 2] = [0x8A, 0x00];
/// Empty, unmasked close frame.
pub const CLOSE_FRAME: [u8; 2] = [0x88, 0x00];

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(op) => op,
        }
    }
}

impl From<u8> for OpCode {
    fn from(op: u8) -> Self {
        match op & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared payload length {declared} exceeds the limit of {limit} bytes")]
    TooLarge { declared: u64, limit: usize },
}

/// Header fields needed before the payload can be read.
#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: u64,
    header_len: usize,
}

fn parse_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < 2 {
        return None;
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode = OpCode::from(buf[0]);
    let masked = buf[1] & MASK_BIT != 0;

    let (payload_len, mut offset) = match buf[1] & 0x7F {
        LEN_16 => {
            let bytes: [u8; 2] = buf.get(2..4)?.try_into().ok()?;
            (u16::from_be_bytes(bytes) as u64, 4)
        }
        LEN_64 => {
            let bytes: [u8; 8] = buf.get(2..10)?.try_into().ok()?;
            (u64::from_be_bytes(bytes), 10)
        }
        len => (len as u64, 2),
    };

    let mask = if masked {
        let key: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
        offset += 4;
        Some(key)
    } else {
        None
    };

    Some(Header {
        fin,
        opcode,
        mask,
        payload_len,
        header_len: offset,
    })
}

/// Decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, or `None` when
/// `buf` does not yet hold a complete frame.
pub fn decode_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    let header = parse_header(buf)?;
    let payload_len = usize::try_from(header.payload_len).ok()?;
    let total = header.header_len.checked_add(payload_len)?;
    if buf.len() < total {
        return None;
    }

    let mut payload = buf[header.header_len..total].to_vec();
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    Some((
        Frame {
            fin: header.fin,
            opcode: header.opcode,
            payload,
        },
        total,
    ))
}

fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn write_header(out: &mut Vec<u8>, opcode: OpCode, len: usize, masked: bool) {
    out.push(FIN_BIT | opcode.as_u8());
    let mask_bit = if masked { MASK_BIT } else { 0 };
    if len < LEN_16 as usize {
        out.push(mask_bit | len as u8);
    } else if len < 65536 {
        out.push(mask_bit | LEN_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Encode a single unmasked frame with FIN set.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    write_header(&mut out, opcode, payload.len(), false);
    out.extend_from_slice(payload);
    out
}

pub fn encode_text(payload: &str) -> Vec<u8> {
    encode_frame(OpCode::Text, payload.as_bytes())
}

/// Encode a masked frame, as a client sends it.
pub fn encode_masked_frame(opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    write_header(&mut out, opcode, payload.len(), true);
    out.extend_from_slice(&mask);
    let start = out.len();
    out.extend_from_slice(payload);
    apply_mask(&mut out[start..], mask);
    out
}

/// Accumulates socket reads and yields complete frames in arrival order.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_payload,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The next complete frame, if one is buffered.
    ///
    /// A frame whose declared length exceeds the limit is rejected as soon
    /// as its header arrives, without waiting for the payload.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if let Some(header) = parse_header(&self.buffer) {
            if header.payload_len > self.max_payload as u64 {
                return Err(FrameError::TooLarge {
                    declared: header.payload_len,
                    limit: self.max_payload,
                });
            }
        }

        match decode_frame(&self.buffer) {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_across_length_boundaries() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload = "x".repeat(len);
            let encoded = encode_text(&payload);
            let (frame, consumed) = decode_frame(&encoded).expect("complete frame");

            assert_eq!(consumed, encoded.len(), "length {}", len);
            assert_eq!(frame.opcode, OpCode::Text);
            assert!(frame.fin);
            assert_eq!(frame.text().unwrap(), payload);
        }
    }

    #[test]
    fn test_minimal_length_encoding() {
        assert_eq!(encode_text(&"a".repeat(125))[..2], [0x81, 125]);
        assert_eq!(encode_text(&"a".repeat(126))[..4], [0x81, 126, 0x00, 126]);
        assert_eq!(encode_text(&"a".repeat(65535))[..4], [0x81, 126, 0xFF, 0xFF]);
        assert_eq!(
            encode_text(&"a".repeat(65536))[..10],
            [0x81, 127, 0, 0, 0, 0, 0, 1, 0, 0]
        );
    }

    #[test]
    fn test_masked_client_frame() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        // RFC 6455 section 5.7: masked "Hello".
        let frame = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.text().unwrap(), "Hello");

        assert_eq!(encode_masked_frame(OpCode::Text, b"Hello", mask), frame);
    }

    #[test]
    fn test_masked_extended_lengths() {
        let mask = [1, 2, 3, 4];
        for len in [200usize, 70000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode_masked_frame(OpCode::Binary, &payload, mask);
            let (frame, consumed) = decode_frame(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(frame.opcode, OpCode::Binary);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_incomplete_frames_need_more_data() {
        let encoded = encode_masked_frame(OpCode::Text, &[b'z'; 300], [9, 8, 7, 6]);
        for cut in [0, 1, 2, 3, 4, 7, encoded.len() - 1] {
            assert!(decode_frame(&encoded[..cut]).is_none(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_split_delivery_yields_exactly_one_message() {
        let encoded = encode_masked_frame(OpCode::Text, br#"{"jsonrpc":"2.0"}"#, [5, 6, 7, 8]);
        let (first, second) = encoded.split_at(encoded.len() / 2);

        let mut decoder = FrameDecoder::new(1024);
        decoder.extend(first);
        assert_eq!(decoder.next_frame().unwrap(), None);

        decoder.extend(second);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.text().unwrap(), r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_back_to_back_frames_consumed_one_at_a_time() {
        let mut bytes = encode_masked_frame(OpCode::Text, b"one", [1, 1, 1, 1]);
        bytes.extend(encode_masked_frame(OpCode::Ping, b"", [2, 2, 2, 2]));
        bytes.extend(encode_masked_frame(OpCode::Text, b"two", [3, 3, 3, 3]));
        let tail = encode_masked_frame(OpCode::Close, b"", [4, 4, 4, 4]);
        bytes.extend(&tail[..3]);

        let mut decoder = FrameDecoder::new(1024);
        decoder.extend(&bytes);

        let opcodes: Vec<_> = std::iter::from_fn(|| decoder.next_frame().unwrap())
            .map(|f| f.opcode)
            .collect();
        assert_eq!(opcodes, [OpCode::Text, OpCode::Ping, OpCode::Text]);
        assert_eq!(decoder.buffered(), 3);
    }

    #[test]
    fn test_oversized_declaration_rejected_early() {
        let mut decoder = FrameDecoder::new(1024);
        // Header alone: masked text frame declaring 1 MiB.
        let mut header = vec![0x81, 0x80 | 127];
        header.extend_from_slice(&(1u64 << 20).to_be_bytes());
        header.extend_from_slice(&[0, 0, 0, 0]);
        decoder.extend(&header);

        assert_eq!(
            decoder.next_frame(),
            Err(FrameError::TooLarge {
                declared: 1 << 20,
                limit: 1024
            })
        );
    }

    #[test]
    fn test_control_frames() {
        let (pong, _) = decode_frame(&PONG_FRAME).unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert!(pong.payload.is_empty());
        assert_eq!(encode_frame(OpCode::Close, &[]), CLOSE_FRAME);
    }
}
