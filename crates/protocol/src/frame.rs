//! Binary frame codec for the binary channel.
//!
//! Fixed 25-byte header followed by the payload:
//!
//! ```text
//! offset  size  field
//!      0     1  magic (0xA7)
//!      1     1  reserved (0x00)
//!      2     1  flags (bit0 compressed, bit1 chunked, bit2 final-chunk)
//!      3    16  correlation id (request id UTF-8, truncated/zero-padded)
//!     19     2  payload type (0x00, kind code)
//!     21     4  payload length (big-endian u32)
//! ```
//!
//! Encoding is a single buffer write; decoding validates magic, reserved
//! byte, kind code, and the length field against the buffer.

use bytes::{BufMut, Bytes, BytesMut};

use ad_domain::error::AgentError;

pub const FRAME_MAGIC: u8 = 0xA7;
pub const FRAME_HEADER_LEN: usize = 25;

/// Flag bits in the header's third byte.
pub mod flags {
    pub const COMPRESSED: u8 = 0b0000_0001;
    pub const CHUNKED: u8 = 0b0000_0010;
    pub const FINAL_CHUNK: u8 = 0b0000_0100;
}

/// Payload kind codes. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    ScreenshotPng,
    ScreenshotJpeg,
    VideoH264,
    FileData,
    HierarchyXml,
}

impl PayloadKind {
    pub fn code(self) -> u8 {
        match self {
            Self::ScreenshotPng => 0x01,
            Self::ScreenshotJpeg => 0x02,
            Self::VideoH264 => 0x03,
            Self::FileData => 0x04,
            Self::HierarchyXml => 0x05,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ScreenshotPng),
            0x02 => Some(Self::ScreenshotJpeg),
            0x03 => Some(Self::VideoH264),
            0x04 => Some(Self::FileData),
            0x05 => Some(Self::HierarchyXml),
            _ => None,
        }
    }
}

/// The first 16 UTF-8 bytes of a request id, zero-padded.
///
/// Lossy for ids shorter than 16 bytes and non-reversible in general; it is
/// a link back to the originating request, not an identifier in itself.
pub fn correlation_id_of(request_id: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = request_id.as_bytes();
    let n = bytes.len().min(16);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub flags: u8,
    pub correlation_id: [u8; 16],
    pub kind: PayloadKind,
    pub payload: Bytes,
}

impl BinaryFrame {
    /// A single unchunked, uncompressed frame for the given request id.
    pub fn new(request_id: &str, kind: PayloadKind, payload: impl Into<Bytes>) -> Self {
        Self {
            flags: flags::FINAL_CHUNK,
            correlation_id: correlation_id_of(request_id),
            kind,
            payload: payload.into(),
        }
    }

    pub fn compressed(&self) -> bool {
        self.flags & flags::COMPRESSED != 0
    }

    pub fn chunked(&self) -> bool {
        self.flags & flags::CHUNKED != 0
    }

    pub fn final_chunk(&self) -> bool {
        self.flags & flags::FINAL_CHUNK != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(FRAME_MAGIC);
        buf.put_u8(0x00);
        buf.put_u8(self.flags);
        buf.put_slice(&self.correlation_id);
        buf.put_u8(0x00);
        buf.put_u8(self.kind.code());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AgentError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(AgentError::transport_protocol(format!(
                "frame too short: {} bytes, header is {FRAME_HEADER_LEN}",
                buf.len()
            )));
        }
        if buf[0] != FRAME_MAGIC {
            return Err(AgentError::transport_protocol(format!(
                "bad magic byte 0x{:02X}",
                buf[0]
            )));
        }
        if buf[1] != 0x00 || buf[19] != 0x00 {
            return Err(AgentError::transport_protocol(
                "reserved header bytes must be zero",
            ));
        }
        let kind = PayloadKind::from_code(buf[20]).ok_or_else(|| {
            AgentError::transport_protocol(format!("unknown payload kind 0x{:02X}", buf[20]))
        })?;
        let length = u32::from_be_bytes([buf[21], buf[22], buf[23], buf[24]]) as usize;
        if buf.len() - FRAME_HEADER_LEN != length {
            return Err(AgentError::transport_protocol(format!(
                "length field {length} does not match {} payload bytes",
                buf.len() - FRAME_HEADER_LEN
            )));
        }
        let mut correlation_id = [0u8; 16];
        correlation_id.copy_from_slice(&buf[3..19]);
        Ok(Self {
            flags: buf[2],
            correlation_id,
            kind,
            payload: Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_the_reference_bytes() {
        let frame = BinaryFrame::new(
            "abcdefghijklmnop",
            PayloadKind::ScreenshotPng,
            vec![1u8, 2, 3, 4, 5, 6, 7, 8],
        );
        let bytes = frame.encode();
        let expected_header: &[u8] = &[
            0xA7, 0x00, 0x04, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A,
            0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x00, 0x01, 0x00, 0x00, 0x00, 0x08,
        ];
        assert_eq!(&bytes[..FRAME_HEADER_LEN], expected_header);
        assert_eq!(&bytes[FRAME_HEADER_LEN..], &[1, 2, 3, 4, 5, 6, 7, 8][..]);
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut frame = BinaryFrame::new("R1", PayloadKind::FileData, vec![9u8; 100]);
        frame.flags = flags::COMPRESSED | flags::CHUNKED;
        let back = BinaryFrame::decode(&frame.encode()).unwrap();
        assert_eq!(back, frame);
        assert!(back.compressed());
        assert!(back.chunked());
        assert!(!back.final_chunk());
    }

    #[test]
    fn zero_length_payload_is_valid() {
        let frame = BinaryFrame::new("R2", PayloadKind::HierarchyXml, Vec::new());
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);
        let back = BinaryFrame::decode(&bytes).unwrap();
        assert!(back.payload.is_empty());
    }

    #[test]
    fn correlation_id_truncates_and_pads() {
        // Short id: zero-padded.
        let id = correlation_id_of("R1");
        assert_eq!(&id[..2], b"R1");
        assert!(id[2..].iter().all(|b| *b == 0));
        // Long id: truncated at 16 bytes.
        let id = correlation_id_of("0123456789abcdefEXTRA");
        assert_eq!(&id, b"0123456789abcdef");
    }

    #[test]
    fn decode_rejects_malformed_headers() {
        let good = BinaryFrame::new("R3", PayloadKind::ScreenshotPng, vec![0u8; 4]).encode();

        let short = &good[..10];
        assert_eq!(BinaryFrame::decode(short).unwrap_err().code, 1004);

        let mut bad_magic = good.to_vec();
        bad_magic[0] = 0x00;
        assert_eq!(BinaryFrame::decode(&bad_magic).unwrap_err().code, 1004);

        let mut bad_reserved = good.to_vec();
        bad_reserved[1] = 0xFF;
        assert_eq!(BinaryFrame::decode(&bad_reserved).unwrap_err().code, 1004);

        let mut bad_kind = good.to_vec();
        bad_kind[20] = 0x7F;
        assert_eq!(BinaryFrame::decode(&bad_kind).unwrap_err().code, 1004);

        let mut bad_length = good.to_vec();
        bad_length[24] = 0xFF;
        assert_eq!(BinaryFrame::decode(&bad_length).unwrap_err().code, 1004);
    }
}
