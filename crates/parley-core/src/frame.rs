//! Frame I/O — reading and writing wire frames on a byte stream.
//!
//! A frame is one [`FrameHeader`] followed by exactly `payload_len` bytes.
//! Reading loops until both parts are complete; a short read is fatal for the
//! connection. Writing emits header then payload and loops partial writes to
//! completion.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes};

use crate::wire::{
    decode_name, encode_name, FrameHeader, MsgType, HEADER_LEN, MAX_PAYLOAD, NAME_LEN,
    PROTOCOL_VERSION,
};

/// A decoded wire frame.
///
/// `msg_type` is kept as the raw code so frames with reserved types survive a
/// decode/encode round trip and can be skipped without being dropped on the
/// floor by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u32,
    pub message_id: u32,
    pub timestamp: u64,
    pub sender: String,
    pub topic: String,
    pub payload: Bytes,
}

impl Frame {
    /// A frame of the given type, stamped with the current time. Sender,
    /// topic, id, and payload start empty.
    pub fn new(kind: MsgType) -> Self {
        Self {
            msg_type: kind as u32,
            message_id: 0,
            timestamp: unix_now(),
            sender: String::new(),
            topic: String::new(),
            payload: Bytes::new(),
        }
    }

    /// The typed message kind, if the code is a known one.
    pub fn kind(&self) -> Option<MsgType> {
        MsgType::from_code(self.msg_type)
    }

    /// Payload interpreted as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialize header + payload into a single buffer.
    pub fn encode(&self) -> Vec<u8> {
        let header = FrameHeader {
            msg_type: U32::new(self.msg_type),
            payload_len: U32::new(self.payload.len() as u32),
            message_id: U32::new(self.message_id),
            timestamp: U64::new(self.timestamp),
            version: PROTOCOL_VERSION,
            flags: 0,
            sender: encode_name(&self.sender),
            topic: encode_name(&self.topic),
            checksum: U32::new(0),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Read one complete frame from the stream.
    ///
    /// Returns [`FrameError::Closed`] on EOF at a frame boundary or mid-frame;
    /// either way the connection is done.
    pub async fn read_from<R>(reader: &mut R) -> Result<Frame, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; HEADER_LEN];
        read_exact_or_closed(reader, &mut head).await?;

        let header = FrameHeader::read_from(&head[..]).ok_or(FrameError::Closed)?;
        let payload_len = header.payload_len.get() as usize;
        if payload_len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload_len));
        }

        let payload = if payload_len > 0 {
            let mut buf = vec![0u8; payload_len];
            read_exact_or_closed(reader, &mut buf).await?;
            Bytes::from(buf)
        } else {
            Bytes::new()
        };

        let sender: [u8; NAME_LEN] = header.sender;
        let topic: [u8; NAME_LEN] = header.topic;

        Ok(Frame {
            msg_type: header.msg_type.get(),
            message_id: header.message_id.get(),
            timestamp: header.timestamp.get(),
            sender: decode_name(&sender),
            topic: decode_name(&topic),
            payload,
        })
    }

    /// Write this frame to the stream, looping partial writes to completion.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Closed),
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── File Announcements ───────────────────────────────────────────────────────

/// The payload of a PUBLISH_FILE frame: filename and declared size.
///
/// Wire encoding: `[u32 filename length][filename bytes][u32 file size]`,
/// integers little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub filename: String,
    pub size: u32,
}

impl FileMeta {
    pub fn encode(&self) -> Bytes {
        let name = self.filename.as_bytes();
        let mut buf = Vec::with_capacity(8 + name.len());
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&self.size.to_le_bytes());
        Bytes::from(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < 8 {
            return Err(FrameError::BadFileMeta);
        }
        let name_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let size_at = 4usize.checked_add(name_len).ok_or(FrameError::BadFileMeta)?;
        if payload.len() < size_at + 4 {
            return Err(FrameError::BadFileMeta);
        }
        let filename = String::from_utf8_lossy(&payload[4..size_at]).into_owned();
        let size = u32::from_le_bytes([
            payload[size_at],
            payload[size_at + 1],
            payload[size_at + 2],
            payload[size_at + 3],
        ]);
        Ok(FileMeta { filename, size })
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors from frame I/O. Anything but `BadFileMeta` ends the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,

    #[error("payload length {0} exceeds maximum {MAX_PAYLOAD}")]
    PayloadTooLarge(usize),

    #[error("malformed file announcement payload")]
    BadFileMeta,

    #[error(transparent)]
    Io(#[from] io::Error),
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            msg_type: MsgType::PublishText as u32,
            message_id: 42,
            timestamp: 1_700_000_000,
            sender: "alice".into(),
            topic: "dm_alice_bob".into(),
            payload: Bytes::from_static(b"hi"),
        }
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let original = sample_frame();
        let bytes = original.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 2);

        let mut cursor = io::Cursor::new(bytes);
        let recovered = Frame::read_from(&mut cursor).await.unwrap();
        assert_eq!(recovered, original);
    }

    #[tokio::test]
    async fn empty_payload_round_trip() {
        let mut original = Frame::new(MsgType::Login);
        original.sender = "alice".into();

        let mut cursor = io::Cursor::new(original.encode());
        let recovered = Frame::read_from(&mut cursor).await.unwrap();
        assert_eq!(recovered.payload.len(), 0);
        assert_eq!(recovered.sender, "alice");
        assert_eq!(recovered.kind(), Some(MsgType::Login));
    }

    #[tokio::test]
    async fn reserved_msg_type_survives_round_trip() {
        let mut original = sample_frame();
        original.msg_type = 33; // reserved
        let mut cursor = io::Cursor::new(original.encode());
        let recovered = Frame::read_from(&mut cursor).await.unwrap();
        assert_eq!(recovered.msg_type, 33);
        assert_eq!(recovered.kind(), None);
    }

    #[tokio::test]
    async fn short_header_is_closed() {
        let mut cursor = io::Cursor::new(vec![0u8; HEADER_LEN - 1]);
        let err = Frame::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn truncated_payload_is_closed() {
        let mut frame = sample_frame();
        frame.payload = Bytes::from_static(b"hello world");
        let mut bytes = frame.encode();
        bytes.truncate(HEADER_LEN + 3);

        let mut cursor = io::Cursor::new(bytes);
        let err = Frame::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn oversized_payload_length_is_rejected() {
        let mut frame = sample_frame();
        frame.payload = Bytes::new();
        let mut bytes = frame.encode();
        // Forge payload_len (bytes 4..8) past the cap without a body.
        bytes[4..8].copy_from_slice(&((MAX_PAYLOAD as u32) + 1).to_le_bytes());

        let mut cursor = io::Cursor::new(bytes);
        let err = Frame::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn two_frames_back_to_back() {
        let a = sample_frame();
        let mut b = sample_frame();
        b.payload = Bytes::from_static(b"second");

        let mut bytes = a.encode();
        bytes.extend_from_slice(&b.encode());

        let mut cursor = io::Cursor::new(bytes);
        assert_eq!(Frame::read_from(&mut cursor).await.unwrap(), a);
        assert_eq!(Frame::read_from(&mut cursor).await.unwrap(), b);
        assert!(matches!(
            Frame::read_from(&mut cursor).await.unwrap_err(),
            FrameError::Closed
        ));
    }

    #[test]
    fn file_meta_round_trip() {
        let meta = FileMeta {
            filename: "notes.txt".into(),
            size: 10,
        };
        let decoded = FileMeta::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn file_meta_layout_matches_wire() {
        let meta = FileMeta {
            filename: "a".into(),
            size: 7,
        };
        let bytes = meta.encode();
        assert_eq!(&bytes[..4], &1u32.to_le_bytes());
        assert_eq!(bytes[4], b'a');
        assert_eq!(&bytes[5..9], &7u32.to_le_bytes());
    }

    #[test]
    fn file_meta_rejects_truncated_payloads() {
        assert!(FileMeta::decode(&[]).is_err());
        assert!(FileMeta::decode(&[1, 0, 0, 0]).is_err());
        // Declared name length exceeds the buffer.
        assert!(FileMeta::decode(&[200, 0, 0, 0, b'x', 0, 0, 0, 0]).is_err());
    }
}
