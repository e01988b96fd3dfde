//! Parley wire format — on-wire types shared by broker and clients.
//!
//! These types ARE the protocol. Every field, every size, every reserved byte
//! is part of the wire format; changing anything here is a breaking change
//! for every deployed peer.
//!
//! The header is #[repr(C, packed)] for deterministic layout and uses
//! zerocopy derives for safe, allocation-free serialization. All multi-byte
//! integers are little-endian on the wire, regardless of host architecture.
//! There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// The fixed header preceding every payload on a Parley connection.
///
/// The receiver can fully describe and route a frame before reading a single
/// byte of payload.
///
/// Wire size: 90 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Message-type code. See [`MsgType`]. Values outside the known set are
    /// reserved; a receiver ignores such frames without closing.
    pub msg_type: U32<LittleEndian>,

    /// Length of the payload in bytes, not including this header.
    pub payload_len: U32<LittleEndian>,

    /// Message id, allocated by the sending client. Ties FILE_DATA chunks to
    /// the PUBLISH_FILE frame that opened the transfer.
    pub message_id: U32<LittleEndian>,

    /// Seconds since the Unix epoch at send time.
    pub timestamp: U64<LittleEndian>,

    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Bit flags. Reserved, must be zero.
    pub flags: u8,

    /// Sending username, NUL-padded. At most 31 bytes of name.
    pub sender: [u8; NAME_LEN],

    /// Topic name, NUL-padded. At most 31 bytes. For GAME frames this field
    /// carries the recipient username instead of a topic.
    pub topic: [u8; NAME_LEN],

    /// Reserved for a payload checksum. Written as zero, never validated.
    pub checksum: U32<LittleEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; HEADER_LEN]);

// ── Message Types ────────────────────────────────────────────────────────────

/// Message-type codes carried in [`FrameHeader::msg_type`].
///
/// All other values are reserved for future use; receivers must ignore them
/// without closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgType {
    /// C→S. Empty payload; the sender field carries the username to claim.
    Login = 1,
    /// C→S. Empty payload. The broker tears the session down.
    Logout = 2,
    /// C→S. Empty payload; the topic field names the topic.
    Subscribe = 3,
    /// C→S. Empty payload; the topic field names the topic.
    Unsubscribe = 4,
    /// C↔S. UTF-8 message bytes.
    PublishText = 5,
    /// C↔S. `[u32 filename length][filename bytes][u32 file size]`.
    PublishFile = 6,
    /// C↔S. Raw file bytes; message id matches the opening PUBLISH_FILE.
    FileData = 7,
    /// S→C. UTF-8 error text.
    Error = 8,
    /// S→C. UTF-8 status text.
    Ack = 9,
    /// S→C. Username bytes; the sender field is also set.
    UserOnline = 10,
    /// S→C. Username bytes.
    UserOffline = 11,
    /// S→C. Semicolon-separated usernames, excluding the recipient.
    UserList = 12,
    /// C→S. Empty payload.
    RequestUserList = 13,
    /// C→S. Empty payload; the topic field names the conversation.
    RequestHistory = 14,
    /// S→C. UTF-8 content; timestamp, sender, topic from the header.
    HistoryData = 15,
    /// S→C. Group name bytes; sender = creator.
    GroupCreated = 16,
    /// S→C. `name:0|1;…` where 1 means "recipient is a member".
    GroupList = 17,
    /// C↔S. Opaque UTF-8 payload; the topic field carries the peer username.
    Game = 50,
}

impl MsgType {
    /// Map a wire code back to its type. None for reserved codes.
    pub fn from_code(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Login),
            2 => Some(Self::Logout),
            3 => Some(Self::Subscribe),
            4 => Some(Self::Unsubscribe),
            5 => Some(Self::PublishText),
            6 => Some(Self::PublishFile),
            7 => Some(Self::FileData),
            8 => Some(Self::Error),
            9 => Some(Self::Ack),
            10 => Some(Self::UserOnline),
            11 => Some(Self::UserOffline),
            12 => Some(Self::UserList),
            13 => Some(Self::RequestUserList),
            14 => Some(Self::RequestHistory),
            15 => Some(Self::HistoryData),
            16 => Some(Self::GroupCreated),
            17 => Some(Self::GroupList),
            50 => Some(Self::Game),
            _ => None,
        }
    }

    /// The wire code for this type.
    pub fn code(self) -> u32 {
        self as u32
    }
}

// ── Name Fields ──────────────────────────────────────────────────────────────

/// Encode a username or topic into a fixed NUL-padded field.
/// Inputs longer than 31 bytes are truncated.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN - 1);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

/// Decode a NUL-padded name field back into a string.
pub fn decode_name(field: &[u8; NAME_LEN]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 90;

/// Current wire format version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the sender and topic fields, NUL terminator included.
pub const NAME_LEN: usize = 32;

/// Chunk size used when streaming a file. Receivers must not assume it.
pub const FILE_CHUNK_SIZE: usize = 8192;

/// Sanity cap on a single frame's payload. A header declaring more than this
/// is treated as malformed and closes the connection.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Default TCP port for the broker listener.
pub const DEFAULT_PORT: u16 = 8080;

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::AsBytes;

    #[test]
    fn header_round_trip() {
        let original = FrameHeader {
            msg_type: U32::new(MsgType::PublishText as u32),
            payload_len: U32::new(5),
            message_id: U32::new(0xDEAD_BEEF),
            timestamp: U64::new(1_700_000_000),
            version: PROTOCOL_VERSION,
            flags: 0,
            sender: encode_name("alice"),
            topic: encode_name("dm_alice_bob"),
            checksum: U32::new(0),
        };

        let bytes = original.as_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);

        let recovered = FrameHeader::read_from(bytes).unwrap();
        assert_eq!(recovered.msg_type.get(), MsgType::PublishText as u32);
        assert_eq!(recovered.payload_len.get(), 5);
        assert_eq!(recovered.message_id.get(), 0xDEAD_BEEF);
        assert_eq!(recovered.timestamp.get(), 1_700_000_000);
        assert_eq!(recovered.version, PROTOCOL_VERSION);
        assert_eq!(decode_name(&recovered.sender), "alice");
        assert_eq!(decode_name(&recovered.topic), "dm_alice_bob");
    }

    #[test]
    fn header_is_little_endian_on_the_wire() {
        let header = FrameHeader {
            msg_type: U32::new(0x0102_0304),
            payload_len: U32::new(0),
            message_id: U32::new(0),
            timestamp: U64::new(0),
            version: PROTOCOL_VERSION,
            flags: 0,
            sender: [0u8; NAME_LEN],
            topic: [0u8; NAME_LEN],
            checksum: U32::new(0),
        };
        assert_eq!(&header.as_bytes()[..4], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn msg_type_round_trip() {
        for code in [1u32, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 50] {
            let t = MsgType::from_code(code).unwrap();
            assert_eq!(t.code(), code);
        }
        assert!(MsgType::from_code(0).is_none());
        assert!(MsgType::from_code(18).is_none());
        assert!(MsgType::from_code(49).is_none());
        assert!(MsgType::from_code(u32::MAX).is_none());
    }

    #[test]
    fn name_fits_31_bytes() {
        let name = "a".repeat(31);
        let field = encode_name(&name);
        assert_eq!(decode_name(&field), name);
        // Last byte stays NUL.
        assert_eq!(field[NAME_LEN - 1], 0);
    }

    #[test]
    fn name_longer_than_31_bytes_is_truncated() {
        let name = "b".repeat(40);
        let field = encode_name(&name);
        assert_eq!(decode_name(&field), "b".repeat(31));
    }

    #[test]
    fn empty_name_decodes_empty() {
        let field = encode_name("");
        assert_eq!(decode_name(&field), "");
    }
}
