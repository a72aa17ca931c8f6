//! Pure WebSocket frame codec: the RFC6455 subset this client speaks.
//!
//! Single-frame messages only — no fragmentation, no extensions, and no
//! 8-byte extended lengths, so a frame header is at most 2 bytes of fixed
//! header, 2 bytes of extended length, and the 4-byte mask key. Everything
//! here is pure byte manipulation; the I/O half lives in [`crate::ws`].

const FIN: u8 = 0x80;
const MASKED: u8 = 0x80;

/// Length-indicator value announcing a 2-byte big-endian extended length.
const LEN_EXT16: u8 = 126;
/// Length-indicator value announcing an 8-byte extended length (rejected).
const LEN_EXT64: u8 = 127;

/// Largest payload this codec will encode or accept: what fits in the
/// 2-byte extended length field.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Worst-case encoded header: fixed header + extended length + mask key.
pub const MAX_HEADER_LEN: usize = 8;

/// Errors from the pure codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the 16-bit extended length field.
    #[error("payload of {0} bytes exceeds the 16-bit frame length limit")]
    PayloadTooLong(usize),
}

/// Frame purpose tag. Unknown opcodes (including fragmentation
/// continuations) are rejected by [`Opcode::from_bits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Wire value of this opcode.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Parse an opcode from the low bits of the first header byte.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
}

/// Decoded length indicator from the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// Literal payload length, `0..=125`.
    Immediate(usize),
    /// A 2-byte big-endian extended length follows.
    Extended16,
    /// An 8-byte extended length follows — unsupported by this client.
    Unsupported64,
}

/// The two fixed header bytes, split into their fields.
#[derive(Debug, Clone, Copy)]
pub struct RawHeader {
    /// Low 7 bits of byte 0; feed to [`Opcode::from_bits`].
    pub opcode_bits: u8,
    /// Whether a 4-byte mask key follows the length field.
    pub masked: bool,
    pub length: LengthField,
}

/// Split the two fixed header bytes.
#[must_use]
pub fn parse_initial(bytes: [u8; 2]) -> RawHeader {
    RawHeader {
        opcode_bits: bytes[0] & 0x7F,
        masked: bytes[1] & MASKED != 0,
        length: match bytes[1] & 0x7F {
            LEN_EXT16 => LengthField::Extended16,
            LEN_EXT64 => LengthField::Unsupported64,
            n => LengthField::Immediate(n as usize),
        },
    }
}

/// Encode the header of a single unfragmented, masked frame.
///
/// Returns the header bytes and their count. Nothing is produced for a
/// payload that cannot be represented, so callers can reject before
/// writing anything to the wire.
///
/// # Errors
///
/// [`FrameError::PayloadTooLong`] for payloads over [`MAX_PAYLOAD_LEN`].
pub fn encode_header(
    opcode: Opcode,
    payload_len: usize,
    mask: [u8; 4],
) -> Result<([u8; MAX_HEADER_LEN], usize), FrameError> {
    let Ok(short_len) = u16::try_from(payload_len) else {
        return Err(FrameError::PayloadTooLong(payload_len));
    };

    let mut header = [0u8; MAX_HEADER_LEN];
    header[0] = FIN | opcode.bits();

    let mut len = 2;
    if short_len < u16::from(LEN_EXT16) {
        header[1] = MASKED | short_len as u8;
    } else {
        header[1] = MASKED | LEN_EXT16;
        header[2..4].copy_from_slice(&short_len.to_be_bytes());
        len = 4;
    }

    header[len..len + 4].copy_from_slice(&mask);
    len += 4;

    Ok((header, len))
}

/// XOR `data` with the mask key, starting `offset` bytes into the payload.
///
/// The offset parameter lets callers mask a payload in chunks without
/// holding a second full-size buffer.
pub fn apply_mask(mask: [u8; 4], offset: usize, data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[(offset + i) % 4];
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
