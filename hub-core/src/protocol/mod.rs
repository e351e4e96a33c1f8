//! Device Link wire format.
//!
//! Outgoing frames are `$` + three-digit payload length + sequence digit +
//! token + `1` + payload + `.` + CR. Replies use the same header with the
//! status digit in place of the `1` marker and are accumulated byte by byte
//! until the `.` terminator arrives.

use core::fmt;

use heapless::{String, Vec};

pub mod command;
pub mod reply;

pub use command::{Lights, Payload};
pub use reply::{ButtonPoll, Diagnostics, FoodMachineState};

/// Largest payload that fits a single Device Link packet.
pub const MAX_PAYLOAD_LEN: usize = 999;

/// Bytes added around the payload: start, length, sequence, token, marker, terminator, CR.
pub const FRAME_OVERHEAD: usize = 9;

/// Payload capacity stored per queued command. Every token's payload fits.
pub const COMMAND_PAYLOAD_CAPACITY: usize = 16;

/// Largest frame produced for a queued command.
pub const MAX_COMMAND_FRAME_LEN: usize = COMMAND_PAYLOAD_CAPACITY + FRAME_OVERHEAD;

/// Size of the inbound reply buffer, including the appended CR.
pub const MAX_REPLY_LEN: usize = 64;

/// Header bytes (`$`, length, sequence, token, status) present in every reply.
pub const MIN_REPLY_LEN: usize = 7;

/// Number of distinct sequence digits emitted before wrapping.
pub const SEQUENCE_MODULUS: u8 = 9;

const START: u8 = b'$';
const READY: u8 = b'1';
const TERMINATOR: u8 = b'.';
const CARRIAGE_RETURN: u8 = b'\r';

/// Command vocabulary understood by the Device Link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Token {
    /// `M`: two-tone lights with slew.
    SetLights,
    /// `I`: RGB lights with slew.
    SetLightsRgb,
    /// `L`: two-tone lights flashing.
    FlashLights,
    /// `H`: RGB lights flashing.
    FlashLightsRgb,
    /// `P`: play an audio sample.
    PlayAudio,
    /// `Q`: play a tone.
    PlayTone,
    /// `T`: present the tray.
    PresentTray,
    /// `X`: retract the tray.
    RetractTray,
    /// `B`: touchpad flags plus baselines and readings.
    PollButtons,
    /// `G`: touchpad flags only.
    PollButtonSummary,
    /// `Z`: diagnostics snapshot.
    PollDiagnostics,
    /// `K`: reset the Device Link board.
    ResetBoard,
    /// `N`: write a configuration value.
    SetConfig,
    /// `U`: read a configuration value.
    GetConfig,
    /// `F`: reset the food machine.
    ResetFoodMachine,
}

impl Token {
    /// Wire character for the token.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Token::SetLights => b'M',
            Token::SetLightsRgb => b'I',
            Token::FlashLights => b'L',
            Token::FlashLightsRgb => b'H',
            Token::PlayAudio => b'P',
            Token::PlayTone => b'Q',
            Token::PresentTray => b'T',
            Token::RetractTray => b'X',
            Token::PollButtons => b'B',
            Token::PollButtonSummary => b'G',
            Token::PollDiagnostics => b'Z',
            Token::ResetBoard => b'K',
            Token::SetConfig => b'N',
            Token::GetConfig => b'U',
            Token::ResetFoodMachine => b'F',
        }
    }

    /// Parses a wire character.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'M' => Token::SetLights,
            b'I' => Token::SetLightsRgb,
            b'L' => Token::FlashLights,
            b'H' => Token::FlashLightsRgb,
            b'P' => Token::PlayAudio,
            b'Q' => Token::PlayTone,
            b'T' => Token::PresentTray,
            b'X' => Token::RetractTray,
            b'B' => Token::PollButtons,
            b'G' => Token::PollButtonSummary,
            b'Z' => Token::PollDiagnostics,
            b'K' => Token::ResetBoard,
            b'N' => Token::SetConfig,
            b'U' => Token::GetConfig,
            b'F' => Token::ResetFoodMachine,
            _ => return None,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(self.to_byte()))
    }
}

/// Failures raised while building an outgoing frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload exceeds [`MAX_PAYLOAD_LEN`].
    PayloadTooLarge,
    /// Output buffer or payload storage cannot hold the frame.
    BufferTooSmall,
    /// A numeric field does not fit its fixed-width wire slot.
    FieldOutOfRange,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failures raised while accumulating or decoding a reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// First byte is not the `$` start marker.
    BadStart,
    /// Fewer bytes than the fixed reply header.
    TooShort,
    /// Payload does not carry the fields its token requires.
    BadArgCount,
    /// Reply overflowed the inbound buffer before its terminator arrived.
    TooLong,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Cyclic packet sequence counter (`0..SEQUENCE_MODULUS`).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the next sequence number and advances the counter.
    pub fn advance(&mut self) -> u8 {
        let current = self.next;
        self.next = (self.next + 1) % SEQUENCE_MODULUS;
        current
    }
}

/// Encodes a frame into `out`, returning the number of bytes written.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] when the payload exceeds the
/// single-packet limit and [`FrameError::BufferTooSmall`] when `out` is short.
pub fn encode(
    token: Token,
    sequence: u8,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, FrameError> {
    let len = payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge);
    }
    let total = len + FRAME_OVERHEAD;
    if out.len() < total {
        return Err(FrameError::BufferTooSmall);
    }

    out[0] = START;
    write_digits(&mut out[1..4], len);
    out[4] = b'0' + sequence % 10;
    out[5] = token.to_byte();
    out[6] = READY;
    out[7..7 + len].copy_from_slice(payload);
    out[7 + len] = TERMINATOR;
    out[8 + len] = CARRIAGE_RETURN;

    Ok(total)
}

fn write_digits(slot: &mut [u8], mut value: usize) {
    for byte in slot.iter_mut().rev() {
        // `value % 10` is always < 10.
        #[allow(clippy::cast_possible_truncation)]
        let digit = (value % 10) as u8;
        *byte = b'0' + digit;
        value /= 10;
    }
}

/// A queued request: token, formatted payload, and the sequence digit it was
/// assigned when created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
    token: Token,
    sequence: u8,
    payload: Payload,
}

impl Command {
    /// Creates a command with an already formatted payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] past the wire limit and
    /// [`FrameError::BufferTooSmall`] when the payload exceeds per-command storage.
    pub fn new(token: Token, sequence: u8, payload: &str) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge);
        }
        let payload = String::try_from(payload).map_err(|_| FrameError::BufferTooSmall)?;
        Ok(Self {
            token,
            sequence,
            payload,
        })
    }

    /// Operation token.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Sequence digit assigned at creation.
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Formatted payload text.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Encodes this command into `out`.
    ///
    /// # Errors
    ///
    /// Propagates [`encode`] failures.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        encode(self.token, self.sequence, self.payload.as_bytes(), out)
    }
}

/// Device-reported outcome carried in the status digit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplyStatus {
    Ok,
    Failed,
}

/// Decoded reply frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    token: u8,
    status: ReplyStatus,
    declared_len: Option<u16>,
    payload: Vec<u8, MAX_REPLY_LEN>,
}

impl Reply {
    /// Token if it belongs to the known vocabulary.
    #[must_use]
    pub const fn token(&self) -> Option<Token> {
        Token::from_byte(self.token)
    }

    /// Raw token byte as received.
    #[must_use]
    pub const fn token_byte(&self) -> u8 {
        self.token
    }

    #[must_use]
    pub const fn status(&self) -> ReplyStatus {
        self.status
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, ReplyStatus::Ok)
    }

    /// Payload length announced in the header, when it parses as digits.
    #[must_use]
    pub const fn declared_len(&self) -> Option<u16> {
        self.declared_len
    }

    /// Payload bytes between the header and the terminator.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Decodes a complete reply frame.
///
/// A trailing CR and the `.` terminator are stripped when present; the payload
/// is everything after the seven header bytes.
///
/// # Errors
///
/// [`DecodeError::BadStart`] when the frame does not begin with `$`,
/// [`DecodeError::TooShort`] when the header is incomplete and
/// [`DecodeError::TooLong`] when the payload cannot be stored.
pub fn decode(frame: &[u8]) -> Result<Reply, DecodeError> {
    let mut body = frame;
    if let Some((&CARRIAGE_RETURN, rest)) = body.split_last() {
        body = rest;
    }
    if let Some((&TERMINATOR, rest)) = body.split_last() {
        body = rest;
    }

    if body.len() < MIN_REPLY_LEN {
        return Err(DecodeError::TooShort);
    }
    if body[0] != START {
        return Err(DecodeError::BadStart);
    }

    let status = if body[6] == READY {
        ReplyStatus::Ok
    } else {
        ReplyStatus::Failed
    };
    let payload = Vec::from_slice(&body[MIN_REPLY_LEN..]).map_err(|_| DecodeError::TooLong)?;

    Ok(Reply {
        token: body[5],
        status,
        declared_len: parse_declared_len(&body[1..4]),
        payload,
    })
}

fn parse_declared_len(digits: &[u8]) -> Option<u16> {
    digits.iter().try_fold(0u16, |acc, byte| {
        byte.is_ascii_digit()
            .then(|| acc * 10 + u16::from(byte - b'0'))
    })
}

/// Collects inbound bytes until a reply terminator arrives.
#[derive(Clone, Debug, Default)]
pub struct ReplyAccumulator {
    buffer: Vec<u8, MAX_REPLY_LEN>,
}

impl ReplyAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends one byte. Returns `Ok(true)` once the terminator has been seen.
    ///
    /// # Errors
    ///
    /// [`DecodeError::TooLong`] when the buffer is exhausted; the partial
    /// frame is discarded.
    pub fn push(&mut self, byte: u8) -> Result<bool, DecodeError> {
        if self.buffer.len() >= MAX_REPLY_LEN - 1 {
            self.buffer.clear();
            return Err(DecodeError::TooLong);
        }
        // Capacity was checked above.
        let _ = self.buffer.push(byte);
        Ok(byte == TERMINATOR)
    }

    /// Takes the completed frame with a CR appended and leaves the buffer empty.
    pub fn take_frame(&mut self) -> Vec<u8, MAX_REPLY_LEN> {
        let mut frame = core::mem::take(&mut self.buffer);
        // At most `MAX_REPLY_LEN - 1` bytes were accepted by `push`.
        let _ = frame.push(CARRIAGE_RETURN);
        frame
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
