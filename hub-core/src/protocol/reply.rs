//! Typed views over reply payloads.
//!
//! Each parser reads a fixed-width prefix of the payload and ignores anything
//! that follows, so a terminator or padding left in the slice is harmless.

use winnow::ascii::{digit1, space0};
use winnow::combinator::{eof, preceded, terminated};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{any, take};

use super::DecodeError;

/// Food machine state digit carried in the diagnostics reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FoodMachineState {
    LidOpen,
    MovingHome,
    Check,
    Dispensing,
    Idle,
    MovingPresent,
    Wait,
    MovingRemove,
    PlatterError,
    SingulatorError,
    OutOfFood,
    Other(u8),
}

impl FoodMachineState {
    /// Highest code of a state in which a presentation can be requested.
    pub const LAST_NORMAL_CODE: u8 = 6;

    /// Interprets the raw wire character (digit offset from `'0'`, so `'A'` is 17).
    #[must_use]
    pub const fn from_wire(byte: u8) -> Self {
        Self::from_code(byte.wrapping_sub(b'0'))
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::LidOpen,
            1 => Self::MovingHome,
            2 => Self::Check,
            3 => Self::Dispensing,
            4 => Self::Idle,
            5 => Self::MovingPresent,
            6 => Self::Wait,
            7 => Self::MovingRemove,
            8 => Self::PlatterError,
            9 => Self::SingulatorError,
            17 => Self::OutOfFood,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::LidOpen => 0,
            Self::MovingHome => 1,
            Self::Check => 2,
            Self::Dispensing => 3,
            Self::Idle => 4,
            Self::MovingPresent => 5,
            Self::Wait => 6,
            Self::MovingRemove => 7,
            Self::PlatterError => 8,
            Self::SingulatorError => 9,
            Self::OutOfFood => 17,
            Self::Other(code) => code,
        }
    }

    /// True for states that block a new presentation: lid open or any code above `Wait`.
    #[must_use]
    pub const fn blocks_presentation(self) -> bool {
        matches!(self, Self::LidOpen) || self.code() > Self::LAST_NORMAL_CODE
    }
}

/// `B` reply: per-pad touch flags plus capacitive baselines and readings.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ButtonPoll {
    pub pressed: [bool; 3],
    pub baselines: [u16; 3],
    pub readings: [u16; 3],
}

/// `Z` reply: one character per device flag.
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Diagnostics {
    pub dispense_motor: bool,
    pub present_motor: bool,
    /// Left, middle, right, cue.
    pub lights: [bool; 4],
    pub sound_playing: bool,
    pub dispense_detected: bool,
    /// Food was still in the bowl when the platter last returned.
    pub treat_in_bowl: bool,
    pub state: FoodMachineState,
    pub dome_open: bool,
}

impl Diagnostics {
    /// The previous presentation's food was eaten.
    #[must_use]
    pub const fn treat_taken(&self) -> bool {
        !self.treat_in_bowl
    }
}

fn flag(input: &mut &[u8]) -> Result<bool, ContextError> {
    any.map(|byte: u8| byte != b'0').parse_next(input)
}

/// Three-character pad value; the board right-aligns short values with spaces.
fn three_digits(input: &mut &[u8]) -> Result<u16, ContextError> {
    let value = terminated(preceded(space0, digit1), eof)
        .verify_map(|digits: &[u8]| u16::try_from(decimal(digits)?).ok());
    take(3usize).and_then(value).parse_next(input)
}

fn fixed_decimal<'a>(width: usize) -> impl Parser<&'a [u8], u32, ContextError> {
    move |input: &mut &'a [u8]| take(width).verify_map(decimal).parse_next(input)
}

fn decimal(digits: &[u8]) -> Option<u32> {
    digits.iter().try_fold(0u32, |acc, byte| {
        if byte.is_ascii_digit() {
            acc.checked_mul(10)?.checked_add(u32::from(byte - b'0'))
        } else {
            None
        }
    })
}

fn button_flags(input: &mut &[u8]) -> Result<[bool; 3], ContextError> {
    let (left, middle, right) = (flag, flag, flag).parse_next(input)?;
    Ok([left, middle, right])
}

fn pad_values(input: &mut &[u8]) -> Result<[u16; 3], ContextError> {
    let (left, middle, right) = (three_digits, three_digits, three_digits).parse_next(input)?;
    Ok([left, middle, right])
}

/// Parses a `B` payload.
///
/// # Errors
///
/// [`DecodeError::BadArgCount`] when any of the nine fields is missing or malformed.
pub fn parse_button_poll(payload: &[u8]) -> Result<ButtonPoll, DecodeError> {
    let mut input = payload;
    let (pressed, baselines, readings) = (button_flags, pad_values, pad_values)
        .parse_next(&mut input)
        .map_err(|_: ContextError| DecodeError::BadArgCount)?;
    Ok(ButtonPoll {
        pressed,
        baselines,
        readings,
    })
}

/// Parses a `G` payload.
///
/// # Errors
///
/// [`DecodeError::BadArgCount`] when fewer than three flags are present.
pub fn parse_button_summary(payload: &[u8]) -> Result<[bool; 3], DecodeError> {
    let mut input = payload;
    button_flags
        .parse_next(&mut input)
        .map_err(|_| DecodeError::BadArgCount)
}

/// Parses a `Z` payload.
///
/// # Errors
///
/// [`DecodeError::BadArgCount`] when fewer than eleven characters are present.
pub fn parse_diagnostics(payload: &[u8]) -> Result<Diagnostics, DecodeError> {
    let mut input = payload;
    let parsed = (
        flag,
        flag,
        (flag, flag, flag, flag),
        flag,
        flag,
        any,
        any,
        any,
    )
        .parse_next(&mut input)
        .map_err(|_: ContextError| DecodeError::BadArgCount)?;
    let (dispense_motor, present_motor, (left, middle, right, cue), sound, dispensed, bowl, state, cap) =
        parsed;

    Ok(Diagnostics {
        dispense_motor,
        present_motor,
        lights: [left, middle, right, cue],
        sound_playing: sound,
        dispense_detected: dispensed,
        treat_in_bowl: bowl != b'0',
        state: FoodMachineState::from_wire(state),
        dome_open: cap == b'1',
    })
}

/// Parses a `U` payload into `(id, value)`.
///
/// # Errors
///
/// [`DecodeError::BadArgCount`] unless two id digits and five value digits are present.
pub fn parse_config_value(payload: &[u8]) -> Result<(u8, u32), DecodeError> {
    let mut input = payload;
    let (id, value) = (fixed_decimal(2), fixed_decimal(5))
        .parse_next(&mut input)
        .map_err(|_| DecodeError::BadArgCount)?;
    let id = u8::try_from(id).map_err(|_| DecodeError::BadArgCount)?;
    Ok((id, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_button_poll_fields_in_order() {
        let poll = parse_button_poll(b"010200210220100150200").expect("nine fields");
        assert_eq!(poll.pressed, [false, true, false]);
        assert_eq!(poll.baselines, [200, 210, 220]);
        assert_eq!(poll.readings, [100, 150, 200]);
    }

    #[test]
    fn space_padded_pad_values_are_accepted() {
        let poll = parse_button_poll(b"100 95200200 90210220").expect("padded fields");
        assert_eq!(poll.pressed, [true, false, false]);
        assert_eq!(poll.baselines, [95, 200, 200]);
        assert_eq!(poll.readings, [90, 210, 220]);

        let poll = parse_button_poll(b"000  7200200  0210220").expect("padded fields");
        assert_eq!(poll.baselines[0], 7);
        assert_eq!(poll.readings[0], 0);
    }

    #[test]
    fn gaps_inside_a_pad_value_are_bad_arg_count() {
        assert_eq!(
            parse_button_poll(b"1009 5200200 90210220"),
            Err(DecodeError::BadArgCount)
        );
        assert_eq!(
            parse_button_poll(b"100   200200 90210220"),
            Err(DecodeError::BadArgCount)
        );
    }

    #[test]
    fn short_button_poll_is_bad_arg_count() {
        assert_eq!(
            parse_button_poll(b"010200210"),
            Err(DecodeError::BadArgCount)
        );
        assert_eq!(
            parse_button_poll(b"010200x10220100150200"),
            Err(DecodeError::BadArgCount)
        );
    }

    #[test]
    fn parses_button_summary() {
        assert_eq!(parse_button_summary(b"101"), Ok([true, false, true]));
        assert_eq!(parse_button_summary(b"1"), Err(DecodeError::BadArgCount));
    }

    #[test]
    fn parses_diagnostics_flags() {
        let diag = parse_diagnostics(b"00000000041").expect("eleven fields");
        assert!(!diag.dispense_motor);
        assert!(diag.treat_taken());
        assert_eq!(diag.state, FoodMachineState::Idle);
        assert!(diag.dome_open);

        let diag = parse_diagnostics(b"01100010160").expect("eleven fields");
        assert!(diag.present_motor);
        assert_eq!(diag.lights, [true, false, false, false]);
        assert!(diag.treat_in_bowl);
        assert_eq!(diag.state, FoodMachineState::Wait);
        assert!(!diag.dome_open);

        assert_eq!(parse_diagnostics(b"0000"), Err(DecodeError::BadArgCount));
    }

    #[test]
    fn out_of_food_uses_letter_offset() {
        let diag = parse_diagnostics(b"000000000A0").expect("eleven fields");
        assert_eq!(diag.state, FoodMachineState::OutOfFood);
        assert_eq!(diag.state.code(), 17);
        assert!(diag.state.blocks_presentation());
        assert!(FoodMachineState::LidOpen.blocks_presentation());
        assert!(!FoodMachineState::Wait.blocks_presentation());
    }

    #[test]
    fn parses_config_value() {
        assert_eq!(parse_config_value(b"2100029"), Ok((21, 29)));
        assert_eq!(parse_config_value(b"21029"), Err(DecodeError::BadArgCount));
    }
}
