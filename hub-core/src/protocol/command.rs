//! Payload builders for outgoing commands.
//!
//! Two-digit level fields (colours, volumes, slew, flash timing) are clamped
//! to `0..=99`; identifiers that cannot be clamped meaningfully (audio sample,
//! config id, light mask) are rejected with [`FrameError::FieldOutOfRange`].

use core::fmt::{self, Write};
use core::ops::BitOr;

use heapless::String;

use super::{COMMAND_PAYLOAD_CAPACITY, FrameError};

/// Formatted command payload.
pub type Payload = String<COMMAND_PAYLOAD_CAPACITY>;

const LEVEL_MAX: u8 = 99;
const FIVE_DIGIT_MAX: u32 = 99_999;

/// Bit mask selecting the Hub's lights.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lights(u8);

impl Lights {
    pub const NONE: Self = Self(0);
    pub const LEFT: Self = Self(0b0001);
    pub const MIDDLE: Self = Self(0b0010);
    pub const RIGHT: Self = Self(0b0100);
    pub const CUE: Self = Self(0b1000);
    pub const BUTTONS: Self = Self(0b0111);
    pub const ALL: Self = Self(0b1111);

    /// Builds a mask, discarding bits above the cue light.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Wire letter for the mask: `A` for LEFT through `O` for ALL.
    #[must_use]
    pub const fn letter(self) -> Option<char> {
        match self.0 {
            0 => None,
            bits => Some((b'A' + bits - 1) as char),
        }
    }
}

impl BitOr for Lights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Audio samples stored on the Device Link board.
pub mod sample {
    pub const ENTICE: u8 = 1;
    pub const POSITIVE: u8 = 2;
    pub const DO: u8 = 3;
    pub const CLICK: u8 = 4;
    pub const SQUEAK: u8 = 5;
    pub const NEGATIVE: u8 = 6;
    /// Touch feedback for the left pad; middle and right follow.
    pub const LEFT_PAD: u8 = 7;
    pub const MIDDLE_PAD: u8 = 8;
    pub const RIGHT_PAD: u8 = 9;
}

/// Scales a `0..=99` level by a `0..=99` maximum amplitude.
#[must_use]
pub fn scale_amplitude(value: u8, max: u8) -> u8 {
    let scaled = u16::from(value.min(LEVEL_MAX)) * u16::from(max.min(LEVEL_MAX)) / u16::from(LEVEL_MAX);
    // Both factors are <= 99 so the quotient is <= 99.
    u8::try_from(scaled).unwrap_or(LEVEL_MAX)
}

fn level(value: u8) -> u8 {
    value.min(LEVEL_MAX)
}

fn letter(lights: Lights) -> Result<char, FrameError> {
    lights.letter().ok_or(FrameError::FieldOutOfRange)
}

fn format(args: fmt::Arguments<'_>) -> Result<Payload, FrameError> {
    let mut payload = Payload::new();
    payload
        .write_fmt(args)
        .map_err(|_| FrameError::BufferTooSmall)?;
    Ok(payload)
}

/// `M` payload: light letter, yellow, blue, slew.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] for an empty mask.
pub fn lights_slew(lights: Lights, yellow: u8, blue: u8, slew: u8) -> Result<Payload, FrameError> {
    format(format_args!(
        "{}{:02}{:02}{:02}",
        letter(lights)?,
        level(yellow),
        level(blue),
        level(slew)
    ))
}

/// `I` payload: light letter, red, green, blue, slew.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] for an empty mask.
pub fn lights_rgb_slew(
    lights: Lights,
    red: u8,
    green: u8,
    blue: u8,
    slew: u8,
) -> Result<Payload, FrameError> {
    format(format_args!(
        "{}{:02}{:02}{:02}{:02}",
        letter(lights)?,
        level(red),
        level(green),
        level(blue),
        level(slew)
    ))
}

/// `L` payload: light letter, yellow, blue, flash period, on time (hundredths of a second).
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] for an empty mask.
pub fn lights_flash(
    lights: Lights,
    yellow: u8,
    blue: u8,
    period: u8,
    on: u8,
) -> Result<Payload, FrameError> {
    format(format_args!(
        "{}{:02}{:02}{:02}{:02}",
        letter(lights)?,
        level(yellow),
        level(blue),
        level(period),
        level(on)
    ))
}

/// `H` payload: light letter, red, green, blue, flash period, on time.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] for an empty mask.
pub fn lights_rgb_flash(
    lights: Lights,
    red: u8,
    green: u8,
    blue: u8,
    period: u8,
    on: u8,
) -> Result<Payload, FrameError> {
    format(format_args!(
        "{}{:02}{:02}{:02}{:02}{:02}",
        letter(lights)?,
        level(red),
        level(green),
        level(blue),
        level(period),
        level(on)
    ))
}

/// `P` payload: single-digit sample index and volume.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] when the sample index has more than one digit.
pub fn audio(sample: u8, volume: u8) -> Result<Payload, FrameError> {
    if sample > 9 {
        return Err(FrameError::FieldOutOfRange);
    }
    format(format_args!("{}{:02}", sample, level(volume)))
}

/// `Q` payload: volume, frequency in Hz, slew in tenths of a second.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] when the frequency exceeds five digits.
pub fn tone(frequency: u32, volume: u8, slew: u8) -> Result<Payload, FrameError> {
    if frequency > FIVE_DIGIT_MAX {
        return Err(FrameError::FieldOutOfRange);
    }
    format(format_args!(
        "{:02}{:05}{}",
        level(volume),
        frequency,
        level(slew)
    ))
}

/// `T` payload: presentation time in deciseconds, `00` for indefinite.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] above 99 deciseconds.
pub fn present(deciseconds: u8) -> Result<Payload, FrameError> {
    if deciseconds > LEVEL_MAX {
        return Err(FrameError::FieldOutOfRange);
    }
    format(format_args!("{deciseconds:02}"))
}

/// Two-zero filler used by `X` and `Z`.
#[must_use]
pub fn filler() -> Payload {
    let mut payload = Payload::new();
    // Two bytes always fit.
    let _ = payload.push_str("00");
    payload
}

/// `U` payload: config id.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] for ids above 99.
pub fn config_get(id: u8) -> Result<Payload, FrameError> {
    if id > LEVEL_MAX {
        return Err(FrameError::FieldOutOfRange);
    }
    format(format_args!("{id:02}"))
}

/// `N` payload: config id and value.
///
/// # Errors
///
/// [`FrameError::FieldOutOfRange`] for ids above 99 or values above five digits.
pub fn config_set(id: u8, value: u32) -> Result<Payload, FrameError> {
    if id > LEVEL_MAX || value > FIVE_DIGIT_MAX {
        return Err(FrameError::FieldOutOfRange);
    }
    format(format_args!("{id:02}{value:05}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_letters_follow_mask() {
        assert_eq!(Lights::LEFT.letter(), Some('A'));
        assert_eq!(Lights::CUE.letter(), Some('H'));
        assert_eq!(Lights::BUTTONS.letter(), Some('G'));
        assert_eq!(Lights::ALL.letter(), Some('O'));
        assert_eq!(Lights::NONE.letter(), None);
        assert_eq!(Lights::LEFT | Lights::RIGHT, Lights::from_bits(5));
    }

    #[test]
    fn formats_light_payloads() {
        assert_eq!(
            lights_slew(Lights::LEFT, 50, 20, 0).expect("slew").as_str(),
            "A502000"
        );
        assert_eq!(
            lights_rgb_flash(Lights::CUE, 10, 0, 0, 99, 5)
                .expect("flash")
                .as_str(),
            "H1000009905"
        );
        assert_eq!(
            lights_slew(Lights::NONE, 1, 1, 1),
            Err(FrameError::FieldOutOfRange)
        );
    }

    #[test]
    fn clamps_levels_to_two_digits() {
        assert_eq!(
            lights_rgb_slew(Lights::ALL, 255, 100, 7, 120)
                .expect("rgb")
                .as_str(),
            "O99990799"
        );
    }

    #[test]
    fn formats_audio_and_tone() {
        assert_eq!(audio(7, 50).expect("audio").as_str(), "750");
        assert_eq!(audio(10, 50), Err(FrameError::FieldOutOfRange));
        assert_eq!(tone(1000, 0, 2).expect("tone").as_str(), "00010002");
        assert_eq!(tone(0, 5, 10).expect("silence").as_str(), "050000010");
    }

    #[test]
    fn formats_tray_and_config() {
        assert_eq!(present(0).expect("indefinite").as_str(), "00");
        assert_eq!(present(45).expect("timed").as_str(), "45");
        assert_eq!(filler().as_str(), "00");
        assert_eq!(config_get(8).expect("get").as_str(), "08");
        assert_eq!(config_set(11, 87).expect("set").as_str(), "1100087");
        assert_eq!(config_set(11, 100_000), Err(FrameError::FieldOutOfRange));
    }

    #[test]
    fn scales_amplitude_linearly() {
        assert_eq!(scale_amplitude(99, 99), 99);
        assert_eq!(scale_amplitude(50, 99), 50);
        assert_eq!(scale_amplitude(99, 50), 50);
        assert_eq!(scale_amplitude(80, 0), 0);
    }
}
