//! Touchpad debounce.
//!
//! Poll replies report a raw per-pad touch flag. A pad reads as pressed from
//! the first raw touch until the raw flag has stayed clear past a liftoff
//! deadline, which absorbs short dropouts during a real press.

use core::ops::BitOr;
use core::time::Duration;

use crate::time::HubInstant;

/// One of the three touchpads.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pad {
    Left,
    Middle,
    Right,
}

impl Pad {
    pub const ALL: [Pad; 3] = [Pad::Left, Pad::Middle, Pad::Right];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Pad::Left => 0,
            Pad::Middle => 1,
            Pad::Right => 2,
        }
    }

    #[must_use]
    pub const fn mask(self) -> Pads {
        match self {
            Pad::Left => Pads::LEFT,
            Pad::Middle => Pads::MIDDLE,
            Pad::Right => Pads::RIGHT,
        }
    }

    /// Device audio sample played as touch feedback for this pad.
    #[must_use]
    pub const fn audio_sample(self) -> u8 {
        match self {
            Pad::Left => 7,
            Pad::Middle => 8,
            Pad::Right => 9,
        }
    }
}

/// Bit mask of touchpads, sharing bit positions with the pad lights.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pads(u8);

impl Pads {
    pub const NONE: Self = Self(0);
    pub const LEFT: Self = Self(0b001);
    pub const MIDDLE: Self = Self(0b010);
    pub const RIGHT: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when any pad of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn contains(self, pad: Pad) -> bool {
        self.intersects(pad.mask())
    }

    /// Iterates the pads set in the mask, left to right.
    pub fn iter(self) -> impl Iterator<Item = Pad> {
        Pad::ALL.into_iter().filter(move |pad| self.contains(*pad))
    }
}

impl BitOr for Pads {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl From<Pad> for Pads {
    fn from(pad: Pad) -> Self {
        pad.mask()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DebounceConfig {
    /// Time a pad must read clear before it counts as released.
    pub liftoff: Duration,
}

impl DebounceConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            liftoff: Duration::from_millis(100),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug)]
struct PadState<TInstant> {
    pressed: bool,
    liftoff_deadline: Option<TInstant>,
    last_touched: Option<TInstant>,
    baseline: u16,
    reading: u16,
}

impl<TInstant> PadState<TInstant> {
    const fn new() -> Self {
        Self {
            pressed: true,
            liftoff_deadline: None,
            last_touched: None,
            baseline: 0,
            reading: 0,
        }
    }
}

/// Debounced state for the three touchpads.
pub struct TouchpadDebouncer<TInstant> {
    config: DebounceConfig,
    pads: [PadState<TInstant>; 3],
}

impl<TInstant> TouchpadDebouncer<TInstant>
where
    TInstant: HubInstant,
{
    /// Creates a debouncer with every pad considered pressed until a poll says otherwise.
    #[must_use]
    pub const fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            pads: [PadState::new(), PadState::new(), PadState::new()],
        }
    }

    /// Folds one poll's raw touch flags in and returns the pads that just became pressed.
    pub fn update(&mut self, raw: [bool; 3], now: TInstant) -> Pads {
        let mut rising = Pads::NONE;

        for pad in Pad::ALL {
            let state = &mut self.pads[pad.index()];
            if raw[pad.index()] {
                state.liftoff_deadline = Some(now + self.config.liftoff);
                state.last_touched = Some(now);
                if !state.pressed {
                    state.pressed = true;
                    rising = rising | pad.mask();
                }
            } else if state.liftoff_deadline.is_none_or(|deadline| now > deadline) {
                state.pressed = false;
            }
        }

        rising
    }

    /// Stores the capacitive baselines and readings from a full button poll.
    pub fn update_readings(&mut self, baselines: [u16; 3], readings: [u16; 3]) {
        for pad in Pad::ALL {
            let state = &mut self.pads[pad.index()];
            state.baseline = baselines[pad.index()];
            state.reading = readings[pad.index()];
        }
    }

    /// Signal strength for a pad: baseline minus reading.
    #[must_use]
    pub fn value(&self, pad: Pad) -> i32 {
        let state = &self.pads[pad.index()];
        i32::from(state.baseline) - i32::from(state.reading)
    }

    #[must_use]
    pub fn values(&self) -> [i32; 3] {
        [
            self.value(Pad::Left),
            self.value(Pad::Middle),
            self.value(Pad::Right),
        ]
    }

    /// Currently pressed pads.
    #[must_use]
    pub fn pressed(&self) -> Pads {
        Pad::ALL
            .into_iter()
            .filter(|pad| self.pads[pad.index()].pressed)
            .fold(Pads::NONE, |acc, pad| acc | pad.mask())
    }

    /// True when any pad in `mask` is pressed.
    #[must_use]
    pub fn is_pressed(&self, mask: Pads) -> bool {
        self.pressed().intersects(mask)
    }

    /// Pads whose raw flag was set at some point within `window` before `now`.
    #[must_use]
    pub fn touched_within(&self, now: TInstant, window: Duration) -> Pads {
        Pad::ALL
            .into_iter()
            .filter(|pad| {
                self.pads[pad.index()]
                    .last_touched
                    .is_some_and(|at| now.saturating_duration_since(at) <= window)
            })
            .fold(Pads::NONE, |acc, pad| acc | pad.mask())
    }
}

impl<TInstant> Default for TouchpadDebouncer<TInstant>
where
    TInstant: HubInstant,
{
    fn default() -> Self {
        Self::new(DebounceConfig::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Millis;

    fn at(ms: u64) -> Millis {
        Millis::from_millis(ms)
    }

    fn released() -> TouchpadDebouncer<Millis> {
        let mut pads = TouchpadDebouncer::default();
        pads.update([false; 3], at(0));
        pads
    }

    #[test]
    fn pads_start_pressed_until_first_clear_poll() {
        let mut pads = TouchpadDebouncer::<Millis>::default();
        assert_eq!(pads.pressed(), Pads::ALL);
        assert_eq!(pads.update([false; 3], at(0)), Pads::NONE);
        assert_eq!(pads.pressed(), Pads::NONE);
    }

    #[test]
    fn rising_edge_fires_once_per_press() {
        let mut pads = released();
        assert_eq!(pads.update([true, false, false], at(50)), Pads::LEFT);
        assert_eq!(pads.update([true, false, false], at(100)), Pads::NONE);
        assert!(pads.is_pressed(Pads::LEFT));
        assert!(!pads.is_pressed(Pads::MIDDLE | Pads::RIGHT));
    }

    #[test]
    fn short_dropout_is_absorbed() {
        let mut pads = released();
        pads.update([false, true, false], at(1_000));
        pads.update([false, false, false], at(1_050));
        assert!(pads.is_pressed(Pads::MIDDLE));
        assert_eq!(pads.update([false, true, false], at(1_090)), Pads::NONE);
        assert!(pads.is_pressed(Pads::MIDDLE));

        pads.update([false, false, false], at(1_190));
        assert!(pads.is_pressed(Pads::MIDDLE), "deadline is inclusive");
        pads.update([false, false, false], at(1_191));
        assert!(!pads.is_pressed(Pads::MIDDLE));
    }

    #[test]
    fn values_are_baseline_minus_reading() {
        let mut pads = released();
        pads.update_readings([200, 210, 220], [150, 215, 220]);
        assert_eq!(pads.values(), [50, -5, 0]);
    }

    #[test]
    fn touch_window_tracks_last_raw_touch() {
        let mut pads = released();
        pads.update([false, false, true], at(500));

        assert_eq!(pads.touched_within(at(700), Duration::from_millis(200)), Pads::RIGHT);
        assert_eq!(pads.touched_within(at(701), Duration::from_millis(200)), Pads::NONE);
    }

    #[test]
    fn mask_iterates_left_to_right() {
        let mut seen = heapless::Vec::<Pad, 3>::new();
        for pad in (Pads::RIGHT | Pads::LEFT).iter() {
            seen.push(pad).expect("three pads fit");
        }
        assert_eq!(seen.as_slice(), &[Pad::Left, Pad::Right]);
    }
}
