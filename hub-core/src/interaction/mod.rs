//! "Eat the food": the hub offers a free treat for a level-dependent time.
//!
//! Eating the treat raises the level, which shortens the next offer; ignoring
//! it lowers the level. The challenge counts as complete once enough of the
//! recent interactions ended with the treat eaten.

use core::fmt::Write;
use core::time::Duration;

use heapless::{HistoryBuf, String};

use crate::hub::Hub;
use crate::protocol::{FoodMachineState, command};
use crate::report::{Report, ReportSink};
use crate::resumable::{Point, Resumable};
use crate::time::{Clock, HubInstant};
use crate::transport::SerialPort;
use crate::tray::PresentStatus;

/// Highest level; also the number of offer durations.
pub const MAX_LEVEL: u8 = 6;

/// Offer time per level, level 1 first.
pub const FOODTREAT_DURATIONS_MS: [u32; 6] = [192_000, 96_000, 48_000, 24_000, 12_000, 6_000];

/// Interactions remembered when judging completion.
pub const HISTORY_LENGTH: usize = 5;

/// Resume point from the cue sound onwards.
const PRESENTING: Point = 2;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EatTheFoodConfig {
    pub start_level: u8,
    /// Level a successful interaction jumps to when below it.
    pub anchor_level: u8,
    /// Eaten treats within the history that complete the challenge.
    pub enough_successes: usize,
    /// Pause between the cue sound and the offer.
    pub cue_delay: Duration,
    pub cue_volume: u8,
    pub player: &'static str,
}

impl EatTheFoodConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_level: 4,
            anchor_level: 4,
            enough_successes: 3,
            cue_delay: Duration::from_millis(1_200),
            cue_volume: 20,
            player: "Pet, Clever",
        }
    }
}

impl Default for EatTheFoodConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one finished interaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Interaction {
    pub level: u8,
    pub eaten: bool,
    /// From the cue sound until the tray came back.
    pub duration: Duration,
    pub reported: bool,
    /// Enough recent successes; the history has been cleared.
    pub challenge_complete: bool,
}

struct Locals<TInstant> {
    started_at: Option<TInstant>,
    play_start_time: String<16>,
    status: PresentStatus,
}

impl<TInstant> Default for Locals<TInstant> {
    fn default() -> Self {
        Self {
            started_at: None,
            play_start_time: String::new(),
            status: PresentStatus::NotTaken,
        }
    }
}

/// Resumable driver for the challenge.
pub struct EatTheFood<TInstant> {
    config: EatTheFoodConfig,
    rsf: Resumable<Locals<TInstant>, TInstant>,
    level: u8,
    history: HistoryBuf<bool, HISTORY_LENGTH>,
}

impl<TInstant> EatTheFood<TInstant>
where
    TInstant: HubInstant,
{
    #[must_use]
    pub fn new(config: EatTheFoodConfig) -> Self {
        Self {
            config,
            rsf: Resumable::new(),
            level: config.start_level.clamp(1, MAX_LEVEL),
            history: HistoryBuf::new(),
        }
    }

    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    /// Offer time for the current level.
    #[must_use]
    pub fn offer_ms(&self) -> u32 {
        FOODTREAT_DURATIONS_MS[usize::from(self.level - 1)]
    }

    /// True from the cue sound until the interaction is reported. Waiting
    /// for the food machine to become ready does not count.
    #[must_use]
    pub const fn in_progress(&self) -> bool {
        self.rsf.point() >= PRESENTING
    }

    /// Advances the interaction. Call after every [`Hub::run`]; returns the
    /// outcome once the interaction has been reported. `wall_time` is the
    /// wall-clock time in seconds since the epoch, or zero when unknown.
    pub fn step<P, C, S, const DEPTH: usize>(
        &mut self,
        hub: &mut Hub<P, C, DEPTH>,
        sink: &mut S,
        wall_time: u32,
    ) -> Option<Interaction>
    where
        P: SerialPort,
        C: Clock<Instant = TInstant>,
        S: ReportSink,
    {
        loop {
            match self.rsf.point() {
                0 | 1 => {
                    let ready = hub.is_ready()
                        && hub.food_machine_state() == Some(FoodMachineState::Idle)
                        && hub.any_button_pressed().is_empty();
                    if self.rsf.wait_until(1, ready, ()).is_break() {
                        return None;
                    }

                    info!("eat-the-food: level {}, offering {} ms", self.level, self.offer_ms());
                    hub.set_di_reset_lock(true);
                    self.rsf.locals.started_at = Some(hub.now());
                    self.rsf.locals.play_start_time.clear();
                    let _ = write!(self.rsf.locals.play_start_time, "{wall_time}");
                    hub.play_audio(command::sample::POSITIVE, self.config.cue_volume);
                    self.rsf.goto(PRESENTING);
                }
                PRESENTING => {
                    let now = hub.now();
                    if self.rsf.sleep(PRESENTING, now, self.config.cue_delay, ()).is_break() {
                        return None;
                    }
                    self.rsf.goto(3);
                }
                3 => {
                    let status = hub.present_and_check_foodtreat(self.offer_ms());
                    if !status.is_terminal() {
                        return self.rsf.suspend(3, None);
                    }
                    self.rsf.locals.status = status;
                    self.rsf.goto(4);
                }
                _ => return Some(self.conclude(hub, sink, wall_time)),
            }
        }
    }

    fn conclude<P, C, S, const DEPTH: usize>(
        &mut self,
        hub: &mut Hub<P, C, DEPTH>,
        sink: &mut S,
        wall_time: u32,
    ) -> Interaction
    where
        P: SerialPort,
        C: Clock<Instant = TInstant>,
        S: ReportSink,
    {
        let now = hub.now();
        let duration = self
            .rsf
            .locals
            .started_at
            .map_or(Duration::ZERO, |started| now.saturating_duration_since(started));
        let eaten = self.rsf.locals.status == PresentStatus::Taken;
        let played_level = self.level;

        let reported = hub.report(
            &Report {
                play_start_time: &self.rsf.locals.play_start_time,
                player: self.config.player,
                result: if eaten { "1" } else { "0" },
                level: u32::from(played_level),
                duration: u32::try_from(duration.as_millis()).unwrap_or(u32::MAX),
                foodtreat_presented: true,
                foodtreat_eaten: eaten,
                extra: None,
            },
            wall_time,
            sink,
        );

        if eaten {
            info!("eat-the-food: eaten after {} ms", duration.as_millis());
            if self.level < MAX_LEVEL {
                self.level = if self.level < self.config.anchor_level {
                    self.config.anchor_level
                } else {
                    self.level + 1
                };
            }
        } else {
            info!("eat-the-food: not eaten");
            self.level = self.level.saturating_sub(1).max(1);
        }

        self.history.write(eaten);
        let successes = self.history.iter().filter(|eaten| **eaten).count();
        let challenge_complete = successes >= self.config.enough_successes;
        if challenge_complete {
            info!("eat-the-food: challenge complete");
            self.history.clear();
        }

        hub.set_di_reset_lock(false);
        self.rsf.finish();

        Interaction {
            level: played_level,
            eaten,
            duration,
            reported,
            challenge_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Millis;

    #[test]
    fn start_level_is_clamped() {
        let game = EatTheFood::<Millis>::new(EatTheFoodConfig {
            start_level: 9,
            ..EatTheFoodConfig::new()
        });
        assert_eq!(game.level(), 6);
        assert_eq!(game.offer_ms(), 6_000);

        let game = EatTheFood::<Millis>::new(EatTheFoodConfig {
            start_level: 0,
            ..EatTheFoodConfig::new()
        });
        assert_eq!(game.offer_ms(), 192_000);
    }
}
