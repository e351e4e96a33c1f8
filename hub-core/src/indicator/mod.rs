//! Food machine fault tracking and the cue-light indicator.
//!
//! Each diagnostic error class is described by a [`FaultPolicy`]: which state
//! code raises it, what the indicator shows, whether the food machine is reset
//! after a wait, how many resets are tried before escalating, and what clears
//! it. [`FaultMonitor`] applies those policies to every diagnostics reply and
//! derives the indicator state; [`IndicatorLight`] turns changes of that state
//! into light commands.

use core::time::Duration;

use crate::link::{CommandQueueProducer, LinkError};
use crate::protocol::{FoodMachineState, Lights, Token, command};
use crate::time::{HubInstant, exceeded};

/// What the cue light is showing, in increasing order of severity.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndicatorState {
    #[default]
    Normal,
    OutOfFood,
    Jam,
    JamStuck,
}

impl IndicatorState {
    /// Builds the light command that displays this state.
    ///
    /// # Errors
    ///
    /// Propagates payload formatting failures.
    pub fn light_command(self) -> Result<(Token, command::Payload), LinkError> {
        let cue = Lights::CUE;
        Ok(match self {
            IndicatorState::Normal => (Token::SetLights, command::lights_slew(cue, 0, 0, 99)?),
            IndicatorState::OutOfFood => (
                Token::FlashLightsRgb,
                command::lights_rgb_flash(cue, 10, 0, 0, 99, 5)?,
            ),
            IndicatorState::Jam => (
                Token::FlashLightsRgb,
                command::lights_rgb_flash(cue, 80, 35, 0, 50, 30)?,
            ),
            IndicatorState::JamStuck => (
                Token::SetLightsRgb,
                command::lights_rgb_slew(cue, 80, 0, 0, 99)?,
            ),
        })
    }
}

/// Diagnostic error classes tracked by the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultClass {
    OutOfFood,
    PlatterJam,
    SingulatorJam,
}

impl FaultClass {
    pub const ALL: [FaultClass; 3] = [
        FaultClass::OutOfFood,
        FaultClass::PlatterJam,
        FaultClass::SingulatorJam,
    ];

    const fn index(self) -> usize {
        match self {
            FaultClass::OutOfFood => 0,
            FaultClass::PlatterJam => 1,
            FaultClass::SingulatorJam => 2,
        }
    }
}

/// Which food machine states clear an active fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClearRule {
    /// Any state other than the fault's own code.
    AnyOther,
    /// Only the given state.
    Only(FoodMachineState),
}

/// Automatic recovery for a persisting fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Escalation {
    /// Time the fault must persist before each reset attempt.
    pub retry_wait: Duration,
    /// The attempt that reaches this count escalates instead of resetting.
    pub max_attempts: u8,
    /// Indicator shown once escalated.
    pub indicator: IndicatorState,
}

/// Backoff and display policy for one fault class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FaultPolicy {
    pub state: FoodMachineState,
    pub indicator: IndicatorState,
    pub escalation: Option<Escalation>,
    pub clears_on: ClearRule,
    /// State during which the attempt counter is kept after the fault clears.
    pub hold_attempts_during: Option<FoodMachineState>,
}

impl FaultPolicy {
    #[must_use]
    pub const fn out_of_food() -> Self {
        Self {
            state: FoodMachineState::OutOfFood,
            indicator: IndicatorState::OutOfFood,
            escalation: None,
            clears_on: ClearRule::Only(FoodMachineState::Idle),
            hold_attempts_during: None,
        }
    }

    #[must_use]
    pub const fn platter_jam() -> Self {
        Self {
            state: FoodMachineState::PlatterError,
            indicator: IndicatorState::Jam,
            escalation: Some(Escalation {
                retry_wait: Duration::from_secs(10),
                max_attempts: 5,
                indicator: IndicatorState::JamStuck,
            }),
            clears_on: ClearRule::AnyOther,
            hold_attempts_during: Some(FoodMachineState::MovingHome),
        }
    }

    #[must_use]
    pub const fn singulator_jam() -> Self {
        Self {
            state: FoodMachineState::SingulatorError,
            indicator: IndicatorState::JamStuck,
            escalation: None,
            clears_on: ClearRule::AnyOther,
            hold_attempts_during: None,
        }
    }

    fn clears(&self, state: FoodMachineState) -> bool {
        match self.clears_on {
            ClearRule::AnyOther => true,
            ClearRule::Only(expected) => expected == state,
        }
    }
}

/// Action the caller must take after a diagnostics update.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultAction {
    None,
    ResetFoodMachine,
}

#[derive(Copy, Clone, Debug)]
struct FaultTracker<TInstant> {
    active: bool,
    since: Option<TInstant>,
    attempts: u8,
    escalated: bool,
}

impl<TInstant> FaultTracker<TInstant> {
    const IDLE: Self = Self {
        active: false,
        since: None,
        attempts: 0,
        escalated: false,
    };
}

/// Applies a [`FaultPolicy`] per class to the diagnostics stream.
pub struct FaultMonitor<TInstant> {
    policies: [FaultPolicy; 3],
    trackers: [FaultTracker<TInstant>; 3],
}

impl<TInstant> FaultMonitor<TInstant>
where
    TInstant: HubInstant,
{
    /// Creates a monitor; policies are indexed in [`FaultClass::ALL`] order.
    #[must_use]
    pub const fn new(policies: [FaultPolicy; 3]) -> Self {
        Self {
            policies,
            trackers: [FaultTracker::IDLE; 3],
        }
    }

    /// Folds in the food machine state from one diagnostics reply.
    pub fn observe(&mut self, state: FoodMachineState, now: TInstant) -> FaultAction {
        let mut action = FaultAction::None;

        for class in FaultClass::ALL {
            let policy = self.policies[class.index()];
            let tracker = &mut self.trackers[class.index()];

            if state == policy.state {
                let since = match (tracker.active, tracker.since) {
                    (true, Some(since)) => since,
                    _ => {
                        info!("fault: {} raised", class);
                        tracker.active = true;
                        tracker.since = Some(now);
                        continue;
                    }
                };
                let Some(escalation) = policy.escalation else {
                    continue;
                };
                if tracker.escalated || !exceeded(now, since, escalation.retry_wait) {
                    continue;
                }

                tracker.attempts = tracker.attempts.saturating_add(1);
                if tracker.attempts >= escalation.max_attempts {
                    warn!("fault: {} persists after {} attempts", class, tracker.attempts);
                    tracker.escalated = true;
                } else {
                    debug!("fault: {} reset attempt {}", class, tracker.attempts);
                    tracker.since = Some(now);
                    action = FaultAction::ResetFoodMachine;
                }
            } else if tracker.active {
                if policy.clears(state) {
                    info!("fault: {} cleared", class);
                    tracker.active = false;
                }
            } else if policy
                .hold_attempts_during
                .is_none_or(|hold| hold != state)
            {
                tracker.attempts = 0;
                tracker.escalated = false;
            }
        }

        action
    }

    #[must_use]
    pub fn is_active(&self, class: FaultClass) -> bool {
        self.trackers[class.index()].active
    }

    #[must_use]
    pub fn is_escalated(&self, class: FaultClass) -> bool {
        self.trackers[class.index()].escalated
    }

    #[must_use]
    pub fn attempts(&self, class: FaultClass) -> u8 {
        self.trackers[class.index()].attempts
    }

    /// Most severe indicator among the active classes.
    #[must_use]
    pub fn desired(&self) -> IndicatorState {
        FaultClass::ALL
            .into_iter()
            .filter_map(|class| {
                let tracker = &self.trackers[class.index()];
                let policy = &self.policies[class.index()];
                tracker.active.then(|| match policy.escalation {
                    Some(escalation) if tracker.escalated => escalation.indicator,
                    _ => policy.indicator,
                })
            })
            .max()
            .unwrap_or(IndicatorState::Normal)
    }
}

impl<TInstant> Default for FaultMonitor<TInstant>
where
    TInstant: HubInstant,
{
    fn default() -> Self {
        Self::new([
            FaultPolicy::out_of_food(),
            FaultPolicy::platter_jam(),
            FaultPolicy::singulator_jam(),
        ])
    }
}

/// Last indicator state pushed to the cue light.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndicatorLight {
    applied: IndicatorState,
}

impl IndicatorLight {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            applied: IndicatorState::Normal,
        }
    }

    #[must_use]
    pub const fn applied(&self) -> IndicatorState {
        self.applied
    }

    /// Queues the light command for `desired` when it differs from what is shown.
    ///
    /// Returns `Ok(true)` when a command was queued.
    ///
    /// # Errors
    ///
    /// Propagates enqueue failures; the applied state is left unchanged so the
    /// next poll retries.
    pub fn apply<Q: CommandQueueProducer>(
        &mut self,
        desired: IndicatorState,
        queue: &mut Q,
    ) -> Result<bool, LinkError> {
        if desired == self.applied {
            return Ok(false);
        }
        let (token, payload) = desired.light_command()?;
        queue.try_enqueue(token, &payload)?;
        info!("indicator: {} -> {}", self.applied, desired);
        self.applied = desired;
        Ok(true)
    }
}
