//! One-shot synchronisation of the Device Link's tunables.
//!
//! Some time after boot every tunable is read back with `U`. When any value
//! differs from the compiled-in expectation the full set is written with `N`
//! and the board is reset so it picks the values up.

use core::{fmt, time::Duration};

use crate::link::{CommandQueueProducer, LinkError};
use crate::protocol::{Token, command};
use crate::time::{HubInstant, exceeded};

/// Config ids read and written by the sync, in request order.
pub const CONFIG_IDS: [u8; 7] = [21, 22, 23, 11, 8, 18, 20];

const MAX_THRESHOLD: u32 = 255;
const MAX_TRAY_SPEED: u32 = 16;
const PLATTER_MOTOR_MAX_DUTY_CYCLE: u32 = 100;
const ALL_RECEIVED: u8 = (1 << CONFIG_IDS.len()) - 1;

/// Rejected initial values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A touchpad threshold is above 255.
    ThresholdOutOfRange,
    /// Tray speed is above 16.
    TraySpeedOutOfRange,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Values held by the Device Link for each id in [`CONFIG_IDS`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DlInitValues {
    pub left_threshold: u32,
    pub middle_threshold: u32,
    pub right_threshold: u32,
    pub tray_speed_pwm: u32,
    pub tray_current_threshold: u32,
    pub foodtreat_tx_power_level: u32,
    pub foodtreat_detect_threshold: u32,
}

impl DlInitValues {
    const ZERO: Self = Self {
        left_threshold: 0,
        middle_threshold: 0,
        right_threshold: 0,
        tray_speed_pwm: 0,
        tray_current_threshold: 0,
        foodtreat_tx_power_level: 0,
        foodtreat_detect_threshold: 0,
    };

    /// Values the firmware expects the board to carry.
    pub const EXPECTED: Self = Self {
        left_threshold: 29,
        middle_threshold: 30,
        right_threshold: 30,
        tray_speed_pwm: 14 * PLATTER_MOTOR_MAX_DUTY_CYCLE / MAX_TRAY_SPEED,
        tray_current_threshold: 200,
        foodtreat_tx_power_level: 0,
        foodtreat_detect_threshold: 60,
    };

    /// Builds values from user-facing settings, converting tray speed to PWM.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when a threshold or the tray speed is out of range.
    pub fn from_settings(
        thresholds: [u32; 3],
        tray_speed: u32,
        tray_current_threshold: u32,
        foodtreat_tx_power_level: u32,
        foodtreat_detect_threshold: u32,
    ) -> Result<Self, ConfigError> {
        if thresholds.iter().any(|value| *value > MAX_THRESHOLD) {
            return Err(ConfigError::ThresholdOutOfRange);
        }
        if tray_speed > MAX_TRAY_SPEED {
            return Err(ConfigError::TraySpeedOutOfRange);
        }
        let [left_threshold, middle_threshold, right_threshold] = thresholds;
        Ok(Self {
            left_threshold,
            middle_threshold,
            right_threshold,
            tray_speed_pwm: tray_speed * PLATTER_MOTOR_MAX_DUTY_CYCLE / MAX_TRAY_SPEED,
            tray_current_threshold,
            foodtreat_tx_power_level,
            foodtreat_detect_threshold,
        })
    }

    /// Value for a config id.
    #[must_use]
    pub const fn get(&self, id: u8) -> Option<u32> {
        Some(match id {
            21 => self.left_threshold,
            22 => self.middle_threshold,
            23 => self.right_threshold,
            11 => self.tray_speed_pwm,
            8 => self.tray_current_threshold,
            18 => self.foodtreat_tx_power_level,
            20 => self.foodtreat_detect_threshold,
            _ => return None,
        })
    }

    /// Stores the value for a config id; returns `false` for unknown ids.
    pub fn set(&mut self, id: u8, value: u32) -> bool {
        let slot = match id {
            21 => &mut self.left_threshold,
            22 => &mut self.middle_threshold,
            23 => &mut self.right_threshold,
            11 => &mut self.tray_speed_pwm,
            8 => &mut self.tray_current_threshold,
            18 => &mut self.foodtreat_tx_power_level,
            20 => &mut self.foodtreat_detect_threshold,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// Queues a `N` write for every config id from `*written` onwards, advancing
/// the cursor past each accepted write. The caller resets the board afterwards.
///
/// # Errors
///
/// Stops at the first enqueue failure; calling again with the same cursor
/// resumes at the id that was refused.
pub fn queue_init_values<Q: CommandQueueProducer>(
    values: &DlInitValues,
    queue: &mut Q,
    written: &mut usize,
) -> Result<(), LinkError> {
    for &id in CONFIG_IDS.get(*written..).unwrap_or_default() {
        let value = values.get(id).unwrap_or_default();
        queue.try_enqueue(Token::SetConfig, &command::config_set(id, value)?)?;
        *written += 1;
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigSyncConfig {
    /// Delay after boot before reading the tunables.
    pub settle_delay: Duration,
    /// Wait before ids that never answered are requested again.
    pub fetch_timeout: Duration,
    pub expected: DlInitValues,
}

impl ConfigSyncConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            settle_delay: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(5),
            expected: DlInitValues::EXPECTED,
        }
    }
}

impl Default for ConfigSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigSyncPhase {
    Bootup,
    Get,
    WaitGet,
    Set,
    Done,
}

/// Follow-up the caller must perform after [`ConfigSync::poll`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigSyncAction {
    None,
    /// New values were queued; reset the board to apply them.
    ResetBoard,
}

/// Boot-time config sync state machine.
pub struct ConfigSync<TInstant> {
    config: ConfigSyncConfig,
    phase: ConfigSyncPhase,
    booted_at: TInstant,
    requested_at: Option<TInstant>,
    received: u8,
    fetched: DlInitValues,
    written: usize,
}

impl<TInstant> ConfigSync<TInstant>
where
    TInstant: HubInstant,
{
    #[must_use]
    pub const fn new(config: ConfigSyncConfig, booted_at: TInstant) -> Self {
        Self {
            config,
            phase: ConfigSyncPhase::Bootup,
            booted_at,
            requested_at: None,
            received: 0,
            fetched: DlInitValues::ZERO,
            written: 0,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> ConfigSyncPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.phase, ConfigSyncPhase::Done)
    }

    /// Values read back so far.
    #[must_use]
    pub const fn fetched(&self) -> &DlInitValues {
        &self.fetched
    }

    /// True once every id has reported.
    #[must_use]
    pub const fn all_received(&self) -> bool {
        self.received == ALL_RECEIVED
    }

    /// Records a `U` reply. Replies outside a sync still update the fetched copy.
    pub fn record(&mut self, id: u8, value: u32) {
        if !self.fetched.set(id, value) {
            warn!("config: reply for unknown id {}", id);
            return;
        }
        if let Some(bit) = CONFIG_IDS.iter().position(|known| *known == id) {
            self.received |= 1 << bit;
        }
    }

    /// Advances the sync by one phase at most.
    pub fn poll<Q: CommandQueueProducer>(&mut self, now: TInstant, queue: &mut Q) -> ConfigSyncAction {
        match self.phase {
            ConfigSyncPhase::Bootup => {
                if exceeded(now, self.booted_at, self.config.settle_delay) {
                    self.phase = ConfigSyncPhase::Get;
                }
            }
            ConfigSyncPhase::Get => {
                self.request_missing(now, queue);
                self.phase = ConfigSyncPhase::WaitGet;
            }
            ConfigSyncPhase::WaitGet => {
                if self.all_received() {
                    if self.fetched == self.config.expected {
                        info!("config: device values match");
                        self.phase = ConfigSyncPhase::Done;
                    } else {
                        info!("config: device values differ, rewriting");
                        self.phase = ConfigSyncPhase::Set;
                    }
                } else if self
                    .requested_at
                    .is_none_or(|at| exceeded(now, at, self.config.fetch_timeout))
                {
                    debug!("config: re-requesting missing values");
                    self.request_missing(now, queue);
                }
            }
            ConfigSyncPhase::Set => match queue_init_values(
                &self.config.expected,
                queue,
                &mut self.written,
            ) {
                Ok(()) => {
                    self.phase = ConfigSyncPhase::Done;
                    return ConfigSyncAction::ResetBoard;
                }
                Err(err) => warn!("config: writing values failed: {}", err),
            },
            ConfigSyncPhase::Done => {}
        }
        ConfigSyncAction::None
    }

    fn request_missing<Q: CommandQueueProducer>(&mut self, now: TInstant, queue: &mut Q) {
        self.requested_at = Some(now);
        for (bit, id) in CONFIG_IDS.into_iter().enumerate() {
            if self.received & (1 << bit) != 0 {
                continue;
            }
            let queued = command::config_get(id)
                .map_err(LinkError::from)
                .and_then(|payload| queue.try_enqueue(Token::GetConfig, &payload));
            if let Err(err) = queued {
                warn!("config: request for id {} not queued: {}", id, err);
            }
        }
    }
}
