//! Capacitive-sensor auto-reset monitor.
//!
//! A pad whose signal stays high for too long is treated as a drifted sensor
//! rather than a press, and the Device Link board is reset to recalibrate it.
//! Detection is two-phase: a strict threshold must be exceeded on several
//! consecutive polls before a looser, hysteresis-scaled threshold is held
//! against the maximum on duration.

use core::time::Duration;

use crate::time::{HubInstant, exceeded};
use crate::touchpad::Pad;

/// Why a board reset was requested.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetReason {
    /// A pad stayed above its threshold past the maximum on duration.
    StuckPad(Pad),
    /// The periodic self-heal interval elapsed.
    Periodic,
    /// A caller asked for the reset.
    Requested,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorMonitorConfig {
    /// Strict per-pad thresholds, left to right.
    pub thresholds: [i32; 3],
    /// Consecutive strict exceedances before the loose phase.
    pub integration_threshold: u8,
    /// Loose-phase threshold as a percentage of the strict one.
    pub hysteresis_percent: i32,
    pub max_on: Duration,
    /// Unconditional reset interval.
    pub self_heal_interval: Duration,
}

impl SensorMonitorConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            thresholds: [29, 30, 30],
            integration_threshold: 3,
            hysteresis_percent: 50,
            max_on: Duration::from_secs(10),
            self_heal_interval: Duration::from_secs(500),
        }
    }

    const fn loose_threshold(&self, pad: Pad) -> i32 {
        self.thresholds[pad.index()] * self.hysteresis_percent / 100
    }
}

impl Default for SensorMonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug)]
struct Integrator<TInstant> {
    count: u8,
    on_since: Option<TInstant>,
}

impl<TInstant: HubInstant> Integrator<TInstant> {
    fn clear(&mut self, now: TInstant) {
        self.count = 0;
        self.on_since = Some(now);
    }
}

/// Per-pad integrators plus the shared reset request flags.
pub struct SensorMonitor<TInstant> {
    config: SensorMonitorConfig,
    pads: [Integrator<TInstant>; 3],
    needs_reset: Option<ResetReason>,
    reset_sent: bool,
    last_reset: Option<TInstant>,
}

impl<TInstant> SensorMonitor<TInstant>
where
    TInstant: HubInstant,
{
    #[must_use]
    pub const fn new(config: SensorMonitorConfig) -> Self {
        Self {
            config,
            pads: [
                Integrator {
                    count: 0,
                    on_since: None,
                },
                Integrator {
                    count: 0,
                    on_since: None,
                },
                Integrator {
                    count: 0,
                    on_since: None,
                },
            ],
            needs_reset: None,
            reset_sent: false,
            last_reset: None,
        }
    }

    /// Folds one set of pad signals in. Returns the stuck pad when this update
    /// raised a reset request.
    pub fn update(&mut self, values: [i32; 3], now: TInstant) -> Option<Pad> {
        if self.needs_reset.is_some() {
            return None;
        }

        for pad in Pad::ALL {
            let value = values[pad.index()];
            let loose = self.config.loose_threshold(pad);
            let strict = self.config.thresholds[pad.index()];
            let integrator = &mut self.pads[pad.index()];
            let on_since = *integrator.on_since.get_or_insert(now);

            if integrator.count >= self.config.integration_threshold {
                if value > loose {
                    if exceeded(now, on_since, self.config.max_on) {
                        warn!("capsense: pad {} stuck, reset needed", pad);
                        integrator.clear(now);
                        self.needs_reset = Some(ResetReason::StuckPad(pad));
                        return Some(pad);
                    }
                } else {
                    integrator.clear(now);
                }
            } else if value > strict {
                integrator.count = integrator.count.saturating_add(1);
            } else {
                integrator.clear(now);
            }
        }

        None
    }

    /// Raises a periodic request once the self-heal interval has elapsed.
    pub fn check_self_heal(&mut self, now: TInstant) -> bool {
        if self.needs_reset.is_some() {
            return false;
        }
        let last = *self.last_reset.get_or_insert(now);
        if exceeded(now, last, self.config.self_heal_interval) {
            debug!("capsense: periodic reset due");
            self.needs_reset = Some(ResetReason::Periodic);
            return true;
        }
        false
    }

    /// Requests a reset on behalf of a caller.
    pub fn request(&mut self) {
        if self.needs_reset.is_none() {
            self.needs_reset = Some(ResetReason::Requested);
        }
    }

    /// Reason for the outstanding request, if any.
    #[must_use]
    pub const fn needs_reset(&self) -> Option<ResetReason> {
        self.needs_reset
    }

    /// True when a reset is needed and has not been sent yet.
    #[must_use]
    pub const fn should_send(&self) -> bool {
        self.needs_reset.is_some() && !self.reset_sent
    }

    #[must_use]
    pub const fn reset_sent(&self) -> bool {
        self.reset_sent
    }

    /// Marks the reset command as queued.
    pub fn mark_sent(&mut self) {
        self.reset_sent = true;
    }

    /// The reset command was dropped by the link; allow it to be queued again.
    pub fn mark_dropped(&mut self) {
        self.reset_sent = false;
    }

    /// The board acknowledged the reset.
    pub fn acknowledge(&mut self, now: TInstant) {
        self.needs_reset = None;
        self.reset_sent = false;
        self.last_reset = Some(now);
    }

    #[must_use]
    pub const fn last_reset(&self) -> Option<TInstant> {
        self.last_reset
    }
}

impl<TInstant> Default for SensorMonitor<TInstant>
where
    TInstant: HubInstant,
{
    fn default() -> Self {
        Self::new(SensorMonitorConfig::new())
    }
}
