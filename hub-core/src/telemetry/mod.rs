//! Hub event catalog and the in-memory ring that retains recent events.
//!
//! Events are recorded by the [`Hub`](crate::Hub) as it schedules link traffic
//! and reacts to device state. Each kind maps to a compact numeric code so the
//! ring can be mirrored over a diagnostics channel without carrying strings.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::capsense::ResetReason;
use crate::indicator::IndicatorState;
use crate::protocol::{DecodeError, Token};
use crate::tray::PresentStatus;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of events retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Discriminated hub events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HubEventKind {
    CommandDropped,
    ListenTimeout,
    TransmitFailed,
    ReplyError,
    DiReset,
    FoodMachineReset,
    IndicatorChanged,
    Touch,
    TrayResult,
    TrayReturnOverdue,
    ConfigSynced,
    Custom(u16),
}

impl fmt::Display for HubEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubEventKind::CommandDropped => f.write_str("command-dropped"),
            HubEventKind::ListenTimeout => f.write_str("listen-timeout"),
            HubEventKind::TransmitFailed => f.write_str("transmit-failed"),
            HubEventKind::ReplyError => f.write_str("reply-error"),
            HubEventKind::DiReset => f.write_str("di-reset"),
            HubEventKind::FoodMachineReset => f.write_str("food-machine-reset"),
            HubEventKind::IndicatorChanged => f.write_str("indicator-changed"),
            HubEventKind::Touch => f.write_str("touch"),
            HubEventKind::TrayResult => f.write_str("tray-result"),
            HubEventKind::TrayReturnOverdue => f.write_str("tray-return-overdue"),
            HubEventKind::ConfigSynced => f.write_str("config-synced"),
            HubEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl HubEventKind {
    const LINK_BASE: u16 = 0x0000;
    const DEVICE_BASE: u16 = 0x0010;
    const SESSION_BASE: u16 = 0x0020;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            HubEventKind::CommandDropped => Self::LINK_BASE,
            HubEventKind::ListenTimeout => Self::LINK_BASE + 1,
            HubEventKind::TransmitFailed => Self::LINK_BASE + 2,
            HubEventKind::ReplyError => Self::LINK_BASE + 3,
            HubEventKind::DiReset => Self::DEVICE_BASE,
            HubEventKind::FoodMachineReset => Self::DEVICE_BASE + 1,
            HubEventKind::IndicatorChanged => Self::DEVICE_BASE + 2,
            HubEventKind::ConfigSynced => Self::DEVICE_BASE + 3,
            HubEventKind::Touch => Self::SESSION_BASE,
            HubEventKind::TrayResult => Self::SESSION_BASE + 1,
            HubEventKind::TrayReturnOverdue => Self::SESSION_BASE + 2,
            HubEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`HubEventKind::Custom`].
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        match code {
            0x0000 => HubEventKind::CommandDropped,
            0x0001 => HubEventKind::ListenTimeout,
            0x0002 => HubEventKind::TransmitFailed,
            0x0003 => HubEventKind::ReplyError,
            0x0010 => HubEventKind::DiReset,
            0x0011 => HubEventKind::FoodMachineReset,
            0x0012 => HubEventKind::IndicatorChanged,
            0x0013 => HubEventKind::ConfigSynced,
            0x0020 => HubEventKind::Touch,
            0x0021 => HubEventKind::TrayResult,
            0x0022 => HubEventKind::TrayReturnOverdue,
            other => HubEventKind::Custom(other),
        }
    }
}

/// Details carried alongside an event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HubEventPayload {
    None,
    /// A link-layer event for a specific command.
    Command(CommandTelemetry),
    Decode(DecodeError),
    Reset(ResetReason),
    Indicator(IndicatorState),
    Touch(TouchTelemetry),
    Tray(PresentStatus),
}

/// Link metadata for a command-level event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandTelemetry {
    pub token: Token,
    pub sequence: u8,
    pub retries: u8,
}

/// Touch metadata: newly pressed pads and time since the previous touch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TouchTelemetry {
    pub pads: u8,
    pub since_previous: Option<Duration>,
}

/// Record stored in the ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: HubEventKind,
    pub details: HubEventPayload,
}

/// Ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records hub events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_touch_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_touch_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: HubEventKind,
        details: HubEventPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details,
        });

        id
    }

    /// Records a link-layer event tied to one command.
    pub fn record_command(
        &mut self,
        event: HubEventKind,
        token: Token,
        sequence: u8,
        retries: u8,
        timestamp: TInstant,
    ) -> EventId {
        let payload = HubEventPayload::Command(CommandTelemetry {
            token,
            sequence,
            retries,
        });
        self.record(event, payload, timestamp)
    }

    /// Records newly pressed pads and the gap since the previous touch.
    pub fn record_touch(&mut self, pads: u8, timestamp: TInstant) -> EventId {
        let since_previous = self
            .last_touch_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_touch_at = Some(timestamp);

        self.record(
            HubEventKind::Touch,
            HubEventPayload::Touch(TouchTelemetry {
                pads,
                since_previous,
            }),
            timestamp,
        )
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
