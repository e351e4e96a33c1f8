//! Tray presentation with eaten/not-eaten detection.
//!
//! [`TraySession::poll`] is called repeatedly until it yields a terminal
//! [`PresentStatus`]. It presents the tray once the food machine is idle,
//! proves the tray left home, waits for it to come back, then waits for one
//! more diagnostics update so the bowl reading is not stale.

use core::time::Duration;

use crate::link::CommandQueueProducer;
use crate::protocol::{Token, command};
use crate::time::{HubInstant, exceeded};

pub use crate::protocol::FoodMachineState;

/// Longest timed presentation the `T` command can express, in deciseconds.
const MAX_TIMED_DECISECONDS: u64 = 99;

/// Grace period for the tray to head home after a retract.
const RETRACT_GRACE: Duration = Duration::from_millis(500);

/// Presentation phase.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrayPhase {
    #[default]
    BeforePresent,
    PlatterOut,
    WaitTilBack,
    WaitDiag,
}

/// Result of one [`TraySession::poll`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PresentStatus {
    /// Still running; keep polling.
    Pending(TrayPhase),
    /// The bowl was empty when the tray came back.
    Taken,
    /// Food was still in the bowl.
    NotTaken,
    /// Lid open or food machine error; nothing was presented.
    Unavailable,
}

impl PresentStatus {
    /// Numeric result code used by interaction scripts and reports.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            PresentStatus::Pending(TrayPhase::BeforePresent) => 10,
            PresentStatus::Pending(TrayPhase::PlatterOut) => 11,
            PresentStatus::Pending(TrayPhase::WaitTilBack) => 12,
            PresentStatus::Pending(TrayPhase::WaitDiag) => 13,
            PresentStatus::Taken => 1,
            PresentStatus::NotTaken => 0,
            PresentStatus::Unavailable => 99,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, PresentStatus::Taken | PresentStatus::NotTaken)
    }
}

/// Device state the session reads on each poll.
#[derive(Copy, Clone, Debug)]
pub struct TrayView<TInstant> {
    pub state: FoodMachineState,
    /// Arrival time of the most recent diagnostics reply.
    pub last_diag_at: Option<TInstant>,
    /// Whether that reply reported an empty bowl.
    pub treat_taken: bool,
}

/// One presentation in progress.
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug)]
pub struct TraySession<TInstant> {
    phase: TrayPhase,
    presented_at: Option<TInstant>,
    retracted_at: Option<TInstant>,
    returned_at: Option<TInstant>,
    indefinite: bool,
    want_closed: bool,
    overdue_reported: bool,
    blocked: bool,
    reset_requested: bool,
}

impl<TInstant> TraySession<TInstant>
where
    TInstant: HubInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: TrayPhase::BeforePresent,
            presented_at: None,
            retracted_at: None,
            returned_at: None,
            indefinite: false,
            want_closed: false,
            overdue_reported: false,
            blocked: false,
            reset_requested: false,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> TrayPhase {
        self.phase
    }

    /// Asks an indefinite presentation to retract on the next poll.
    pub fn close(&mut self) {
        self.want_closed = true;
    }

    /// True once this session logged that the tray failed to head home.
    #[must_use]
    pub const fn is_return_overdue(&self) -> bool {
        self.overdue_reported
    }

    /// True while the food machine blocks presentation and no reset has
    /// gone out for this spell yet.
    #[must_use]
    pub const fn needs_reset(&self) -> bool {
        self.blocked && !self.reset_requested
    }

    /// Marks the food machine reset as queued.
    pub fn reset_sent(&mut self) {
        self.reset_requested = true;
    }

    /// Advances the presentation. A blocked food machine is reported through
    /// [`TraySession::needs_reset`]; the caller issues the reset.
    pub fn poll<Q: CommandQueueProducer>(
        &mut self,
        view: &TrayView<TInstant>,
        duration_ms: u32,
        now: TInstant,
        queue: &mut Q,
    ) -> PresentStatus {
        self.blocked = view.state.blocks_presentation();
        if self.blocked {
            if !self.reset_requested {
                warn!("tray: food machine unavailable ({})", view.state.code());
            }
            return PresentStatus::Unavailable;
        }
        self.reset_requested = false;

        match self.phase {
            TrayPhase::BeforePresent => self.present(view, duration_ms, now, queue),
            TrayPhase::PlatterOut => {
                if matches!(
                    view.state,
                    FoodMachineState::MovingHome
                        | FoodMachineState::Check
                        | FoodMachineState::MovingPresent
                        | FoodMachineState::Wait
                ) {
                    self.phase = TrayPhase::WaitTilBack;
                }
            }
            TrayPhase::WaitTilBack => self.wait_til_back(view, duration_ms, now, queue),
            TrayPhase::WaitDiag => {
                let fresh = match (view.last_diag_at, self.returned_at) {
                    (Some(diag), Some(returned)) => diag > returned,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if fresh {
                    *self = Self::new();
                    return if view.treat_taken {
                        PresentStatus::Taken
                    } else {
                        PresentStatus::NotTaken
                    };
                }
            }
        }

        PresentStatus::Pending(self.phase)
    }

    fn present<Q: CommandQueueProducer>(
        &mut self,
        view: &TrayView<TInstant>,
        duration_ms: u32,
        now: TInstant,
        queue: &mut Q,
    ) {
        if view.state != FoodMachineState::Idle {
            return;
        }

        let deciseconds = u64::from(duration_ms) / 100;
        let indefinite = deciseconds >= MAX_TIMED_DECISECONDS;
        let wire = if indefinite {
            0
        } else {
            u8::try_from(deciseconds).unwrap_or(0)
        };

        let queued = command::present(wire)
            .ok()
            .is_some_and(|payload| queue.try_enqueue(Token::PresentTray, &payload).is_ok());
        if queued {
            debug!("tray: presenting for {} ds (indefinite: {})", wire, indefinite);
            self.indefinite = indefinite;
            self.presented_at = Some(now);
            self.phase = TrayPhase::PlatterOut;
        } else {
            warn!("tray: present command not queued");
        }
    }

    fn wait_til_back<Q: CommandQueueProducer>(
        &mut self,
        view: &TrayView<TInstant>,
        duration_ms: u32,
        now: TInstant,
        queue: &mut Q,
    ) {
        if matches!(
            view.state,
            FoodMachineState::Dispensing | FoodMachineState::Idle
        ) {
            self.retracted_at = None;
            self.want_closed = false;
            self.returned_at = Some(now);
            self.phase = TrayPhase::WaitDiag;
            return;
        }

        if self.indefinite {
            let presented_at = self.presented_at.unwrap_or(now);
            let elapsed = exceeded(
                now,
                presented_at,
                Duration::from_millis(u64::from(duration_ms)),
            );
            if self.want_closed || elapsed {
                if queue
                    .try_enqueue(Token::RetractTray, &command::filler())
                    .is_ok()
                {
                    debug!("tray: retracting");
                    self.retracted_at = Some(now);
                    self.indefinite = false;
                } else {
                    error!("tray: retract command not queued");
                }
            }
        } else if !matches!(
            view.state,
            FoodMachineState::MovingHome | FoodMachineState::Check
        ) && !self.overdue_reported
            && self
                .retracted_at
                .is_some_and(|at| exceeded(now, at, RETRACT_GRACE))
        {
            error!("tray: tray should be on its way back by now");
            self.overdue_reported = true;
        }
    }
}

impl<TInstant> Default for TraySession<TInstant>
where
    TInstant: HubInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use crate::time::Millis;
    use heapless::{String, Vec};

    #[derive(Default)]
    struct RecordingQueue {
        sent: Vec<(Token, String<16>), 8>,
    }

    impl CommandQueueProducer for RecordingQueue {
        fn try_enqueue(&mut self, token: Token, payload: &str) -> Result<(), LinkError> {
            let payload = String::try_from(payload).map_err(|_| LinkError::QueueFull)?;
            self.sent
                .push((token, payload))
                .map_err(|_| LinkError::QueueFull)
        }

        fn contains(&self, token: Token) -> bool {
            self.sent.iter().any(|(queued, _)| *queued == token)
        }
    }

    fn at(ms: u64) -> Millis {
        Millis::from_millis(ms)
    }

    fn view(state: FoodMachineState, diag_ms: u64, taken: bool) -> TrayView<Millis> {
        TrayView {
            state,
            last_diag_at: Some(at(diag_ms)),
            treat_taken: taken,
        }
    }

    #[test]
    fn reports_unavailable_and_asks_for_one_reset_when_lid_open() {
        let mut session = TraySession::<Millis>::new();
        let mut queue = RecordingQueue::default();
        let lid = view(FoodMachineState::LidOpen, 0, false);

        assert_eq!(
            session.poll(&lid, 5_000, at(0), &mut queue),
            PresentStatus::Unavailable
        );
        assert!(session.needs_reset());
        session.reset_sent();
        assert_eq!(
            session.poll(&lid, 5_000, at(500), &mut queue),
            PresentStatus::Unavailable
        );
        assert!(!session.needs_reset());
        assert!(queue.sent.is_empty());
        assert_eq!(PresentStatus::Unavailable.code(), 99);

        session.poll(&view(FoodMachineState::Idle, 600, false), 5_000, at(600), &mut queue);
        assert!(!session.needs_reset());
        session.poll(&lid, 5_000, at(700), &mut queue);
        assert!(session.needs_reset());
    }

    #[test]
    fn long_duration_presents_indefinitely_then_retracts() {
        let mut session = TraySession::<Millis>::new();
        let mut queue = RecordingQueue::default();

        session.poll(&view(FoodMachineState::Idle, 0, false), 20_000, at(0), &mut queue);
        assert_eq!(queue.sent[0].1.as_str(), "00");
        assert_eq!(session.phase(), TrayPhase::PlatterOut);

        session.poll(&view(FoodMachineState::Wait, 500, false), 20_000, at(500), &mut queue);
        assert_eq!(session.phase(), TrayPhase::WaitTilBack);

        session.poll(&view(FoodMachineState::Wait, 19_500, false), 20_000, at(19_500), &mut queue);
        assert_eq!(queue.sent.len(), 1);

        session.poll(&view(FoodMachineState::Wait, 20_001, false), 20_000, at(20_001), &mut queue);
        assert_eq!(queue.sent.len(), 2);
        assert_eq!(queue.sent[1].0, Token::RetractTray);
    }

    #[test]
    fn close_request_retracts_early() {
        let mut session = TraySession::<Millis>::new();
        let mut queue = RecordingQueue::default();
        session.poll(&view(FoodMachineState::Idle, 0, false), 60_000, at(0), &mut queue);
        session.poll(&view(FoodMachineState::Wait, 500, false), 60_000, at(500), &mut queue);

        session.close();
        session.poll(&view(FoodMachineState::Wait, 1_000, false), 60_000, at(1_000), &mut queue);
        assert!(queue.contains(Token::RetractTray));
    }

    #[test]
    fn timed_presentation_encodes_deciseconds() {
        let mut session = TraySession::<Millis>::new();
        let mut queue = RecordingQueue::default();
        session.poll(&view(FoodMachineState::Idle, 0, false), 4_560, at(0), &mut queue);
        assert_eq!(queue.sent[0].1.as_str(), "45");
    }

    #[test]
    fn overdue_return_is_reported_once() {
        let mut session = TraySession::<Millis>::new();
        let mut queue = RecordingQueue::default();
        session.poll(&view(FoodMachineState::Idle, 0, false), 10_000, at(0), &mut queue);
        session.poll(&view(FoodMachineState::Wait, 100, false), 10_000, at(100), &mut queue);
        session.close();
        session.poll(&view(FoodMachineState::Wait, 200, false), 10_000, at(200), &mut queue);

        session.poll(&view(FoodMachineState::Wait, 700, false), 10_000, at(700), &mut queue);
        assert!(!session.is_return_overdue());
        session.poll(&view(FoodMachineState::Wait, 701, false), 10_000, at(701), &mut queue);
        assert!(session.is_return_overdue());
    }

    #[test]
    fn waits_for_fresh_diagnostics_before_resolving() {
        let mut session = TraySession::<Millis>::new();
        let mut queue = RecordingQueue::default();
        session.poll(&view(FoodMachineState::Idle, 0, false), 3_000, at(0), &mut queue);
        session.poll(&view(FoodMachineState::MovingPresent, 500, false), 3_000, at(500), &mut queue);
        session.poll(&view(FoodMachineState::Idle, 4_000, false), 3_000, at(4_000), &mut queue);
        assert_eq!(session.phase(), TrayPhase::WaitDiag);

        let stale = view(FoodMachineState::Idle, 4_000, false);
        assert_eq!(
            session.poll(&stale, 3_000, at(4_200), &mut queue),
            PresentStatus::Pending(TrayPhase::WaitDiag)
        );

        let fresh = view(FoodMachineState::Idle, 4_500, true);
        assert_eq!(
            session.poll(&fresh, 3_000, at(4_500), &mut queue),
            PresentStatus::Taken
        );
        assert_eq!(session.phase(), TrayPhase::BeforePresent);
    }
}
