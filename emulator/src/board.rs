//! Simulated Device Link board.
//!
//! Answers every frame the hub writes the way the real board does: in order,
//! with the echoed sequence digit and token, a status digit and the reply
//! payload. The food machine follows a timed state machine so presentations
//! take realistic time on the virtual clock.

use std::collections::VecDeque;
use std::time::Duration;

use hub_core::SerialPort;
use hub_core::config_sync::DlInitValues;
use hub_core::protocol::{FoodMachineState, Token};
use hub_core::touchpad::Pad;

use crate::clock::VirtualClock;

const TRAVEL: Duration = Duration::from_millis(600);
const CHECK: Duration = Duration::from_millis(300);
const TOUCH_DROP: u16 = 60;
const BASELINE: u16 = 200;

/// Direction of a logged frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    ToBoard,
    FromBoard,
}

/// One frame on the wire, stamped with virtual time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireFrame {
    pub at_ms: u64,
    pub direction: Direction,
    pub token: char,
    pub text: String,
}

#[derive(Clone, Copy, Debug)]
struct Motion {
    state: FoodMachineState,
    until: Option<u64>,
}

/// Board behaviour knobs exposed to the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BoardProfile {
    /// The pet eats whatever is presented.
    pub eats: bool,
    /// A food machine reset does not clear a jam.
    pub stuck_jam: bool,
}

impl Default for BoardProfile {
    fn default() -> Self {
        Self {
            eats: true,
            stuck_jam: false,
        }
    }
}

pub struct SimulatedBoard {
    clock: VirtualClock,
    profile: BoardProfile,
    rx: VecDeque<u8>,
    wire: Vec<WireFrame>,
    state: FoodMachineState,
    motions: VecDeque<Motion>,
    treat_in_bowl: bool,
    dome_open: bool,
    pads: [bool; 3],
    drift: [u16; 3],
    config: DlInitValues,
    resets: u32,
}

impl SimulatedBoard {
    #[must_use]
    pub fn new(clock: VirtualClock, profile: BoardProfile) -> Self {
        Self {
            clock,
            profile,
            rx: VecDeque::new(),
            wire: Vec::new(),
            state: FoodMachineState::Idle,
            motions: VecDeque::new(),
            treat_in_bowl: true,
            dome_open: false,
            pads: [false; 3],
            drift: [0; 3],
            config: DlInitValues::EXPECTED,
            resets: 0,
        }
    }

    pub fn profile_mut(&mut self) -> &mut BoardProfile {
        &mut self.profile
    }

    #[must_use]
    pub fn state(&self) -> FoodMachineState {
        self.state
    }

    pub fn set_touch(&mut self, pad: Pad, touched: bool) {
        self.pads[pad.index()] = touched;
    }

    /// Lowers a pad's reading without setting its touch flag, like a drifted sensor.
    pub fn set_drift(&mut self, pad: Pad, amount: u16) {
        self.drift[pad.index()] = amount;
    }

    pub fn set_dome_open(&mut self, open: bool) {
        self.dome_open = open;
    }

    /// Forces the food machine into `state`, cancelling any motion.
    pub fn force_state(&mut self, state: FoodMachineState) {
        self.motions.clear();
        self.state = state;
    }

    #[must_use]
    pub fn config(&self) -> &DlInitValues {
        &self.config
    }

    /// Board reboots seen so far.
    #[must_use]
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Frames logged since the last drain.
    pub fn drain_wire(&mut self) -> Vec<WireFrame> {
        std::mem::take(&mut self.wire)
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    fn advance_motion(&mut self) {
        let now = self.now_ms();
        while let Some(head) = self.motions.front().copied() {
            if head.until.is_some_and(|until| now >= until) {
                self.motions.pop_front();
                if let Some(next) = self.motions.front_mut() {
                    self.state = next.state;
                    if next.state == FoodMachineState::Check {
                        self.treat_in_bowl = !self.profile.eats;
                    }
                } else {
                    self.state = FoodMachineState::Idle;
                }
            } else {
                break;
            }
        }
    }

    fn schedule(&mut self, steps: &[(FoodMachineState, Option<Duration>)]) {
        let mut at = self.now_ms();
        self.motions.clear();
        for (state, duration) in steps {
            let until = duration.map(|duration| {
                at += u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                at
            });
            self.motions.push_back(Motion {
                state: *state,
                until,
            });
        }
        if let Some(first) = self.motions.front() {
            self.state = first.state;
        }
    }

    fn return_home(&mut self) {
        self.schedule(&[
            (FoodMachineState::MovingHome, Some(TRAVEL)),
            (FoodMachineState::Check, Some(CHECK)),
        ]);
    }

    fn present(&mut self, deciseconds: u64) {
        let wait = (deciseconds > 0).then(|| Duration::from_millis(deciseconds * 100));
        self.schedule(&[
            (FoodMachineState::MovingPresent, Some(TRAVEL)),
            (FoodMachineState::Wait, wait),
            (FoodMachineState::MovingHome, Some(TRAVEL)),
            (FoodMachineState::Check, Some(CHECK)),
        ]);
    }

    fn readings(&self) -> [u16; 3] {
        let mut readings = [BASELINE; 3];
        for pad in Pad::ALL {
            let index = pad.index();
            let touch = if self.pads[index] { TOUCH_DROP } else { 0 };
            readings[index] = BASELINE.saturating_sub(touch + self.drift[index]);
        }
        readings
    }

    fn flags(&self) -> String {
        self.pads.iter().map(|pad| if *pad { '1' } else { '0' }).collect()
    }

    fn respond(&mut self, token: Option<Token>, payload: &str) -> (bool, String) {
        match token {
            Some(Token::PollDiagnostics) => {
                let state = char::from(b'0'.wrapping_add(self.state.code()));
                let moving = matches!(
                    self.state,
                    FoodMachineState::MovingHome | FoodMachineState::MovingPresent
                );
                (
                    true,
                    format!(
                        "0{}000000{}{}{}",
                        u8::from(moving),
                        u8::from(self.treat_in_bowl),
                        state,
                        u8::from(self.dome_open)
                    ),
                )
            }
            Some(Token::PollButtons) => {
                let mut out = self.flags();
                for value in [BASELINE; 3].iter().chain(self.readings().iter()) {
                    out.push_str(&format!("{value:03}"));
                }
                (true, out)
            }
            Some(Token::PollButtonSummary) => (true, self.flags()),
            Some(Token::GetConfig) => {
                let id: u8 = payload.get(..2).and_then(|id| id.parse().ok()).unwrap_or(0);
                match self.config.get(id) {
                    Some(value) => (true, format!("{id:02}{value:05}")),
                    None => (false, String::new()),
                }
            }
            Some(Token::SetConfig) => {
                let parsed = payload
                    .get(..2)
                    .and_then(|id| id.parse::<u8>().ok())
                    .zip(payload.get(2..).and_then(|value| value.parse::<u32>().ok()));
                let stored = parsed.is_some_and(|(id, value)| self.config.set(id, value));
                (stored, String::new())
            }
            Some(Token::PresentTray) => {
                let accepted = self.state == FoodMachineState::Idle;
                if accepted {
                    self.present(payload.parse().unwrap_or(0));
                }
                (accepted, String::new())
            }
            Some(Token::RetractTray) => {
                if matches!(
                    self.state,
                    FoodMachineState::MovingPresent | FoodMachineState::Wait
                ) {
                    self.return_home();
                }
                (true, String::new())
            }
            Some(Token::ResetFoodMachine) => {
                let jammed = matches!(
                    self.state,
                    FoodMachineState::PlatterError | FoodMachineState::SingulatorError
                );
                if !(jammed && self.profile.stuck_jam) && self.state != FoodMachineState::LidOpen {
                    self.return_home();
                }
                (true, String::new())
            }
            Some(Token::ResetBoard) => {
                self.resets += 1;
                self.drift = [0; 3];
                (true, String::new())
            }
            Some(_) => (true, String::new()),
            None => (false, String::new()),
        }
    }

    fn log(&mut self, direction: Direction, token: char, frame: &[u8]) {
        let text = String::from_utf8_lossy(frame)
            .trim_end_matches('\r')
            .to_string();
        self.wire.push(WireFrame {
            at_ms: self.now_ms(),
            direction,
            token,
            text,
        });
    }
}

impl SerialPort for SimulatedBoard {
    type Error = ();

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
        if bytes.len() < 9 || bytes[0] != b'$' {
            return Err(());
        }
        self.advance_motion();

        let sequence = bytes[4];
        let token_byte = bytes[5];
        let token = char::from(token_byte);
        self.log(Direction::ToBoard, token, bytes);

        let payload = String::from_utf8_lossy(&bytes[7..bytes.len() - 2]).into_owned();
        let (ok, reply) = self.respond(Token::from_byte(token_byte), &payload);
        let frame = format!(
            "${:03}{}{}{}{}.",
            reply.len(),
            char::from(sequence),
            token,
            u8::from(ok),
            reply
        );
        self.log(Direction::FromBoard, token, frame.as_bytes());
        self.rx.extend(frame.bytes());
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> (VirtualClock, SimulatedBoard) {
        let clock = VirtualClock::new();
        let board = SimulatedBoard::new(clock.clone(), BoardProfile::default());
        (clock, board)
    }

    fn exchange(board: &mut SimulatedBoard, frame: &[u8]) -> String {
        board.write(frame).expect("frame accepted");
        std::iter::from_fn(|| board.read_byte())
            .map(char::from)
            .collect()
    }

    #[test]
    fn echoes_sequence_and_token() {
        let (_, mut board) = board();
        assert_eq!(exchange(&mut board, b"$0075M1A502000.\r"), "$0005M1.");
        assert_eq!(exchange(&mut board, b"$0026U121.\r"), "$0076U12100029.");
    }

    #[test]
    fn presentation_runs_on_virtual_time() {
        let (clock, mut board) = board();
        assert_eq!(exchange(&mut board, b"$0020T110.\r"), "$0000T11.");
        assert_eq!(board.state(), FoodMachineState::MovingPresent);

        clock.advance(Duration::from_millis(700));
        exchange(&mut board, b"$0021Z100.\r");
        assert_eq!(board.state(), FoodMachineState::Wait);

        clock.advance(Duration::from_millis(1_000 + 600 + 50));
        let diag = exchange(&mut board, b"$0022Z100.\r");
        assert_eq!(board.state(), FoodMachineState::Check);
        // Bowl flag cleared because the pet ate.
        assert_eq!(&diag[7..], "00000000020.");

        clock.advance(CHECK);
        exchange(&mut board, b"$0023Z100.\r");
        assert_eq!(board.state(), FoodMachineState::Idle);
    }

    #[test]
    fn indefinite_presentation_waits_for_retract() {
        let (clock, mut board) = board();
        exchange(&mut board, b"$0020T100.\r");
        clock.advance(Duration::from_secs(60));
        exchange(&mut board, b"$0021Z100.\r");
        assert_eq!(board.state(), FoodMachineState::Wait);

        exchange(&mut board, b"$0022X100.\r");
        assert_eq!(board.state(), FoodMachineState::MovingHome);
    }

    #[test]
    fn refuses_presentation_unless_idle() {
        let (_, mut board) = board();
        board.force_state(FoodMachineState::SingulatorError);
        assert_eq!(exchange(&mut board, b"$0020T130.\r"), "$0000T10.");
    }

    #[test]
    fn stuck_jam_survives_food_machine_reset() {
        let (clock, mut board) = board();
        board.profile_mut().stuck_jam = true;
        board.force_state(FoodMachineState::SingulatorError);
        exchange(&mut board, b"$0000F1.\r");
        clock.advance(Duration::from_secs(2));
        exchange(&mut board, b"$0001Z100.\r");
        assert_eq!(board.state(), FoodMachineState::SingulatorError);

        board.profile_mut().stuck_jam = false;
        exchange(&mut board, b"$0002F1.\r");
        clock.advance(Duration::from_secs(2));
        exchange(&mut board, b"$0003Z100.\r");
        assert_eq!(board.state(), FoodMachineState::Idle);
    }

    #[test]
    fn drift_lowers_reading_without_touch_flag() {
        let (_, mut board) = board();
        board.set_drift(Pad::Right, 40);
        assert_eq!(
            exchange(&mut board, b"$0000B1.\r"),
            "$0210B1000200200200200200160."
        );
        exchange(&mut board, b"$0001K1.\r");
        assert_eq!(board.resets(), 1);
        assert_eq!(board.readings(), [BASELINE; 3]);
    }

    #[test]
    fn writes_config_values() {
        let (_, mut board) = board();
        assert_eq!(exchange(&mut board, b"$0070N11100050.\r"), "$0000N11.");
        assert_eq!(board.config().get(11), Some(50));
        assert_eq!(exchange(&mut board, b"$0071N19900050.\r"), "$0001N10.");
    }
}
