#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use hub_core::telemetry::TelemetryInstant;
use hub_core::{Clock, SerialPort};

/// Millisecond instant used by the integration tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(u64);

impl MockInstant {
    pub fn millis(value: u64) -> Self {
        Self(value)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_millis()).expect("duration fits in u64"))
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Clock that moves forward one millisecond every time it is sampled.
#[derive(Clone, Default)]
pub struct SteppingClock {
    now: Rc<Cell<u64>>,
}

impl SteppingClock {
    pub fn peek(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .set(self.now.get() + u64::try_from(by.as_millis()).expect("duration fits in u64"));
    }
}

impl Clock for SteppingClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        let now = self.now.get();
        self.now.set(now + 1);
        MockInstant(now)
    }
}

/// Frame the board received.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub token: char,
    pub sequence: u8,
    pub payload: String,
}

pub const IDLE: u8 = 4;

/// Device Link board with a scripted food machine. The food machine advances
/// one state per diagnostics poll.
pub struct SimulatedBoard {
    pub rx: VecDeque<u8>,
    pub frames: Vec<Frame>,
    pub food_state: u8,
    pub pending_states: VecDeque<u8>,
    pub eats: bool,
    pub treat_in_bowl: bool,
    pub pads: [bool; 3],
    pub baselines: [u16; 3],
    pub readings: [u16; 3],
    pub config: Vec<(u8, u32)>,
    pub silent: bool,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self {
            rx: VecDeque::new(),
            frames: Vec::new(),
            food_state: IDLE,
            pending_states: VecDeque::new(),
            eats: true,
            treat_in_bowl: true,
            pads: [false; 3],
            baselines: [200; 3],
            readings: [200; 3],
            config: vec![(21, 29), (22, 30), (23, 30), (11, 87), (8, 200), (18, 0), (20, 60)],
            silent: false,
        }
    }
}

impl SimulatedBoard {
    pub fn count(&self, token: char) -> usize {
        self.frames.iter().filter(|frame| frame.token == token).count()
    }

    pub fn payloads(&self, token: char) -> Vec<&str> {
        self.frames
            .iter()
            .filter(|frame| frame.token == token)
            .map(|frame| frame.payload.as_str())
            .collect()
    }

    fn respond(&mut self, token: char, payload: &str) -> String {
        match token {
            'Z' => {
                if let Some(next) = self.pending_states.pop_front() {
                    self.food_state = next;
                    if next == 2 {
                        self.treat_in_bowl = !self.eats;
                    }
                }
                format!(
                    "00000000{}{}0",
                    u8::from(self.treat_in_bowl),
                    char::from(b'0' + self.food_state)
                )
            }
            'B' => {
                let flags: String = self.pads.iter().map(|p| if *p { '1' } else { '0' }).collect();
                let mut out = flags;
                for value in self.baselines.iter().chain(self.readings.iter()) {
                    out.push_str(&format!("{value:03}"));
                }
                out
            }
            'G' => self.pads.iter().map(|p| if *p { '1' } else { '0' }).collect(),
            'U' => {
                let id: u8 = payload[..2].parse().unwrap_or(0);
                let value = self
                    .config
                    .iter()
                    .find(|(known, _)| *known == id)
                    .map_or(0, |(_, value)| *value);
                format!("{id:02}{value:05}")
            }
            'N' => {
                let id: u8 = payload[..2].parse().unwrap_or(0);
                let value: u32 = payload[2..].parse().unwrap_or(0);
                if let Some(slot) = self.config.iter_mut().find(|(known, _)| *known == id) {
                    slot.1 = value;
                }
                String::new()
            }
            'T' => {
                if self.food_state == IDLE {
                    self.pending_states = if payload == "00" {
                        VecDeque::from([5, 6])
                    } else {
                        VecDeque::from([5, 6, 6, 1, 2, 4])
                    };
                }
                String::new()
            }
            'X' => {
                if matches!(self.food_state, 5 | 6) {
                    self.pending_states = VecDeque::from([1, 2, 4]);
                }
                String::new()
            }
            _ => String::new(),
        }
    }
}

impl SerialPort for SimulatedBoard {
    type Error = ();

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
        assert_eq!(bytes[0], b'$', "frames start with '$'");
        assert_eq!(&bytes[bytes.len() - 2..], b".\r", "frames end with '.' CR");
        let sequence = bytes[4] - b'0';
        let token = char::from(bytes[5]);
        let payload = String::from_utf8_lossy(&bytes[7..bytes.len() - 2]).into_owned();
        let declared: usize = std::str::from_utf8(&bytes[1..4])
            .expect("ascii length")
            .parse()
            .expect("numeric length");
        assert_eq!(declared, payload.len(), "declared length matches payload");

        self.frames.push(Frame {
            token,
            sequence,
            payload: payload.clone(),
        });
        if self.silent {
            return Ok(bytes.len());
        }

        let reply = self.respond(token, &payload);
        let frame = format!("${:03}{}{}1{}.", reply.len(), char::from(bytes[4]), token, reply);
        self.rx.extend(frame.bytes());
        Ok(bytes.len())
    }
}
