use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use hub_core::interaction::{EatTheFood, EatTheFoodConfig};
use hub_core::protocol::{FoodMachineState, Lights};
use hub_core::report::ReportSink;
use hub_core::touchpad::Pad;
use hub_core::tray::PresentStatus;
use hub_core::{Hub, HubConfig, Millis};

use crate::board::{BoardProfile, Direction, SimulatedBoard, WireFrame};
use crate::clock::VirtualClock;

const SLICE: Duration = Duration::from_millis(20);
const BOOT: Duration = Duration::from_millis(3_400);
const PRESENT_LIMIT: Duration = Duration::from_secs(240);
const UNAVAILABLE_LIMIT: Duration = Duration::from_secs(3);
const DEFAULT_HOLD: Duration = Duration::from_millis(150);
const CHALLENGE_FILE: &str = "emulator/000_EatingTheFood";
const WALL_CLOCK_EPOCH: u32 = 1_700_000_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("run", "run <ms>                      - let the hub run on virtual time"),
    ("status", "status                        - show hub and board state"),
    ("present", "present <ms>                  - present a treat and wait for the result"),
    ("play", "play                          - run one eat-the-food interaction"),
    ("touch", "touch <left|middle|right> [ms] - touch a pad"),
    ("drift", "drift <pad> <amount>          - lower a pad reading without a touch"),
    ("lights", "lights <mask> <yellow> <blue> - set lights (left|middle|right|cue|buttons|all)"),
    ("jam", "jam | clear                   - jam the singulator or clear it"),
    ("dome", "dome <open|closed>            - lift or replace the dome"),
    ("reset", "reset                         - reset the device board"),
    ("verbose", "verbose <on|off>              - log poll traffic in the transcript"),
    ("help", "help [topic]                  - show help for a command"),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Treat,
    Touch,
    Jam,
}

impl TranscriptProfile {
    #[must_use]
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Treat => "transcripts/emulator-treat.log",
            TranscriptProfile::Touch => "transcripts/emulator-touch.log",
            TranscriptProfile::Jam => "transcripts/emulator-jam.log",
        }
    }

    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Treat => "Hub emulator treat transcript",
            TranscriptProfile::Touch => "Hub emulator touchpad transcript",
            TranscriptProfile::Jam => "Hub emulator jam transcript",
        }
    }

    #[must_use]
    pub fn board_profile(self) -> BoardProfile {
        BoardProfile {
            eats: true,
            stuck_jam: self == TranscriptProfile::Jam,
        }
    }

    /// Looks a profile up by its command-line tag, ignoring case.
    ///
    /// # Errors
    ///
    /// Describes the tag when it names no profile.
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("treat") {
            Ok(Self::Treat)
        } else if tag.eq_ignore_ascii_case("touch") {
            Ok(Self::Touch)
        } else if tag.eq_ignore_ascii_case("jam") {
            Ok(Self::Jam)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

/// Collects published reports until the session prints them.
#[derive(Default)]
struct ReportLog {
    pending: Vec<String>,
}

impl ReportSink for ReportLog {
    fn publish(&mut self, event: &str, payload: &str) -> bool {
        self.pending.push(format!("{event} {payload}"));
        true
    }
}

pub struct Session {
    hub: Hub<SimulatedBoard, VirtualClock>,
    clock: VirtualClock,
    game: EatTheFood<Millis>,
    reports: ReportLog,
    transcript: TranscriptLogger,
    show_polls: bool,
}

impl Session {
    /// Boots a hub against a fresh simulated board and opens the profile's transcript.
    ///
    /// # Errors
    ///
    /// Fails when the transcript cannot be created or written.
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        let clock = VirtualClock::new();
        let board = SimulatedBoard::new(clock.clone(), profile.board_profile());
        let mut hub = Hub::new(board, clock.clone(), HubConfig::new());
        hub.initialize(CHALLENGE_FILE, env!("CARGO_PKG_VERSION"));

        let mut session = Self {
            hub,
            clock,
            game: EatTheFood::new(EatTheFoodConfig::new()),
            reports: ReportLog::default(),
            transcript,
            show_polls: false,
        };
        session.advance(BOOT)?;
        let line = format!("hub ready={} challenge={}", session.hub.is_ready(), session.hub.challenge_id());
        session.record_output(&[line])?;
        Ok(session)
    }

    /// Virtual milliseconds since the board powered up.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    /// Executes one command line and returns the lines to show the user.
    ///
    /// # Errors
    ///
    /// Fails when the transcript cannot be written.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.clock.elapsed_ms();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let lines = match (verb.as_str(), args.as_slice()) {
            ("help", []) => help_lines(None),
            ("help", [topic]) => help_lines(Some(*topic)),
            ("run", [ms]) => match parse_millis(ms) {
                Some(duration) => {
                    self.advance(duration)?;
                    vec![format!("OK ran {}ms", duration.as_millis())]
                }
                None => vec![format!("ERR syntax bad duration `{ms}`")],
            },
            ("status", []) => self.status_lines(),
            ("present", [ms]) => match ms.parse::<u32>() {
                Ok(duration_ms) => self.present(duration_ms)?,
                Err(_) => vec![format!("ERR syntax bad duration `{ms}`")],
            },
            ("play", []) => self.play()?,
            ("touch", [pad]) => self.touch(pad, DEFAULT_HOLD)?,
            ("touch", [pad, ms]) => match parse_millis(ms) {
                Some(hold) => self.touch(pad, hold)?,
                None => vec![format!("ERR syntax bad duration `{ms}`")],
            },
            ("lights", [mask, yellow, blue]) => {
                match (parse_lights(mask), yellow.parse::<u8>(), blue.parse::<u8>()) {
                    (Some(lights), Ok(yellow), Ok(blue)) => {
                        if self.hub.set_lights(lights, yellow, blue, 0) {
                            self.advance(SLICE)?;
                            vec![format!("OK lights {mask} yellow={yellow} blue={blue}")]
                        } else {
                            vec!["ERR lights not queued".to_string()]
                        }
                    }
                    _ => vec!["ERR syntax lights <mask> <yellow> <blue>".to_string()],
                }
            }
            ("reset", []) => {
                if self.hub.reset_di() {
                    self.advance(BOOT)?;
                    vec![format!("OK board reset ready={}", self.hub.is_ready())]
                } else {
                    vec!["ERR reset refused".to_string()]
                }
            }
            ("verbose", [flag]) => match *flag {
                "on" => {
                    self.show_polls = true;
                    vec!["OK verbose on".to_string()]
                }
                "off" => {
                    self.show_polls = false;
                    vec!["OK verbose off".to_string()]
                }
                other => vec![format!("ERR syntax verbose `{other}`")],
            },
            _ => self
                .board_command(&verb, &args)
                .unwrap_or_else(|| vec![format!("ERR syntax unknown command `{trimmed}`")]),
        };

        self.record_output(&lines)?;
        Ok(lines)
    }

    /// Commands that act on the simulated board rather than the hub.
    fn board_command(&mut self, verb: &str, args: &[&str]) -> Option<Vec<String>> {
        let lines = match (verb, args) {
            ("drift", [pad, amount]) => match (parse_pad(pad), amount.parse::<u16>()) {
                (Some(pad), Ok(amount)) => {
                    self.hub.port_mut().set_drift(pad, amount);
                    vec![format!("OK drift {pad:?} -{amount}")]
                }
                _ => vec!["ERR syntax drift <pad> <amount>".to_string()],
            },
            ("jam", []) => {
                let board = self.hub.port_mut();
                board.profile_mut().stuck_jam = true;
                board.force_state(FoodMachineState::SingulatorError);
                vec!["OK singulator jammed".to_string()]
            }
            ("clear", []) => {
                let board = self.hub.port_mut();
                board.profile_mut().stuck_jam = false;
                board.force_state(FoodMachineState::Idle);
                vec!["OK food machine cleared".to_string()]
            }
            ("dome", [state]) => match *state {
                "open" => {
                    self.hub.port_mut().set_dome_open(true);
                    vec!["OK dome open".to_string()]
                }
                "closed" => {
                    self.hub.port_mut().set_dome_open(false);
                    vec!["OK dome closed".to_string()]
                }
                other => vec![format!("ERR syntax dome `{other}`")],
            },
            _ => return None,
        };
        Some(lines)
    }

    /// Runs the hub in short slices so wire traffic is logged close to when it happened.
    fn advance(&mut self, duration: Duration) -> io::Result<()> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let slice = remaining.min(SLICE);
            self.hub.run(slice);
            remaining -= slice;
            self.flush_wire()?;
        }
        Ok(())
    }

    fn flush_wire(&mut self) -> io::Result<()> {
        for frame in self.hub.port_mut().drain_wire() {
            if !self.show_polls && matches!(frame.token, 'B' | 'G' | 'Z') {
                continue;
            }
            self.transcript.append_frame(&frame)?;
        }
        Ok(())
    }

    fn present(&mut self, duration_ms: u32) -> io::Result<Vec<String>> {
        let started = self.clock.elapsed_ms();
        let mut unavailable_since = None;
        loop {
            let status = self.hub.present_and_check_foodtreat(duration_ms);
            let now = self.clock.elapsed_ms();
            match status {
                PresentStatus::Taken | PresentStatus::NotTaken => {
                    return Ok(vec![format!(
                        "OK present result={} code={} after={}ms",
                        if status == PresentStatus::Taken { "taken" } else { "not-taken" },
                        status.code(),
                        now - started
                    )]);
                }
                PresentStatus::Unavailable => {
                    let since = *unavailable_since.get_or_insert(now);
                    if Duration::from_millis(now - since) > UNAVAILABLE_LIMIT {
                        return Ok(vec![format!(
                            "ERR present unavailable state={:?}",
                            self.hub.food_machine_state()
                        )]);
                    }
                }
                PresentStatus::Pending(_) => unavailable_since = None,
            }
            if Duration::from_millis(now - started) > PRESENT_LIMIT {
                return Ok(vec![format!("ERR present timeout status={status:?}")]);
            }
            self.advance(SLICE)?;
        }
    }

    fn play(&mut self) -> io::Result<Vec<String>> {
        let started = self.clock.elapsed_ms();
        loop {
            self.advance(SLICE)?;
            let wall_time = WALL_CLOCK_EPOCH
                .saturating_add(u32::try_from(self.clock.elapsed_ms() / 1_000).unwrap_or(u32::MAX));
            if let Some(outcome) = self.game.step(&mut self.hub, &mut self.reports, wall_time) {
                let mut lines = vec![format!(
                    "OK play level={} eaten={} duration={}ms reported={} next-level={}{}",
                    outcome.level,
                    u8::from(outcome.eaten),
                    outcome.duration.as_millis(),
                    u8::from(outcome.reported),
                    self.game.level(),
                    if outcome.challenge_complete { " challenge-complete" } else { "" },
                )];
                lines.extend(self.reports.pending.drain(..).map(|report| format!("REPORT {report}")));
                return Ok(lines);
            }
            if Duration::from_millis(self.clock.elapsed_ms() - started) > PRESENT_LIMIT {
                return Ok(vec!["ERR play did not finish".to_string()]);
            }
        }
    }

    fn touch(&mut self, pad: &str, hold: Duration) -> io::Result<Vec<String>> {
        let Some(pad) = parse_pad(pad) else {
            return Ok(vec![format!("ERR syntax unknown pad `{pad}`")]);
        };
        self.hub.port_mut().set_touch(pad, true);
        self.advance(hold)?;
        let pressed = self.hub.is_button_pressed(pad.into());
        let value = self.hub.button_value(pad);
        self.hub.port_mut().set_touch(pad, false);
        self.advance(DEFAULT_HOLD)?;
        Ok(vec![format!(
            "OK touch {pad:?} held={}ms pressed={} value={value}",
            hold.as_millis(),
            u8::from(pressed)
        )])
    }

    fn status_lines(&self) -> Vec<String> {
        let hub = &self.hub;
        let board = hub.port();
        vec![
            format!(
                "OK status ready={} state={:?} indicator={:?} dome-removed={} pressed={:03b}",
                u8::from(hub.is_ready()),
                hub.food_machine_state(),
                hub.indicator_state(),
                u8::from(hub.is_dome_removed()),
                hub.any_button_pressed().bits(),
            ),
            format!(
                "queue={} config-sync={:?} reset-pending={:?} events={} level={}",
                hub.link().iter().count(),
                hub.config_sync().phase(),
                hub.reset_reason(),
                hub.telemetry().len(),
                self.game.level(),
            ),
            format!(
                "board state={:?} resets={} tray-pwm={:?}",
                board.state(),
                board.resets(),
                board.config().get(11),
            ),
        ]
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.clock.elapsed_ms();
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn parse_millis(text: &str) -> Option<Duration> {
    text.trim_end_matches("ms").parse().ok().map(Duration::from_millis)
}

fn parse_pad(text: &str) -> Option<Pad> {
    match text.to_ascii_lowercase().as_str() {
        "left" | "l" => Some(Pad::Left),
        "middle" | "m" => Some(Pad::Middle),
        "right" | "r" => Some(Pad::Right),
        _ => None,
    }
}

fn parse_lights(text: &str) -> Option<Lights> {
    match text.to_ascii_lowercase().as_str() {
        "left" => Some(Lights::LEFT),
        "middle" => Some(Lights::MIDDLE),
        "right" => Some(Lights::RIGHT),
        "cue" => Some(Lights::CUE),
        "buttons" => Some(Lights::BUTTONS),
        "all" => Some(Lights::ALL),
        _ => None,
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are virtual milliseconds since power-up"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, elapsed_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed_ms,
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }

    fn append_frame(&mut self, frame: &WireFrame) -> io::Result<()> {
        let role = match frame.direction {
            Direction::ToBoard => TranscriptRole::HubToBoard,
            Direction::FromBoard => TranscriptRole::BoardToHub,
        };
        self.append_line(frame.at_ms, role, &frame.text)
    }
}

enum TranscriptRole {
    Host,
    Emulator,
    HubToBoard,
    BoardToHub,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
            TranscriptRole::HubToBoard => "DL>  ",
            TranscriptRole::BoardToHub => "DL<  ",
        }
    }
}
