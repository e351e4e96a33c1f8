//! The Hub context: one explicit object owning the Device Link session, every
//! device subsystem and the cooperative scheduler that drives them.
//!
//! Scripts call the public operations to queue work and call [`Hub::run`]
//! between their own steps. Nothing blocks; `run` returns once its wall-clock
//! budget is spent.

use core::fmt;
use core::time::Duration;

use heapless::String;

use crate::capsense::{ResetReason, SensorMonitor, SensorMonitorConfig};
use crate::config_sync::{
    CONFIG_IDS, ConfigSync, ConfigSyncAction, ConfigSyncConfig, DlInitValues, queue_init_values,
};
use crate::indicator::{
    FaultAction, FaultClass, FaultMonitor, FaultPolicy, IndicatorLight, IndicatorState,
};
use crate::link::{
    CommandQueueProducer, DEFAULT_QUEUE_DEPTH, Exchange, LinkConfig, LinkError, LinkEvent,
    LinkSession,
};
use crate::protocol::reply::{
    parse_button_poll, parse_button_summary, parse_config_value, parse_diagnostics,
};
use crate::protocol::{
    Command, DecodeError, Diagnostics, FoodMachineState, FrameError, Lights, Payload, Token,
    command,
};
use crate::report::{REPORT_EVENT, Report, ReportSink};
use crate::telemetry::{HubEventKind, HubEventPayload, TelemetryInstant, TelemetryRecorder};
use crate::time::{Clock, HubInstant, exceeded};
use crate::touchpad::{DebounceConfig, Pad, Pads, TouchpadDebouncer};
use crate::transport::SerialPort;
use crate::tray::{PresentStatus, TraySession, TrayView};

/// Longest challenge id kept for reports.
pub const CHALLENGE_ID_CAPACITY: usize = 64;

const AMPLITUDE_MAX: u8 = 99;

/// Timing and tuning for a [`Hub`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HubConfig {
    /// Time the Device Link board needs after power-up before it accepts commands.
    pub boot_delay: Duration,
    /// Link processing time granted to the bring-up commands.
    pub bring_up_process: Duration,
    pub diagnostics_interval: Duration,
    pub buttons_interval: Duration,
    pub indicator_interval: Duration,
    /// How long a failed audio command keeps being replayed.
    pub audio_replay_window: Duration,
    /// Volume of the touch feedback samples.
    pub button_audio_amplitude: u8,
    pub link: LinkConfig,
    pub debounce: DebounceConfig,
    pub sensor: SensorMonitorConfig,
    pub config_sync: ConfigSyncConfig,
    /// Fault policies in [`FaultClass::ALL`] order.
    pub faults: [FaultPolicy; 3],
}

impl HubConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            boot_delay: Duration::from_millis(3_050),
            bring_up_process: Duration::from_millis(300),
            diagnostics_interval: Duration::from_millis(500),
            buttons_interval: Duration::from_millis(50),
            indicator_interval: Duration::from_secs(1),
            audio_replay_window: Duration::from_millis(280),
            button_audio_amplitude: 50,
            link: LinkConfig::new(),
            debounce: DebounceConfig::new(),
            sensor: SensorMonitorConfig::new(),
            config_sync: ConfigSyncConfig::new(),
            faults: [
                FaultPolicy::out_of_food(),
                FaultPolicy::platter_jam(),
                FaultPolicy::singulator_jam(),
            ],
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Contents of the error slot. Logged once by the scheduler and cleared.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HubError {
    QueueFull,
    MalformedReply(DecodeError),
    /// A public operation was given a value the wire format cannot carry.
    InvalidCommand(FrameError),
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<LinkError> for HubError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::QueueFull => HubError::QueueFull,
            LinkError::Frame(frame) => HubError::InvalidCommand(frame),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BringUp {
    WaitBoot,
    Send,
    Process,
}

#[derive(Copy, Clone, Debug)]
struct PollTimer<TInstant> {
    enabled: bool,
    interval: Duration,
    last: Option<TInstant>,
}

impl<TInstant: HubInstant> PollTimer<TInstant> {
    const fn new(interval: Duration) -> Self {
        Self {
            enabled: false,
            interval,
            last: None,
        }
    }

    fn due(&mut self, now: TInstant) -> bool {
        if !self.enabled || self.last.is_some_and(|last| !exceeded(now, last, self.interval)) {
            return false;
        }
        self.last = Some(now);
        true
    }
}

/// Script-controlled switches for lights and sound.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct OutputSettings {
    audio_enabled: bool,
    button_audio_muted: bool,
    max_audio_amplitude: u8,
    light_enabled: bool,
    max_light_amplitude: u8,
}

impl OutputSettings {
    const fn new() -> Self {
        Self {
            audio_enabled: true,
            button_audio_muted: false,
            max_audio_amplitude: AMPLITUDE_MAX,
            light_enabled: true,
            max_light_amplitude: AMPLITUDE_MAX,
        }
    }
}

/// Device Link engine context.
pub struct Hub<P, C, const DEPTH: usize = DEFAULT_QUEUE_DEPTH>
where
    P: SerialPort,
    C: Clock,
{
    config: HubConfig,
    port: P,
    clock: C,
    link: LinkSession<C::Instant, DEPTH>,
    created_at: C::Instant,

    ready: bool,
    bring_up: BringUp,
    bring_up_started: Option<C::Instant>,

    pads: TouchpadDebouncer<C::Instant>,
    sensor: SensorMonitor<C::Instant>,
    di_reset_locked: bool,
    faults: FaultMonitor<C::Instant>,
    indicator: IndicatorLight,
    config_sync: ConfigSync<C::Instant>,
    tray: TraySession<C::Instant>,

    diagnostics: Option<Diagnostics>,
    last_diag_at: Option<C::Instant>,

    diag_poll: PollTimer<C::Instant>,
    button_poll: PollTimer<C::Instant>,
    indicator_poll: PollTimer<C::Instant>,

    outputs: OutputSettings,
    audio_replay_started: Option<C::Instant>,

    last_error: Option<HubError>,
    challenge_id: String<CHALLENGE_ID_CAPACITY>,
    telemetry: TelemetryRecorder<C::Instant>,
}

impl<P, C, const DEPTH: usize> Hub<P, C, DEPTH>
where
    P: SerialPort,
    C: Clock,
{
    /// Creates a hub; the boot delay is measured from this call.
    pub fn new(port: P, clock: C, config: HubConfig) -> Self {
        let created_at = clock.now();
        Self {
            config,
            port,
            clock,
            link: LinkSession::new(config.link),
            created_at,
            ready: false,
            bring_up: BringUp::WaitBoot,
            bring_up_started: None,
            pads: TouchpadDebouncer::new(config.debounce),
            sensor: SensorMonitor::new(config.sensor),
            di_reset_locked: false,
            faults: FaultMonitor::new(config.faults),
            indicator: IndicatorLight::new(),
            config_sync: ConfigSync::new(config.config_sync, created_at),
            tray: TraySession::new(),
            diagnostics: None,
            last_diag_at: None,
            diag_poll: PollTimer::new(config.diagnostics_interval),
            button_poll: PollTimer::new(config.buttons_interval),
            indicator_poll: PollTimer::new(config.indicator_interval),
            outputs: OutputSettings::new(),
            audio_replay_started: None,
            last_error: None,
            challenge_id: String::new(),
            telemetry: TelemetryRecorder::new(),
        }
    }

    /// Resets the board, enables every poll, silences the speaker, switches
    /// the pad lights off and records the challenge id used in reports.
    pub fn initialize(&mut self, challenge_file: &str, build_tag: &str) {
        self.reset_di();
        self.set_poll_diagnostics(true);
        self.set_poll_buttons(true);
        self.set_poll_indicator(true);
        self.play_tone(0, 5, 10);
        self.set_lights(Lights::BUTTONS, 0, 0, 0);
        self.set_challenge_id(challenge_file, build_tag);
    }

    fn set_challenge_id(&mut self, challenge_file: &str, build_tag: &str) {
        let name = challenge_file
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(challenge_file);
        self.challenge_id.clear();
        let fits = self.challenge_id.push_str(name).is_ok()
            && self.challenge_id.push('#').is_ok()
            && self.challenge_id.push_str(build_tag).is_ok();
        if !fits {
            warn!("hub: challenge id truncated");
        }
    }

    #[must_use]
    pub fn challenge_id(&self) -> &str {
        &self.challenge_id
    }

    /// Runs the scheduler until `budget` has elapsed on the hub's clock.
    pub fn run(&mut self, budget: Duration) {
        let start = self.clock.now();
        loop {
            let now = self.clock.now();
            if now.saturating_duration_since(start) >= budget {
                break;
            }
            self.poll_once(now);
        }
    }

    /// One scheduler pass at `now`.
    pub fn poll_once(&mut self, now: C::Instant) {
        if self.ready {
            self.handle_di_reset(now);
            if !self.config_sync.is_done() {
                self.step_config_sync(now);
            }
            self.step_link(now);
            self.run_polls(now);
        } else {
            self.step_bring_up(now);
        }

        if let Some(err) = self.last_error.take() {
            error!("hub: {}", err);
        }
    }

    fn step_bring_up(&mut self, now: C::Instant) {
        match self.bring_up {
            BringUp::WaitBoot => {
                if exceeded(now, self.created_at, self.config.boot_delay) {
                    self.bring_up = BringUp::Send;
                }
            }
            BringUp::Send => {
                debug!("hub: sending bring-up commands");
                self.set_lights(Lights::ALL, 0, 0, 0);
                self.play_tone(1_000, 0, 2);
                self.retract_tray();
                self.bring_up_started = Some(now);
                self.bring_up = BringUp::Process;
            }
            BringUp::Process => {
                let started = *self.bring_up_started.get_or_insert(now);
                if exceeded(now, started, self.config.bring_up_process) {
                    info!("hub: device link ready");
                    self.bring_up = BringUp::WaitBoot;
                    self.ready = true;
                }
                self.step_link(now);
            }
        }
    }

    fn handle_di_reset(&mut self, now: C::Instant) {
        match self.sensor.needs_reset() {
            Some(reason) => {
                if self.sensor.should_send() && self.reset_di() {
                    self.sensor.mark_sent();
                    self.telemetry
                        .record(HubEventKind::DiReset, HubEventPayload::Reset(reason), now);
                }
            }
            None => {
                self.sensor.check_self_heal(now);
            }
        }
    }

    fn step_config_sync(&mut self, now: C::Instant) {
        if self.config_sync.poll(now, &mut self.link) == ConfigSyncAction::ResetBoard {
            self.reset_di();
        }
        if self.config_sync.is_done() {
            self.telemetry
                .record(HubEventKind::ConfigSynced, HubEventPayload::None, now);
        }
    }

    fn run_polls(&mut self, now: C::Instant) {
        if self.diag_poll.due(now) {
            self.enqueue_poll(Token::PollDiagnostics, &command::filler());
        }
        if self.button_poll.due(now) {
            self.enqueue_poll(Token::PollButtons, "");
        }
        if self.indicator_poll.due(now) {
            self.apply_indicator(now);
        }
    }

    fn enqueue_poll(&mut self, token: Token, payload: &str) {
        if self.link.contains(token) {
            trace!("hub: {} poll already queued", token);
            return;
        }
        if let Err(err) = self.link.enqueue(token, payload) {
            self.raise(err.into());
        }
    }

    fn apply_indicator(&mut self, now: C::Instant) {
        let desired = self.faults.desired();
        match self.indicator.apply(desired, &mut self.link) {
            Ok(true) => {
                self.telemetry.record(
                    HubEventKind::IndicatorChanged,
                    HubEventPayload::Indicator(desired),
                    now,
                );
            }
            Ok(false) => {}
            Err(err) => self.raise(err.into()),
        }
    }

    fn step_link(&mut self, now: C::Instant) {
        match self.link.step(&mut self.port, now) {
            LinkEvent::Completed(exchange) => self.dispatch(exchange, now),
            LinkEvent::Dropped(command) => {
                self.telemetry.record_command(
                    HubEventKind::CommandDropped,
                    command.token(),
                    command.sequence(),
                    self.config.link.max_retries,
                    now,
                );
                if command.token() == Token::ResetBoard {
                    self.sensor.mark_dropped();
                }
            }
            LinkEvent::ReceiveError(err) => self.malformed(err, now),
            LinkEvent::ListenTimeout => self.record_head(HubEventKind::ListenTimeout, now),
            LinkEvent::TransmitFailed => self.record_head(HubEventKind::TransmitFailed, now),
            LinkEvent::Idle | LinkEvent::Sent | LinkEvent::Listening | LinkEvent::Received => {}
        }
    }

    fn record_head(&mut self, kind: HubEventKind, now: C::Instant) {
        if let Some(head) = self.link.front() {
            self.telemetry.record_command(
                kind,
                head.token(),
                head.sequence(),
                self.link.retries(),
                now,
            );
        }
    }

    fn dispatch(&mut self, exchange: Exchange, now: C::Instant) {
        let Exchange { command, reply } = exchange;
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => return self.malformed(err, now),
        };
        if !reply.is_ok() {
            warn!("hub: {} reported failure", command.token());
        }

        let parsed = match reply.token() {
            Some(Token::PollButtons) => parse_button_poll(reply.payload()).map(|poll| {
                self.pads.update_readings(poll.baselines, poll.readings);
                self.on_touch_flags(poll.pressed, now);
                if let Some(pad) = self.sensor.update(self.pads.values(), now) {
                    warn!("hub: pad {} reads stuck", pad);
                }
            }),
            Some(Token::PollButtonSummary) => parse_button_summary(reply.payload())
                .map(|pressed| self.on_touch_flags(pressed, now)),
            Some(Token::PollDiagnostics) => {
                parse_diagnostics(reply.payload()).map(|diag| self.on_diagnostics(diag, now))
            }
            Some(Token::ResetBoard) => {
                debug!("hub: device board rebooted");
                self.sensor.acknowledge(now);
                Ok(())
            }
            Some(Token::GetConfig) => parse_config_value(reply.payload())
                .map(|(id, value)| self.config_sync.record(id, value)),
            Some(Token::PlayAudio) => {
                self.on_audio_reply(&command, reply.is_ok(), now);
                Ok(())
            }
            Some(token) => {
                trace!("hub: {} acknowledged", token);
                Ok(())
            }
            None => {
                warn!("hub: reply with unknown token {}", reply.token_byte());
                Ok(())
            }
        };

        if let Err(err) = parsed {
            self.malformed(err, now);
        }
    }

    fn malformed(&mut self, err: DecodeError, now: C::Instant) {
        self.raise(HubError::MalformedReply(err));
        self.telemetry
            .record(HubEventKind::ReplyError, HubEventPayload::Decode(err), now);
    }

    fn on_touch_flags(&mut self, pressed: [bool; 3], now: C::Instant) {
        let rising = self.pads.update(pressed, now);
        if rising.is_empty() {
            return;
        }
        self.telemetry.record_touch(rising.bits(), now);
        if self.button_audio_enabled() {
            for pad in rising.iter() {
                self.play_audio(pad.audio_sample(), self.config.button_audio_amplitude);
            }
        }
    }

    fn on_diagnostics(&mut self, diag: Diagnostics, now: C::Instant) {
        self.diagnostics = Some(diag);
        self.last_diag_at = Some(now);
        if self.faults.observe(diag.state, now) == FaultAction::ResetFoodMachine {
            self.reset_food_machine();
        }
    }

    fn on_audio_reply(&mut self, command: &Command, played: bool, now: C::Instant) {
        if played {
            self.audio_replay_started = None;
            return;
        }
        let started = *self.audio_replay_started.get_or_insert(now);
        if exceeded(now, started, self.config.audio_replay_window) {
            warn!("hub: audio did not play, giving up");
            self.audio_replay_started = None;
            return;
        }
        error!("hub: audio did not play, replaying");
        if let Err(err) = self.link.enqueue(Token::PlayAudio, command.payload()) {
            self.raise(err.into());
        }
    }

    fn raise(&mut self, err: HubError) {
        if let Some(previous) = self.last_error.replace(err) {
            error!("hub: {}", previous);
        }
    }

    fn submit(&mut self, token: Token, payload: Result<Payload, FrameError>) -> bool {
        let queued = payload
            .map_err(LinkError::from)
            .and_then(|payload| self.link.enqueue(token, &payload));
        match queued {
            Ok(()) => true,
            Err(err) => {
                self.raise(err.into());
                false
            }
        }
    }

    // Lights.

    /// Two-tone lights with slew. Colour levels are scaled by the maximum light amplitude.
    pub fn set_lights(&mut self, lights: Lights, yellow: u8, blue: u8, slew: u8) -> bool {
        if !self.outputs.light_enabled {
            return false;
        }
        let max = self.outputs.max_light_amplitude;
        let payload = command::lights_slew(
            lights,
            command::scale_amplitude(yellow, max),
            command::scale_amplitude(blue, max),
            slew,
        );
        self.submit(Token::SetLights, payload)
    }

    pub fn set_lights_rgb(
        &mut self,
        lights: Lights,
        red: u8,
        green: u8,
        blue: u8,
        slew: u8,
    ) -> bool {
        if !self.outputs.light_enabled {
            return false;
        }
        let max = self.outputs.max_light_amplitude;
        let payload = command::lights_rgb_slew(
            lights,
            command::scale_amplitude(red, max),
            command::scale_amplitude(green, max),
            command::scale_amplitude(blue, max),
            slew,
        );
        self.submit(Token::SetLightsRgb, payload)
    }

    /// Flashing two-tone lights; `period` and `on` are in hundredths of a second.
    pub fn set_lights_flash(
        &mut self,
        lights: Lights,
        yellow: u8,
        blue: u8,
        period: u8,
        on: u8,
    ) -> bool {
        if !self.outputs.light_enabled {
            return false;
        }
        let max = self.outputs.max_light_amplitude;
        let payload = command::lights_flash(
            lights,
            command::scale_amplitude(yellow, max),
            command::scale_amplitude(blue, max),
            period,
            on,
        );
        self.submit(Token::FlashLights, payload)
    }

    pub fn set_lights_rgb_flash(
        &mut self,
        lights: Lights,
        red: u8,
        green: u8,
        blue: u8,
        period: u8,
        on: u8,
    ) -> bool {
        if !self.outputs.light_enabled {
            return false;
        }
        let max = self.outputs.max_light_amplitude;
        let payload = command::lights_rgb_flash(
            lights,
            command::scale_amplitude(red, max),
            command::scale_amplitude(green, max),
            command::scale_amplitude(blue, max),
            period,
            on,
        );
        self.submit(Token::FlashLightsRgb, payload)
    }

    /// Flashes `count` pad lights picked by shuffling the pads with `entropy`.
    /// Returns the lit mask, or [`Lights::NONE`] when nothing was queued.
    pub fn set_random_button_lights(
        &mut self,
        count: u8,
        yellow: u8,
        blue: u8,
        period: u8,
        on: u8,
        entropy: u32,
    ) -> Lights {
        let mut order = [Lights::LEFT, Lights::MIDDLE, Lights::RIGHT];
        let mut seed = usize::try_from(entropy).unwrap_or(usize::MAX);
        for slot in (1..order.len()).rev() {
            order.swap(slot, seed % (slot + 1));
            seed /= slot + 1;
        }

        let mask = order
            .into_iter()
            .take(usize::from(count))
            .fold(Lights::NONE, |acc, light| acc | light);
        if mask.is_empty() || !self.set_lights_flash(mask, yellow, blue, period, on) {
            return Lights::NONE;
        }
        mask
    }

    pub fn set_light_enabled(&mut self, enabled: bool) {
        self.outputs.light_enabled = enabled;
    }

    pub fn set_max_light_amplitude(&mut self, max: u8) {
        self.outputs.max_light_amplitude = max.min(AMPLITUDE_MAX);
    }

    // Audio.

    /// Plays one of the board's samples (see [`command::sample`]).
    pub fn play_audio(&mut self, sample: u8, volume: u8) -> bool {
        if !self.outputs.audio_enabled {
            return false;
        }
        let volume = command::scale_amplitude(volume, self.outputs.max_audio_amplitude);
        self.submit(Token::PlayAudio, command::audio(sample, volume))
    }

    /// Plays a tone; a zero frequency silences the speaker.
    pub fn play_tone(&mut self, frequency: u32, volume: u8, slew: u8) -> bool {
        if !self.outputs.audio_enabled {
            return false;
        }
        let volume = command::scale_amplitude(volume, self.outputs.max_audio_amplitude);
        self.submit(Token::PlayTone, command::tone(frequency, volume, slew))
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.outputs.audio_enabled = enabled;
    }

    /// Mutes or unmutes touch feedback. Feedback also stays off while any
    /// fault is shown on the indicator.
    pub fn set_button_audio_enabled(&mut self, enabled: bool) {
        self.outputs.button_audio_muted = !enabled;
    }

    #[must_use]
    pub fn button_audio_enabled(&self) -> bool {
        !self.outputs.button_audio_muted && self.faults.desired() == IndicatorState::Normal
    }

    pub fn set_max_audio_amplitude(&mut self, max: u8) {
        self.outputs.max_audio_amplitude = max.min(AMPLITUDE_MAX);
    }

    // Tray.

    /// Presents the tray for `deciseconds`; `0` leaves it out until retracted.
    pub fn present_foodtreat(&mut self, deciseconds: u8) -> bool {
        self.submit(Token::PresentTray, command::present(deciseconds))
    }

    pub fn retract_tray(&mut self) -> bool {
        self.submit(Token::RetractTray, Ok(command::filler()))
    }

    /// Asks an indefinite presentation in progress to retract.
    pub fn close_tray(&mut self) {
        self.tray.close();
    }

    /// Presents food and reports whether it was eaten. Call repeatedly, with
    /// [`Hub::run`] in between, until the result is terminal.
    pub fn present_and_check_foodtreat(&mut self, duration_ms: u32) -> PresentStatus {
        let now = self.clock.now();
        let Some(diag) = self.diagnostics else {
            return PresentStatus::Pending(self.tray.phase());
        };
        let view = TrayView {
            state: diag.state,
            last_diag_at: self.last_diag_at,
            treat_taken: diag.treat_taken(),
        };

        let overdue = self.tray.is_return_overdue();
        let status = self.tray.poll(&view, duration_ms, now, &mut self.link);
        if self.tray.needs_reset() && self.reset_food_machine() {
            self.tray.reset_sent();
        }
        if !overdue && self.tray.is_return_overdue() {
            self.telemetry.record(
                HubEventKind::TrayReturnOverdue,
                HubEventPayload::Tray(status),
                now,
            );
        }
        if status.is_terminal() {
            self.telemetry
                .record(HubEventKind::TrayResult, HubEventPayload::Tray(status), now);
        }
        status
    }

    // Touchpads.

    /// Signal strength of a pad from the latest full poll.
    #[must_use]
    pub fn button_value(&self, pad: Pad) -> i32 {
        self.pads.value(pad)
    }

    #[must_use]
    pub fn any_button_pressed(&self) -> Pads {
        self.pads.pressed()
    }

    #[must_use]
    pub fn is_button_pressed(&self, mask: Pads) -> bool {
        self.pads.is_pressed(mask)
    }

    /// Pads touched at any point within `window` before now.
    #[must_use]
    pub fn any_button_supra_threshold_in_window(&self, window: Duration) -> Pads {
        self.pads.touched_within(self.clock.now(), window)
    }

    #[must_use]
    pub fn was_button_supra_threshold_in_window(&self, mask: Pads, window: Duration) -> bool {
        self.any_button_supra_threshold_in_window(window)
            .intersects(mask)
    }

    // Device state.

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Food machine state from the latest diagnostics, if any arrived yet.
    #[must_use]
    pub fn food_machine_state(&self) -> Option<FoodMachineState> {
        self.diagnostics.map(|diag| diag.state)
    }

    #[must_use]
    pub const fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_ref()
    }

    /// Dome state: `None` until the first diagnostics reply.
    #[must_use]
    pub fn dome_open(&self) -> Option<bool> {
        self.diagnostics.map(|diag| diag.dome_open)
    }

    #[must_use]
    pub fn is_dome_removed(&self) -> bool {
        self.dome_open() == Some(true)
    }

    #[must_use]
    pub fn is_out_of_food(&self) -> bool {
        self.faults.is_active(FaultClass::OutOfFood)
    }

    #[must_use]
    pub fn is_singulator_error(&self) -> bool {
        self.faults.is_active(FaultClass::SingulatorJam)
    }

    /// Indicator state the current faults call for.
    #[must_use]
    pub fn indicator_state(&self) -> IndicatorState {
        self.faults.desired()
    }

    #[must_use]
    pub fn needs_di_reset(&self) -> bool {
        self.sensor.needs_reset().is_some()
    }

    /// Schedules a board reset; it is sent once the reset lock is released.
    pub fn request_di_reset(&mut self) {
        self.sensor.request();
    }

    /// While locked the engine never queues a board reset.
    pub fn set_di_reset_lock(&mut self, locked: bool) {
        self.di_reset_locked = locked;
    }

    /// Queues a board reset and re-runs bring-up. Refused while locked.
    pub fn reset_di(&mut self) -> bool {
        if self.di_reset_locked {
            debug!("hub: board reset refused, lock held");
            return false;
        }
        if self.submit(Token::ResetBoard, Ok(Payload::new())) {
            info!("hub: resetting device board");
            self.ready = false;
            self.bring_up = BringUp::WaitBoot;
            true
        } else {
            false
        }
    }

    pub fn reset_food_machine(&mut self) -> bool {
        let queued = self.submit(Token::ResetFoodMachine, Ok(Payload::new()));
        if queued {
            let now = self.clock.now();
            self.telemetry
                .record(HubEventKind::FoodMachineReset, HubEventPayload::None, now);
        }
        queued
    }

    pub fn get_config_value(&mut self, id: u8) -> bool {
        self.submit(Token::GetConfig, command::config_get(id))
    }

    pub fn set_config_value(&mut self, id: u8, value: u32) -> bool {
        self.submit(Token::SetConfig, command::config_set(id, value))
    }

    /// Requests every tunable; replies land in [`Hub::dl_init_values`].
    pub fn get_dl_init_values(&mut self) -> bool {
        CONFIG_IDS
            .into_iter()
            .fold(true, |all, id| self.get_config_value(id) && all)
    }

    /// Last values read back from the board.
    #[must_use]
    pub const fn dl_init_values(&self) -> &DlInitValues {
        self.config_sync.fetched()
    }

    /// Writes new tunables and resets the board so they take effect.
    pub fn set_dl_init_values(
        &mut self,
        thresholds: [u32; 3],
        tray_speed: u32,
        tray_current_threshold: u32,
        foodtreat_tx_power_level: u32,
        foodtreat_detect_threshold: u32,
    ) -> bool {
        let values = match DlInitValues::from_settings(
            thresholds,
            tray_speed,
            tray_current_threshold,
            foodtreat_tx_power_level,
            foodtreat_detect_threshold,
        ) {
            Ok(values) => values,
            Err(err) => {
                warn!("hub: rejected init values: {}", err);
                return false;
            }
        };
        if self.link.free_slots() < CONFIG_IDS.len() {
            self.raise(LinkError::QueueFull.into());
            return false;
        }
        let mut written = 0;
        if let Err(err) = queue_init_values(&values, &mut self.link, &mut written) {
            self.raise(err.into());
            return false;
        }
        self.reset_di();
        true
    }

    pub fn set_poll_diagnostics(&mut self, enabled: bool) {
        self.diag_poll.enabled = enabled;
    }

    pub fn set_poll_buttons(&mut self, enabled: bool) {
        self.button_poll.enabled = enabled;
    }

    pub fn set_poll_indicator(&mut self, enabled: bool) {
        self.indicator_poll.enabled = enabled;
    }

    // Reports.

    /// Renders `report` and publishes it. Returns `false` when it does not
    /// fit or the sink refuses it.
    pub fn report<S: ReportSink>(&self, report: &Report<'_>, timestamp: u32, sink: &mut S) -> bool {
        match report.render(&self.challenge_id, timestamp) {
            Ok(json) => sink.publish(REPORT_EVENT, &json),
            Err(err) => {
                warn!("hub: report not sent: {}", err);
                false
            }
        }
    }

    // Introspection.

    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    #[must_use]
    pub const fn link(&self) -> &LinkSession<C::Instant, DEPTH> {
        &self.link
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<C::Instant> {
        &self.telemetry
    }

    #[must_use]
    pub const fn config_sync(&self) -> &ConfigSync<C::Instant> {
        &self.config_sync
    }

    #[must_use]
    pub const fn reset_reason(&self) -> Option<ResetReason> {
        self.sensor.needs_reset()
    }

    #[must_use]
    pub const fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Current instant on the hub's clock.
    #[must_use]
    pub fn now(&self) -> C::Instant {
        self.clock.now()
    }
}
