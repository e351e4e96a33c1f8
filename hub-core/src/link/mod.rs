//! Send/receive/process state machine for the Device Link.
//!
//! The session owns the outgoing command queue and the inbound reply buffer.
//! Each [`LinkSession::step`] performs exactly one transition, so the caller
//! decides how much time is spent on the link per scheduling pass.
//!
//! The Device Link answers strictly in order and carries no request id: the
//! reply read after transmitting the queue head is taken to belong to that
//! head. [`Exchange::is_correlated`] lets callers check the token matches.

use core::{fmt, time::Duration};

use heapless::{Deque, Vec};

use crate::protocol::{
    Command, DecodeError, FrameError, MAX_COMMAND_FRAME_LEN, MAX_REPLY_LEN, Reply,
    ReplyAccumulator, SequenceCounter, Token, decode,
};
use crate::time::{HubInstant, exceeded};
use crate::transport::SerialPort;

/// Default number of commands the queue can hold.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Timing and retry limits for the session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkConfig {
    /// How long to wait for a complete reply after transmitting.
    pub listen_timeout: Duration,
    /// Failed attempts after which the head command is dropped.
    pub max_retries: u8,
}

impl LinkConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            listen_timeout: Duration::from_millis(20),
            max_retries: 3,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Session state between steps.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    BeforeSend,
    AfterSendBeforeReceive,
    AfterReceiveBeforeProcess,
}

/// Error surfaced when a command cannot be queued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Queue has reached its maximum capacity.
    QueueFull,
    /// The payload cannot be framed.
    Frame(FrameError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<FrameError> for LinkError {
    fn from(value: FrameError) -> Self {
        LinkError::Frame(value)
    }
}

/// A processed command together with the reply read for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Exchange {
    pub command: Command,
    pub reply: Result<Reply, DecodeError>,
}

impl Exchange {
    /// True when the reply decoded and echoes the command's token.
    #[must_use]
    pub fn is_correlated(&self) -> bool {
        self.reply
            .as_ref()
            .is_ok_and(|reply| reply.token_byte() == self.command.token().to_byte())
    }
}

/// Outcome of a single [`LinkSession::step`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    /// Nothing queued.
    Idle,
    /// Head command transmitted; listening for its reply.
    Sent,
    /// Still waiting for the reply terminator.
    Listening,
    /// A complete reply frame was buffered.
    Received,
    /// The reply buffer overflowed; the partial frame was discarded.
    ReceiveError(DecodeError),
    /// Transmitting the head failed and will be retried.
    TransmitFailed,
    /// No reply arrived in time; the head will be resent.
    ListenTimeout,
    /// Head command processed and removed from the queue.
    Completed(Exchange),
    /// Head command removed after exhausting its retries.
    Dropped(Command),
}

/// Trait implemented by queues that accept commands for the Device Link.
pub trait CommandQueueProducer {
    /// Formats a command with the next sequence number and appends it.
    ///
    /// # Errors
    ///
    /// [`LinkError::QueueFull`] when no slot is free and
    /// [`LinkError::Frame`] when the payload cannot be stored.
    fn try_enqueue(&mut self, token: Token, payload: &str) -> Result<(), LinkError>;

    /// Returns `true` when a command with `token` is waiting or in flight.
    fn contains(&self, token: Token) -> bool;
}

/// Command queue plus the send/listen/process state machine.
pub struct LinkSession<TInstant, const DEPTH: usize = DEFAULT_QUEUE_DEPTH> {
    config: LinkConfig,
    queue: Deque<Command, DEPTH>,
    state: LinkState,
    retries: u8,
    listen_started: Option<TInstant>,
    accumulator: ReplyAccumulator,
    pending: Option<Vec<u8, MAX_REPLY_LEN>>,
    sequence: SequenceCounter,
}

impl<TInstant, const DEPTH: usize> LinkSession<TInstant, DEPTH>
where
    TInstant: HubInstant,
{
    #[must_use]
    pub const fn new(config: LinkConfig) -> Self {
        Self {
            config,
            queue: Deque::new(),
            state: LinkState::BeforeSend,
            retries: 0,
            listen_started: None,
            accumulator: ReplyAccumulator::new(),
            pending: None,
            sequence: SequenceCounter::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Failed attempts recorded against the current head.
    #[must_use]
    pub const fn retries(&self) -> u8 {
        self.retries
    }

    /// Command at the head of the queue, the one sent next or in flight.
    #[must_use]
    pub fn front(&self) -> Option<&Command> {
        self.queue.front()
    }

    /// Iterates queued commands in send order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter()
    }

    /// Slots left before [`LinkError::QueueFull`].
    #[must_use]
    pub fn free_slots(&self) -> usize {
        DEPTH - self.queue.len()
    }

    /// Appends a command to the queue.
    ///
    /// # Errors
    ///
    /// See [`CommandQueueProducer::try_enqueue`].
    pub fn enqueue(&mut self, token: Token, payload: &str) -> Result<(), LinkError> {
        if self.queue.is_full() {
            return Err(LinkError::QueueFull);
        }
        let command = Command::new(token, self.sequence.advance(), payload)?;
        trace!("link: queued {} seq {}", token, command.sequence());
        self.queue
            .push_back(command)
            .map_err(|_| LinkError::QueueFull)
    }

    /// Advances the state machine by one transition.
    pub fn step<P: SerialPort>(&mut self, port: &mut P, now: TInstant) -> LinkEvent {
        let event = match self.state {
            LinkState::BeforeSend => self.send_head(port, now),
            LinkState::AfterSendBeforeReceive => self.receive(port, now),
            LinkState::AfterReceiveBeforeProcess => self.process(),
        };

        if self.retries >= self.config.max_retries {
            self.retries = 0;
            self.state = LinkState::BeforeSend;
            if let Some(command) = self.queue.pop_front() {
                warn!(
                    "link: dropping {} seq {} after max retries",
                    command.token(),
                    command.sequence()
                );
                return LinkEvent::Dropped(command);
            }
        }

        event
    }

    fn send_head<P: SerialPort>(&mut self, port: &mut P, now: TInstant) -> LinkEvent {
        let Some(head) = self.queue.front() else {
            return LinkEvent::Idle;
        };

        let mut frame = [0u8; MAX_COMMAND_FRAME_LEN];
        let sent = match head.encode(&mut frame) {
            Ok(len) => {
                port.write(&frame[..len]).is_ok_and(|written| written == len)
                    && port.flush().is_ok()
            }
            Err(_) => false,
        };

        if sent {
            self.state = LinkState::AfterSendBeforeReceive;
            self.listen_started = Some(now);
            self.accumulator.reset();
            LinkEvent::Sent
        } else {
            error!("link: sending {} failed", head.token());
            self.retries = self.retries.saturating_add(1);
            LinkEvent::TransmitFailed
        }
    }

    fn receive<P: SerialPort>(&mut self, port: &mut P, now: TInstant) -> LinkEvent {
        while let Some(byte) = port.read_byte() {
            match self.accumulator.push(byte) {
                Ok(true) => {
                    self.pending = Some(self.accumulator.take_frame());
                    self.state = LinkState::AfterReceiveBeforeProcess;
                    return LinkEvent::Received;
                }
                Ok(false) => {}
                Err(err) => return LinkEvent::ReceiveError(err),
            }
        }

        let started = self.listen_started.unwrap_or(now);
        if exceeded(now, started, self.config.listen_timeout) {
            debug!("link: listen timed out with {} bytes", self.accumulator.len());
            self.retries = self.retries.saturating_add(1);
            self.state = LinkState::BeforeSend;
            self.accumulator.reset();
            return LinkEvent::ListenTimeout;
        }

        LinkEvent::Listening
    }

    fn process(&mut self) -> LinkEvent {
        let frame = self.pending.take();
        self.retries = 0;
        self.state = LinkState::BeforeSend;

        let Some(command) = self.queue.pop_front() else {
            return LinkEvent::Idle;
        };
        let reply = frame.map_or(Err(DecodeError::TooShort), |bytes| decode(&bytes));
        let exchange = Exchange { command, reply };
        if exchange.reply.is_ok() && !exchange.is_correlated() {
            warn!(
                "link: reply token does not match {}",
                exchange.command.token()
            );
        }

        LinkEvent::Completed(exchange)
    }
}

impl<TInstant, const DEPTH: usize> CommandQueueProducer for LinkSession<TInstant, DEPTH>
where
    TInstant: HubInstant,
{
    fn try_enqueue(&mut self, token: Token, payload: &str) -> Result<(), LinkError> {
        self.enqueue(token, payload)
    }

    fn contains(&self, token: Token) -> bool {
        self.queue.iter().any(|command| command.token() == token)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Millis;

    #[derive(Default)]
    struct LoopbackPort {
        inbound: Deque<u8, 128>,
        written: Vec<u8, 256>,
        refuse_writes: bool,
    }

    impl LoopbackPort {
        fn feed(&mut self, bytes: &[u8]) {
            for byte in bytes {
                self.inbound.push_back(*byte).expect("inbound capacity");
            }
        }
    }

    impl SerialPort for LoopbackPort {
        type Error = ();

        fn read_byte(&mut self) -> Option<u8> {
            self.inbound.pop_front()
        }

        fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
            if self.refuse_writes {
                return Err(());
            }
            self.written.extend_from_slice(bytes).map_err(|_| ())?;
            Ok(bytes.len())
        }
    }

    fn at(ms: u64) -> Millis {
        Millis::from_millis(ms)
    }

    #[test]
    fn completes_a_round_trip() {
        let mut link = LinkSession::<Millis, 4>::new(LinkConfig::new());
        let mut port = LoopbackPort::default();
        link.enqueue(Token::SetLights, "A502000").expect("queue has room");

        assert_eq!(link.step(&mut port, at(0)), LinkEvent::Sent);
        assert_eq!(port.written.as_slice(), b"$0070M1A502000.\r");
        assert_eq!(link.step(&mut port, at(1)), LinkEvent::Listening);

        port.feed(b"$0000M1.");
        assert_eq!(link.step(&mut port, at(2)), LinkEvent::Received);
        match link.step(&mut port, at(3)) {
            LinkEvent::Completed(exchange) => {
                assert!(exchange.is_correlated());
                assert_eq!(exchange.command.token(), Token::SetLights);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(link.front().is_none());
        assert_eq!(link.step(&mut port, at(4)), LinkEvent::Idle);
    }

    #[test]
    fn drops_head_after_repeated_transmit_failures() {
        let mut link = LinkSession::<Millis, 4>::new(LinkConfig::new());
        let mut port = LoopbackPort {
            refuse_writes: true,
            ..LoopbackPort::default()
        };
        link.enqueue(Token::PlayAudio, "750").expect("queue has room");
        link.enqueue(Token::PollButtons, "").expect("queue has room");

        assert_eq!(link.step(&mut port, at(0)), LinkEvent::TransmitFailed);
        assert_eq!(link.step(&mut port, at(1)), LinkEvent::TransmitFailed);
        match link.step(&mut port, at(2)) {
            LinkEvent::Dropped(command) => assert_eq!(command.token(), Token::PlayAudio),
            other => panic!("expected drop, got {other:?}"),
        }
        assert_eq!(link.retries(), 0);
        assert_eq!(
            link.front().map(Command::token),
            Some(Token::PollButtons)
        );
    }

    #[test]
    fn listen_timeout_resends_head() {
        let mut link = LinkSession::<Millis, 4>::new(LinkConfig::new());
        let mut port = LoopbackPort::default();
        link.enqueue(Token::PollDiagnostics, "00").expect("queue has room");

        assert_eq!(link.step(&mut port, at(0)), LinkEvent::Sent);
        assert_eq!(link.step(&mut port, at(20)), LinkEvent::Listening);
        assert_eq!(link.step(&mut port, at(21)), LinkEvent::ListenTimeout);
        assert_eq!(link.retries(), 1);
        assert_eq!(link.state(), LinkState::BeforeSend);
        assert_eq!(link.step(&mut port, at(22)), LinkEvent::Sent);
    }

    #[test]
    fn rejects_enqueue_when_full() {
        let mut link = LinkSession::<Millis, 2>::new(LinkConfig::new());
        link.enqueue(Token::ResetBoard, "").expect("first slot");
        link.enqueue(Token::RetractTray, "00").expect("second slot");

        assert_eq!(
            link.enqueue(Token::PollButtons, ""),
            Err(LinkError::QueueFull)
        );
        assert!(link.contains(Token::RetractTray));
        assert_eq!(link.free_slots(), 0);
    }

    #[test]
    fn garbage_reply_still_pops_head() {
        let mut link = LinkSession::<Millis, 4>::new(LinkConfig::new());
        let mut port = LoopbackPort::default();
        link.enqueue(Token::GetConfig, "21").expect("queue has room");

        link.step(&mut port, at(0));
        port.feed(b"#1.");
        assert_eq!(link.step(&mut port, at(1)), LinkEvent::Received);
        match link.step(&mut port, at(2)) {
            LinkEvent::Completed(exchange) => {
                assert_eq!(exchange.reply, Err(DecodeError::TooShort));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(link.front().is_none());
    }
}
