mod common;

use std::collections::VecDeque;

use common::MockInstant;
use hub_core::SerialPort;
use hub_core::link::{CommandQueueProducer, LinkConfig, LinkEvent, LinkSession, LinkState};
use hub_core::protocol::{Command, DecodeError, Token};

/// Port that records each written frame and serves scripted inbound bytes.
#[derive(Default)]
struct ScriptedPort {
    inbound: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
}

impl ScriptedPort {
    fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    fn tokens(&self) -> String {
        self.frames.iter().map(|frame| char::from(frame[5])).collect()
    }
}

impl SerialPort for ScriptedPort {
    type Error = ();

    fn read_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
        self.frames.push(bytes.to_vec());
        Ok(bytes.len())
    }
}

fn at(ms: u64) -> MockInstant {
    MockInstant::millis(ms)
}

fn session() -> LinkSession<MockInstant, 16> {
    LinkSession::new(LinkConfig::new())
}

fn expect_completed(event: LinkEvent) -> hub_core::link::Exchange {
    match event {
        LinkEvent::Completed(exchange) => exchange,
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn one_command_in_flight_in_fifo_order() {
    let mut link = session();
    let mut port = ScriptedPort::default();
    link.enqueue(Token::SetLights, "A502000").expect("queue has room");
    link.enqueue(Token::PlayAudio, "250").expect("queue has room");
    link.enqueue(Token::PollDiagnostics, "00").expect("queue has room");

    let mut now = 0;
    for (token, reply) in [
        (Token::SetLights, b"$0000M1.".as_slice()),
        (Token::PlayAudio, b"$0001P1.".as_slice()),
        (Token::PollDiagnostics, b"$0112Z100000000040.".as_slice()),
    ] {
        assert_eq!(link.step(&mut port, at(now)), LinkEvent::Sent);
        now += 1;
        // Nothing else goes out until the reply is processed.
        assert_eq!(link.step(&mut port, at(now)), LinkEvent::Listening);
        assert_eq!(link.state(), LinkState::AfterSendBeforeReceive);
        now += 1;

        port.feed(reply);
        assert_eq!(link.step(&mut port, at(now)), LinkEvent::Received);
        now += 1;
        let exchange = expect_completed(link.step(&mut port, at(now)));
        now += 1;
        assert_eq!(exchange.command.token(), token);
        assert!(exchange.is_correlated());
    }

    assert_eq!(port.tokens(), "MPZ");
    assert_eq!(link.step(&mut port, at(now)), LinkEvent::Idle);
    assert_eq!(link.is_empty(), Some(true));
}

#[test]
fn sequence_digits_cycle_through_nine_values() {
    let mut link = session();
    for _ in 0..11 {
        link.enqueue(Token::PollButtons, "").expect("queue has room");
    }

    let sequences: Vec<u8> = link.iter().map(Command::sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 0, 1]);
}

#[test]
fn exhausted_retries_drop_head_before_next_send() {
    let mut link = session();
    let mut port = ScriptedPort::default();
    link.enqueue(Token::ResetBoard, "").expect("queue has room");
    link.enqueue(Token::RetractTray, "00").expect("queue has room");

    let mut now = 0;
    let mut dropped = None;
    while dropped.is_none() {
        match link.step(&mut port, at(now)) {
            LinkEvent::Dropped(command) => dropped = Some(command),
            LinkEvent::Sent | LinkEvent::Listening | LinkEvent::ListenTimeout => {}
            other => panic!("unexpected event: {other:?}"),
        }
        now += 1;
        assert!(now < 1_000, "head was never dropped");
    }

    let dropped = dropped.expect("dropped command");
    assert_eq!(dropped.token(), Token::ResetBoard);
    assert_eq!(port.tokens(), "KKK");
    assert_eq!(link.retries(), 0);

    assert_eq!(link.step(&mut port, at(now)), LinkEvent::Sent);
    assert_eq!(port.tokens(), "KKKX");
}

#[test]
fn retries_resend_the_same_frame() {
    let mut link = session();
    let mut port = ScriptedPort::default();
    link.enqueue(Token::GetConfig, "21").expect("queue has room");

    assert_eq!(link.step(&mut port, at(0)), LinkEvent::Sent);
    assert_eq!(link.step(&mut port, at(21)), LinkEvent::ListenTimeout);
    assert_eq!(link.step(&mut port, at(22)), LinkEvent::Sent);

    assert_eq!(port.frames.len(), 2);
    assert_eq!(port.frames[0], port.frames[1]);
    assert_eq!(port.frames[0].as_slice(), b"$0020U121.\r");
}

#[test]
fn oversized_reply_is_discarded_and_head_resent() {
    let mut link = session();
    let mut port = ScriptedPort::default();
    link.enqueue(Token::PollDiagnostics, "00").expect("queue has room");

    assert_eq!(link.step(&mut port, at(0)), LinkEvent::Sent);
    port.feed(&[b'x'; 70]);
    assert_eq!(
        link.step(&mut port, at(1)),
        LinkEvent::ReceiveError(DecodeError::TooLong)
    );
    // The tail of the runaway frame is read but never completes.
    assert_eq!(link.step(&mut port, at(2)), LinkEvent::Listening);
    assert_eq!(link.step(&mut port, at(21)), LinkEvent::ListenTimeout);
    assert_eq!(link.retries(), 1);
    assert_eq!(link.step(&mut port, at(22)), LinkEvent::Sent);

    port.feed(b"$0110Z100000000040.");
    assert_eq!(link.step(&mut port, at(23)), LinkEvent::Received);
    let exchange = expect_completed(link.step(&mut port, at(24)));
    assert!(exchange.is_correlated());
    assert_eq!(link.retries(), 0);
}

#[test]
fn uncorrelated_reply_still_completes_head() {
    let mut link = session();
    let mut port = ScriptedPort::default();
    link.enqueue(Token::SetLights, "A502000").expect("queue has room");
    link.enqueue(Token::PollButtons, "").expect("queue has room");

    link.step(&mut port, at(0));
    port.feed(b"$0000Q1.");
    assert_eq!(link.step(&mut port, at(1)), LinkEvent::Received);
    let exchange = expect_completed(link.step(&mut port, at(2)));
    assert!(!exchange.is_correlated());
    assert_eq!(exchange.command.token(), Token::SetLights);
    assert!(!link.contains(Token::SetLights));
    assert!(link.contains(Token::PollButtons));
}

#[test]
fn failed_status_is_passed_through() {
    let mut link = session();
    let mut port = ScriptedPort::default();
    link.enqueue(Token::PlayAudio, "750").expect("queue has room");

    link.step(&mut port, at(0));
    port.feed(b"$0000P0.");
    link.step(&mut port, at(1));
    let exchange = expect_completed(link.step(&mut port, at(2)));
    let reply = exchange.reply.expect("reply decodes");
    assert!(!reply.is_ok());
    assert_eq!(reply.token(), Some(Token::PlayAudio));
}
