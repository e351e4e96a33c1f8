mod common;

use core::time::Duration;

use common::{IDLE, SimulatedBoard, SteppingClock};
use hub_core::protocol::FoodMachineState;
use hub_core::telemetry::{HubEventKind, HubEventPayload};
use hub_core::tray::{PresentStatus, TrayPhase};
use hub_core::{Hub, HubConfig};

type TestHub = Hub<SimulatedBoard, SteppingClock>;

fn ready_hub(board: SimulatedBoard) -> TestHub {
    let mut hub = Hub::new(board, SteppingClock::default(), HubConfig::new());
    hub.run(Duration::from_millis(3_400));
    assert!(hub.is_ready(), "bring-up should finish within 3.4 s");
    hub.set_poll_diagnostics(true);
    hub.run(Duration::from_millis(600));
    hub
}

/// Polls the presentation until it finishes, failing after `limit`.
fn present_until_done(hub: &mut TestHub, duration_ms: u32, limit: Duration) -> PresentStatus {
    let deadline = hub.clock().peek() + u64::try_from(limit.as_millis()).expect("limit fits");
    loop {
        let status = hub.present_and_check_foodtreat(duration_ms);
        if status.is_terminal() {
            return status;
        }
        assert!(
            hub.clock().peek() < deadline,
            "presentation still {status:?} after {limit:?}"
        );
        hub.run(Duration::from_millis(20));
    }
}

#[test]
fn eaten_treat_is_reported_taken() {
    let mut hub = ready_hub(SimulatedBoard::default());
    assert_eq!(hub.food_machine_state(), Some(FoodMachineState::Idle));

    let status = present_until_done(&mut hub, 3_000, Duration::from_secs(10));
    assert_eq!(status, PresentStatus::Taken);
    assert_eq!(hub.port().payloads('T'), vec!["30"]);

    let last = hub
        .telemetry()
        .oldest_first()
        .filter(|record| record.event == HubEventKind::TrayResult)
        .last()
        .expect("tray result recorded");
    assert_eq!(last.details, HubEventPayload::Tray(PresentStatus::Taken));
}

#[test]
fn ignored_treat_is_reported_not_taken() {
    let mut hub = ready_hub(SimulatedBoard {
        eats: false,
        ..SimulatedBoard::default()
    });

    let status = present_until_done(&mut hub, 4_500, Duration::from_secs(10));
    assert_eq!(status, PresentStatus::NotTaken);
    assert_eq!(hub.port().payloads('T'), vec!["45"]);
}

#[test]
fn pending_until_first_diagnostics() {
    let mut hub: TestHub = Hub::new(
        SimulatedBoard::default(),
        SteppingClock::default(),
        HubConfig::new(),
    );
    hub.run(Duration::from_millis(3_400));
    assert_eq!(
        hub.present_and_check_foodtreat(3_000),
        PresentStatus::Pending(TrayPhase::BeforePresent)
    );
    assert_eq!(hub.port().count('T'), 0);
}

#[test]
fn indefinite_presentation_waits_for_close_request() {
    let mut hub = ready_hub(SimulatedBoard::default());

    for _ in 0..100 {
        let status = hub.present_and_check_foodtreat(20_000);
        assert!(!status.is_terminal(), "tray should stay out, got {status:?}");
        hub.run(Duration::from_millis(20));
    }
    assert_eq!(hub.port().payloads('T'), vec!["00"]);
    // Only the bring-up retract so far.
    assert_eq!(hub.port().count('X'), 1);

    hub.close_tray();
    let status = present_until_done(&mut hub, 20_000, Duration::from_secs(5));
    assert_eq!(status, PresentStatus::Taken);
    assert_eq!(hub.port().count('X'), 2);
}

#[test]
fn indefinite_presentation_retracts_after_duration() {
    let mut hub = ready_hub(SimulatedBoard {
        eats: false,
        ..SimulatedBoard::default()
    });

    let started = hub.clock().peek();
    let status = present_until_done(&mut hub, 10_000, Duration::from_secs(15));
    assert_eq!(status, PresentStatus::NotTaken);
    assert_eq!(hub.port().payloads('T'), vec!["00"]);
    assert_eq!(hub.port().count('X'), 2);
    assert!(hub.clock().peek() - started > 10_000);
}

#[test]
fn lid_open_is_unavailable_and_resets_once() {
    let mut hub = ready_hub(SimulatedBoard {
        food_state: 0,
        ..SimulatedBoard::default()
    });
    assert_eq!(hub.food_machine_state(), Some(FoodMachineState::LidOpen));

    for _ in 0..20 {
        assert_eq!(
            hub.present_and_check_foodtreat(3_000),
            PresentStatus::Unavailable
        );
        hub.run(Duration::from_millis(20));
    }
    assert_eq!(hub.port().count('F'), 1);
    assert_eq!(hub.port().count('T'), 0);
    let resets = hub
        .telemetry()
        .oldest_first()
        .filter(|record| record.event == HubEventKind::FoodMachineReset)
        .count();
    assert_eq!(resets, 1);

    hub.port_mut().food_state = IDLE;
    hub.run(Duration::from_millis(600));
    let status = present_until_done(&mut hub, 3_000, Duration::from_secs(10));
    assert_eq!(status, PresentStatus::Taken);
}
