use embassy_stm32::usart::{BufferedUartRx, BufferedUartTx};
use embassy_time::{Duration, Timer};
use hub_core::interaction::{EatTheFood, EatTheFoodConfig};
use hub_core::report::ReportSink;
use hub_core::{Hub, HubConfig};

use crate::clock::{EmbassyClock, FirmwareInstant};
use crate::serial::IoSerial;

pub type DlSerial = IoSerial<BufferedUartRx<'static>, BufferedUartTx<'static>>;

const CHALLENGE_FILE: &str = "firmware/000_EatingTheFood";
/// Scheduler time granted per wake-up before yielding to the executor.
const RUN_BUDGET: core::time::Duration = core::time::Duration::from_millis(2);
const YIELD: Duration = Duration::from_millis(1);
/// No wall clock on this board; reports carry zero timestamps.
const WALL_TIME_UNKNOWN: u32 = 0;

/// Mirrors reports onto the RTT log until an uplink exists.
struct RttReports;

impl ReportSink for RttReports {
    fn publish(&mut self, event: &str, payload: &str) -> bool {
        defmt::info!("{=str} {=str}", event, payload);
        true
    }
}

#[embassy_executor::task]
pub async fn run(port: DlSerial) -> ! {
    let mut hub: Hub<DlSerial, EmbassyClock> = Hub::new(port, EmbassyClock, HubConfig::new());
    hub.initialize(CHALLENGE_FILE, env!("CARGO_PKG_VERSION"));
    defmt::info!("hub: challenge {=str}", hub.challenge_id());

    let mut game = EatTheFood::<FirmwareInstant>::new(EatTheFoodConfig::new());
    let mut reports = RttReports;
    let mut rx_errors = 0;

    loop {
        hub.run(RUN_BUDGET);

        if let Some(outcome) = game.step(&mut hub, &mut reports, WALL_TIME_UNKNOWN) {
            let elapsed = u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX);
            defmt::info!(
                "hub: level {} eaten={} after {} ms (reported={})",
                outcome.level,
                outcome.eaten,
                elapsed,
                outcome.reported
            );
        }

        let errors = hub.port().rx_errors();
        if errors != rx_errors {
            defmt::warn!("hub: {} UART receive faults", errors);
            rx_errors = errors;
        }

        Timer::after(YIELD).await;
    }
}
