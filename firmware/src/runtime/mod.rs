use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use static_cell::StaticCell;

use crate::serial::IoSerial;

mod hub_task;

/// Device Link boards talk 8N1 at this rate.
const DL_UART_BAUD: u32 = 38_400;
/// Longest frame plus headroom for replies that arrive between polls.
const DL_UART_BUFFER_SIZE: usize = 256;

static UART_TX_BUFFER: StaticCell<[u8; DL_UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; DL_UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PB0, PB1, USART5, ..
    } = hal::init(config);

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = DL_UART_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        USART5,
        PB1,
        PB0,
        UART_TX_BUFFER.init([0; DL_UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; DL_UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    )
    .expect("failed to initialize Device Link UART");

    let (uart_tx, uart_rx) = uart.split();

    spawner
        .spawn(hub_task::run(IoSerial::new(uart_rx, uart_tx)))
        .expect("failed to spawn hub task");

    core::future::pending::<()>().await;
}
