use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::Read;
use logger_core::wake::{WakeSignal, WakeSignalSet};
use static_cell::StaticCell;

use super::{SERIAL_PIPE, WAKE_FLAGS, notify};

const CONSOLE_BAUD: u32 = 115_200;
const UART_BUFFER_SIZE: usize = 64;

static UART_TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// Forwards console bytes to the control loop and wakes it.
#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = match BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        config,
    ) {
        Ok(uart) => uart,
        Err(_) => {
            defmt::error!("serial: UART configuration rejected");
            loop {
                core::future::pending::<()>().await;
            }
        }
    };
    let (_tx, mut rx) = uart.split();

    let mut ingress = [0u8; UART_BUFFER_SIZE];
    loop {
        match rx.read(&mut ingress).await {
            Ok(count) if count > 0 => {
                let accepted = SERIAL_PIPE.try_write(&ingress[..count]).unwrap_or(0);
                if accepted < count {
                    defmt::warn!("serial: dropped {} bytes (pipe full)", count - accepted);
                }
                WAKE_FLAGS.raise(WakeSignal::Serial);
                notify(WakeSignalSet::single(WakeSignal::Serial));
            }
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("serial: UART read error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    }
}
