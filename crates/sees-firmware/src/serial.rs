//! USB serial tasks
//!
//! Reception and transmission run as their own embassy tasks so the
//! acquisition loop never waits on the host:
//!
//! - [`command_reader`] assembles lines and queues them on [`COMMANDS`]
//! - [`telemetry_writer`] drains [`TELEMETRY`], which the instrument fills
//!   through a [`PipeLink`](sees_core::link::PipeLink)

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embedded_io_async::{Read, Write};
use esp_hal::Async;
use esp_hal::usb_serial_jtag::{UsbSerialJtagRx, UsbSerialJtagTx};
use log::warn;
use sees_core::link::{COMMANDS, LineAssembler};

/// Outgoing telemetry buffer, about 40 ms of lines at 10 kS/s.
pub const TELEMETRY_PIPE_LEN: usize = 8 * 1024;

pub static TELEMETRY: Pipe<CriticalSectionRawMutex, TELEMETRY_PIPE_LEN> = Pipe::new();

#[embassy_executor::task]
pub async fn command_reader(mut rx: UsbSerialJtagRx<'static, Async>) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 64];

    loop {
        let n = match rx.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("USB serial read failed: {:?}", e);
                continue;
            }
        };

        for &byte in &buf[..n] {
            if let Some(line) = assembler.push(byte) {
                COMMANDS.send(line).await;
            }
        }
    }
}

#[embassy_executor::task]
pub async fn telemetry_writer(mut tx: UsbSerialJtagTx<'static, Async>) {
    let mut buf = [0u8; 512];

    loop {
        let n = TELEMETRY.read(&mut buf).await;
        // Without a host attached the write fails; the bytes are dropped.
        let _ = tx.write_all(&buf[..n]).await;
    }
}
