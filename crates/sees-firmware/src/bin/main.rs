#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::spi::master::Spi;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::usb_serial_jtag::UsbSerialJtag;
use log::{error, info};

use sees_core::adc::SampleSource;
use sees_core::config::SeesConfig;
use sees_core::instrument::Instrument;
use sees_core::link::{COMMANDS, PipeLink};
use sees_core::record::{DenseRecord, RecordShape, SparseRecord, StorageMode};
use sees_core::status::StatusLed;
use sees_core::storage::{FileNaming, Storage};
use sees_firmware::adc_source::AdcSource;
use sees_firmware::hardware::{SD_INIT_CLOCK_KHZ, init_sd_storage, now_us, sd_spi_config};
use sees_firmware::serial::{TELEMETRY, command_reader, telemetry_writer};

/// Snap and stream directory on the FAT card (8.3).
const SNAP_DIR: &str = "SNAPS";

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Show the fault pattern forever. Acquisition does not run.
async fn halt(mut led: StatusLed<Output<'static>>) -> ! {
    led.set_fault();
    loop {
        let _ = led.update(now_us() / 1_000);
        Timer::after(Duration::from_millis(10)).await;
    }
}

/// Acquisition poll loop; yields to the serial tasks between passes.
async fn run<R, A, S>(
    config: SeesConfig,
    source: A,
    storage: S,
    mut led: StatusLed<Output<'static>>,
) -> !
where
    R: RecordShape,
    A: SampleSource,
    S: Storage,
{
    let link = PipeLink::new(&TELEMETRY);
    let mut instrument: Instrument<R, A, _, S> =
        Instrument::new(&config, source, link, storage, SNAP_DIR, FileNaming::Short);

    if let Err(e) = instrument.begin(now_us()) {
        error!("Acquisition halted: {}", e);
        halt(led).await
    }

    loop {
        let now = now_us();
        instrument.poll_commands(&COMMANDS, now);
        instrument.update(now);
        let _ = led.update(now / 1_000);
        embassy_futures::yield_now().await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);
    // The dense ring store (16 B x 300k records) lives in PSRAM.
    esp_alloc::psram_allocator!(peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("SEEs firmware starting");

    let led = Output::new(peripherals.GPIO9, Level::Low, OutputConfig::default());

    // USB serial: commands in, telemetry out
    let (rx, tx) = UsbSerialJtag::new(peripherals.USB_DEVICE)
        .into_async()
        .split();
    spawner.spawn(command_reader(rx).expect("command reader task already spawned"));
    spawner.spawn(telemetry_writer(tx).expect("telemetry task already spawned"));

    // SD card on SPI2
    let spi_bus = Spi::new(
        peripherals.SPI2,
        sd_spi_config(Rate::from_khz(SD_INIT_CLOCK_KHZ)),
    )
    .expect("Failed to configure SPI2")
    .with_sck(peripherals.GPIO36)
    .with_mosi(peripherals.GPIO37)
    .with_miso(peripherals.GPIO35);
    let sd_cs = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let sd_spi = match ExclusiveDevice::new(spi_bus, sd_cs, Delay::new()) {
        Ok(device) => device,
        Err(e) => match e {},
    };
    let mut storage = init_sd_storage(sd_spi, Delay::new());

    let config = SeesConfig::load_or_default(&mut storage);
    let led = StatusLed::new(led, config.heartbeat_ms);

    // Detector front-end on GPIO1 (ADC1 channel 0), full 0-3.3 V range
    let mut adc_config = AdcConfig::new();
    let adc_pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let source = AdcSource::new(Adc::new(peripherals.ADC1, adc_config), adc_pin);

    info!(
        "Sampling every {} us, {} mode",
        config.sample_interval_us,
        config.storage_mode.label()
    );

    match config.storage_mode {
        StorageMode::Dense => run::<DenseRecord, _, _>(config, source, storage, led).await,
        StorageMode::Sparse => run::<SparseRecord, _, _>(config, source, storage, led).await,
    }
}
