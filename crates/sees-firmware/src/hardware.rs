//! Board bring-up helpers

use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::Blocking;
use esp_hal::delay::Delay;
use esp_hal::gpio::Output;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use log::{info, warn};
use sees_core::sd_card::{FixedTimeSource, SdCardStorage};

/// SD card SPI clock during card initialisation.
pub const SD_INIT_CLOCK_KHZ: u32 = 400;

/// SD card SPI clock once the card has answered.
pub const SD_DATA_CLOCK_MHZ: u32 = 20;

pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

/// Free-running microsecond counter; wraps like the core expects.
pub fn now_us() -> u32 {
    esp_hal::time::Instant::now()
        .duration_since_epoch()
        .as_micros() as u32
}

/// SPI settings for the SD card at `rate`.
pub fn sd_spi_config(rate: Rate) -> SpiConfig {
    SpiConfig::default().with_frequency(rate).with_mode(Mode::_0)
}

/// Wrap the SD card SPI device as storage for snaps and the stream buffer.
///
/// The card is initialised at [`SD_INIT_CLOCK_KHZ`]; once it answers the bus
/// is raised to [`SD_DATA_CLOCK_MHZ`] so stream appends keep up with the
/// sample rate. A missing card stays at the init clock and surfaces as a
/// storage error later rather than failing boot.
pub fn init_sd_storage(sd_card_spi: SdSpi, delay: Delay) -> SdCardStorage<SdSpi, Delay, FixedTimeSource> {
    info!("Configuring SD card storage");
    let card = SdCard::new(sd_card_spi, delay);

    match card.num_bytes() {
        Ok(bytes) => {
            info!("SD card detected: {} MB", bytes / (1024 * 1024));
            let fast = sd_spi_config(Rate::from_mhz(SD_DATA_CLOCK_MHZ));
            match card.spi(|device| device.bus_mut().apply_config(&fast)) {
                Ok(()) => info!("SD card SPI clock raised to {} MHz", SD_DATA_CLOCK_MHZ),
                Err(e) => warn!("SD card SPI clock unchanged: {:?}", e),
            }
        }
        Err(e) => warn!("SD card not detected: {:?}", e),
    }

    SdCardStorage::new(card, FixedTimeSource)
}
