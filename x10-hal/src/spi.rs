//! A Linux `spidev` implementation of [`x10::transport::SpiLink`].
//!
//! Mirrors the ioctl sequence `init()` in the original host program ran
//! against `/dev/spidevX.Y`: set the mode bits, then bits-per-word, then
//! max speed, on both the write and read sides of the device.

use std::thread;
use std::time::Duration;

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use x10::frame::FRAME_LEN;
use x10::transport::SpiLink;

/// The handful of mode bits the original CLI exposed as flags
/// (`--cpha`, `--cpol`, `--lsb`, `--cs-high`, `--3wire`, `--no-cs`,
/// `--loop`), folded into the `spidev` crate's `SpiModeFlags`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub cpha: bool,
    pub cpol: bool,
    pub lsb_first: bool,
    pub cs_high: bool,
    pub three_wire: bool,
    pub no_cs: bool,
    pub loopback: bool,
    pub bits_per_word: u8,
    pub max_speed_hz: u32,
    pub delay_usecs: u16,
}

impl Config {
    fn mode_flags(&self) -> SpiModeFlags {
        let mut flags = SpiModeFlags::empty();
        if self.cpha {
            flags |= SpiModeFlags::SPI_CPHA;
        }
        if self.cpol {
            flags |= SpiModeFlags::SPI_CPOL;
        }
        if self.lsb_first {
            flags |= SpiModeFlags::SPI_LSB_FIRST;
        }
        if self.cs_high {
            flags |= SpiModeFlags::SPI_CS_HIGH;
        }
        if self.three_wire {
            flags |= SpiModeFlags::SPI_3WIRE;
        }
        if self.no_cs {
            flags |= SpiModeFlags::SPI_NO_CS;
        }
        if self.loopback {
            flags |= SpiModeFlags::SPI_LOOP;
        }
        flags
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open SPI device: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to configure SPI device: {0}")]
    Configure(#[source] std::io::Error),
    #[error("SPI transfer failed: {0}")]
    Transfer(#[source] std::io::Error),
}

/// An [`x10::transport::SpiLink`] backed by a real `/dev/spidevX.Y`.
pub struct SpidevLink {
    device: Spidev,
    delay_usecs: u16,
}

impl SpidevLink {
    pub fn open(path: &str, config: Config) -> Result<Self, Error> {
        log::debug!("opening SPI device {}", path);
        let mut device = Spidev::open(path).map_err(Error::Open)?;
        let options = SpidevOptions::new()
            .bits_per_word(config.bits_per_word)
            .max_speed_hz(config.max_speed_hz)
            .mode(config.mode_flags())
            .build();
        device.configure(&options).map_err(Error::Configure)?;
        log::trace!(
            "SPI device configured: bpw={} speed={} mode={:?}",
            config.bits_per_word,
            config.max_speed_hz,
            config.mode_flags()
        );
        Ok(Self {
            device,
            delay_usecs: config.delay_usecs,
        })
    }
}

impl SpiLink for SpidevLink {
    type Error = Error;

    fn transfer(&mut self, request: &[u8; FRAME_LEN]) -> Result<[u8; FRAME_LEN], Self::Error> {
        let mut rx = [0u8; FRAME_LEN];
        {
            let mut transfer = SpidevTransfer::read_write(request, &mut rx);
            transfer.delay_usecs = self.delay_usecs;
            self.device
                .transfer(&mut transfer)
                .map_err(Error::Transfer)?;
        }
        Ok(rx)
    }

    fn sleep_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}
