//! Driver configuration.

use fugit::MillisDurationU32;
use modular_bitfield::prelude::*;

/// Feature flags, packed the same way as the option byte of the XY6020L Arduino driver.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Drop queued writes whose value already matches the cache.
    pub skip_unchanged_writes: bool,
    /// Never poll the register map on our own.
    pub disable_periodic_refresh: bool,
    #[skip]
    __: B6,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::new().with_skip_unchanged_writes(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Default for PSU is 0x01.
    pub address: u8,
    /// Minimum gap between two transmitted requests. Below ~50 ms the XY6020L stops answering.
    pub pacing: MillisDurationU32,
    /// Minimum gap between two periodic reads of the register map.
    pub refresh_interval: MillisDurationU32,
    /// Response timeout in 10 ms ticks, clamped to 4..=7.
    pub timeout_ticks: u8,
    /// How often a queued write lost to a timeout is put back before it is dropped.
    pub write_retries: u8,
    pub options: DriverOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: 0x01,
            pacing: MillisDurationU32::millis(50),
            refresh_interval: MillisDurationU32::millis(200),
            timeout_ticks: 7,
            write_retries: 1,
            options: DriverOptions::default(),
        }
    }
}

impl DriverConfig {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_pacing(mut self, pacing: MillisDurationU32) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_refresh_interval(mut self, interval: MillisDurationU32) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_timeout_ticks(mut self, ticks: u8) -> Self {
        self.timeout_ticks = ticks;
        self
    }

    pub fn with_write_retries(mut self, retries: u8) -> Self {
        self.write_retries = retries;
        self
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Only 1-247 range is suitable ID for single Modbus device.
    pub fn address_valid(&self) -> bool {
        (1..=247).contains(&self.address)
    }
}
