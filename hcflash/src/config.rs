// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash controller and bank configuration
//!
//! [`FlashConfig`] holds every device specific constant used by the driver,
//! so sibling devices with a different geometry or lock granularity can be
//! supported without code changes.  [`FlashConfig::default()`] describes the
//! HC32F00x.
//!
//! [`BankConfig`] parses the arguments of a flash bank registration command.

use alloc::format;
use alloc::string::{String, ToString};
use embassy_time::Duration;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hcflash_core::hc32::{HC32_FLASH_REG_BASE, HC32_RAM_BASE, HC32_SECTORS_PER_LOCK_BIT};
use hcflash_core::{FlashGeometry, SectorLock};

use crate::FlashError;

/// Default number of busy polls before an operation times out
pub const DEFAULT_BUSY_BUDGET: u32 = 100;

/// Default interval between busy polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of units per accelerated block
pub const DEFAULT_BLOCK_UNITS: u32 = 1024;

/// Default largest and smallest FIFO sizes tried for accelerated writes
pub const DEFAULT_FIFO_MAX: u32 = 16 * 1024;
pub const DEFAULT_FIFO_MIN: u32 = 256;

/// Default host-side limit on one run of the device-side write program
pub const DEFAULT_ALGORITHM_TIMEOUT: Duration = Duration::from_secs(5);

// Write and read pointers at the start of the FIFO
const FIFO_HEADER: u32 = 8;

/// Size of each unit programmed by the direct write engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramUnit {
    Byte,
    Word,
}

impl ProgramUnit {
    /// Size in bytes
    pub const fn size(&self) -> u32 {
        match self {
            ProgramUnit::Byte => 1,
            ProgramUnit::Word => 4,
        }
    }
}

/// Device specific flash driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashConfig {
    /// Flash controller register base address
    pub reg_base: u32,

    /// Main flash array layout
    pub geometry: FlashGeometry,

    /// Sectors guarded by each FLASH_SLOCK bit
    pub sectors_per_lock_bit: u32,

    /// Unit programmed per trigger by the direct write engine
    pub unit: ProgramUnit,

    /// Units (bytes) handed to the device-side write program per run
    pub block_units: u32,

    /// Maximum number of FLASH_CR reads while waiting for BUSY to clear
    pub busy_budget: u32,

    /// Delay between FLASH_CR reads
    pub poll_interval: Duration,

    /// Where the core's program counter is parked during erase, so nothing
    /// executes from the flash array
    pub park_address: u32,

    /// Largest FIFO to try to allocate for accelerated writes
    pub fifo_max: u32,

    /// Smallest acceptable FIFO for accelerated writes
    pub fifo_min: u32,

    /// Whether to use the device-side write program
    pub accelerated: bool,

    /// Whether to fall back to direct writes when the target has no working
    /// memory for the device-side write program
    pub fallback_to_direct: bool,

    /// Host-side limit on one run of the device-side write program
    pub algorithm_timeout: Duration,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            reg_base: HC32_FLASH_REG_BASE,
            geometry: FlashGeometry::HC32F00X,
            sectors_per_lock_bit: HC32_SECTORS_PER_LOCK_BIT,
            unit: ProgramUnit::Byte,
            block_units: DEFAULT_BLOCK_UNITS,
            busy_budget: DEFAULT_BUSY_BUDGET,
            poll_interval: DEFAULT_POLL_INTERVAL,
            park_address: HC32_RAM_BASE,
            fifo_max: DEFAULT_FIFO_MAX,
            fifo_min: DEFAULT_FIFO_MIN,
            accelerated: true,
            fallback_to_direct: true,
            algorithm_timeout: DEFAULT_ALGORITHM_TIMEOUT,
        }
    }
}

impl FlashConfig {
    /// Checks the configuration is self-consistent.
    ///
    /// Returns:
    /// - `Ok(())`: if the configuration can be used.
    /// - `Err(FlashError::Config)`: describing the first problem found.
    pub fn validate(&self) -> Result<(), FlashError> {
        let geometry = &self.geometry;
        if geometry.sector_count == 0 || geometry.sector_size == 0 {
            return Err(config_err("flash geometry must be non-empty"));
        }
        if geometry.sector_count.checked_mul(geometry.sector_size).is_none()
            || geometry.base.checked_add(geometry.size()).is_none()
        {
            return Err(config_err("flash geometry overflows the address space"));
        }
        if self.sectors_per_lock_bit == 0
            || geometry.sector_count % self.sectors_per_lock_bit != 0
        {
            return Err(config_err(&format!(
                "{} sectors cannot be split into lock groups of {}",
                geometry.sector_count, self.sectors_per_lock_bit
            )));
        }
        if geometry.sector_count / self.sectors_per_lock_bit > SectorLock::WIDTH {
            return Err(config_err(&format!(
                "{} lock groups do not fit FLASH_SLOCK",
                geometry.sector_count / self.sectors_per_lock_bit
            )));
        }
        let unit = self.unit.size();
        if geometry.base % unit != 0 || geometry.sector_size % unit != 0 {
            return Err(config_err("flash geometry is not aligned to the program unit"));
        }
        if self.block_units == 0 {
            return Err(config_err("block size must be non-zero"));
        }
        if self.busy_budget == 0 {
            return Err(config_err("busy budget must be non-zero"));
        }
        if self.fifo_min <= FIFO_HEADER || self.fifo_min > self.fifo_max {
            return Err(config_err(&format!(
                "invalid FIFO size range {}-{}",
                self.fifo_min, self.fifo_max
            )));
        }
        Ok(())
    }
}

fn config_err(msg: &str) -> FlashError {
    warn!("Invalid flash configuration: {msg}");
    FlashError::Config(msg.to_string())
}

/// Flash bank registration arguments
///
/// `<name> <driver> <base> <size> <chip_width> <bus_width> [<target>]`
///
/// The device has fixed geometry, so only the argument count and number
/// formats are checked strictly.  A base or size that disagrees with the
/// device is overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankConfig {
    pub name: String,
    pub driver: String,
    pub base: u32,
    pub size: u32,
    pub chip_width: u32,
    pub bus_width: u32,
    pub target: Option<String>,
}

impl BankConfig {
    /// Minimum number of registration arguments
    pub const MIN_ARGS: usize = 6;

    /// Parses registration arguments.  Numbers may be decimal or `0x`
    /// prefixed hex.
    pub fn from_args(args: &[&str]) -> Result<Self, FlashError> {
        if args.len() < Self::MIN_ARGS {
            return Err(config_err(&format!(
                "flash bank needs at least {} arguments, got {}",
                Self::MIN_ARGS,
                args.len()
            )));
        }

        Ok(Self {
            name: args[0].to_string(),
            driver: args[1].to_string(),
            base: parse_u32("base", args[2])?,
            size: parse_u32("size", args[3])?,
            chip_width: parse_u32("chip_width", args[4])?,
            bus_width: parse_u32("bus_width", args[5])?,
            target: args.get(6).map(|s| s.to_string()),
        })
    }

    /// Builds the driver configuration for this bank, starting from
    /// `defaults`.
    pub fn flash_config(&self, defaults: FlashConfig) -> FlashConfig {
        let geometry = &defaults.geometry;
        if self.base != geometry.base {
            warn!(
                "Bank {} base 0x{:08X} ignored, flash is fixed at 0x{:08X}",
                self.name, self.base, geometry.base
            );
        }
        if self.size != 0 && self.size != geometry.size() {
            warn!(
                "Bank {} size {} ignored, flash is {} bytes",
                self.name,
                self.size,
                geometry.size()
            );
        }
        defaults
    }
}

fn parse_u32(field: &str, value: &str) -> Result<u32, FlashError> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| config_err(&format!("invalid {field} '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = FlashConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.geometry.size(), 32 * 1024);
        assert_eq!(config.busy_budget, 100);
        assert_eq!(config.block_units, 1024);
    }

    #[test]
    fn rejects_bad_lock_groups() {
        let mut config = FlashConfig::default();
        config.sectors_per_lock_bit = 3;
        assert!(matches!(config.validate(), Err(FlashError::Config(_))));

        let mut config = FlashConfig::default();
        config.sectors_per_lock_bit = 2;
        assert!(matches!(config.validate(), Err(FlashError::Config(_))));
    }

    #[test]
    fn rejects_bad_fifo_range() {
        let mut config = FlashConfig::default();
        config.fifo_min = 32 * 1024;
        assert!(matches!(config.validate(), Err(FlashError::Config(_))));
    }

    #[test]
    fn rejects_unaligned_word_unit() {
        let mut config = FlashConfig::default();
        config.unit = ProgramUnit::Word;
        assert_eq!(config.validate(), Ok(()));
        config.geometry.base = 2;
        assert!(matches!(config.validate(), Err(FlashError::Config(_))));
    }

    #[test]
    fn parses_bank_args() {
        let bank =
            BankConfig::from_args(&["hc32.flash", "hc32", "0", "0x8000", "0", "0", "hc32.cpu"])
                .unwrap();
        assert_eq!(bank.driver, "hc32");
        assert_eq!(bank.base, 0);
        assert_eq!(bank.size, 0x8000);
        assert_eq!(bank.target.as_deref(), Some("hc32.cpu"));

        let bank = BankConfig::from_args(&["f", "hc32", "0x0", "0", "0", "0"]).unwrap();
        assert_eq!(bank.target, None);
    }

    #[test]
    fn too_few_bank_args() {
        let err = BankConfig::from_args(&["hc32.flash", "hc32", "0", "0", "0"]).unwrap_err();
        assert!(matches!(err, FlashError::Config(_)));
    }

    #[test]
    fn bad_number() {
        let err = BankConfig::from_args(&["f", "hc32", "zero", "0", "0", "0"]).unwrap_err();
        assert_eq!(err, FlashError::Config("invalid base 'zero'".to_string()));
    }

    #[test]
    fn fixed_geometry_wins() {
        let bank = BankConfig::from_args(&["f", "hc32", "0x1000", "0x400", "0", "0"]).unwrap();
        let config = bank.flash_config(FlashConfig::default());
        assert_eq!(config.geometry, FlashGeometry::HC32F00X);
    }
}
