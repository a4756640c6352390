// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! HC32F00x flash driver
//!
//! [`Hc32Flash`] is the object a flash bank manager drives.  It owns the
//! [`TargetAdapter`] (via a [`RegisterChannel`]), the device configuration
//! and the sector table, and sequences each operation:
//!
//! 1. Check the requested range.
//! 2. Check the target is halted - nothing is touched if it isn't.
//! 3. Save FLASH_SLOCK and FLASH_CR (and, for erase, park the PC).
//! 4. Run the erase or write engine.
//! 5. Restore everything saved in step 3, whatever step 4 returned.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::ops::RangeInclusive;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hcflash_core::hc32::Hc32FlashSlock;
use hcflash_core::{ErasedState, FlashBank, FlashCr, SectorLock};

use crate::algo;
use crate::{FlashError, WriteFailure};
use crate::channel::RegisterChannel;
use crate::config::{BankConfig, FlashConfig};
use crate::direct;
use crate::erase;
use crate::session::{ParkedPc, Session};
use crate::target::TargetAdapter;

/// HC32F00x flash driver
///
/// ```rust,ignore
/// use hcflash::{FlashConfig, Hc32Flash};
///
/// let mut flash = Hc32Flash::new(adapter, FlashConfig::default())?;
/// flash.erase(0, 63).await?;
/// flash.write(&image, 0, image.len() as u32).await?;
/// flash.protect(true, 0, 63).await?;
/// ```
///
/// The sector table is built on first use, or explicitly with
/// [`Self::probe()`].
#[derive(Debug)]
pub struct Hc32Flash<T> {
    channel: RegisterChannel<T>,
    config: FlashConfig,
    bank: Option<FlashBank>,
}

impl<T: TargetAdapter> Hc32Flash<T> {
    /// Creates a new driver using `target` to reach the device.
    ///
    /// Returns [`FlashError::Config`] if `config` is inconsistent.
    pub fn new(target: T, config: FlashConfig) -> Result<Self, FlashError> {
        config.validate()?;
        let channel = RegisterChannel::new(target, config.reg_base, config.poll_interval);
        Ok(Self {
            channel,
            config,
            bank: None,
        })
    }

    /// Creates a new driver from flash bank registration arguments, using
    /// the default HC32F00x configuration.
    pub fn from_bank_config(target: T, bank: &BankConfig) -> Result<Self, FlashError> {
        debug!("Creating flash bank {} ({})", bank.name, bank.driver);
        Self::new(target, bank.flash_config(FlashConfig::default()))
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// The sector table, if the bank has been probed
    pub fn bank(&self) -> Option<&FlashBank> {
        self.bank.as_ref()
    }

    /// Returns the underlying [`RegisterChannel`], for direct controller
    /// register access.
    pub fn channel(&mut self) -> &mut RegisterChannel<T> {
        &mut self.channel
    }

    /// Returns the underlying [`TargetAdapter`].
    pub fn target(&mut self) -> &mut T {
        self.channel.target()
    }

    /// Consumes the driver, returning the [`TargetAdapter`].
    pub fn into_target(self) -> T {
        self.channel.into_target()
    }

    /// (Re)builds the sector table from the configured geometry.  Every
    /// sector starts unknown and protected.
    ///
    /// No target access is needed, as the geometry is fixed.
    pub fn probe(&mut self) -> &FlashBank {
        let bank = FlashBank::probe(self.config.geometry);
        info!("Probed {bank}");
        self.bank.insert(bank)
    }

    /// Same as [`Self::probe()`].  The HC32F00x has no geometry to
    /// discover at runtime, so this also rebuilds the sector table.
    pub fn auto_probe(&mut self) -> &FlashBank {
        self.probe()
    }

    /// Returns a short fixed description of the flash bank.
    pub fn describe(&self) -> String {
        let geometry = &self.config.geometry;
        format!(
            "hc32f00x flash: {} KB at 0x{:08X}, {} x {} byte sectors, {} sectors per lock bit",
            geometry.size() / 1024,
            geometry.base,
            geometry.sector_count,
            geometry.sector_size,
            self.config.sectors_per_lock_bit
        )
    }

    // Probes if needed and splits self into the pieces the engines need.
    fn probed(&mut self) -> (&mut RegisterChannel<T>, &FlashConfig, &mut FlashBank) {
        let Self {
            channel,
            config,
            bank,
        } = self;
        let bank = bank.get_or_insert_with(|| {
            let bank = FlashBank::probe(config.geometry);
            info!("Probed {bank}");
            bank
        });
        (channel, &*config, bank)
    }

    /// Erases sectors `first` to `last` inclusive.
    ///
    /// If the range covers the whole array, the chip erase operation is used
    /// instead of erasing each sector.
    ///
    /// The target must be halted.  Its program counter is parked at
    /// [`FlashConfig::park_address`] for the duration, and FLASH_SLOCK and
    /// FLASH_CR are restored afterwards, on success or failure.
    ///
    /// Returns:
    /// - `Ok(())`: if every sector was erased.
    /// - `Err(FlashError::InvalidRange)`: if the range is empty or outside
    ///   the array.  Nothing is touched.
    /// - `Err(FlashError::NotHalted)`: if the target is running.  Nothing is
    ///   touched.
    /// - `Err(FlashError::Timeout)`: if a sector did not finish erasing.
    ///   Later sectors are not attempted.
    pub async fn erase(&mut self, first: u32, last: u32) -> Result<(), FlashError> {
        let (channel, config, bank) = self.probed();
        let sectors = check_sectors(bank, first, last)?;
        check_halted(channel).await?;

        let parked = ParkedPc::park(channel.target(), config.park_address).await?;
        let result = erase_unlocked(channel, config, bank, sectors).await;
        let restored = parked.restore(channel.target()).await;
        result.and(restored)
    }

    /// Programs the first `count` bytes of `buffer` at `offset` from the
    /// start of the array.
    ///
    /// The destination must be erased.  Uses the device-side write program
    /// when [`FlashConfig::accelerated`] is set, falling back to direct
    /// writes if the target has no working memory for it and
    /// [`FlashConfig::fallback_to_direct`] is set.
    ///
    /// Returns:
    /// - `Ok(())`: if every byte was programmed.  A `count` of 0 does
    ///   nothing.
    /// - `Err(FlashError::InvalidRange)`: if the range runs off the array,
    ///   `buffer` is shorter than `count`, or `offset` isn't aligned to the
    ///   program unit.
    /// - `Err(FlashError::NotHalted)`: if the target is running.
    /// - `Err(FlashError::FlashNotErased)`: if a destination byte was not
    ///   erased.
    /// - `Err(FlashError::Timeout)`: if the controller or the device-side
    ///   program did not complete.
    /// - `Err(FlashError::ResourceExhausted)`: if there was no working memory
    ///   and fallback is disabled.
    pub async fn write(&mut self, buffer: &[u8], offset: u32, count: u32) -> Result<(), FlashError> {
        if count == 0 {
            debug!("Nothing to write");
            return Ok(());
        }

        let (channel, config, bank) = self.probed();
        let Some(data) = buffer.get(..count as usize) else {
            warn!("Write of {count} bytes from a {} byte buffer", buffer.len());
            return Err(FlashError::InvalidRange);
        };
        if config.geometry.sectors_for(offset, count).is_none() {
            warn!("Write of {count} bytes at offset 0x{offset:X} is outside flash");
            return Err(FlashError::InvalidRange);
        }
        if offset % config.unit.size() != 0 {
            warn!("Write offset 0x{offset:X} is not aligned to the program unit");
            return Err(FlashError::InvalidRange);
        }
        check_halted(channel).await?;

        let address = config.geometry.base + offset;
        let session = Session::save(channel).await?;
        let result = write_unlocked(channel, config, session.cr(), data, address).await;
        let restored = session.restore(channel).await;

        // Sectors which may have been programmed are no longer known to be
        // erased
        let touched = match &result {
            Ok(()) => count,
            Err(failure) => failure.touched as u32,
        };
        if let Some(dirty) = config.geometry.sectors_for(offset, touched) {
            bank.mark_erased(dirty, ErasedState::Dirty);
        }
        let result = result.map_err(|failure| failure.error);

        match &result {
            Ok(()) => info!("Wrote {count} bytes at 0x{address:08X}"),
            Err(e) => error!("Write of {count} bytes at 0x{address:08X} failed: {e}"),
        }
        result.and(restored)
    }

    /// Write protects (`set == true`) or unprotects sectors `first` to
    /// `last` inclusive.
    ///
    /// Protection is per group of [`FlashConfig::sectors_per_lock_bit`]
    /// sectors, so every sector sharing a group with one in the range
    /// changes too.  Groups outside the range are untouched.
    pub async fn protect(&mut self, set: bool, first: u32, last: u32) -> Result<(), FlashError> {
        let (channel, config, bank) = self.probed();
        let sectors = check_sectors(bank, first, last)?;

        let lock = channel.read(Hc32FlashSlock).await?;
        let updated = lock.apply(set, sectors, config.sectors_per_lock_bit);
        debug!("FLASH_SLOCK {lock} -> {updated}");
        channel.write(Hc32FlashSlock, updated).await?;
        bank.update_protection(updated, config.sectors_per_lock_bit);

        let action = if set { "Protected" } else { "Unprotected" };
        info!("{action} sectors {first}-{last}");
        Ok(())
    }

    /// Reads FLASH_SLOCK and updates every sector's protected flag from it.
    pub async fn protect_check(&mut self) -> Result<(), FlashError> {
        let (channel, config, bank) = self.probed();
        let lock = channel.read(Hc32FlashSlock).await?;
        bank.update_protection(lock, config.sectors_per_lock_bit);
        debug!("FLASH_SLOCK {lock}");
        Ok(())
    }

    /// Returns each sector's protection state as read from the device,
    /// `true` meaning write protected.
    pub async fn query_protection(&mut self) -> Result<Vec<bool>, FlashError> {
        self.protect_check().await?;
        let (_, _, bank) = self.probed();
        Ok(bank.protection())
    }
}

fn check_sectors(bank: &FlashBank, first: u32, last: u32) -> Result<RangeInclusive<u32>, FlashError> {
    if !bank.contains(first, last) {
        warn!(
            "Invalid sector range {first}-{last}, bank has {} sectors",
            bank.sector_count()
        );
        return Err(FlashError::InvalidRange);
    }
    Ok(first..=last)
}

async fn check_halted<T: TargetAdapter>(channel: &mut RegisterChannel<T>) -> Result<(), FlashError> {
    if !channel.target().is_halted().await? {
        error!("Target not halted");
        return Err(FlashError::NotHalted);
    }
    Ok(())
}

async fn erase_unlocked<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    bank: &mut FlashBank,
    sectors: RangeInclusive<u32>,
) -> Result<(), FlashError> {
    let session = Session::save(channel).await?;
    let result = if bank.is_full_range(*sectors.start(), *sectors.end()) {
        erase::mass_erase(channel, config, bank, session.cr()).await
    } else {
        erase::erase_sectors(channel, config, bank, session.cr(), sectors).await
    };
    let restored = session.restore(channel).await;
    result.and(restored)
}

async fn write_unlocked<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    cr: FlashCr,
    data: &[u8],
    address: u32,
) -> Result<(), WriteFailure> {
    channel
        .write(Hc32FlashSlock, SectorLock::ALL_UNLOCKED)
        .await
        .map_err(|error| WriteFailure::untouched(error, 0))?;

    if !config.accelerated {
        return direct::write(channel, config, cr, data, address).await;
    }

    match algo::write(channel, config, data, address).await {
        Ok(()) => Ok(()),
        Err(WriteFailure {
            error: FlashError::ResourceExhausted,
            written,
            ..
        }) if config.fallback_to_direct => {
            warn!(
                "No working area available, falling back to direct write for {} bytes",
                data.len() - written
            );
            direct::write(channel, config, cr, &data[written..], address + written as u32)
                .await
                .map_err(|failure| WriteFailure {
                    written: written + failure.written,
                    touched: written + failure.touched,
                    ..failure
                })
        }
        Err(failure) => Err(failure),
    }
}
