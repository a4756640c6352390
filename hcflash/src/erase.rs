// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Erase engine
//!
//! Both erase flavours follow the same shape: fully unlock FLASH_SLOCK,
//! select the erase operation in FLASH_CR, trigger it with a dummy write
//! into the array, and wait for BUSY to clear.
//!
//! The caller is responsible for checking the target is halted, parking its
//! program counter and saving/restoring the controller registers around
//! these functions.  See [`crate::Hc32Flash::erase()`].

use core::ops::RangeInclusive;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hcflash_core::hc32::{Hc32FlashCr, Hc32FlashSlock};
use hcflash_core::{ErasedState, FlashBank, FlashCr, FlashOp, SectorLock};

use crate::FlashError;
use crate::channel::RegisterChannel;
use crate::config::FlashConfig;
use crate::target::TargetAdapter;

// Value written to trigger an erase.  The controller ignores it.
const ERASE_TRIGGER: u32 = 0x0000_0000;

/// Erases the whole array using the chip erase operation.
///
/// One operation select, one trigger, one wait.
///
/// Arguments:
/// - `cr`: FLASH_CR as saved before the operation.  Only its OP bits are
///   changed.
pub async fn mass_erase<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    bank: &mut FlashBank,
    cr: FlashCr,
) -> Result<(), FlashError> {
    debug!("Mass erasing flash");
    channel.write(Hc32FlashSlock, SectorLock::ALL_UNLOCKED).await?;
    channel
        .write(Hc32FlashCr, cr.with_op(FlashOp::ChipErase))
        .await?;
    channel
        .target()
        .write_word(config.geometry.base, ERASE_TRIGGER)
        .await?;

    let all = 0..=bank.sector_count() - 1;
    match channel.wait_ready(config.busy_budget).await {
        Ok(()) => {
            bank.mark_erased(all, ErasedState::Erased);
            info!("Mass erase complete");
            Ok(())
        }
        Err(e) => {
            error!("Mass erase failed: {e}");
            bank.mark_erased(all, ErasedState::Unknown);
            Err(e)
        }
    }
}

/// Erases `sectors` one at a time using the sector erase operation.
///
/// Stops at the first sector that fails to complete.  Sectors before it are
/// marked erased, the failed sector is marked unknown and the rest are left
/// alone.
pub async fn erase_sectors<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    bank: &mut FlashBank,
    cr: FlashCr,
    sectors: RangeInclusive<u32>,
) -> Result<(), FlashError> {
    debug!("Erasing flash sectors {sectors:?}");
    channel.write(Hc32FlashSlock, SectorLock::ALL_UNLOCKED).await?;
    channel
        .write(Hc32FlashCr, cr.with_op(FlashOp::SectorErase))
        .await?;

    for sector in sectors {
        let addr = config.geometry.sector_address(sector);
        channel.target().write_word(addr, ERASE_TRIGGER).await?;
        if let Err(e) = channel.wait_ready(config.busy_budget).await {
            error!("Erase error at sector {sector}");
            bank.mark_erased(sector..=sector, ErasedState::Unknown);
            return Err(e);
        }
        bank.mark_erased(sector..=sector, ErasedState::Erased);
        trace!("Erased sector {sector} at 0x{addr:08X}");
    }

    info!("Sector erase complete");
    Ok(())
}
