// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hcflash-core - Sector write protection bitmap
//!
//! FLASH_SLOCK guards the flash array in groups of sectors, one bit per
//! group.  Note the polarity: a set bit means writes are *allowed*, so
//! protecting a range clears bits.
//!
//! The hardware resolution is one group, so protecting or unprotecting any
//! sector affects every sector in its group.

use alloc::vec::Vec;
use core::fmt;
use core::ops::RangeInclusive;

use crate::register_data_rw;

/// FLASH_SLOCK register value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLock(u32);
register_data_rw!(SectorLock);

impl SectorLock {
    /// Number of implemented bits
    pub const WIDTH: u32 = 16;

    /// Every group write-allowed
    pub const ALL_UNLOCKED: SectorLock = SectorLock(0xFFFF);

    /// Every group write-protected
    pub const ALL_LOCKED: SectorLock = SectorLock(0x0000);

    /// Returns the group (bit) index guarding `sector`.
    pub const fn group(sector: u32, sectors_per_bit: u32) -> u32 {
        sector / sectors_per_bit
    }

    /// Returns whether writes to `group` are allowed.
    pub fn group_writable(&self, group: u32) -> bool {
        group < Self::WIDTH && (self.0 >> group) & 1 != 0
    }

    /// Applies a protect (`set == true`) or unprotect (`set == false`)
    /// request for `sectors` and returns the new mask.
    ///
    /// Protecting clears the bit for every group touched by the range,
    /// unprotecting sets it.  Bits for groups outside the range are left
    /// untouched.
    pub fn apply(&self, set: bool, sectors: RangeInclusive<u32>, sectors_per_bit: u32) -> Self {
        let mut mask = self.0;
        for sector in sectors {
            let bit = 1u32 << Self::group(sector, sectors_per_bit);
            if set {
                mask &= !bit;
            } else {
                mask |= bit;
            }
        }
        Self(mask)
    }

    /// Translates the mask into per-sector protection state, group-wise.
    ///
    /// Returns one entry per sector, `true` when the sector is write
    /// protected.
    pub fn protection(&self, sector_count: u32, sectors_per_bit: u32) -> Vec<bool> {
        (0..sector_count)
            .map(|sector| !self.group_writable(Self::group(sector, sectors_per_bit)))
            .collect()
    }
}
