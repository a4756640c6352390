// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hcflash-core - Flash bank and sector table

use alloc::vec::Vec;
use core::fmt;
use core::ops::RangeInclusive;
use serde::Serialize;

use crate::hc32::{HC32_FLASH_BASE, HC32_NUM_SECTORS, HC32_SECTOR_SIZE};
use crate::lock::SectorLock;

/// Physical layout of a flash array made of equally sized sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashGeometry {
    /// Address of sector 0
    pub base: u32,

    /// Number of sectors
    pub sector_count: u32,

    /// Size of each sector in bytes
    pub sector_size: u32,
}

impl FlashGeometry {
    /// The HC32F00x main flash array
    pub const HC32F00X: FlashGeometry = FlashGeometry {
        base: HC32_FLASH_BASE,
        sector_count: HC32_NUM_SECTORS,
        sector_size: HC32_SECTOR_SIZE,
    };

    /// Total size in bytes
    pub const fn size(&self) -> u32 {
        self.sector_count * self.sector_size
    }

    /// Address of the given sector
    pub const fn sector_address(&self, sector: u32) -> u32 {
        self.base + sector * self.sector_size
    }

    /// Returns the sectors containing the byte range `offset..offset+count`,
    /// where `offset` is relative to the start of the array.
    ///
    /// Returns `None` if the range is empty or runs off the end of the
    /// array.
    pub fn sectors_for(&self, offset: u32, count: u32) -> Option<RangeInclusive<u32>> {
        let end = offset.checked_add(count)?;
        if count == 0 || end > self.size() {
            return None;
        }
        Some(offset / self.sector_size..=(end - 1) / self.sector_size)
    }
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self::HC32F00X
    }
}

/// What is known about a sector's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErasedState {
    Unknown,
    Erased,
    Dirty,
}

impl fmt::Display for ErasedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErasedState::Unknown => write!(f, "unknown"),
            ErasedState::Erased => write!(f, "erased"),
            ErasedState::Dirty => write!(f, "dirty"),
        }
    }
}

/// A single flash sector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sector {
    /// Offset from the bank's base address
    pub offset: u32,

    /// Size in bytes
    pub size: u32,

    pub erased: ErasedState,

    /// Whether writes to this sector are disallowed
    pub protected: bool,
}

/// A flash bank, as built by [`FlashBank::probe()`].
///
/// The sector table is sized once at probe time.  Operations only update
/// each sector's erased and protected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashBank {
    geometry: FlashGeometry,
    sectors: Vec<Sector>,
}

impl FlashBank {
    /// Builds the sector table for `geometry`.  Every sector starts with an
    /// unknown erased state and is assumed protected until checked.
    ///
    /// Probing is idempotent: the table is rebuilt from the same constants
    /// each time.
    pub fn probe(geometry: FlashGeometry) -> Self {
        let sectors = (0..geometry.sector_count)
            .map(|ii| Sector {
                offset: ii * geometry.sector_size,
                size: geometry.sector_size,
                erased: ErasedState::Unknown,
                protected: true,
            })
            .collect();
        Self { geometry, sectors }
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    pub fn base(&self) -> u32 {
        self.geometry.base
    }

    pub fn size(&self) -> u32 {
        self.geometry.size()
    }

    pub fn sector_count(&self) -> u32 {
        self.geometry.sector_count
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn sector(&self, sector: u32) -> Option<&Sector> {
        self.sectors.get(sector as usize)
    }

    /// Whether `first..=last` is a valid, non-empty sector range.
    pub fn contains(&self, first: u32, last: u32) -> bool {
        first <= last && last < self.sector_count()
    }

    /// Whether `first..=last` covers the whole array.
    pub fn is_full_range(&self, first: u32, last: u32) -> bool {
        first == 0 && self.sector_count().checked_sub(1) == Some(last)
    }

    /// Sets the erased state of every sector in `sectors`.
    pub fn mark_erased(&mut self, sectors: RangeInclusive<u32>, state: ErasedState) {
        for sector in sectors {
            if let Some(s) = self.sectors.get_mut(sector as usize) {
                s.erased = state;
            }
        }
    }

    /// Updates every sector's protected flag from a FLASH_SLOCK value.
    pub fn update_protection(&mut self, lock: SectorLock, sectors_per_bit: u32) {
        let state = lock.protection(self.sector_count(), sectors_per_bit);
        for (sector, protected) in self.sectors.iter_mut().zip(state) {
            sector.protected = protected;
        }
    }

    /// Per-sector protection state, as last read or set.
    pub fn protection(&self) -> Vec<bool> {
        self.sectors.iter().map(|s| s.protected).collect()
    }
}

impl fmt::Display for FlashBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} KB flash at 0x{:08X}, {} x {} byte sectors",
            self.size() / 1024,
            self.base(),
            self.sector_count(),
            self.geometry.sector_size
        )
    }
}
