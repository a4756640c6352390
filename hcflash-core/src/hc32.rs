// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hcflash-core - HC32F00x specific objects

use core::fmt;
use static_assertions::const_assert;

use crate::lock::SectorLock;
use crate::register::{ProtectedRegister, ReadableRegister, RegisterDescriptor};
use crate::register_data_rw;

/// HC32F00x flash memory base address
pub const HC32_FLASH_BASE: u32 = 0x0000_0000;

/// HC32F00x RAM base address
pub const HC32_RAM_BASE: u32 = 0x2000_0000;

/// HC32F00x flash controller register base address
pub const HC32_FLASH_REG_BASE: u32 = 0x4002_0000;

/// Number of sectors in the HC32F00x main flash array
pub const HC32_NUM_SECTORS: u32 = 64;

/// Size of each HC32F00x flash sector in bytes
pub const HC32_SECTOR_SIZE: u32 = 512;

/// Number of sectors guarded by each bit of FLASH_SLOCK
pub const HC32_SECTORS_PER_LOCK_BIT: u32 = 4;

/// Total size of the HC32F00x main flash array in bytes
pub const HC32_FLASH_SIZE: u32 = HC32_NUM_SECTORS * HC32_SECTOR_SIZE;

// FLASH_SLOCK is 16 bits wide, one bit per group
const_assert!(HC32_NUM_SECTORS % HC32_SECTORS_PER_LOCK_BIT == 0);
const_assert!(HC32_NUM_SECTORS / HC32_SECTORS_PER_LOCK_BIT <= SectorLock::WIDTH);

/// HC32F00x flash timing registers.
///
/// These are programmed by the target's boot code to match its clock and
/// are never modified by this crate.
pub struct Hc32FlashTiming;

impl Hc32FlashTiming {
    pub const TNVS: u32 = 0x00;
    pub const TPGS: u32 = 0x04;
    pub const TPROG: u32 = 0x08;
    pub const TSERASE: u32 = 0x0C;
    pub const TMERASE: u32 = 0x10;
    pub const TPRCV: u32 = 0x14;
    pub const TSRCV: u32 = 0x18;
    pub const TMRCV: u32 = 0x1C;
}

/// HC32F00x FLASH_CR register
///
/// Selects the flash operation and reports whether one is in progress.
pub struct Hc32FlashCr;

impl Hc32FlashCr {
    /// FLASH_CR register bit positions
    pub const IE_PR_BIT: u32 = 6;
    pub const IE_PC_BIT: u32 = 5;
    pub const BUSY_BIT: u32 = 4;
    pub const WAIT_SHIFT: u32 = 2;

    /// FLASH_CR register masks
    pub const WAIT_MASK: u32 = 0b11;
    pub const OP_MASK: u32 = 0b11;
}

impl RegisterDescriptor for Hc32FlashCr {
    const OFFSET: u32 = 0x20;
    type Value = FlashCr;
}
impl ReadableRegister for Hc32FlashCr {}
impl ProtectedRegister for Hc32FlashCr {}

/// HC32F00x FLASH_IFR and FLASH_ICLR registers.  Interrupts are not used
/// while programming over the debug link.
pub struct Hc32FlashIfr;

impl Hc32FlashIfr {
    pub const IFR_OFFSET: u32 = 0x24;
    pub const ICLR_OFFSET: u32 = 0x28;
    pub const IF_PR_BIT: u32 = 1;
    pub const IF_PC_BIT: u32 = 0;
}

/// HC32F00x FLASH_BYPASS register
///
/// Writing `KEY1` then `KEY2` unlocks exactly one subsequent write to a
/// protected controller register (FLASH_CR, FLASH_SLOCK and the timing
/// registers).
pub struct Hc32FlashBypass;

impl Hc32FlashBypass {
    pub const OFFSET: u32 = 0x2C;
    pub const KEY1: u32 = 0x5A5A;
    pub const KEY2: u32 = 0xA5A5;
}

/// HC32F00x FLASH_SLOCK register
///
/// One bit per group of sectors.  0 means write protected, 1 means write
/// allowed.
pub struct Hc32FlashSlock;

impl RegisterDescriptor for Hc32FlashSlock {
    const OFFSET: u32 = 0x30;
    type Value = SectorLock;
}
impl ReadableRegister for Hc32FlashSlock {}
impl ProtectedRegister for Hc32FlashSlock {}

/// Flash operation selected by FLASH_CR's OP bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Read,
    Program,
    SectorErase,
    ChipErase,
}

impl FlashOp {
    /// Returns the FLASH_CR OP bits for this operation.
    pub const fn bits(&self) -> u32 {
        match self {
            FlashOp::Read => 0b00,
            FlashOp::Program => 0b01,
            FlashOp::SectorErase => 0b10,
            FlashOp::ChipErase => 0b11,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & Hc32FlashCr::OP_MASK {
            0b00 => FlashOp::Read,
            0b01 => FlashOp::Program,
            0b10 => FlashOp::SectorErase,
            _ => FlashOp::ChipErase,
        }
    }
}

impl fmt::Display for FlashOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashOp::Read => write!(f, "read"),
            FlashOp::Program => write!(f, "program"),
            FlashOp::SectorErase => write!(f, "sector erase"),
            FlashOp::ChipErase => write!(f, "chip erase"),
        }
    }
}

/// FLASH_CR register value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashCr(u32);
register_data_rw!(FlashCr);

impl FlashCr {
    /// Whether a program or erase operation is in flight.
    pub fn busy(&self) -> bool {
        (self.0 >> Hc32FlashCr::BUSY_BIT) & 1 != 0
    }

    /// The currently selected operation.
    pub fn op(&self) -> FlashOp {
        FlashOp::from_bits(self.0)
    }

    /// Returns a copy of this value with the OP bits replaced.  All other
    /// bits, including the wait states, are preserved.
    pub fn with_op(&self, op: FlashOp) -> Self {
        Self((self.0 & !Hc32FlashCr::OP_MASK) | op.bits())
    }

    /// Configured number of flash wait states.
    pub fn wait_states(&self) -> u32 {
        (self.0 >> Hc32FlashCr::WAIT_SHIFT) & Hc32FlashCr::WAIT_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_op_preserves_other_bits() {
        let cr = FlashCr::from(0x0000_0064 | FlashOp::ChipErase.bits());
        let cr = cr.with_op(FlashOp::SectorErase);
        assert_eq!(u32::from(cr), 0x0000_0066);
        assert_eq!(cr.op(), FlashOp::SectorErase);
        assert_eq!(cr.wait_states(), 1);
    }

    #[test]
    fn busy_bit() {
        assert!(FlashCr::from(1 << Hc32FlashCr::BUSY_BIT).busy());
        assert!(!FlashCr::from(0x0F).busy());
    }

    #[test]
    fn display_is_hex() {
        let cr = FlashCr::from(0x21);
        assert_eq!(alloc::format!("{cr}"), "0x00000021");
    }
}
