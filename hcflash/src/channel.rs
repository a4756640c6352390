// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash Controller Register Channel
//!
//! This module implements register level access to the HC32F00x flash
//! controller.  Reads are plain memory reads.  Writes to FLASH_CR and
//! FLASH_SLOCK are preceded by the FLASH_BYPASS sequence, which unlocks
//! exactly one following write.
//!
//! It also implements the busy-wait used to detect completion of every
//! program and erase operation.

use embassy_time::{Duration, Timer};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hcflash_core::hc32::{Hc32FlashBypass, Hc32FlashCr};
use hcflash_core::register::{ProtectedRegister, ReadableRegister};

use crate::FlashError;
use crate::target::TargetAdapter;

/// Flash controller register channel
///
/// Owns the [`TargetAdapter`] and knows where the flash controller lives in
/// the target's address space.
///
/// ```rust,ignore
/// use hcflash::RegisterChannel;
/// use hcflash_core::hc32::{HC32_FLASH_REG_BASE, Hc32FlashSlock};
/// use hcflash_core::SectorLock;
///
/// let mut channel = RegisterChannel::new(adapter, HC32_FLASH_REG_BASE, Duration::from_millis(1));
/// channel.write(Hc32FlashSlock, SectorLock::ALL_UNLOCKED).await?;
/// ```
#[derive(Debug)]
pub struct RegisterChannel<T> {
    target: T,
    base: u32,
    poll_interval: Duration,
}

impl<T: TargetAdapter> RegisterChannel<T> {
    /// Creates a new `RegisterChannel` for a flash controller at `base`,
    /// which sleeps for `poll_interval` between busy polls.
    pub fn new(target: T, base: u32, poll_interval: Duration) -> Self {
        Self {
            target,
            base,
            poll_interval,
        }
    }

    /// The flash controller's register base address
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Returns a mutable reference to the underlying [`TargetAdapter`].
    pub fn target(&mut self) -> &mut T {
        &mut self.target
    }

    /// Consumes the channel, returning the [`TargetAdapter`].
    pub fn into_target(self) -> T {
        self.target
    }

    /// Reads the register at `offset` from the controller base.
    pub async fn read_reg(&mut self, offset: u32) -> Result<u32, FlashError> {
        self.target.read_word(self.base + offset).await
    }

    /// Writes `value` to the register at `offset`, preceded by the bypass
    /// sequence.
    ///
    /// The unlock applies to this write only.  Nothing else may access the
    /// controller between the bypass and the register write.
    pub async fn write_reg(&mut self, offset: u32, value: u32) -> Result<(), FlashError> {
        let bypass = self.base + Hc32FlashBypass::OFFSET;
        self.target.write_word(bypass, Hc32FlashBypass::KEY1).await?;
        self.target.write_word(bypass, Hc32FlashBypass::KEY2).await?;
        trace!("Write flash register 0x{offset:02X} = 0x{value:08X}");
        self.target.write_word(self.base + offset, value).await
    }

    /// Reads a typed register.
    ///
    /// ```rust,ignore
    /// let cr = channel.read(Hc32FlashCr).await?;
    /// if cr.busy() { ... }
    /// ```
    pub async fn read<R>(&mut self, _reg: R) -> Result<R::Value, FlashError>
    where
        R: ReadableRegister,
        R::Value: From<u32>,
    {
        let raw = self.read_reg(R::OFFSET).await?;
        Ok(R::from_raw(raw))
    }

    /// Writes a typed, bypass-protected register.
    pub async fn write<R>(&mut self, _reg: R, value: R::Value) -> Result<(), FlashError>
    where
        R: ProtectedRegister,
        u32: From<R::Value>,
    {
        self.write_reg(R::OFFSET, R::to_raw(value)).await
    }

    /// Waits for FLASH_CR's BUSY bit to clear.
    ///
    /// FLASH_CR is read at most `budget` times, sleeping for the poll
    /// interval between reads.
    ///
    /// Returns:
    /// - `Ok(())`: as soon as a read shows BUSY clear.
    /// - `Err(FlashError::Timeout)`: if all `budget` reads showed BUSY set.
    pub async fn wait_ready(&mut self, budget: u32) -> Result<(), FlashError> {
        for poll in 0..budget {
            let cr = self.read(Hc32FlashCr).await?;
            if !cr.busy() {
                trace!("Flash controller ready after {} polls", poll + 1);
                return Ok(());
            }
            if poll + 1 < budget {
                Timer::after(self.poll_interval).await;
            }
        }

        warn!("Timed out waiting for flash controller after {budget} polls");
        Err(FlashError::Timeout)
    }
}
