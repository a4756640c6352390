// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Operation sessions
//!
//! Erase and write operations change FLASH_SLOCK and FLASH_CR, and erase
//! operations also move the target's program counter.  The objects here
//! capture the prior state and put it back.
//!
//! Restoring needs target accesses, which are async, so it cannot happen in
//! `Drop`.  Instead each object is `#[must_use]` and the caller awaits
//! `restore()` after the operation body, on success and failure alike:
//!
//! ```rust,ignore
//! let session = Session::save(channel).await?;
//! let result = operation(channel).await;
//! let restored = session.restore(channel).await;
//! result.and(restored)
//! ```

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hcflash_core::hc32::{Hc32FlashCr, Hc32FlashSlock};
use hcflash_core::{FlashCr, SectorLock};

use crate::FlashError;
use crate::channel::RegisterChannel;
use crate::target::TargetAdapter;

/// Saved flash controller state
#[must_use = "the saved flash controller registers must be restored"]
#[derive(Debug)]
pub struct Session {
    slock: SectorLock,
    cr: FlashCr,
}

impl Session {
    /// Reads FLASH_SLOCK and FLASH_CR.
    pub async fn save<T: TargetAdapter>(
        channel: &mut RegisterChannel<T>,
    ) -> Result<Self, FlashError> {
        let slock = channel.read(Hc32FlashSlock).await?;
        let cr = channel.read(Hc32FlashCr).await?;
        debug!("Saved flash controller state: SLOCK {slock} CR {cr}");
        Ok(Self { slock, cr })
    }

    /// FLASH_SLOCK as it was before the operation
    pub fn slock(&self) -> SectorLock {
        self.slock
    }

    /// FLASH_CR as it was before the operation
    pub fn cr(&self) -> FlashCr {
        self.cr
    }

    /// Writes the saved FLASH_CR and then FLASH_SLOCK back.
    ///
    /// Both writes are attempted even if the first fails.  The first error
    /// is returned.
    pub async fn restore<T: TargetAdapter>(
        self,
        channel: &mut RegisterChannel<T>,
    ) -> Result<(), FlashError> {
        let cr = channel
            .write(Hc32FlashCr, self.cr)
            .await
            .inspect_err(|e| error!("Failed to restore FLASH_CR to {}: {e}", self.cr));
        let slock = channel
            .write(Hc32FlashSlock, self.slock)
            .await
            .inspect_err(|e| error!("Failed to restore FLASH_SLOCK to {}: {e}", self.slock));
        debug!("Restored flash controller state");
        cr.and(slock)
    }
}

/// Saved program counter, for operations that park the core somewhere safe
/// while the flash array is being destroyed.
#[must_use = "the parked program counter must be restored"]
#[derive(Debug)]
pub struct ParkedPc {
    saved: u32,
}

impl ParkedPc {
    /// Saves the program counter and moves it to `park_address`.
    pub async fn park<T: TargetAdapter>(target: &mut T, park_address: u32) -> Result<Self, FlashError> {
        let saved = target.program_counter().await?;
        target.set_program_counter(park_address).await?;
        debug!("Parked PC at 0x{park_address:08X} (was 0x{saved:08X})");
        Ok(Self { saved })
    }

    /// The program counter before parking
    pub fn saved(&self) -> u32 {
        self.saved
    }

    /// Puts the saved program counter back.
    pub async fn restore<T: TargetAdapter>(self, target: &mut T) -> Result<(), FlashError> {
        target
            .set_program_counter(self.saved)
            .await
            .inspect(|_| debug!("Restored PC to 0x{:08X}", self.saved))
            .inspect_err(|e| error!("Failed to restore PC to 0x{:08X}: {e}", self.saved))
    }
}
