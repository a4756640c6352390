// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Direct write engine
//!
//! Programs flash one unit at a time from the host, waiting for BUSY to
//! clear after each unit.  Simple, but every unit costs several round trips
//! over the debug link, so large writes normally go through [`crate::algo`]
//! instead.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hcflash_core::hc32::Hc32FlashCr;
use hcflash_core::{FlashCr, FlashOp};

use crate::{FlashError, WriteFailure};
use crate::channel::RegisterChannel;
use crate::config::{FlashConfig, ProgramUnit};
use crate::target::TargetAdapter;

/// Programs `data` at `address`.
///
/// FLASH_SLOCK must already allow writes to the affected sectors.  The
/// program operation is selected once, then each unit is checked to be
/// blank, written, and waited on.
///
/// Arguments:
/// - `cr`: FLASH_CR as saved before the operation.  Only its OP bits are
///   changed.
/// - `data`: bytes to program.  With [`ProgramUnit::Word`] a trailing
///   partial word is padded with erased (0xFF) bytes.
/// - `address`: target address of the first byte, aligned to the unit.
///
/// On failure, the [`WriteFailure`] counts the units completed before the
/// failing one, and includes the failing unit in `touched` if it had been
/// written.
pub async fn write<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    cr: FlashCr,
    data: &[u8],
    address: u32,
) -> Result<(), WriteFailure> {
    debug!("Direct write of {} bytes at 0x{address:08X}", data.len());
    channel
        .write(Hc32FlashCr, cr.with_op(FlashOp::Program))
        .await
        .map_err(|error| WriteFailure::untouched(error, 0))?;

    let unit = config.unit.size() as usize;
    for (ii, chunk) in data.chunks(unit).enumerate() {
        let offset = ii * unit;
        let addr = address + offset as u32;

        check_erased(channel.target(), addr, config.unit)
            .await
            .inspect_err(|_| error!("Write error at byte {offset}"))
            .map_err(|error| WriteFailure::untouched(error, offset))?;

        program_unit(channel, config, addr, chunk)
            .await
            .inspect_err(|_| error!("Write error at byte {offset}"))
            .map_err(|error| WriteFailure::touched(error, offset, chunk.len()))?;
    }

    debug!("Direct write complete");
    Ok(())
}

// Writes one unit and waits for the controller to finish with it.
async fn program_unit<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    addr: u32,
    chunk: &[u8],
) -> Result<(), FlashError> {
    match config.unit {
        ProgramUnit::Byte => channel.target().write_byte(addr, chunk[0]).await?,
        ProgramUnit::Word => {
            let mut bytes = [0xFF; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            channel
                .target()
                .write_word(addr, u32::from_le_bytes(bytes))
                .await?
        }
    }
    channel.wait_ready(config.busy_budget).await
}

// NOR flash can only clear bits, so programming over anything but an erased
// unit silently corrupts it.
async fn check_erased<T: TargetAdapter>(
    target: &mut T,
    addr: u32,
    unit: ProgramUnit,
) -> Result<(), FlashError> {
    let word = target.read_word(addr & !3).await?;
    let current = match unit {
        ProgramUnit::Byte => (word >> ((addr & 3) * 8)) & 0xFF,
        ProgramUnit::Word => word,
    };
    let erased = match unit {
        ProgramUnit::Byte => 0xFF,
        ProgramUnit::Word => 0xFFFF_FFFF,
    };
    if current != erased {
        warn!("Flash not erased at 0x{addr:08X}: 0x{current:X}");
        return Err(FlashError::FlashNotErased);
    }
    Ok(())
}
