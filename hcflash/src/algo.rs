// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Accelerated block-write engine
//!
//! Polling FLASH_CR from the host after every byte costs several debug link
//! round trips per byte.  Instead, this engine uploads a small program into
//! target RAM which does the bypass/select/program/busy-wait loop itself,
//! and streams the data to it through a FIFO while it runs.
//!
//! The program's interface is five core registers, see
//! [`AlgorithmParams`]:
//!
//! | Register | In                   | Out                          |
//! |----------|----------------------|------------------------------|
//! | r0       | controller base      | status ([`STATUS_OK`] etc)   |
//! | r1       | byte count           |                              |
//! | r2       | FIFO start           |                              |
//! | r3       | FIFO end             |                              |
//! | r4       | flash address        | address after last byte      |
//!
//! The program source is `asm/hc32_write.s`.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::RegisterChannel;
use crate::config::FlashConfig;
use crate::target::{AlgorithmParams, TargetAdapter, WorkingArea};
use crate::{FlashError, WriteFailure, with_timeout};

/// Device-side write program, Thumb code for the Cortex-M0+.  Entry point is
/// the first byte.
pub const HC32_WRITE_CODE: [u8; 96] = [
    0x15, 0x4D, 0xA8, 0x46, 0x15, 0x4D, 0xA9, 0x46, // 0x00
    0x16, 0x68, 0x00, 0x2E, 0x22, 0xD0, 0x55, 0x68, // 0x08
    0xB5, 0x42, 0xF9, 0xD0, 0x26, 0x78, 0xFF, 0x2E, // 0x10
    0x19, 0xD1, 0x06, 0x6A, 0x03, 0x27, 0xBE, 0x43, // 0x18
    0x01, 0x36, 0x47, 0x46, 0xC7, 0x62, 0x4F, 0x46, // 0x20
    0xC7, 0x62, 0x06, 0x62, 0x2E, 0x78, 0x26, 0x70, // 0x28
    0x06, 0x6A, 0x10, 0x27, 0x3E, 0x42, 0xFB, 0xD1, // 0x30
    0x01, 0x35, 0x01, 0x34, 0x9D, 0x42, 0x01, 0xD3, // 0x38
    0x15, 0x46, 0x08, 0x35, 0x55, 0x60, 0x01, 0x39, // 0x40
    0xDE, 0xD1, 0x00, 0x20, 0x02, 0xE0, 0x01, 0x20, // 0x48
    0x00, 0x25, 0x55, 0x60, 0x00, 0xBE, 0xC0, 0x46, // 0x50
    0x5A, 0x5A, 0x00, 0x00, 0xA5, 0xA5, 0x00, 0x00, // 0x58 literal pool
];

/// Status returned in r0 when every byte was programmed
pub const STATUS_OK: u32 = 0;

/// Status returned in r0 when a destination byte was not erased
pub const STATUS_NOT_ERASED: u32 = 1;

/// The device-side program handles one byte per unit
pub const UNIT_SIZE: u32 = 1;

/// Programs `data` at `address` in blocks of `config.block_units` bytes,
/// running the device-side program once per block.
///
/// FLASH_SLOCK must already allow writes to the affected sectors.  Blocks run
/// strictly one after another.  The final block is the exact remainder.
/// The first failed block abandons the rest of the transfer.
///
/// Returns:
/// - `Ok(())`: if every block was programmed.
/// - `Err(WriteFailure)`: with the failed block's error, how many bytes were
///   durably written before it, and whether the failed block's program had
///   started.
pub async fn write<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    data: &[u8],
    address: u32,
) -> Result<(), WriteFailure> {
    let block_len = (config.block_units * UNIT_SIZE) as usize;
    let mut written = 0;

    for (ii, block) in data.chunks(block_len).enumerate() {
        let block_addr = address + written as u32;
        debug!(
            "Writing block {ii}: {} bytes at 0x{block_addr:08X}",
            block.len()
        );
        write_block(channel, config, block, block_addr, written)
            .await
            .inspect_err(|failure| {
                error!("Block {ii} at 0x{block_addr:08X} failed: {}", failure.error)
            })?;
        written += block.len();
    }

    debug!("Accelerated write of {written} bytes complete");
    Ok(())
}

// Runs the device-side program once.  Both working areas are released
// whatever happens.  `written` is the number of bytes programmed by earlier
// blocks.
async fn write_block<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    block: &[u8],
    address: u32,
    written: usize,
) -> Result<(), WriteFailure> {
    let code_area = channel
        .target()
        .alloc_working_area(HC32_WRITE_CODE.len() as u32)
        .await
        .inspect_err(|_| warn!("No working area available for flash write program"))
        .map_err(|error| WriteFailure::untouched(error, written))?;

    let result = write_block_with_code(channel, config, &code_area, block, address, written).await;
    let freed = channel
        .target()
        .free_working_area(code_area)
        .await
        .map_err(|error| WriteFailure::touched(error, written, block.len()));
    result.and(freed)
}

async fn write_block_with_code<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    code_area: &WorkingArea,
    block: &[u8],
    address: u32,
    written: usize,
) -> Result<(), WriteFailure> {
    channel
        .target()
        .upload_code(code_area, &HC32_WRITE_CODE)
        .await
        .map_err(|error| WriteFailure::untouched(error, written))?;

    let fifo = alloc_fifo(channel.target(), config)
        .await
        .map_err(|error| WriteFailure::untouched(error, written))?;
    let result = run(channel, config, code_area, &fifo, block, address).await;
    let freed = channel.target().free_working_area(fifo).await;
    result
        .and(freed)
        .map_err(|error| WriteFailure::touched(error, written, block.len()))
}

/// Allocates the FIFO, starting at `config.fifo_max` bytes and halving (to
/// a multiple of 4) after each failure.
///
/// Returns [`FlashError::ResourceExhausted`] once the size would drop below
/// `config.fifo_min`.
pub async fn alloc_fifo<T: TargetAdapter>(
    target: &mut T,
    config: &FlashConfig,
) -> Result<WorkingArea, FlashError> {
    let mut size = config.fifo_max;
    loop {
        match target.alloc_working_area(size).await {
            Ok(area) => {
                trace!("Allocated {size} byte FIFO at {area}");
                return Ok(area);
            }
            Err(FlashError::ResourceExhausted) => {
                size = (size / 2) & !3;
                if size < config.fifo_min {
                    warn!("No working area available for flash write FIFO");
                    return Err(FlashError::ResourceExhausted);
                }
                debug!("Retrying with {size} byte FIFO");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run<T: TargetAdapter>(
    channel: &mut RegisterChannel<T>,
    config: &FlashConfig,
    code_area: &WorkingArea,
    fifo: &WorkingArea,
    block: &[u8],
    address: u32,
) -> Result<(), FlashError> {
    let mut params = AlgorithmParams::new(channel.base(), block.len() as u32, fifo, address);
    let entry = code_area.address();

    if let Err(e) = execute(channel.target(), config, entry, &mut params, fifo, block).await {
        if e == FlashError::Timeout {
            // The program is still running and issuing its own FLASH_BYPASS
            // sequences.  It must stop before the host touches the
            // controller or frees its memory.
            halt(channel.target()).await;
        }
        return Err(e);
    }

    match params.status() {
        STATUS_OK => {
            let expected = address + block.len() as u32;
            if params.address() != expected {
                warn!(
                    "Write program stopped at 0x{:08X}, expected 0x{expected:08X}",
                    params.address()
                );
                return Err(FlashError::DeviceFailure(STATUS_OK));
            }
            Ok(())
        }
        STATUS_NOT_ERASED => {
            warn!("Flash not erased at 0x{:08X}", params.address());
            Err(FlashError::FlashNotErased)
        }
        status => {
            warn!("Write program failed with status 0x{status:08X}");
            Err(FlashError::DeviceFailure(status))
        }
    }
}

async fn execute<T: TargetAdapter>(
    target: &mut T,
    config: &FlashConfig,
    entry: u32,
    params: &mut AlgorithmParams,
    fifo: &WorkingArea,
    block: &[u8],
) -> Result<(), FlashError> {
    with_timeout!(
        config.algorithm_timeout,
        target.run_async(entry, params, fifo, block, UNIT_SIZE)
    )
}

async fn halt<T: TargetAdapter>(target: &mut T) {
    match target.halt().await {
        Ok(()) => debug!("Halted write program"),
        Err(e) => error!("Failed to halt write program: {e}"),
    }
}
