// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Target Adapter
//!
//! hcflash does not implement a debug link itself.  Instead the application
//! provides a [`TargetAdapter`], which performs raw memory accesses, controls
//! the target core and runs code on it.  This might be an SWD probe, a
//! remote debug server, or a simulated target in tests.
//!
//! All addresses are in the target's address space.

use core::fmt;

use crate::FlashError;

/// A region of target RAM handed out by
/// [`TargetAdapter::alloc_working_area()`].
///
/// Deliberately neither `Clone` nor `Copy`, so a region can only be freed
/// once.
#[derive(Debug, PartialEq, Eq)]
pub struct WorkingArea {
    address: u32,
    size: u32,
}

impl WorkingArea {
    /// Creates a new `WorkingArea`.  Only target adapters should need to do
    /// this.
    pub const fn new(address: u32, size: u32) -> Self {
        Self { address, size }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// The first address after this region
    pub fn end(&self) -> u32 {
        self.address + self.size
    }
}

impl fmt::Display for WorkingArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}-0x{:08X}", self.address, self.end())
    }
}

/// Parameters passed to the device-side write program in core registers
/// r0-r4.
///
/// The program hands results back in two of them: r0 receives a status code
/// and r4 the address after the last unit it programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmParams {
    regs: [u32; AlgorithmParams::COUNT],
}

impl AlgorithmParams {
    /// Number of parameter registers
    pub const COUNT: usize = 5;

    /// Register slots
    pub const FLASH_REG_BASE: usize = 0;
    pub const STATUS: usize = 0;
    pub const COUNT_UNITS: usize = 1;
    pub const FIFO_START: usize = 2;
    pub const FIFO_END: usize = 3;
    pub const ADDRESS: usize = 4;

    pub fn new(flash_reg_base: u32, units: u32, fifo: &WorkingArea, address: u32) -> Self {
        let mut regs = [0; Self::COUNT];
        regs[Self::FLASH_REG_BASE] = flash_reg_base;
        regs[Self::COUNT_UNITS] = units;
        regs[Self::FIFO_START] = fifo.address();
        regs[Self::FIFO_END] = fifo.end();
        regs[Self::ADDRESS] = address;
        Self { regs }
    }

    /// Register values, r0 first
    pub fn regs(&self) -> &[u32; Self::COUNT] {
        &self.regs
    }

    /// Mutable register values, used by adapters to hand back r0-r4 after
    /// the program halts.
    pub fn regs_mut(&mut self) -> &mut [u32; Self::COUNT] {
        &mut self.regs
    }

    /// Status code returned by the program in r0.
    pub fn status(&self) -> u32 {
        self.regs[Self::STATUS]
    }

    /// Address after the last unit programmed, returned in r4.
    pub fn address(&self) -> u32 {
        self.regs[Self::ADDRESS]
    }
}

/// Services hcflash needs from the debug link.
///
/// Implementations must serialize accesses: hcflash assumes nothing else
/// touches the flash controller while one of its operations is running,
/// because a FLASH_BYPASS unlock is consumed by the very next register write.
///
/// Transport failures should be reported as [`FlashError::Target`].
#[allow(async_fn_in_trait)]
pub trait TargetAdapter {
    /// Reads a 32-bit word.  `addr` is word aligned.
    async fn read_word(&mut self, addr: u32) -> Result<u32, FlashError>;

    /// Writes a 32-bit word.  `addr` is word aligned.
    async fn write_word(&mut self, addr: u32, value: u32) -> Result<(), FlashError>;

    /// Writes a single byte.
    async fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), FlashError>;

    /// Whether the target core is halted.
    async fn is_halted(&mut self) -> Result<bool, FlashError>;

    /// Halts the target core.  Succeeds if it is already halted.
    async fn halt(&mut self) -> Result<(), FlashError>;

    /// Reads the halted core's program counter.
    async fn program_counter(&mut self) -> Result<u32, FlashError>;

    /// Sets the halted core's program counter.
    async fn set_program_counter(&mut self, addr: u32) -> Result<(), FlashError>;

    /// Allocates `size` bytes of target RAM.
    ///
    /// Returns [`FlashError::ResourceExhausted`] if no region of that size is
    /// available.
    async fn alloc_working_area(&mut self, size: u32) -> Result<WorkingArea, FlashError>;

    /// Releases a region allocated by [`Self::alloc_working_area()`].
    async fn free_working_area(&mut self, area: WorkingArea) -> Result<(), FlashError>;

    /// Copies `code` into `area`.
    async fn upload_code(&mut self, area: &WorkingArea, code: &[u8]) -> Result<(), FlashError>;

    /// Runs the program at `entry` with `params` loaded into r0-r4, streaming
    /// `data` to it through `fifo` in units of `unit_size` bytes, and waits
    /// for it to halt.
    ///
    /// The FIFO is laid out as:
    /// - `fifo.address()`: write pointer, advanced by the host
    /// - `fifo.address() + 4`: read pointer, advanced by the target, or set
    ///   to 0 by the target to abort
    /// - `fifo.address() + 8` to `fifo.end()`: data
    ///
    /// Once the program has halted - whether it completed or aborted - the
    /// adapter must copy r0-r4 back into `params` and return `Ok(())`.  The
    /// caller interprets the status.
    ///
    /// The caller may drop the returned future before the program halts,
    /// for example on a timeout.  The program is then still running, and
    /// the caller stops it with [`Self::halt()`] before any other access to
    /// the flash controller.
    async fn run_async(
        &mut self,
        entry: u32,
        params: &mut AlgorithmParams,
        fifo: &WorkingArea,
        data: &[u8],
        unit_size: u32,
    ) -> Result<(), FlashError>;
}
