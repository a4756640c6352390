// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated HC32F00x target for integration tests
//!
//! Models just enough of the device to check the driver's register
//! sequences: the FLASH_BYPASS unlock, FLASH_CR op select and BUSY bit,
//! FLASH_SLOCK write protection, NOR programming (bits can only be cleared)
//! and erase, the core's halt state and program counter, a working area
//! allocator and the device-side write program.

#![allow(dead_code)]

use embassy_time::Duration;
use hcflash::algo::{HC32_WRITE_CODE, STATUS_NOT_ERASED, STATUS_OK};
use hcflash::{AlgorithmParams, FlashConfig, FlashError, Hc32Flash, TargetAdapter, WorkingArea};
use hcflash_core::hc32::{
    HC32_FLASH_REG_BASE, HC32_FLASH_SIZE, HC32_RAM_BASE, HC32_SECTOR_SIZE,
    HC32_SECTORS_PER_LOCK_BIT, Hc32FlashBypass, Hc32FlashCr, Hc32FlashSlock,
};
use hcflash_core::register::RegisterDescriptor;
use hcflash_core::{FlashCr, FlashOp, SectorLock};

/// FLASH_CR at reset in the simulation: one wait state, read op
pub const INITIAL_CR: u32 = 0x0000_0004;

/// FLASH_SLOCK at reset in the simulation: everything protected
pub const INITIAL_SLOCK: u32 = 0x0000;

/// PC of the halted core at the start of each test
pub const INITIAL_PC: u32 = 0x0000_0100;

const CR_ADDR: u32 = HC32_FLASH_REG_BASE + Hc32FlashCr::OFFSET;
const SLOCK_ADDR: u32 = HC32_FLASH_REG_BASE + Hc32FlashSlock::OFFSET;
const BYPASS_ADDR: u32 = HC32_FLASH_REG_BASE + Hc32FlashBypass::OFFSET;
const BUSY: u32 = 1 << Hc32FlashCr::BUSY_BIT;

/// Something the driver did that tests want to check the order of
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Unlocked write to FLASH_CR
    Cr(u32),
    /// Unlocked write to FLASH_SLOCK
    Slock(u32),
    /// Erase trigger write into the array
    Trigger { addr: u32, op: FlashOp },
    /// Program counter changed
    SetPc(u32),
    /// Core halted by the host
    Halt,
    /// Working area requested
    Alloc(u32),
    /// Device-side write program run
    Run { address: u32, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bypass {
    Locked,
    Key1,
    Unlocked,
}

#[derive(Debug)]
pub struct MockTarget {
    pub flash: Vec<u8>,
    pub cr: u32,
    pub slock: u32,
    bypass: Bypass,

    /// Protected register writes without a complete bypass sequence
    pub bypass_violations: u32,

    /// FLASH_CR reads which report BUSY after each program or erase
    pub busy_per_op: u32,
    busy_remaining: u32,

    /// BUSY never clears
    pub stuck_busy: bool,

    /// BUSY sticks from this erase trigger (0-based) onwards
    pub stick_at_trigger: Option<usize>,
    triggers: usize,

    pub cr_reads: u32,
    pub halted: bool,
    pub pc: u32,
    pub events: Vec<Event>,

    /// Largest working area the allocator will hand out
    pub max_area: u32,

    /// Allocation calls (0-based) which fail regardless of size
    pub fail_alloc: Vec<usize>,
    alloc_calls: usize,
    ram_next: u32,
    pub outstanding: usize,

    pub code: Vec<u8>,

    /// The device-side program never halts by itself
    pub hang_run: bool,

    /// Any target access fails
    pub link_down: bool,
}

impl Default for MockTarget {
    fn default() -> Self {
        Self {
            flash: vec![0xFF; HC32_FLASH_SIZE as usize],
            cr: INITIAL_CR,
            slock: INITIAL_SLOCK,
            bypass: Bypass::Locked,
            bypass_violations: 0,
            busy_per_op: 2,
            busy_remaining: 0,
            stuck_busy: false,
            stick_at_trigger: None,
            triggers: 0,
            cr_reads: 0,
            halted: true,
            pc: INITIAL_PC,
            events: Vec::new(),
            max_area: 32 * 1024,
            fail_alloc: Vec::new(),
            alloc_calls: 0,
            ram_next: HC32_RAM_BASE + 0x1000,
            outstanding: 0,
            code: Vec::new(),
            hang_run: false,
            link_down: false,
        }
    }
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flash with every byte programmed to `value`
    pub fn filled(value: u8) -> Self {
        Self {
            flash: vec![value; HC32_FLASH_SIZE as usize],
            ..Self::default()
        }
    }

    pub fn sector(&self, sector: u32) -> &[u8] {
        let start = (sector * HC32_SECTOR_SIZE) as usize;
        &self.flash[start..start + HC32_SECTOR_SIZE as usize]
    }

    pub fn sector_erased(&self, sector: u32) -> bool {
        self.sector(sector).iter().all(|b| *b == 0xFF)
    }

    pub fn triggers(&self) -> Vec<(u32, FlashOp)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Trigger { addr, op } => Some((*addr, *op)),
                _ => None,
            })
            .collect()
    }

    pub fn cr_writes(&self) -> Vec<FlashCr> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Cr(v) => Some(FlashCr::from(*v)),
                _ => None,
            })
            .collect()
    }

    pub fn slock_writes(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Slock(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn runs(&self) -> Vec<(u32, usize)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Run { address, len } => Some((*address, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn allocs(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Alloc(size) => Some(*size),
                _ => None,
            })
            .collect()
    }

    fn check_link(&self) -> Result<(), FlashError> {
        if self.link_down {
            return Err(FlashError::Target("link down".to_string()));
        }
        Ok(())
    }

    fn writable(&self, addr: u32) -> bool {
        let sector = addr / HC32_SECTOR_SIZE;
        SectorLock::from(self.slock)
            .group_writable(SectorLock::group(sector, HC32_SECTORS_PER_LOCK_BIT))
    }

    fn start_op(&mut self) {
        self.busy_remaining = self.busy_per_op;
    }

    fn read_cr(&mut self) -> u32 {
        self.cr_reads += 1;
        if self.stuck_busy {
            return self.cr | BUSY;
        }
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return self.cr | BUSY;
        }
        self.cr
    }

    fn write_protected(&mut self, addr: u32, value: u32) {
        if self.bypass != Bypass::Unlocked {
            self.bypass_violations += 1;
            return;
        }
        if addr == CR_ADDR {
            self.cr = value & !BUSY;
            self.events.push(Event::Cr(self.cr));
        } else {
            self.slock = value & 0xFFFF;
            self.events.push(Event::Slock(self.slock));
        }
    }

    fn program(&mut self, addr: u32, bytes: &[u8]) {
        if FlashCr::from(self.cr).op() != FlashOp::Program {
            return;
        }
        self.start_op();
        if !self.writable(addr) {
            return;
        }
        for (ii, byte) in bytes.iter().enumerate() {
            self.flash[addr as usize + ii] &= *byte;
        }
    }

    fn flash_write(&mut self, addr: u32, bytes: &[u8]) {
        let op = FlashCr::from(self.cr).op();
        match op {
            FlashOp::Read => {}
            FlashOp::Program => self.program(addr, bytes),
            FlashOp::SectorErase | FlashOp::ChipErase => {
                self.events.push(Event::Trigger { addr, op });
                let trigger = self.triggers;
                self.triggers += 1;
                if self.stick_at_trigger.is_some_and(|t| trigger >= t) {
                    self.stuck_busy = true;
                    return;
                }
                self.start_op();
                if op == FlashOp::ChipErase {
                    if self.slock & 0xFFFF == 0xFFFF {
                        self.flash.fill(0xFF);
                    }
                } else if self.writable(addr) {
                    let start = (addr - addr % HC32_SECTOR_SIZE) as usize;
                    self.flash[start..start + HC32_SECTOR_SIZE as usize].fill(0xFF);
                }
            }
        }
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) {
        if addr == BYPASS_ADDR {
            let value = u32::from_le_bytes(bytes.try_into().unwrap());
            self.bypass = match (self.bypass, value) {
                (Bypass::Locked, Hc32FlashBypass::KEY1) => Bypass::Key1,
                (Bypass::Key1, Hc32FlashBypass::KEY2) => Bypass::Unlocked,
                _ => Bypass::Locked,
            };
            return;
        }

        if addr == CR_ADDR || addr == SLOCK_ADDR {
            let value = u32::from_le_bytes(bytes.try_into().unwrap());
            self.write_protected(addr, value);
        } else if addr < HC32_FLASH_SIZE {
            self.flash_write(addr, bytes);
        }
        self.bypass = Bypass::Locked;
    }

    // Behaves like asm/hc32_write.s, one byte at a time
    fn run_write_program(&mut self, params: &mut AlgorithmParams, data: &[u8]) {
        assert_eq!(params.regs()[AlgorithmParams::FLASH_REG_BASE], HC32_FLASH_REG_BASE);
        assert_eq!(params.regs()[AlgorithmParams::COUNT_UNITS] as usize, data.len());

        let mut addr = params.address();
        for byte in data {
            if self.flash[addr as usize] != 0xFF {
                params.regs_mut()[AlgorithmParams::STATUS] = STATUS_NOT_ERASED;
                params.regs_mut()[AlgorithmParams::ADDRESS] = addr;
                return;
            }
            let cr = FlashCr::from(self.cr).with_op(FlashOp::Program);
            self.write(BYPASS_ADDR, &Hc32FlashBypass::KEY1.to_le_bytes());
            self.write(BYPASS_ADDR, &Hc32FlashBypass::KEY2.to_le_bytes());
            self.write(CR_ADDR, &u32::from(cr).to_le_bytes());
            self.write(addr, &[*byte]);
            self.busy_remaining = 0;
            addr += 1;
        }
        params.regs_mut()[AlgorithmParams::STATUS] = STATUS_OK;
        params.regs_mut()[AlgorithmParams::ADDRESS] = addr;
    }
}

impl TargetAdapter for MockTarget {
    async fn read_word(&mut self, addr: u32) -> Result<u32, FlashError> {
        self.check_link()?;
        let value = match addr {
            CR_ADDR => self.read_cr(),
            SLOCK_ADDR => self.slock,
            a if a < HC32_FLASH_SIZE => {
                let a = a as usize;
                u32::from_le_bytes(self.flash[a..a + 4].try_into().unwrap())
            }
            _ => 0,
        };
        Ok(value)
    }

    async fn write_word(&mut self, addr: u32, value: u32) -> Result<(), FlashError> {
        self.check_link()?;
        self.write(addr, &value.to_le_bytes());
        Ok(())
    }

    async fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), FlashError> {
        self.check_link()?;
        self.write(addr, &[value]);
        Ok(())
    }

    async fn is_halted(&mut self) -> Result<bool, FlashError> {
        self.check_link()?;
        Ok(self.halted)
    }

    async fn halt(&mut self) -> Result<(), FlashError> {
        self.check_link()?;
        self.halted = true;
        self.events.push(Event::Halt);
        Ok(())
    }

    async fn program_counter(&mut self) -> Result<u32, FlashError> {
        self.check_link()?;
        Ok(self.pc)
    }

    async fn set_program_counter(&mut self, addr: u32) -> Result<(), FlashError> {
        self.check_link()?;
        self.pc = addr;
        self.events.push(Event::SetPc(addr));
        Ok(())
    }

    async fn alloc_working_area(&mut self, size: u32) -> Result<WorkingArea, FlashError> {
        self.check_link()?;
        let call = self.alloc_calls;
        self.alloc_calls += 1;
        self.events.push(Event::Alloc(size));
        if self.fail_alloc.contains(&call) || size > self.max_area {
            return Err(FlashError::ResourceExhausted);
        }
        let area = WorkingArea::new(self.ram_next, size);
        self.ram_next += size;
        self.outstanding += 1;
        Ok(area)
    }

    async fn free_working_area(&mut self, _area: WorkingArea) -> Result<(), FlashError> {
        self.check_link()?;
        self.outstanding -= 1;
        Ok(())
    }

    async fn upload_code(&mut self, area: &WorkingArea, code: &[u8]) -> Result<(), FlashError> {
        self.check_link()?;
        assert!(code.len() as u32 <= area.size());
        self.code = code.to_vec();
        Ok(())
    }

    async fn run_async(
        &mut self,
        _entry: u32,
        params: &mut AlgorithmParams,
        fifo: &WorkingArea,
        data: &[u8],
        unit_size: u32,
    ) -> Result<(), FlashError> {
        self.check_link()?;
        assert_eq!(self.code, HC32_WRITE_CODE);
        assert_eq!(unit_size, 1);
        assert_eq!(params.regs()[AlgorithmParams::FIFO_START], fifo.address());
        assert_eq!(params.regs()[AlgorithmParams::FIFO_END], fifo.end());

        self.events.push(Event::Run {
            address: params.address(),
            len: data.len(),
        });
        if self.hang_run {
            // Left running until the host halts it
            self.halted = false;
            return core::future::pending().await;
        }
        self.run_write_program(params, data);
        Ok(())
    }
}

/// Test configuration: default device, fast polling
pub fn config() -> FlashConfig {
    FlashConfig {
        poll_interval: Duration::from_micros(10),
        ..FlashConfig::default()
    }
}

pub fn flash(target: MockTarget) -> Hc32Flash<MockTarget> {
    Hc32Flash::new(target, config()).unwrap()
}

pub fn flash_with(target: MockTarget, config: FlashConfig) -> Hc32Flash<MockTarget> {
    Hc32Flash::new(target, config).unwrap()
}

/// Deterministic, mostly non-0xFF test data
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|ii| (ii * 7 + 3) as u8 & 0x7F).collect()
}
