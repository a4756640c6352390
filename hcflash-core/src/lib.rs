// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hcflash-core - Core flash controller and bank concepts used by hcflash.
//!
//! Designed to be used in conjunction with the `hcflash` library, which
//! drives the HC32F00x flash controller over a debug link.  This crate
//! contains the parts that do not need a target: the controller's register
//! map, typed register values, the sector protection bitmap and the sector
//! table.
//!
//! This library is `no_std` compatible, and requires an `alloc`
//! implementation.

#![cfg_attr(not(test), no_std)]

pub mod bank;
pub mod hc32;
pub mod lock;
pub mod register;

extern crate alloc;

#[doc(inline)]
pub use crate::bank::{ErasedState, FlashBank, FlashGeometry, Sector};
#[doc(inline)]
pub use crate::hc32::{FlashCr, FlashOp};
#[doc(inline)]
pub use crate::lock::SectorLock;
