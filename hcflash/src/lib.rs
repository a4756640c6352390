// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hcflash library
//!
//! HC32F00x on-chip flash programming over a debug link.
//!
//! This erases, programs and write-protects the HC32F00x's main flash array
//! by driving its flash controller registers from the host side of a debug
//! connection.  The debug connection itself is not part of this crate - it
//! is supplied by the application as a [`TargetAdapter`].
//!
//! It is `no_std`, async, and uses [embassy](https://embassy.dev/) timers for
//! polling.  It requires an `alloc` implementation.
//!
//! The following diagram shows the key `hcflash` concepts.
//!
//! ```text
//!   Application / flash manager
//! ------------------------------
//!          Hc32Flash            \
//! ------------------------------ \
//!  erase | direct | accelerated   |-- FlashError
//! ------------------------------ /
//!   Session  /  RegisterChannel /
//! ------------------------------
//!         TargetAdapter          >====== debug link ======< HC32F00x
//! ```
//!
//! * [`Hc32Flash`] provides the operations a flash bank manager needs:
//!   probe, erase, write, protect and protection query.
//! * [`RegisterChannel`] performs individual flash controller register
//!   accesses, including the FLASH_BYPASS unlock sequence, and polls for
//!   completion.
//! * [`session::Session`] saves FLASH_SLOCK and FLASH_CR before an operation
//!   so they can be restored afterwards, whatever the outcome.
//! * [`algo`] contains the device-side write program used to speed up large
//!   writes.
//!
//! `hcflash` uses and is designed to be used alongside the
//! [`hcflash_core`] library, which provides the register map and the sector
//! table.

#![cfg_attr(not(test), no_std)]

pub mod algo;
pub mod channel;
pub mod config;
pub mod direct;
pub mod driver;
pub mod erase;
pub mod session;
pub mod target;

#[doc(inline)]
pub use crate::channel::RegisterChannel;
#[doc(inline)]
pub use crate::config::{BankConfig, FlashConfig, ProgramUnit};
#[doc(inline)]
pub use crate::driver::Hc32Flash;
#[doc(inline)]
pub use crate::target::{AlgorithmParams, TargetAdapter, WorkingArea};

extern crate alloc;
use alloc::format;
use alloc::string::String;
use core::fmt;
use serde::Serialize;

/// Core error type used by all hcflash objects
///
/// Every error that follows a register unlock is returned only after the
/// flash controller's FLASH_SLOCK and FLASH_CR registers have been restored.
///
/// Methods are provided to make it easier to handle errors:
///
/// - [`FlashError::requires_retry()`]
/// - [`FlashError::requires_erase()`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// The target was not halted.  The operation was not attempted and no
    /// register was touched.  Halt the target and retry.
    NotHalted,

    /// The flash controller's BUSY bit did not clear within the configured
    /// budget, or the device-side write program did not complete in time.
    Timeout,

    /// There was not enough working memory on the target for the device-side
    /// write program or its buffer.
    ResourceExhausted,

    /// An attempt was made to program flash which had not been erased.
    FlashNotErased,

    /// Bank configuration was invalid.  The detail explains why.
    Config(String),

    /// The requested sector or byte range is outside the flash array, or is
    /// not aligned to the program unit.
    InvalidRange,

    /// The device-side write program returned an unrecognised status code.
    DeviceFailure(u32),

    /// The target adapter failed to perform an access.  The detail is
    /// adapter specific.
    Target(String),
}

impl FlashError {
    /// Returns true if the operation may succeed if simply retried, for
    /// example after halting the target.
    pub fn requires_retry(&self) -> bool {
        matches!(
            self,
            FlashError::NotHalted | FlashError::Timeout | FlashError::Target(_)
        )
    }

    /// Returns true if the affected sectors must be erased before they can
    /// be written.
    pub fn requires_erase(&self) -> bool {
        matches!(self, FlashError::FlashNotErased)
    }
}

impl FlashError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashError::NotHalted => "Target Not Halted",
            FlashError::Timeout => "Timeout",
            FlashError::ResourceExhausted => "Resource Exhausted",
            FlashError::FlashNotErased => "Flash Not Erased",
            FlashError::Config(_) => "Configuration Error",
            FlashError::InvalidRange => "Invalid Range",
            FlashError::DeviceFailure(_) => "Device Failure",
            FlashError::Target(_) => "Target Error",
        }
    }
}

impl Serialize for FlashError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("FlashError", 2)?;

        let kind = match self {
            FlashError::NotHalted => "not halted",
            FlashError::Timeout => "timeout",
            FlashError::ResourceExhausted => "resource exhausted",
            FlashError::FlashNotErased => "flash not erased",
            FlashError::Config(_) => "config",
            FlashError::InvalidRange => "invalid range",
            FlashError::DeviceFailure(_) => "device failure",
            FlashError::Target(_) => "target",
        };

        state.serialize_field("kind", kind)?;

        let detail = match self {
            FlashError::Config(msg) | FlashError::Target(msg) => msg.as_str(),
            FlashError::DeviceFailure(code) => &format!("{code}"),
            _ => "",
        };
        state.serialize_field("detail", detail)?;
        state.end()
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::DeviceFailure(code) => write!(f, "{}: {code}", self.as_str()),
            FlashError::Config(str) | FlashError::Target(str) => {
                write!(f, "{}: {str}", self.as_str())
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Why a write engine stopped early
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// The error which stopped the write
    pub error: FlashError,

    /// Bytes durably written before the failure
    pub written: usize,

    /// Bytes which may have been programmed, including any partially
    /// written block or unit.  Never less than `written`.
    pub touched: usize,
}

impl WriteFailure {
    /// A failure before anything past `written` reached the flash
    pub fn untouched(error: FlashError, written: usize) -> Self {
        Self {
            error,
            written,
            touched: written,
        }
    }

    /// A failure after `len` further bytes were handed to the controller
    pub fn touched(error: FlashError, written: usize, len: usize) -> Self {
        Self {
            error,
            written,
            touched: written + len,
        }
    }
}

// Macro to bound a target-side run with a host-side timeout, where we want
// an early return
#[macro_export]
macro_rules! with_timeout {
    ($timeout:expr, $future:expr) => {
        match embassy_time::with_timeout($timeout, $future).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Timeout occurred");
                return Err($crate::FlashError::Timeout);
            }
        }
    };
}
