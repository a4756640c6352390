// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash Controller Register Access Traits
//!
//! These are used to ensure strongly typed access to reading and writing
//! flash controller registers, using
//!
//! * `hcflash::channel::RegisterChannel::read`
//! * `hcflash::channel::RegisterChannel::write`
//!
//! Unless you are adding support for another register, it is unlikely that
//! you will need to use these traits directly.

/// Base trait for all flash controller register descriptors
pub trait RegisterDescriptor {
    /// Offset of the register from the controller's base address
    const OFFSET: u32;
    type Value;
}

/// Registers that can be read
pub trait ReadableRegister: RegisterDescriptor {
    /// Convert raw 32-bit data to register value
    fn from_raw(data: u32) -> Self::Value
    where
        Self::Value: From<u32>,
    {
        Self::Value::from(data)
    }
}

/// Registers that can only be written after the bypass sequence
pub trait ProtectedRegister: RegisterDescriptor {
    /// Convert register value to raw 32-bit data
    fn to_raw(value: Self::Value) -> u32
    where
        Self::Value: Into<u32>,
    {
        value.into()
    }
}

/// Generate a read-write register data type
#[macro_export]
macro_rules! register_data_rw {
    ($name:ident) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}
