//! Physical and virtual address types.
//!
//! This module defines strong types for the two address spaces of the
//! simulated machine to prevent accidental mixing. It provides:
//! 1. **Type safety:** `Address` (physical) and `VirtualAddress` are distinct
//!    at compile time; translation is the only way from one to the other.
//! 2. **Arithmetic:** Offset addition/subtraction, distance, and bit masking.
//! 3. **Alignment queries:** Predicates used by the fetch stage and the
//!    memory frontends.

use std::fmt;
use std::ops::{Add, AddAssign, BitAnd, Sub};

/// A physical address in the simulated machine's address space.
///
/// Physical addresses index the memory bus directly. They are produced either
/// by the program (when translation is disabled) or by the TLB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

/// A virtual address as seen by the executing program.
///
/// Virtual addresses must pass through the TLB (or its identity bypass) to
/// become [`Address`]es before any memory device is touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub u64);

macro_rules! impl_address_common {
    ($name:ident) => {
        impl $name {
            /// Creates an address from a raw 64-bit value.
            #[inline(always)]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The null address (zero), used as an "absent" marker.
            #[inline(always)]
            pub const fn null() -> Self {
                Self(0)
            }

            /// Returns the raw 64-bit value.
            #[inline(always)]
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Whether this is the null (zero) address.
            #[inline(always)]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Whether the address is a multiple of `unit` bytes.
            ///
            /// `unit` is expected to be a power of two.
            #[inline(always)]
            pub const fn is_aligned(self, unit: u64) -> bool {
                self.0 & (unit - 1) == 0
            }

            /// Byte offset of this address within a 4 KiB page.
            #[inline(always)]
            pub const fn page_offset(self) -> u64 {
                self.0 & 0xFFF
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            fn add(self, offset: u64) -> Self {
                Self(self.0.wrapping_add(offset))
            }
        }

        impl Add<i64> for $name {
            type Output = Self;

            fn add(self, offset: i64) -> Self {
                Self(self.0.wrapping_add_signed(offset))
            }
        }

        impl AddAssign<u64> for $name {
            fn add_assign(&mut self, offset: u64) {
                self.0 = self.0.wrapping_add(offset);
            }
        }

        impl Sub<u64> for $name {
            type Output = Self;

            fn sub(self, offset: u64) -> Self {
                Self(self.0.wrapping_sub(offset))
            }
        }

        impl Sub<$name> for $name {
            /// Distance in bytes between two addresses.
            type Output = u64;

            fn sub(self, other: $name) -> u64 {
                self.0.wrapping_sub(other.0)
            }
        }

        impl BitAnd<u64> for $name {
            type Output = Self;

            fn bitand(self, mask: u64) -> Self {
                Self(self.0 & mask)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

impl_address_common!(Address);
impl_address_common!(VirtualAddress);

impl VirtualAddress {
    /// Reinterprets this virtual address as a physical one.
    ///
    /// Only the TLB identity bypass and the bare-translation path are allowed
    /// to take this shortcut.
    #[inline(always)]
    pub const fn to_physical(self) -> Address {
        Address(self.0)
    }
}
